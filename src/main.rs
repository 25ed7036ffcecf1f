use anyhow::{Context, Result};
use catalog_cache::catalog::handler::{GetByIdsHandler, GetByIdsOutcome, GetByIdsRequest};
use catalog_cache::catalog::problem::Problem;
use catalog_cache::catalog::{self, ProductCache};
use catalog_cache::config::{self, Config};
use catalog_cache::logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "catalog",
    version,
    about = "Hot-reloading product catalog lookup service",
    long_about = "Serves product lookups by id from a JSON file, reloading it whenever it changes and exposing a content fingerprint as the HTTP ETag."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Catalog JSON file (overrides config and CATALOG_DATA_FILE)
    #[arg(long, global = true)]
    data: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Bind address (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Port (default from config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not watch the catalog file for changes
        #[arg(long)]
        no_watch: bool,
    },

    /// Look up products once and print the response
    Get {
        /// Product ids
        ids: Vec<String>,

        /// Entity tag to send as If-None-Match
        #[arg(long)]
        if_none_match: Option<String>,
    },

    /// Show what the cache would load right now
    Status,

    /// Watch the catalog file and print a line after every reload
    Watch,

    /// Show or create the config file
    Config {
        /// Write the default config file
        #[arg(long)]
        create: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Config { create } => {
            if create {
                let path = Config::create_default()?;
                println!("Created {}", path.display());
            } else {
                config::show_config()?;
            }
        }

        Commands::Serve {
            host,
            port,
            no_watch,
        } => {
            let cfg = Config::load().context("Failed to load config")?;
            let mut cache_opts = cfg.cache_options();
            cache_opts.watch &= !no_watch;
            let mut server_opts = cfg.server_options();
            if let Some(host) = host {
                server_opts.host = host;
            }
            if let Some(port) = port {
                server_opts.port = port;
            }

            let path = data_path(cli.data, &cfg);
            let cache = Arc::new(ProductCache::open(path, cache_opts));
            let listener = catalog::api::bind(&server_opts)?;
            eprintln!(
                "catalog.serve: listening on http://{} (data={} records={} watch={})",
                listener.local_addr().context("Failed to read bound address")?,
                cache.path().display(),
                cache.snapshot().len(),
                cache.is_watching()
            );
            let shutdown = CancellationToken::new();
            let stop = shutdown.clone();
            ctrlc::set_handler(move || stop.cancel())
                .context("Failed to install shutdown signal handler")?;
            catalog::api::serve(listener, cache, &server_opts, shutdown)?;
            eprintln!("catalog.serve: stopped");
        }

        Commands::Get { ids, if_none_match } => {
            let cfg = Config::load().context("Failed to load config")?;
            let mut cache_opts = cfg.cache_options();
            cache_opts.watch = false;
            let cache = ProductCache::open(data_path(cli.data, &cfg), cache_opts);

            let request = GetByIdsRequest { ids, if_none_match };
            let outcome = GetByIdsHandler::new(&cache, cfg.server.max_ids)
                .handle(&request, &CancellationToken::new());
            if !print_outcome(&outcome)? {
                std::process::exit(1);
            }
        }

        Commands::Status => {
            let cfg = Config::load().context("Failed to load config")?;
            let mut cache_opts = cfg.cache_options();
            cache_opts.watch = false;
            let cache = ProductCache::open(data_path(cli.data, &cfg), cache_opts);
            print_status(&cache, cli.verbose);
        }

        Commands::Watch => {
            let cfg = Config::load().context("Failed to load config")?;
            let mut cache_opts = cfg.cache_options();
            cache_opts.watch = true;
            let cache = ProductCache::open(data_path(cli.data, &cfg), cache_opts);
            if !cache.is_watching() {
                anyhow::bail!(
                    "Cannot watch {}: parent directory is missing",
                    cache.path().display()
                );
            }
            print_status(&cache, cli.verbose);
            let mut seen = cache.status().reloads;
            loop {
                std::thread::sleep(Duration::from_millis(200));
                let reloads = cache.status().reloads;
                if reloads != seen {
                    seen = reloads;
                    print_status(&cache, cli.verbose);
                }
            }
        }
    }

    Ok(())
}

/// `--data` > `CATALOG_DATA_FILE` > `[data] file_path`.
fn data_path(flag: Option<PathBuf>, cfg: &Config) -> PathBuf {
    flag.unwrap_or_else(|| cfg.data.file_path.clone())
}

fn print_status(cache: &ProductCache, verbose: u8) {
    let status = cache.status();
    println!(
        "catalog.status path={} origin={} records={} etag={}",
        status.path.display(),
        status.origin,
        status.records,
        status.etag
    );
    if verbose > 0 {
        println!("  loaded_at: {}", status.loaded_at);
        println!("  reloads: {}", status.reloads);
        println!("  watching: {}", status.watching);
    }
}

/// Print status line + body. Returns true for 200/304.
fn print_outcome(outcome: &GetByIdsOutcome) -> Result<bool> {
    let status = outcome.status();
    match outcome.etag() {
        Some(etag) => println!("status={status} etag={etag}"),
        None => println!("status={status}"),
    }
    match outcome {
        GetByIdsOutcome::Ok { body, .. } => {
            println!(
                "{}",
                serde_json::to_string_pretty(body).context("Failed to serialize response")?
            );
        }
        GetByIdsOutcome::NotModified { .. } | GetByIdsOutcome::Cancelled => {}
        GetByIdsOutcome::BadRequest { detail } => {
            println!("{}", Problem::new(400, "Validation Failed", detail, None).to_json());
        }
        GetByIdsOutcome::NotFound => {
            println!(
                "{}",
                Problem::new(404, "Not Found", "No products found for the given ids.", None)
                    .to_json()
            );
        }
    }
    Ok(matches!(status, 200 | 304))
}
