//! Operator-facing log setup. `-v` flags pick the level; `RUST_LOG` wins when set.

use tracing_subscriber::EnvFilter;

pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber (stderr, compact). Safe to call twice.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let level = level_for(verbose);
            EnvFilter::new(format!("catalog_cache={level},catalog={level}"))
        });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
