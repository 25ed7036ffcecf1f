//! Hot-reloading, content-fingerprinted product catalog cache with a small HTTP surface.

pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
