//! Layered configuration for the telecine uploader: `telecine.toml`, an
//! optional `.env` file and the process environment.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod warnings;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    BlobConfig, Config, ConfigMetadata, DatabaseConfig, EndpointMode, QueueConfig, RedisConfig,
};
pub use warnings::{ConfigWarning, ConfigWarnings};
