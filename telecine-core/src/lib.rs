//! Variant resolution and the ingest-to-Telegram upload pipeline.
#![allow(missing_docs)]

pub mod blob;
pub mod context;
pub mod control;
pub mod error;
pub mod files;
pub mod notify;
pub mod parser;
pub mod resolver;
pub mod store;
pub mod uploader;

pub use context::UploaderContext;
pub use error::{Result, TelecineError};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
