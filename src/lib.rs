//! Dispatch Store is the client-side data synchronization engine behind the
//! delivery marketplace console.
//!
//! It pairs an embedded JSON document store with a read cache and an
//! optimistic-mutation manager, and puts a small fetch façade on top that
//! decides when cached data is served, when it is revalidated, and how
//! speculative writes are rolled back.
//!
//! ## Core Components
//! - [`engine`]: The document store (collections, query builder, persistence, change feed).
//! - [`cache`]: The TTL read cache and the optimistic update manager.
//! - [`fetch`]: Query and mutation observers orchestrating cache, optimistic state and fetches.
//! - [`sdk`]: Environment-driven wiring of all of the above.

pub mod cache;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod sdk;

use thiserror::Error;

pub use cache::{OptimisticManager, ReadCache};
pub use config::Config;
pub use engine::{Envelope, Store};
pub use fetch::{FetchClient, FetchError};

/// Errors returned by Dispatch Store.
#[derive(Error, Debug)]
pub enum Error {
    /// A read that required exactly one row matched nothing.
    #[error("no rows returned")]
    NoRows,
    /// A read failed or returned an unusable result.
    #[error("{0}")]
    Query(String),
    /// The underlying write failed.
    #[error("{0}")]
    Mutation(String),
    /// An optimistic updater refused to produce a value.
    #[error("optimistic update failed: {0}")]
    Updater(String),
    /// An error raised by caller-supplied code, optionally tagged with a code.
    #[error("{message}")]
    Unexpected {
        message: String,
        code: Option<String>,
    },
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred while reading or writing a durable slot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Builds an [`Error::Unexpected`] from any displayable failure.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Error::Unexpected {
            message: message.into(),
            code: None,
        }
    }

    /// Builds an [`Error::Unexpected`] carrying a machine-readable code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Error::Unexpected {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

/// A specialized Result type for Dispatch Store operations.
pub type Result<T> = std::result::Result<T, Error>;
