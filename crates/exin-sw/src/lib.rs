//! # Exin Offline Agent
//!
//! Offline cache agent for the Expenses & Income web app.
//!
//! ## Features
//!
//! - **Install**: precache a fixed asset manifest into a versioned bucket
//! - **Activate**: purge every other bucket, claim open clients
//! - **Documents**: network-first, falling back to the cached root document
//! - **Assets**: cache-first, refreshed in the background
//!
//! ## Architecture
//!
//! ```text
//! OfflineAgent
//!     ├── AgentConfig (scope, cache name, manifest)
//!     ├── CacheStorage (buckets)
//!     │       └── Cache
//!     │               └── request key → CacheEntry
//!     ├── Network (fetch)
//!     └── ClientRegistry (claim)
//! ```

use thiserror::Error;
use url::Url;

pub mod agent;
pub mod cache;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod strategy;

pub use agent::{
    ActivateReport, FetchOutcome, FetchResponse, InstallReport, OfflineAgent, ResponseSource,
};
pub use cache::{Cache, CacheEntry, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientRegistry, ClientType, FrameType, MemoryClients};
pub use config::AgentConfig;
pub use lifecycle::{Registration, ServiceWorker, ServiceWorkerId, WorkerState};
pub use strategy::{classify, is_same_origin, RequestKind};

// ==================== Errors ====================

/// Errors raised by cache storage.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Cache write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid cache entry: {0}")]
    InvalidEntry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the offline agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Install failed for {url}: {reason}")]
    Install { url: Url, reason: String },

    #[error("Offline and no cached response for {url}")]
    Offline { url: Url },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Client error: {0}")]
    Clients(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: expected {expected}, found {actual}")]
    State {
        expected: WorkerState,
        actual: WorkerState,
    },
}
