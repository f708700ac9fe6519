//! # Lexicon Sync - Content Store, Change Stream and Client Cache
//!
//! Keeps the dictionary and script reference data (words and characters) in
//! one versioned snapshot document and keeps clients in step with it.
//!
//! ## Features
//!
//! - **Versioned store**: every committed change bumps the snapshot version;
//!   writes use optimistic concurrency against a local file or a remote
//!   repository
//! - **Change stream**: committed changes are fanned out to every open
//!   `/events` connection
//! - **Offline tolerant client**: reads are cached locally with expiry and
//!   schema versioning, and served from cache when the server is unreachable
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lexicon_sync::{server, ContentStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ContentStore::in_memory();
//!     server::start("127.0.0.1", 3000, store).await
//! }
//! ```

pub mod client;
pub mod content;
pub mod error;
pub mod server;
pub mod storage;
pub mod sync;

// Re-export main types for library consumers
pub use client::{CacheManager, ContentClient, StatusHub, SyncCoordinator, SyncStatus};
pub use content::{Character, Collection, ContentSnapshot, Entry, Word};
pub use error::{ContentError, ContentResult, RetryPolicy};
pub use storage::{ContentStore, SnapshotBackend};
pub use sync::{Broadcaster, ContentEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
