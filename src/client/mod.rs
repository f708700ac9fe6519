//! Client side: local cache, sync status and the typed API client

pub mod api;
pub mod cache;
pub mod coordinator;
pub mod status;
pub mod storage;

pub use api::ContentClient;
pub use cache::{CacheConfig, CacheEntry, CacheManager, CacheStats, Clock, ManualClock, SystemClock};
pub use coordinator::SyncCoordinator;
pub use status::{StatusHub, SyncStatus};
pub use storage::{CacheError, CacheStorage, FileStorage, MemoryStorage};
