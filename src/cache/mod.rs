//! Render artifact cache: content-addressed, immutable, populated lazily.

mod coordinator;
mod keys;
mod store;

pub use coordinator::CacheCoordinator;
pub use keys::ArtifactKey;
pub use store::{ArtifactStore, FsStore, MemoryStore, StoreError};
