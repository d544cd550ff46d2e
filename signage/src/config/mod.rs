//! Configuration acquisition: providers, snapshots and the polling cache.

mod cache;
mod events;
mod provider;
mod snapshot;

pub use cache::{
    CacheConfig, ConfigurationCache, DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_INTERVAL,
    RefreshOutcome,
};
pub use events::{ConfigurationEvent, ConfigurationEventBroadcaster};
pub use provider::{ConfigurationProvider, FileConfigurationProvider, HttpConfigurationProvider};
pub use snapshot::{
    FileSnapshotStore, MemorySnapshotStore, SNAPSHOT_VERSION, Snapshot, SnapshotError,
    SnapshotStore, fingerprint,
};
