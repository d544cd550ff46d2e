//! Last-known-good configuration snapshots.
//!
//! Snapshots are stored in a versioned envelope. An envelope with another
//! version, or whose fingerprint does not match its content, is discarded
//! instead of misparsed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::Configuration;

/// Current envelope format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors from a snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SnapshotError> for crate::Error {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(e) => Self::Io(e),
            SnapshotError::Serialization(e) => Self::Serialization(e),
        }
    }
}

/// SHA-256 (hex) of the canonical JSON form of a configuration.
pub fn fingerprint(configuration: &Configuration) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(configuration)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// A loaded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub configuration: Configuration,
    pub saved_at: DateTime<Utc>,
    pub fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    version: u32,
    saved_at: DateTime<Utc>,
    fingerprint: String,
    configuration: Configuration,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    version: u32,
}

impl Envelope {
    fn seal(configuration: &Configuration) -> Result<Self, SnapshotError> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            fingerprint: fingerprint(configuration)?,
            configuration: configuration.clone(),
        })
    }

    /// Decode and verify an envelope. `Ok(None)` means "discard".
    fn open(bytes: &[u8]) -> Result<Option<Snapshot>, SnapshotError> {
        let header: EnvelopeHeader = match serde_json::from_slice(bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "discarding unreadable snapshot");
                return Ok(None);
            }
        };
        if header.version != SNAPSHOT_VERSION {
            warn!(
                version = header.version,
                expected = SNAPSHOT_VERSION,
                "discarding snapshot with unknown version"
            );
            return Ok(None);
        }

        let envelope: Envelope = match serde_json::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding malformed snapshot");
                return Ok(None);
            }
        };

        let actual = fingerprint(&envelope.configuration)?;
        if actual != envelope.fingerprint {
            warn!(
                stored = %envelope.fingerprint,
                actual = %actual,
                "discarding snapshot with mismatched fingerprint"
            );
            return Ok(None);
        }

        Ok(Some(Snapshot {
            configuration: envelope.configuration,
            saved_at: envelope.saved_at,
            fingerprint: envelope.fingerprint,
        }))
    }
}

/// Persistence of the last-known-good configuration.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    async fn save(
        &self,
        configuration_id: &str,
        configuration: &Configuration,
    ) -> Result<(), SnapshotError>;

    async fn load(&self, configuration_id: &str) -> Result<Option<Snapshot>, SnapshotError>;
}

/// One JSON envelope per configuration id, in a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, configuration_id: &str) -> PathBuf {
        let name: String = configuration_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = if name.is_empty() || name.starts_with('.') {
            format!("_{name}")
        } else {
            name
        };
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(
        &self,
        configuration_id: &str,
        configuration: &Configuration,
    ) -> Result<(), SnapshotError> {
        let envelope = Envelope::seal(configuration)?;
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(configuration_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), fingerprint = %envelope.fingerprint, "snapshot saved");
        Ok(())
    }

    async fn load(&self, configuration_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let path = self.path_for(configuration_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Envelope::open(&bytes)
    }
}

/// In-memory store, for tests and ephemeral players.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw envelope bytes, bypassing sealing.
    pub fn insert_raw(&self, configuration_id: &str, bytes: Vec<u8>) {
        self.entries.lock().insert(configuration_id.to_string(), bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(
        &self,
        configuration_id: &str,
        configuration: &Configuration,
    ) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec(&Envelope::seal(configuration)?)?;
        self.insert_raw(configuration_id, bytes);
        Ok(())
    }

    async fn load(&self, configuration_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let bytes = self.entries.lock().get(configuration_id).cloned();
        match bytes {
            Some(bytes) => Envelope::open(&bytes),
            None => Ok(None),
        }
    }
}
