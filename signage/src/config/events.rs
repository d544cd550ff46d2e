//! Configuration cache events.
//!
//! Broadcast whenever the cache finishes a refresh or warm start, so the
//! scheduler can re-evaluate without waiting for its next tick.

use tokio::sync::broadcast;

/// Events broadcast by the configuration cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationEvent {
    /// A new configuration became current after a fetch.
    Updated {
        configuration_id: String,
        fingerprint: String,
    },
    /// A snapshot became current during construction.
    WarmStarted {
        configuration_id: String,
        fingerprint: String,
    },
    /// A fetch failed; the previous configuration is still current.
    FetchFailed { reason: String },
    /// A fetched document had no schedule with a layout and was ignored.
    Unusable { configuration_id: String },
}

impl ConfigurationEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            Self::Updated {
                configuration_id,
                fingerprint,
            } => format!(
                "Configuration updated: {} ({})",
                configuration_id,
                short(fingerprint)
            ),
            Self::WarmStarted {
                configuration_id,
                fingerprint,
            } => format!(
                "Configuration warm-started: {} ({})",
                configuration_id,
                short(fingerprint)
            ),
            Self::FetchFailed { reason } => format!("Configuration fetch failed: {}", reason),
            Self::Unusable { configuration_id } => {
                format!("Configuration unusable: {}", configuration_id)
            }
        }
    }

    /// Whether the event means the current configuration changed.
    pub fn changes_configuration(&self) -> bool {
        matches!(self, Self::Updated { .. } | Self::WarmStarted { .. })
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// Default channel capacity for configuration events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for configuration events.
#[derive(Clone)]
pub struct ConfigurationEventBroadcaster {
    sender: broadcast::Sender<ConfigurationEvent>,
}

impl ConfigurationEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigurationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of receivers that got it.
    pub fn publish(&self, event: ConfigurationEvent) -> usize {
        tracing::debug!("Publishing configuration event: {}", event.description());
        // No receivers is fine.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConfigurationEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
