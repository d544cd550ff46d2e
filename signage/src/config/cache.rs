//! Configuration cache.
//!
//! Polls the provider, holds the last good configuration, warm-starts from
//! the snapshot store and broadcasts changes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ConfigurationEvent, ConfigurationEventBroadcaster};
use super::provider::ConfigurationProvider;
use super::snapshot::{SnapshotStore, fingerprint};
use crate::Error;
use crate::domain::Configuration;
use crate::scheduler::PassFlag;

/// Default refresh interval (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Default fetch timeout (30 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Key for the snapshot store.
    pub configuration_id: String,
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    /// Load the last snapshot during construction.
    pub warm_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            configuration_id: "default".to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            warm_start: true,
        }
    }
}

/// Result of one [`ConfigurationCache::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new configuration is now current.
    Updated { fingerprint: String },
    /// The fetched document is identical to the current one.
    Unchanged,
    /// The fetched document has no schedule with a layout.
    Unusable,
    /// Another fetch is running; nothing was fetched.
    AlreadyInFlight,
    /// The fetch failed; the previous configuration is still current.
    Failed(String),
}

type ChangeCallback = Arc<dyn Fn(Arc<Configuration>) + Send + Sync>;

struct Current {
    configuration: Arc<Configuration>,
    fingerprint: String,
}

pub struct ConfigurationCache {
    provider: Arc<dyn ConfigurationProvider>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    config: CacheConfig,
    current: RwLock<Option<Current>>,
    callbacks: RwLock<Vec<ChangeCallback>>,
    events: ConfigurationEventBroadcaster,
    in_flight: PassFlag,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigurationCache {
    /// Create the cache, warm-starting from the snapshot store if enabled.
    ///
    /// A warm start happens before anyone can subscribe; callers check
    /// [`current`](Self::current) after construction.
    pub async fn new(
        provider: Arc<dyn ConfigurationProvider>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
        config: CacheConfig,
    ) -> Arc<Self> {
        let cache = Self {
            provider,
            snapshots,
            config,
            current: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
            events: ConfigurationEventBroadcaster::new(),
            in_flight: PassFlag::new(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        };

        if cache.config.warm_start {
            cache.warm_start().await;
        }

        Arc::new(cache)
    }

    pub fn configuration_id(&self) -> &str {
        &self.config.configuration_id
    }

    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.current.read().as_ref().map(|c| c.configuration.clone())
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.fingerprint.clone())
    }

    /// Register a callback invoked with every new current configuration.
    pub fn on_changed<F>(&self, callback: F)
    where
        F: Fn(Arc<Configuration>) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConfigurationEvent> {
        self.events.subscribe()
    }

    /// Start polling. The first fetch happens immediately.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("configuration cache already started");
            return;
        }

        let cache = Arc::clone(self);
        let cancel = self.cancel.clone();
        info!(
            source = %self.provider.describe(),
            interval_secs = self.config.refresh_interval.as_secs(),
            "starting configuration polling"
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.config.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = cache.refresh() => {
                        debug!(?outcome, "configuration refresh finished");
                    }
                }
            }

            debug!("configuration polling stopped");
        }));
    }

    /// Stop polling and wait for the polling task to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "configuration polling task ended abnormally");
        }
    }

    /// Fetch once. Never returns an error: failures keep the previous
    /// configuration and are reported in the outcome and as an event.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = self.in_flight.try_begin() else {
            debug!("configuration fetch already in flight");
            return RefreshOutcome::AlreadyInFlight;
        };

        let timeout = self.config.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.provider.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "configuration fetch exceeded {}s",
                timeout.as_secs_f64()
            ))),
        };

        match fetched {
            Ok(configuration) => self.accept(configuration).await,
            Err(e) => {
                warn!(
                    source = %self.provider.describe(),
                    error = %e,
                    "configuration fetch failed, keeping previous configuration"
                );
                let reason = e.to_string();
                self.events.publish(ConfigurationEvent::FetchFailed {
                    reason: reason.clone(),
                });
                RefreshOutcome::Failed(reason)
            }
        }
    }

    async fn accept(&self, configuration: Configuration) -> RefreshOutcome {
        if !configuration.is_usable() {
            warn!(
                configuration_id = %configuration.configuration_id,
                "fetched configuration has no schedule with a layout, ignoring"
            );
            self.events.publish(ConfigurationEvent::Unusable {
                configuration_id: configuration.configuration_id.clone(),
            });
            return RefreshOutcome::Unusable;
        }

        let fingerprint = match fingerprint(&configuration) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return RefreshOutcome::Failed(e.to_string()),
        };

        if self.fingerprint().as_deref() == Some(fingerprint.as_str()) {
            debug!(fingerprint = %fingerprint, "configuration unchanged");
            return RefreshOutcome::Unchanged;
        }

        let configuration = Arc::new(configuration);
        self.install(configuration.clone(), fingerprint.clone());

        if let Some(store) = &self.snapshots
            && let Err(e) = store
                .save(&self.config.configuration_id, &configuration)
                .await
        {
            warn!(error = %e, "failed to save configuration snapshot");
        }

        info!(
            configuration_id = %configuration.configuration_id,
            schedules = configuration.schedules.len(),
            fingerprint = %fingerprint,
            "configuration updated"
        );
        self.events.publish(ConfigurationEvent::Updated {
            configuration_id: configuration.configuration_id.clone(),
            fingerprint: fingerprint.clone(),
        });

        RefreshOutcome::Updated { fingerprint }
    }

    async fn warm_start(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };

        match store.load(&self.config.configuration_id).await {
            Ok(Some(snapshot)) if snapshot.configuration.is_usable() => {
                info!(
                    configuration_id = %snapshot.configuration.configuration_id,
                    saved_at = %snapshot.saved_at,
                    "warm-started from snapshot"
                );
                let configuration_id = snapshot.configuration.configuration_id.clone();
                self.install(Arc::new(snapshot.configuration), snapshot.fingerprint.clone());
                self.events.publish(ConfigurationEvent::WarmStarted {
                    configuration_id,
                    fingerprint: snapshot.fingerprint,
                });
            }
            Ok(Some(_)) => debug!("snapshot is not usable, skipping warm start"),
            Ok(None) => debug!("no snapshot, cold start"),
            Err(e) => warn!(error = %e, "failed to load configuration snapshot"),
        }
    }

    fn install(&self, configuration: Arc<Configuration>, fingerprint: String) {
        *self.current.write() = Some(Current {
            configuration: configuration.clone(),
            fingerprint,
        });

        let callbacks: Vec<ChangeCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            callback(configuration.clone());
        }
    }
}

impl Drop for ConfigurationCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
