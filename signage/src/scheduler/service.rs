//! Scheduler service.
//!
//! Ties the configuration cache, the schedule selector and the playback
//! engine together. A pass runs on a fixed cadence and whenever the cache
//! reports a new configuration:
//!
//! 1. read the current configuration,
//! 2. select the active schedule,
//! 3. project it into an [`ActiveLayout`],
//! 4. hand the layout to the playback engine if it differs from the one on
//!    screen.
//!
//! Failures are logged and reported in the [`EvaluationOutcome`]; the loop
//! itself never stops on an error.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::layout::LayoutTransformer;
use super::recurrence::RecurrenceEvaluator;
use super::selector::{ScheduleSelector, Selection};
use crate::assets::{AssetCache, collect_asset_urls};
use crate::clock::Clock;
use crate::config::ConfigurationCache;
use crate::domain::{ActiveLayout, Configuration};
use crate::playback::{PlayOutcome, PlaybackEngine, PlaylistStatus, Presenter};

/// Default evaluation cadence (15 seconds).
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(15);

/// Capacity of the layout change channel.
const LAYOUT_CHANNEL_CAPACITY: usize = 16;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub evaluation_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: DEFAULT_EVALUATION_INTERVAL,
        }
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Another pass is still running.
    Busy,
    /// The cache holds no configuration yet.
    NoConfiguration,
    /// No schedule produced a fire instant; the current layout stays.
    NoActiveSchedule,
    /// The selected layout is already on screen.
    Unchanged { schedule_id: String },
    /// A new layout was applied.
    Changed {
        schedule_id: String,
        layout_id: String,
    },
    /// The playback engine refused the layout; retried next pass.
    Failed(String),
}

type LayoutCallback = Arc<dyn Fn(Arc<ActiveLayout>) + Send + Sync>;

pub struct SignageScheduler {
    cache: Arc<ConfigurationCache>,
    selector: ScheduleSelector,
    transformer: LayoutTransformer,
    engine: tokio::sync::Mutex<PlaybackEngine>,
    clock: Arc<dyn Clock>,
    assets: Option<Arc<dyn AssetCache>>,
    callbacks: RwLock<Vec<LayoutCallback>>,
    layouts: broadcast::Sender<Arc<ActiveLayout>>,
    current: RwLock<Option<Arc<ActiveLayout>>>,
    /// Fingerprint of the last configuration handed to the asset cache.
    prewarmed: Mutex<Option<String>>,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SignageScheduler {
    pub fn new(
        cache: Arc<ConfigurationCache>,
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let engine = PlaybackEngine::with_cancellation(
            presenter,
            clock.clone(),
            cancellation_token.child_token(),
        );
        let (layouts, _) = broadcast::channel(LAYOUT_CHANNEL_CAPACITY);

        Self {
            cache,
            selector: ScheduleSelector::default(),
            transformer: LayoutTransformer::default(),
            engine: tokio::sync::Mutex::new(engine),
            clock,
            assets: None,
            callbacks: RwLock::new(Vec::new()),
            layouts,
            current: RwLock::new(None),
            prewarmed: Mutex::new(None),
            config,
            cancellation_token,
            task: Mutex::new(None),
        }
    }

    pub fn with_evaluator(mut self, evaluator: RecurrenceEvaluator) -> Self {
        self.selector = ScheduleSelector::new(evaluator);
        self
    }

    pub fn with_transformer(mut self, transformer: LayoutTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_asset_cache(mut self, assets: Arc<dyn AssetCache>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// The layout on screen, if any.
    pub fn current_layout(&self) -> Option<Arc<ActiveLayout>> {
        self.current.read().clone()
    }

    /// Register a callback invoked once per layout change.
    pub fn on_layout_change<F>(&self, callback: F)
    where
        F: Fn(Arc<ActiveLayout>) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    pub fn subscribe_layouts(&self) -> broadcast::Receiver<Arc<ActiveLayout>> {
        self.layouts.subscribe()
    }

    /// Start the evaluation loop. The first pass runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("scheduler already started");
            return;
        }

        let scheduler = Arc::clone(self);
        let cancel = self.cancellation_token.clone();
        let mut events = self.cache.subscribe();

        info!(
            interval_secs = self.config.evaluation_interval.as_secs(),
            "starting schedule evaluation"
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.evaluation_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events_open = true;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv(), if events_open => match event {
                        Ok(event) if event.changes_configuration() => {
                            debug!(event = %event.description(), "configuration changed, evaluating");
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "configuration events lagged, evaluating");
                        }
                        Err(RecvError::Closed) => {
                            events_open = false;
                            continue;
                        }
                    },
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = scheduler.evaluate_now() => {
                        debug!(?outcome, "evaluation pass finished");
                    }
                }
            }

            debug!("schedule evaluation stopped");
        }));
    }

    /// Stop the evaluation loop and tear down playback.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        self.engine.lock().await.teardown().await;
        *self.current.write() = None;
        info!("scheduler stopped");
    }

    /// Run one evaluation pass now.
    ///
    /// Returns [`EvaluationOutcome::Busy`] without doing anything when a pass
    /// is already running.
    pub async fn evaluate_now(&self) -> EvaluationOutcome {
        let Some(_pass) = self.selector.begin_pass() else {
            debug!("evaluation pass already running");
            return EvaluationOutcome::Busy;
        };

        let Some(configuration) = self.cache.current() else {
            debug!("no configuration yet");
            return EvaluationOutcome::NoConfiguration;
        };
        self.prewarm(&configuration);

        let now = self.clock.now();
        let layout = match self.selector.select_unguarded(&configuration, now) {
            Selection::Active(matched) => {
                debug!(
                    schedule_id = %matched.schedule.id,
                    fired_at = %matched.fired_at,
                    "active schedule selected"
                );
                self.transformer.to_layout(matched.schedule)
            }
            Selection::NoneActive | Selection::Busy => {
                debug!(at = %now, "no active schedule");
                return EvaluationOutcome::NoActiveSchedule;
            }
        };

        if self.current.read().as_deref() == Some(&layout) {
            return EvaluationOutcome::Unchanged {
                schedule_id: layout.schedule_id,
            };
        }

        let layout = Arc::new(layout);
        if let Err(e) = self.engine.lock().await.apply_layout(layout.clone()).await {
            warn!(
                schedule_id = %layout.schedule_id,
                error = %e,
                "failed to apply layout"
            );
            *self.current.write() = None;
            return EvaluationOutcome::Failed(e.to_string());
        }

        info!(
            schedule_id = %layout.schedule_id,
            layout_id = %layout.layout_id,
            name = %layout.name,
            "layout changed"
        );
        *self.current.write() = Some(layout.clone());
        self.notify(&layout);

        EvaluationOutcome::Changed {
            schedule_id: layout.schedule_id.clone(),
            layout_id: layout.layout_id.clone(),
        }
    }

    fn notify(&self, layout: &Arc<ActiveLayout>) {
        let callbacks: Vec<LayoutCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            callback(layout.clone());
        }
        // No receivers is fine.
        let _ = self.layouts.send(layout.clone());
    }

    /// Hand the asset URLs of a configuration to the asset cache, once per
    /// configuration fingerprint.
    fn prewarm(&self, configuration: &Configuration) {
        let Some(assets) = &self.assets else {
            return;
        };
        let fingerprint = self.cache.fingerprint();
        {
            let mut prewarmed = self.prewarmed.lock();
            if fingerprint.is_some() && *prewarmed == fingerprint {
                return;
            }
            *prewarmed = fingerprint;
        }

        let urls = collect_asset_urls(configuration);
        if urls.is_empty() {
            return;
        }
        debug!(count = urls.len(), "prewarming assets");
        let assets = assets.clone();
        tokio::spawn(async move { assets.prewarm(urls).await });
    }

    pub async fn pause_all(&self) {
        self.engine.lock().await.pause_all().await;
    }

    pub async fn resume_all(&self) {
        self.engine.lock().await.resume_all().await;
    }

    pub async fn manual_trigger(&self, region_id: &str) -> Option<PlayOutcome> {
        self.engine.lock().await.manual_trigger(region_id).await
    }

    pub async fn playback_status(&self) -> Vec<PlaylistStatus> {
        self.engine.lock().await.status().await
    }
}

impl Drop for SignageScheduler {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
