//! The presentation layer seam.
//!
//! The core never draws anything. It asks a [`Presenter`] to create region
//! containers and to mount, play and release visual elements.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use media_types::MediaKind;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{ActiveLayout, PlaylistItem};

/// Handle of a mounted visual element.
pub type ElementId = u64;

/// Errors reported by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresentError {
    #[error("failed to load {url}: {reason}")]
    LoadFailed { url: String, reason: String },

    #[error("autoplay rejected")]
    AutoplayRejected,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unknown region '{0}'")]
    MissingRegion(String),

    #[error("unknown element {0}")]
    MissingElement(ElementId),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Presenter: Send + Sync + 'static {
    /// Replace the on-screen container tree with the regions of `layout`.
    async fn create_regions(&self, layout: &ActiveLayout) -> Result<(), PresentError>;

    /// Remove every region and element.
    async fn clear(&self);

    /// Create the visual element for `item` inside `region_id`.
    async fn mount(&self, region_id: &str, item: &PlaylistItem) -> Result<ElementId, PresentError>;

    /// Resolves once the element's content has loaded.
    async fn await_loaded(&self, element: ElementId) -> Result<(), PresentError>;

    /// Start or restart showing the element.
    async fn play(&self, element: ElementId, muted: bool) -> Result<(), PresentError>;

    /// Resolves when self-timed content reaches its natural end.
    async fn await_ended(&self, element: ElementId) -> Result<(), PresentError>;

    async fn pause(&self, element: ElementId);

    async fn resume(&self, element: ElementId);

    /// Seek back to the start.
    async fn rewind(&self, element: ElementId) -> Result<(), PresentError>;

    /// Show an affordance the operator can use to start playback by hand.
    async fn show_manual_trigger(&self, element: ElementId);

    async fn release(&self, element: ElementId);
}

/// Natural length assumed for videos without a duration.
pub const HEADLESS_VIDEO_LENGTH: Duration = Duration::from_secs(30);

struct HeadlessElement {
    region_id: String,
    url: String,
    length: Duration,
    /// Time left until the natural end, as of the last pause or rewind.
    remaining: Duration,
    /// Set while playing.
    resumed_at: Option<Instant>,
    changed: Arc<Notify>,
}

impl HeadlessElement {
    fn deadline(&self) -> Option<Instant> {
        self.resumed_at.map(|at| at + self.remaining)
    }
}

/// A presenter without a screen.
///
/// Logs every call and simulates video end after the item's duration, or
/// [`HEADLESS_VIDEO_LENGTH`] when it has none. Timing follows tokio time.
#[derive(Default)]
pub struct HeadlessPresenter {
    next_id: AtomicU64,
    regions: Mutex<Vec<String>>,
    elements: Mutex<HashMap<ElementId, HeadlessElement>>,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Region ids of the current layout.
    pub fn regions(&self) -> Vec<String> {
        self.regions.lock().clone()
    }

    /// Number of mounted elements.
    pub fn element_count(&self) -> usize {
        self.elements.lock().len()
    }

    /// Source URLs currently mounted in `region_id`.
    pub fn mounted_in(&self, region_id: &str) -> Vec<String> {
        self.elements
            .lock()
            .values()
            .filter(|e| e.region_id == region_id)
            .map(|e| e.url.clone())
            .collect()
    }

    fn with_element<T>(
        &self,
        element: ElementId,
        f: impl FnOnce(&mut HeadlessElement) -> T,
    ) -> Result<T, PresentError> {
        let mut elements = self.elements.lock();
        let el = elements
            .get_mut(&element)
            .ok_or(PresentError::MissingElement(element))?;
        let result = f(el);
        el.changed.notify_waiters();
        Ok(result)
    }
}

#[async_trait]
impl Presenter for HeadlessPresenter {
    async fn create_regions(&self, layout: &ActiveLayout) -> Result<(), PresentError> {
        info!(
            layout_id = %layout.layout_id,
            resolution = %layout.resolution,
            regions = layout.regions.len(),
            "creating regions"
        );
        *self.regions.lock() = layout.regions.iter().map(|r| r.id.clone()).collect();
        Ok(())
    }

    async fn clear(&self) {
        debug!("clearing presentation");
        self.regions.lock().clear();
        for (_, el) in self.elements.lock().drain() {
            el.changed.notify_waiters();
        }
    }

    async fn mount(&self, region_id: &str, item: &PlaylistItem) -> Result<ElementId, PresentError> {
        if !self.regions.lock().iter().any(|r| r == region_id) {
            return Err(PresentError::MissingRegion(region_id.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let length = match item.kind {
            MediaKind::Video => item.duration.unwrap_or(HEADLESS_VIDEO_LENGTH),
            MediaKind::Image => item.duration.unwrap_or_default(),
        };
        info!(
            region_id = %region_id,
            element = id,
            kind = %item.kind,
            url = %item.source_url,
            "mounting element"
        );

        self.elements.lock().insert(
            id,
            HeadlessElement {
                region_id: region_id.to_string(),
                url: item.source_url.clone(),
                length,
                remaining: length,
                resumed_at: None,
                changed: Arc::new(Notify::new()),
            },
        );
        Ok(id)
    }

    async fn await_loaded(&self, element: ElementId) -> Result<(), PresentError> {
        self.with_element(element, |_| ())
    }

    async fn play(&self, element: ElementId, muted: bool) -> Result<(), PresentError> {
        debug!(element, muted, "play");
        self.with_element(element, |el| {
            if el.resumed_at.is_none() {
                el.resumed_at = Some(Instant::now());
            }
        })
    }

    async fn await_ended(&self, element: ElementId) -> Result<(), PresentError> {
        loop {
            let changed = self
                .elements
                .lock()
                .get(&element)
                .map(|el| el.changed.clone())
                .ok_or(PresentError::MissingElement(element))?;

            // Register before reading the deadline so no change is missed.
            let notified = changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = self
                .elements
                .lock()
                .get(&element)
                .ok_or(PresentError::MissingElement(element))?
                .deadline();

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            let still_due = self
                                .elements
                                .lock()
                                .get(&element)
                                .and_then(HeadlessElement::deadline)
                                .is_some_and(|d| d <= Instant::now());
                            if still_due {
                                debug!(element, "element ended");
                                return Ok(());
                            }
                        }
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn pause(&self, element: ElementId) {
        debug!(element, "pause");
        let _ = self.with_element(element, |el| {
            if let Some(at) = el.resumed_at.take() {
                el.remaining = el.remaining.saturating_sub(at.elapsed());
            }
        });
    }

    async fn resume(&self, element: ElementId) {
        debug!(element, "resume");
        let _ = self.with_element(element, |el| {
            if el.resumed_at.is_none() {
                el.resumed_at = Some(Instant::now());
            }
        });
    }

    async fn rewind(&self, element: ElementId) -> Result<(), PresentError> {
        debug!(element, "rewind");
        self.with_element(element, |el| {
            el.remaining = el.length;
            el.resumed_at = None;
        })
    }

    async fn show_manual_trigger(&self, element: ElementId) {
        info!(element, "manual trigger shown");
    }

    async fn release(&self, element: ElementId) {
        debug!(element, "release");
        if let Some(el) = self.elements.lock().remove(&element) {
            el.changed.notify_waiters();
        }
    }
}
