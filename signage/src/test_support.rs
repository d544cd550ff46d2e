//! Builders and scripted collaborators shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use media_types::{MediaKind, Resolution};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, FixedClock};
use crate::config::ConfigurationProvider;
use crate::domain::{
    ActiveLayout, Configuration, MediaDescriptor, PlaylistItem, PositionMode, Rect, Region,
    RegionLayout, Schedule,
};
use crate::playback::{ElementId, PresentError, Presenter, UnitContext, UnitSignal};
use crate::{Error, Result};

/// Wednesday 2026-03-04 10:45:00 UTC.
pub fn ten_forty_five() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 45, 0).unwrap()
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(ten_forty_five()))
}

pub fn image_media(id: &str, url: &str, secs: f64) -> MediaDescriptor {
    MediaDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        media_type: Some("Image".to_string()),
        content_type: None,
        source_url: url.to_string(),
        duration: Some(secs),
        force_duration: false,
        ordinal: None,
        mute: false,
        stretch: false,
        valid_from: None,
        valid_to: None,
    }
}

pub fn region(id: &str, media: Vec<MediaDescriptor>) -> Region {
    Region {
        id: id.to_string(),
        name: id.to_string(),
        position_mode: PositionMode::Percent,
        left: Some(0.0),
        top: Some(0.0),
        width: Some(100.0),
        height: Some(100.0),
        z_index: None,
        loop_enabled: true,
        media,
    }
}

pub fn schedule(id: &str, expression: Option<&str>, regions: Vec<Region>) -> Schedule {
    Schedule {
        id: id.to_string(),
        recurrence_expression: expression.map(str::to_string),
        layout_id: format!("layout-{id}"),
        name: id.to_string(),
        layout_width: None,
        layout_height: None,
        regions,
    }
}

pub fn configuration(id: &str, schedules: Vec<Schedule>) -> Configuration {
    Configuration {
        configuration_id: id.to_string(),
        published_at: None,
        schedules,
    }
}

/// One hourly schedule with a single image region.
pub fn sample_configuration() -> Configuration {
    configuration(
        "lobby",
        vec![schedule(
            "hourly",
            Some("0 0 * * * *"),
            vec![region(
                "main",
                vec![image_media("logo", "https://cdn.example.com/logo.png", 10.0)],
            )],
        )],
    )
}

pub fn playlist_item(id: &str, kind: MediaKind) -> PlaylistItem {
    let (extension, duration) = match kind {
        MediaKind::Image => ("png", Some(Duration::from_secs(5))),
        MediaKind::Video => ("mp4", None),
    };
    PlaylistItem {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        source_url: format!("https://cdn.example.com/{id}.{extension}"),
        duration,
        force_duration: false,
        ordinal: None,
        muted: false,
        stretch: false,
        valid_from: None,
        valid_to: None,
    }
}

pub fn region_layout(id: &str, playlist: Vec<PlaylistItem>) -> RegionLayout {
    RegionLayout {
        id: id.to_string(),
        name: id.to_string(),
        mode: PositionMode::Percent,
        rect: Rect {
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
        },
        z_index: 0,
        loop_enabled: true,
        playlist,
    }
}

/// Layout with one single-image region per id.
pub fn active_layout(schedule_id: &str, region_ids: &[&str]) -> ActiveLayout {
    ActiveLayout {
        schedule_id: schedule_id.to_string(),
        layout_id: format!("layout-{schedule_id}"),
        name: schedule_id.to_string(),
        resolution: Resolution::FULL_HD,
        regions: region_ids
            .iter()
            .map(|id| {
                region_layout(
                    id,
                    vec![playlist_item(&format!("{id}-image"), MediaKind::Image)],
                )
            })
            .collect(),
    }
}

pub fn layout_with(region_ids: &[&str]) -> ActiveLayout {
    active_layout("test", region_ids)
}

/// Context for units in region "main" with a clock fixed at
/// [`ten_forty_five`].
pub fn unit_context(
    presenter: Arc<ScriptedPresenter>,
) -> (UnitContext, mpsc::UnboundedReceiver<UnitSignal>) {
    let (signals, rx) = mpsc::unbounded_channel();
    (
        UnitContext {
            region_id: "main".to_string(),
            presenter,
            signals,
            clock: fixed_clock(),
        },
        rx,
    )
}

/// Provider that answers from a queue; the last answer repeats.
#[derive(Default)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<std::result::Result<Configuration, String>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(self, configuration: Configuration) -> Self {
        self.answers.lock().push_back(Ok(configuration));
        self
    }

    pub fn push_err(self, reason: &str) -> Self {
        self.answers.lock().push_back(Err(reason.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationProvider for ScriptedProvider {
    async fn fetch(&self) -> Result<Configuration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = {
            let mut answers = self.answers.lock();
            if answers.len() > 1 {
                answers.pop_front()
            } else {
                answers.front().cloned()
            }
        };
        match answer {
            Some(Ok(configuration)) => Ok(configuration),
            Some(Err(reason)) => Err(Error::Other(reason)),
            None => Err(Error::Other("no scripted answer".to_string())),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// How a [`ScriptedPresenter`] treats video play requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoplayPolicy {
    Always,
    MutedOnly,
    Never,
}

struct ScriptedElement {
    url: String,
    kind: MediaKind,
    released: CancellationToken,
}

/// Presenter with injectable failures and a call record.
pub struct ScriptedPresenter {
    next_id: AtomicU64,
    elements: Mutex<HashMap<ElementId, ScriptedElement>>,
    autoplay: Mutex<AutoplayPolicy>,
    video_lengths: Mutex<HashMap<String, Duration>>,
    failing_mounts: Mutex<HashSet<String>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_rewind: Mutex<bool>,
    failing_regions: Mutex<bool>,
    play_attempts: Mutex<Vec<bool>>,
    manual_triggers: AtomicUsize,
    rewinds: AtomicUsize,
    mounts: AtomicUsize,
    clears: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            elements: Mutex::new(HashMap::new()),
            autoplay: Mutex::new(AutoplayPolicy::Always),
            video_lengths: Mutex::new(HashMap::new()),
            failing_mounts: Mutex::new(HashSet::new()),
            failing_loads: Mutex::new(HashSet::new()),
            failing_rewind: Mutex::new(false),
            failing_regions: Mutex::new(false),
            play_attempts: Mutex::new(Vec::new()),
            manual_triggers: AtomicUsize::new(0),
            rewinds: AtomicUsize::new(0),
            mounts: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_mount(&self, url: &str) {
        self.failing_mounts.lock().insert(url.to_string());
    }

    pub fn fail_load(&self, url: &str) {
        self.failing_loads.lock().insert(url.to_string());
    }

    pub fn fail_rewind(&self, fail: bool) {
        *self.failing_rewind.lock() = fail;
    }

    pub fn fail_create_regions(&self, fail: bool) {
        *self.failing_regions.lock() = fail;
    }

    pub fn set_autoplay(&self, policy: AutoplayPolicy) {
        *self.autoplay.lock() = policy;
    }

    pub fn set_video_length(&self, url: &str, length: Duration) {
        self.video_lengths.lock().insert(url.to_string(), length);
    }

    /// `muted` flag of every play request for a video element.
    pub fn play_attempts(&self) -> Vec<bool> {
        self.play_attempts.lock().clone()
    }

    pub fn manual_triggers_shown(&self) -> usize {
        self.manual_triggers.load(Ordering::SeqCst)
    }

    pub fn rewinds(&self) -> usize {
        self.rewinds.load(Ordering::SeqCst)
    }

    pub fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn live_elements(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn element<T>(
        &self,
        element: ElementId,
        f: impl FnOnce(&ScriptedElement) -> T,
    ) -> std::result::Result<T, PresentError> {
        self.elements
            .lock()
            .get(&element)
            .map(f)
            .ok_or(PresentError::MissingElement(element))
    }
}

#[async_trait]
impl Presenter for ScriptedPresenter {
    async fn create_regions(&self, layout: &ActiveLayout) -> std::result::Result<(), PresentError> {
        self.record(format!("create_regions:{}", layout.layout_id));
        if *self.failing_regions.lock() {
            return Err(PresentError::Other("region creation failed".to_string()));
        }
        Ok(())
    }

    async fn clear(&self) {
        self.record("clear".to_string());
        self.clears.fetch_add(1, Ordering::SeqCst);
        for (_, el) in self.elements.lock().drain() {
            el.released.cancel();
        }
    }

    async fn mount(
        &self,
        region_id: &str,
        item: &PlaylistItem,
    ) -> std::result::Result<ElementId, PresentError> {
        self.record(format!("mount:{region_id}:{}", item.id));
        self.mounts.fetch_add(1, Ordering::SeqCst);
        if self.failing_mounts.lock().contains(&item.source_url) {
            return Err(PresentError::LoadFailed {
                url: item.source_url.clone(),
                reason: "scripted mount failure".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.elements.lock().insert(
            id,
            ScriptedElement {
                url: item.source_url.clone(),
                kind: item.kind,
                released: CancellationToken::new(),
            },
        );
        Ok(id)
    }

    async fn await_loaded(&self, element: ElementId) -> std::result::Result<(), PresentError> {
        let url = self.element(element, |el| el.url.clone())?;
        if self.failing_loads.lock().contains(&url) {
            return Err(PresentError::LoadFailed {
                url,
                reason: "scripted load failure".to_string(),
            });
        }
        Ok(())
    }

    async fn play(&self, element: ElementId, muted: bool) -> std::result::Result<(), PresentError> {
        let kind = self.element(element, |el| el.kind)?;
        if kind == MediaKind::Image {
            return Ok(());
        }
        self.play_attempts.lock().push(muted);
        match (*self.autoplay.lock(), muted) {
            (AutoplayPolicy::Always, _) | (AutoplayPolicy::MutedOnly, true) => Ok(()),
            _ => Err(PresentError::AutoplayRejected),
        }
    }

    async fn await_ended(&self, element: ElementId) -> std::result::Result<(), PresentError> {
        let (url, released) = self.element(element, |el| (el.url.clone(), el.released.clone()))?;
        let length = self
            .video_lengths
            .lock()
            .get(&url)
            .copied()
            .unwrap_or(Duration::from_secs(30));
        tokio::select! {
            _ = released.cancelled() => Err(PresentError::MissingElement(element)),
            _ = tokio::time::sleep(length) => Ok(()),
        }
    }

    async fn pause(&self, element: ElementId) {
        self.record(format!("pause:{element}"));
    }

    async fn resume(&self, element: ElementId) {
        self.record(format!("resume:{element}"));
    }

    async fn rewind(&self, element: ElementId) -> std::result::Result<(), PresentError> {
        self.element(element, |_| ())?;
        if *self.failing_rewind.lock() {
            return Err(PresentError::Other("scripted rewind failure".to_string()));
        }
        self.rewinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn show_manual_trigger(&self, _element: ElementId) {
        self.manual_triggers.fetch_add(1, Ordering::SeqCst);
    }

    async fn release(&self, element: ElementId) {
        self.record(format!("release:{element}"));
        if let Some(el) = self.elements.lock().remove(&element) {
            el.released.cancel();
        }
    }
}
