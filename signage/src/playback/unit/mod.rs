//! Media units: the lifecycle of one playlist item.
//!
//! A unit is owned by its playlist. Completion is reported through the
//! playlist's signal channel, tagged with a [`PlayheadToken`] so signals
//! from a unit that no longer owns the playhead can be dropped.

mod image;
mod video;

pub use image::ImageUnit;
pub use video::VideoUnit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use media_types::MediaKind;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::presenter::{ElementId, PresentError, Presenter};
use crate::Error;
use crate::clock::Clock;
use crate::domain::PlaylistItem;

/// Lifecycle state of a media unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Idle,
    Validating,
    /// Terminal: the item cannot be shown.
    Invalid,
    /// Loaded, not yet playing.
    Ready,
    Playing,
    Completed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Validating => "VALIDATING",
            Self::Invalid => "INVALID",
            Self::Ready => "READY",
            Self::Playing => "PLAYING",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Completed)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: UnitState) -> bool {
        use UnitState::*;

        match (self, target) {
            (from, to) if from == &to => true,
            (Idle, Validating) => true,
            (Validating, Invalid | Ready) => true,
            (Ready, Playing | Invalid) => true,
            (Playing, Completed) => true,
            // Fast loop restart replays a completed unit in place.
            (Completed, Playing) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: UnitState) -> Result<UnitState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self.as_str(), target.as_str()))
        }
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies which unit, and which play cycle of it, owns the playhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayheadToken {
    pub unit: u64,
    pub cycle: u32,
}

/// How a unit finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionKind {
    DurationElapsed,
    NaturalEnd,
    /// Playback failed after it started.
    Failed(String),
}

/// Completion signal sent by a unit to its playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSignal {
    pub token: PlayheadToken,
    pub kind: CompletionKind,
}

/// Everything a unit needs from its playlist.
#[derive(Clone)]
pub struct UnitContext {
    pub region_id: String,
    pub presenter: Arc<dyn Presenter>,
    pub signals: mpsc::UnboundedSender<UnitSignal>,
    pub clock: Arc<dyn Clock>,
}

/// Errors from a unit's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("invalid media item: {0}")]
    Invalid(String),

    #[error("media is outside its validity window")]
    OutsideValidity,

    #[error(transparent)]
    Present(#[from] PresentError),

    #[error("{0}")]
    State(String),
}

impl From<Error> for MediaError {
    fn from(err: Error) -> Self {
        Self::State(err.to_string())
    }
}

/// Result of asking a unit to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// Autoplay was refused; the unit waits for a manual trigger.
    AwaitingTrigger,
}

#[async_trait]
pub trait MediaUnit: Send {
    fn id(&self) -> u64;

    fn kind(&self) -> MediaKind;

    fn item(&self) -> &PlaylistItem;

    fn state(&self) -> UnitState;

    fn token(&self) -> PlayheadToken;

    /// When the current cycle entered `Playing`.
    fn started_at(&self) -> Option<DateTime<Utc>>;

    /// `Idle -> Validating`, or `-> Invalid` when the item cannot be shown now.
    fn validate(&mut self) -> Result<(), MediaError>;

    /// Mount the element and wait for it to load. `Validating -> Ready`.
    async fn load(&mut self) -> Result<(), MediaError>;

    /// `Ready -> Playing`, unless autoplay is refused.
    async fn play(&mut self) -> Result<PlayOutcome, MediaError>;

    /// Consume a completion signal. Returns `None` for stale signals.
    fn accept_signal(&mut self, signal: &UnitSignal) -> Option<CompletionKind>;

    async fn pause(&mut self);

    async fn resume(&mut self);

    /// Start playback after autoplay was refused.
    async fn manual_trigger(&mut self) -> Result<PlayOutcome, MediaError> {
        Ok(if self.state().is_playing() {
            PlayOutcome::Started
        } else {
            PlayOutcome::AwaitingTrigger
        })
    }

    /// Replay in place without recreating the element. Returns `false` when
    /// the unit cannot restart, in which case the caller recreates it.
    async fn fast_loop_restart(&mut self) -> bool;

    /// `Playing -> Completed` without a completion signal.
    async fn stop(&mut self);

    /// Cancel everything and release the element.
    async fn destroy(&mut self);
}

/// A pending completion source: a duration timer or an end-of-media watch.
struct Pending {
    cancel: CancellationToken,
    /// Set for timers, `None` for end-of-media watches.
    deadline: Option<Instant>,
}

/// State shared by every unit variant.
pub(crate) struct UnitCore {
    id: u64,
    item: PlaylistItem,
    ctx: UnitContext,
    state: UnitState,
    cycle: u32,
    element: Option<ElementId>,
    started_at: Option<DateTime<Utc>>,
    pending: Option<Pending>,
    /// Time left on a paused timer.
    paused_remaining: Option<Duration>,
}

impl UnitCore {
    pub(crate) fn new(id: u64, item: PlaylistItem, ctx: UnitContext) -> Self {
        Self {
            id,
            item,
            ctx,
            state: UnitState::Idle,
            cycle: 0,
            element: None,
            started_at: None,
            pending: None,
            paused_remaining: None,
        }
    }

    pub(crate) fn token(&self) -> PlayheadToken {
        PlayheadToken {
            unit: self.id,
            cycle: self.cycle,
        }
    }

    pub(crate) fn transition(&mut self, target: UnitState) -> Result<(), MediaError> {
        self.state = self.state.transition_to(target)?;
        trace!(unit = self.id, state = %self.state, "unit state changed");
        Ok(())
    }

    /// Common checks: required fields and the validity window.
    pub(crate) fn validate_item(&mut self) -> Result<(), MediaError> {
        self.transition(UnitState::Validating)?;

        let problem = if self.item.id.trim().is_empty() {
            Some(MediaError::Invalid("missing id".to_string()))
        } else if self.item.source_url.is_empty() {
            Some(MediaError::Invalid("missing source URL".to_string()))
        } else if !self.item.is_valid_at(self.ctx.clock.now()) {
            Some(MediaError::OutsideValidity)
        } else {
            None
        };

        match problem {
            Some(e) => {
                self.transition(UnitState::Invalid)?;
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Mount the element, marking the unit invalid on failure.
    pub(crate) async fn mount(&mut self) -> Result<ElementId, MediaError> {
        match self.ctx.presenter.mount(&self.ctx.region_id, &self.item).await {
            Ok(element) => {
                self.element = Some(element);
                Ok(element)
            }
            Err(e) => {
                self.transition(UnitState::Invalid)?;
                Err(e.into())
            }
        }
    }

    /// Enter `Playing` for a new cycle.
    pub(crate) fn mark_playing(&mut self) -> Result<(), MediaError> {
        self.transition(UnitState::Playing)?;
        self.started_at = Some(self.ctx.clock.now());
        Ok(())
    }

    /// Start a new cycle: stale signals from the previous one are dropped.
    pub(crate) fn next_cycle(&mut self) {
        self.cancel_pending();
        self.cycle = self.cycle.wrapping_add(1);
    }

    /// Send `DurationElapsed` after `duration`.
    pub(crate) fn arm_timer(&mut self, duration: Duration) {
        self.cancel_pending();
        let cancel = CancellationToken::new();
        let token = self.token();
        let signals = self.ctx.signals.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    let _ = signals.send(UnitSignal {
                        token,
                        kind: CompletionKind::DurationElapsed,
                    });
                }
            }
        });

        self.pending = Some(Pending {
            cancel,
            deadline: Some(Instant::now() + duration),
        });
    }

    /// Send `NaturalEnd` (or `Failed`) when the presenter reports the end.
    pub(crate) fn watch_end(&mut self) {
        self.cancel_pending();
        let Some(element) = self.element else {
            return;
        };

        let cancel = CancellationToken::new();
        let token = self.token();
        let signals = self.ctx.signals.clone();
        let presenter = self.ctx.presenter.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                result = presenter.await_ended(element) => {
                    let kind = match result {
                        Ok(()) => CompletionKind::NaturalEnd,
                        Err(e) => CompletionKind::Failed(e.to_string()),
                    };
                    let _ = signals.send(UnitSignal { token, kind });
                }
            }
        });

        self.pending = Some(Pending {
            cancel,
            deadline: None,
        });
    }

    pub(crate) fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.paused_remaining = None;
    }

    /// Freeze a running timer. End-of-media watches keep running; the
    /// presenter holds the media instead.
    pub(crate) fn pause_timer(&mut self) {
        if let Some(Pending {
            deadline: Some(deadline),
            ..
        }) = &self.pending
        {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.cancel_pending();
            self.paused_remaining = Some(remaining);
        }
    }

    pub(crate) fn resume_timer(&mut self) {
        if let Some(remaining) = self.paused_remaining.take() {
            self.arm_timer(remaining);
        }
    }

    /// Consume a signal if it belongs to the current cycle.
    pub(crate) fn accept_signal(&mut self, signal: &UnitSignal) -> Option<CompletionKind> {
        if signal.token != self.token() || self.state != UnitState::Playing {
            trace!(unit = self.id, ?signal, "dropping stale signal");
            return None;
        }
        self.pending = None;
        self.state = UnitState::Completed;
        Some(signal.kind.clone())
    }

    pub(crate) async fn stop(&mut self) {
        self.cancel_pending();
        if self.state == UnitState::Playing {
            self.state = UnitState::Completed;
            if let Some(element) = self.element {
                self.ctx.presenter.pause(element).await;
            }
        }
    }

    pub(crate) async fn release(&mut self) {
        self.cancel_pending();
        if let Some(element) = self.element.take() {
            self.ctx.presenter.release(element).await;
        }
    }
}

impl Drop for UnitCore {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
