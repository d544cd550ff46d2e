//! Self-timed content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use media_types::MediaKind;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    CompletionKind, MediaError, MediaUnit, PlayOutcome, PlayheadToken, UnitContext, UnitCore,
    UnitSignal, UnitState,
};
use crate::domain::PlaylistItem;
use crate::playback::presenter::{ElementId, PresentError};

/// Upper bound on waiting for a video to become playable.
pub const VIDEO_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Plays a video until its natural end, or for a forced duration.
///
/// When autoplay is refused the unit retries once muted. If that is refused
/// too it stays `Ready`, shows a manual trigger and never completes on its
/// own.
pub struct VideoUnit {
    core: UnitCore,
    /// Muted after a refused unmuted attempt.
    muted: bool,
    awaiting_trigger: bool,
}

impl VideoUnit {
    pub fn new(id: u64, item: PlaylistItem, ctx: UnitContext) -> Self {
        let muted = item.muted;
        Self {
            core: UnitCore::new(id, item, ctx),
            muted,
            awaiting_trigger: false,
        }
    }

    pub fn is_awaiting_trigger(&self) -> bool {
        self.awaiting_trigger
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn element(&self) -> Result<ElementId, MediaError> {
        self.core
            .element
            .ok_or_else(|| MediaError::State("video has no mounted element".to_string()))
    }

    /// Enter `Playing` and arm the completion source.
    fn started(&mut self) -> Result<PlayOutcome, MediaError> {
        self.awaiting_trigger = false;
        self.core.mark_playing()?;
        match self.core.item.forced_duration() {
            Some(duration) => self.core.arm_timer(duration),
            None => self.core.watch_end(),
        }
        Ok(PlayOutcome::Started)
    }
}

#[async_trait]
impl MediaUnit for VideoUnit {
    fn id(&self) -> u64 {
        self.core.id
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn item(&self) -> &PlaylistItem {
        &self.core.item
    }

    fn state(&self) -> UnitState {
        self.core.state
    }

    fn token(&self) -> PlayheadToken {
        self.core.token()
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.core.started_at
    }

    fn validate(&mut self) -> Result<(), MediaError> {
        self.core.validate_item()
    }

    async fn load(&mut self) -> Result<(), MediaError> {
        let element = self.core.mount().await?;

        let loaded = tokio::time::timeout(
            VIDEO_LOAD_TIMEOUT,
            self.core.ctx.presenter.await_loaded(element),
        )
        .await
        .unwrap_or_else(|_| {
            Err(PresentError::LoadFailed {
                url: self.core.item.source_url.clone(),
                reason: "timed out".to_string(),
            })
        });

        if let Err(e) = loaded {
            self.core.transition(UnitState::Invalid)?;
            return Err(e.into());
        }

        debug!(unit = self.core.id, "video loaded");
        self.core.transition(UnitState::Ready)
    }

    async fn play(&mut self) -> Result<PlayOutcome, MediaError> {
        let element = self.element()?;
        let presenter = self.core.ctx.presenter.clone();

        match presenter.play(element, self.muted).await {
            Ok(()) => return self.started(),
            Err(PresentError::AutoplayRejected) => {}
            Err(e) => return Err(e.into()),
        }

        warn!(unit = self.core.id, "autoplay rejected, retrying muted");
        self.muted = true;
        match presenter.play(element, true).await {
            Ok(()) => return self.started(),
            Err(PresentError::AutoplayRejected) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            unit = self.core.id,
            url = %self.core.item.source_url,
            "autoplay refused, waiting for manual trigger"
        );
        self.awaiting_trigger = true;
        presenter.show_manual_trigger(element).await;
        Ok(PlayOutcome::AwaitingTrigger)
    }

    fn accept_signal(&mut self, signal: &UnitSignal) -> Option<CompletionKind> {
        self.core.accept_signal(signal)
    }

    async fn pause(&mut self) {
        if !self.core.state.is_playing() {
            return;
        }
        self.core.pause_timer();
        if let Some(element) = self.core.element {
            self.core.ctx.presenter.pause(element).await;
        }
    }

    async fn resume(&mut self) {
        if !self.core.state.is_playing() {
            return;
        }
        if let Some(element) = self.core.element {
            self.core.ctx.presenter.resume(element).await;
        }
        self.core.resume_timer();
    }

    async fn manual_trigger(&mut self) -> Result<PlayOutcome, MediaError> {
        if !self.awaiting_trigger {
            return Ok(if self.core.state.is_playing() {
                PlayOutcome::Started
            } else {
                PlayOutcome::AwaitingTrigger
            });
        }

        let element = self.element()?;
        match self.core.ctx.presenter.play(element, self.core.item.muted).await {
            Ok(()) => {
                info!(unit = self.core.id, "manual trigger started playback");
                self.muted = self.core.item.muted;
                self.started()
            }
            Err(e) => {
                warn!(unit = self.core.id, error = %e, "manual trigger failed");
                Err(e.into())
            }
        }
    }

    async fn fast_loop_restart(&mut self) -> bool {
        if !matches!(self.core.state, UnitState::Playing | UnitState::Completed) {
            return false;
        }
        let Ok(element) = self.element() else {
            return false;
        };

        self.core.next_cycle();
        let presenter = self.core.ctx.presenter.clone();

        if let Err(e) = presenter.rewind(element).await {
            debug!(unit = self.core.id, error = %e, "rewind failed");
            return false;
        }
        if let Err(e) = presenter.play(element, self.muted).await {
            debug!(unit = self.core.id, error = %e, "replay failed");
            return false;
        }

        match self.started() {
            Ok(_) => true,
            Err(e) => {
                warn!(unit = self.core.id, error = %e, "video cannot restart in place");
                false
            }
        }
    }

    async fn stop(&mut self) {
        self.awaiting_trigger = false;
        self.core.stop().await;
    }

    async fn destroy(&mut self) {
        self.core.release().await;
    }
}
