//! Time-boxed still content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use media_types::MediaKind;
use tracing::{debug, warn};

use super::{
    CompletionKind, MediaError, MediaUnit, PlayOutcome, PlayheadToken, UnitContext, UnitCore,
    UnitSignal, UnitState,
};
use crate::domain::PlaylistItem;
use crate::scheduler::DEFAULT_IMAGE_DURATION;

/// Shows an image for a fixed duration.
///
/// The duration timer starts when the unit enters `Playing`. A failed load
/// confirmation does not block: the unit is still `Ready` and the timer
/// moves the playlist on.
pub struct ImageUnit {
    core: UnitCore,
}

impl ImageUnit {
    pub fn new(id: u64, item: PlaylistItem, ctx: UnitContext) -> Self {
        Self {
            core: UnitCore::new(id, item, ctx),
        }
    }

    fn duration(&self) -> std::time::Duration {
        self.core
            .item
            .duration
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_IMAGE_DURATION)
    }
}

#[async_trait]
impl MediaUnit for ImageUnit {
    fn id(&self) -> u64 {
        self.core.id
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
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

        // Bounded by the display time: an image that never confirms is
        // treated like one that failed to confirm.
        let confirmation = tokio::time::timeout(
            self.duration(),
            self.core.ctx.presenter.await_loaded(element),
        )
        .await;

        match confirmation {
            Ok(Ok(())) => debug!(unit = self.core.id, "image loaded"),
            Ok(Err(e)) => warn!(
                unit = self.core.id,
                url = %self.core.item.source_url,
                error = %e,
                "image load confirmation failed, the duration timer will advance"
            ),
            Err(_) => warn!(
                unit = self.core.id,
                url = %self.core.item.source_url,
                "image load confirmation timed out, the duration timer will advance"
            ),
        }

        self.core.transition(UnitState::Ready)
    }

    async fn play(&mut self) -> Result<PlayOutcome, MediaError> {
        self.core.mark_playing()?;

        if let Some(element) = self.core.element
            && let Err(e) = self.core.ctx.presenter.play(element, true).await
        {
            warn!(unit = self.core.id, error = %e, "presenter could not show image");
        }

        self.core.arm_timer(self.duration());
        Ok(PlayOutcome::Started)
    }

    fn accept_signal(&mut self, signal: &UnitSignal) -> Option<CompletionKind> {
        self.core.accept_signal(signal)
    }

    async fn pause(&mut self) {
        if self.core.state.is_playing() {
            self.core.pause_timer();
        }
    }

    async fn resume(&mut self) {
        if self.core.state.is_playing() {
            self.core.resume_timer();
        }
    }

    async fn fast_loop_restart(&mut self) -> bool {
        if !matches!(self.core.state, UnitState::Playing | UnitState::Completed) {
            return false;
        }

        self.core.next_cycle();
        if let Err(e) = self.core.mark_playing() {
            warn!(unit = self.core.id, error = %e, "image cannot restart in place");
            return false;
        }
        self.core.arm_timer(self.duration());
        true
    }

    async fn stop(&mut self) {
        self.core.stop().await;
    }

    async fn destroy(&mut self) {
        self.core.release().await;
    }
}
