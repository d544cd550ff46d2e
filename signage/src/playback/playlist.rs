//! Per-region sequential playback.
//!
//! A playlist plays its items one at a time, advancing when the current
//! unit signals completion. At the end it wraps (loop enabled) or stops.
//! A single looping item is restarted in place instead of being recreated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::factory::MediaUnitFactory;
use super::unit::{CompletionKind, MediaError, MediaUnit, PlayOutcome, UnitContext, UnitSignal, UnitState};
use crate::Error;
use crate::domain::{PlaylistItem, RegionLayout};

/// Playback state of a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaylistState {
    Stopped,
    Loading,
    Playing,
    Paused,
}

impl PlaylistState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Loading => "LOADING",
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
        }
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: PlaylistState) -> bool {
        use PlaylistState::*;

        match (self, target) {
            (from, to) if from == &to => true,
            (Stopped, Loading) => true,
            (Loading, Playing | Stopped) => true,
            (Playing, Loading | Paused | Stopped) => true,
            (Paused, Playing | Stopped) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: PlaylistState) -> Result<PlaylistState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self.as_str(), target.as_str()))
        }
    }
}

impl std::fmt::Display for PlaylistState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a playlist is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    NotStarted,
    /// Stopped on request.
    Explicit,
    /// The region has no items.
    Empty,
    /// Reached the last item with loop disabled.
    Ended,
    /// Restarting from the first item failed too.
    Halted,
    /// A full pass found no playable item.
    Exhausted,
}

/// Point-in-time view of a playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistStatus {
    pub region_id: String,
    pub state: PlaylistState,
    /// Set while stopped.
    pub stop_reason: Option<StopReason>,
    pub index: usize,
    pub item_id: Option<String>,
    pub unit_state: Option<UnitState>,
    /// When the current item last entered `Playing`.
    pub started_at: Option<DateTime<Utc>>,
    pub loop_count: u64,
    pub fast_restarts: u64,
    pub units_created: u64,
}

pub struct Playlist {
    region_id: String,
    items: Vec<PlaylistItem>,
    loop_enabled: bool,
    factory: Arc<MediaUnitFactory>,
    ctx: UnitContext,
    state: PlaylistState,
    stop_reason: StopReason,
    index: usize,
    current: Option<Box<dyn MediaUnit>>,
    /// Index being loaded; advancing to it again is a no-op.
    loading_index: Option<usize>,
    /// Completion that arrived while paused.
    deferred: Option<UnitSignal>,
    loop_count: u64,
    fast_restarts: u64,
    units_created: u64,
}

impl Playlist {
    pub fn new(region: &RegionLayout, factory: Arc<MediaUnitFactory>, ctx: UnitContext) -> Self {
        Self {
            region_id: region.id.clone(),
            items: region.playlist.clone(),
            loop_enabled: region.loop_enabled,
            factory,
            ctx,
            state: PlaylistState::Stopped,
            stop_reason: StopReason::NotStarted,
            index: 0,
            current: None,
            loading_index: None,
            deferred: None,
            loop_count: 0,
            fast_restarts: 0,
            units_created: 0,
        }
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    pub fn state(&self) -> PlaylistState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        (self.state == PlaylistState::Stopped).then_some(self.stop_reason)
    }

    pub fn status(&self) -> PlaylistStatus {
        PlaylistStatus {
            region_id: self.region_id.clone(),
            state: self.state,
            stop_reason: self.stop_reason(),
            index: self.index,
            item_id: self.current.as_ref().map(|u| u.item().id.clone()),
            unit_state: self.current.as_ref().map(|u| u.state()),
            started_at: self.current.as_ref().and_then(|u| u.started_at()),
            loop_count: self.loop_count,
            fast_restarts: self.fast_restarts,
            units_created: self.units_created,
        }
    }

    fn enter(&mut self, target: PlaylistState) {
        match self.state.transition_to(target) {
            Ok(state) => {
                trace!(region_id = %self.region_id, from = %self.state, to = %state, "playlist state");
                self.state = state;
            }
            Err(e) => warn!(region_id = %self.region_id, error = %e, "playlist transition rejected"),
        }
    }

    /// Start from the first item.
    pub async fn start(&mut self) {
        if self.state != PlaylistState::Stopped {
            return;
        }
        if self.items.is_empty() {
            info!(region_id = %self.region_id, "playlist is empty");
            self.stop_reason = StopReason::Empty;
            return;
        }
        self.play_from(0).await;
    }

    /// Handle a completion signal from a unit.
    pub async fn handle_signal(&mut self, signal: UnitSignal) {
        match self.state {
            PlaylistState::Playing => {}
            PlaylistState::Paused => {
                if self.current.as_ref().is_some_and(|u| u.token() == signal.token) {
                    self.deferred = Some(signal);
                }
                return;
            }
            _ => {
                trace!(region_id = %self.region_id, ?signal, "ignoring signal while not playing");
                return;
            }
        }

        let Some(unit) = self.current.as_mut() else {
            return;
        };
        let Some(kind) = unit.accept_signal(&signal) else {
            return;
        };

        match &kind {
            CompletionKind::Failed(reason) => warn!(
                region_id = %self.region_id,
                item_id = %unit.item().id,
                reason = %reason,
                "playback failed, advancing"
            ),
            _ => debug!(region_id = %self.region_id, item_id = %unit.item().id, ?kind, "item completed"),
        }

        self.advance().await;
    }

    /// Move to the next item according to the loop policy.
    pub async fn advance(&mut self) {
        let len = self.items.len();
        let next = self.index + 1;

        if next < len {
            self.play_from(next).await;
            return;
        }

        if !self.loop_enabled {
            info!(region_id = %self.region_id, "reached the last item, loop disabled");
            self.finish(StopReason::Ended).await;
            return;
        }

        self.loop_count += 1;
        if len == 1 && self.try_fast_restart().await {
            return;
        }
        self.play_from(0).await;
    }

    async fn try_fast_restart(&mut self) -> bool {
        let now = self.ctx.clock.now();
        let Some(unit) = self.current.as_mut() else {
            return false;
        };
        if !unit.item().is_valid_at(now) {
            return false;
        }

        if unit.fast_loop_restart().await {
            self.fast_restarts += 1;
            trace!(region_id = %self.region_id, restarts = self.fast_restarts, "fast loop restart");
            true
        } else {
            debug!(region_id = %self.region_id, "fast loop restart failed, recreating unit");
            false
        }
    }

    /// Load and play the first playable item at or after `start`.
    ///
    /// Invalid items are skipped. A load or play failure restarts from the
    /// first item once; a second failure halts the region.
    async fn play_from(&mut self, start: usize) {
        if self.loading_index == Some(start) {
            debug!(region_id = %self.region_id, index = start, "index already loading");
            return;
        }

        self.release_current().await;
        self.enter(PlaylistState::Loading);

        let len = self.items.len();
        let mut index = start;
        let mut skipped = 0;
        let mut recovering = false;

        loop {
            if skipped >= len {
                warn!(region_id = %self.region_id, "no playable item in playlist");
                self.finish(StopReason::Exhausted).await;
                return;
            }
            if index >= len {
                if !self.loop_enabled {
                    self.finish(StopReason::Ended).await;
                    return;
                }
                self.loop_count += 1;
                index = 0;
            }

            self.loading_index = Some(index);
            let mut unit = self.factory.create(self.items[index].clone(), self.ctx.clone());
            self.units_created += 1;

            if let Err(e) = unit.validate() {
                debug!(
                    region_id = %self.region_id,
                    item_id = %self.items[index].id,
                    error = %e,
                    "skipping item"
                );
                skipped += 1;
                index += 1;
                continue;
            }

            match Self::load_and_play(unit.as_mut()).await {
                Ok(outcome) => {
                    debug!(
                        region_id = %self.region_id,
                        index,
                        item_id = %self.items[index].id,
                        ?outcome,
                        "item playing"
                    );
                    self.loading_index = None;
                    self.index = index;
                    self.current = Some(unit);
                    self.enter(PlaylistState::Playing);
                    return;
                }
                Err(e) => {
                    unit.destroy().await;
                    if recovering {
                        error!(
                            region_id = %self.region_id,
                            error = %e,
                            "restart from the first item failed, halting region"
                        );
                        self.finish(StopReason::Halted).await;
                        return;
                    }
                    warn!(
                        region_id = %self.region_id,
                        item_id = %self.items[index].id,
                        error = %e,
                        "item failed, restarting from the first item"
                    );
                    recovering = true;
                    index = 0;
                    skipped = 0;
                }
            }
        }
    }

    async fn load_and_play(unit: &mut dyn MediaUnit) -> Result<PlayOutcome, MediaError> {
        unit.load().await?;
        unit.play().await
    }

    pub async fn pause(&mut self) {
        if self.state != PlaylistState::Playing {
            return;
        }
        if let Some(unit) = self.current.as_mut() {
            unit.pause().await;
        }
        self.enter(PlaylistState::Paused);
    }

    pub async fn resume(&mut self) {
        if self.state != PlaylistState::Paused {
            return;
        }
        self.enter(PlaylistState::Playing);
        if let Some(unit) = self.current.as_mut() {
            unit.resume().await;
        }
        if let Some(signal) = self.deferred.take() {
            self.handle_signal(signal).await;
        }
    }

    /// Forward a manual trigger to the current unit.
    pub async fn manual_trigger(&mut self) -> Option<PlayOutcome> {
        if self.state != PlaylistState::Playing {
            return None;
        }
        let unit = self.current.as_mut()?;
        match unit.manual_trigger().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(region_id = %self.region_id, error = %e, "manual trigger failed");
                None
            }
        }
    }

    /// Stop and release everything.
    pub async fn stop(&mut self) {
        if self.state != PlaylistState::Stopped {
            self.finish(StopReason::Explicit).await;
        }
    }

    async fn finish(&mut self, reason: StopReason) {
        self.release_current().await;
        self.loading_index = None;
        self.deferred = None;
        self.enter(PlaylistState::Stopped);
        self.stop_reason = reason;
        debug!(region_id = %self.region_id, ?reason, "playlist stopped");
    }

    async fn release_current(&mut self) {
        if let Some(mut unit) = self.current.take() {
            unit.stop().await;
            unit.destroy().await;
        }
    }
}
