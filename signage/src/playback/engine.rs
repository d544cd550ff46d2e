//! Playback engine: one playlist actor per region of the active layout.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::factory::MediaUnitFactory;
use super::playlist::{Playlist, PlaylistStatus};
use super::presenter::Presenter;
use super::runner::{PlaylistCommand, PlaylistHandle};
use super::unit::{PlayOutcome, UnitContext};
use crate::Result;
use crate::clock::Clock;
use crate::domain::ActiveLayout;

pub struct PlaybackEngine {
    presenter: Arc<dyn Presenter>,
    factory: Arc<MediaUnitFactory>,
    clock: Arc<dyn Clock>,
    layout: Option<Arc<ActiveLayout>>,
    playlists: Vec<PlaylistHandle>,
    cancellation_token: CancellationToken,
}

impl PlaybackEngine {
    pub fn new(presenter: Arc<dyn Presenter>, clock: Arc<dyn Clock>) -> Self {
        Self::with_cancellation(presenter, clock, CancellationToken::new())
    }

    /// Engine whose playlists are cancelled together with `parent`.
    pub fn with_cancellation(
        presenter: Arc<dyn Presenter>,
        clock: Arc<dyn Clock>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            presenter,
            factory: Arc::new(MediaUnitFactory::new()),
            clock,
            layout: None,
            playlists: Vec::new(),
            cancellation_token: parent,
        }
    }

    pub fn current_layout(&self) -> Option<Arc<ActiveLayout>> {
        self.layout.clone()
    }

    pub fn factory(&self) -> &Arc<MediaUnitFactory> {
        &self.factory
    }

    /// Replace the active layout.
    ///
    /// Every playlist of the old layout is torn down (timers cancelled,
    /// elements released) before the presenter creates the new regions.
    pub async fn apply_layout(&mut self, layout: Arc<ActiveLayout>) -> Result<()> {
        self.teardown().await;

        self.presenter.create_regions(&layout).await?;

        for region in &layout.regions {
            let (signals_tx, signals_rx) = mpsc::unbounded_channel();
            let ctx = UnitContext {
                region_id: region.id.clone(),
                presenter: self.presenter.clone(),
                signals: signals_tx,
                clock: self.clock.clone(),
            };
            let playlist = Playlist::new(region, self.factory.clone(), ctx);
            self.playlists.push(PlaylistHandle::spawn(
                playlist,
                signals_rx,
                self.cancellation_token.child_token(),
            ));
        }

        info!(
            schedule_id = %layout.schedule_id,
            layout_id = %layout.layout_id,
            regions = layout.regions.len(),
            items = layout.item_count(),
            "layout applied"
        );
        self.layout = Some(layout);
        Ok(())
    }

    /// Stop every playlist and clear the presentation.
    pub async fn teardown(&mut self) {
        let handles = std::mem::take(&mut self.playlists);
        if !handles.is_empty() {
            debug!(playlists = handles.len(), "tearing down playlists");
            join_all(handles.into_iter().map(PlaylistHandle::shutdown)).await;
        }
        if self.layout.take().is_some() {
            self.presenter.clear().await;
        }
    }

    pub async fn pause_all(&self) {
        self.broadcast(|| PlaylistCommand::Pause).await;
    }

    pub async fn resume_all(&self) {
        self.broadcast(|| PlaylistCommand::Resume).await;
    }

    async fn broadcast(&self, command: impl Fn() -> PlaylistCommand) {
        for handle in &self.playlists {
            if let Err(e) = handle.send(command()).await {
                warn!(region_id = %handle.region_id(), error = %e, "playlist command not delivered");
            }
        }
    }

    /// Forward a manual trigger to the playlist of `region_id`.
    pub async fn manual_trigger(&self, region_id: &str) -> Option<PlayOutcome> {
        let handle = self.playlists.iter().find(|h| h.region_id() == region_id)?;
        handle.manual_trigger().await
    }

    /// Status of every running playlist, in region order.
    pub async fn status(&self) -> Vec<PlaylistStatus> {
        join_all(self.playlists.iter().map(PlaylistHandle::status))
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
