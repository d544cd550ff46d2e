//! Playlist actor: one task per region.
//!
//! The actor owns its [`Playlist`] and reacts to commands from the engine
//! and to completion signals from its media units.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::playlist::{Playlist, PlaylistStatus};
use super::unit::{PlayOutcome, UnitSignal};

/// Mailbox capacity of a playlist actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Timeout for sends to a full mailbox.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Messages accepted by a playlist actor.
#[derive(Debug)]
pub enum PlaylistCommand {
    Pause,
    Resume,
    /// Start a unit that is waiting for a manual trigger.
    ManualTrigger(Option<oneshot::Sender<Option<PlayOutcome>>>),
    /// Request graceful shutdown.
    Stop,
    /// Query current status (response sent via oneshot channel).
    GetStatus(oneshot::Sender<PlaylistStatus>),
}

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("playlist actor has stopped")]
    ActorStopped,
    #[error("send to playlist actor timed out")]
    Timeout,
}

enum Event {
    Command(PlaylistCommand),
    Signal(UnitSignal),
}

struct PlaylistActor {
    playlist: Playlist,
    mailbox: mpsc::Receiver<PlaylistCommand>,
    signals: mpsc::UnboundedReceiver<UnitSignal>,
    cancellation_token: CancellationToken,
}

impl PlaylistActor {
    async fn run(mut self) -> PlaylistStatus {
        let region_id = self.playlist.region_id().to_string();
        debug!(region_id = %region_id, "playlist actor starting");

        let token = self.cancellation_token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = self.playlist.start() => {}
        }

        while !token.is_cancelled() {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                msg = self.mailbox.recv() => match msg {
                    Some(msg) => Event::Command(msg),
                    None => break,
                },
                Some(signal) = self.signals.recv() => Event::Signal(signal),
            };

            let should_stop = tokio::select! {
                biased;
                _ = token.cancelled() => true,
                stop = Self::handle(&mut self.playlist, event) => stop,
            };
            if should_stop {
                break;
            }
        }

        self.playlist.stop().await;
        debug!(region_id = %region_id, "playlist actor stopped");
        self.playlist.status()
    }

    /// Returns `true` when the actor should stop.
    async fn handle(playlist: &mut Playlist, event: Event) -> bool {
        match event {
            Event::Signal(signal) => playlist.handle_signal(signal).await,
            Event::Command(PlaylistCommand::Pause) => playlist.pause().await,
            Event::Command(PlaylistCommand::Resume) => playlist.resume().await,
            Event::Command(PlaylistCommand::ManualTrigger(reply)) => {
                let outcome = playlist.manual_trigger().await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Event::Command(PlaylistCommand::GetStatus(reply)) => {
                let _ = reply.send(playlist.status());
            }
            Event::Command(PlaylistCommand::Stop) => return true,
        }
        false
    }
}

/// Handle to a running playlist actor.
pub struct PlaylistHandle {
    region_id: String,
    sender: mpsc::Sender<PlaylistCommand>,
    cancellation_token: CancellationToken,
    task: JoinHandle<PlaylistStatus>,
}

impl PlaylistHandle {
    /// Spawn an actor for `playlist`. Completion signals of its units must
    /// arrive on `signals`.
    pub fn spawn(
        playlist: Playlist,
        signals: mpsc::UnboundedReceiver<UnitSignal>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let (sender, mailbox) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let region_id = playlist.region_id().to_string();
        let actor = PlaylistActor {
            playlist,
            mailbox,
            signals,
            cancellation_token: cancellation_token.clone(),
        };

        Self {
            region_id,
            sender,
            cancellation_token,
            task: tokio::spawn(actor.run()),
        }
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    /// Send a command, waiting briefly if the mailbox is full.
    pub async fn send(&self, msg: PlaylistCommand) -> Result<(), SendError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                match tokio::time::timeout(DEFAULT_SEND_TIMEOUT, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SendError::ActorStopped),
                    Err(_) => Err(SendError::Timeout),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ActorStopped),
        }
    }

    pub async fn status(&self) -> Option<PlaylistStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(PlaylistCommand::GetStatus(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn manual_trigger(&self) -> Option<PlayOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(PlaylistCommand::ManualTrigger(Some(tx))).await.ok()?;
        rx.await.ok().flatten()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the actor and wait until its units are released.
    pub async fn shutdown(self) -> Option<PlaylistStatus> {
        self.cancellation_token.cancel();
        match self.task.await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(region_id = %self.region_id, error = %e, "playlist actor ended abnormally");
                None
            }
        }
    }
}
