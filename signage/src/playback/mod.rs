//! Playback engine.
//!
//! A [`PlaybackEngine`] runs one [`Playlist`] actor per region of the active
//! layout. Each playlist drives a single [`MediaUnit`] at a time and moves on
//! when the unit reports completion.

pub mod engine;
pub mod factory;
pub mod playlist;
pub mod presenter;
pub mod runner;
pub mod unit;

pub use engine::PlaybackEngine;
pub use factory::MediaUnitFactory;
pub use playlist::{Playlist, PlaylistState, PlaylistStatus, StopReason};
pub use presenter::{ElementId, HEADLESS_VIDEO_LENGTH, HeadlessPresenter, PresentError, Presenter};
pub use runner::{PlaylistCommand, PlaylistHandle, SendError};
pub use unit::{
    CompletionKind, ImageUnit, MediaError, MediaUnit, PlayOutcome, PlayheadToken, UnitContext,
    UnitSignal, UnitState, VideoUnit,
};
