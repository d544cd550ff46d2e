//! Signage player core.
//!
//! Picks the layout to show from a schedule-bearing configuration document
//! and plays each region's playlist. Presentation is abstracted behind
//! [`playback::Presenter`].

pub mod assets;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod playback;
pub mod scheduler;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
