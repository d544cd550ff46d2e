//! Renderable projection of one schedule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use media_types::{MediaKind, Resolution};

use super::PositionMode;

/// Region rectangle, in the units of the owning region's [`PositionMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A normalized media item, ready for a media unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub source_url: String,
    /// Display time. Always set for images; for videos only meaningful
    /// together with `force_duration`.
    pub duration: Option<Duration>,
    pub force_duration: bool,
    pub ordinal: Option<i64>,
    pub muted: bool,
    pub stretch: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl PlaylistItem {
    /// Whether `now` falls inside the optional validity window.
    ///
    /// `valid_from` is inclusive, `valid_to` is exclusive.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| now >= from) && self.valid_to.is_none_or(|to| now < to)
    }

    /// The duration a video must respect instead of its natural end.
    pub fn forced_duration(&self) -> Option<Duration> {
        if self.force_duration {
            self.duration.filter(|d| !d.is_zero())
        } else {
            None
        }
    }
}

/// A positioned region with its playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLayout {
    pub id: String,
    pub name: String,
    pub mode: PositionMode,
    pub rect: Rect,
    pub z_index: i32,
    pub loop_enabled: bool,
    pub playlist: Vec<PlaylistItem>,
}

/// The layout currently on screen.
///
/// Replaced wholesale whenever the active schedule changes; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLayout {
    pub schedule_id: String,
    pub layout_id: String,
    pub name: String,
    pub resolution: Resolution,
    pub regions: Vec<RegionLayout>,
}

impl ActiveLayout {
    pub fn region(&self, id: &str) -> Option<&RegionLayout> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn item_count(&self) -> usize {
        self.regions.iter().map(|r| r.playlist.len()).sum()
    }
}
