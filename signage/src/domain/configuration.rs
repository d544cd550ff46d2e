//! Configuration document as delivered by the configuration provider.
//!
//! All entities are immutable value data once parsed. Fields are lenient on
//! input (defaults everywhere) so a single malformed schedule or media item is
//! excluded later instead of failing the whole document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub configuration_id: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Configuration {
    /// A configuration is usable when at least one schedule carries a
    /// non-empty layout.
    pub fn is_usable(&self) -> bool {
        self.schedules.iter().any(Schedule::has_layout)
    }

    /// Parse a configuration document from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A time rule bound to one layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    #[serde(default)]
    pub recurrence_expression: Option<String>,
    #[serde(default)]
    pub layout_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub layout_width: Option<u32>,
    #[serde(default)]
    pub layout_height: Option<u32>,
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl Schedule {
    pub fn has_layout(&self) -> bool {
        !self.regions.is_empty()
    }

    /// The recurrence expression, if present and non-blank.
    pub fn expression(&self) -> Option<&str> {
        self.recurrence_expression
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Geometry units of a region. Percentage and pixel geometry are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionMode {
    #[default]
    #[serde(alias = "percentage", alias = "%")]
    Percent,
    #[serde(alias = "px", alias = "pixels")]
    Pixel,
}

/// A positioned content slot within a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "units")]
    pub position_mode: PositionMode,
    #[serde(default)]
    pub left: Option<f64>,
    #[serde(default)]
    pub top: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub z_index: Option<i32>,
    #[serde(default = "default_true", rename = "loop")]
    pub loop_enabled: bool,
    #[serde(default)]
    pub media: Vec<MediaDescriptor>,
}

/// One media item of a region playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Declared type ("Image", "Video", or anything else for unknown).
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    /// MIME hint, used as the content signature during classification.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub source_url: String,
    /// Seconds. Required for images, an optional override for videos.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Videos honor `duration` only when this is set.
    #[serde(default)]
    pub force_duration: bool,
    #[serde(default)]
    pub ordinal: Option<i64>,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub stretch: bool,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}
