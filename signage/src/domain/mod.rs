//! Domain layer: the configuration document and the layouts derived from it.

pub mod configuration;
pub mod layout;

pub use configuration::{Configuration, MediaDescriptor, PositionMode, Region, Schedule};
pub use layout::{ActiveLayout, PlaylistItem, Rect, RegionLayout};
