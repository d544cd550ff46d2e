//! Media unit creation.

use std::sync::atomic::{AtomicU64, Ordering};

use media_types::MediaKind;
use tracing::trace;

use super::unit::{ImageUnit, MediaUnit, UnitContext, VideoUnit};
use crate::domain::{MediaDescriptor, PlaylistItem};

/// Builds the [`MediaUnit`] variant for an item and hands out unit ids.
///
/// Shared by every playlist of the engine, so ids are unique across regions.
#[derive(Debug, Default)]
pub struct MediaUnitFactory {
    next_id: AtomicU64,
}

impl MediaUnitFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a descriptor: declared type, then content signature, then
    /// URL extension, then [`MediaKind::Image`].
    pub fn classify(media: &MediaDescriptor) -> MediaKind {
        media_types::classify(
            media.media_type.as_deref(),
            media.content_type.as_deref(),
            &media.source_url,
        )
    }

    pub fn create(&self, item: PlaylistItem, ctx: UnitContext) -> Box<dyn MediaUnit> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(unit = id, item_id = %item.id, kind = %item.kind, "creating media unit");
        match item.kind {
            MediaKind::Image => Box::new(ImageUnit::new(id, item, ctx)),
            MediaKind::Video => Box::new(VideoUnit::new(id, item, ctx)),
        }
    }

    /// Total units created so far.
    pub fn units_created(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}
