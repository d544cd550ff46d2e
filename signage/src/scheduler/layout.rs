//! Schedule to [`ActiveLayout`] projection.

use std::time::Duration;

use media_types::Resolution;
use tracing::trace;

use crate::domain::{
    ActiveLayout, MediaDescriptor, PlaylistItem, PositionMode, Rect, Region, RegionLayout,
    Schedule,
};
use crate::playback::MediaUnitFactory;

/// Display time for images without a usable duration.
pub const DEFAULT_IMAGE_DURATION: Duration = Duration::from_secs(10);

/// Pure `Schedule -> ActiveLayout` transformation.
#[derive(Debug, Clone)]
pub struct LayoutTransformer {
    default_resolution: Resolution,
    default_image_duration: Duration,
}

impl Default for LayoutTransformer {
    fn default() -> Self {
        Self {
            default_resolution: Resolution::FULL_HD,
            default_image_duration: DEFAULT_IMAGE_DURATION,
        }
    }
}

impl LayoutTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_resolution(mut self, resolution: Resolution) -> Self {
        self.default_resolution = resolution;
        self
    }

    pub fn with_default_image_duration(mut self, duration: Duration) -> Self {
        self.default_image_duration = duration;
        self
    }

    pub fn to_layout(&self, schedule: &Schedule) -> ActiveLayout {
        let resolution = Resolution::or_default(
            schedule.layout_width,
            schedule.layout_height,
            self.default_resolution,
        );

        let regions = schedule
            .regions
            .iter()
            .enumerate()
            .map(|(index, region)| self.region(index, region, resolution))
            .collect();

        ActiveLayout {
            schedule_id: schedule.id.clone(),
            layout_id: schedule.layout_id.clone(),
            name: schedule.name.clone(),
            resolution,
            regions,
        }
    }

    fn region(&self, index: usize, region: &Region, resolution: Resolution) -> RegionLayout {
        let (full_width, full_height) = match region.position_mode {
            PositionMode::Percent => (100.0, 100.0),
            PositionMode::Pixel => (f64::from(resolution.width), f64::from(resolution.height)),
        };

        let offset = |v: Option<f64>| v.filter(|v| v.is_finite()).unwrap_or(0.0);
        let size = |v: Option<f64>, full: f64| v.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(full);

        let rect = Rect {
            left: offset(region.left),
            top: offset(region.top),
            width: size(region.width, full_width),
            height: size(region.height, full_height),
        };

        let id = if region.id.trim().is_empty() {
            format!("region-{index}")
        } else {
            region.id.clone()
        };

        let mut media: Vec<&MediaDescriptor> = region.media.iter().collect();
        // Stable: equal ordinals keep input order.
        media.sort_by_key(|m| m.ordinal.unwrap_or(i64::MAX));

        let playlist: Vec<PlaylistItem> = media.into_iter().map(|m| self.item(m)).collect();
        trace!(region_id = %id, items = playlist.len(), "region transformed");

        RegionLayout {
            id,
            name: region.name.clone(),
            mode: region.position_mode,
            rect,
            z_index: region.z_index.unwrap_or(0),
            loop_enabled: region.loop_enabled,
            playlist,
        }
    }

    fn item(&self, media: &MediaDescriptor) -> PlaylistItem {
        let kind = MediaUnitFactory::classify(media);
        let declared = media
            .duration
            .filter(|d| *d > 0.0)
            .and_then(|d| Duration::try_from_secs_f64(d).ok());

        let duration = match kind {
            media_types::MediaKind::Image => Some(declared.unwrap_or(self.default_image_duration)),
            media_types::MediaKind::Video => declared,
        };

        PlaylistItem {
            id: media.id.clone(),
            name: media.name.clone(),
            kind,
            source_url: media.source_url.trim().to_string(),
            duration,
            force_duration: media.force_duration,
            ordinal: media.ordinal,
            muted: media.mute,
            stretch: media.stretch,
            valid_from: media.valid_from,
            valid_to: media.valid_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_types::MediaKind;

    fn media(id: &str, ordinal: Option<i64>) -> MediaDescriptor {
        MediaDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            media_type: None,
            content_type: None,
            source_url: format!("https://cdn.example.com/{id}.png"),
            duration: None,
            force_duration: false,
            ordinal,
            mute: false,
            stretch: false,
            valid_from: None,
            valid_to: None,
        }
    }

    fn region(media: Vec<MediaDescriptor>) -> Region {
        Region {
            id: String::new(),
            name: "main".to_string(),
            position_mode: PositionMode::Percent,
            left: None,
            top: None,
            width: None,
            height: None,
            z_index: None,
            loop_enabled: true,
            media,
        }
    }

    fn schedule(regions: Vec<Region>) -> Schedule {
        Schedule {
            id: "s1".to_string(),
            recurrence_expression: Some("0 0 * * * *".to_string()),
            layout_id: "l1".to_string(),
            name: "Lobby".to_string(),
            layout_width: None,
            layout_height: None,
            regions,
        }
    }

    #[test]
    fn test_percent_fallbacks() {
        let layout = LayoutTransformer::new().to_layout(&schedule(vec![region(Vec::new())]));
        let region = &layout.regions[0];

        assert_eq!(layout.resolution, Resolution::FULL_HD);
        assert_eq!(region.id, "region-0");
        assert_eq!(region.z_index, 0);
        assert_eq!(
            region.rect,
            Rect {
                left: 0.0,
                top: 0.0,
                width: 100.0,
                height: 100.0
            }
        );
    }

    #[test]
    fn test_pixel_fallbacks_use_resolution() {
        let mut s = schedule(vec![Region {
            id: "banner".to_string(),
            position_mode: PositionMode::Pixel,
            left: Some(10.0),
            width: Some(-5.0),
            z_index: Some(3),
            ..region(Vec::new())
        }]);
        s.layout_width = Some(1280);
        s.layout_height = Some(720);

        let layout = LayoutTransformer::new().to_layout(&s);
        let region = &layout.regions[0];
        assert_eq!(layout.resolution, Resolution::new(1280, 720));
        assert_eq!(region.id, "banner");
        assert_eq!(region.z_index, 3);
        assert_eq!(
            region.rect,
            Rect {
                left: 10.0,
                top: 0.0,
                width: 1280.0,
                height: 720.0
            }
        );
    }

    #[test]
    fn test_playlist_sorted_by_ordinal_stably() {
        let s = schedule(vec![region(vec![
            media("c", None),
            media("b", Some(2)),
            media("a", Some(1)),
            media("b2", Some(2)),
            media("d", None),
        ])]);

        let layout = LayoutTransformer::new().to_layout(&s);
        let ids: Vec<&str> = layout.regions[0]
            .playlist
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b", "b2", "c", "d"]);
    }

    #[test]
    fn test_item_normalization() {
        let mut video = media("v", Some(1));
        video.source_url = " https://cdn.example.com/v.mp4 ".to_string();
        video.duration = Some(12.5);
        video.force_duration = true;

        let mut image = media("i", Some(2));
        image.duration = Some(0.0);

        let mut unknown = media("u", Some(3));
        unknown.media_type = Some("Widget".to_string());
        unknown.source_url = "https://cdn.example.com/u".to_string();
        unknown.duration = Some(7.0);

        let layout =
            LayoutTransformer::new().to_layout(&schedule(vec![region(vec![video, image, unknown])]));
        let playlist = &layout.regions[0].playlist;

        assert_eq!(playlist[0].kind, MediaKind::Video);
        assert_eq!(playlist[0].source_url, "https://cdn.example.com/v.mp4");
        assert_eq!(playlist[0].forced_duration(), Some(Duration::from_millis(12_500)));

        assert_eq!(playlist[1].kind, MediaKind::Image);
        assert_eq!(playlist[1].duration, Some(DEFAULT_IMAGE_DURATION));

        assert_eq!(playlist[2].kind, MediaKind::Image);
        assert_eq!(playlist[2].duration, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_out_of_range_duration_falls_back() {
        let config = crate::domain::Configuration::from_slice(
            br#"{
                "configurationId": "lobby",
                "schedules": [{
                    "id": "s",
                    "recurrenceExpression": "0 * * * * *",
                    "regions": [{
                        "id": "main",
                        "media": [
                            { "id": "i", "type": "Image", "sourceUrl": "https://cdn.example.com/i.png", "duration": 1e20, "ordinal": 1 },
                            { "id": "v", "type": "Video", "sourceUrl": "https://cdn.example.com/v.mp4", "duration": 1e300, "ordinal": 2 }
                        ]
                    }]
                }]
            }"#,
        )
        .unwrap();

        let layout = LayoutTransformer::new().to_layout(&config.schedules[0]);
        let playlist = &layout.regions[0].playlist;
        assert_eq!(playlist[0].duration, Some(DEFAULT_IMAGE_DURATION));
        assert_eq!(playlist[1].duration, None);
    }

    #[test]
    fn test_padded_untyped_url_classified_by_extension() {
        let mut clip = media("clip", None);
        clip.source_url = " https://cdn.example.com/clip.mp4 ".to_string();
        assert_eq!(MediaUnitFactory::classify(&clip), MediaKind::Video);

        let layout = LayoutTransformer::new().to_layout(&schedule(vec![region(vec![clip])]));
        let item = &layout.regions[0].playlist[0];
        assert_eq!(item.kind, MediaKind::Video);
        assert_eq!(item.source_url, "https://cdn.example.com/clip.mp4");
        assert_eq!(item.duration, None);
    }

    #[test]
    fn test_pure() {
        let s = schedule(vec![region(vec![media("a", Some(1))])]);
        let transformer = LayoutTransformer::new();
        assert_eq!(transformer.to_layout(&s), transformer.to_layout(&s));
    }
}
