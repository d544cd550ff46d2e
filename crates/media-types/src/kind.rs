//! Media kind classification.
//!
//! Classification is a fixed tier list, evaluated in order:
//! 1. the explicitly declared type,
//! 2. the content signature (a MIME hint or the MIME of a `data:` URI),
//! 3. the file extension of the URL path,
//! 4. the default, [`MediaKind::Image`].

/// The playback family of a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaKind {
    /// Time-boxed still content.
    #[default]
    Image,
    /// Self-timed content that ends on its own.
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "avif", "tif", "tiff",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "webm", "mov", "mkv", "ogv", "avi", "ts", "m3u8", "mpd",
];

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
        }
    }

    /// Parse a declared type. Unknown or empty values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "img" | "picture" | "photo" => Some(Self::Image),
            "video" | "movie" | "clip" => Some(Self::Video),
            _ => None,
        }
    }

    /// Classify from a MIME type such as `video/mp4`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        let (top, sub) = essence.split_once('/')?;
        match top.to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "application" => match sub.to_ascii_lowercase().as_str() {
                "vnd.apple.mpegurl" | "x-mpegurl" | "dash+xml" => Some(Self::Video),
                _ => None,
            },
            _ => None,
        }
    }

    /// Classify from the extension of a URL or path, ignoring query and fragment.
    pub fn from_extension(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let file = path.rsplit('/').next().unwrap_or_default();
        let (_, ext) = file.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }

    fn from_data_uri(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let mime = rest.split([';', ',']).next()?;
        Self::from_mime(mime)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the media kind of an item.
///
/// Deterministic: the first tier that yields an answer wins.
pub fn classify(declared: Option<&str>, content_type: Option<&str>, url: &str) -> MediaKind {
    let url = url.trim();
    declared
        .and_then(MediaKind::parse)
        .or_else(|| content_type.and_then(MediaKind::from_mime))
        .or_else(|| MediaKind::from_data_uri(url))
        .or_else(|| MediaKind::from_extension(url))
        .unwrap_or_default()
}
