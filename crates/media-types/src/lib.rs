mod kind;

pub use kind::{MediaKind, classify};

/// Display or layout resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Full HD, the fallback for layouts that do not declare a size.
    pub const FULL_HD: Resolution = Resolution::new(1920, 1080);

    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Build a resolution from optional dimensions, falling back per axis.
    pub fn or_default(width: Option<u32>, height: Option<u32>, fallback: Resolution) -> Self {
        Self {
            width: width.filter(|w| *w > 0).unwrap_or(fallback.width),
            height: height.filter(|h| *h > 0).unwrap_or(fallback.height),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::FULL_HD
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
