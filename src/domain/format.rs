//! Supported render output formats.

use std::fmt;

/// Output encoding for a rendered diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderFormat {
    /// Vector document (`image/svg+xml`).
    Svg,
    /// Raster snapshot (`image/png`).
    Png,
}

impl RenderFormat {
    /// Every supported format, in the order submission URLs are reported.
    pub const ALL: [RenderFormat; 2] = [RenderFormat::Svg, RenderFormat::Png];

    /// Parse a URL path segment into a format. `None` for anything that is
    /// not exactly `svg` or `png`; unknown formats surface as 404s.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "svg" => Some(Self::Svg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Svg => "image/svg+xml",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
