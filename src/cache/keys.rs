//! Cache key definitions.

use sha2::{Digest, Sha256};

use crate::domain::format::RenderFormat;

/// Identity of one cached render artifact.
///
/// Carries the full request identity — format plus token — so the two
/// formats of the same token never collide. Tokens are content-addressed,
/// which makes the mapped artifact immutable: entries are created once and
/// never updated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub format: RenderFormat,
    pub token: String,
}

impl ArtifactKey {
    pub fn new(format: RenderFormat, token: impl Into<String>) -> Self {
        Self {
            format,
            token: token.into(),
        }
    }

    /// The request path this key caches, `/render/{format}/{token}`.
    pub fn request_path(&self) -> String {
        format!("/render/{}/{}", self.format.as_str(), self.token)
    }

    /// Stable on-disk file name for the filesystem store. Tokens can exceed
    /// filesystem name limits, so the path is hashed; the extension keeps
    /// the directory inspectable.
    pub fn storage_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.request_path().as_bytes());
        format!("{}.{}", hex::encode(hasher.finalize()), self.format.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_of_one_token_never_collide() {
        let svg = ArtifactKey::new(RenderFormat::Svg, "Zmxvd2NoYXJ0");
        let png = ArtifactKey::new(RenderFormat::Png, "Zmxvd2NoYXJ0");

        assert_ne!(svg, png);
        assert_ne!(svg.request_path(), png.request_path());
        assert_ne!(svg.storage_name(), png.storage_name());
    }

    #[test]
    fn storage_name_is_stable_across_calls() {
        let key = ArtifactKey::new(RenderFormat::Svg, "Zmxvd2NoYXJ0");
        assert_eq!(key.storage_name(), key.storage_name());
        assert!(key.storage_name().ends_with(".svg"));
    }

    #[test]
    fn request_path_embeds_token_verbatim() {
        let key = ArtifactKey::new(RenderFormat::Png, "abc_-123");
        assert_eq!(key.request_path(), "/render/png/abc_-123");
    }
}
