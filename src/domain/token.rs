//! Reversible share tokens.
//!
//! A token is the canonical source itself, base64url-encoded without
//! padding, so it can sit in a URL path segment with no further escaping
//! and the server needs no lookup table to recover the source.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use thiserror::Error;

/// Errors produced when decoding a share token back to diagram source.
///
/// Both variants are client-caused: the token was mangled in transit or
/// never came from [`encode`] in the first place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64url: {0}")]
    Base64(String),
    #[error("token bytes are not valid UTF-8")]
    Utf8,
}

/// Encode canonical diagram source into a URL-path-safe token.
pub fn encode(canonical: &str) -> String {
    URL_SAFE_NO_PAD.encode(canonical.as_bytes())
}

/// Decode a token back into the exact canonical source it was minted from.
pub fn decode(token: &str) -> Result<String, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|err| TokenError::Base64(err.to_string()))?;
    String::from_utf8(bytes).map_err(|_| TokenError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii_source() {
        let source = "flowchart TD\n A-->B";
        assert_eq!(decode(&encode(source)).expect("decoded"), source);
    }

    #[test]
    fn round_trips_non_ascii_source() {
        let source = "graph LR\n  甲 --> 乙\n  café --> naïve";
        assert_eq!(decode(&encode(source)).expect("decoded"), source);
    }

    #[test]
    fn round_trips_empty_source() {
        assert_eq!(encode(""), "");
        assert_eq!(decode("").expect("decoded"), "");
    }

    #[test]
    fn tokens_use_only_url_path_safe_characters() {
        // The inputs below force `+`, `/` and padding in plain base64.
        let samples = ["A", "AB", "ABC", "subgraph?>~\u{7f}", "日本語のソース"];
        for source in samples {
            let token = encode(source);
            assert!(
                token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "token for {source:?} contains unsafe characters: {token}"
            );
        }
    }

    #[test]
    fn rejects_non_base64_input() {
        let err = decode("not-valid-base64!!!").expect_err("rejected");
        assert!(matches!(err, TokenError::Base64(_)));

        let err = decode("token@with@at").expect_err("rejected");
        assert!(matches!(err, TokenError::Base64(_)));
    }

    #[test]
    fn rejects_non_utf8_payload() {
        let token = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0x80]);
        assert_eq!(decode(&token).expect_err("rejected"), TokenError::Utf8);
    }

    #[test]
    fn distinct_sources_produce_distinct_tokens() {
        assert_ne!(encode("graph TD"), encode("graph LR"));
    }
}
