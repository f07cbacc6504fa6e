//! Diagram submission: raw source in, share token and render URLs out.
//!
//! Nothing is persisted or pre-rendered here. URLs are only materialized;
//! the first visit to one triggers the render-and-cache miss path.

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::domain::{format::RenderFormat, source::canonicalize, token};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("diagram source is empty after normalization")]
    EmptySource,
}

/// Result of a submission, returned once to the submitter.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Submission {
    pub token: String,
    #[serde(rename = "cleanedCode")]
    pub cleaned_code: String,
    #[serde(rename = "svgUrl")]
    pub svg_url: String,
    #[serde(rename = "pngUrl")]
    pub png_url: String,
}

pub struct SubmissionService {
    base_origin: String,
}

impl SubmissionService {
    /// `public_base_url` is the deployment origin render URLs are built
    /// against, e.g. `https://diagrams.example.org`.
    pub fn new(public_base_url: &Url) -> Self {
        Self {
            base_origin: public_base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    pub fn submit(&self, raw_source: &str) -> Result<Submission, SubmissionError> {
        let cleaned = canonicalize(raw_source);
        if cleaned.is_empty() {
            return Err(SubmissionError::EmptySource);
        }

        let token = token::encode(&cleaned);
        let mut urls = RenderFormat::ALL
            .iter()
            .map(|format| self.render_url(*format, &token));

        let svg_url = urls.next().unwrap_or_default();
        let png_url = urls.next().unwrap_or_default();

        Ok(Submission {
            token,
            cleaned_code: cleaned,
            svg_url,
            png_url,
        })
    }

    fn render_url(&self, format: RenderFormat, token: &str) -> String {
        format!("{}/render/{}/{}", self.base_origin, format.as_str(), token)
    }
}
