//! Render dispatch: share token in, image bytes out.
//!
//! The dispatcher decodes the token, defensively re-canonicalizes the
//! recovered source, and hands it to the render collaborator. It never
//! touches the cache; cache placement is the coordinator's job.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{
    format::RenderFormat,
    source::canonicalize,
    token::{self, TokenError},
};

/// Failures reported by the diagram render collaborator.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render engine unavailable: {0}")]
    Unavailable(std::io::Error),
    #[error("failed to stage render input: {0}")]
    Io(std::io::Error),
    #[error("render engine rejected the diagram (exit {exit_code:?}): {stderr}")]
    Engine {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("render engine produced no output")]
    MissingOutput,
    #[error("render timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

/// External engine that turns canonical diagram source into image bytes.
///
/// Implementations must scope any heavyweight resources (child process,
/// browser session) to the single call and release them on every exit
/// path, including timeout.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, source: &str, format: RenderFormat) -> Result<Bytes, RenderError>;
}

/// Failures surfaced by [`RenderService::render_token`].
///
/// `Token` is client-caused, `Render` is a collaborator fault; the HTTP
/// layer maps them to distinct status codes.
#[derive(Debug, Error)]
pub enum RenderDispatchError {
    #[error("invalid share token: {0}")]
    Token(#[from] TokenError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct RenderService {
    renderer: Arc<dyn DiagramRenderer>,
}

impl RenderService {
    pub fn new(renderer: Arc<dyn DiagramRenderer>) -> Self {
        Self { renderer }
    }

    /// Decode `token` and render it in the requested format.
    ///
    /// Tokens minted through the submission endpoint already carry
    /// canonical source, so the re-canonicalization here is normally a
    /// no-op; it guards against hand-built tokens.
    pub async fn render_token(
        &self,
        token: &str,
        format: RenderFormat,
    ) -> Result<Bytes, RenderDispatchError> {
        let started_at = Instant::now();
        let decoded = token::decode(token)?;
        let canonical = canonicalize(&decoded);

        if canonical != decoded {
            warn!(
                target = "disegno::render",
                op = "render_token",
                format = %format,
                "token carried non-canonical source; normalized before rendering"
            );
        }

        match self.renderer.render(&canonical, format).await {
            Ok(bytes) => {
                info!(
                    target = "disegno::render",
                    op = "render_token",
                    result = "ok",
                    format = %format,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    output_bytes = bytes.len(),
                    "diagram rendered"
                );
                Ok(bytes)
            }
            Err(err) => {
                metrics::counter!("disegno_render_failure_total").increment(1);
                warn!(
                    target = "disegno::render",
                    op = "render_token",
                    result = "error",
                    format = %format,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "diagram render failed"
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::token::encode;

    struct RecordingRenderer {
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingRenderer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DiagramRenderer for RecordingRenderer {
        async fn render(&self, source: &str, _format: RenderFormat) -> Result<Bytes, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("seen lock").push(source.to_string());
            Ok(Bytes::from_static(b"<svg/>"))
        }
    }

    #[tokio::test]
    async fn dispatches_decoded_canonical_source() {
        let renderer = Arc::new(RecordingRenderer::new());
        let service = RenderService::new(renderer.clone());

        let token = encode("flowchart TD\n A-->B");
        let bytes = service
            .render_token(&token, RenderFormat::Svg)
            .await
            .expect("rendered");

        assert_eq!(bytes, Bytes::from_static(b"<svg/>"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            renderer.seen.lock().expect("seen lock").as_slice(),
            ["flowchart TD\n A-->B"]
        );
    }

    #[tokio::test]
    async fn recanonicalizes_hand_built_tokens() {
        let renderer = Arc::new(RecordingRenderer::new());
        let service = RenderService::new(renderer.clone());

        // Token minted from raw, fenced source rather than canonical form.
        let token = encode("# header\n```mermaid\nA-->B\n```");
        service
            .render_token(&token, RenderFormat::Png)
            .await
            .expect("rendered");

        assert_eq!(renderer.seen.lock().expect("seen lock").as_slice(), ["A-->B"]);
    }

    #[tokio::test]
    async fn invalid_token_is_a_token_error_not_a_render_error() {
        let renderer = Arc::new(RecordingRenderer::new());
        let service = RenderService::new(renderer.clone());

        let err = service
            .render_token("not-valid-base64!!!", RenderFormat::Svg)
            .await
            .expect_err("rejected");

        assert!(matches!(err, RenderDispatchError::Token(_)));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0, "renderer must not run");
    }
}
