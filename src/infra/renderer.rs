//! Mermaid CLI render engine.
//!
//! Each call stages the source in a temp file, spawns one `mmdc` process,
//! and reads the output file back. The process is scoped to the call:
//! `kill_on_drop` reaps it when the render future is dropped, including on
//! timeout, so no engine state leaks between unrelated renders.

use std::{
    io::{ErrorKind, Write},
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{info, warn};

use crate::application::render::{DiagramRenderer, RenderError};
use crate::domain::format::RenderFormat;

#[derive(Debug, Clone)]
pub struct MermaidCli {
    cli_path: PathBuf,
    timeout: Duration,
}

impl MermaidCli {
    pub fn new(cli_path: PathBuf, timeout: Duration) -> Self {
        Self { cli_path, timeout }
    }

    async fn invoke(&self, source: &str, format: RenderFormat) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();

        let mut input_file = tempfile::NamedTempFile::new().map_err(RenderError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(RenderError::Io)?;
        input_file.flush().map_err(RenderError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(&format!(".{}", format.as_str()))
            .tempfile()
            .map_err(RenderError::Io)?;
        let output_path = output_file.path().to_path_buf();

        let mut command = Command::new(&self.cli_path);
        command
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(&output_path)
            .arg("--outputFormat")
            .arg(format.as_str())
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(
                    target = "disegno::renderer",
                    op = "mermaid::invoke",
                    result = "error",
                    error_code = "spawn_cli",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "failed to spawn Mermaid CLI"
                );
                return Err(if err.kind() == ErrorKind::NotFound {
                    RenderError::Unavailable(err)
                } else {
                    RenderError::Io(err)
                });
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(
                    target = "disegno::renderer",
                    op = "mermaid::invoke",
                    result = "timeout",
                    format = %format,
                    timeout_ms = timeout_ms,
                    "Mermaid CLI exceeded the render deadline; process killed"
                );
                return Err(RenderError::Timeout { timeout_ms });
            }
        };

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "disegno::renderer",
                op = "mermaid::invoke",
                result = "error",
                error_code = "mermaid_cli",
                format = %format,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Mermaid CLI invocation failed"
            );
            return Err(RenderError::Engine { exit_code, stderr });
        }

        let bytes = match tokio::fs::read(&output_path).await {
            Ok(bytes) if !bytes.is_empty() => Bytes::from(bytes),
            Ok(_) => return Err(RenderError::MissingOutput),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RenderError::MissingOutput);
            }
            Err(err) => return Err(RenderError::Io(err)),
        };

        info!(
            target = "disegno::renderer",
            op = "mermaid::invoke",
            result = "ok",
            format = %format,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            output_bytes = bytes.len(),
            "diagram rendered via Mermaid CLI"
        );

        Ok(bytes)
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCli {
    async fn render(&self, source: &str, format: RenderFormat) -> Result<Bytes, RenderError> {
        self.invoke(source, format).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

    use tempfile::TempDir;

    use super::*;

    fn make_executable(path: &PathBuf) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn write_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-mmdc");
        fs::write(&path, body).expect("write script");
        make_executable(&path);
        path
    }

    #[tokio::test]
    async fn renders_svg_with_valid_cli() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            &dir,
            r#"#!/bin/sh
set -eu
out=""
fmt=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
    --outputFormat) shift; fmt="$1" ;;
    *) ;;
  esac
  shift
done
[ -n "$out" ] || { echo "missing --output" >&2; exit 2; }
[ "$fmt" = "svg" ] || { echo "unexpected format: $fmt" >&2; exit 3; }
printf '<svg>ok</svg>' > "$out"
"#,
        );

        let renderer = MermaidCli::new(script, Duration::from_secs(5));
        let bytes = renderer
            .render("flowchart LR\n  A --> B", RenderFormat::Svg)
            .await
            .expect("rendered");
        assert_eq!(bytes, Bytes::from_static(b"<svg>ok</svg>"));
    }

    #[tokio::test]
    async fn surfaces_cli_diagnostics() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            &dir,
            r#"#!/bin/sh
echo "Parse error on line 2" >&2
exit 42
"#,
        );

        let renderer = MermaidCli::new(script, Duration::from_secs(5));
        let err = renderer
            .render("not a diagram", RenderFormat::Svg)
            .await
            .expect_err("cli failure");

        match err {
            RenderError::Engine { exit_code, stderr } => {
                assert_eq!(exit_code, Some(42));
                assert!(stderr.contains("Parse error"), "stderr not propagated: {stderr}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn times_out_hung_cli() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            &dir,
            r#"#!/bin/sh
sleep 30
"#,
        );

        let renderer = MermaidCli::new(script, Duration::from_millis(100));
        let err = renderer
            .render("graph TD", RenderFormat::Png)
            .await
            .expect_err("timeout");
        assert!(matches!(err, RenderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_cli_is_reported_as_unavailable() {
        let renderer = MermaidCli::new(
            PathBuf::from("/nonexistent/mmdc"),
            Duration::from_secs(1),
        );
        let err = renderer
            .render("graph TD", RenderFormat::Svg)
            .await
            .expect_err("unavailable");
        assert!(matches!(err, RenderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_output_is_missing_output() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(
            &dir,
            r#"#!/bin/sh
exit 0
"#,
        );

        let renderer = MermaidCli::new(script, Duration::from_secs(5));
        let err = renderer
            .render("graph TD", RenderFormat::Svg)
            .await
            .expect_err("missing output");
        assert!(matches!(err, RenderError::MissingOutput));
    }
}
