//! Extractors backed by an external process.
//!
//! The process receives the candidate path as its last argument and must
//! print `{"exports": [...]}` (or a bare array) on stdout using the
//! [`ExportDescriptor`] schema. Only allowlisted bare executable names are
//! spawned, never through a shell, and every run is bounded in time and output.

use super::{ExportDescriptor, ExtractionFailure, LanguageExtractor};
use crate::config::SubprocessConfig;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tracing::debug;

/// How long output is still drained after the process itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractorOutput {
    Wrapped { exports: Vec<ExportDescriptor> },
    Bare(Vec<ExportDescriptor>),
}

/// Runs a configured external program to extract exports.
#[derive(Debug, Clone)]
pub struct SubprocessExtractor {
    language: String,
    executable: String,
    args: Vec<String>,
    extensions: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl SubprocessExtractor {
    /// Validates the definition against its executable allowlist.
    pub fn from_config(config: &SubprocessConfig) -> Result<Self, ExtractionFailure> {
        let executable = config.executable.trim();
        let bare = !executable.is_empty() && !executable.contains(['/', '\\']);
        if !bare || !config.allowed_executables.iter().any(|a| a == executable) {
            return Err(ExtractionFailure::NotAllowed(executable.to_string()));
        }
        Ok(Self {
            language: config.language.clone(),
            executable: executable.to_string(),
            args: config.args.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
        })
    }

    /// Runs the extractor to completion on the ambient runtime, or a
    /// private one when called outside of tokio.
    fn run_blocking(&self, path: &Path) -> Result<Vec<u8>, ExtractionFailure> {
        match Handle::try_current() {
            Ok(handle) => handle.block_on(self.run(path)),
            Err(_) => Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(self.run(path)),
        }
    }

    async fn run(&self, path: &Path) -> Result<Vec<u8>, ExtractionFailure> {
        let started = Instant::now();
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractionFailure::Failed("stdout was not captured".to_string()))?;
        let limit = self.max_output_bytes;

        // The child is owned by this future, so a timeout drops and kills it.
        let finished = tokio::time::timeout(self.timeout, async move {
            let mut output = Vec::new();
            let mut reader = stdout.take(limit as u64 + 1);
            {
                let read = reader.read_to_end(&mut output);
                tokio::pin!(read);
                tokio::select! {
                    result = &mut read => {
                        result?;
                    }
                    status = child.wait() => {
                        status?;
                        // Background descendants may keep the pipe open after exit.
                        if let Ok(result) = tokio::time::timeout(DRAIN_GRACE, read).await {
                            result?;
                        }
                    }
                }
            }
            if output.len() > limit {
                return Err(ExtractionFailure::OutputTooLarge(limit));
            }
            let status = child.wait().await?;
            if !status.success() {
                return Err(ExtractionFailure::Failed(status.to_string()));
            }
            Ok::<_, ExtractionFailure>(output)
        })
        .await;

        let output = finished.map_err(|_| ExtractionFailure::Timeout(self.timeout.as_millis()))??;
        debug!(
            executable = %self.executable,
            path = %path.display(),
            bytes = output.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Subprocess extractor finished"
        );
        Ok(output)
    }
}

impl LanguageExtractor for SubprocessExtractor {
    fn language(&self) -> &str {
        &self.language
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn extract(
        &self,
        path: &Path,
        _content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure> {
        let output = self.run_blocking(path)?;
        let parsed: ExtractorOutput = serde_json::from_slice(&output)?;
        Ok(match parsed {
            ExtractorOutput::Wrapped { exports } | ExtractorOutput::Bare(exports) => exports,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::default_allowed_executables;
    use crate::extract::AccessKind;
    use crate::signature::EntityKind;
    use assert2::{check, let_assert};

    fn shell(script: &str) -> SubprocessConfig {
        let mut allowed = default_allowed_executables();
        allowed.push("sh".to_string());
        SubprocessConfig {
            language: "go".to_string(),
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            extensions: vec![".GO".to_string()],
            timeout_ms: 2_000,
            max_output_bytes: 4096,
            allowed_executables: allowed,
        }
    }

    #[test]
    fn parses_exports_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.go");
        std::fs::write(
            &file,
            r#"{"exports":[{"accessKind":"named","exportedName":"Server","kind":"class","name":"Server","methods":["Start"]}]}"#,
        )
        .unwrap();

        let extractor = SubprocessExtractor::from_config(&shell(r#"cat "$0""#)).unwrap();
        check!(extractor.extensions() == ["go"]);
        let exports = extractor.extract(&file, "").unwrap();
        let_assert!([server] = exports.as_slice());
        check!(server.access_kind == AccessKind::Named);
        check!(server.kind == EntityKind::Class);
        check!(server.methods.contains("Start"));
    }

    #[test]
    fn rejects_unlisted_or_pathlike_executables() {
        let mut config = shell("true");
        config.executable = "/bin/sh".to_string();
        let_assert!(
            Err(ExtractionFailure::NotAllowed(_)) = SubprocessExtractor::from_config(&config)
        );

        config.executable = "bash".to_string();
        let_assert!(
            Err(ExtractionFailure::NotAllowed(_)) = SubprocessExtractor::from_config(&config)
        );
    }

    #[test]
    fn slow_extractor_times_out() {
        let mut config = shell("sleep 5");
        config.timeout_ms = 100;
        let extractor = SubprocessExtractor::from_config(&config).unwrap();
        let started = Instant::now();
        let result = extractor.extract(Path::new("x.go"), "");
        let_assert!(Err(ExtractionFailure::Timeout(100)) = result);
        check!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_children_do_not_hold_the_result() {
        let mut config = shell("sleep 30 & echo []");
        config.timeout_ms = 5_000;
        let extractor = SubprocessExtractor::from_config(&config).unwrap();
        let started = Instant::now();
        let_assert!(Ok(exports) = extractor.extract(Path::new("x.go"), ""));
        check!(exports.is_empty());
        check!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_inside_the_blocking_pool() {
        let extractor = SubprocessExtractor::from_config(&shell("echo []")).unwrap();
        let result = tokio::task::spawn_blocking(move || extractor.extract(Path::new("x.go"), ""))
            .await
            .unwrap();
        let_assert!(Ok(exports) = result);
        check!(exports.is_empty());
    }

    #[test]
    fn oversized_output_is_rejected() {
        let mut config = shell("head -c 100 /dev/zero");
        config.max_output_bytes = 10;
        let extractor = SubprocessExtractor::from_config(&config).unwrap();
        let result = extractor.extract(Path::new("x.go"), "");
        let_assert!(Err(ExtractionFailure::OutputTooLarge(10)) = result);
    }

    #[test]
    fn failures_and_bad_output() {
        let extractor = SubprocessExtractor::from_config(&shell("exit 3")).unwrap();
        let_assert!(Err(ExtractionFailure::Failed(_)) = extractor.extract(Path::new("x.go"), ""));

        let extractor = SubprocessExtractor::from_config(&shell("echo not-json")).unwrap();
        let_assert!(Err(ExtractionFailure::Schema(_)) = extractor.extract(Path::new("x.go"), ""));
    }
}
