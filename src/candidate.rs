//! Per-file evaluation: filename pre-check, read, extract, score.

use crate::extract::{ExportDescriptor, ExtractorRegistry};
use crate::scoring::{ScoreBreakdown, ScoringEngine, filename_match};
use crate::signature::Signature;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// A file considered as a possible match for a signature.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub absolute_path: PathBuf,
    /// Path below the discovery root, always `/`-separated.
    pub relative_path: String,
    pub file_name: String,
    pub content: String,
    pub mtime: SystemTime,
    /// Whether the file name passed the cheap pre-check.
    pub quick_name_matched: bool,
    /// Static export metadata, when an extractor produced any.
    pub metadata: Option<Vec<ExportDescriptor>>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl Candidate {
    /// Builds an unscored candidate for `absolute_path` below `root`.
    pub fn new(root: &Path, absolute_path: PathBuf, content: String, mtime: SystemTime) -> Self {
        let file_name = absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_path = relative_path(root, &absolute_path);
        Self {
            absolute_path,
            relative_path,
            file_name,
            content,
            mtime,
            quick_name_matched: true,
            metadata: None,
            score: 0.0,
            breakdown: ScoreBreakdown::default(),
        }
    }

    /// Exports whose declared or exported name satisfies the signature name.
    pub fn matching_exports<'a>(
        &'a self,
        signature: &'a Signature,
    ) -> impl Iterator<Item = &'a ExportDescriptor> + 'a {
        self.metadata.iter().flatten().filter(|export| {
            signature.name().matches(&export.name)
                || signature.name().matches(&export.exported_name)
        })
    }
}

/// `path` relative to `root`, joined with `/` regardless of platform.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads a file along with the mtime of the handle it was read through.
///
/// The stat comes first, so a concurrent write can only make the recorded
/// mtime older than the content, never newer.
pub(crate) async fn read_with_mtime(path: &Path) -> std::io::Result<(Vec<u8>, SystemTime)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mtime = file.metadata().await?.modified()?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok((bytes, mtime))
}

/// Turns candidate paths into scored [`Candidate`]s.
#[derive(Debug, Clone)]
pub struct Evaluator {
    root: PathBuf,
    extractors: ExtractorRegistry,
    scoring: Arc<ScoringEngine>,
    loose_name_matching: bool,
}

impl Evaluator {
    pub fn new(
        root: PathBuf,
        extractors: ExtractorRegistry,
        scoring: Arc<ScoringEngine>,
        loose_name_matching: bool,
    ) -> Self {
        Self {
            root,
            extractors,
            scoring,
            loose_name_matching,
        }
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Evaluates one path, scoring recency against `now`.
    ///
    /// Returns `None` when the filename pre-check fails (and loose matching is
    /// off) or the file cannot be read as UTF-8 text.
    pub async fn evaluate(
        &self,
        path: PathBuf,
        signature: &Signature,
        now: SystemTime,
    ) -> Option<Candidate> {
        let file_name = path.file_name()?.to_str()?;
        let quick_name_matched = filename_match(file_name, signature.name()).is_some();
        if !quick_name_matched && !self.loose_name_matching {
            return None;
        }

        let (bytes, mtime) = match read_with_mtime(&path).await {
            Ok(read) => read,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable candidate");
                return None;
            }
        };
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path = %path.display(), "Skipping non-UTF-8 candidate");
            return None;
        };

        let mut candidate = Candidate::new(&self.root, path, content, mtime);
        candidate.quick_name_matched = quick_name_matched;

        let extractors = self.extractors.clone();
        let scoring = Arc::clone(&self.scoring);
        let signature = signature.clone();
        let scored = tokio::task::spawn_blocking(move || {
            candidate.metadata = extractors.extract(&candidate.absolute_path, &candidate.content);
            let breakdown = scoring.score_at(&candidate, &signature, &candidate.content, now);
            candidate.score = breakdown.total;
            candidate.breakdown = breakdown;
            candidate
        })
        .await;

        match scored {
            Ok(candidate) => {
                debug!(
                    path = %candidate.relative_path,
                    score = candidate.score,
                    exports = candidate.metadata.as_ref().map_or(0, Vec::len),
                    "Evaluated candidate"
                );
                Some(candidate)
            }
            Err(e) => {
                debug!(error = %e, "Candidate evaluation task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use assert2::{check, let_assert};

    fn evaluator(root: &Path, loose: bool) -> Evaluator {
        let config = DiscoveryConfig::default();
        let extractors = ExtractorRegistry::from_config(&config).unwrap();
        let scoring = Arc::new(ScoringEngine::new(config.scoring, extractors.clone()));
        Evaluator::new(root.to_path_buf(), extractors, scoring, loose)
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/repo");
        check!(relative_path(root, &root.join("src").join("app.ts")) == "src/app.ts");
    }

    #[tokio::test]
    async fn evaluates_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Calculator.js");
        std::fs::write(&path, "export class Calculator {\n  add(a, b) {}\n}\n").unwrap();

        let signature = Signature::named("Calculator");
        let evaluated = evaluator(dir.path(), false)
            .evaluate(path, &signature, SystemTime::now())
            .await;
        let_assert!(Some(candidate) = evaluated);
        check!(candidate.relative_path == "Calculator.js");
        check!(candidate.quick_name_matched);
        check!(candidate.score > 0.0);
        check!(candidate.matching_exports(&signature).count() == 1);
    }

    #[tokio::test]
    async fn name_precheck_skips_unless_loose() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helpers.js");
        std::fs::write(&path, "export class Calculator {}\n").unwrap();
        let signature = Signature::named("Calculator");

        let strict = evaluator(dir.path(), false)
            .evaluate(path.clone(), &signature, SystemTime::now())
            .await;
        check!(strict.is_none());

        let loose = evaluator(dir.path(), true)
            .evaluate(path, &signature, SystemTime::now())
            .await;
        let_assert!(Some(candidate) = loose);
        check!(!candidate.quick_name_matched);
        check!(candidate.breakdown.get("loose_name") < 0.0);
    }

    #[tokio::test]
    async fn binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Calculator.js");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        check!(
            evaluator(dir.path(), false)
                .evaluate(path, &Signature::named("Calculator"), SystemTime::now())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn content_and_mtime_come_from_one_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Calculator.js");
        std::fs::write(&path, "export class Calculator {}\n").unwrap();
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(mtime))
            .unwrap();

        let_assert!(Ok((bytes, recorded)) = read_with_mtime(&path).await);
        check!(bytes == b"export class Calculator {}\n");
        check!(recorded == mtime);

        let evaluated = evaluator(dir.path(), false)
            .evaluate(path, &Signature::named("Calculator"), SystemTime::now())
            .await;
        let_assert!(Some(candidate) = evaluated);
        check!(candidate.mtime == mtime);
    }
}
