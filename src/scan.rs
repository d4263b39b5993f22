//! Candidate file discovery below the root.
//!
//! The walk runs on the `ignore` crate's parallel walker inside a blocking
//! task and streams paths through a bounded channel, so evaluation can start
//! before the walk finishes and a cancelled discovery stops the walk early.

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::extract::ExtractorRegistry;
use crate::signature::Signature;
use ahash::AHashSet;
use anyhow::Context;
use futures::{Stream, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder, WalkState};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Paths buffered between the walker and the evaluator.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct Filters {
    extensions: BTreeSet<String>,
    skip_directories: AHashSet<String>,
    test_directories: AHashSet<String>,
    skip_files: GlobSet,
    test_files: GlobSet,
}

impl Filters {
    fn enters_directory(&self, entry: &DirEntry, internal: bool) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if self.skip_directories.contains(name.as_ref()) {
            return false;
        }
        internal || !self.test_directories.contains(name.as_ref())
    }

    fn accepts_file(&self, path: &Path, internal: bool) -> bool {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_ascii_lowercase()) {
            return false;
        }
        let Some(file_name) = path.file_name() else {
            return false;
        };
        if self.skip_files.is_match(file_name) {
            return false;
        }
        internal || !self.test_files.is_match(file_name)
    }
}

/// Walks the tree for files an active extractor understands.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    max_depth: usize,
    threads: usize,
    respect_gitignore: bool,
    filters: Arc<Filters>,
}

impl Scanner {
    pub fn new(
        root: PathBuf,
        config: &DiscoveryConfig,
        extractors: &ExtractorRegistry,
    ) -> crate::error::Result<Self> {
        let filters = Filters {
            extensions: extractors.extensions(),
            skip_directories: config.skip_directories.iter().cloned().collect(),
            test_directories: config.test_directories.iter().cloned().collect(),
            skip_files: glob_set(&config.skip_files).context("Invalid skip_files glob")?,
            test_files: glob_set(&config.test_files).context("Invalid test_files glob")?,
        };
        Ok(Self {
            root,
            max_depth: config.max_depth,
            threads: config.concurrency,
            respect_gitignore: config.respect_gitignore,
            filters: Arc::new(filters),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` would be yielded for `signature`, ignoring directory rules.
    pub fn accepts(&self, path: &Path, signature: &Signature) -> bool {
        self.filters.accepts_file(path, signature.is_internal())
    }

    /// Streams candidate paths until the walk ends or `cancel` fires.
    pub fn stream(
        &self,
        signature: &Signature,
        cancel: CancellationToken,
    ) -> impl Stream<Item = PathBuf> + Send + 'static {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(CHANNEL_CAPACITY);
        let internal = signature.is_internal();
        let walker = self.walker(internal);
        let filters = Arc::clone(&self.filters);
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            walker.run(|| {
                let tx = tx.clone();
                let filters = Arc::clone(&filters);
                let cancel = cancel.clone();
                Box::new(move |entry| {
                    if cancel.is_cancelled() {
                        return WalkState::Quit;
                    }
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            trace!(error = %e, "Skipping unreadable entry");
                            return WalkState::Continue;
                        }
                    };
                    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                        return WalkState::Continue;
                    }
                    if !filters.accepts_file(entry.path(), internal) {
                        return WalkState::Continue;
                    }
                    match tx.blocking_send(entry.into_path()) {
                        Ok(()) => WalkState::Continue,
                        Err(_) => WalkState::Quit,
                    }
                })
            });
            debug!(
                root = %root.display(),
                elapsed_ms = started.elapsed().as_millis(),
                "Candidate walk finished"
            );
        });

        futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
    }

    /// Collects every candidate path within `budget`.
    pub async fn scan(
        &self,
        signature: &Signature,
        budget: Duration,
    ) -> Result<Vec<PathBuf>, DiscoveryError> {
        let started = Instant::now();
        let cancel = CancellationToken::new();
        let mut stream = Box::pin(self.stream(signature, cancel.clone()));
        let mut paths: Vec<PathBuf> = Vec::new();
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = &mut deadline => {
                    cancel.cancel();
                    let partial = paths
                        .iter()
                        .map(|p| crate::diagnostics::CandidateSummary::unscored(&self.root, p))
                        .collect();
                    return Err(DiscoveryError::Timeout {
                        elapsed: started.elapsed(),
                        partial,
                    });
                }
                next = stream.next() => match next {
                    Some(path) => paths.push(path),
                    None => break,
                },
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn walker(&self, internal: bool) -> ignore::WalkParallel {
        let filters = Arc::clone(&self.filters);
        WalkBuilder::new(&self.root)
            .max_depth(Some(self.max_depth))
            .hidden(true)
            .parents(self.respect_gitignore)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .git_global(false)
            .require_git(false)
            .follow_links(false)
            .threads(self.threads)
            .filter_entry(move |entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return filters.enters_directory(entry, internal);
                }
                true
            })
            .build_parallel()
    }
}

fn glob_set(patterns: &[String]) -> crate::error::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Bad glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}
