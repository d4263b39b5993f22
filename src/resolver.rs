//! The discovery engine: cache → scan → evaluate → rank → load/validate.

use crate::cache::{CacheEntry, PersistentCache, epoch_millis};
use crate::candidate::{Candidate, Evaluator, read_with_mtime};
use crate::config::DiscoveryConfig;
use crate::diagnostics::{CandidateSummary, NotFoundReport, RejectedCandidate, RejectionReason};
use crate::error::DiscoveryError;
use crate::extract::{AccessDescriptor, ExportDescriptor, ExtractorRegistry, LanguageExtractor};
use crate::loader::{LoadedModule, ModuleLoader, ModuleRegistry, SourceLoader};
use crate::safety::Denylist;
use crate::scan::Scanner;
use crate::scoring::{CustomScorer, ScoringEngine};
use crate::signature::{Signature, SignatureInput, SignatureKey};
use crate::structural::{ConstraintFailure, StructuralView, validate_target};
use anyhow::Context;
use futures::StreamExt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A resolved target.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub path: PathBuf,
    pub relative_path: String,
    pub access: AccessDescriptor,
    pub score: f64,
    pub from_cache: bool,
    module: Arc<LoadedModule>,
    index: usize,
}

impl Discovered {
    /// The validated export.
    pub fn target(&self) -> &dyn StructuralView {
        self.module.members[self.index].view.as_ref()
    }

    pub fn module(&self) -> &LoadedModule {
        &self.module
    }
}

/// A validated member of a loaded module.
#[derive(Debug)]
struct Resolution {
    module: Arc<LoadedModule>,
    index: usize,
    score: f64,
}

/// Load-and-validate step, shared with blocking tasks.
#[derive(Clone)]
struct Resolver {
    loader: Arc<dyn ModuleLoader>,
    registry: Arc<ModuleRegistry>,
    resolution_bonus: f64,
}

impl Resolver {
    fn try_resolve(
        &self,
        candidate: &Candidate,
        signature: &Signature,
    ) -> Result<Resolution, RejectionReason> {
        let matching: Vec<&ExportDescriptor> = candidate.matching_exports(signature).collect();
        if let [export] = matching.as_slice()
            && let Some(resolution) = self.resolve_export(candidate, signature, &export.access())
        {
            return Ok(resolution);
        }

        let module = self
            .registry
            .load_with(
                self.loader.as_ref(),
                &candidate.absolute_path,
                candidate.mtime,
                &candidate.content,
            )
            .map_err(|e| RejectionReason::LoadFailed(format!("{:#}", e)))?;
        if module.members.is_empty() {
            return Err(RejectionReason::NoExports);
        }

        let mut best: Option<(usize, f64)> = None;
        let mut closest: Option<(usize, Vec<ConstraintFailure>)> = None;
        for (index, member) in module.members.iter().enumerate() {
            match validate_target(member.view.as_ref(), member.exported_name(), signature) {
                Ok(score) => {
                    if best.is_none_or(|(_, best_score)| score > best_score) {
                        best = Some((index, score));
                    }
                }
                Err(failures) => {
                    if closest
                        .as_ref()
                        .is_none_or(|(_, current)| distance(&failures) < distance(current))
                    {
                        closest = Some((index, failures));
                    }
                }
            }
        }

        match (best, closest) {
            (Some((index, structural)), _) => Ok(Resolution {
                module,
                index,
                score: candidate.score + structural,
            }),
            (None, Some((index, failures))) => Err(RejectionReason::Constraints {
                member: module.members[index].exported_name().to_string(),
                failures,
            }),
            (None, None) => Err(RejectionReason::NoExports),
        }
    }

    /// Loads and validates the one export static metadata points at.
    fn resolve_export(
        &self,
        candidate: &Candidate,
        signature: &Signature,
        access: &AccessDescriptor,
    ) -> Option<Resolution> {
        let member = match self
            .loader
            .load_export(&candidate.absolute_path, &candidate.content, access)
        {
            Ok(member) => member?,
            Err(e) => {
                debug!(path = %candidate.relative_path, error = %e, "Single export load failed");
                return None;
            }
        };
        let structural =
            validate_target(member.view.as_ref(), member.exported_name(), signature).ok()?;
        let module = LoadedModule {
            path: candidate.absolute_path.clone(),
            members: vec![member],
        };
        Some(Resolution {
            module: Arc::new(module),
            index: 0,
            score: candidate.score + structural + self.resolution_bonus,
        })
    }
}

fn discovered(candidate: &Candidate, resolution: Resolution) -> Discovered {
    Discovered {
        path: candidate.absolute_path.clone(),
        relative_path: candidate.relative_path.clone(),
        access: resolution.module.members[resolution.index].access.clone(),
        score: resolution.score,
        from_cache: false,
        module: resolution.module,
        index: resolution.index,
    }
}

/// How far a failed member is from matching; misnamed members rank last.
fn distance(failures: &[ConstraintFailure]) -> (bool, usize) {
    let misnamed = failures
        .iter()
        .any(|f| matches!(f, ConstraintFailure::Name { .. }));
    (misnamed, failures.len())
}

/// Orders candidates by score, highest first, then by relative path.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
}

fn timed_out(started: Instant, candidates: &[Candidate]) -> DiscoveryError {
    DiscoveryError::Timeout {
        elapsed: started.elapsed(),
        partial: candidates.iter().map(CandidateSummary::from).collect(),
    }
}

/// Builds a [`DiscoveryEngine`].
pub struct DiscoveryEngineBuilder {
    root: PathBuf,
    config: Option<DiscoveryConfig>,
    extractors: Vec<Arc<dyn LanguageExtractor>>,
    loader: Option<Arc<dyn ModuleLoader>>,
    scorers: Vec<(String, CustomScorer)>,
}

impl DiscoveryEngineBuilder {
    /// Uses `config` instead of the root's `.discovery.toml`.
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds an extractor; it wins over built-ins for shared extensions.
    pub fn extractor(mut self, extractor: impl LanguageExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    /// Replaces the default [`SourceLoader`].
    pub fn loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn scorer(
        mut self,
        name: impl Into<String>,
        scorer: impl Fn(&Candidate, &Signature, &str) -> anyhow::Result<f64>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.scorers.push((name.into(), Arc::new(scorer)));
        self
    }

    pub fn build(self) -> Result<DiscoveryEngine, DiscoveryError> {
        let root = std::fs::canonicalize(&self.root)
            .with_context(|| format!("Discovery root {} is not accessible", self.root.display()))?;
        let config = match self.config {
            Some(config) => config,
            None => DiscoveryConfig::load(&root)?,
        };

        let mut extractors = ExtractorRegistry::from_config(&config)?;
        for extractor in self.extractors {
            extractors.register_shared(extractor);
        }

        let mut scoring = ScoringEngine::new(config.scoring.clone(), extractors.clone());
        for (name, scorer) in self.scorers {
            scoring.register(name, move |c, s, t| scorer(c, s, t));
        }
        let scoring = Arc::new(scoring);

        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(SourceLoader::new(extractors.clone())));
        let capacity = NonZeroUsize::new(config.module_registry_size).unwrap_or(NonZeroUsize::MIN);
        let cache = if config.cache.enabled {
            PersistentCache::open(
                config.cache_path(&root),
                config.cache.ttl_secs.map(Duration::from_secs),
            )
        } else {
            PersistentCache::disabled()
        };

        debug!(
            root = %root.display(),
            extractors = ?extractors,
            concurrency = config.concurrency,
            cache = cache.is_enabled(),
            "Discovery engine ready"
        );

        Ok(DiscoveryEngine {
            scanner: Scanner::new(root.clone(), &config, &extractors)?,
            evaluator: Evaluator::new(
                root.clone(),
                extractors,
                Arc::clone(&scoring),
                config.loose_name_matching,
            ),
            denylist: Denylist::new(&config.denylist)?,
            resolver: Resolver {
                loader,
                registry: Arc::new(ModuleRegistry::new(capacity)),
                resolution_bonus: config.scoring.resolution_bonus,
            },
            scoring,
            cache: Arc::new(cache),
            config,
            root,
        })
    }
}

/// Resolves structural signatures to code entities below a root directory.
pub struct DiscoveryEngine {
    root: PathBuf,
    config: DiscoveryConfig,
    scoring: Arc<ScoringEngine>,
    scanner: Scanner,
    evaluator: Evaluator,
    denylist: Denylist,
    resolver: Resolver,
    cache: Arc<PersistentCache>,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("root", &self.root)
            .field("scoring", &self.scoring)
            .field("registry", &self.resolver.registry)
            .field("cache", &self.cache.path())
            .finish_non_exhaustive()
    }
}

impl DiscoveryEngine {
    /// Engine for `root` with its `.discovery.toml`, if any.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DiscoveryError> {
        Self::builder(root).build()
    }

    pub fn builder(root: impl Into<PathBuf>) -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder {
            root: root.into(),
            config: None,
            extractors: Vec::new(),
            loader: None,
            scorers: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.resolver.registry
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    /// Resolves `input` to the best structurally valid target.
    pub async fn resolve(
        &self,
        input: impl Into<SignatureInput>,
    ) -> Result<Discovered, DiscoveryError> {
        let signature = Signature::normalize(input)?;
        let key = signature.cache_key();
        if let Some(found) = self.from_cache(key, &signature).await {
            info!(
                signature = %signature,
                path = %found.relative_path,
                access = %found.access,
                "Resolved from cache"
            );
            return Ok(found);
        }

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);

        let mut candidates = self
            .evaluate_all(&signature, started, deadline.as_mut())
            .await?;
        rank(&mut candidates);

        let mut rejected = Vec::new();
        for candidate in &candidates {
            if let Some(reason) = self.screen(candidate) {
                rejected.push(RejectedCandidate::new(candidate, reason));
                continue;
            }
            let outcome = tokio::select! {
                biased;
                () = &mut deadline => return Err(timed_out(started, &candidates)),
                outcome = self.attempt(candidate, &signature) => outcome,
            };

            match outcome {
                Ok(resolution) => {
                    let found = self.accept(key, candidate, resolution).await;
                    info!(
                        signature = %signature,
                        path = %found.relative_path,
                        access = %found.access,
                        score = found.score,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Resolved"
                    );
                    return Ok(found);
                }
                Err(reason) => {
                    debug!(path = %candidate.relative_path, reason = %reason, "Candidate rejected");
                    rejected.push(RejectedCandidate::new(candidate, reason));
                }
            }
        }

        Err(self.failure(&signature, &candidates, rejected))
    }

    /// Every structurally valid target for `input`, best first.
    ///
    /// Each file contributes its best-matching export at most once. The
    /// persistent cache is neither read nor written. Fails like
    /// [`resolve`](Self::resolve) when nothing validates.
    pub async fn resolve_all(
        &self,
        input: impl Into<SignatureInput>,
    ) -> Result<Vec<Discovered>, DiscoveryError> {
        let signature = Signature::normalize(input)?;
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);

        let mut candidates = self
            .evaluate_all(&signature, started, deadline.as_mut())
            .await?;
        rank(&mut candidates);

        let mut found = Vec::new();
        let mut rejected = Vec::new();
        for candidate in &candidates {
            if let Some(reason) = self.screen(candidate) {
                rejected.push(RejectedCandidate::new(candidate, reason));
                continue;
            }
            let outcome = tokio::select! {
                biased;
                () = &mut deadline => return Err(timed_out(started, &candidates)),
                outcome = self.attempt(candidate, &signature) => outcome,
            };
            match outcome {
                Ok(resolution) => found.push(discovered(candidate, resolution)),
                Err(reason) => rejected.push(RejectedCandidate::new(candidate, reason)),
            }
        }

        if found.is_empty() {
            return Err(self.failure(&signature, &candidates, rejected));
        }
        found.sort_by(|a: &Discovered, b: &Discovered| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        info!(
            signature = %signature,
            matches = found.len(),
            rejected = rejected.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Resolved all matches"
        );
        Ok(found)
    }

    /// Candidate paths the walk yields for `input`, without scoring.
    pub async fn scan(
        &self,
        input: impl Into<SignatureInput>,
    ) -> Result<Vec<CandidateSummary>, DiscoveryError> {
        let signature = Signature::normalize(input)?;
        let paths = self.scanner.scan(&signature, self.config.timeout()).await?;
        Ok(paths
            .iter()
            .map(|path| CandidateSummary::unscored(&self.root, path))
            .collect())
    }

    /// Every evaluated candidate in ranking order, with score breakdowns.
    pub async fn score(
        &self,
        input: impl Into<SignatureInput>,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        let signature = Signature::normalize(input)?;
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);
        let mut candidates = self
            .evaluate_all(&signature, started, deadline.as_mut())
            .await?;
        rank(&mut candidates);
        Ok(candidates)
    }

    /// Deletes the cache document and forgets every loaded module.
    pub fn clear_cache(&self) -> Result<(), DiscoveryError> {
        self.cache.clear()?;
        self.resolver.registry.clear();
        info!(root = %self.root.display(), "Discovery cache cleared");
        Ok(())
    }

    /// Rejects candidates below the threshold or matching the denylist.
    fn screen(&self, candidate: &Candidate) -> Option<RejectionReason> {
        if !self.scoring.passes_threshold(candidate.score) {
            return Some(RejectionReason::BelowThreshold {
                threshold: self.scoring.config().min_candidate_score,
            });
        }
        if let Err(unsafe_match) = self.denylist.check(candidate) {
            debug!(
                path = %candidate.relative_path,
                pattern = %unsafe_match.pattern,
                "Skipping unsafe candidate"
            );
            return Some(RejectionReason::Unsafe {
                pattern: unsafe_match.pattern,
            });
        }
        None
    }

    /// Loads and validates one candidate on the blocking pool.
    ///
    /// A panicking loader or extractor rejects only this candidate.
    async fn attempt(
        &self,
        candidate: &Candidate,
        signature: &Signature,
    ) -> Result<Resolution, RejectionReason> {
        let resolver = self.resolver.clone();
        let task_candidate = candidate.clone();
        let signature = signature.clone();
        tokio::task::spawn_blocking(move || resolver.try_resolve(&task_candidate, &signature))
            .await
            .unwrap_or_else(|e| {
                warn!(path = %candidate.relative_path, error = %e, "Resolution task failed");
                Err(RejectionReason::LoadFailed(format!("load task failed: {}", e)))
            })
    }

    async fn evaluate_all(
        &self,
        signature: &Signature,
        started: Instant,
        mut deadline: Pin<&mut Sleep>,
    ) -> Result<Vec<Candidate>, DiscoveryError> {
        // One clock per call so every candidate shares the recency reference
        let now = SystemTime::now();
        let cancel = CancellationToken::new();
        let _walk = cancel.clone().drop_guard();
        let mut evaluated = std::pin::pin!(self
            .scanner
            .stream(signature, cancel)
            .map(|path| self.evaluator.evaluate(path, signature, now))
            .buffer_unordered(self.config.concurrency.max(1)));

        let mut candidates = Vec::new();
        loop {
            tokio::select! {
                biased;
                () = &mut deadline => return Err(timed_out(started, &candidates)),
                next = evaluated.next() => match next {
                    Some(Some(candidate)) => candidates.push(candidate),
                    Some(None) => {}
                    None => break,
                },
            }
        }
        debug!(
            signature = %signature,
            candidates = candidates.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Evaluated candidates"
        );
        Ok(candidates)
    }

    /// Returns a revalidated cache hit, dropping entries that no longer hold.
    async fn from_cache(&self, key: SignatureKey, signature: &Signature) -> Option<Discovered> {
        let entry = self.cache.lookup(key)?;
        match self.revalidate(&entry, signature).await {
            Some(found) => Some(found),
            None => {
                debug!(path = %entry.path.display(), "Cached target no longer validates");
                self.cache.remove(key);
                None
            }
        }
    }

    async fn revalidate(&self, entry: &CacheEntry, signature: &Signature) -> Option<Discovered> {
        let (bytes, mtime) = read_with_mtime(&entry.path).await.ok()?;
        let content = String::from_utf8(bytes).ok()?;
        let candidate = Candidate::new(&self.root, entry.path.clone(), content, mtime);
        if !self.denylist.is_safe(&candidate) {
            return None;
        }

        let resolver = self.resolver.clone();
        let path = candidate.absolute_path.clone();
        let content = candidate.content;
        let module = tokio::task::spawn_blocking(move || {
            resolver
                .registry
                .load_with(resolver.loader.as_ref(), &path, mtime, &content)
        })
        .await
        .ok()?
        .ok()?;

        let (index, member) = module.member(&entry.access)?;
        validate_target(member.view.as_ref(), member.exported_name(), signature).ok()?;
        Some(Discovered {
            path: entry.path.clone(),
            relative_path: candidate.relative_path,
            access: entry.access.clone(),
            score: entry.score,
            from_cache: true,
            module,
            index,
        })
    }

    async fn accept(
        &self,
        key: SignatureKey,
        candidate: &Candidate,
        resolution: Resolution,
    ) -> Discovered {
        let found = discovered(candidate, resolution);
        if !self.cache.is_enabled() {
            return found;
        }
        self.cache.store(
            key,
            CacheEntry {
                path: found.path.clone(),
                access: found.access.clone(),
                mtime: epoch_millis(candidate.mtime),
                timestamp: epoch_millis(SystemTime::now()),
                ttl: None,
                score: found.score,
            },
        );
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.save()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist discovery cache"),
            Err(e) => warn!(error = %e, "Cache save task failed"),
        }
        found
    }

    fn failure(
        &self,
        signature: &Signature,
        candidates: &[Candidate],
        rejected: Vec<RejectedCandidate>,
    ) -> DiscoveryError {
        let loadable: Vec<&RejectedCandidate> = rejected
            .iter()
            .filter(|r| {
                !r.reasons
                    .iter()
                    .any(|reason| matches!(reason, RejectionReason::BelowThreshold { .. }))
            })
            .collect();
        if !loadable.is_empty() && loadable.iter().all(|r| r.is_unsafe()) {
            return DiscoveryError::UnsafeCandidates {
                signature: signature.to_string(),
                skipped: loadable.into_iter().cloned().collect(),
            };
        }

        let observed = candidates.iter().flat_map(|candidate| {
            candidate
                .metadata
                .iter()
                .flatten()
                .map(|export| (export.name.as_str(), candidate.relative_path.as_str()))
        });
        let report =
            NotFoundReport::build(signature, candidates.len(), rejected, observed, &self.config);
        debug!(signature = %signature, rejected = report.rejected.len(), "Discovery failed");
        DiscoveryError::NotFound(Box::new(report))
    }
}
