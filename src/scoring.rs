//! Candidate scoring and ranking heuristics.
//!
//! Scoring is a pure, additive function of a candidate's path, file name and
//! raw text. It runs before anything is loaded so low-quality candidates can
//! be discarded cheaply. Every factor lands in a [`ScoreBreakdown`] so a
//! ranking can be explained.

use crate::candidate::Candidate;
use crate::config::ScoringConfig;
use crate::extract::ExtractorRegistry;
use crate::signature::{EntityKind, NameMatcher, Signature};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tracing::warn;

/// A user-supplied scoring function. Errors and panics contribute zero.
pub type CustomScorer =
    Arc<dyn Fn(&Candidate, &Signature, &str) -> anyhow::Result<f64> + Send + Sync>;

/// Total score plus the points contributed by each factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub total: f64,
    pub factors: BTreeMap<String, f64>,
}

impl ScoreBreakdown {
    pub fn add(&mut self, factor: &str, points: f64) {
        if points == 0.0 || !points.is_finite() {
            return;
        }
        *self.factors.entry(factor.to_string()).or_default() += points;
        self.total += points;
    }

    /// Points for one factor, zero when it did not apply.
    pub fn get(&self, factor: &str) -> f64 {
        self.factors.get(factor).copied().unwrap_or_default()
    }
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.total)?;
        if !self.factors.is_empty() {
            let parts: Vec<String> = self
                .factors
                .iter()
                .map(|(factor, points)| format!("{factor} {points:+.1}"))
                .collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

/// How closely a file name matches the signature name.
///
/// Ordered from weakest to strongest so tiers compare naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilenameMatch {
    /// One normalized name contains the other.
    Partial,
    /// Prefix/suffix match, or the name pattern matches the stem.
    Pattern,
    /// Equal ignoring case and `_`/`-` separators.
    CaseInsensitive,
    Exact,
}

/// Classifies `file_name` against the signature name.
///
/// Only the stem before the first `.` is compared, so `Calculator.test.js`
/// still counts as an exact match for `Calculator`.
pub fn filename_match(file_name: &str, matcher: &NameMatcher) -> Option<FilenameMatch> {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    if stem.is_empty() {
        return None;
    }
    let Some(name) = matcher.literal() else {
        return matcher.matches(stem).then_some(FilenameMatch::Pattern);
    };

    if stem == name {
        return Some(FilenameMatch::Exact);
    }
    let stem_norm = normalize_identifier(stem);
    let name_norm = normalize_identifier(name);
    if stem_norm.is_empty() || name_norm.is_empty() {
        None
    } else if stem_norm == name_norm {
        Some(FilenameMatch::CaseInsensitive)
    } else if stem_norm.starts_with(&name_norm) || stem_norm.ends_with(&name_norm) {
        Some(FilenameMatch::Pattern)
    } else if stem_norm.contains(&name_norm)
        || (stem_norm.len() >= 3 && name_norm.contains(&stem_norm))
    {
        Some(FilenameMatch::Partial)
    } else {
        None
    }
}

/// Lowercases and drops separators: `user_service` and `UserService` agree.
fn normalize_identifier(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Recency bonus: `max_bonus * 2^(-age_hours / half_life_hours)`.
///
/// Age counts in whole hours, so scores stay stable between calls made
/// within the same hour. Future modification times count as age zero; the
/// result always lies in `[0, max_bonus]`.
pub fn recency_bonus(
    mtime: SystemTime,
    now: SystemTime,
    half_life_hours: f64,
    max_bonus: f64,
) -> f64 {
    if half_life_hours <= 0.0 || max_bonus <= 0.0 {
        return 0.0;
    }
    let age_hours = now
        .duration_since(mtime)
        .map(|age| (age.as_secs() / 3600) as f64)
        .unwrap_or(0.0);
    (max_bonus * (-age_hours / half_life_hours).exp2()).clamp(0.0, max_bonus)
}

static ANY_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    declaration_regex(&[
        "class", "struct", "function", "def", "fn", "func", "interface", "trait", "protocol",
        "enum", "const", "let", "var", "static", "mod", "module",
    ])
});
static CLASS_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| declaration_regex(&["class", "struct"]));
static FUNCTION_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| declaration_regex(&["function", "def", "fn", "func"]));
static INTERFACE_DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| declaration_regex(&["interface", "trait", "protocol", "class"]));
static ENUM_DECLARATION: LazyLock<Regex> = LazyLock::new(|| declaration_regex(&["enum", "class"]));
static VALUE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    declaration_regex(&["const", "let", "var", "static", "mod", "module", "object"])
});

fn declaration_regex(keywords: &[&str]) -> Regex {
    let pattern = format!(r"\b(?:{})\s+\*?\s*([A-Za-z_$][\w$]*)", keywords.join("|"));
    Regex::new(&pattern).expect("declaration keywords form a valid regex")
}

fn declarations_for(kind: Option<EntityKind>) -> &'static Regex {
    match kind {
        None => &ANY_DECLARATION,
        Some(EntityKind::Class) => &CLASS_DECLARATION,
        Some(EntityKind::Function) => &FUNCTION_DECLARATION,
        Some(EntityKind::Interface) => &INTERFACE_DECLARATION,
        Some(EntityKind::Enum) => &ENUM_DECLARATION,
        Some(EntityKind::Object | EntityKind::Module) => &VALUE_DECLARATION,
    }
}

/// Counts whole-word occurrences of `word`, stopping at `cap`.
fn count_mentions(content: &str, word: &str, cap: usize) -> usize {
    if cap == 0 || word.is_empty() {
        return 0;
    }
    let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(word))) else {
        return 0;
    };
    re.find_iter(content).take(cap).count()
}

/// Computes explainable scores for candidates.
#[derive(Clone)]
pub struct ScoringEngine {
    config: Arc<ScoringConfig>,
    extractors: ExtractorRegistry,
    custom: Vec<(String, CustomScorer)>,
}

impl fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("config", &self.config)
            .field(
                "custom",
                &self.custom.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, extractors: ExtractorRegistry) -> Self {
        Self {
            config: Arc::new(config),
            extractors,
            custom: Vec::new(),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Appends a custom scorer; scorers run in registration order.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        scorer: impl Fn(&Candidate, &Signature, &str) -> anyhow::Result<f64>
        + Send
        + Sync
        + 'static,
    ) {
        self.custom.push((name.into(), Arc::new(scorer)));
    }

    /// Whether a total clears the minimum candidate score.
    pub fn passes_threshold(&self, total: f64) -> bool {
        total > self.config.min_candidate_score
    }

    pub fn score(
        &self,
        candidate: &Candidate,
        signature: &Signature,
        content: &str,
    ) -> ScoreBreakdown {
        self.score_at(candidate, signature, content, SystemTime::now())
    }

    /// Scores against an explicit clock, for deterministic recency.
    pub fn score_at(
        &self,
        candidate: &Candidate,
        signature: &Signature,
        content: &str,
        now: SystemTime,
    ) -> ScoreBreakdown {
        let config = &*self.config;
        let mut breakdown = ScoreBreakdown::default();

        let path = format!("/{}", candidate.relative_path.to_lowercase());
        let path_points: f64 = config
            .path_positive
            .iter()
            .chain(&config.path_negative)
            .filter(|(needle, _)| path.contains(&needle.to_lowercase()))
            .map(|(_, weight)| weight)
            .sum();
        breakdown.add("path", path_points);

        let tier = filename_match(&candidate.file_name, signature.name());
        breakdown.add(
            "filename",
            match tier {
                Some(FilenameMatch::Exact) => config.filename.exact,
                Some(FilenameMatch::CaseInsensitive) => config.filename.case_insensitive,
                Some(FilenameMatch::Pattern) => config.filename.pattern,
                Some(FilenameMatch::Partial) => config.filename.partial,
                None => 0.0,
            },
        );

        let extension = candidate
            .absolute_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        breakdown.add(
            "extension",
            config.extensions.get(&extension).copied().unwrap_or_default(),
        );

        let declared = declarations_for(signature.requested_kind())
            .captures_iter(content)
            .any(|caps| signature.name().matches(&caps[1]));
        if declared {
            breakdown.add("type_hint", config.type_hint_weight);
        }

        let export_hint = config
            .export_hints
            .iter()
            .filter(|(marker, _)| content.contains(marker.as_str()))
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max);
        breakdown.add("export_hint", export_hint);

        let name_mentions = match signature.name() {
            NameMatcher::Exact(name) => count_mentions(content, name, config.name_mention_cap),
            NameMatcher::Pattern(re) => re.find_iter(content).take(config.name_mention_cap).count(),
        };
        breakdown.add("name_mentions", name_mentions as f64 * config.name_mention_weight);

        let method_mentions: usize = signature
            .required_methods()
            .iter()
            .map(|method| count_mentions(content, method, config.method_mention_cap))
            .sum();
        breakdown.add(
            "method_mentions",
            method_mentions as f64 * config.method_mention_weight,
        );

        let decorator_mentions: usize = signature
            .required_decorators()
            .iter()
            .map(|decorator| count_mentions(content, decorator, config.method_mention_cap))
            .sum();
        breakdown.add(
            "decorator_mentions",
            decorator_mentions as f64 * config.method_mention_weight,
        );

        breakdown.add(
            "recency",
            recency_bonus(
                candidate.mtime,
                now,
                config.recency_half_life_hours,
                config.recency_max_bonus,
            ),
        );

        if let Some(hint) = signature.hint()
            && candidate
                .relative_path
                .to_lowercase()
                .contains(&hint.to_lowercase())
        {
            breakdown.add("path_hint", config.path_hint_weight);
        }

        breakdown.add(
            "language",
            self.extractors.language_score(candidate, signature),
        );

        if !candidate.quick_name_matched {
            breakdown.add("loose_name", config.loose_name_penalty);
        }

        for (name, scorer) in &self.custom {
            match catch_unwind(AssertUnwindSafe(|| scorer(candidate, signature, content))) {
                Ok(Ok(points)) => breakdown.add(&format!("custom:{name}"), points),
                Ok(Err(error)) => warn!(
                    scorer = %name,
                    path = %candidate.relative_path,
                    error = %error,
                    "Custom scorer failed, contributing 0"
                ),
                Err(_) => warn!(
                    scorer = %name,
                    path = %candidate.relative_path,
                    "Custom scorer panicked, contributing 0"
                ),
            }
        }

        breakdown
    }
}
