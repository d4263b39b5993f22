//! Rejection bookkeeping and not-found reports.

use crate::candidate::{Candidate, relative_path};
use crate::config::DiscoveryConfig;
use crate::signature::Signature;
use crate::structural::ConstraintFailure;
use rapidfuzz::distance::jaro_winkler;
use std::fmt;
use std::path::Path;

/// Suggestions below this similarity are not shown.
const SUGGESTION_THRESHOLD: f64 = 0.85;
const MAX_SUGGESTIONS: usize = 3;

/// A ranked candidate as reported by `scan`, `score` and timeouts.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub relative_path: String,
    /// `None` when the candidate was never scored.
    pub score: Option<f64>,
}

impl CandidateSummary {
    pub fn unscored(root: &Path, path: &Path) -> Self {
        Self {
            relative_path: relative_path(root, path),
            score: None,
        }
    }
}

impl From<&Candidate> for CandidateSummary {
    fn from(candidate: &Candidate) -> Self {
        Self {
            relative_path: candidate.relative_path.clone(),
            score: Some(candidate.score),
        }
    }
}

/// Why a candidate did not resolve.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    BelowThreshold { threshold: f64 },
    /// Raw text matched a denylist pattern, so the file was never loaded.
    Unsafe { pattern: String },
    LoadFailed(String),
    NoExports,
    /// Failures of the closest member.
    Constraints {
        member: String,
        failures: Vec<ConstraintFailure>,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowThreshold { threshold } => {
                write!(f, "score at or below threshold {}", threshold)
            }
            Self::Unsafe { pattern } => write!(f, "skipped as unsafe (matches `{}`)", pattern),
            Self::LoadFailed(message) => write!(f, "failed to load: {}", message),
            Self::NoExports => f.write_str("no exports found"),
            Self::Constraints { member, failures } => {
                write!(f, "`{}`: ", member)?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", failure)?;
                }
                Ok(())
            }
        }
    }
}

/// A candidate that was considered and rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandidate {
    pub relative_path: String,
    pub score: f64,
    pub reasons: Vec<RejectionReason>,
}

impl RejectedCandidate {
    pub fn new(candidate: &Candidate, reason: RejectionReason) -> Self {
        Self {
            relative_path: candidate.relative_path.clone(),
            score: candidate.score,
            reasons: vec![reason],
        }
    }

    pub fn is_unsafe(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| matches!(r, RejectionReason::Unsafe { .. }))
    }

    /// Whether any reason names the given missing method.
    pub fn missing_method(&self, method: &str) -> bool {
        self.reasons.iter().any(|reason| match reason {
            RejectionReason::Constraints { failures, .. } => failures
                .iter()
                .any(|f| matches!(f, ConstraintFailure::MissingMethod(m) if m == method)),
            _ => false,
        })
    }
}

impl fmt::Display for RejectedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (score {:.1}): ", self.relative_path, self.score)?;
        for (i, reason) in self.reasons.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", reason)?;
        }
        Ok(())
    }
}

/// A similarly named export seen while evaluating candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub name: String,
    pub relative_path: String,
    pub score: f64,
}

/// Everything known about a failed resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct NotFoundReport {
    pub signature: String,
    /// Candidates that survived the filename pre-check and were scored.
    pub candidates_scored: usize,
    /// Top rejections in ranking order.
    pub rejected: Vec<RejectedCandidate>,
    pub suggestions: Vec<Suggestion>,
    pub hints: Vec<String>,
}

impl NotFoundReport {
    /// Builds a report from ranked rejections and the exports observed on the way.
    ///
    /// `observed` pairs each export name with the relative path it came from.
    pub fn build<'a>(
        signature: &Signature,
        candidates_scored: usize,
        mut rejected: Vec<RejectedCandidate>,
        observed: impl IntoIterator<Item = (&'a str, &'a str)>,
        config: &DiscoveryConfig,
    ) -> Self {
        let suggestions = signature
            .name()
            .literal()
            .map(|target| suggest(target, observed))
            .unwrap_or_default();
        let hints = hints(signature, candidates_scored, &rejected, &suggestions, config);
        rejected.truncate(config.diagnostic_limit);
        Self {
            signature: signature.to_string(),
            candidates_scored,
            rejected,
            suggestions,
            hints,
        }
    }
}

impl fmt::Display for NotFoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no candidate matched {} ({} scored)",
            self.signature, self.candidates_scored
        )?;
        for rejected in &self.rejected {
            write!(f, "\n  - {}", rejected)?;
        }
        if !self.suggestions.is_empty() {
            let names: Vec<_> = self
                .suggestions
                .iter()
                .map(|s| format!("{} ({})", s.name, s.relative_path))
                .collect();
            write!(f, "\ndid you mean: {}?", names.join(", "))?;
        }
        for hint in &self.hints {
            write!(f, "\nhint: {}", hint)?;
        }
        Ok(())
    }
}

fn suggest<'a>(
    target: &str,
    observed: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = observed
        .into_iter()
        .filter(|(name, _)| *name != target)
        .map(|(name, path)| Suggestion {
            name: name.to_string(),
            relative_path: path.to_string(),
            score: jaro_winkler::similarity(target.chars(), name.chars()),
        })
        .filter(|s| s.score >= SUGGESTION_THRESHOLD)
        .collect();
    suggestions.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
    suggestions.dedup_by(|a, b| a.name == b.name);
    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

fn hints(
    signature: &Signature,
    candidates_scored: usize,
    rejected: &[RejectedCandidate],
    suggestions: &[Suggestion],
    config: &DiscoveryConfig,
) -> Vec<String> {
    let mut hints = Vec::new();
    if candidates_scored == 0 {
        if config.loose_name_matching {
            hints.push("no files with a supported extension were found below the root".into());
        } else {
            hints.push(
                "no file name resembles the target; \
                 enable `loose_name_matching` to score every file"
                    .into(),
            );
        }
    }
    if !signature.is_internal() {
        hints.push(
            "test, fixture and mock locations were skipped; set `internal` to include them".into(),
        );
    }
    if rejected
        .iter()
        .flat_map(|r| &r.reasons)
        .any(|r| matches!(r, RejectionReason::BelowThreshold { .. }))
    {
        hints.push(format!(
            "some candidates scored at or below `scoring.min_candidate_score` ({})",
            config.scoring.min_candidate_score
        ));
    }
    if rejected.iter().any(RejectedCandidate::is_unsafe) {
        hints.push("some candidates matched the safety denylist and were never loaded".into());
    }
    if let Some(best) = suggestions.first() {
        hints.push(format!(
            "`{}` in {} has a similar name; check the signature name",
            best.name, best.relative_path
        ));
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};

    fn rejected(path: &str, reason: RejectionReason) -> RejectedCandidate {
        RejectedCandidate {
            relative_path: path.into(),
            score: 20.0,
            reasons: vec![reason],
        }
    }

    #[test]
    fn close_names_are_suggested() {
        let observed = [
            ("Calculater", "src/calc.js"),
            ("Parser", "src/parser.js"),
            ("Calculator", "src/other.js"),
        ];
        let report = NotFoundReport::build(
            &Signature::named("Calculator"),
            3,
            Vec::new(),
            observed,
            &DiscoveryConfig::default(),
        );
        let_assert!([suggestion] = report.suggestions.as_slice());
        check!(suggestion.name == "Calculater");
        check!(report.to_string().contains("did you mean: Calculater (src/calc.js)?"));
    }

    #[test]
    fn patterns_get_no_suggestions() {
        let report = NotFoundReport::build(
            &Signature::pattern("^Calc").unwrap(),
            1,
            Vec::new(),
            [("Calculater", "src/calc.js")],
            &DiscoveryConfig::default(),
        );
        check!(report.suggestions.is_empty());
    }

    #[test]
    fn rejections_are_truncated_to_the_limit() {
        let config = DiscoveryConfig {
            diagnostic_limit: 2,
            ..DiscoveryConfig::default()
        };
        let rejections = (0..5)
            .map(|i| rejected(&format!("src/{}.js", i), RejectionReason::NoExports))
            .collect();
        let report = NotFoundReport::build(&Signature::named("X"), 5, rejections, [], &config);
        check!(report.rejected.len() == 2);
        check!(report.rejected[0].relative_path == "src/0.js");
    }

    #[test]
    fn report_names_missing_methods() {
        let reason = RejectionReason::Constraints {
            member: "Calculator".into(),
            failures: vec![ConstraintFailure::MissingMethod("divide".into())],
        };
        let candidate = rejected("src/Calculator.js", reason);
        check!(candidate.missing_method("divide"));
        check!(!candidate.missing_method("add"));

        let report = NotFoundReport::build(
            &Signature::named("Calculator").methods(["divide"]),
            1,
            vec![candidate],
            [],
            &DiscoveryConfig::default(),
        );
        let text = report.to_string();
        check!(text.contains("src/Calculator.js"));
        check!(text.contains("divide"));
    }

    #[test]
    fn hints_follow_the_failure() {
        let report = NotFoundReport::build(
            &Signature::named("X"),
            1,
            vec![
                rejected("a.js", RejectionReason::BelowThreshold { threshold: 10.0 }),
                rejected("b.js", RejectionReason::Unsafe { pattern: "exit".into() }),
            ],
            [],
            &DiscoveryConfig::default(),
        );
        check!(report.hints.iter().any(|h| h.contains("min_candidate_score")));
        check!(report.hints.iter().any(|h| h.contains("denylist")));
        check!(report.hints.iter().any(|h| h.contains("internal")));
    }

    #[test]
    fn empty_scans_suggest_loose_matching() {
        let config = DiscoveryConfig::default();
        let report = NotFoundReport::build(&Signature::named("X"), 0, Vec::new(), [], &config);
        check!(report.hints.iter().any(|h| h.contains("loose_name_matching")));
    }
}
