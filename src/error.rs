//! Error handling types and utilities.

use crate::diagnostics::{CandidateSummary, NotFoundReport, RejectedCandidate};
use std::time::Duration;

/// A specialized Result type for internal plumbing.
///
/// This is an alias for `anyhow::Result` with context added via `.context()` and
/// `.with_context()` methods throughout the codebase. Public operations return
/// [`DiscoveryError`] instead.
pub type Result<T> = anyhow::Result<T>;

/// Failure modes of a discovery call.
///
/// Extraction failures and cache corruption never surface here; both are
/// recovered where they happen and only logged.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The signature input was malformed.
    #[error("invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// No candidate passed structural validation.
    #[error("{0}")]
    NotFound(Box<NotFoundReport>),

    /// The overall time budget ran out before a candidate validated.
    #[error(
        "discovery timed out after {}ms ({} candidate(s) gathered)",
        elapsed.as_millis(),
        partial.len()
    )]
    Timeout {
        elapsed: Duration,
        partial: Vec<CandidateSummary>,
    },

    /// Every loadable candidate matched the safety denylist.
    #[error(
        "all {} loadable candidate(s) for {signature} were skipped by the safety denylist",
        skipped.len()
    )]
    UnsafeCandidates {
        signature: String,
        skipped: Vec<RejectedCandidate>,
    },

    /// Unexpected I/O or runtime failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DiscoveryError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            reason: reason.into(),
        }
    }

    /// Returns the not-found report, if this is a not-found failure.
    pub fn not_found_report(&self) -> Option<&NotFoundReport> {
        match self {
            Self::NotFound(report) => Some(report),
            _ => None,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
