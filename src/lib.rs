//! Structural discovery: find code entities by what they look like, not where they live.
//!
//! A [`Signature`] describes the wanted entity (name, kind, methods,
//! properties, inheritance). [`DiscoveryEngine::resolve`] walks the source
//! tree, scores candidate files, validates the best ones structurally and
//! remembers the answer in a persistent, mtime-checked cache.

pub mod cache;
pub mod candidate;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod loader;
pub mod resolver;
pub mod safety;
pub mod scan;
pub mod scoring;
pub mod signature;
pub mod structural;
pub mod tracing;

pub use candidate::Candidate;
pub use config::DiscoveryConfig;
pub use diagnostics::{CandidateSummary, NotFoundReport, RejectedCandidate, RejectionReason};
pub use error::DiscoveryError;
pub use extract::{AccessDescriptor, ExportDescriptor, LanguageExtractor};
pub use loader::{LoadedMember, LoadedModule, ModuleLoader};
pub use resolver::{Discovered, DiscoveryEngine, DiscoveryEngineBuilder};
pub use signature::{EntityKind, NameMatcher, Signature, SignatureInput, SignatureKey};
pub use structural::{ConstraintFailure, StructuralView};
