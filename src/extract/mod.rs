//! Static export metadata: the extractor contract and built-in extractors.
//!
//! Extractors turn file text into [`ExportDescriptor`]s. They never mutate
//! shared state and any failure, including a panic, is folded into "no
//! metadata" by the [`ExtractorRegistry`].

pub mod javascript;
pub mod python;
pub mod rust;
pub mod subprocess;

use crate::candidate::Candidate;
use crate::config::DiscoveryConfig;
use crate::signature::{EntityKind, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

pub use javascript::JavaScriptExtractor;
pub use python::PythonExtractor;
pub use rust::RustExtractor;
pub use subprocess::SubprocessExtractor;

/// How an export is reached from its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// The module's default export.
    Default,
    /// A named export.
    Named,
    /// The module value itself.
    Direct,
}

/// Statically extracted description of one export.
///
/// This is also the fixed schema subprocess extractors emit (camelCase JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDescriptor {
    pub access_kind: AccessKind,
    pub exported_name: String,
    pub kind: EntityKind,
    /// Declared name of the entity (may differ from `exported_name`).
    pub name: String,
    #[serde(default)]
    pub methods: BTreeSet<String>,
    #[serde(default)]
    pub properties: BTreeSet<String>,
    /// Properties only visible on a constructed instance.
    #[serde(default)]
    pub instance_properties: BTreeSet<String>,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    /// Bare decorator or attribute names applied to the declaration.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub decorators: BTreeSet<String>,
    /// Required constructor arguments, when known.
    #[serde(default)]
    pub constructor_arity: Option<usize>,
}

impl ExportDescriptor {
    pub fn new(access_kind: AccessKind, exported_name: &str, kind: EntityKind, name: &str) -> Self {
        Self {
            access_kind,
            exported_name: exported_name.to_string(),
            kind,
            name: name.to_string(),
            methods: BTreeSet::new(),
            properties: BTreeSet::new(),
            instance_properties: BTreeSet::new(),
            extends: None,
            implements: Vec::new(),
            decorators: BTreeSet::new(),
            constructor_arity: None,
        }
    }

    pub fn access(&self) -> AccessDescriptor {
        match self.access_kind {
            AccessKind::Default => AccessDescriptor::Default,
            AccessKind::Named => AccessDescriptor::Named(self.exported_name.clone()),
            AccessKind::Direct => AccessDescriptor::Direct,
        }
    }
}

/// Persistable handle to an export within a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum AccessDescriptor {
    Default,
    Named(String),
    Direct,
}

impl fmt::Display for AccessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default export"),
            Self::Named(name) => write!(f, "export '{}'", name),
            Self::Direct => f.write_str("module value"),
        }
    }
}

/// Why an extractor produced no metadata.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("executable '{0}' is not allowlisted")]
    NotAllowed(String),
    #[error("extractor timed out after {0}ms")]
    Timeout(u128),
    #[error("extractor output exceeded {0} bytes")]
    OutputTooLarge(usize),
    #[error("extractor exited unsuccessfully: {0}")]
    Failed(String),
    #[error("extractor output did not match the export schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("extractor I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-language metadata extractor.
pub trait LanguageExtractor: Send + Sync {
    /// Language identifier used in configuration.
    fn language(&self) -> &str;

    /// Lowercase file extensions handled, without the leading dot.
    fn extensions(&self) -> &[String];

    fn extract(
        &self,
        path: &Path,
        content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure>;

    /// Additive language-specific bonus or penalty.
    fn language_score(&self, _candidate: &Candidate, _signature: &Signature) -> f64 {
        0.0
    }
}

/// Active extractors, looked up by file extension.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn LanguageExtractor>>,
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field(
                "languages",
                &self.extractors.iter().map(|e| e.language()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry for the languages and subprocess extractors in `config`.
    pub fn from_config(config: &DiscoveryConfig) -> crate::error::Result<Self> {
        let mut registry = Self::new();
        for language in &config.languages {
            match language.as_str() {
                "javascript" => registry.register(JavaScriptExtractor::javascript()),
                "typescript" => registry.register(JavaScriptExtractor::typescript()),
                "python" => registry.register(PythonExtractor::new()),
                "rust" => registry.register(RustExtractor::new()),
                other => tracing::warn!(language = %other, "Unknown built-in language, ignoring"),
            }
        }
        for definition in &config.extractors {
            registry.register(SubprocessExtractor::from_config(definition)?);
        }
        Ok(registry)
    }

    /// Registers an extractor; later registrations win for shared extensions.
    pub fn register(&mut self, extractor: impl LanguageExtractor + 'static) {
        self.register_shared(Arc::new(extractor));
    }

    pub fn register_shared(&mut self, extractor: Arc<dyn LanguageExtractor>) {
        self.extractors.insert(0, extractor);
    }

    pub fn for_path(&self, path: &Path) -> Option<&Arc<dyn LanguageExtractor>> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.extractors
            .iter()
            .find(|e| e.extensions().iter().any(|ext| *ext == extension))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    pub fn extensions(&self) -> BTreeSet<String> {
        self.extractors
            .iter()
            .flat_map(|e| e.extensions().iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Extracts metadata, treating every failure as "no metadata".
    pub fn extract(&self, path: &Path, content: &str) -> Option<Vec<ExportDescriptor>> {
        let extractor = self.for_path(path)?;
        let outcome = catch_unwind(AssertUnwindSafe(|| extractor.extract(path, content)));
        match outcome {
            Ok(Ok(exports)) => Some(exports),
            Ok(Err(failure)) => {
                tracing::debug!(
                    path = %path.display(),
                    language = extractor.language(),
                    error = %failure,
                    "Extraction failed, continuing without metadata"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    language = extractor.language(),
                    "Extractor panicked, continuing without metadata"
                );
                None
            }
        }
    }

    pub fn language_score(&self, candidate: &Candidate, signature: &Signature) -> f64 {
        self.for_path(&candidate.absolute_path)
            .map_or(0.0, |e| e.language_score(candidate, signature))
    }
}

/// Strips generic arguments and module qualifiers: `a.b.Base<T>` → `Base`.
pub(crate) fn simple_type_name(raw: &str) -> &str {
    let raw = raw.trim();
    let without_generics = raw.split(['<', '[', '(']).next().unwrap_or(raw).trim();
    without_generics
        .rsplit(['.', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(without_generics)
}

/// Counts top-level comma-separated parameters, excluding receivers and defaults.
pub(crate) fn required_params(params: &str, receivers: &[&str]) -> usize {
    split_top_level(params)
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let name = p
                .split([':', '='])
                .next()
                .unwrap_or(p)
                .trim()
                .trim_start_matches("mut ");
            !receivers.contains(&name)
        })
        .filter(|p| {
            !p.replace("=>", "").contains('=') && !p.starts_with('*') && !p.starts_with("...")
        })
        .filter(|p| !p.split(':').next().unwrap_or("").trim().ends_with('?'))
        .count()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut previous = None;
    for (i, c) in text.char_indices() {
        let arrow = previous == Some('=');
        previous = Some(c);
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            // `=>` in arrow types closes nothing
            '>' if arrow => {}
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Text between the first `(` and its matching `)`, possibly spanning lines.
pub(crate) fn parenthesized(lines: &[&str], start: usize) -> Option<String> {
    let mut depth = 0i32;
    let mut collected = String::new();
    let mut opened = false;
    for line in lines.iter().skip(start).take(32) {
        for c in line.chars() {
            match c {
                '(' => {
                    depth += 1;
                    if !opened {
                        opened = true;
                        continue;
                    }
                }
                ')' => {
                    depth -= 1;
                    if opened && depth == 0 {
                        return Some(collected);
                    }
                }
                _ => {}
            }
            if opened {
                collected.push(c);
            }
        }
        if opened {
            collected.push(' ');
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};
    use rstest::rstest;

    #[rstest]
    #[case("Base", "Base")]
    #[case("models.Base", "Base")]
    #[case("Base<T>", "Base")]
    #[case("std::fmt::Display", "Display")]
    #[case("Generic[T]", "Generic")]
    fn simple_type_names(#[case] raw: &str, #[case] expected: &str) {
        check!(simple_type_name(raw) == expected);
    }

    #[rstest]
    #[case("", &[], 0)]
    #[case("self", &["self"], 0)]
    #[case("self, a, b=1, *args, **kwargs", &["self"], 1)]
    #[case("a: number, b?: string, c = 2", &[], 1)]
    #[case("&self, map: HashMap<K, V>", &["&self", "self"], 1)]
    #[case("cb: (x: number) => void, label: string", &[], 2)]
    fn parameter_counts(#[case] params: &str, #[case] receivers: &[&str], #[case] expected: usize) {
        check!(required_params(params, receivers) == expected);
    }

    #[test]
    fn parenthesized_spans_lines() {
        let lines = ["def __init__(self,", "    name,", "    age=3):"];
        let_assert!(Some(params) = parenthesized(&lines, 0));
        check!(params.split_whitespace().collect::<String>() == "self,name,age=3");
    }

    #[test]
    fn registry_dispatches_by_extension() {
        let config = DiscoveryConfig::default();
        let registry = ExtractorRegistry::from_config(&config).unwrap();
        check!(registry.supports(Path::new("src/app.ts")));
        check!(registry.supports(Path::new("src/app.PY")));
        check!(!registry.supports(Path::new("README.md")));
        check!(registry.extensions().contains("rs"));
    }

    #[test]
    fn access_descriptor_serializes_with_tag() {
        let json = serde_json::to_string(&AccessDescriptor::Named("Calculator".into())).unwrap();
        check!(json == r#"{"kind":"named","name":"Calculator"}"#);
        let json = serde_json::to_string(&AccessDescriptor::Default).unwrap();
        check!(json == r#"{"kind":"default"}"#);
    }
}
