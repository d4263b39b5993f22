//! Engine configuration loaded from an optional `.discovery.toml`.
//!
//! Every field has a default, so an absent or partial file is fine. Values are
//! read once per engine and stay immutable during a discovery call.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up at the discovery root.
pub const CONFIG_FILE_NAME: &str = ".discovery.toml";

/// Default cache document, relative to the discovery root.
pub const DEFAULT_CACHE_FILE: &str = ".discovery-cache.json";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum directory depth below the root.
    pub max_depth: usize,
    /// Bound on concurrent file reads, extractions and walker threads.
    pub concurrency: usize,
    /// Overall budget for one discovery call.
    pub timeout_ms: u64,
    /// Directory names never entered.
    pub skip_directories: Vec<String>,
    /// Directory names skipped unless the signature is `internal`.
    pub test_directories: Vec<String>,
    /// File globs never considered.
    pub skip_files: Vec<String>,
    /// File globs skipped unless the signature is `internal`.
    pub test_files: Vec<String>,
    pub respect_gitignore: bool,
    /// Active built-in languages (`javascript`, `typescript`, `python`, `rust`).
    pub languages: Vec<String>,
    /// Score files whose name fails the quick check instead of skipping them.
    pub loose_name_matching: bool,
    /// Capacity of the loaded-module registry.
    pub module_registry_size: usize,
    /// Rejected candidates listed in a not-found report.
    pub diagnostic_limit: usize,
    /// Regex denylist checked against raw text before loading.
    pub denylist: Vec<String>,
    pub cache: CacheConfig,
    pub scoring: ScoringConfig,
    /// Subprocess-backed extractors for additional languages.
    pub extractors: Vec<SubprocessConfig>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            concurrency: default_concurrency(),
            timeout_ms: 30_000,
            skip_directories: strings(&[
                "node_modules",
                "target",
                "dist",
                "build",
                "out",
                "coverage",
                "vendor",
                "__pycache__",
                "venv",
                ".venv",
                ".git",
                ".hg",
                ".svn",
                ".next",
                ".cache",
            ]),
            test_directories: strings(&[
                "test",
                "tests",
                "__tests__",
                "spec",
                "specs",
                "fixtures",
                "__fixtures__",
                "mocks",
                "__mocks__",
            ]),
            skip_files: strings(&["*.d.ts", "*.min.js", "* copy.*", "* copy [0-9]*.*"]),
            test_files: strings(&[
                "*.test.*",
                "*.spec.*",
                "test_*.py",
                "*_test.py",
                "conftest.py",
                "*_test.go",
            ]),
            respect_gitignore: true,
            languages: strings(&["javascript", "typescript", "python", "rust"]),
            loose_name_matching: false,
            module_registry_size: 64,
            diagnostic_limit: 5,
            denylist: default_denylist(),
            cache: CacheConfig::default(),
            scoring: ScoringConfig::default(),
            extractors: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Loads `.discovery.toml` from `root`, falling back to defaults when absent.
    pub fn load(root: &Path) -> crate::error::Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn from_toml(content: &str) -> crate::error::Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.concurrency > 0, "concurrency must be at least 1");
        anyhow::ensure!(
            config.module_registry_size > 0,
            "module_registry_size must be at least 1"
        );
        Ok(config)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Cache document location, resolved against `root`.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        let expanded = expand_tilde(&self.cache.file);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }
}

/// Persistent cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub file: String,
    /// Entries older than this are stale even when the mtime still matches.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: DEFAULT_CACHE_FILE.to_string(),
            ttl_secs: None,
        }
    }
}

/// Weighted rule table used by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Substrings of the relative path that raise the score.
    pub path_positive: BTreeMap<String, f64>,
    /// Substrings of the relative path that lower the score (weights are negative).
    pub path_negative: BTreeMap<String, f64>,
    pub filename: FilenameWeights,
    /// Weight per file extension, without the leading dot.
    pub extensions: BTreeMap<String, f64>,
    /// Declaration of the requested kind naming the target.
    pub type_hint_weight: f64,
    /// Export markers; only the strongest present marker counts.
    pub export_hints: BTreeMap<String, f64>,
    pub name_mention_weight: f64,
    pub name_mention_cap: usize,
    pub method_mention_weight: f64,
    pub method_mention_cap: usize,
    pub recency_half_life_hours: f64,
    pub recency_max_bonus: f64,
    pub path_hint_weight: f64,
    pub loose_name_penalty: f64,
    /// Bonus for candidates resolved through static metadata alone.
    pub resolution_bonus: f64,
    /// Candidates scoring at or below this are never loaded.
    pub min_candidate_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            path_positive: weights(&[
                ("/src/", 12.0),
                ("/lib/", 6.0),
                ("/app/", 4.0),
                ("/core/", 4.0),
                ("/services/", 3.0),
            ]),
            path_negative: weights(&[
                ("/test/", -25.0),
                ("/tests/", -25.0),
                ("/__tests__/", -25.0),
                ("/spec/", -20.0),
                ("/fixtures/", -30.0),
                ("/__fixtures__/", -30.0),
                ("/mocks/", -30.0),
                ("/__mocks__/", -30.0),
                ("/examples/", -15.0),
                ("/demo/", -15.0),
                ("/deprecated/", -20.0),
                ("/legacy/", -10.0),
                ("/tmp/", -20.0),
            ]),
            filename: FilenameWeights::default(),
            extensions: weights(&[
                ("ts", 10.0),
                ("tsx", 8.0),
                ("js", 8.0),
                ("jsx", 6.0),
                ("mjs", 6.0),
                ("cjs", 5.0),
                ("py", 10.0),
                ("rs", 10.0),
            ]),
            type_hint_weight: 15.0,
            export_hints: weights(&[
                ("export default", 6.0),
                ("module.exports", 6.0),
                ("export ", 4.0),
                ("exports.", 4.0),
                ("pub ", 4.0),
                ("__all__", 3.0),
            ]),
            name_mention_weight: 1.0,
            name_mention_cap: 5,
            method_mention_weight: 2.0,
            method_mention_cap: 3,
            recency_half_life_hours: 72.0,
            recency_max_bonus: 5.0,
            path_hint_weight: 20.0,
            loose_name_penalty: -20.0,
            resolution_bonus: 10.0,
            min_candidate_score: 10.0,
        }
    }
}

/// Filename tiers; only the highest matching tier applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilenameWeights {
    pub exact: f64,
    pub case_insensitive: f64,
    pub pattern: f64,
    pub partial: f64,
}

impl Default for FilenameWeights {
    fn default() -> Self {
        Self {
            exact: 50.0,
            case_insensitive: 40.0,
            pattern: 30.0,
            partial: 15.0,
        }
    }
}

/// A subprocess-backed extractor definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubprocessConfig {
    pub language: String,
    /// Bare executable name; must appear in `allowed_executables`.
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub extensions: Vec<String>,
    #[serde(default = "default_subprocess_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_allowed_executables")]
    pub allowed_executables: Vec<String>,
}

const fn default_subprocess_timeout_ms() -> u64 {
    5_000
}

const fn default_max_output_bytes() -> usize {
    1024 * 1024
}

pub(crate) fn default_allowed_executables() -> Vec<String> {
    strings(&["node", "python3", "python", "go", "java", "ruby", "php", "dotnet"])
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .clamp(4, 32)
}

fn default_denylist() -> Vec<String> {
    strings(&[
        r"\bprocess\.exit\s*\(",
        r"\bprocess\.kill\s*\(",
        r#"require\(\s*['"](node:)?child_process['"]\s*\)"#,
        r#"from\s+['"](node:)?child_process['"]"#,
        r"\b(execSync|spawnSync|execFileSync)\s*\(",
        r"\bfs\.(rmSync|rmdirSync|unlinkSync)\s*\(",
        r"\brm\s+-rf\b",
        r"\bos\.(system|remove|unlink|rmdir|kill|_exit)\s*\(",
        r"\bsys\.exit\s*\(",
        r"\bsubprocess\.(run|call|Popen|check_call|check_output)\s*\(",
        r"\bshutil\.rmtree\s*\(",
        r"\bstd::process::(exit|abort)\s*\(",
        r"\bCommand::new\s*\(",
        r"\bremove_dir_all\s*\(",
    ])
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_string()).collect()
}

fn weights(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
    values
        .iter()
        .map(|(key, weight)| ((*key).to_string(), *weight))
        .collect()
}

/// Expand tilde (`~`) in paths to the user's home directory.
///
/// Returns `Cow::Borrowed` if no expansion needed, `Cow::Owned` if expanded.
pub(crate) fn expand_tilde(path: &str) -> Cow<'_, str> {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return Cow::Owned(home.join(stripped).display().to_string());
        }
    } else if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return Cow::Owned(home.display().to_string());
    }
    Cow::Borrowed(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};

    #[test]
    fn partial_file_keeps_defaults() {
        let config = DiscoveryConfig::from_toml(
            r#"
            max_depth = 3
            loose_name_matching = true

            [scoring]
            min_candidate_score = 0.0

            [cache]
            ttl_secs = 60
            "#,
        )
        .unwrap();

        check!(config.max_depth == 3);
        check!(config.loose_name_matching);
        check!(config.scoring.min_candidate_score == 0.0);
        check!(config.scoring.filename.exact == 50.0);
        check!(config.cache.enabled);
        check!(config.cache.ttl_secs == Some(60));
        check!(config.skip_directories.contains(&"node_modules".to_string()));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let_assert!(Err(_) = DiscoveryConfig::from_toml("concurrency = 0"));
    }

    #[test]
    fn subprocess_extractors_get_defaults() {
        let config = DiscoveryConfig::from_toml(
            r#"
            [[extractors]]
            language = "go"
            executable = "go"
            args = ["run", "./tools/go-ast"]
            extensions = ["go"]
            "#,
        )
        .unwrap();
        let_assert!([extractor] = config.extractors.as_slice());
        check!(extractor.timeout_ms == 5_000);
        check!(extractor.allowed_executables.contains(&"go".to_string()));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiscoveryConfig::load(dir.path()).unwrap();
        check!(config == DiscoveryConfig::default());
    }

    #[test]
    fn relative_cache_path_resolves_against_root() {
        let config = DiscoveryConfig::default();
        let root = Path::new("/project");
        check!(config.cache_path(root) == root.join(DEFAULT_CACHE_FILE));
    }

    #[test]
    fn expand_tilde_leaves_plain_paths_alone() {
        check!(expand_tilde("cache.json") == "cache.json");
        check!(expand_tilde("/abs/cache.json") == "/abs/cache.json");
    }
}
