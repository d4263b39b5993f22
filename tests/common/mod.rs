//! Shared test fixtures and utilities for integration tests.
//!
//! # Test Isolation Strategy
//!
//! Every test works in its own temporary source tree, so the discovery cache
//! document and module registry never leak between tests. Engines are built
//! with an explicit [`DiscoveryConfig`] rather than reading `.discovery.toml`.
//!
//! # Available Fixtures
//!
//! - `workspace`: An empty [`TempWorkspace`]
//! - `calculator_project`: A small JavaScript project with a real
//!   implementation under `src/` and look-alike copies under test fixtures

use rstest::fixture;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use structural_discovery::{DiscoveryConfig, DiscoveryEngine};
use tempfile::TempDir;

/// A temporary source tree for test isolation.
///
/// Provides basic filesystem operations within a temp directory that is
/// automatically cleaned up when dropped.
///
/// # Example
///
/// ```ignore
/// let workspace = TempWorkspace::new();
/// workspace.create_file("src/Calculator.js", "export class Calculator {}");
/// assert!(workspace.path().join("src/Calculator.js").exists());
/// ```
#[allow(dead_code)] // Methods used across different integration test crates
pub struct TempWorkspace {
    _temp: TempDir,
    root: PathBuf,
}

#[allow(dead_code)] // Methods used across different integration test crates
impl TempWorkspace {
    /// Creates a new empty temporary workspace.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let root = temp
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp directory");
        Self { _temp: temp, root }
    }

    /// Returns the root path of this workspace.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates a directory (and all parent directories) within this workspace.
    ///
    /// # Panics
    /// Panics if directory creation fails.
    pub fn create_dir(&self, path: &str) {
        let full_path = self.root.join(path);
        std::fs::create_dir_all(&full_path)
            .unwrap_or_else(|e| panic!("Failed to create directory '{}': {}", path, e));
    }

    /// Creates a file with the given content within this workspace.
    ///
    /// Parent directories are created automatically if they don't exist.
    ///
    /// # Panics
    /// Panics if file creation fails.
    pub fn create_file(&self, path: &str, content: &str) {
        let full_path = self.root.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap_or_else(|e| {
                panic!("Failed to create parent directory for '{}': {}", path, e)
            });
        }
        std::fs::write(&full_path, content)
            .unwrap_or_else(|e| panic!("Failed to write file '{}': {}", path, e));
    }

    /// Moves a file within the workspace, creating the destination's parents.
    pub fn move_file(&self, from: &str, to: &str) {
        let dest = self.root.join(to);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create destination directory");
        }
        std::fs::rename(self.root.join(from), &dest)
            .unwrap_or_else(|e| panic!("Failed to move '{}' to '{}': {}", from, to, e));
    }

    /// Sets a file's mtime `offset` after its current one.
    ///
    /// Rewrites within the same filesystem timestamp tick would otherwise look
    /// unchanged.
    pub fn bump_mtime(&self, path: &str, offset: Duration) {
        let full_path = self.root.join(path);
        let file = std::fs::File::options()
            .write(true)
            .open(&full_path)
            .unwrap_or_else(|e| panic!("Failed to open '{}': {}", path, e));
        let current = file
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        file.set_modified(current + offset)
            .unwrap_or_else(|e| panic!("Failed to set mtime of '{}': {}", path, e));
    }

    /// Sets a file's mtime to exactly `time`.
    pub fn set_mtime(&self, path: &str, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(self.root.join(path))
            .and_then(|file| file.set_modified(time))
            .unwrap_or_else(|e| panic!("Failed to set mtime of '{}': {}", path, e));
    }

    /// Path of the default cache document.
    pub fn cache_file(&self) -> PathBuf {
        self.root
            .join(structural_discovery::config::DEFAULT_CACHE_FILE)
    }

    /// Builds an engine over this workspace with `config`.
    pub fn engine_with(&self, config: DiscoveryConfig) -> DiscoveryEngine {
        DiscoveryEngine::builder(self.path())
            .config(config)
            .build()
            .expect("Failed to build discovery engine")
    }

    /// Builds an engine over this workspace with default settings.
    pub fn engine(&self) -> DiscoveryEngine {
        self.engine_with(DiscoveryConfig::default())
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

pub const CALCULATOR: &str = r"
export class Calculator {
  constructor() {
    this.memory = 0;
  }

  add(a, b) {
    return a + b;
  }

  subtract(a, b) {
    return a - b;
  }
}
";

/// Same shape as [`CALCULATOR`], for copies placed in test locations.
pub const CALCULATOR_COPY: &str = r"
export class Calculator {
  add(a, b) {
    return a + b;
  }

  subtract(a, b) {
    return a - b;
  }
}
";

#[fixture]
pub fn workspace() -> TempWorkspace {
    structural_discovery::tracing::init();
    TempWorkspace::new()
}

/// The real `Calculator` under `src/` with a look-alike under `tests/fixtures/`.
#[fixture]
pub fn calculator_project() -> TempWorkspace {
    let workspace = workspace();
    workspace.create_file("src/Calculator.js", CALCULATOR);
    workspace.create_file("tests/fixtures/Calculator.js", CALCULATOR_COPY);
    workspace.create_file("src/util/format.js", "export function format(n) { return `${n}`; }\n");
    workspace
}
