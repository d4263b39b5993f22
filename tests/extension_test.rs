//! Custom extractors and loaders plugged into the engine.

mod common;

use assert2::{check, let_assert};
use common::{CALCULATOR_COPY, TempWorkspace, calculator_project, workspace};
use rstest::rstest;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use structural_discovery::extract::{AccessKind, ExtractionFailure};
use structural_discovery::{
    AccessDescriptor, DiscoveryEngine, EntityKind, ExportDescriptor, LanguageExtractor,
    LoadedMember, LoadedModule, ModuleLoader, Signature, StructuralView,
};

/// Reports one struct per `type X struct` line.
struct GoStructs {
    extensions: Vec<String>,
}

impl LanguageExtractor for GoStructs {
    fn language(&self) -> &str {
        "go"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn extract(
        &self,
        _path: &Path,
        content: &str,
    ) -> Result<Vec<ExportDescriptor>, ExtractionFailure> {
        Ok(content
            .lines()
            .filter_map(|line| line.strip_prefix("type ")?.strip_suffix(" struct {}"))
            .map(|name| {
                let mut export =
                    ExportDescriptor::new(AccessKind::Named, name, EntityKind::Class, name);
                export.methods.insert("Serve".into());
                export
            })
            .collect())
    }
}

#[rstest]
#[tokio::test]
async fn custom_extractors_add_languages(workspace: TempWorkspace) {
    workspace.create_file("pkg/server.go", "package pkg\n\ntype Server struct {}\n");
    let engine = DiscoveryEngine::builder(workspace.path())
        .extractor(GoStructs {
            extensions: vec!["go".into()],
        })
        .build()
        .unwrap();

    let signature = Signature::named("Server").kind(EntityKind::Class).methods(["Serve"]);
    let_assert!(Ok(found) = engine.resolve(signature).await);
    check!(found.relative_path == "pkg/server.go");
    check!(found.access == AccessDescriptor::Named("Server".into()));
}

/// A view standing in for a runtime-reflected value.
#[derive(Debug)]
struct ReflectedCalculator;

impl StructuralView for ReflectedCalculator {
    fn kind(&self) -> EntityKind {
        EntityKind::Class
    }

    fn name(&self) -> &str {
        "Calculator"
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "add" | "subtract" | "reflect")
    }

    fn has_property(&self, _name: &str) -> bool {
        false
    }

    fn extends_type(&self, _base: &str) -> bool {
        false
    }
}

#[derive(Default)]
struct ReflectingLoader {
    loads: AtomicUsize,
}

impl ModuleLoader for ReflectingLoader {
    fn load(&self, path: &Path, _content: &str) -> anyhow::Result<LoadedModule> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedModule {
            path: path.to_path_buf(),
            members: vec![LoadedMember {
                access: AccessDescriptor::Named("Calculator".into()),
                view: Arc::new(ReflectedCalculator),
            }],
        })
    }
}

#[rstest]
#[tokio::test]
async fn custom_loaders_supply_the_target(calculator_project: TempWorkspace) {
    let engine = DiscoveryEngine::builder(calculator_project.path())
        .loader(ReflectingLoader::default())
        .build()
        .unwrap();

    let signature = Signature::named("Calculator").methods(["reflect"]);
    let_assert!(Ok(found) = engine.resolve(signature).await);
    check!(found.relative_path == "src/Calculator.js");
    check!(found.target().has_method("reflect"));
}

/// Panics for files under `broken/`, reflects everything else.
#[derive(Default)]
struct FragileLoader {
    inner: ReflectingLoader,
}

impl ModuleLoader for FragileLoader {
    fn load(&self, path: &Path, content: &str) -> anyhow::Result<LoadedModule> {
        if path.components().any(|c| c.as_os_str() == "broken") {
            panic!("loader crashed on {}", path.display());
        }
        self.inner.load(path, content)
    }
}

#[rstest]
#[tokio::test]
async fn panicking_loader_rejects_only_its_candidate(workspace: TempWorkspace) {
    workspace.create_file("lib/broken/Calculator.js", CALCULATOR_COPY);
    workspace.create_file("lib/sound/Calculator.js", CALCULATOR_COPY);
    let mtime = SystemTime::now() - Duration::from_secs(3600);
    workspace.set_mtime("lib/broken/Calculator.js", mtime);
    workspace.set_mtime("lib/sound/Calculator.js", mtime);
    let engine = DiscoveryEngine::builder(workspace.path())
        .loader(FragileLoader::default())
        .build()
        .unwrap();

    let signature = Signature::named("Calculator").methods(["reflect"]);
    let_assert!(Ok(found) = engine.resolve(signature.clone()).await);
    check!(found.relative_path == "lib/sound/Calculator.js");

    std::fs::remove_file(workspace.path().join("lib/sound/Calculator.js")).unwrap();
    engine.clear_cache().unwrap();
    let_assert!(Err(error) = engine.resolve(signature).await);
    let_assert!(Some(report) = error.not_found_report());
    let_assert!([rejected] = report.rejected.as_slice());
    check!(rejected.relative_path == "lib/broken/Calculator.js");
    check!(rejected.to_string().contains("load task failed"));
}

#[rstest]
#[tokio::test]
async fn config_file_at_root_is_honored(calculator_project: TempWorkspace) {
    calculator_project.create_file(
        ".discovery.toml",
        r#"
languages = ["python"]

[cache]
enabled = false
"#,
    );
    let engine = DiscoveryEngine::new(calculator_project.path()).unwrap();
    check!(!engine.cache().is_enabled());

    let_assert!(Err(error) = engine.resolve("Calculator").await);
    let_assert!(Some(report) = error.not_found_report());
    check!(report.candidates_scored == 0);
}
