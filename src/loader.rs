//! Module loading and the bounded loaded-module registry.
//!
//! A [`ModuleLoader`] turns a candidate file into [`LoadedMember`]s that can be
//! validated structurally. Loaded modules are kept in the [`ModuleRegistry`],
//! keyed by absolute path and the mtime they were loaded at, so a changed file
//! is always reloaded.

use crate::extract::{AccessDescriptor, ExportDescriptor, ExtractorRegistry};
use crate::structural::{StructuralView, TypeModel};
use anyhow::Context;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::debug;

/// Inheritance chains deeper than this are cut off.
const MAX_INHERITANCE_DEPTH: usize = 16;

/// One reachable export of a loaded module.
#[derive(Debug, Clone)]
pub struct LoadedMember {
    pub access: AccessDescriptor,
    pub view: Arc<dyn StructuralView>,
}

impl LoadedMember {
    /// The name the member is exported under.
    pub fn exported_name(&self) -> &str {
        match &self.access {
            AccessDescriptor::Default => "default",
            AccessDescriptor::Named(name) => name,
            AccessDescriptor::Direct => self.view.name(),
        }
    }
}

/// A module after loading, with every member it exposes.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub members: Vec<LoadedMember>,
}

impl LoadedModule {
    pub fn member(&self, access: &AccessDescriptor) -> Option<(usize, &LoadedMember)> {
        self.members.iter().enumerate().find(|(_, m)| m.access == *access)
    }
}

/// Loads candidate modules into structural views.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path, content: &str) -> crate::error::Result<LoadedModule>;

    /// Loads a single export. The default loads the whole module.
    fn load_export(
        &self,
        path: &Path,
        content: &str,
        access: &AccessDescriptor,
    ) -> crate::error::Result<Option<LoadedMember>> {
        let module = self.load(path, content)?;
        Ok(module.member(access).map(|(_, member)| member.clone()))
    }
}

/// Loader that builds [`TypeModel`]s from extracted metadata.
///
/// Base types exported from the same module are resolved so inherited
/// members count toward validation.
#[derive(Debug, Clone)]
pub struct SourceLoader {
    extractors: ExtractorRegistry,
}

impl SourceLoader {
    pub fn new(extractors: ExtractorRegistry) -> Self {
        Self { extractors }
    }

    fn model(exports: &[ExportDescriptor], descriptor: &ExportDescriptor) -> TypeModel {
        let mut model = TypeModel::from_descriptor(descriptor);
        let mut seen = vec![descriptor.name.as_str()];
        let mut next = descriptor.extends.as_deref();
        while let Some(base) = next {
            if seen.len() > MAX_INHERITANCE_DEPTH || seen.contains(&base) {
                break;
            }
            let Some(parent) = exports.iter().find(|e| e.name == base) else {
                break;
            };
            model.inherit(&TypeModel::from_descriptor(parent));
            seen.push(base);
            next = parent.extends.as_deref();
        }
        model
    }
}

impl ModuleLoader for SourceLoader {
    fn load(&self, path: &Path, content: &str) -> crate::error::Result<LoadedModule> {
        let exports = self
            .extractors
            .extract(path, content)
            .with_context(|| format!("No loadable exports in {}", path.display()))?;
        let members = exports
            .iter()
            .map(|descriptor| LoadedMember {
                access: descriptor.access(),
                view: Arc::new(Self::model(&exports, descriptor)) as Arc<dyn StructuralView>,
            })
            .collect();
        Ok(LoadedModule {
            path: path.to_path_buf(),
            members,
        })
    }
}

/// Bounded LRU of loaded modules keyed by absolute path.
///
/// Each entry remembers the mtime it was loaded at; a lookup with any other
/// mtime evicts the entry.
pub struct ModuleRegistry {
    entries: Mutex<LruCache<PathBuf, (SystemTime, Arc<LoadedModule>)>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.lock();
        f.debug_struct("ModuleRegistry")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<PathBuf, (SystemTime, Arc<LoadedModule>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the module loaded from `path` at exactly `mtime`.
    pub fn get(&self, path: &Path, mtime: SystemTime) -> Option<Arc<LoadedModule>> {
        let mut entries = self.lock();
        let (loaded_at, module) = entries
            .get(path)
            .map(|(loaded_at, module)| (*loaded_at, Arc::clone(module)))?;
        if loaded_at == mtime {
            return Some(module);
        }
        debug!(path = %path.display(), "File changed since load, evicting module");
        entries.pop(path);
        None
    }

    pub fn insert(&self, path: PathBuf, mtime: SystemTime, module: Arc<LoadedModule>) {
        if let Some((evicted, _)) = self.lock().push(path.clone(), (mtime, module))
            && evicted != path
        {
            debug!(path = %evicted.display(), "Module registry full, evicted least recently used");
        }
    }

    /// Returns the registered module, loading and registering it when absent or stale.
    pub fn load_with(
        &self,
        loader: &dyn ModuleLoader,
        path: &Path,
        mtime: SystemTime,
        content: &str,
    ) -> crate::error::Result<Arc<LoadedModule>> {
        if let Some(module) = self.get(path, mtime) {
            return Ok(module);
        }
        let module = Arc::new(loader.load(path, content)?);
        self.insert(path.to_path_buf(), mtime, Arc::clone(&module));
        Ok(module)
    }

    pub fn evict(&self, path: &Path) -> bool {
        self.lock().pop(path).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::signature::EntityKind;
    use assert2::{check, let_assert};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn source_loader() -> SourceLoader {
        SourceLoader::new(ExtractorRegistry::from_config(&DiscoveryConfig::default()).unwrap())
    }

    /// Counts loads so registry hits are observable.
    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModuleLoader for CountingLoader {
        fn load(&self, path: &Path, _content: &str) -> crate::error::Result<LoadedModule> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(LoadedModule {
                path: path.to_path_buf(),
                members: Vec::new(),
            })
        }
    }

    #[test]
    fn source_loader_resolves_local_inheritance() {
        let content = r"
export class Base {
  reset() {}
}
export class Calculator extends Base {
  add(a, b) {}
}
";
        let module = source_loader().load(Path::new("calc.js"), content).unwrap();
        let access = AccessDescriptor::Named("Calculator".into());
        let_assert!(Some((_, member)) = module.member(&access));
        check!(member.view.kind() == EntityKind::Class);
        check!(member.view.has_method("add"));
        check!(member.view.has_method("reset"));
        check!(member.view.extends_type("Base"));
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let content = "export class A extends B {}\nexport class B extends A {}\n";
        let module = source_loader().load(Path::new("cycle.js"), content).unwrap();
        check!(module.members.len() == 2);
    }

    #[test]
    fn unsupported_files_fail_to_load() {
        let_assert!(Err(_) = source_loader().load(Path::new("notes.txt"), "hello"));
    }

    #[test]
    fn load_export_picks_one_member() {
        let content = "export function a() {}\nexport function b() {}\n";
        let access = AccessDescriptor::Named("b".into());
        let_assert!(
            Ok(Some(member)) = source_loader().load_export(Path::new("m.js"), content, &access)
        );
        check!(member.view.name() == "b");
    }

    #[test]
    fn registry_reloads_when_mtime_changes() {
        let registry = ModuleRegistry::new(NonZeroUsize::new(4).unwrap());
        let loader = CountingLoader::default();
        let path = Path::new("/repo/a.js");
        let first = SystemTime::UNIX_EPOCH;
        let second = first + Duration::from_secs(1);

        registry.load_with(&loader, path, first, "").unwrap();
        registry.load_with(&loader, path, first, "").unwrap();
        check!(loader.loads.load(Ordering::SeqCst) == 1);

        registry.load_with(&loader, path, second, "").unwrap();
        check!(loader.loads.load(Ordering::SeqCst) == 2);
        check!(registry.len() == 1);
    }

    #[test]
    fn registry_is_bounded_and_clearable() {
        let registry = ModuleRegistry::new(NonZeroUsize::new(2).unwrap());
        let loader = CountingLoader::default();
        for name in ["a.js", "b.js", "c.js"] {
            registry
                .load_with(&loader, Path::new(name), SystemTime::UNIX_EPOCH, "")
                .unwrap();
        }
        check!(registry.len() == 2);
        check!(registry.get(Path::new("a.js"), SystemTime::UNIX_EPOCH).is_none());
        check!(registry.evict(Path::new("c.js")));
        registry.clear();
        check!(registry.is_empty());
    }
}
