//! Module loaders
//!
//! A module is whatever file the library watcher picks up. Loading it yields
//! the list of types it exports; the host filters that list down to backend
//! types. Modules here are compiled-in registries keyed by a stable module
//! identifier, so dropping `Snet.Mq.Builtin.dll` (or a plain marker file named
//! `Snet.Mq.Builtin`) into the library directory activates the built-in
//! backends.

use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::ExportedType;
use crate::{HostError, HostResult};

/// Registration function of a compiled-in module
pub type ModuleRegistration = fn() -> Vec<ExportedType>;

/// Resolves module files into exported types
pub trait ModuleLoader: Send + Sync + 'static {
    /// Stable identifier of the module at `path`
    fn module_id(&self, path: &Path) -> String;

    /// Load the module and enumerate its exported types
    fn load(&self, path: &Path) -> HostResult<Vec<ExportedType>>;

    /// Identifiers of modules this loader can resolve, if known up front
    fn available(&self) -> Vec<String> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static Module Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Loader backed by compiled-in registration functions
#[derive(Default, Clone)]
pub struct StaticModuleLoader {
    modules: BTreeMap<String, ModuleRegistration>,
}

impl StaticModuleLoader {
    /// An empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that knows the built-in backends
    pub fn with_builtin() -> Self {
        Self::new().with_module(crate::builtin::MODULE_ID, crate::builtin::register)
    }

    /// Add a module
    pub fn with_module(mut self, id: impl Into<String>, register: ModuleRegistration) -> Self {
        self.modules.insert(id.into(), register);
        self
    }

    fn resolve(&self, path: &Path) -> Option<(&str, ModuleRegistration)> {
        let file_name = path.file_name()?.to_str()?;
        if let Some((id, register)) = self.modules.get_key_value(file_name) {
            return Some((id.as_str(), *register));
        }
        let stem = path.file_stem()?.to_str()?;
        self.modules
            .get_key_value(stem)
            .map(|(id, register)| (id.as_str(), *register))
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn module_id(&self, path: &Path) -> String {
        if let Some((id, _)) = self.resolve(path) {
            return id.to_string();
        }
        path.file_stem()
            .or_else(|| path.file_name())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn load(&self, path: &Path) -> HostResult<Vec<ExportedType>> {
        let (_, register) = self
            .resolve(path)
            .ok_or_else(|| HostError::ModuleLoad(format!("unknown module {}", path.display())))?;
        Ok(register())
    }

    fn available(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticModuleLoader")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
