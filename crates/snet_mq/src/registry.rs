//! Plugin type registry

use dashmap::DashMap;

use crate::backend::{BackendFactory, ExportedType};

/// A registered backend type
#[derive(Clone)]
pub struct RegisteredType {
    /// Fully qualified type name
    pub name: String,
    /// Identifier of the module that exported it
    pub module: String,
    pub(crate) factory: BackendFactory,
}

impl std::fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredType")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish()
    }
}

/// Type name → backend factory
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: DashMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hostable export; returns false for non-backend or abstract types
    pub fn register(&self, module: &str, export: ExportedType) -> bool {
        if !export.is_hostable() {
            return false;
        }
        let Some(factory) = export.factory else {
            return false;
        };
        self.types.insert(
            export.name.clone(),
            RegisteredType {
                name: export.name,
                module: module.to_string(),
                factory,
            },
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<RegisteredType> {
        self.types.get(name).map(|t| t.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Remove every type whose name contains `ident` or whose module is `ident`
    pub fn remove_matching(&self, ident: &str) -> Vec<String> {
        if ident.is_empty() {
            return Vec::new();
        }
        let names: Vec<String> = self
            .types
            .iter()
            .filter(|t| t.name.contains(ident) || t.module == ident)
            .map(|t| t.key().clone())
            .collect();
        names
            .into_iter()
            .filter(|name| self.types.remove(name).is_some())
            .collect()
    }

    /// Sorted type names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
