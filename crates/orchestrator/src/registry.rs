//! Module registry - the catalog of known modules
//!
//! Built once at startup and passed by reference to the planner and
//! executor. Iteration order is always sorted by name.

use crate::error::{Error, Result};
use crate::module::Module;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared handle to a registered module
pub type ModuleRef = Arc<dyn Module>;

/// Catalog mapping module name to descriptor
#[derive(Debug, Default)]
pub struct Registry {
    modules: BTreeMap<String, ModuleRef>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module
    ///
    /// Fails with [`Error::DuplicateModule`] if the name is taken.
    pub fn register<M: Module + 'static>(&mut self, module: M) -> Result<()> {
        self.register_arc(Arc::new(module))
    }

    /// Register an already shared module
    pub fn register_arc(&mut self, module: ModuleRef) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(Error::DuplicateModule { name });
        }
        log::trace!("Registered module {name}");
        self.modules.insert(name, module);
        Ok(())
    }

    /// Look up a module by name
    pub fn get(&self, name: &str) -> Result<&ModuleRef> {
        self.modules.get(name).ok_or_else(|| Error::UnknownModule {
            name: name.to_string(),
            required_by: None,
        })
    }

    /// Snapshot of all modules, sorted by name
    pub fn all(&self) -> Vec<ModuleRef> {
        self.modules.values().cloned().collect()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Check if a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
