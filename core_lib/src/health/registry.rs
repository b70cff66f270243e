//! Registry of check definitions, kept in registration order

use super::spec::CheckSpec;
use crate::error::{HealthError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterMode {
    /// Last registration wins; supports hot reload.
    #[default]
    Overwrite,
    /// Registering an existing name fails with `DuplicateName`.
    Strict,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

/// Writers swap in a fresh list so readers iterate a stable snapshot.
#[derive(Clone, Default)]
pub struct Registry {
    specs: Arc<RwLock<Arc<Vec<Arc<CheckSpec>>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: CheckSpec) -> Result<Registration> {
        self.register_with_mode(spec, RegisterMode::Overwrite)
    }

    pub fn register_with_mode(&self, spec: CheckSpec, mode: RegisterMode) -> Result<Registration> {
        spec.validate()?;

        let mut guard = self.specs.write();
        let mut specs: Vec<Arc<CheckSpec>> = guard.as_ref().clone();

        let outcome = match specs.iter().position(|existing| existing.name == spec.name) {
            Some(_) if mode == RegisterMode::Strict => {
                return Err(HealthError::DuplicateName(spec.name));
            }
            Some(index) => {
                debug!("Replacing check '{}'", spec.name);
                specs[index] = Arc::new(spec);
                Registration::Replaced
            }
            None => {
                info!("Registered check '{}' (critical: {})", spec.name, spec.critical);
                specs.push(Arc::new(spec));
                Registration::Added
            }
        };

        *guard = Arc::new(specs);
        Ok(outcome)
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<CheckSpec>> {
        let mut guard = self.specs.write();
        let index = guard
            .iter()
            .position(|spec| spec.name == name)
            .ok_or_else(|| HealthError::NotFound(name.to_string()))?;

        let mut specs: Vec<Arc<CheckSpec>> = guard.as_ref().clone();
        let removed = specs.remove(index);
        *guard = Arc::new(specs);

        info!("Unregistered check '{}'", name);
        Ok(removed)
    }

    /// Snapshot of all specs in registration order. Iterating it again
    /// yields the same sequence regardless of later registrations.
    pub fn list(&self) -> Arc<Vec<Arc<CheckSpec>>> {
        self.specs.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CheckSpec>> {
        self.specs.read().iter().find(|spec| spec.name == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Specs for `names`, in registration order. Fails on the first unknown name.
    pub fn select(&self, names: &[&str]) -> Result<Vec<Arc<CheckSpec>>> {
        let specs = self.list();

        if let Some(missing) = names.iter().find(|name| !specs.iter().any(|spec| spec.name == **name)) {
            return Err(HealthError::NotFound(missing.to_string()));
        }

        Ok(specs
            .iter()
            .filter(|spec| names.contains(&spec.name.as_str()))
            .cloned()
            .collect())
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.read().iter().map(|spec| spec.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.read().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("checks", &self.names()).finish()
    }
}
