//! Resource resolution: local discovery, catalog install, import.
//!
//! A [`ResourceResolver`] turns a configuration unit into exactly one
//! [`ResolvedResource`] or fails before any verb is invoked.  Results are
//! cached for the lifetime of the owning set processor, so resolving the same
//! (type, module, version window) twice touches the backend once.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use semver::Version;

use super::backend::ResourceBackend;
use super::resource::{ResolvedResource, ResourceOrigin};
use crate::config::{ConfigurationUnit, ModuleSpec};
use crate::error::{ProcessorError, ResolveError, Result};
use crate::logging::Diagnostics;

/// Cache key: lowercase type and module name plus the version window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    resource_type: String,
    module: Option<String>,
    min_version: Option<Version>,
    max_version: Option<Version>,
    required_version: Option<Version>,
}

impl CacheKey {
    fn new(unit: &ConfigurationUnit, module: Option<&ModuleSpec>) -> Self {
        Self {
            resource_type: unit.resource_type.to_ascii_lowercase(),
            module: module.map(|m| m.name.to_ascii_lowercase()),
            min_version: module.and_then(|m| m.min_version.clone()),
            max_version: module.and_then(|m| m.max_version.clone()),
            required_version: module.and_then(|m| m.required_version.clone()),
        }
    }
}

/// Resolves units to providers through a [`ResourceBackend`].
///
/// Not safe for concurrent resolution of the same unit; units of one set are
/// processed sequentially.
#[derive(Debug)]
pub struct ResourceResolver {
    backend: Arc<dyn ResourceBackend>,
    diagnostics: Arc<Diagnostics>,
    cache: Mutex<HashMap<CacheKey, Arc<ResolvedResource>>>,
}

impl ResourceResolver {
    /// Create a resolver with an empty cache.
    #[must_use]
    pub fn new(backend: Arc<dyn ResourceBackend>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            backend,
            diagnostics,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached resolutions.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .map_or(0, |cache| cache.len())
    }

    /// Resolve `unit` to a single provider, installing and importing its
    /// module when needed.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::MultipleMatches`] if more than one provider matches.
    /// - [`ResolveError::ResourceNotFound`] if neither the environment nor the
    ///   catalog knows the resource.
    /// - [`ResolveError::InstallFailed`] if the installed module still does
    ///   not expose the resource.
    /// - [`ResolveError::ImportFailure`] if importing the provider fails.
    pub fn resolve(&self, unit: &ConfigurationUnit) -> Result<Arc<ResolvedResource>> {
        self.resolve_inner(unit)
            .map_err(|e| self.diagnostics.report(e))
    }

    fn resolve_inner(&self, unit: &ConfigurationUnit) -> Result<Arc<ResolvedResource>> {
        let module = unit.effective_module()?;
        let key = CacheKey::new(unit, module.as_ref());
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            tracing::debug!(unit = %unit.qualified_name(), "resolution cache hit");
            return Ok(Arc::clone(hit));
        }

        let name = unit.qualified_name();
        self.diagnostics.verbose(&format!(
            "Resolving {name} through the {} backend",
            self.backend.name()
        ));

        let resource = match self.find_unique(unit, module.as_ref())? {
            Some(resource) => resource,
            None => self.install_from_catalog(unit, module.as_ref())?,
        };

        if let Some(path) = &resource.path {
            self.diagnostics
                .verbose(&format!("Importing {} from {}", resource.name, path.display()));
            self.backend
                .import(&resource)
                .map_err(|e| ResolveError::ImportFailure {
                    module: resource
                        .module_name
                        .clone()
                        .unwrap_or_else(|| resource.name.clone()),
                    path: path.display().to_string(),
                    source: Box::new(e),
                })?;
        }

        let resource = Arc::new(resource);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&resource));
        Ok(resource)
    }

    /// Local lookup: `Some` for exactly one match, `None` for none.
    fn find_unique(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<ResolvedResource>> {
        let mut found = self.backend.find_local(unit, module)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => Err(ResolveError::MultipleMatches {
                unit: unit.qualified_name(),
                count,
            }
            .into()),
        }
    }

    fn install_from_catalog(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<ResolvedResource> {
        let name = unit.qualified_name();
        self.diagnostics
            .verbose(&format!("{name} is not available locally; searching the catalog"));
        let candidate = self
            .backend
            .find_in_catalog(unit, module)?
            .ok_or_else(|| ResolveError::ResourceNotFound { unit: name.clone() })?;

        self.diagnostics.info(&format!(
            "Installing module {}{} for {name}",
            candidate.name,
            candidate
                .version
                .as_ref()
                .map_or_else(String::new, |v| format!(" {v}"))
        ));
        self.backend.install(&candidate)?;

        // Pin the retry to the module that was just installed.
        let installed = module.cloned().unwrap_or_else(|| {
            let mut spec = ModuleSpec::named(&candidate.name);
            spec.required_version.clone_from(&candidate.version);
            spec
        });
        let mut resource = self
            .find_unique(unit, Some(&installed))?
            .ok_or_else(|| -> ProcessorError {
                ResolveError::InstallFailed {
                    unit: name,
                    module: candidate.name.clone(),
                }
                .into()
            })?;
        resource.origin = ResourceOrigin::Catalog;
        Ok(resource)
    }
}
