//! The seam between the backend-neutral processors and a concrete backend.
use std::fmt;
use std::path::Path;

use super::Verb;
use super::resource::{
    CatalogModule, ExportedInstance, ModuleInfo, ResolvedResource, SetOutcome,
};
use crate::config::{ConfigurationUnit, ModuleSpec};
use crate::error::{InvokeError, Result};
use crate::value::ValueSet;

/// Discovery, installation and invocation of resources for one backend.
///
/// Implementations normalise their native result shapes into [`ValueSet`]
/// before returning; nothing backend-specific crosses this trait.
pub trait ResourceBackend: Send + Sync + fmt::Debug {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Every locally available provider of the unit's resource type that
    /// satisfies `module`.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery itself fails (e.g. a module conflict).
    fn find_local(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Vec<ResolvedResource>>;

    /// Search the catalog for a module that provides the unit's resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    fn find_in_catalog(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<CatalogModule>>;

    /// Install a catalog module into the environment's module path.
    ///
    /// # Errors
    ///
    /// Returns an error if installation fails.
    fn install(&self, module: &CatalogModule) -> Result<()>;

    /// Save a catalog module into `directory` without installing it and
    /// describe what was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    fn save(&self, module: &CatalogModule, directory: &Path) -> Result<Option<ModuleInfo>>;

    /// Describe the module that owns `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host query fails.
    fn module_info(&self, resource: &ResolvedResource) -> Result<Option<ModuleInfo>>;

    /// Import the provider's implementing file before first use.
    ///
    /// # Errors
    ///
    /// Returns the host's error; the resolver wraps it as an import failure.
    fn import(&self, resource: &ResolvedResource) -> Result<()>;

    /// Read the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or its result is malformed.
    fn get(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<ValueSet>;

    /// Check whether the current state matches the unit's settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or no boolean result is produced.
    fn test(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<bool>;

    /// Apply the unit's settings.
    ///
    /// # Errors
    ///
    /// Returns an error attributed to the settings or to the provider.
    fn set(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<SetOutcome>;

    /// Enumerate every instance the provider knows about.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::NotSupported`] by default.
    fn export(
        &self,
        resource: &ResolvedResource,
        unit: &ConfigurationUnit,
    ) -> Result<Vec<ExportedInstance>> {
        let _ = resource;
        Err(InvokeError::NotSupported {
            verb: Verb::Export,
            unit: unit.qualified_name(),
        }
        .into())
    }
}
