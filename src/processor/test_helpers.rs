//! In-memory [`ResourceBackend`] shared by the processor tests.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use super::Verb;
use super::backend::ResourceBackend;
use super::resource::{
    CatalogModule, ExportedInstance, ImplementationKind, ModuleInfo, ResolvedResource, SetOutcome,
};
use crate::config::unit::parse_version;
use crate::config::{ConfigurationUnit, ModuleSpec};
use crate::error::{EnvironmentError, InvokeError, Result};
use crate::value::ValueSet;

/// A `File` provider from `PSDesiredStateConfiguration` at `version`.
pub fn file_resource(version: &str) -> ResolvedResource {
    ResolvedResource {
        name: "File".to_string(),
        module_name: Some("PSDesiredStateConfiguration".to_string()),
        version: parse_version(version).ok(),
        kind: ImplementationKind::Class,
        path: Some(PathBuf::from(format!(
            "/modules/PSDesiredStateConfiguration/{version}/PSDesiredStateConfiguration.psm1"
        ))),
        ..ResolvedResource::named("File")
    }
}

/// Records every call, keeps a mutable state bag that `set` merges the
/// unit's settings into, and `test` compares against.
#[derive(Debug, Default)]
pub struct FakeBackend {
    local: Mutex<Vec<ResolvedResource>>,
    catalog: Vec<ResolvedResource>,
    broken_install: bool,
    import_error: Option<String>,
    set_error: Option<InvokeErrorKind>,
    exports: Option<Vec<ExportedInstance>>,
    state: Mutex<ValueSet>,
    calls: Mutex<Vec<String>>,
}

/// Which attributable Set failure the fake raises.
#[derive(Debug, Clone, Copy)]
pub enum InvokeErrorKind {
    /// Settings could not be bound.
    Property,
    /// The provider raised.
    Internal,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(self, resource: ResolvedResource) -> Self {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
        self
    }

    pub fn with_catalog(mut self, resource: ResolvedResource) -> Self {
        self.catalog.push(resource);
        self
    }

    pub const fn with_broken_install(mut self) -> Self {
        self.broken_install = true;
        self
    }

    pub fn with_import_error(mut self, message: &str) -> Self {
        self.import_error = Some(message.to_string());
        self
    }

    pub const fn with_set_error(mut self, kind: InvokeErrorKind) -> Self {
        self.set_error = Some(kind);
        self
    }

    pub fn with_exports(mut self, items: Vec<ExportedInstance>) -> Self {
        self.exports = Some(items);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    fn matches(
        resource: &ResolvedResource,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> bool {
        resource.name.eq_ignore_ascii_case(&unit.resource_type)
            && module.is_none_or(|m| {
                resource
                    .module_name
                    .as_deref()
                    .is_some_and(|name| m.accepts(name, resource.version.as_ref()))
            })
    }
}

impl ResourceBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn find_local(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Vec<ResolvedResource>> {
        self.record(format!("find_local:{}", unit.resource_type));
        Ok(self
            .local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| Self::matches(r, unit, module))
            .cloned()
            .collect())
    }

    fn find_in_catalog(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<CatalogModule>> {
        self.record(format!("find_in_catalog:{}", unit.resource_type));
        Ok(self
            .catalog
            .iter()
            .find(|r| Self::matches(r, unit, module))
            .map(|r| CatalogModule {
                name: r.module_name.clone().unwrap_or_default(),
                version: r.version.clone(),
                repository: Some("PSGallery".to_string()),
                resource_name: r.name.clone(),
                prerelease: false,
            }))
    }

    fn install(&self, module: &CatalogModule) -> Result<()> {
        self.record(format!("install:{}", module.name));
        if self.broken_install {
            return Ok(());
        }
        let installed = self
            .catalog
            .iter()
            .filter(|r| r.module_name.as_deref() == Some(module.name.as_str()))
            .cloned();
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(installed);
        Ok(())
    }

    fn save(&self, module: &CatalogModule, directory: &Path) -> Result<Option<ModuleInfo>> {
        self.record(format!("save:{}", module.name));
        Ok(Some(ModuleInfo {
            name: module.name.clone(),
            version: module.version.clone(),
            path: Some(directory.join(&module.name)),
            ..ModuleInfo::default()
        }))
    }

    fn module_info(&self, resource: &ResolvedResource) -> Result<Option<ModuleInfo>> {
        self.record(format!("module_info:{}", resource.name));
        Ok(resource.module_name.as_ref().map(|name| ModuleInfo {
            name: name.clone(),
            version: resource.version.clone(),
            path: resource.parent_path.clone(),
            ..ModuleInfo::default()
        }))
    }

    fn import(&self, resource: &ResolvedResource) -> Result<()> {
        self.record(format!("import:{}", resource.name));
        match &self.import_error {
            Some(message) => Err(EnvironmentError::HostCommand {
                command: "Import-Module".to_string(),
                message: message.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn get(&self, _resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<ValueSet> {
        self.record("get");
        let mut current = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (key, _) in unit.settings.iter() {
            if current.get(key).is_none() {
                current.insert(key.clone(), Value::Null);
            }
        }
        Ok(current)
    }

    fn test(&self, _resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<bool> {
        self.record("test");
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(unit
            .settings
            .iter()
            .all(|(key, value)| state.get(key) == Some(value)))
    }

    fn set(&self, _resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<SetOutcome> {
        self.record("set");
        match self.set_error {
            Some(InvokeErrorKind::Property) => {
                return Err(InvokeError::PropertyAssignment {
                    verb: Verb::Set,
                    unit: unit.qualified_name(),
                    message: "Cannot convert value".to_string(),
                }
                .into());
            }
            Some(InvokeErrorKind::Internal) => {
                return Err(InvokeError::ResourceInternal {
                    verb: Verb::Set,
                    unit: unit.qualified_name(),
                    message: "Access is denied".to_string(),
                }
                .into());
            }
            None => {}
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in unit.settings.iter() {
            state.insert(key.clone(), value.clone());
        }
        Ok(SetOutcome::default())
    }

    fn export(
        &self,
        resource: &ResolvedResource,
        unit: &ConfigurationUnit,
    ) -> Result<Vec<ExportedInstance>> {
        self.record("export");
        let _ = resource;
        self.exports.clone().ok_or_else(|| {
            InvokeError::NotSupported {
                verb: Verb::Export,
                unit: unit.qualified_name(),
            }
            .into()
        })
    }
}
