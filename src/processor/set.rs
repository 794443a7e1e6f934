//! Set processor: creates unit processors and answers detail queries.
use std::path::PathBuf;
use std::sync::Arc;

use super::backend::ResourceBackend;
use super::resolver::ResourceResolver;
use super::resource::{ResolvedResource, UnitDetailFlags, UnitDetails};
use super::unit::UnitProcessor;
use crate::config::{ConfigurationSet, ConfigurationUnit, ModuleSpec};
use crate::error::{EnvironmentError, FactoryError, ResolveError, Result};
use crate::logging::Diagnostics;

/// Processes the units of one configuration set.
///
/// Owns the resolution cache, so a provider is looked up, installed and
/// imported at most once per set processor.
#[derive(Debug)]
pub struct SetProcessor {
    set: Option<ConfigurationSet>,
    backend: Arc<dyn ResourceBackend>,
    resolver: ResourceResolver,
    diagnostics: Arc<Diagnostics>,
    limit_mode: bool,
}

impl SetProcessor {
    pub(crate) fn new(
        set: Option<ConfigurationSet>,
        backend: Arc<dyn ResourceBackend>,
        diagnostics: Arc<Diagnostics>,
        limit_mode: bool,
    ) -> Self {
        let resolver = ResourceResolver::new(Arc::clone(&backend), Arc::clone(&diagnostics));
        Self {
            set,
            backend,
            resolver,
            diagnostics,
            limit_mode,
        }
    }

    /// The set being processed, if one was supplied.
    #[must_use]
    pub const fn set(&self) -> Option<&ConfigurationSet> {
        self.set.as_ref()
    }

    /// Whether this processor was created in limitation mode.
    #[must_use]
    pub const fn is_limit_mode(&self) -> bool {
        self.limit_mode
    }

    /// The resolver backing this processor.
    #[must_use]
    pub const fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    /// Resolve `unit` and bind it to a unit processor.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode when the
    /// unit is not part of the limitation set, and any resolution error.
    pub fn create_unit_processor(&self, unit: &ConfigurationUnit) -> Result<UnitProcessor> {
        let name = unit.qualified_name();
        self.diagnostics
            .verbose(&format!("Creating unit processor for: {name}..."));

        if self.limit_mode && !self.in_limitation_set(unit) {
            return Err(self.diagnostics.report(
                FactoryError::OperationInvalid(format!(
                    "unit '{}' ({name}) is not part of the limitation set",
                    unit.identifier
                ))
                .into(),
            ));
        }

        let resource = self.resolver.resolve(unit)?;
        self.diagnostics.verbose(&format!(
            "Using unit from location: {}",
            resource
                .path
                .as_ref()
                .map_or_else(|| "<none>".to_string(), |p| p.display().to_string())
        ));
        Ok(UnitProcessor::new(
            unit.clone(),
            resource,
            Arc::clone(&self.backend),
            Arc::clone(&self.diagnostics),
        ))
    }

    /// Create a unit processor for every unit of the set, in order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first unit that fails to resolve.
    pub fn create_unit_processors(&self) -> Result<Vec<UnitProcessor>> {
        self.set
            .as_ref()
            .map_or(&[][..], |set| set.units.as_slice())
            .iter()
            .map(|unit| self.create_unit_processor(unit))
            .collect()
    }

    fn in_limitation_set(&self, unit: &ConfigurationUnit) -> bool {
        self.set.as_ref().is_some_and(|set| {
            set.units.iter().any(|allowed| {
                allowed.identifier.eq_ignore_ascii_case(&unit.identifier)
                    && allowed
                        .qualified_name()
                        .eq_ignore_ascii_case(&unit.qualified_name())
            })
        })
    }

    /// Describe the provider of `unit`, consulting only the sources `flags`
    /// allows.
    ///
    /// `Local`, `Download` and `Load` all start from installed modules;
    /// `Catalog` reports catalog metadata, `Download` saves the module to a
    /// temporary directory, `Load` installs and imports it.  Returns `None`
    /// when no allowed source knows the resource.
    ///
    /// # Errors
    ///
    /// Returns any backend failure, and [`ResolveError::InstallFailed`] if a
    /// `Load` install does not expose the resource.
    pub fn get_unit_processor_details(
        &self,
        unit: &ConfigurationUnit,
        flags: UnitDetailFlags,
    ) -> Result<Option<UnitDetails>> {
        self.details(unit, flags)
            .map_err(|e| self.diagnostics.report(e))
    }

    fn details(
        &self,
        unit: &ConfigurationUnit,
        flags: UnitDetailFlags,
    ) -> Result<Option<UnitDetails>> {
        let name = unit.qualified_name();
        self.diagnostics
            .verbose(&format!("Getting unit details [{flags}] for: {name}"));
        let module = unit.effective_module()?;

        let local_tiers = UnitDetailFlags::LOCAL | UnitDetailFlags::DOWNLOAD | UnitDetailFlags::LOAD;
        if flags.intersects(local_tiers) {
            if let Some(resource) = self.find_one(unit, module.as_ref())? {
                return self
                    .local_details(resource, flags.contains(UnitDetailFlags::LOAD))
                    .map(Some);
            }
        }

        let remote_tiers =
            UnitDetailFlags::CATALOG | UnitDetailFlags::DOWNLOAD | UnitDetailFlags::LOAD;
        if !flags.intersects(remote_tiers) {
            return Ok(None);
        }

        let Some(candidate) = self.backend.find_in_catalog(unit, module.as_ref())? else {
            return Ok(None);
        };

        if flags.contains(UnitDetailFlags::CATALOG) {
            return Ok(Some(UnitDetails {
                unit_type: candidate.resource_name.clone(),
                catalog: Some(candidate),
                ..UnitDetails::default()
            }));
        }

        if flags.contains(UnitDetailFlags::DOWNLOAD) {
            let directory = download_directory()?;
            self.diagnostics.verbose(&format!(
                "Saving {} to {}",
                candidate.name,
                directory.display()
            ));
            let saved = self.backend.save(&candidate, &directory)?;
            return Ok(Some(UnitDetails {
                unit_type: candidate.resource_name.clone(),
                module: saved,
                catalog: Some(candidate),
                ..UnitDetails::default()
            }));
        }

        // Load: install, then it must be discoverable.
        self.backend.install(&candidate)?;
        let resource = self
            .find_one(unit, module.as_ref())?
            .ok_or_else(|| ResolveError::InstallFailed {
                unit: name,
                module: candidate.name.clone(),
            })?;
        let mut details = self.local_details(resource, true)?;
        details.catalog = Some(candidate);
        Ok(Some(details))
    }

    /// Installed provider for `unit`: `None` when absent, an error when ambiguous.
    fn find_one(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<ResolvedResource>> {
        let mut found = self.backend.find_local(unit, module)?;
        if found.len() > 1 {
            return Err(ResolveError::MultipleMatches {
                unit: unit.qualified_name(),
                count: found.len(),
            }
            .into());
        }
        Ok(found.pop())
    }

    fn local_details(&self, resource: ResolvedResource, load: bool) -> Result<UnitDetails> {
        // Providers outside any versioned module have nothing more to describe.
        if resource.module_name.is_none() || resource.version.is_none() {
            return Ok(UnitDetails {
                unit_type: resource.name.clone(),
                resource: Some(resource),
                ..UnitDetails::default()
            });
        }
        let module = self.backend.module_info(&resource)?;
        if load {
            self.backend.import(&resource)?;
        }
        Ok(UnitDetails {
            unit_type: resource.name.clone(),
            resource: Some(resource),
            module,
            catalog: None,
            loaded: load,
        })
    }
}

/// A fresh directory under the system temp dir, left in place for the caller.
fn download_directory() -> Result<PathBuf> {
    tempfile::Builder::new()
        .prefix("dscproc-")
        .tempdir()
        .map(tempfile::TempDir::keep)
        .map_err(|source| {
            EnvironmentError::Io {
                path: std::env::temp_dir().display().to_string(),
                source,
            }
            .into()
        })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::ProcessorError;
    use crate::processor::test_helpers::{FakeBackend, file_resource};

    fn file_unit() -> ConfigurationUnit {
        ConfigurationUnit::new("PSDesiredStateConfiguration/File").with_identifier("f")
    }

    fn processor(backend: &Arc<FakeBackend>, set: Option<ConfigurationSet>, limit: bool) -> SetProcessor {
        SetProcessor::new(
            set,
            Arc::clone(backend) as Arc<dyn ResourceBackend>,
            Arc::new(Diagnostics::default()),
            limit,
        )
    }

    #[test]
    fn creates_processors_for_every_unit() {
        let backend = Arc::new(FakeBackend::new().with_local(file_resource("2.0.7")));
        let set = ConfigurationSet::named("s")
            .with_unit(file_unit())
            .with_unit(file_unit().with_identifier("g"));
        let processors = processor(&backend, Some(set), false)
            .create_unit_processors()
            .unwrap();
        assert_eq!(processors.len(), 2);
        assert_eq!(processors[1].unit().identifier, "g");
        assert_eq!(backend.calls_matching("find_local"), 1);
    }

    #[test]
    fn ambiguous_unit_never_reaches_a_verb() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_local(file_resource("2.0.5"))
                .with_local(file_resource("2.0.7")),
        );
        let err = processor(&backend, None, false)
            .create_unit_processor(&file_unit())
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Resolve(ResolveError::MultipleMatches { .. })
        ));
        assert_eq!(backend.calls_matching("get"), 0);
        assert_eq!(backend.calls_matching("set"), 0);
        assert_eq!(backend.calls_matching("test"), 0);
    }

    #[test]
    fn limit_mode_only_accepts_limitation_units() {
        let backend = Arc::new(FakeBackend::new().with_local(file_resource("2.0.7")));
        let set = ConfigurationSet::named("limit").with_unit(file_unit());
        let processor = processor(&backend, Some(set), true);
        assert!(processor.is_limit_mode());
        assert!(processor.create_unit_processor(&file_unit()).is_ok());
        let err = processor
            .create_unit_processor(&file_unit().with_identifier("other"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Factory(FactoryError::OperationInvalid(_))
        ));
    }

    #[test]
    fn local_details_do_not_touch_catalog() {
        let backend = Arc::new(FakeBackend::new().with_local(file_resource("2.0.7")));
        let details = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::LOCAL)
            .unwrap()
            .unwrap();
        assert_eq!(details.unit_type, "File");
        assert!(details.resource.is_some());
        assert_eq!(details.module.unwrap().name, "PSDesiredStateConfiguration");
        assert!(!details.loaded);
        assert_eq!(backend.calls_matching("find_in_catalog"), 0);
        assert_eq!(backend.calls_matching("import"), 0);
    }

    #[test]
    fn local_only_miss_is_none() {
        let backend = Arc::new(FakeBackend::new().with_catalog(file_resource("2.0.7")));
        let details = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::LOCAL)
            .unwrap();
        assert!(details.is_none());
        assert_eq!(backend.calls_matching("find_in_catalog"), 0);
    }

    #[test]
    fn catalog_details_do_not_install() {
        let backend = Arc::new(FakeBackend::new().with_catalog(file_resource("2.0.7")));
        let details = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::CATALOG)
            .unwrap()
            .unwrap();
        assert_eq!(details.catalog.unwrap().name, "PSDesiredStateConfiguration");
        assert!(details.resource.is_none());
        assert_eq!(backend.calls_matching("install"), 0);
        assert_eq!(backend.calls_matching("find_local"), 0);
    }

    #[test]
    fn download_details_save_to_temp() {
        let backend = Arc::new(FakeBackend::new().with_catalog(file_resource("2.0.7")));
        let details = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::DOWNLOAD)
            .unwrap()
            .unwrap();
        let module = details.module.unwrap();
        let path = module.path.unwrap();
        assert!(path.starts_with(std::env::temp_dir()));
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(backend.calls_matching("save"), 1);
        assert_eq!(backend.calls_matching("install"), 0);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn load_details_install_and_import() {
        let backend = Arc::new(FakeBackend::new().with_catalog(file_resource("2.0.7")));
        let details = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::LOAD)
            .unwrap()
            .unwrap();
        assert!(details.loaded);
        assert!(details.catalog.is_some());
        assert_eq!(backend.calls_matching("install"), 1);
        assert_eq!(backend.calls_matching("import"), 1);
    }

    #[test]
    fn load_details_fail_when_install_is_broken() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_catalog(file_resource("2.0.7"))
                .with_broken_install(),
        );
        let err = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::LOAD)
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Resolve(ResolveError::InstallFailed { .. })
        ));
    }

    #[test]
    fn load_details_reject_ambiguous_install() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_catalog(file_resource("2.0.5"))
                .with_catalog(file_resource("2.0.7")),
        );
        let err = processor(&backend, None, false)
            .get_unit_processor_details(&file_unit(), UnitDetailFlags::LOAD)
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::Resolve(ResolveError::MultipleMatches { count: 2, .. })
        ));
        assert_eq!(backend.calls_matching("install"), 1);
        assert_eq!(backend.calls_matching("import"), 0);
    }

    #[test]
    fn download_directories_are_distinct() {
        let first = download_directory().unwrap();
        let second = download_directory().unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        assert!(
            first
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("dscproc-"))
        );
        let _ = std::fs::remove_dir_all(first);
        let _ = std::fs::remove_dir_all(second);
    }

    #[test]
    fn unknown_resource_has_no_details() {
        let backend = Arc::new(FakeBackend::new());
        let details = processor(&backend, None, false)
            .get_unit_processor_details(
                &file_unit(),
                UnitDetailFlags::LOCAL | UnitDetailFlags::CATALOG,
            )
            .unwrap();
        assert!(details.is_none());
    }
}
