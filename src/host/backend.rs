//! [`ResourceBackend`] over a [`HostEnvironment`].
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::environment::{EnvironmentKind, HostEnvironment};
use super::listener::{EnvironmentListener, EnvironmentSource};
use crate::config::{ConfigurationUnit, ModuleSpec};
use crate::error::Result;
use crate::processor::{
    CatalogModule, ModuleInfo, ResolvedResource, ResourceBackend, SetOutcome,
};
use crate::value::ValueSet;

/// Resources provided by PowerShell DSC modules.
#[derive(Debug)]
pub struct PowerShellBackend {
    environment: Arc<HostEnvironment>,
    listener: Mutex<Option<EnvironmentListener>>,
}

/// The module that owns `resource`, pinned to the version that was found.
fn owning_module(resource: &ResolvedResource) -> Option<ModuleSpec> {
    resource.module_name.as_deref().map(|name| {
        let mut spec = ModuleSpec::named(name);
        spec.required_version.clone_from(&resource.version);
        spec
    })
}

impl PowerShellBackend {
    /// Wrap a validated environment.
    #[must_use]
    pub fn new(environment: HostEnvironment) -> Self {
        Self {
            environment: Arc::new(environment),
            listener: Mutex::new(None),
        }
    }

    /// The environment resources run in.
    #[must_use]
    pub const fn environment(&self) -> &Arc<HostEnvironment> {
        &self.environment
    }

    /// Append module path entries that appear in `source` to the hosted
    /// environment.  Default environments follow the host's own path and
    /// are not watched.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener thread cannot be started.
    pub fn watch(&self, source: Arc<dyn EnvironmentSource>, interval: Duration) -> Result<()> {
        if self.environment.kind() != EnvironmentKind::Hosted {
            return Ok(());
        }
        let environment = Arc::clone(&self.environment);
        let listener = EnvironmentListener::start(source, interval, move |added| {
            for entry in added {
                if let Err(e) = environment.append_module_path(entry) {
                    tracing::warn!("failed to add {entry} to the module path: {e}");
                }
            }
        })?;
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(listener);
        if let Some(mut previous) = previous {
            previous.stop()?;
        }
        Ok(())
    }

    /// Stop watching, waiting for the listener thread to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener thread panicked.
    pub fn stop_watching(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match listener {
            Some(mut listener) => listener.stop(),
            None => Ok(()),
        }
    }

    /// Whether a listener is running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(EnvironmentListener::is_running)
    }
}

impl ResourceBackend for PowerShellBackend {
    fn name(&self) -> &'static str {
        "powershell"
    }

    fn find_local(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Vec<ResolvedResource>> {
        let found = self
            .environment
            .get_dsc_resources(Some(&unit.resource_type), module)?;
        Ok(found
            .into_iter()
            .filter(|resource| {
                module.is_none_or(|m| {
                    resource
                        .module_name
                        .as_deref()
                        .is_some_and(|name| m.accepts(name, resource.version.as_ref()))
                })
            })
            .collect())
    }

    fn find_in_catalog(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<CatalogModule>> {
        self.environment.find_dsc_resource(unit, module)
    }

    fn install(&self, module: &CatalogModule) -> Result<()> {
        self.environment.install_module(module)
    }

    fn save(&self, module: &CatalogModule, directory: &Path) -> Result<Option<ModuleInfo>> {
        self.environment.save_module(module, directory)?;
        self.environment
            .get_available_module_at(&directory.join(&module.name))
    }

    fn module_info(&self, resource: &ResolvedResource) -> Result<Option<ModuleInfo>> {
        match owning_module(resource) {
            Some(spec) => self.environment.get_available_module(&spec),
            None => Ok(None),
        }
    }

    fn import(&self, resource: &ResolvedResource) -> Result<()> {
        match &resource.path {
            Some(path) => self.environment.import_module_path(path),
            None => Ok(()),
        }
    }

    fn get(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<ValueSet> {
        self.environment.invoke_get(
            &resource.name,
            owning_module(resource).as_ref(),
            &unit.settings,
        )
    }

    fn test(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<bool> {
        self.environment.invoke_test(
            &resource.name,
            owning_module(resource).as_ref(),
            &unit.settings,
        )
    }

    fn set(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<SetOutcome> {
        self.environment.invoke_set(
            &resource.name,
            owning_module(resource).as_ref(),
            &unit.settings,
        )
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::{EnvironmentError, InvokeError, ProcessorError};
    use crate::host::dsc_module::PSDSC_MODULE;
    use crate::host::environment::{MODULE_PATH_SEPARATOR, POWERSHELL_GET_MODULE};
    use crate::host::listener::MockEnvironmentSource;
    use crate::host::script::{HostArgument, HostErrorRecord, HostOutput, ScriptHost};
    use crate::host::test_helpers::{FakeHost, module, object};
    use crate::logging::diagnostics::recording;
    use crate::processor::Verb;
    use semver::Version;
    use serde_json::json;

    fn backend(kind: EnvironmentKind, host: FakeHost) -> (PowerShellBackend, Arc<FakeHost>) {
        let host = Arc::new(host.reply(
            "Get-Module",
            HostOutput::objects(vec![
                module(POWERSHELL_GET_MODULE, "2.2.5"),
                module(PSDSC_MODULE, "2.0.7"),
            ]),
        ));
        let (diagnostics, _) = recording();
        let environment = HostEnvironment::open(
            kind,
            Arc::clone(&host) as Arc<dyn ScriptHost>,
            diagnostics,
            |_| Ok(()),
        )
        .unwrap();
        (PowerShellBackend::new(environment), host)
    }

    fn file_info(version: &str) -> serde_json::Value {
        json!({
            "Name": "File",
            "ModuleName": PSDSC_MODULE,
            "Version": version,
            "ImplementationDetail": "ClassBased",
        })
    }

    #[test]
    fn find_local_filters_by_version_window() {
        let host = FakeHost::new().reply(
            "Get-DscResource",
            HostOutput::objects(vec![object(&file_info("2.0.5")), object(&file_info("2.0.7"))]),
        );
        let (backend, _) = backend(EnvironmentKind::Hosted, host);
        let unit = ConfigurationUnit::new("File");
        let spec = ModuleSpec::named(PSDSC_MODULE).with_min(Version::new(2, 0, 6));
        let found = backend.find_local(&unit, Some(&spec)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, Some(Version::new(2, 0, 7)));
        assert_eq!(backend.find_local(&unit, None).unwrap().len(), 2);
    }

    #[test]
    fn verbs_pin_the_resolved_module_version() {
        let host = FakeHost::new().reply(
            "Invoke-DscResource",
            HostOutput::objects(vec![object(&json!({"RebootRequired": true}))]),
        );
        let (backend, host) = backend(EnvironmentKind::Hosted, host);
        let resource = ResolvedResource {
            module_name: Some(PSDSC_MODULE.to_string()),
            version: Some(Version::new(2, 0, 7)),
            ..ResolvedResource::named("File")
        };
        let unit = ConfigurationUnit::new("File").with_setting("DestinationPath", "/tmp/x");
        assert!(backend.set(&resource, &unit).unwrap().reboot_required);
        let invoke = host.last("Invoke-DscResource").unwrap();
        assert_eq!(
            invoke.parameter("ModuleName"),
            Some(&HostArgument::Value(
                json!({"ModuleName": PSDSC_MODULE, "RequiredVersion": "2.0.7"})
            ))
        );
        assert_eq!(
            invoke.parameter("Method"),
            Some(&HostArgument::Value(json!("Set")))
        );
    }

    #[test]
    fn get_errors_name_the_qualified_resource() {
        let host = FakeHost::new().reply(
            "Invoke-DscResource",
            HostOutput::errors(vec![HostErrorRecord::new("boom")]),
        );
        let (backend, _) = backend(EnvironmentKind::Default, host);
        let resource = ResolvedResource {
            module_name: Some(PSDSC_MODULE.to_string()),
            ..ResolvedResource::named("File")
        };
        let err = backend
            .get(&resource, &ConfigurationUnit::new("File"))
            .unwrap_err();
        assert!(
            matches!(&err, ProcessorError::Invoke(InvokeError::ResourceInternal { verb: Verb::Get, unit, .. })
                if unit == "PSDesiredStateConfiguration/File"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn import_requires_the_implementing_file() {
        let (backend, host) = backend(EnvironmentKind::Hosted, FakeHost::new());
        let dir = tempfile::tempdir().unwrap();
        let psm1 = dir.path().join("Thing.psm1");
        std::fs::write(&psm1, "").unwrap();
        let resource = ResolvedResource {
            path: Some(psm1.clone()),
            ..ResolvedResource::named("Thing")
        };
        backend.import(&resource).unwrap();
        assert_eq!(
            host.last("Import-Module").unwrap().parameter("Name"),
            Some(&HostArgument::Value(json!(psm1.to_string_lossy())))
        );

        let missing = ResolvedResource {
            path: Some(dir.path().join("Missing.psm1")),
            ..ResolvedResource::named("Missing")
        };
        assert!(matches!(
            backend.import(&missing).unwrap_err(),
            ProcessorError::Environment(EnvironmentError::Io { .. })
        ));
    }

    #[test]
    fn save_describes_the_downloaded_module() {
        let (backend, host) = backend(EnvironmentKind::Hosted, FakeHost::new());
        host.set_reply(
            "Get-Module",
            HostOutput::objects(vec![module("xNetworking", "5.7.0")]),
        );
        let dir = tempfile::tempdir().unwrap();
        let candidate = CatalogModule {
            name: "xNetworking".to_string(),
            version: Some(Version::new(5, 7, 0)),
            resource_name: "xHostsFile".to_string(),
            ..CatalogModule::default()
        };
        let info = backend.save(&candidate, dir.path()).unwrap().unwrap();
        assert_eq!(info.name, "xNetworking");
        assert_eq!(host.count("Save-Module"), 1);
        assert_eq!(host.count("Install-Module"), 0);
    }

    #[test]
    fn hosted_backend_picks_up_new_module_paths() {
        let (backend, host) = backend(EnvironmentKind::Hosted, FakeHost::new());
        let mut source = MockEnvironmentSource::new();
        let mut polls = 0;
        source.expect_module_path().returning(move || {
            polls += 1;
            Some(if polls == 1 {
                "/a".to_string()
            } else {
                format!("/a{MODULE_PATH_SEPARATOR}/new")
            })
        });
        backend
            .watch(Arc::new(source), Duration::from_millis(5))
            .unwrap();
        assert!(backend.is_watching());
        let mut picked_up = false;
        for _ in 0..500 {
            if host.module_path().contains("/new") {
                picked_up = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        backend.stop_watching().unwrap();
        assert!(picked_up);
        assert!(!backend.is_watching());
    }

    #[test]
    fn default_backend_is_not_watched() {
        let (backend, _) = backend(EnvironmentKind::Default, FakeHost::new());
        let source = MockEnvironmentSource::new();
        backend
            .watch(Arc::new(source), Duration::from_millis(5))
            .unwrap();
        assert!(!backend.is_watching());
    }
}
