//! The scripting-host environment: one owned engine context plus the module
//! management and DSC operations the resolver needs.
//!
//! Two variants share this type.  [`EnvironmentKind::Default`] attaches to a
//! host as it is; [`EnvironmentKind::Hosted`] owns an isolated context,
//! de-duplicates module path edits and runs the full compatibility check.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use serde_json::Value;

use super::dsc_module;
use super::pwsh::MODULE_PATH_VARIABLE;
use super::resource_info::{catalog_from_host, module_from_host};
use super::script::{HostCommand, HostOutput, ScriptHost, host_version, module_argument};
use crate::config::{ConfigurationUnit, ModuleLocation, ModuleSpec, processor_module_path};
use crate::error::{EnvironmentError, ResolveError, Result};
use crate::logging::Diagnostics;
use crate::processor::{CatalogModule, ModuleInfo, ResolvedResource, SetOutcome, Verb};
use crate::value::ValueSet;

/// Module providing `Find-Module`, `Install-Module` and `Save-Module`.
pub const POWERSHELL_GET_MODULE: &str = "PowerShellGet";

/// Oldest `PowerShellGet` with the catalog commands this processor uses.
pub const POWERSHELL_GET_MIN_VERSION: Version = Version::new(2, 2, 5);

/// Separator between module path entries on this platform.
pub const MODULE_PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

const CORE_EDITION: &str = "Core";

/// Which environment variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    /// Attach to an already-initialised host.
    Default,
    /// Own an isolated, policy-constrained host.
    Hosted,
}

/// An engine context with module management on top.
#[derive(Debug)]
pub struct HostEnvironment {
    kind: EnvironmentKind,
    host: Arc<dyn ScriptHost>,
    diagnostics: Arc<Diagnostics>,
    location: ModuleLocation,
    custom_location: Option<PathBuf>,
}

fn same_entry(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// `PowerShellGet` at or above [`POWERSHELL_GET_MIN_VERSION`].
#[must_use]
pub fn powershell_get_spec() -> ModuleSpec {
    ModuleSpec::named(POWERSHELL_GET_MODULE).with_min(POWERSHELL_GET_MIN_VERSION)
}

fn qualified(name: &str, module: Option<&ModuleSpec>) -> String {
    module.map_or_else(|| name.to_string(), |m| format!("{}/{name}", m.name))
}

fn with_version_window(mut command: HostCommand, spec: &ModuleSpec) -> HostCommand {
    if let Some(required) = &spec.required_version {
        return command.param("RequiredVersion", host_version(required));
    }
    if let Some(min) = &spec.min_version {
        command = command.param("MinimumVersion", host_version(min));
    }
    if let Some(max) = &spec.max_version {
        command = command.param("MaximumVersion", host_version(max));
    }
    command
}

fn with_catalog_version(command: HostCommand, module: &CatalogModule) -> HostCommand {
    command
        .param_opt("RequiredVersion", module.version.as_ref().map(host_version))
        .param_opt("Repository", module.repository.as_deref())
        .switch_if("AllowPrerelease", module.prerelease)
}

impl HostEnvironment {
    fn new(
        kind: EnvironmentKind,
        host: Arc<dyn ScriptHost>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            kind,
            host,
            diagnostics,
            location: ModuleLocation::default(),
            custom_location: None,
        }
    }

    /// Construct an environment, let `configure` adjust module paths and the
    /// install location, then validate it.
    ///
    /// # Errors
    ///
    /// Returns the first error from `configure` or from [`Self::validate`];
    /// an incompatible host is never handed out.
    pub fn open<F>(
        kind: EnvironmentKind,
        host: Arc<dyn ScriptHost>,
        diagnostics: Arc<Diagnostics>,
        configure: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let mut environment = Self::new(kind, host, diagnostics);
        configure(&mut environment)?;
        environment.validate()?;
        Ok(environment)
    }

    /// The environment variant.
    #[must_use]
    pub const fn kind(&self) -> EnvironmentKind {
        self.kind
    }

    /// The engine context.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn ScriptHost> {
        &self.host
    }

    /// Where catalog modules are installed.
    #[must_use]
    pub const fn location(&self) -> ModuleLocation {
        self.location
    }

    /// Directory catalog modules are saved to, for custom locations.
    #[must_use]
    pub fn custom_location(&self) -> Option<&Path> {
        self.custom_location.as_deref()
    }

    /// Check the host can run resources.
    ///
    /// Both variants require the `Core` edition and make sure
    /// `PSDesiredStateConfiguration` is present.  A hosted environment also
    /// reports errors recorded while its context opened and requires
    /// `PowerShellGet` 2.2.5 or newer.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Unsupported`] for an incompatible host, or
    /// the error of installing the DSC module.
    pub fn validate(&self) -> Result<()> {
        let edition = self.get_variable("PSEdition")?;
        if edition.as_ref().and_then(Value::as_str) != Some(CORE_EDITION) {
            return Err(EnvironmentError::Unsupported(
                "Only PowerShell Core is supported.".to_string(),
            )
            .into());
        }
        if self.kind == EnvironmentKind::Hosted {
            let open_errors = self.host.open_errors();
            if !open_errors.is_empty() {
                self.diagnostics.verbose(&format!(
                    "Error creating runspace '{}'",
                    open_errors.join("\n")
                ));
            }
            self.require_powershell_get()?;
        }
        self.ensure_module(&dsc_module::module_spec())
    }

    fn require_powershell_get(&self) -> Result<()> {
        let spec = powershell_get_spec();
        if self.get_imported_module(&spec)?.is_some()
            || self.get_available_module(&spec)?.is_some()
        {
            return Ok(());
        }
        let found = self
            .get_available_module(&ModuleSpec::named(POWERSHELL_GET_MODULE))?
            .map(|found| {
                let version = found.version.as_ref().map(host_version).unwrap_or_default();
                format!(" Found '{} {version}'", found.name)
            })
            .unwrap_or_default();
        Err(EnvironmentError::Unsupported(format!("Required '{spec}'{found}")).into())
    }

    /// Run a command, logging it with its errors when it wrote any.
    ///
    /// # Errors
    ///
    /// Returns an error only if the host could not run the command.
    pub fn run(&self, command: &HostCommand) -> Result<HostOutput> {
        let output = self.host.invoke(command)?;
        if output.had_errors() {
            let errors: Vec<String> = output
                .errors
                .iter()
                .map(|e| format!("[WriteError] {e}"))
                .collect();
            self.diagnostics.verbose(&format!(
                "PowerShellCommands: {command}\n{}",
                errors.join("\n")
            ));
        }
        Ok(output)
    }

    fn run_checked(&self, command: &HostCommand) -> Result<HostOutput> {
        let output = self.run(command)?;
        match output.error_message() {
            Some(message) => Err(EnvironmentError::HostCommand {
                command: command.name.clone(),
                message,
            }
            .into()),
            None => Ok(output),
        }
    }

    /// Read a session variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    pub fn get_variable(&self, name: &str) -> Result<Option<Value>> {
        self.host.get_variable(name)
    }

    /// Set a session variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the value.
    pub fn set_variable(&self, name: &str, value: Value) -> Result<()> {
        self.host.set_variable(name, value)
    }

    /// Module path entries, in search order.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    pub fn module_paths(&self) -> Result<Vec<String>> {
        let value = self.get_variable(MODULE_PATH_VARIABLE)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .split(MODULE_PATH_SEPARATOR)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The module path as a single string.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried.
    pub fn module_path(&self) -> Result<String> {
        Ok(self
            .module_paths()?
            .join(&MODULE_PATH_SEPARATOR.to_string()))
    }

    /// Replace the module path.
    ///
    /// # Errors
    ///
    /// Returns an error if the host rejects the value.
    pub fn set_module_path<S: AsRef<str>>(&self, entries: &[S]) -> Result<()> {
        let joined = entries
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&MODULE_PATH_SEPARATOR.to_string());
        self.set_variable(MODULE_PATH_VARIABLE, Value::String(joined))
    }

    fn contains_entry(entries: &[String], path: &str) -> bool {
        entries.iter().any(|entry| same_entry(entry, path))
    }

    /// Put `path` first on the module path.  A hosted environment leaves an
    /// existing entry where it is.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried or updated.
    pub fn prepend_module_path(&self, path: &str) -> Result<()> {
        let mut entries = self.module_paths()?;
        if self.kind == EnvironmentKind::Hosted && Self::contains_entry(&entries, path) {
            return Ok(());
        }
        entries.insert(0, path.to_string());
        self.set_module_path(&entries)
    }

    /// Put `path` last on the module path.  A hosted environment leaves an
    /// existing entry where it is.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried or updated.
    pub fn append_module_path(&self, path: &str) -> Result<()> {
        let mut entries = self.module_paths()?;
        if self.kind == EnvironmentKind::Hosted && Self::contains_entry(&entries, path) {
            return Ok(());
        }
        entries.push(path.to_string());
        self.set_module_path(&entries)
    }

    /// Remove every occurrence of `path` from the module path.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be queried or updated.
    pub fn cleanup_module_path(&self, path: &str) -> Result<()> {
        let mut entries = self.module_paths()?;
        entries.retain(|entry| !same_entry(entry, path));
        self.set_module_path(&entries)
    }

    /// Choose where catalog modules are installed.
    ///
    /// [`ModuleLocation::WinGetModulePath`] becomes a custom location at the
    /// processor's own module directory.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::InvalidConfiguration`] for a custom
    /// location without a path.
    pub fn set_location(&mut self, location: ModuleLocation, custom: Option<&Path>) -> Result<()> {
        match location {
            ModuleLocation::WinGetModulePath => {
                self.location = ModuleLocation::Custom;
                self.custom_location = Some(processor_module_path());
            }
            ModuleLocation::Custom => {
                let path = custom.filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
                    EnvironmentError::InvalidConfiguration(
                        "a custom module location requires a path".to_string(),
                    )
                })?;
                self.location = ModuleLocation::Custom;
                self.custom_location = Some(path.to_path_buf());
            }
            ModuleLocation::CurrentUser | ModuleLocation::AllUsers => {
                self.location = location;
                self.custom_location = None;
            }
        }
        Ok(())
    }

    fn first_module(output: &HostOutput, spec: Option<&ModuleSpec>) -> Option<ModuleInfo> {
        output
            .objects
            .iter()
            .filter_map(module_from_host)
            .filter(|m| spec.is_none_or(|s| s.accepts(&m.name, m.version.as_ref())))
            .max_by(|a, b| match (&a.version, &b.version) {
                (Some(a), Some(b)) => a.cmp_precedence(b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }

    /// The imported module satisfying `spec`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the host query fails.
    pub fn get_imported_module(&self, spec: &ModuleSpec) -> Result<Option<ModuleInfo>> {
        let command =
            HostCommand::new("Get-Module").param("FullyQualifiedName", module_argument(spec));
        let output = self.run_checked(&command)?;
        Ok(Self::first_module(&output, Some(spec)))
    }

    /// The newest module on the module path satisfying `spec`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the host query fails.
    pub fn get_available_module(&self, spec: &ModuleSpec) -> Result<Option<ModuleInfo>> {
        let command = HostCommand::new("Get-Module")
            .param("FullyQualifiedName", module_argument(spec))
            .switch("ListAvailable");
        let output = self.run_checked(&command)?;
        Ok(Self::first_module(&output, Some(spec)))
    }

    /// The module at `path` (a module directory or manifest).
    ///
    /// # Errors
    ///
    /// Returns an error if the host query fails.
    pub fn get_available_module_at(&self, path: &Path) -> Result<Option<ModuleInfo>> {
        let command = HostCommand::new("Get-Module")
            .param("Name", path.to_string_lossy().into_owned())
            .switch("ListAvailable");
        let output = self.run_checked(&command)?;
        Ok(Self::first_module(&output, None))
    }

    /// Import the module satisfying `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::HostCommand`] if the import fails.
    pub fn import_module(&self, spec: &ModuleSpec) -> Result<()> {
        let command = HostCommand::new("Import-Module")
            .param("FullyQualifiedName", module_argument(spec))
            .switch("PassThru");
        self.run_checked(&command).map(drop)
    }

    /// Import a module file.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Io`] if the file does not exist, or
    /// [`EnvironmentError::HostCommand`] if the import fails.
    pub fn import_module_path(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(EnvironmentError::Io {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "module file not found"),
            }
            .into());
        }
        let command = HostCommand::new("Import-Module")
            .param("Name", path.to_string_lossy().into_owned())
            .switch("PassThru");
        self.run_checked(&command).map(drop)
    }

    /// Search the catalog for the unit's module.  Units without a module are
    /// not searched.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit's version directives are invalid or the
    /// host cannot run the search.
    pub fn find_module(&self, unit: &ConfigurationUnit) -> Result<Option<CatalogModule>> {
        let Some(module) = unit.effective_module()? else {
            return Ok(None);
        };
        let command = with_version_window(
            HostCommand::new("Find-Module").param("Name", module.name.as_str()),
            &module,
        )
        .param_opt("Repository", unit.repository())
        .switch_if("AllowPrerelease", unit.allow_prerelease());
        // No match is reported on the error stream.
        let output = self.run(&command)?;
        Ok(output
            .first()
            .and_then(|hit| catalog_from_host(hit, &unit.resource_type)))
    }

    /// Search the catalog for a module providing the unit's resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit's version directives are invalid or the
    /// host cannot run the search.
    pub fn find_dsc_resource(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<CatalogModule>> {
        let module = match module {
            Some(module) => Some(module.clone()),
            None => unit.effective_module()?,
        };
        let mut command =
            HostCommand::new("Find-DscResource").param("Name", unit.resource_type.as_str());
        if let Some(module) = &module {
            command = with_version_window(command.param("ModuleName", module.name.as_str()), module);
        }
        let command = command
            .param_opt("Repository", unit.repository())
            .switch_if("AllowPrerelease", unit.allow_prerelease());
        let output = self.run(&command)?;
        Ok(output
            .first()
            .and_then(|hit| catalog_from_host(hit, &unit.resource_type)))
    }

    /// Install a catalog module at the configured location.  A custom
    /// location saves the module there instead.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::HostCommand`] if the install fails.
    pub fn install_module(&self, module: &CatalogModule) -> Result<()> {
        if let Some(directory) = self.custom_location() {
            return self.save_module(module, directory);
        }
        let scope = if self.location == ModuleLocation::AllUsers {
            "AllUsers"
        } else {
            "CurrentUser"
        };
        let command = with_catalog_version(
            HostCommand::new("Install-Module").param("Name", module.name.as_str()),
            module,
        )
        .param("Scope", scope)
        .switch("Force");
        self.run_checked(&command).map(drop)
    }

    /// Save a catalog module into `directory` without installing it.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::HostCommand`] if the download fails.
    pub fn save_module(&self, module: &CatalogModule, directory: &Path) -> Result<()> {
        let command = with_catalog_version(
            HostCommand::new("Save-Module").param("Name", module.name.as_str()),
            module,
        )
        .param("Path", directory.to_string_lossy().into_owned())
        .switch("Force");
        self.run_checked(&command).map(drop)
    }

    /// Make the module in `spec` usable, importing or installing as needed.
    ///
    /// # Errors
    ///
    /// Returns the error of the import or install that failed.
    pub fn ensure_module(&self, spec: &ModuleSpec) -> Result<()> {
        if self.validate_module(spec)? {
            return Ok(());
        }
        self.diagnostics
            .verbose(&format!("Installing module: {} ...", spec.name));
        let command = if let Some(directory) = self.custom_location() {
            self.diagnostics.verbose("... calling save module ...");
            with_version_window(
                HostCommand::new("Save-Module").param("Name", spec.name.as_str()),
                spec,
            )
            .param("Path", directory.to_string_lossy().into_owned())
            .switch("Force")
        } else {
            self.diagnostics.verbose("... calling install module ...");
            let command = with_version_window(
                HostCommand::new("Install-Module").param("Name", spec.name.as_str()),
                spec,
            );
            let command = if self.location == ModuleLocation::AllUsers {
                command.param("Scope", "AllUsers")
            } else {
                command
            };
            command.switch("Force")
        };
        self.run_checked(&command)?;
        self.diagnostics.verbose(" ... module installed.");
        Ok(())
    }

    fn validate_module(&self, spec: &ModuleSpec) -> Result<bool> {
        self.diagnostics
            .verbose(&format!("Validating module: {} ...", spec.name));
        if self.get_imported_module(spec)?.is_some() {
            self.diagnostics.verbose(" ... module is already imported.");
            return Ok(true);
        }
        if self.get_available_module(spec)?.is_some() {
            self.diagnostics
                .verbose(" ... module is available, importing ...");
            self.import_module(spec)?;
            self.diagnostics.verbose(" ... module imported.");
            return Ok(true);
        }
        self.diagnostics.verbose(" ... module not found.");
        Ok(false)
    }

    /// Every local resource matching `name` and `module`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::ModuleConflict`] when two modules define the
    /// resource, or a host error.
    pub fn get_dsc_resources(
        &self,
        name: Option<&str>,
        module: Option<&ModuleSpec>,
    ) -> Result<Vec<ResolvedResource>> {
        let command = dsc_module::get_dsc_resource_command(name, module);
        let output = self.run(&command)?;
        let unit = name.unwrap_or("*");
        dsc_module::parse_dsc_resources(output, unit)
    }

    /// The single local resource matching `name` and `module`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MultipleMatches`] when more than one resource
    /// matches, plus the errors of [`Self::get_dsc_resources`].
    pub fn get_dsc_resource(
        &self,
        name: &str,
        module: Option<&ModuleSpec>,
    ) -> Result<Option<ResolvedResource>> {
        let mut resources = self.get_dsc_resources(Some(name), module)?;
        match resources.len() {
            0 | 1 => Ok(resources.pop()),
            count => Err(ResolveError::MultipleMatches {
                unit: name.to_string(),
                count,
            }
            .into()),
        }
    }

    /// `Invoke-DscResource -Method Get`.
    ///
    /// # Errors
    ///
    /// Fails on host errors or a missing result.
    pub fn invoke_get(
        &self,
        name: &str,
        module: Option<&ModuleSpec>,
        settings: &ValueSet,
    ) -> Result<ValueSet> {
        let output = self.run(&dsc_module::invoke_command(Verb::Get, name, module, settings))?;
        dsc_module::parse_get(output, &qualified(name, module))
    }

    /// `Invoke-DscResource -Method Test`.
    ///
    /// # Errors
    ///
    /// Fails on host errors or a missing or non-boolean `InDesiredState`.
    pub fn invoke_test(
        &self,
        name: &str,
        module: Option<&ModuleSpec>,
        settings: &ValueSet,
    ) -> Result<bool> {
        let output = self.run(&dsc_module::invoke_command(Verb::Test, name, module, settings))?;
        dsc_module::parse_test(output, &qualified(name, module))
    }

    /// `Invoke-DscResource -Method Set`.
    ///
    /// # Errors
    ///
    /// Fails with a property-assignment or resource-internal error, or on a
    /// missing or non-boolean `RebootRequired`.
    pub fn invoke_set(
        &self,
        name: &str,
        module: Option<&ModuleSpec>,
        settings: &ValueSet,
    ) -> Result<SetOutcome> {
        let output = self.run(&dsc_module::invoke_command(Verb::Set, name, module, settings))?;
        dsc_module::parse_set(output, &qualified(name, module))
    }
}
