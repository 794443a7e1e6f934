//! Set processor factory: the entry point of the processor.
//!
//! A factory holds the backend options and the diagnostics hub, and creates
//! one [`SetProcessor`] per configuration set.  Registering a limitation set
//! switches the factory into limitation mode: the registered set replaces
//! whatever the caller passes, options become read-only, the hosted
//! environment is forced, and only the first creation may succeed.
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::ResourceBackend;
use super::set::SetProcessor;
use crate::config::{
    AdminPolicy, BackendKind, ConfigurationSet, DscOptions, ExecutionPolicy, ModuleLocation,
    PowerShellOptions, ProcessorSettings, ProcessorType, processor_module_path,
};
use crate::dsc::{DscBackend, DscExecutable};
use crate::error::{EnvironmentError, FactoryError, Result};
use crate::exec::{Executor, SystemExecutor};
use crate::host::listener::DEFAULT_POLL_INTERVAL;
use crate::host::{
    EnvironmentKind, EnvironmentSource, HostEnvironment, PowerShellBackend, PwshHost,
    PwshOptions, ScriptHost, SystemEnvironment,
};
use crate::logging::Diagnostics;

/// Which backend set processors use, with its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorBackend {
    /// PowerShell DSC resources through a scripting host.
    PowerShell(PowerShellOptions),
    /// Resources run by the external `dsc` executable.
    Dsc(DscOptions),
}

impl Default for ProcessorBackend {
    fn default() -> Self {
        Self::PowerShell(PowerShellOptions::default())
    }
}

/// Creates [`SetProcessor`]s.
#[derive(Debug)]
pub struct SetProcessorFactory {
    backend: ProcessorBackend,
    policy: AdminPolicy,
    diagnostics: Arc<Diagnostics>,
    limitation_set: Option<ConfigurationSet>,
    limitation_used: AtomicBool,
    executor: Arc<dyn Executor>,
    script_host: Option<Arc<dyn ScriptHost>>,
    environment_source: Arc<dyn EnvironmentSource>,
}

impl SetProcessorFactory {
    /// A factory for `backend` with default policy and diagnostics.
    #[must_use]
    pub fn new(backend: ProcessorBackend) -> Self {
        Self {
            backend,
            policy: AdminPolicy::default(),
            diagnostics: Arc::new(Diagnostics::default()),
            limitation_set: None,
            limitation_used: AtomicBool::new(false),
            executor: Arc::new(SystemExecutor),
            script_host: None,
            environment_source: Arc::new(SystemEnvironment),
        }
    }

    /// A factory configured from a settings file.
    #[must_use]
    pub fn from_settings(settings: ProcessorSettings) -> Self {
        let backend = match settings.backend {
            BackendKind::PowerShell => ProcessorBackend::PowerShell(settings.powershell),
            BackendKind::Dsc => ProcessorBackend::Dsc(settings.dsc),
        };
        Self {
            policy: settings.policy,
            diagnostics: Arc::new(Diagnostics::new(settings.minimum_level)),
            ..Self::new(backend)
        }
    }

    /// Use `diagnostics` instead of the factory's own hub.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Run processes through `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Use an already-open engine context instead of starting `pwsh`.
    #[must_use]
    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(host);
        self
    }

    /// Read system-wide module path changes from `source`.
    #[must_use]
    pub fn with_environment_source(mut self, source: Arc<dyn EnvironmentSource>) -> Self {
        self.environment_source = source;
        self
    }

    /// The diagnostics hub every set processor reports through.
    #[must_use]
    pub const fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// The backend and its options.
    #[must_use]
    pub const fn backend(&self) -> &ProcessorBackend {
        &self.backend
    }

    /// Whether a limitation set has been registered.
    #[must_use]
    pub const fn is_limit_mode(&self) -> bool {
        self.limitation_set.is_some()
    }

    fn ensure_mutable(&self, property: &str) -> Result<()> {
        if self.is_limit_mode() {
            return Err(FactoryError::OperationInvalid(format!(
                "Setting {property} in limit mode is invalid."
            ))
            .into());
        }
        Ok(())
    }

    fn powershell_options(&mut self, property: &str) -> Result<&mut PowerShellOptions> {
        self.ensure_mutable(property)?;
        match &mut self.backend {
            ProcessorBackend::PowerShell(options) => Ok(options),
            ProcessorBackend::Dsc(_) => Err(FactoryError::OperationInvalid(format!(
                "{property} only applies to the PowerShell backend"
            ))
            .into()),
        }
    }

    /// Register the limitation set, entering limitation mode.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] if a limitation set is
    /// already registered.
    pub fn set_limitation_set(&mut self, set: ConfigurationSet) -> Result<()> {
        self.ensure_mutable("LimitationSet")?;
        self.limitation_set = Some(set);
        Ok(())
    }

    /// Replace the administrative policy.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode.
    pub fn set_policy(&mut self, policy: AdminPolicy) -> Result<()> {
        self.ensure_mutable("Policy")?;
        self.policy = policy;
        Ok(())
    }

    /// Choose the environment variant.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode or for
    /// the `dsc` backend.
    pub fn set_processor_type(&mut self, processor_type: ProcessorType) -> Result<()> {
        self.powershell_options("ProcessorType")?.processor_type = processor_type;
        Ok(())
    }

    /// Set the module directories prepended to the module path.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode or for
    /// the `dsc` backend.
    pub fn set_additional_module_paths(&mut self, paths: Vec<PathBuf>) -> Result<()> {
        self.powershell_options("AdditionalModulePaths")?
            .additional_module_paths = paths;
        Ok(())
    }

    /// Set the execution policy of hosted environments.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode or for
    /// the `dsc` backend.
    pub fn set_execution_policy(&mut self, policy: ExecutionPolicy) -> Result<()> {
        self.powershell_options("Policy")?.execution_policy = policy;
        Ok(())
    }

    /// Set where catalog modules are installed.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode or for
    /// the `dsc` backend.
    pub fn set_location(
        &mut self,
        location: ModuleLocation,
        custom_location: Option<PathBuf>,
    ) -> Result<()> {
        let options = self.powershell_options("Location")?;
        options.location = location;
        options.custom_location = custom_location;
        Ok(())
    }

    /// Set the `dsc` executable.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::OperationInvalid`] in limitation mode or for
    /// the PowerShell backend.
    pub fn set_dsc_executable(&mut self, executable: PathBuf) -> Result<()> {
        self.ensure_mutable("DscExecutablePath")?;
        match &mut self.backend {
            ProcessorBackend::Dsc(options) => {
                options.executable = Some(executable);
                Ok(())
            }
            ProcessorBackend::PowerShell(_) => Err(FactoryError::OperationInvalid(
                "DscExecutablePath only applies to the dsc backend".to_string(),
            )
            .into()),
        }
    }

    /// Create a set processor for `set`.
    ///
    /// In limitation mode the registered limitation set is used instead and
    /// only one call may succeed.  Every failure is reported through the
    /// diagnostics hub before it is returned.
    ///
    /// # Errors
    ///
    /// - [`FactoryError::OperationAlreadyInvoked`] on a repeated call in
    ///   limitation mode.
    /// - [`FactoryError::NotSupported`] if the set declares parameters or
    ///   variables.
    /// - [`FactoryError::PolicyBlocked`] if processing is disabled.
    /// - Any error constructing or validating the backend.
    pub fn create_set_processor(&self, set: Option<ConfigurationSet>) -> Result<SetProcessor> {
        self.create(set).map_err(|e| self.diagnostics.report(e))
    }

    fn create(&self, set: Option<ConfigurationSet>) -> Result<SetProcessor> {
        let limit_mode = self.is_limit_mode();
        self.diagnostics.info(&format!(
            "The set processor factory is running in limit mode: {limit_mode}."
        ));
        if limit_mode && self.limitation_used.swap(true, Ordering::SeqCst) {
            return Err(FactoryError::OperationAlreadyInvoked.into());
        }

        let set = if limit_mode {
            self.limitation_set.clone()
        } else {
            set
        };
        self.diagnostics.verbose(&format!(
            "Creating set processor for `{}`...",
            set.as_ref().map_or("<null>", |s| s.name.as_str())
        ));

        if set
            .as_ref()
            .is_some_and(|s| !s.parameters.is_empty() || !s.variables.is_empty())
        {
            self.diagnostics
                .error("  Parameters/variables are not yet supported.");
            return Err(FactoryError::NotSupported(
                "configuration sets with parameters or variables".to_string(),
            )
            .into());
        }

        if !self.policy.enabled {
            return Err(FactoryError::PolicyBlocked(
                "configuration processing is disabled".to_string(),
            )
            .into());
        }

        let backend: Arc<dyn ResourceBackend> = match &self.backend {
            ProcessorBackend::PowerShell(options) => {
                Arc::new(self.powershell_backend(options, limit_mode)?)
            }
            ProcessorBackend::Dsc(options) => Arc::new(DscBackend::new(DscExecutable::locate(
                options,
                Arc::clone(&self.executor),
                Arc::clone(&self.diagnostics),
            )?)),
        };

        self.diagnostics.verbose("... done creating set processor.");
        Ok(SetProcessor::new(
            set,
            backend,
            Arc::clone(&self.diagnostics),
            limit_mode,
        ))
    }

    fn powershell_backend(
        &self,
        options: &PowerShellOptions,
        limit_mode: bool,
    ) -> Result<PowerShellBackend> {
        let kind = if limit_mode || options.processor_type == ProcessorType::Hosted {
            EnvironmentKind::Hosted
        } else {
            EnvironmentKind::Default
        };
        let host: Arc<dyn ScriptHost> = match &self.script_host {
            Some(host) => Arc::clone(host),
            None => {
                let hosted = kind == EnvironmentKind::Hosted;
                Arc::new(PwshHost::open(
                    PwshOptions {
                        executable: options.executable.clone(),
                        isolated: hosted,
                        execution_policy: hosted.then_some(options.execution_policy),
                    },
                    Arc::clone(&self.executor),
                )?)
            }
        };

        let diagnostics = Arc::clone(&self.diagnostics);
        let environment = HostEnvironment::open(kind, host, Arc::clone(&diagnostics), |env| {
            for path in options.additional_module_paths.iter().rev() {
                env.prepend_module_path(&path.to_string_lossy())?;
            }
            let own_path = processor_module_path();
            env.prepend_module_path(&own_path.to_string_lossy())?;
            match options.location {
                ModuleLocation::WinGetModulePath => {
                    diagnostics.verbose("Using winget module path");
                    env.set_location(ModuleLocation::Custom, Some(&own_path))?;
                }
                ModuleLocation::Custom => {
                    let custom = options
                        .custom_location
                        .as_deref()
                        .filter(|p| !p.as_os_str().is_empty())
                        .ok_or_else(|| {
                            EnvironmentError::InvalidConfiguration(
                                "location is custom but no custom location is set".to_string(),
                            )
                        })?;
                    env.set_location(ModuleLocation::Custom, Some(custom))?;
                    env.prepend_module_path(&custom.to_string_lossy())?;
                }
                location @ (ModuleLocation::CurrentUser | ModuleLocation::AllUsers) => {
                    env.set_location(location, None)?;
                }
            }
            diagnostics.verbose(&format!(
                "  Effective module path:\n{}",
                env.module_path()?
            ));
            Ok(())
        })?;

        let backend = PowerShellBackend::new(environment);
        if options.watch_environment {
            backend.watch(Arc::clone(&self.environment_source), DEFAULT_POLL_INTERVAL)?;
        }
        Ok(backend)
    }
}

impl Default for SetProcessorFactory {
    fn default() -> Self {
        Self::new(ProcessorBackend::default())
    }
}
