//! Processor settings: backend selection and backend options, loaded from TOML.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::toml_loader;
use crate::error::ConfigError;
use crate::exec::EnvVar;
use crate::logging::DiagnosticLevel;

/// Which scripting-host environment variant to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorType {
    /// Attach to an already-initialised host.
    Default,
    /// Construct an isolated, policy-constrained host.
    #[default]
    Hosted,
}

/// Execution policy applied to a hosted environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    /// Leave the host's policy alone.
    Default,
    /// Run everything, warn on internet-zone scripts.
    Unrestricted,
    /// Local scripts run; downloaded scripts must be signed.
    #[default]
    RemoteSigned,
    /// Every script must be signed.
    AllSigned,
    /// No scripts run.
    Restricted,
    /// Nothing is blocked.
    Bypass,
    /// No policy set in this scope.
    Undefined,
}

impl ExecutionPolicy {
    /// Name as accepted by `-ExecutionPolicy`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Unrestricted => "Unrestricted",
            Self::RemoteSigned => "RemoteSigned",
            Self::AllSigned => "AllSigned",
            Self::Restricted => "Restricted",
            Self::Bypass => "Bypass",
            Self::Undefined => "Undefined",
        }
    }
}

impl fmt::Display for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where modules fetched from the catalog are installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleLocation {
    /// `Install-Module -Scope CurrentUser`.
    #[default]
    CurrentUser,
    /// `Install-Module -Scope AllUsers`.
    AllUsers,
    /// Saved into the processor's own module directory.
    #[serde(alias = "winget")]
    WinGetModulePath,
    /// Saved into a caller-supplied directory.
    Custom,
}

/// The processor's own module directory, always on the module path.
#[must_use]
pub fn processor_module_path() -> PathBuf {
    if cfg!(windows) {
        std::env::var_os("LOCALAPPDATA")
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join("Microsoft")
            .join("WinGet")
            .join("Configuration")
            .join("Modules")
    } else {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dsc-processor")
            .join("Modules")
    }
}

/// Options for the scripting-host backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerShellOptions {
    /// Environment variant.
    pub processor_type: ProcessorType,
    /// Extra module directories, prepended to the module path in order.
    pub additional_module_paths: Vec<PathBuf>,
    /// Execution policy for hosted environments.
    pub execution_policy: ExecutionPolicy,
    /// Module install location.
    pub location: ModuleLocation,
    /// Directory used when `location` is [`ModuleLocation::Custom`].
    pub custom_location: Option<PathBuf>,
    /// Host executable; `pwsh` on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// Pick up module path changes made while a hosted environment runs.
    pub watch_environment: bool,
}

/// Options for the external-process backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DscOptions {
    /// Resource-runner executable; `dsc` on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// Environment adjustments applied to every invocation.
    pub env: Vec<EnvVar>,
}

/// Administrative switch consulted when a set processor is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminPolicy {
    /// Whether configuration processing is allowed at all.
    pub enabled: bool,
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Backend named in a settings file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Scripting-host backend.
    #[default]
    #[serde(alias = "pwsh")]
    PowerShell,
    /// External-process backend.
    Dsc,
}

/// Contents of a processor settings file.
///
/// ```toml
/// backend = "powershell"
/// minimum_level = "verbose"
///
/// [powershell]
/// processor_type = "hosted"
/// location = "custom"
/// custom_location = "/opt/modules"
///
/// [policy]
/// enabled = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorSettings {
    /// Backend to use.
    pub backend: BackendKind,
    /// Lowest diagnostic level delivered to subscribers.
    pub minimum_level: DiagnosticLevel,
    /// Scripting-host options.
    pub powershell: PowerShellOptions,
    /// External-process options.
    pub dsc: DscOptions,
    /// Administrative policy.
    pub policy: AdminPolicy,
}

impl ProcessorSettings {
    /// Load settings; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        toml_loader::load_config(path)
    }
}
