//! Scripting-host backend: PowerShell DSC resources driven through an engine
//! context.
//!
//! - [`script`]: the [`ScriptHost`] seam and its command/result types
//! - [`pwsh`]: [`PwshHost`], the `pwsh` process implementation
//! - [`environment`]: [`HostEnvironment`], validation and module management
//! - [`dsc_module`]: `Get-DscResource` / `Invoke-DscResource` handling
//! - [`listener`]: module path change watcher
//! - [`backend`]: [`PowerShellBackend`], the resolver-facing adapter
pub mod backend;
pub mod dsc_module;
pub mod environment;
pub mod listener;
pub mod pwsh;
pub mod resource_info;
pub mod script;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::PowerShellBackend;
pub use environment::{EnvironmentKind, HostEnvironment};
pub use listener::{EnvironmentListener, EnvironmentSource, SystemEnvironment};
pub use pwsh::{PwshHost, PwshOptions};
pub use script::{HostCommand, HostObject, HostOutput, ScriptHost};
