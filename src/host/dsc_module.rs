//! `PSDesiredStateConfiguration` v2 commands and result handling.
//!
//! Builds `Get-DscResource` / `Invoke-DscResource` commands and turns their
//! output into resolved resources and verb results.  Nothing here talks to a
//! host directly; the environment runs the commands.
use semver::Version;
use super::resource_info::{is_excluded, resource_from_host};
use super::script::{HostCommand, HostObject, HostOutput, module_argument};
use crate::config::ModuleSpec;
use crate::error::{EnvironmentError, InvokeError, ProcessorError, ResolveError, Result};
use crate::processor::{ResolvedResource, SetOutcome, Verb};
use crate::value::{NativeResult, ValueSet};

/// Module that provides `Invoke-DscResource`.
pub const PSDSC_MODULE: &str = "PSDesiredStateConfiguration";

/// The only `PSDesiredStateConfiguration` version this processor drives.
pub const PSDSC_VERSION: Version = Version::new(2, 0, 7);

/// Error id raised when two modules define the same resource keyword.
pub const MODULE_CONFLICT_ERROR_ID: &str = "ExceptionWhenSetting,GetResourceFromKeyword";

/// Error id `Get-DscResource` writes when nothing matches the name.
pub const RESOURCE_NOT_FOUND_ERROR_ID: &str = "ResourceNotFound";

const IN_DESIRED_STATE: &str = "InDesiredState";
const REBOOT_REQUIRED: &str = "RebootRequired";

/// Error ids and exception types that mean the settings could not be bound
/// to the resource, rather than the resource failing.
const PROPERTY_ERROR_IDS: [&str; 4] = [
    "PropertyAssignmentException",
    "ParameterArgumentTransformationError",
    "ParameterArgumentValidationError",
    "InvalidCastConstructorException",
];
const PROPERTY_EXCEPTION_TYPES: [&str; 3] = [
    "System.Management.Automation.PropertyAssignmentException",
    "System.Management.Automation.ParameterBindingException",
    "System.Management.Automation.PSInvalidCastException",
];

/// `PSDesiredStateConfiguration` pinned to [`PSDSC_VERSION`].
#[must_use]
pub fn module_spec() -> ModuleSpec {
    ModuleSpec::named(PSDSC_MODULE).with_required(PSDSC_VERSION)
}

/// `Get-DscResource [-Name <name>] [-Module <module>]`.
#[must_use]
pub fn get_dsc_resource_command(name: Option<&str>, module: Option<&ModuleSpec>) -> HostCommand {
    HostCommand::new("Get-DscResource")
        .param_opt("Name", name)
        .param_opt("Module", module.map(module_argument))
}

/// Convert `Get-DscResource` output, dropping legacy v1 resources.
///
/// # Errors
///
/// Returns [`ResolveError::ModuleConflict`] when the host reports two
/// modules defining the same resource, or [`ProcessorError::Environment`]
/// for any other host error.
pub fn parse_dsc_resources(output: HostOutput, unit: &str) -> Result<Vec<ResolvedResource>> {
    if let Some(conflict) = output
        .errors
        .iter()
        .find(|e| e.has_id(MODULE_CONFLICT_ERROR_ID))
    {
        return Err(ResolveError::ModuleConflict {
            unit: unit.to_string(),
            message: conflict.message.clone(),
        }
        .into());
    }
    let failures: Vec<&str> = output
        .errors
        .iter()
        .filter(|e| !e.has_id(RESOURCE_NOT_FOUND_ERROR_ID))
        .map(|e| e.message.as_str())
        .collect();
    if !failures.is_empty() {
        return Err(host_error("Get-DscResource", failures.join("\n")));
    }
    Ok(output
        .objects
        .iter()
        .filter_map(resource_from_host)
        .filter(|r| {
            r.parent_path
                .as_ref()
                .is_none_or(|p| !is_excluded(&p.to_string_lossy()))
        })
        .collect())
}

fn host_error(command: &str, message: String) -> ProcessorError {
    EnvironmentError::HostCommand {
        command: command.to_string(),
        message,
    }
    .into()
}

/// `Invoke-DscResource -Name <name> [-ModuleName <module>] -Property <settings> -Method <verb>`.
#[must_use]
pub fn invoke_command(
    verb: Verb,
    name: &str,
    module: Option<&ModuleSpec>,
    settings: &ValueSet,
) -> HostCommand {
    let method = match verb {
        Verb::Get => "Get",
        Verb::Test => "Test",
        Verb::Set | Verb::List | Verb::Export => "Set",
    };
    HostCommand::new("Invoke-DscResource")
        .param("Name", name)
        .param_opt("ModuleName", module.map(module_argument))
        .param("Property", settings.clone().into_json())
        .param("Method", method)
}

/// Whether every error in `output` is a property-binding error.
#[must_use]
pub fn only_property_errors(output: &HostOutput) -> bool {
    output.had_errors()
        && output.errors.iter().all(|e| {
            PROPERTY_ERROR_IDS.iter().any(|id| e.has_id(id))
                || e.exception_type.as_deref().is_some_and(|t| {
                    PROPERTY_EXCEPTION_TYPES
                        .iter()
                        .any(|known| t.eq_ignore_ascii_case(known))
                })
        })
}

fn invalid(verb: Verb, unit: &str, message: &str) -> ProcessorError {
    InvokeError::InvalidResult {
        verb,
        unit: unit.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn internal(verb: Verb, unit: &str, message: String) -> ProcessorError {
    InvokeError::ResourceInternal {
        verb,
        unit: unit.to_string(),
        message,
    }
    .into()
}

fn first_native(output: HostOutput, verb: Verb, unit: &str) -> Result<NativeResult> {
    output
        .objects
        .into_iter()
        .next()
        .and_then(HostObject::into_native)
        .ok_or_else(|| invalid(verb, unit, "no result object"))
}

/// Interpret `Invoke-DscResource -Method Get` output.
///
/// # Errors
///
/// Fails on host errors or when no result object was written.
pub fn parse_get(output: HostOutput, unit: &str) -> Result<ValueSet> {
    if let Some(message) = output.error_message() {
        return Err(internal(Verb::Get, unit, message));
    }
    Ok(first_native(output, Verb::Get, unit)?.into_value_set())
}

/// Interpret `Invoke-DscResource -Method Test` output.
///
/// # Errors
///
/// Fails on host errors, or when `InDesiredState` is missing or not a
/// boolean.
pub fn parse_test(output: HostOutput, unit: &str) -> Result<bool> {
    if let Some(message) = output.error_message() {
        return Err(internal(Verb::Test, unit, message));
    }
    first_native(output, Verb::Test, unit)?
        .bool_field(IN_DESIRED_STATE)
        .ok_or_else(|| invalid(Verb::Test, unit, "InDesiredState is missing or not a boolean"))
}

/// Interpret `Invoke-DscResource -Method Set` output.
///
/// # Errors
///
/// Returns [`InvokeError::PropertyAssignment`] when every error is a
/// property-binding error, [`InvokeError::ResourceInternal`] for any other
/// error, and [`InvokeError::InvalidResult`] when `RebootRequired` is
/// missing or not a boolean.
pub fn parse_set(output: HostOutput, unit: &str) -> Result<SetOutcome> {
    if let Some(message) = output.error_message() {
        if only_property_errors(&output) {
            return Err(InvokeError::PropertyAssignment {
                verb: Verb::Set,
                unit: unit.to_string(),
                message,
            }
            .into());
        }
        return Err(internal(Verb::Set, unit, message));
    }
    let reboot_required = first_native(output, Verb::Set, unit)?
        .bool_field(REBOOT_REQUIRED)
        .ok_or_else(|| invalid(Verb::Set, unit, "RebootRequired is missing or not a boolean"))?;
    Ok(SetOutcome { reboot_required })
}
