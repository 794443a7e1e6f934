//! Conversions from host objects (`DscResourceInfo`, `PSModuleInfo`, catalog
//! search results) into the backend-neutral types.
use std::path::PathBuf;

use serde_json::Value;

use super::script::HostObject;
use crate::config::unit::parse_version;
use crate::processor::{
    CatalogModule, ImplementationKind, ModuleInfo, PropertyInfo, ResolvedResource,
};

/// Parent directories of the legacy Windows PowerShell v1 DSC resources.
/// Resources under these paths are never offered, even when the Windows
/// PowerShell module path has been removed.
pub const EXCLUDED_PARENT_PATHS: [&str; 2] = [
    r"C:\WINDOWS\system32\WindowsPowershell\v1.0\Modules\PsDesiredStateConfiguration\DscResources",
    r"C:\Program Files\WindowsPowerShell\Modules\PackageManagement\1.0.0.1",
];

/// Whether `parent_path` lies under one of [`EXCLUDED_PARENT_PATHS`].
#[must_use]
pub fn is_excluded(parent_path: &str) -> bool {
    EXCLUDED_PARENT_PATHS.iter().any(|excluded| {
        parent_path
            .get(..excluded.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(excluded))
    })
}

fn text(object: &HostObject, name: &str) -> Option<String> {
    object
        .str_field(name)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn nested_text(value: &Value, name: &str) -> Option<String> {
    value
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn version(object: &HostObject) -> Option<semver::Version> {
    object
        .str_field("Version")
        .and_then(|v| parse_version(v).ok())
}

fn kind(object: &HostObject) -> ImplementationKind {
    match object.str_field("ImplementationDetail") {
        Some(detail) if detail.eq_ignore_ascii_case("ClassBased") => ImplementationKind::Class,
        Some(detail) if detail.eq_ignore_ascii_case("ScriptBased") => ImplementationKind::Script,
        _ => object
            .str_field("ImplementedAs")
            .and_then(ImplementationKind::from_label)
            .unwrap_or_default(),
    }
}

fn property(value: &Value) -> Option<PropertyInfo> {
    Some(PropertyInfo {
        name: nested_text(value, "Name")?,
        property_type: nested_text(value, "PropertyType")
            .map(|t| t.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default(),
        mandatory: value
            .as_object()
            .and_then(|o| o.iter().find(|(k, _)| k.eq_ignore_ascii_case("IsMandatory")))
            .and_then(|(_, v)| v.as_bool())
            .unwrap_or(false),
        values: value
            .as_object()
            .and_then(|o| o.iter().find(|(k, _)| k.eq_ignore_ascii_case("Values")))
            .and_then(|(_, v)| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Convert a `Get-DscResource` result.  Objects without a name are skipped.
#[must_use]
pub fn resource_from_host(object: &HostObject) -> Option<ResolvedResource> {
    let name = text(object, "Name")?;
    let module_name = text(object, "ModuleName")
        .or_else(|| object.field("Module").and_then(|m| nested_text(m, "Name")));
    Some(ResolvedResource {
        friendly_name: text(object, "FriendlyName"),
        module_name,
        version: version(object),
        kind: kind(object),
        path: text(object, "Path").map(PathBuf::from),
        parent_path: text(object, "ParentPath").map(PathBuf::from),
        properties: object
            .field("Properties")
            .and_then(Value::as_array)
            .map(|properties| properties.iter().filter_map(property).collect())
            .unwrap_or_default(),
        ..ResolvedResource::named(&name)
    })
}

/// Convert a `Get-Module` result.
#[must_use]
pub fn module_from_host(object: &HostObject) -> Option<ModuleInfo> {
    Some(ModuleInfo {
        name: text(object, "Name")?,
        version: version(object),
        path: text(object, "ModuleBase").map(PathBuf::from),
        author: text(object, "Author"),
        description: text(object, "Description"),
    })
}

/// Convert a `Find-Module` or `Find-DscResource` result.  `resource_name`
/// is the resource the search was for.
#[must_use]
pub fn catalog_from_host(object: &HostObject, resource_name: &str) -> Option<CatalogModule> {
    // Find-DscResource reports the resource as Name and the module as ModuleName.
    let name = text(object, "ModuleName").or_else(|| text(object, "Name"))?;
    let version = version(object);
    let prerelease = version.as_ref().is_some_and(|v| !v.pre.is_empty())
        || object
            .field("AdditionalMetadata")
            .and_then(|m| nested_text(m, "IsPrerelease"))
            .is_some_and(|flag| flag.eq_ignore_ascii_case("true"));
    Some(CatalogModule {
        name,
        version,
        repository: text(object, "Repository"),
        resource_name: resource_name.to_string(),
        prerelease,
    })
}
