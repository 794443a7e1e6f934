//! Wire types for the resource runner's JSON lines.
//!
//! Field names are camelCase on the wire but matched without regard to case
//! (see [`from_line`]).  Fields a type does not know are kept in `extra`
//! rather than dropped.
use std::path::PathBuf;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::unit::parse_version;
use crate::processor::{ExportedInstance, ImplementationKind, PropertyInfo, ResolvedResource};
use crate::value::ValueSet;

/// A JSON line type whose top-level field names are known.
pub trait WireRecord: DeserializeOwned {
    /// Canonical spelling of every top-level field.
    const FIELDS: &'static [&'static str];
}

/// Parse one output line, renaming top-level keys that match a known field
/// case-insensitively to its canonical spelling first.
///
/// # Errors
///
/// Returns the `serde_json` error if the line is not JSON or does not fit `T`.
pub fn from_line<T: WireRecord>(line: &str) -> serde_json::Result<T> {
    let mut value: Value = serde_json::from_str(line)?;
    if let Value::Object(object) = &mut value {
        *object = canonical_keys(std::mem::take(object), T::FIELDS);
    }
    serde_json::from_value(value)
}

fn canonical_keys(object: Map<String, Value>, fields: &[&str]) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| {
            let key = fields
                .iter()
                .find(|field| field.eq_ignore_ascii_case(&key))
                .map_or(key, |field| (*field).to_string());
            (key, value)
        })
        .collect()
}

/// One line of `resource list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListItem {
    /// Fully qualified resource type (`Owner/Name`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// `resource`, `adapter`, `group`, `importer` or `exporter`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Resource version.
    #[serde(default)]
    pub version: Option<String>,
    /// Operations the resource implements.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Path of the resource manifest.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Directory the manifest lives in.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Resource manifest, including the embedded JSON schema.
    #[serde(default)]
    pub manifest: Option<Value>,
    /// Everything else the runner reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireRecord for ResourceListItem {
    const FIELDS: &'static [&'static str] = &[
        "type",
        "kind",
        "version",
        "capabilities",
        "path",
        "directory",
        "description",
        "manifest",
    ];
}

impl ResourceListItem {
    /// Whether the runner advertises `capability` (case-insensitive).
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }

    /// The embedded JSON schema from the manifest, if any.
    fn schema(&self) -> Option<&Map<String, Value>> {
        let schema = self.manifest.as_ref()?.get("schema")?;
        schema
            .get("embedded")
            .unwrap_or(schema)
            .as_object()
    }

    /// Convert the schema's `properties` into property descriptions.
    #[must_use]
    pub fn properties(&self) -> Vec<PropertyInfo> {
        let Some(schema) = self.schema() else {
            return Vec::new();
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| PropertyInfo {
                        name: name.clone(),
                        property_type: schema_type(property),
                        mandatory: required.contains(&name.as_str()),
                        values: property
                            .get("enum")
                            .and_then(Value::as_array)
                            .map(|values| values.iter().map(scalar_text).collect())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build the resolved resource this list item describes.
    #[must_use]
    pub fn into_resource(self) -> ResolvedResource {
        let properties = self.properties();
        let supports_export = self.has_capability("export");
        let (owner, name) = self
            .resource_type
            .split_once('/')
            .map_or((None, self.resource_type.as_str()), |(owner, name)| {
                (Some(owner.to_string()), name)
            });
        ResolvedResource {
            name: name.to_string(),
            friendly_name: Some(self.resource_type.clone()),
            module_name: owner,
            version: self.version.as_deref().and_then(|v| parse_version(v).ok()),
            kind: self
                .kind
                .as_deref()
                .and_then(ImplementationKind::from_label)
                .unwrap_or(ImplementationKind::Binary),
            properties,
            supports_export,
            path: self.path,
            parent_path: self.directory,
            ..ResolvedResource::named(name)
        }
    }
}

fn schema_type(property: &Value) -> String {
    match property.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => String::new(),
    }
}

fn scalar_text(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

/// The line written by `resource get`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    /// Current state of the instance.
    pub actual_state: Map<String, Value>,
    /// Everything else the runner reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireRecord for GetResponse {
    const FIELDS: &'static [&'static str] = &["actualState"];
}

/// The line written by `resource test`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResponse {
    /// Whether the instance is in the desired state; anything but a boolean
    /// is rejected by [`TestResponse::desired_state`].
    #[serde(default)]
    pub in_desired_state: Option<Value>,
    /// Current state of the instance.
    #[serde(default)]
    pub actual_state: Option<Map<String, Value>>,
    /// Properties that differ from the desired state.
    #[serde(default)]
    pub differing_properties: Vec<String>,
    /// Everything else the runner reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireRecord for TestResponse {
    const FIELDS: &'static [&'static str] =
        &["inDesiredState", "actualState", "differingProperties"];
}

impl TestResponse {
    /// `inDesiredState` when it is present and a boolean.
    #[must_use]
    pub fn desired_state(&self) -> Option<bool> {
        self.in_desired_state.as_ref().and_then(Value::as_bool)
    }
}

/// The line written by `resource set`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResponse {
    /// State before the change.
    #[serde(default)]
    pub before_state: Option<Map<String, Value>>,
    /// State after the change.
    #[serde(default)]
    pub after_state: Option<Map<String, Value>>,
    /// Properties the change touched.
    #[serde(default)]
    pub changed_properties: Vec<String>,
    /// Explicit reboot flag.
    #[serde(default, alias = "restartRequired")]
    pub reboot_required: Option<bool>,
    /// Everything else the runner reported.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireRecord for SetResponse {
    const FIELDS: &'static [&'static str] = &[
        "beforeState",
        "afterState",
        "changedProperties",
        "rebootRequired",
        "restartRequired",
    ];
}

impl SetResponse {
    /// Whether the change needs a reboot: either the explicit flag or a
    /// non-empty `_restartRequired` list in the after state.
    #[must_use]
    pub fn needs_reboot(&self) -> bool {
        self.reboot_required.unwrap_or_else(|| {
            self.after_state
                .as_ref()
                .and_then(|state| state.get("_restartRequired"))
                .is_some_and(|restart| match restart {
                    Value::Array(items) => !items.is_empty(),
                    Value::Bool(flag) => *flag,
                    _ => false,
                })
        })
    }
}

/// One line written by `resource export`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    /// Type the runner reports for the instance.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Instance name.
    #[serde(default)]
    pub name: Option<String>,
    /// Instance properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Everything else the runner reported, kept as settings.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireRecord for ExportItem {
    const FIELDS: &'static [&'static str] = &["type", "name", "properties"];
}

impl From<ExportItem> for ExportedInstance {
    fn from(item: ExportItem) -> Self {
        let mut settings = ValueSet::from(item.properties);
        for (key, value) in item.extra {
            if settings.get(&key).is_none() {
                settings.insert(key, value);
            }
        }
        Self {
            resource_type: item.resource_type,
            name: item.name,
            settings,
        }
    }
}
