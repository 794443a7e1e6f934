//! The script-engine seam: commands in, tagged objects and error records out.
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ModuleSpec;
use crate::error::Result;
use crate::value::NativeResult;

/// One argument of a [`HostCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostArgument {
    /// `-Name <value>`.
    Value(Value),
    /// `-Name` with no value.
    Switch,
}

/// A single cmdlet call with named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HostCommand {
    /// Cmdlet name, e.g. `Get-DscResource`.
    pub name: String,
    /// Parameters in the order they were added.
    pub parameters: Vec<(String, HostArgument)>,
}

impl HostCommand {
    /// A command with no parameters.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: Vec::new(),
        }
    }

    /// Add `-name value`.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters
            .push((name.to_string(), HostArgument::Value(value.into())));
        self
    }

    /// Add `-name value` when `value` is present.
    #[must_use]
    pub fn param_opt(self, name: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Add `-name`.
    #[must_use]
    pub fn switch(mut self, name: &str) -> Self {
        self.parameters.push((name.to_string(), HostArgument::Switch));
        self
    }

    /// Add `-name` when `enabled`.
    #[must_use]
    pub fn switch_if(self, name: &str, enabled: bool) -> Self {
        if enabled { self.switch(name) } else { self }
    }

    /// Value of a named parameter, case-insensitively.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&HostArgument> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, a)| a)
    }

    /// Whether the command is `name`, case-insensitively.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Parameters as a splatting table: switches become `true`.
    #[must_use]
    pub fn splat(&self) -> Map<String, Value> {
        self.parameters
            .iter()
            .map(|(name, argument)| {
                let value = match argument {
                    HostArgument::Value(value) => value.clone(),
                    HostArgument::Switch => Value::Bool(true),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "['{}'", self.name)?;
        if !self.parameters.is_empty() {
            f.write_str(" Parameters: ")?;
            for (name, argument) in &self.parameters {
                match argument {
                    HostArgument::Value(value) => write!(f, "{name} = '{value}' ")?,
                    HostArgument::Switch => write!(f, "{name} ")?,
                }
            }
        }
        f.write_str("]")
    }
}

/// A module constraint as a host argument: a bare name when unversioned,
/// otherwise a module-specification table.
#[must_use]
pub fn module_argument(spec: &ModuleSpec) -> Value {
    if !spec.is_versioned() {
        return Value::String(spec.name.clone());
    }
    let mut table = Map::new();
    table.insert("ModuleName".to_string(), spec.name.clone().into());
    if let Some(required) = &spec.required_version {
        table.insert("RequiredVersion".to_string(), host_version(required).into());
    } else {
        if let Some(min) = &spec.min_version {
            table.insert("ModuleVersion".to_string(), host_version(min).into());
        }
        if let Some(max) = &spec.max_version {
            table.insert("MaximumVersion".to_string(), host_version(max).into());
        }
    }
    Value::Object(table)
}

/// Render a version the way the host's version parser expects: up to four
/// dotted numbers, no prerelease label.
#[must_use]
pub fn host_version(version: &semver::Version) -> String {
    let base = format!("{}.{}.{}", version.major, version.minor, version.patch);
    match version.build.as_str().parse::<u64>() {
        Ok(revision) => format!("{base}.{revision}"),
        Err(_) => base,
    }
}

/// One property of a host object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostProperty {
    /// Property name.
    pub name: String,
    /// Property value.
    #[serde(default)]
    pub value: Value,
}

/// A non-table object written to the output stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectValue {
    /// Type names, most derived first.
    #[serde(default)]
    pub type_names: Vec<String>,
    /// Properties in declaration order.
    #[serde(default)]
    pub properties: Vec<HostProperty>,
}

/// An item written to the host's output stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum HostObject {
    /// A hashtable (script resources return these).
    Hashtable(Map<String, Value>),
    /// An object with properties (class resources, cmdlet results).
    Object(ObjectValue),
    /// A string, number, boolean or null.
    Scalar(Value),
}

impl HostObject {
    /// Look up a key or property, case-insensitively.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Hashtable(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
            Self::Object(object) => object
                .properties
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .map(|p| &p.value),
            Self::Scalar(_) => None,
        }
    }

    /// A string field; `None` when missing, null or not a string.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// The most derived type name of an object.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Object(object) => object.type_names.first().map(String::as_str),
            Self::Hashtable(_) | Self::Scalar(_) => None,
        }
    }

    /// The normalised shape; scalars have none.
    #[must_use]
    pub fn into_native(self) -> Option<NativeResult> {
        match self {
            Self::Hashtable(map) => Some(NativeResult::Table(map)),
            Self::Object(object) => Some(NativeResult::Object {
                type_name: object.type_names.into_iter().next(),
                properties: object
                    .properties
                    .into_iter()
                    .map(|p| (p.name, p.value))
                    .collect(),
            }),
            Self::Scalar(_) => None,
        }
    }
}

/// An error record written to the error stream or thrown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostErrorRecord {
    /// Rendered error text.
    pub message: String,
    /// Fully qualified error id, e.g. `ExceptionWhenSetting,GetResourceFromKeyword`.
    #[serde(default)]
    pub fully_qualified_error_id: Option<String>,
    /// Error category name.
    #[serde(default)]
    pub category: Option<String>,
    /// Full type name of the underlying exception.
    #[serde(default)]
    pub exception_type: Option<String>,
}

impl HostErrorRecord {
    /// An error with only a message.
    #[must_use]
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Self::default()
        }
    }

    /// Set the fully qualified error id.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.fully_qualified_error_id = Some(id.to_string());
        self
    }

    /// Set the exception type.
    #[must_use]
    pub fn with_exception(mut self, exception_type: &str) -> Self {
        self.exception_type = Some(exception_type.to_string());
        self
    }

    /// Whether the record's id starts with `id`, case-insensitively.
    #[must_use]
    pub fn has_id(&self, id: &str) -> bool {
        self.fully_qualified_error_id
            .as_deref()
            .and_then(|fqid| fqid.get(..id.len()))
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(id))
    }
}

impl fmt::Display for HostErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything one command produced.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostOutput {
    /// Output stream, in order.
    #[serde(default)]
    pub objects: Vec<HostObject>,
    /// Error stream plus any terminating error.
    #[serde(default)]
    pub errors: Vec<HostErrorRecord>,
    /// Session variables observed after the command ran.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl HostOutput {
    /// Output with the given objects and no errors.
    #[must_use]
    pub fn objects(objects: Vec<HostObject>) -> Self {
        Self {
            objects,
            ..Self::default()
        }
    }

    /// Output with only errors.
    #[must_use]
    pub fn errors(errors: Vec<HostErrorRecord>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// Whether anything was written to the error stream.
    #[must_use]
    pub fn had_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Every error message joined by newlines, `None` without errors.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.had_errors().then(|| {
            self.errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    /// The first output object, if any.
    #[must_use]
    pub fn first(&self) -> Option<&HostObject> {
        self.objects.first()
    }
}

/// A script-engine execution context.
///
/// Implementations keep session state (module path, variables, imported
/// modules) across calls.
pub trait ScriptHost: Send + Sync + fmt::Debug {
    /// Run one command.  Non-terminating and terminating errors are
    /// returned in [`HostOutput::errors`]; `Err` means the host itself
    /// could not be driven.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot run the command at all.
    fn invoke(&self, command: &HostCommand) -> Result<HostOutput>;

    /// Read a session variable (`env:` prefix for environment variables).
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn get_variable(&self, name: &str) -> Result<Option<Value>>;

    /// Set a session variable (`env:` prefix for environment variables).
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the value.
    fn set_variable(&self, name: &str, value: Value) -> Result<()>;

    /// Error text recorded while the context was opened.
    fn open_errors(&self) -> Vec<String>;
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use semver::Version;
    use serde_json::json;

    #[test]
    fn command_display_lists_parameters() {
        let command = HostCommand::new("Get-Module")
            .param("Name", "PowerShellGet")
            .switch("ListAvailable");
        assert_eq!(
            command.to_string(),
            "['Get-Module' Parameters: Name = '\"PowerShellGet\"' ListAvailable ]"
        );
    }

    #[test]
    fn splat_turns_switches_into_true() {
        let command = HostCommand::new("Install-Module")
            .param("Name", "xNetworking")
            .switch_if("AllowPrerelease", true)
            .switch_if("Force", false)
            .param_opt("Repository", None::<String>);
        let splat = command.splat();
        assert_eq!(splat.len(), 2);
        assert_eq!(splat["AllowPrerelease"], json!(true));
    }

    #[test]
    fn unversioned_module_is_a_bare_name() {
        assert_eq!(
            module_argument(&ModuleSpec::named("PSDesiredStateConfiguration")),
            json!("PSDesiredStateConfiguration")
        );
    }

    #[test]
    fn versioned_module_is_a_specification_table() {
        let spec = ModuleSpec::named("PowerShellGet").with_min(Version::new(2, 2, 5));
        assert_eq!(
            module_argument(&spec),
            json!({"ModuleName": "PowerShellGet", "ModuleVersion": "2.2.5"})
        );
        let pinned = ModuleSpec::named("PSDesiredStateConfiguration")
            .with_min(Version::new(2, 0, 0))
            .with_required(Version::new(2, 0, 7));
        assert_eq!(
            module_argument(&pinned),
            json!({"ModuleName": "PSDesiredStateConfiguration", "RequiredVersion": "2.0.7"})
        );
    }

    #[test]
    fn host_version_keeps_fourth_component() {
        let version = crate::config::unit::parse_version("1.0.0.1").unwrap();
        assert_eq!(host_version(&version), "1.0.0.1");
        assert_eq!(host_version(&Version::parse("2.0.0-beta").unwrap()), "2.0.0");
    }

    #[test]
    fn envelope_objects_are_tagged() {
        let output: HostOutput = serde_json::from_value(json!({
            "objects": [
                {"kind": "hashtable", "value": {"Ensure": "Present"}},
                {"kind": "object", "value": {
                    "typeNames": ["InvokeDscResourceTestResult", "System.Object"],
                    "properties": [{"name": "InDesiredState", "value": true}]
                }},
                {"kind": "scalar", "value": 3}
            ],
            "errors": [{"message": "boom", "fullyQualifiedErrorId": "X,Y"}]
        }))
        .unwrap();
        assert_eq!(output.objects.len(), 3);
        assert_eq!(output.objects[0].str_field("ensure"), Some("Present"));
        assert_eq!(
            output.objects[1].type_name(),
            Some("InvokeDscResourceTestResult")
        );
        assert!(output.objects[2].clone().into_native().is_none());
        assert_eq!(output.error_message().as_deref(), Some("boom"));
        assert!(output.errors[0].has_id("x,y"));
    }

    #[test]
    fn object_normalises_like_a_table() {
        let object = HostObject::Object(ObjectValue {
            type_names: vec!["File".to_string()],
            properties: vec![HostProperty {
                name: "Contents".to_string(),
                value: json!("hi"),
            }],
        });
        let table = HostObject::Hashtable(
            json!({"Contents": "hi"}).as_object().cloned().unwrap(),
        );
        assert_eq!(
            object.into_native().unwrap().into_value_set(),
            table.into_native().unwrap().into_value_set()
        );
    }

    #[test]
    fn error_message_is_none_without_errors() {
        assert!(HostOutput::default().error_message().is_none());
    }
}
