// Shared helpers for integration tests.
//
// Provides a scripting host that implements a `File` DSC resource against
// the real filesystem, and a scripted `dsc` runner, so each integration test
// can drive the public factory without PowerShell or dsc installed.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value, json};

use dsc_processor::config::{ConfigurationSet, ConfigurationUnit, DscOptions, PowerShellOptions};
use dsc_processor::error::{ProcessError, Result};
use dsc_processor::exec::{ExecResult, Executor, ProcessInvocation};
use dsc_processor::host::script::{HostArgument, HostErrorRecord, HostProperty, ObjectValue};
use dsc_processor::host::{HostCommand, HostObject, HostOutput, ScriptHost};
use dsc_processor::processor::{ProcessorBackend, SetProcessorFactory};

/// Module that ships the `File` resource.
pub const PSDSC: &str = "PSDesiredStateConfiguration";

fn object(properties: &Value) -> HostObject {
    HostObject::Object(ObjectValue {
        type_names: Vec::new(),
        properties: properties
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(name, value)| HostProperty {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn module(name: &str, version: &str) -> HostObject {
    object(&json!({
        "Name": name,
        "Version": version,
        "ModuleBase": format!("/modules/{name}/{version}"),
    }))
}

fn file_resource(module_version: &str) -> HostObject {
    object(&json!({
        "Name": "File",
        "ModuleName": PSDSC,
        "Version": module_version,
        "ImplementedAs": "PowerShell",
        "Properties": [
            { "Name": "DestinationPath", "PropertyType": "[string]", "IsMandatory": true },
            { "Name": "Contents", "PropertyType": "[string]", "IsMandatory": false },
            { "Name": "Ensure", "PropertyType": "[string]", "IsMandatory": false,
              "Values": ["Present", "Absent"] },
        ],
    }))
}

/// A scripting host whose only resource is `PSDesiredStateConfiguration/File`,
/// backed by real files.
///
/// `File` settings: `DestinationPath`, `Contents`, `Ensure` (`Present` by
/// default).
#[derive(Debug)]
pub struct FileResourceHost {
    variables: Mutex<HashMap<String, Value>>,
    commands: Mutex<Vec<HostCommand>>,
    providers: usize,
}

impl FileResourceHost {
    /// A host with one installed `File` provider.
    pub fn new() -> Self {
        Self::with_providers(1)
    }

    /// A host where `count` module versions each provide `File`.
    pub fn with_providers(count: usize) -> Self {
        let variables = HashMap::from([
            ("psedition".to_string(), json!("Core")),
            ("env:psmodulepath".to_string(), json!("")),
        ]);
        Self {
            variables: Mutex::new(variables),
            commands: Mutex::new(Vec::new()),
            providers: count,
        }
    }

    /// Names of every command run so far.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// How many times `name` ran.
    pub fn count(&self, name: &str) -> usize {
        self.command_names()
            .iter()
            .filter(|c| c.eq_ignore_ascii_case(name))
            .count()
    }

    fn invoke_file(command: &HostCommand) -> HostOutput {
        let property = match command.parameter("Property") {
            Some(HostArgument::Value(Value::Object(map))) => map.clone(),
            _ => Map::new(),
        };
        let path = property
            .get("DestinationPath")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_default();
        let contents = property
            .get("Contents")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let present = property
            .get("Ensure")
            .and_then(Value::as_str)
            .is_none_or(|e| e.eq_ignore_ascii_case("Present"));
        let method = match command.parameter("Method") {
            Some(HostArgument::Value(Value::String(m))) => m.clone(),
            _ => String::new(),
        };

        let actual = std::fs::read_to_string(&path).ok();
        let result = match method.as_str() {
            "Get" => {
                let mut table = Map::new();
                table.insert("DestinationPath".to_string(), json!(path.display().to_string()));
                table.insert("Contents".to_string(), json!(actual.clone().unwrap_or_default()));
                table.insert(
                    "Ensure".to_string(),
                    json!(if actual.is_some() { "Present" } else { "Absent" }),
                );
                HostObject::Hashtable(table)
            }
            "Test" => {
                let in_state = if present {
                    actual.as_deref() == Some(contents.as_str())
                } else {
                    actual.is_none()
                };
                object(&json!({ "InDesiredState": in_state }))
            }
            _ => {
                let written = if present {
                    std::fs::write(&path, &contents)
                } else {
                    std::fs::remove_file(&path)
                };
                if let Err(e) = written {
                    return HostOutput::errors(vec![HostErrorRecord::new(&e.to_string())]);
                }
                object(&json!({ "RebootRequired": false }))
            }
        };
        HostOutput::objects(vec![result])
    }
}

impl ScriptHost for FileResourceHost {
    fn invoke(&self, command: &HostCommand) -> Result<HostOutput> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        let output = if command.is("Get-Module") {
            HostOutput::objects(vec![
                module("PowerShellGet", "2.2.5"),
                module(PSDSC, "2.0.7"),
            ])
        } else if command.is("Get-DscResource") {
            HostOutput::objects(
                (0..self.providers)
                    .map(|i| file_resource(&format!("2.0.{}", 7 + i)))
                    .collect(),
            )
        } else if command.is("Invoke-DscResource") {
            Self::invoke_file(command)
        } else {
            HostOutput::default()
        };
        Ok(output)
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>> {
        Ok(self
            .variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name.to_ascii_lowercase())
            .cloned())
    }

    fn set_variable(&self, name: &str, value: Value) -> Result<()> {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), value);
        Ok(())
    }

    fn open_errors(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A `File` unit writing `contents` to `path`.
pub fn file_unit(id: &str, path: &Path, contents: &str) -> ConfigurationUnit {
    ConfigurationUnit::new(&format!("{PSDSC}/File"))
        .with_identifier(id)
        .with_setting("DestinationPath", path.display().to_string())
        .with_setting("Contents", contents)
        .with_setting("Ensure", "Present")
}

/// A factory over `host` using the default PowerShell options.
pub fn powershell_factory(host: &Arc<FileResourceHost>) -> SetProcessorFactory {
    SetProcessorFactory::new(ProcessorBackend::PowerShell(PowerShellOptions::default()))
        .with_script_host(Arc::clone(host) as Arc<dyn ScriptHost>)
}

/// A `dsc` runner that answers each verb from its own queue.
///
/// Every reply is `(exit code, stdout)`; the last reply of a verb repeats.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<HashMap<String, VecDeque<(i32, String)>>>,
    invocations: Mutex<Vec<ProcessInvocation>>,
}

impl ScriptedRunner {
    /// A runner with no replies: every verb succeeds silently.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `verb` (`list`, `get`, ...) with `stdout` and exit code `code`.
    pub fn reply(self, verb: &str, code: i32, stdout: &str) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(verb.to_string())
            .or_default()
            .push_back((code, stdout.to_string()));
        self
    }

    /// Command lines run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ProcessInvocation::command_line)
            .collect()
    }
}

impl Executor for ScriptedRunner {
    fn execute(
        &self,
        invocation: &ProcessInvocation,
    ) -> std::result::Result<ExecResult, ProcessError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        let verb = invocation.args.get(1).cloned().unwrap_or_default();
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let (code, stdout) = replies
            .get_mut(&verb)
            .and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or((0, String::new()));
        Ok(ExecResult {
            stdout_lines: stdout.lines().map(str::to_string).collect(),
            stderr: String::new(),
            code: Some(code),
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        Some(PathBuf::from("/usr/bin").join(program))
    }
}

/// `resource list` line for `Test/Echo`.
pub const ECHO_LIST: &str = r#"{"type":"Test/Echo","kind":"resource","version":"1.0.0","capabilities":["get","set","test","export"]}"#;

/// A factory over `runner`.
pub fn dsc_factory(runner: &Arc<ScriptedRunner>) -> SetProcessorFactory {
    SetProcessorFactory::new(ProcessorBackend::Dsc(DscOptions::default()))
        .with_executor(Arc::clone(runner) as Arc<dyn Executor>)
}

/// A set with one `Test/Echo` unit.
pub fn echo_set() -> ConfigurationSet {
    ConfigurationSet::named("echo").with_unit(
        ConfigurationUnit::new("Test/Echo")
            .with_identifier("echo")
            .with_setting("output", "hello"),
    )
}
