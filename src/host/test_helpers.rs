//! Scripted [`ScriptHost`] shared by the host tests.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde_json::{Value, json};

use super::pwsh::MODULE_PATH_VARIABLE;
use super::script::{HostCommand, HostObject, HostOutput, HostProperty, ObjectValue, ScriptHost};
use crate::error::Result;

/// An object whose properties are the entries of a JSON object.
pub fn object(properties: &Value) -> HostObject {
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

/// A `PSModuleInfo`-like object.
pub fn module(name: &str, version: &str) -> HostObject {
    object(&json!({
        "Name": name,
        "Version": version,
        "ModuleBase": format!("/modules/{name}/{version}"),
    }))
}

/// Replies from per-command queues and records every command.
///
/// The last queued reply for a command is repeated; unscripted commands
/// succeed with no output.
#[derive(Debug, Default)]
pub struct FakeHost {
    replies: Mutex<HashMap<String, VecDeque<HostOutput>>>,
    commands: Mutex<Vec<HostCommand>>,
    variables: Mutex<BTreeMap<String, Value>>,
    open_errors: Vec<String>,
}

impl FakeHost {
    /// A `Core` edition host with an empty module path.
    pub fn new() -> Self {
        Self::default()
            .with_variable("PSEdition", json!("Core"))
            .with_variable(MODULE_PATH_VARIABLE, json!(""))
    }

    pub fn with_variable(self, name: &str, value: Value) -> Self {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), value);
        self
    }

    pub fn with_open_errors(mut self, errors: &[&str]) -> Self {
        self.open_errors = errors.iter().map(ToString::to_string).collect();
        self
    }

    /// Queue a reply for `command`.
    pub fn reply(self, command: &str, output: HostOutput) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command.to_ascii_lowercase())
            .or_default()
            .push_back(output);
        self
    }

    /// Drop whatever is queued for `command` and reply with `output` from now on.
    pub fn set_reply(&self, command: &str, output: HostOutput) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_ascii_lowercase(), VecDeque::from([output]));
    }

    pub fn commands(&self) -> Vec<HostCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `command` ran.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.is(command)).count()
    }

    /// The most recent run of `command`.
    pub fn last(&self, command: &str) -> Option<HostCommand> {
        self.commands().into_iter().rev().find(|c| c.is(command))
    }

    /// Current value of the module path variable.
    pub fn module_path(&self) -> String {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&MODULE_PATH_VARIABLE.to_ascii_lowercase())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

impl ScriptHost for FakeHost {
    fn invoke(&self, command: &HostCommand) -> Result<HostOutput> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = replies.get_mut(&command.name.to_ascii_lowercase()) else {
            return Ok(HostOutput::default());
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(reply.unwrap_or_default())
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
        self.open_errors.clone()
    }
}
