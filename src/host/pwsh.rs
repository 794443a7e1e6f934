//! [`ScriptHost`] backed by a `pwsh` process per command.
//!
//! The engine context lives in this struct rather than in a long-running
//! process: every call replays the owned session state (module path,
//! variables, imported modules) as a prelude, runs one command with splatted
//! parameters and reads back a single JSON envelope line.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::script::{HostCommand, HostErrorRecord, HostOutput, ScriptHost};
use crate::config::ExecutionPolicy;
use crate::error::{EnvironmentError, Result};
use crate::exec::{self, Executor, ProcessInvocation};

/// Default host executable looked up on `PATH`.
pub const PWSH_EXECUTABLE: &str = "pwsh";

/// Prefix of the stdout line carrying the result envelope.
const ENVELOPE_MARKER: &str = "##dscproc-envelope ";

/// Session variable holding the module search path.
pub const MODULE_PATH_VARIABLE: &str = "env:PSModulePath";

/// Runs inside `pwsh`; `__STATE__` is replaced by the quoted request.
const RUNNER_SCRIPT: &str = r#"
$ErrorActionPreference = 'Continue'
$ProgressPreference = 'SilentlyContinue'
$__request = '__STATE__' | ConvertFrom-Json -AsHashtable
if ($__request.modulePath) { $env:PSModulePath = $__request.modulePath }
foreach ($__v in $__request.variables.GetEnumerator()) {
    Set-Variable -Name $__v.Key -Value $__v.Value -Scope Global
}
foreach ($__m in $__request.imports) {
    $__p = $__m
    Import-Module @__p -ErrorAction SilentlyContinue
}

function ConvertTo-DscprocValue($v) {
    if ($null -eq $v) { return $null }
    if ($v -is [version] -or $v -is [System.Management.Automation.SemanticVersion] -or $v -is [enum]) { return "$v" }
    if ($v -is [System.Collections.IDictionary]) {
        $t = [ordered]@{}
        foreach ($k in $v.Keys) { $t["$k"] = ConvertTo-DscprocValue $v[$k] }
        return $t
    }
    if ($v -is [string] -or $v -is [ValueType]) { return $v }
    if ($v -is [System.Collections.IEnumerable]) { return ,@(foreach ($i in $v) { ConvertTo-DscprocValue $i }) }
    $o = [ordered]@{}
    foreach ($p in $v.PSObject.Properties) { $o[$p.Name] = ConvertTo-DscprocValue $p.Value }
    return $o
}

function ConvertTo-DscprocObject($o) {
    if ($null -eq $o -or $o -is [string] -or $o -is [ValueType]) {
        return @{ kind = 'scalar'; value = $o }
    }
    if ($o -is [System.Collections.IDictionary]) {
        return @{ kind = 'hashtable'; value = (ConvertTo-DscprocValue $o) }
    }
    $props = @(foreach ($p in $o.PSObject.Properties) {
        @{ name = $p.Name; value = (ConvertTo-DscprocValue $p.Value) }
    })
    return @{ kind = 'object'; value = @{ typeNames = @($o.PSObject.TypeNames); properties = $props } }
}

function ConvertTo-DscprocError($e) {
    @{
        message = "$e"
        fullyQualifiedErrorId = $e.FullyQualifiedErrorId
        category = "$($e.CategoryInfo.Category)"
        exceptionType = $e.Exception.GetType().FullName
    }
}

$__openErrors = @($Error | ForEach-Object { ConvertTo-DscprocError $_ })
$Error.Clear()
$__objects = @()
$__errors = @()
if ($__request.command) {
    $__params = $__request.parameters
    try {
        $__out = @(& $__request.command @__params 2>&1)
        foreach ($__o in $__out) {
            if ($__o -is [System.Management.Automation.ErrorRecord]) {
                $__errors += ConvertTo-DscprocError $__o
            } else {
                $__objects += ConvertTo-DscprocObject $__o
            }
        }
    } catch {
        $__errors += ConvertTo-DscprocError $_
    }
}
$__variables = @{ PSEdition = $PSEdition; 'env:PSModulePath' = $env:PSModulePath }
foreach ($__name in $__request.query) {
    $__variables[$__name] = ConvertTo-DscprocValue (Get-Variable -Name $__name -ValueOnly -ErrorAction SilentlyContinue)
}
$__envelope = @{ objects = $__objects; errors = $__errors; variables = $__variables; openErrors = $__openErrors }
'##dscproc-envelope ' + (ConvertTo-Json -InputObject $__envelope -Compress -Depth 12)
"#;

#[derive(Debug, Default)]
struct Session {
    module_path: Option<String>,
    variables: BTreeMap<String, Value>,
    imports: Vec<Map<String, Value>>,
    observed: BTreeMap<String, Value>,
    open_errors: Vec<String>,
}

/// Options for opening a [`PwshHost`].
#[derive(Debug, Clone, Default)]
pub struct PwshOptions {
    /// Host executable; `pwsh` on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// Skip the user profile and apply `execution_policy`.
    pub isolated: bool,
    /// Process-scope execution policy for isolated hosts.
    pub execution_policy: Option<ExecutionPolicy>,
}

/// A `pwsh`-driven engine context.
#[derive(Debug)]
pub struct PwshHost {
    program: PathBuf,
    options: PwshOptions,
    executor: Arc<dyn Executor>,
    session: Mutex<Session>,
}

impl PwshHost {
    /// Locate the executable and open the context eagerly, recording any
    /// errors the engine reports while starting.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::ExecutableNotFound`] if `pwsh` cannot be
    /// found, or the error of the opening probe.
    pub fn open(options: PwshOptions, executor: Arc<dyn Executor>) -> Result<Self> {
        let requested = options
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from(PWSH_EXECUTABLE));
        let program = exec::locate(executor.as_ref(), &requested).ok_or_else(|| {
            EnvironmentError::ExecutableNotFound(requested.display().to_string())
        })?;
        let host = Self {
            program,
            options,
            executor,
            session: Mutex::new(Session::default()),
        };
        let reply = host.run(None, &[])?;
        host.lock().open_errors = reply
            .open_errors
            .iter()
            .map(|e| e.message.clone())
            .collect();
        tracing::debug!(program = %host.program.display(), "opened scripting host");
        Ok(host)
    }

    /// Path of the host executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invocation(&self, script: String) -> ProcessInvocation {
        let mut invocation =
            ProcessInvocation::new(&self.program).args(["-NoLogo", "-NonInteractive"]);
        if self.options.isolated {
            invocation = invocation.arg("-NoProfile");
            if let Some(policy) = self.options.execution_policy {
                invocation = invocation.args(["-ExecutionPolicy", policy.as_str()]);
            }
        }
        invocation.args(["-Command", "-"]).input(script)
    }

    fn request(&self, command: Option<&HostCommand>, query: &[&str]) -> Value {
        let session = self.lock();
        json!({
            "modulePath": session.module_path,
            "variables": session.variables,
            "imports": session.imports,
            "command": command.map(|c| c.name.clone()),
            "parameters": command.map(HostCommand::splat).unwrap_or_default(),
            "query": query,
        })
    }

    fn run(&self, command: Option<&HostCommand>, query: &[&str]) -> Result<Reply> {
        let request = self.request(command, query).to_string();
        let script = RUNNER_SCRIPT.replace("__STATE__", &request.replace('\'', "''"));
        let invocation = self.invocation(script);
        let result = self.executor.execute(&invocation)?.check(&invocation)?;
        let reply = parse_reply(&result.stdout_lines)?;
        self.lock()
            .observed
            .extend(reply.output.variables.clone());
        Ok(reply)
    }
}

/// What one `pwsh` run wrote back.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reply {
    #[serde(flatten)]
    output: HostOutput,
    #[serde(default)]
    open_errors: Vec<HostErrorRecord>,
}

fn parse_reply(lines: &[String]) -> Result<Reply> {
    let line = lines
        .iter()
        .rev()
        .find_map(|line| line.strip_prefix(ENVELOPE_MARKER))
        .ok_or_else(|| EnvironmentError::MalformedReply("no result envelope".to_string()))?;
    serde_json::from_str(line)
        .map_err(|e| EnvironmentError::MalformedReply(e.to_string()).into())
}

impl ScriptHost for PwshHost {
    fn invoke(&self, command: &HostCommand) -> Result<HostOutput> {
        let reply = self.run(Some(command), &[])?;
        if command.is("Import-Module") && !reply.output.had_errors() {
            let mut import = command.splat();
            import.remove("PassThru");
            self.lock().imports.push(import);
        }
        Ok(reply.output)
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>> {
        {
            let session = self.lock();
            if name.eq_ignore_ascii_case(MODULE_PATH_VARIABLE)
                && let Some(path) = &session.module_path
            {
                return Ok(Some(Value::String(path.clone())));
            }
            if let Some(value) = session.variables.get(name) {
                return Ok(Some(value.clone()));
            }
            if let Some(value) = session.observed.get(name) {
                return Ok(Some(value.clone()));
            }
        }
        let reply = self.run(None, &[name])?;
        Ok(reply
            .output
            .variables
            .get(name)
            .filter(|v| !v.is_null())
            .cloned())
    }

    fn set_variable(&self, name: &str, value: Value) -> Result<()> {
        let mut session = self.lock();
        if name.eq_ignore_ascii_case(MODULE_PATH_VARIABLE) {
            let path = value.as_str().ok_or_else(|| {
                EnvironmentError::InvalidConfiguration(format!("{name} must be a string"))
            })?;
            session.module_path = Some(path.to_string());
        } else {
            session.variables.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn open_errors(&self) -> Vec<String> {
        self.lock().open_errors.clone()
    }
}
