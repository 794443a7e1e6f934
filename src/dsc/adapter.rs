//! Verb mapping onto `dsc resource <verb>` invocations.
//!
//! Every call runs the executable to completion, forwards its stderr as
//! verbose diagnostics, requires exit code 0 and then applies the per-verb
//! cardinality rule to the non-blank stdout lines.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::protocol::{
    ExportItem, GetResponse, ResourceListItem, SetResponse, TestResponse, WireRecord, from_line,
};
use crate::config::{ConfigurationUnit, DscOptions, ModuleSpec};
use crate::error::{EnvironmentError, InvokeError, ProcessError, Result};
use crate::exec::{self, EnvVar, Executor, ProcessInvocation};
use crate::logging::Diagnostics;
use crate::processor::{
    CatalogModule, ExportedInstance, ModuleInfo, ResolvedResource, ResourceBackend, SetOutcome,
    Verb,
};
use crate::value::{NativeResult, ValueSet};

/// Default executable name looked up on `PATH`.
pub const DSC_EXECUTABLE: &str = "dsc";

/// The resource runner executable.
#[derive(Debug)]
pub struct DscExecutable {
    program: PathBuf,
    env: Vec<EnvVar>,
    executor: Arc<dyn Executor>,
    diagnostics: Arc<Diagnostics>,
}

impl DscExecutable {
    /// Use `program` as given.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        executor: Arc<dyn Executor>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            program: program.into(),
            env: Vec::new(),
            executor,
            diagnostics,
        }
    }

    /// Locate the executable named by `options`, or `dsc` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::ExecutableNotFound`] if it cannot be found.
    pub fn locate(
        options: &DscOptions,
        executor: Arc<dyn Executor>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let requested = options
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from(DSC_EXECUTABLE));
        let program = exec::locate(executor.as_ref(), &requested).ok_or_else(|| {
            EnvironmentError::ExecutableNotFound(requested.display().to_string())
        })?;
        tracing::debug!(program = %program.display(), "using resource runner");
        Ok(Self::new(program, executor, diagnostics).with_env(options.env.clone()))
    }

    /// Apply `env` to every invocation.
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvVar>) -> Self {
        self.env = env;
        self
    }

    /// Path of the executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn invocation(&self, verb: Verb) -> ProcessInvocation {
        ProcessInvocation::new(&self.program)
            .args(["resource", verb.as_str()])
            .env(&self.env)
    }

    /// Run to completion and return the non-blank stdout lines.
    fn run(&self, invocation: &ProcessInvocation) -> Result<Vec<String>, ProcessError> {
        let result = self.executor.execute(invocation)?;
        for line in result.stderr.lines().filter(|l| !l.trim().is_empty()) {
            self.diagnostics.verbose(line);
        }
        let result = result.check(invocation)?;
        Ok(result
            .non_empty_lines()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// `resource list <type>`: 0 or 1 line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] on failure, more than one line or bad JSON.
    pub fn list(&self, resource_type: &str) -> Result<Option<ResourceListItem>, ProcessError> {
        let invocation = self
            .invocation(Verb::List)
            .args([resource_type, "--output-format", "json"]);
        let lines = self.run(&invocation)?;
        at_most_one(&invocation, lines)?
            .map(|line| parse_line(&invocation, &line))
            .transpose()
    }

    fn with_input(&self, verb: Verb, resource_type: &str, settings: &ValueSet) -> ProcessInvocation {
        let input = settings.to_json_string();
        self.invocation(verb).args([
            "--resource",
            resource_type,
            "--input",
            input.as_str(),
            "--output-format",
            "json",
        ])
    }

    /// `resource get`: `None` when the runner wrote nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] on failure, more than one line or bad JSON.
    pub fn get(
        &self,
        resource_type: &str,
        settings: &ValueSet,
    ) -> Result<Option<GetResponse>, ProcessError> {
        let invocation = self.with_input(Verb::Get, resource_type, settings);
        let lines = self.run(&invocation)?;
        at_most_one(&invocation, lines)?
            .map(|line| parse_line(&invocation, &line))
            .transpose()
    }

    /// `resource test`: exactly one line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] on failure, a wrong line count or bad JSON.
    pub fn test(
        &self,
        resource_type: &str,
        settings: &ValueSet,
    ) -> Result<TestResponse, ProcessError> {
        let invocation = self.with_input(Verb::Test, resource_type, settings);
        let lines = self.run(&invocation)?;
        parse_line(&invocation, &exactly_one(&invocation, lines)?)
    }

    /// `resource set`: exactly one line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] on failure, a wrong line count or bad JSON.
    pub fn set(
        &self,
        resource_type: &str,
        settings: &ValueSet,
    ) -> Result<SetResponse, ProcessError> {
        let invocation = self.with_input(Verb::Set, resource_type, settings);
        let lines = self.run(&invocation)?;
        parse_line(&invocation, &exactly_one(&invocation, lines)?)
    }

    /// `resource export`: any number of lines.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessError`] on failure or if any line is bad JSON.
    pub fn export(&self, resource_type: &str) -> Result<Vec<ExportItem>, ProcessError> {
        let invocation = self.invocation(Verb::Export).args([
            "--resource",
            resource_type,
            "--output-format",
            "json",
        ]);
        self.run(&invocation)?
            .iter()
            .map(|line| parse_line(&invocation, line))
            .collect()
    }
}

fn at_most_one(
    invocation: &ProcessInvocation,
    mut lines: Vec<String>,
) -> Result<Option<String>, ProcessError> {
    match lines.len() {
        0 | 1 => Ok(lines.pop()),
        count => Err(ProcessError::MultipleOutputLines {
            command_line: invocation.command_line(),
            count,
        }),
    }
}

fn exactly_one(invocation: &ProcessInvocation, lines: Vec<String>) -> Result<String, ProcessError> {
    at_most_one(invocation, lines)?.ok_or_else(|| ProcessError::NoOutput {
        command_line: invocation.command_line(),
    })
}

fn parse_line<T: WireRecord>(
    invocation: &ProcessInvocation,
    line: &str,
) -> Result<T, ProcessError> {
    from_line(line).map_err(|source| ProcessError::InvalidJson {
        command_line: invocation.command_line(),
        line: line.to_string(),
        source,
    })
}

/// [`ResourceBackend`] over the resource runner.
///
/// Resources are discovered from the runner's own search path, so there is
/// no catalog and nothing to install or import.
#[derive(Debug)]
pub struct DscBackend {
    runner: DscExecutable,
}

impl DscBackend {
    /// Wrap a runner.
    #[must_use]
    pub const fn new(runner: DscExecutable) -> Self {
        Self { runner }
    }

    /// The wrapped runner.
    #[must_use]
    pub const fn runner(&self) -> &DscExecutable {
        &self.runner
    }

    fn resource_type(resource: &ResolvedResource, unit: &ConfigurationUnit) -> String {
        resource
            .friendly_name
            .clone()
            .unwrap_or_else(|| unit.qualified_name())
    }
}

impl ResourceBackend for DscBackend {
    fn name(&self) -> &'static str {
        "dsc"
    }

    fn find_local(
        &self,
        unit: &ConfigurationUnit,
        module: Option<&ModuleSpec>,
    ) -> Result<Vec<ResolvedResource>> {
        let found = self.runner.list(&unit.qualified_name())?;
        Ok(found
            .map(ResourceListItem::into_resource)
            .filter(|resource| {
                module.is_none_or(|m| {
                    resource
                        .module_name
                        .as_deref()
                        .is_some_and(|name| m.accepts(name, resource.version.as_ref()))
                })
            })
            .into_iter()
            .collect())
    }

    fn find_in_catalog(
        &self,
        _unit: &ConfigurationUnit,
        _module: Option<&ModuleSpec>,
    ) -> Result<Option<CatalogModule>> {
        Ok(None)
    }

    fn install(&self, _module: &CatalogModule) -> Result<()> {
        Ok(())
    }

    fn save(&self, _module: &CatalogModule, _directory: &Path) -> Result<Option<ModuleInfo>> {
        Ok(None)
    }

    fn module_info(&self, resource: &ResolvedResource) -> Result<Option<ModuleInfo>> {
        Ok(resource.module_name.as_ref().map(|name| ModuleInfo {
            name: name.clone(),
            version: resource.version.clone(),
            path: resource.parent_path.clone(),
            ..ModuleInfo::default()
        }))
    }

    fn import(&self, _resource: &ResolvedResource) -> Result<()> {
        Ok(())
    }

    fn get(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<ValueSet> {
        let response = self
            .runner
            .get(&Self::resource_type(resource, unit), &unit.settings)?
            .ok_or_else(|| InvokeError::InstanceNotFound {
                verb: Verb::Get,
                unit: unit.qualified_name(),
            })?;
        Ok(NativeResult::Table(response.actual_state).into_value_set())
    }

    fn test(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<bool> {
        let response = self
            .runner
            .test(&Self::resource_type(resource, unit), &unit.settings)?;
        response.desired_state().ok_or_else(|| {
            InvokeError::InvalidResult {
                verb: Verb::Test,
                unit: unit.qualified_name(),
                message: "inDesiredState is missing or not a boolean".to_string(),
            }
            .into()
        })
    }

    fn set(&self, resource: &ResolvedResource, unit: &ConfigurationUnit) -> Result<SetOutcome> {
        let response = self
            .runner
            .set(&Self::resource_type(resource, unit), &unit.settings)?;
        Ok(SetOutcome {
            reboot_required: response.needs_reboot(),
        })
    }

    fn export(
        &self,
        resource: &ResolvedResource,
        unit: &ConfigurationUnit,
    ) -> Result<Vec<ExportedInstance>> {
        if !resource.supports_export {
            return Err(InvokeError::NotSupported {
                verb: Verb::Export,
                unit: unit.qualified_name(),
            }
            .into());
        }
        Ok(self
            .runner
            .export(&Self::resource_type(resource, unit))?
            .into_iter()
            .map(ExportedInstance::from)
            .collect())
    }
}
