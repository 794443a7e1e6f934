//! Implementations of the `dscproc` subcommands.
pub mod details;
pub mod invoke;
pub mod version;

use std::io::Write as _;

use anyhow::{Context as _, Result};
use serde_json::Value;

use crate::cli::{GlobalOpts, UnitOpts};
use crate::config::{ConfigurationSet, ConfigurationUnit, ProcessorSettings};
use crate::logging::DiagnosticLevel;
use crate::processor::{SetProcessor, SetProcessorFactory};

/// Shared state produced by the common command setup sequence.
///
/// Loads the settings and the configuration set, then builds the factory and
/// the set processor so each command only deals with its own verb.
#[derive(Debug)]
pub struct CommandSetup {
    /// The loaded configuration set.
    pub set: ConfigurationSet,
    /// Processor created for `set`.
    pub processor: SetProcessor,
}

impl CommandSetup {
    /// Load settings and the set named in `opts`, then create the processor.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings or set file cannot be loaded, or the
    /// backend cannot be created.
    pub fn init(global: &GlobalOpts, opts: &UnitOpts, verbose: bool) -> Result<Self> {
        let settings = load_settings(global, verbose)?;
        tracing::info!("backend: {:?}", settings.backend);

        let set = ConfigurationSet::load(&opts.set)
            .with_context(|| format!("loading configuration set {}", opts.set.display()))?;
        tracing::info!("loaded {} unit(s) from '{}'", set.units.len(), set.name);

        let factory = SetProcessorFactory::from_settings(settings);
        let processor = factory.create_set_processor(Some(set.clone()))?;
        Ok(Self { set, processor })
    }

    /// The units selected by `filter`, all of them when it is empty.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first identifier not found in the set.
    pub fn units<'a>(&'a self, filter: &[String]) -> Result<Vec<&'a ConfigurationUnit>> {
        select_units(&self.set, filter)
    }
}

/// Settings from `--settings` (defaults when absent) with CLI overrides.
///
/// # Errors
///
/// Returns an error if the settings file exists but cannot be parsed.
pub fn load_settings(global: &GlobalOpts, verbose: bool) -> Result<ProcessorSettings> {
    let mut settings = match &global.settings {
        Some(path) => ProcessorSettings::load(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => ProcessorSettings::default(),
    };
    if let Some(backend) = global.backend {
        settings.backend = backend.into();
    }
    if verbose {
        settings.minimum_level = DiagnosticLevel::Verbose;
    }
    Ok(settings)
}

fn select_units<'a>(
    set: &'a ConfigurationSet,
    filter: &[String],
) -> Result<Vec<&'a ConfigurationUnit>> {
    if filter.is_empty() {
        return Ok(set.units.iter().collect());
    }
    filter
        .iter()
        .map(|id| {
            set.unit(id)
                .with_context(|| format!("unit '{id}' is not in set '{}'", set.name))
        })
        .collect()
}

/// Write one JSON document per line to stdout.
///
/// # Errors
///
/// Returns an error if stdout is closed.
pub fn emit(value: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{value}").context("writing to stdout")
}

/// Bail when any unit failed, after every unit had its turn.
///
/// # Errors
///
/// Returns an error if `failed` is non-zero.
pub fn finish(failed: usize, what: &str) -> Result<()> {
    if failed > 0 {
        anyhow::bail!("{failed} unit(s) {what}");
    }
    Ok(())
}
