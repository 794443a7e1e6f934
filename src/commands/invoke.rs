//! The `get`, `test`, `set` and `export` commands.
use anyhow::Result;
use serde_json::{Value, json};

use super::CommandSetup;
use crate::cli::{GlobalOpts, UnitOpts};
use crate::config::ConfigurationUnit;
use crate::processor::{ExportedInstance, UnitProcessor, Verb};

/// Run `verb` against every selected unit, printing one JSON line per unit.
///
/// A failing unit is logged and counted; the remaining units still run.
///
/// # Errors
///
/// Returns an error if setup fails, any unit fails, or (for `test`) any unit
/// is out of its desired state.
pub fn run(global: &GlobalOpts, opts: &UnitOpts, verb: Verb, verbose: bool) -> Result<()> {
    let setup = CommandSetup::init(global, opts, verbose)?;
    let mut failed = 0;
    let mut drifted = 0;

    for unit in setup.units(&opts.unit)? {
        match invoke(&setup, unit, verb) {
            Ok(report) => {
                if report.get("inDesiredState") == Some(&Value::Bool(false)) {
                    drifted += 1;
                }
                super::emit(&report)?;
            }
            Err(e) => {
                tracing::error!("{} {}: {e:#}", verb, unit.identifier);
                failed += 1;
            }
        }
    }

    super::finish(failed, "failed")?;
    super::finish(drifted, "not in desired state")
}

fn invoke(setup: &CommandSetup, unit: &ConfigurationUnit, verb: Verb) -> Result<Value> {
    let processor = setup.processor.create_unit_processor(unit)?;
    let mut report = json!({
        "unit": unit.identifier,
        "resource": processor.resource().qualified_name(),
    });
    let result = verb_result(&processor, verb)?;
    if let (Some(report), Value::Object(result)) = (report.as_object_mut(), result) {
        report.extend(result);
    }
    Ok(report)
}

fn verb_result(processor: &UnitProcessor, verb: Verb) -> Result<Value> {
    Ok(match verb {
        Verb::Get => json!({ "settings": processor.get()?.into_json() }),
        Verb::Test => json!({ "inDesiredState": processor.test()? }),
        Verb::Set => json!({ "rebootRequired": processor.set()?.reboot_required }),
        Verb::Export => {
            let instances: Vec<Value> = processor
                .export()?
                .into_iter()
                .map(instance_json)
                .collect();
            json!({ "instances": instances })
        }
        Verb::List => anyhow::bail!("{verb} is not a unit command"),
    })
}

fn instance_json(instance: ExportedInstance) -> Value {
    json!({
        "type": instance.resource_type,
        "name": instance.name,
        "settings": instance.settings.into_json(),
    })
}
