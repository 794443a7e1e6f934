//! The `details` command.
use anyhow::Result;
use serde_json::{Value, json};

use super::CommandSetup;
use crate::cli::{DetailsOpts, GlobalOpts};
use crate::processor::{UnitDetailFlags, UnitDetails};

/// Describe the provider of every selected unit.
///
/// # Errors
///
/// Returns an error if setup fails or any unit's query fails.
pub fn run(global: &GlobalOpts, opts: &DetailsOpts, verbose: bool) -> Result<()> {
    let setup = CommandSetup::init(global, &opts.units, verbose)?;
    let flags = detail_flags(opts);
    tracing::debug!("detail sources: {flags}");
    let mut failed = 0;

    for unit in setup.units(&opts.units.unit)? {
        match setup.processor.get_unit_processor_details(unit, flags) {
            Ok(details) => super::emit(&json!({
                "unit": unit.identifier,
                "details": details.as_ref().map(details_json),
            }))?,
            Err(e) => {
                tracing::error!("details {}: {e}", unit.identifier);
                failed += 1;
            }
        }
    }

    super::finish(failed, "failed")
}

fn detail_flags(opts: &DetailsOpts) -> UnitDetailFlags {
    [
        (opts.catalog, UnitDetailFlags::CATALOG),
        (opts.download, UnitDetailFlags::DOWNLOAD),
        (opts.load, UnitDetailFlags::LOAD),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .fold(UnitDetailFlags::LOCAL, |flags, (_, flag)| flags | flag)
}

fn details_json(details: &UnitDetails) -> Value {
    json!({
        "type": details.unit_type,
        "resource": details.resource.as_ref().map(|r| json!({
            "name": r.qualified_name(),
            "kind": r.kind.to_string(),
            "path": r.path.as_ref().map(|p| p.display().to_string()),
        })),
        "module": details.module.as_ref().map(|m| json!({
            "name": m.name,
            "version": m.version.as_ref().map(ToString::to_string),
            "path": m.path.as_ref().map(|p| p.display().to_string()),
        })),
        "catalog": details.catalog.as_ref().map(|c| json!({
            "name": c.name,
            "version": c.version.as_ref().map(ToString::to_string),
            "repository": c.repository,
        })),
        "loaded": details.loaded,
    })
}
