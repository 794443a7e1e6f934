//! Command: print version information.
use std::io::Write as _;

use anyhow::{Context as _, Result};

/// Print the processor version to stdout.
///
/// # Errors
///
/// Returns an error if stdout is closed.
pub fn run() -> Result<()> {
    let version = option_env!("DSCPROC_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    writeln!(std::io::stdout().lock(), "dscproc {version}").context("writing to stdout")
}
