//! Command-line argument definitions for `dscproc`.
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::BackendKind;

/// Top-level CLI entry point for the configuration processor.
#[derive(Parser, Debug)]
#[command(
    name = "dscproc",
    about = "Apply desired-state configuration sets through DSC resources",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Processor settings file (TOML)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Override the backend named in the settings file
    #[arg(short, long, global = true, value_enum)]
    pub backend: Option<BackendArg>,
}

/// Backend names accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    /// PowerShell DSC resources through `pwsh`
    #[value(alias = "pwsh")]
    Powershell,
    /// Resources run by the `dsc` executable
    Dsc,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Powershell => Self::PowerShell,
            BackendArg::Dsc => Self::Dsc,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current state of each unit
    Get(UnitOpts),
    /// Report whether each unit is in its desired state
    Test(UnitOpts),
    /// Apply each unit's desired state
    Set(UnitOpts),
    /// Print every instance of each unit's resource type
    Export(UnitOpts),
    /// Describe the provider each unit resolves to
    Details(DetailsOpts),
    /// Print version information
    Version,
}

/// Options naming the set file and the units to process.
#[derive(Parser, Debug, Clone)]
pub struct UnitOpts {
    /// Configuration set file (TOML)
    pub set: PathBuf,

    /// Process only the units with these identifiers
    #[arg(short, long, value_delimiter = ',')]
    pub unit: Vec<String>,
}

/// Options for the `details` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct DetailsOpts {
    /// Set file and unit filter.
    #[command(flatten)]
    pub units: UnitOpts,

    /// Consult the module catalog when the resource is not installed
    #[arg(long)]
    pub catalog: bool,

    /// Save catalog modules to a temporary directory to inspect them
    #[arg(long)]
    pub download: bool,

    /// Install and import catalog modules
    #[arg(long)]
    pub load: bool,
}
