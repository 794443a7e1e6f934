//! Desired-state configuration processor.
//!
//! Binds configuration units (a resource type plus desired settings) to
//! concrete DSC resource providers and drives their Get / Test / Set /
//! Export verbs.  Two interchangeable backends sit behind one resolver:
//! PowerShell DSC resources run through a scripting host, and resources run
//! by the external `dsc` executable.
//!
//! The public API is organised into layers:
//!
//! - **[`config`]**: units, sets and processor settings loaded from TOML
//! - **[`processor`]**: the factory, set processor, resolver and unit processor
//! - **[`host`]**: the scripting-host backend and its environment management
//! - **[`dsc`]**: the external-process backend and its wire protocol
//! - **[`logging`]**: the diagnostics hub and the `tracing` subscriber
//! - **[`commands`]**: the `dscproc` subcommands
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod dsc;
pub mod error;
pub mod exec;
pub mod host;
pub mod logging;
pub mod processor;
pub mod value;

pub use error::{ProcessorError, Result};
pub use processor::{ProcessorBackend, SetProcessor, SetProcessorFactory, UnitProcessor};
pub use value::ValueSet;
