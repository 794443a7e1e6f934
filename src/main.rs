//! `dscproc` command-line entry point.
use anyhow::Result;
use clap::Parser;

use dsc_processor::cli::{self, Command};
use dsc_processor::commands;
use dsc_processor::logging;
use dsc_processor::processor::Verb;

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();

    let name = match &args.command {
        Command::Get(_) => "get",
        Command::Test(_) => "test",
        Command::Set(_) => "set",
        Command::Export(_) => "export",
        Command::Details(_) => "details",
        Command::Version => return commands::version::run(),
    };
    logging::init_subscriber(args.verbose, name);

    match &args.command {
        Command::Get(opts) => commands::invoke::run(&args.global, opts, Verb::Get, args.verbose),
        Command::Test(opts) => commands::invoke::run(&args.global, opts, Verb::Test, args.verbose),
        Command::Set(opts) => commands::invoke::run(&args.global, opts, Verb::Set, args.verbose),
        Command::Export(opts) => {
            commands::invoke::run(&args.global, opts, Verb::Export, args.verbose)
        }
        Command::Details(opts) => commands::details::run(&args.global, opts, args.verbose),
        Command::Version => commands::version::run(),
    }
}
