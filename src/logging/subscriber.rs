//! Tracing subscriber setup: console formatter, file layer, and initialisation.
use std::fmt::Write as _;
use std::fs;
use std::sync::Mutex;

use super::diagnostics::DIAGNOSTICS_TARGET;
use super::utils::log_file_path;

/// Extracts the `message` field from a [`tracing::Event`].
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.message, " {}={value:?}", field.name());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.message, " {}={value}", field.name());
        }
    }
}

/// Open (or create) the log file for `command` and write a run header.
///
/// Returns `None` if the cache directory cannot be created or the file
/// cannot be opened.
fn open_log_file(command: &str) -> Option<fs::File> {
    let path = log_file_path(command)?;
    let version =
        option_env!("DSCPROC_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
    let header = format!(
        "==========================================\n\
         dscproc {version} {command}\n\
         ==========================================\n",
    );
    fs::write(&path, header).ok()?;
    fs::OpenOptions::new().append(true).open(&path).ok()
}

/// A [`tracing_subscriber::fmt::FormatEvent`] for console output.
///
/// Diagnostic events are tagged with their level; everything else is
/// printed as plain progress lines.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();
        let diagnostic = metadata.target() == DIAGNOSTICS_TARGET;

        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        let msg = &extractor.message;

        match level {
            tracing::Level::ERROR => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            tracing::Level::WARN => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            tracing::Level::INFO if diagnostic => {
                writeln!(writer, "\x1b[1;34m==>\x1b[0m {msg}")
            }
            tracing::Level::INFO => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// Sets up a console subscriber on stderr (stdout carries command results)
/// filtered by `RUST_LOG` when set, otherwise by `verbose`, plus a file layer
/// that writes all events (including `debug`) to
/// `$XDG_CACHE_HOME/dsc-processor/<command>.log`.
/// Must be called once at program startup, before any logging.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let file_layer = open_log_file(command).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::DEBUG)
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}
