//! Logging infrastructure: diagnostics multicast plus console and file output.

pub mod diagnostics;
mod subscriber;
mod utils;

pub use diagnostics::{DIAGNOSTICS_TARGET, DiagnosticEvent, DiagnosticLevel, Diagnostics};
pub use subscriber::init_subscriber;
pub(crate) use utils::strip_ansi;

/// Serializes `XDG_CACHE_HOME` manipulation across parallel test threads.
#[cfg(test)]
pub(crate) static TEST_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
