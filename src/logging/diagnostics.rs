//! Synchronous diagnostics multicast.
//!
//! Every processor component reports progress and failures through a shared
//! [`Diagnostics`] hub.  Events are delivered on the calling thread to each
//! subscriber whose level filter admits them, and always mirrored to
//! [`tracing`] under the [`DIAGNOSTICS_TARGET`] target.
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::utils::strip_ansi;

/// Tracing target used for mirrored diagnostic events.
pub const DIAGNOSTICS_TARGET: &str = "dsc_processor::diagnostics";

/// Severity of a diagnostic event, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Detailed tracing of internal steps.
    Verbose,
    /// Normal progress.
    #[default]
    Informational,
    /// Something unexpected that did not stop processing.
    Warning,
    /// A failure of the current operation.
    Error,
    /// A failure that leaves the processor unusable.
    Critical,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verbose => "verbose",
            Self::Informational => "informational",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        })
    }
}

impl std::str::FromStr for DiagnosticLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" => Ok(Self::Verbose),
            "informational" | "info" => Ok(Self::Informational),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown diagnostic level: {other}")),
        }
    }
}

/// One diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    /// Severity.
    pub level: DiagnosticLevel,
    /// Message text, free of terminal escape sequences.
    pub message: String,
}

type Subscriber = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Multicast hub for [`DiagnosticEvent`]s.
///
/// Subscribers run synchronously in registration order; a slow subscriber
/// slows the caller down.
pub struct Diagnostics {
    subscribers: RwLock<Vec<Subscriber>>,
    minimum_level: RwLock<DiagnosticLevel>,
}

impl Diagnostics {
    /// Create a hub that delivers events at `minimum_level` and above.
    #[must_use]
    pub fn new(minimum_level: DiagnosticLevel) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            minimum_level: RwLock::new(minimum_level),
        }
    }

    /// Register a subscriber.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(subscriber));
    }

    /// The lowest level delivered to subscribers.
    #[must_use]
    pub fn minimum_level(&self) -> DiagnosticLevel {
        *self
            .minimum_level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the lowest level delivered to subscribers.
    pub fn set_minimum_level(&self, level: DiagnosticLevel) {
        *self
            .minimum_level
            .write()
            .unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Whether an event at `level` would reach subscribers.
    #[must_use]
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        level >= self.minimum_level()
    }

    /// Emit an event.
    pub fn emit(&self, level: DiagnosticLevel, message: &str) {
        let message = strip_ansi(message);
        match level {
            DiagnosticLevel::Verbose => {
                tracing::debug!(target: DIAGNOSTICS_TARGET, "{message}");
            }
            DiagnosticLevel::Informational => {
                tracing::info!(target: DIAGNOSTICS_TARGET, "{message}");
            }
            DiagnosticLevel::Warning => tracing::warn!(target: DIAGNOSTICS_TARGET, "{message}"),
            DiagnosticLevel::Error | DiagnosticLevel::Critical => {
                tracing::error!(target: DIAGNOSTICS_TARGET, "{message}");
            }
        }
        if !self.enabled(level) {
            return;
        }
        // Snapshot so a subscriber may register another one without deadlocking.
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let event = DiagnosticEvent { level, message };
        for subscriber in &subscribers {
            subscriber(&event);
        }
    }

    /// Emit at [`DiagnosticLevel::Verbose`].
    pub fn verbose(&self, message: &str) {
        self.emit(DiagnosticLevel::Verbose, message);
    }

    /// Emit at [`DiagnosticLevel::Informational`].
    pub fn info(&self, message: &str) {
        self.emit(DiagnosticLevel::Informational, message);
    }

    /// Emit at [`DiagnosticLevel::Warning`].
    pub fn warning(&self, message: &str) {
        self.emit(DiagnosticLevel::Warning, message);
    }

    /// Emit at [`DiagnosticLevel::Error`].
    pub fn error(&self, message: &str) {
        self.emit(DiagnosticLevel::Error, message);
    }

    /// Report `err` at [`DiagnosticLevel::Error`] and hand it back, so a
    /// failure can be traced and propagated in one expression.
    pub fn report<E: fmt::Display>(&self, err: E) -> E {
        self.error(&err.to_string());
        err
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticLevel::default())
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .subscribers
            .read()
            .map_or(0, |subscribers| subscribers.len());
        f.debug_struct("Diagnostics")
            .field("subscribers", &count)
            .field("minimum_level", &self.minimum_level())
            .finish()
    }
}

/// Test helper: a hub at `Verbose` plus the vector its events land in.
#[cfg(test)]
pub(crate) fn recording() -> (
    Arc<Diagnostics>,
    Arc<std::sync::Mutex<Vec<DiagnosticEvent>>>,
) {
    let diagnostics = Arc::new(Diagnostics::new(DiagnosticLevel::Verbose));
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    diagnostics.subscribe(move |event| {
        if let Ok(mut guard) = sink.lock() {
            guard.push(event.clone());
        }
    });
    (diagnostics, events)
}
