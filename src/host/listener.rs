//! Background watcher for system-wide module path changes.
//!
//! A module installed out of band (for example by another process) only
//! becomes discoverable once its directory is on the host's module path.
//! [`EnvironmentListener`] polls an [`EnvironmentSource`] on its own thread
//! and reports entries that appeared since the last poll.
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::environment::MODULE_PATH_SEPARATOR;
use crate::error::{EnvironmentError, Result};

/// Name of the module path environment variable.
pub const MODULE_PATH_NAME: &str = "PSModulePath";

/// How often [`SystemEnvironment`] is polled by default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where the system-wide module path is read from.
#[cfg_attr(test, mockall::automock)]
pub trait EnvironmentSource: Send + Sync + fmt::Debug {
    /// The current module path, `None` when it is not set.
    fn module_path(&self) -> Option<String>;
}

/// The persisted environment: the registry on Windows, the user's
/// `powershell.config.json` elsewhere.
///
/// Off Windows the process environment is only a fallback for when the
/// config file sets no module path; nothing outside this process can change
/// it, so no additions are ever reported from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl EnvironmentSource for SystemEnvironment {
    fn module_path(&self) -> Option<String> {
        #[cfg(windows)]
        {
            registry_module_path()
        }
        #[cfg(not(windows))]
        {
            user_config_dir()
                .and_then(|dir| config_module_path(&dir))
                .or_else(|| std::env::var(MODULE_PATH_NAME).ok())
        }
    }
}

/// `$XDG_CONFIG_HOME/powershell`, or `~/.config/powershell`.
#[cfg(not(windows))]
fn user_config_dir() -> Option<std::path::PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(std::path::PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;
    Some(base.join("powershell"))
}

/// The `PSModulePath` setting of `powershell.config.json` in `dir`.
///
/// A missing or unreadable file reads as unset.
#[must_use]
pub fn config_module_path(dir: &Path) -> Option<String> {
    let text = std::fs::read_to_string(dir.join("powershell.config.json")).ok()?;
    let config: serde_json::Value = serde_json::from_str(&text).ok()?;
    config
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(MODULE_PATH_NAME))
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// User entries first, then machine entries, as a new process would see them.
#[cfg(windows)]
fn registry_module_path() -> Option<String> {
    use winreg::RegKey;
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};

    const MACHINE_ENVIRONMENT: &str =
        r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment";

    let user = RegKey::predef(HKEY_CURRENT_USER)
        .open_subkey("Environment")
        .and_then(|key| key.get_value::<String, _>(MODULE_PATH_NAME))
        .ok();
    let machine = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey(MACHINE_ENVIRONMENT)
        .and_then(|key| key.get_value::<String, _>(MODULE_PATH_NAME))
        .ok();
    let parts: Vec<String> = [user, machine].into_iter().flatten().collect();
    (!parts.is_empty()).then(|| parts.join(&MODULE_PATH_SEPARATOR.to_string()))
}

/// Entries of `current` that were not in `previous`, in order.
#[must_use]
pub fn new_entries(previous: Option<&str>, current: Option<&str>) -> Vec<String> {
    let split = |path: Option<&str>| -> Vec<String> {
        path.unwrap_or_default()
            .split(MODULE_PATH_SEPARATOR)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    };
    let before = split(previous);
    let mut added: Vec<String> = Vec::new();
    for entry in split(current) {
        if !before.contains(&entry) && !added.contains(&entry) {
            added.push(entry);
        }
    }
    added
}

/// A polling thread with explicit start and stop.
///
/// Dropping the listener stops it.
#[derive(Debug)]
pub struct EnvironmentListener {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EnvironmentListener {
    /// Start polling `source` every `interval`, calling `on_change` with the
    /// module path entries that appeared.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Listener`] if the thread cannot be
    /// spawned.
    pub fn start<F>(
        source: Arc<dyn EnvironmentSource>,
        interval: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: Fn(&[String]) + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let mut last = source.module_path();
        let handle = thread::Builder::new()
            .name("environment-listener".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let current = source.module_path();
                    if current == last {
                        continue;
                    }
                    let added = new_entries(last.as_deref(), current.as_deref());
                    if !added.is_empty() {
                        tracing::debug!(entries = ?added, "module path changed");
                        on_change(&added);
                    }
                    last = current;
                }
            })
            .map_err(|e| EnvironmentError::Listener(e.to_string()))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Whether the thread has been started and not yet stopped.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop polling and wait for the thread to finish.  Stopping twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Listener`] if the thread panicked.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            // The thread may already have exited; a closed channel stops it too.
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| EnvironmentError::Listener("listener thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for EnvironmentListener {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("failed to stop environment listener: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn path(entries: &[&str]) -> String {
        entries.join(&MODULE_PATH_SEPARATOR.to_string())
    }

    #[test]
    fn new_entries_ignores_existing_and_removed() {
        let before = path(&["/a", "/b"]);
        let after = path(&["/c", "/a", "/c", "/d"]);
        assert_eq!(
            new_entries(Some(&before), Some(&after)),
            vec!["/c".to_string(), "/d".to_string()]
        );
        assert!(new_entries(Some(&after), Some(&before)).contains(&"/b".to_string()));
        assert!(new_entries(Some(&before), None).is_empty());
    }

    #[test]
    fn config_file_module_path_tracks_edits() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(config_module_path(dir.path()), None);

        let file = dir.path().join("powershell.config.json");
        std::fs::write(&file, r#"{"PSModulePath":"/opt/modules"}"#).unwrap();
        assert_eq!(config_module_path(dir.path()).as_deref(), Some("/opt/modules"));

        let edited = path(&["/opt/modules", "/srv/modules"]);
        std::fs::write(&file, serde_json::json!({ "psmodulepath": edited }).to_string()).unwrap();
        assert_eq!(
            new_entries(Some("/opt/modules"), config_module_path(dir.path()).as_deref()),
            vec!["/srv/modules".to_string()]
        );

        std::fs::write(&file, "not json").unwrap();
        assert_eq!(config_module_path(dir.path()), None);
    }

    #[test]
    fn listener_reports_added_entries() {
        let mut source = MockEnvironmentSource::new();
        let before = path(&["/a"]);
        let after = path(&["/a", "/b"]);
        let mut polls = 0;
        source.expect_module_path().returning(move || {
            polls += 1;
            Some(if polls == 1 { before.clone() } else { after.clone() })
        });
        let (tx, rx) = mpsc::channel();
        let mut listener = EnvironmentListener::start(
            Arc::new(source),
            Duration::from_millis(5),
            move |added| {
                let _ = tx.send(added.to_vec());
            },
        )
        .unwrap();
        assert!(listener.is_running());
        let added = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(added, vec!["/b".to_string()]);
        listener.stop().unwrap();
        assert!(!listener.is_running());
    }

    #[test]
    fn unchanged_path_reports_nothing() {
        let mut source = MockEnvironmentSource::new();
        source
            .expect_module_path()
            .returning(|| Some("/a".to_string()));
        let (tx, rx) = mpsc::channel::<Vec<String>>();
        let mut listener = EnvironmentListener::start(
            Arc::new(source),
            Duration::from_millis(5),
            move |added| {
                let _ = tx.send(added.to_vec());
            },
        )
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        listener.stop().unwrap();
        listener.stop().unwrap();
    }

    #[test]
    fn system_environment_reads_module_path() {
        // Only the call is exercised; the value depends on the machine.
        let _ = SystemEnvironment.module_path();
    }
}
