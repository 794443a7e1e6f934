//! Domain-specific error types for the configuration processor.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`ResolveError`],
//! [`InvokeError`]) while the binary converts them to [`anyhow::Error`] via
//! the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ProcessorError
//! ├── Resolve(ResolveError)        : not found, multiple matches, install, import
//! ├── Invoke(InvokeError)          : invalid results, set failure attribution, export
//! ├── Process(ProcessError)        : spawn, exit code, output cardinality, JSON
//! ├── Factory(FactoryError)        : limitation mode, policy
//! ├── Environment(EnvironmentError): host validation and host command failures
//! └── Config(ConfigError)          : settings and configuration set files
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::processor::Verb;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProcessorError> = std::result::Result<T, E>;

/// Top-level error type for the configuration processor.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Resource resolution failed before a unit processor could be created.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// A verb call against a bound resource failed.
    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    /// The subordinate resource-runner process failed or broke the protocol.
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// The set processor factory refused the request.
    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    /// The scripting-host environment is unusable or a host command failed.
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// A settings file or configuration set could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while resolving a unit to its provider.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Neither the local environment nor the catalog knows the resource.
    #[error("resource '{unit}' was not found locally or in the catalog")]
    ResourceNotFound {
        /// Qualified name of the unit (`Module/Type` or `Type`).
        unit: String,
    },

    /// More than one locally available provider matches the unit.
    #[error("resource '{unit}' matched {count} installed providers")]
    MultipleMatches {
        /// Qualified name of the unit.
        unit: String,
        /// Number of matching providers (0 when an explicit module matched nothing).
        count: usize,
    },

    /// Two installed modules claim the same resource.
    #[error("resource '{unit}' is claimed by conflicting modules: {message}")]
    ModuleConflict {
        /// Qualified name of the unit.
        unit: String,
        /// Error text reported by the host.
        message: String,
    },

    /// The catalog module installed, but the provider is still not discoverable.
    #[error("module '{module}' was installed but resource '{unit}' is still not available")]
    InstallFailed {
        /// Qualified name of the unit.
        unit: String,
        /// Module that was installed.
        module: String,
    },

    /// Importing the provider's implementing file failed.
    #[error("failed to import module '{module}' from '{path}': {source}")]
    ImportFailure {
        /// Module that owns the provider.
        module: String,
        /// Implementing file that was imported.
        path: String,
        /// Underlying cause (e.g. a file that needs unblocking).
        #[source]
        source: Box<ProcessorError>,
    },
}

/// Errors raised by Get/Test/Set/Export calls.
#[derive(Error, Debug)]
pub enum InvokeError {
    /// The backend produced no result or a result without the expected shape.
    #[error("{verb} on '{unit}' produced an invalid result: {message}")]
    InvalidResult {
        /// Verb that was invoked.
        verb: Verb,
        /// Qualified name of the unit.
        unit: String,
        /// Description of what was missing or malformed.
        message: String,
    },

    /// The unit's declared settings could not be applied to the resource.
    #[error("{verb} on '{unit}' failed assigning properties: {message}")]
    PropertyAssignment {
        /// Verb that was invoked.
        verb: Verb,
        /// Qualified name of the unit.
        unit: String,
        /// Error text reported by the host.
        message: String,
    },

    /// The resource implementation ran and raised an error.
    #[error("{verb} on '{unit}' failed inside the resource: {message}")]
    ResourceInternal {
        /// Verb that was invoked.
        verb: Verb,
        /// Qualified name of the unit.
        unit: String,
        /// Error text reported by the host.
        message: String,
    },

    /// The resource runner reported no instance for the requested settings.
    #[error("{verb} on '{unit}' found no matching instance")]
    InstanceNotFound {
        /// Verb that was invoked.
        verb: Verb,
        /// Qualified name of the unit.
        unit: String,
    },

    /// An exported instance reported a type other than the unit's type.
    #[error("export of '{expected}' returned item {index} of type '{actual}'")]
    ExportTypeMismatch {
        /// Resource type of the invoking unit.
        expected: String,
        /// Type reported by the offending item.
        actual: String,
        /// Zero-based position of the offending item.
        index: usize,
    },

    /// The bound provider does not implement the verb.
    #[error("{verb} is not supported by the provider of '{unit}'")]
    NotSupported {
        /// Verb that was invoked.
        verb: Verb,
        /// Qualified name of the unit.
        unit: String,
    },
}

/// Errors raised by the process runner and the line protocol on top of it.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process could not be started.
    #[error("failed to start '{command_line}': {source}")]
    Spawn {
        /// Full command line that was attempted.
        command_line: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The process exited with a non-zero code.
    #[error("'{command_line}' failed (exit {exit_code}): {stderr}")]
    Failed {
        /// Exit code, `-1` when the process was terminated by a signal.
        exit_code: i32,
        /// Full command line.
        command_line: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The process wrote more result lines than the verb allows.
    #[error("'{command_line}' wrote {count} output lines where at most one was expected")]
    MultipleOutputLines {
        /// Full command line.
        command_line: String,
        /// Number of non-empty lines written.
        count: usize,
    },

    /// The process wrote no result line where exactly one was required.
    #[error("'{command_line}' wrote no output")]
    NoOutput {
        /// Full command line.
        command_line: String,
    },

    /// A result line was not valid JSON for the expected schema.
    #[error("'{command_line}' wrote invalid JSON: {source}")]
    InvalidJson {
        /// Full command line.
        command_line: String,
        /// The offending line.
        line: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the set processor factory.
#[derive(Error, Debug)]
pub enum FactoryError {
    /// A limitation-mode factory was asked for a second set processor.
    #[error("the limitation set processor has already been created")]
    OperationAlreadyInvoked,

    /// The operation is not valid in the factory's current mode.
    #[error("operation is invalid: {0}")]
    OperationInvalid(String),

    /// Configuration processing is administratively disabled.
    #[error("configuration processing is blocked by policy: {0}")]
    PolicyBlocked(String),

    /// The configuration set uses a feature this processor does not support.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Errors raised by the scripting-host environment or executable discovery.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    /// The host edition or a required module is incompatible.
    #[error("unsupported environment: {0}")]
    Unsupported(String),

    /// A host command failed.
    #[error("host command '{command}' failed: {message}")]
    HostCommand {
        /// Command that was run (e.g. `Install-Module`).
        command: String,
        /// Joined error text.
        message: String,
    },

    /// The host replied with something that is not a result envelope.
    #[error("host returned a malformed reply: {0}")]
    MalformedReply(String),

    /// A required executable could not be found.
    #[error("executable '{0}' was not found")]
    ExecutableNotFound(String),

    /// The processor settings are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The environment-change listener could not be started or stopped.
    #[error("environment listener: {0}")]
    Listener(String),

    /// A filesystem operation on behalf of the environment failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that arise from loading settings and configuration set files.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A file could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A unit declaration is inconsistent.
    #[error("invalid unit '{unit}': {message}")]
    InvalidUnit {
        /// Unit type or identifier.
        unit: String,
        /// What is wrong with it.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn process_failure_reports_exit_code_and_command_line() {
        let e = ProcessError::Failed {
            exit_code: 2,
            command_line: "dsc resource get --resource Test/Echo".to_string(),
            stderr: "boom".to_string(),
        };
        let text = e.to_string();
        assert!(text.contains("exit 2"));
        assert!(text.contains("dsc resource get --resource Test/Echo"));
    }

    #[test]
    fn multiple_matches_display() {
        let e = ResolveError::MultipleMatches {
            unit: "PSDesiredStateConfiguration/File".to_string(),
            count: 2,
        };
        assert_eq!(
            e.to_string(),
            "resource 'PSDesiredStateConfiguration/File' matched 2 installed providers"
        );
    }

    #[test]
    fn import_failure_keeps_cause() {
        use std::error::Error as StdError;
        let cause = ProcessorError::Environment(EnvironmentError::HostCommand {
            command: "Import-Module".to_string(),
            message: "file is blocked".to_string(),
        });
        let e = ResolveError::ImportFailure {
            module: "xNetworking".to_string(),
            path: "C:/m/x.psm1".to_string(),
            source: Box::new(cause),
        };
        let source = e.source().expect("import failure carries a cause");
        assert!(source.to_string().contains("file is blocked"));
    }

    #[test]
    fn property_and_internal_failures_are_distinct() {
        let property = InvokeError::PropertyAssignment {
            verb: Verb::Set,
            unit: "File".to_string(),
            message: "Cannot convert".to_string(),
        };
        let internal = InvokeError::ResourceInternal {
            verb: Verb::Set,
            unit: "File".to_string(),
            message: "Access denied".to_string(),
        };
        assert!(property.to_string().contains("assigning properties"));
        assert!(internal.to_string().contains("inside the resource"));
    }

    #[test]
    fn nested_errors_convert_to_processor_error() {
        let e: ProcessorError = FactoryError::OperationAlreadyInvoked.into();
        assert!(e.to_string().starts_with("Factory error"));
        let e: ProcessorError = ConfigError::InvalidUnit {
            unit: "File".to_string(),
            message: "empty type".to_string(),
        }
        .into();
        assert!(e.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn processor_error_converts_to_anyhow() {
        let e: ProcessorError = ResolveError::ResourceNotFound {
            unit: "Missing".to_string(),
        }
        .into();
        let _anyhow_err: anyhow::Error = e.into();
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<ProcessorError>();
        assert_send_sync::<ResolveError>();
        assert_send_sync::<InvokeError>();
        assert_send_sync::<ProcessError>();
        assert_send_sync::<FactoryError>();
        assert_send_sync::<EnvironmentError>();
        assert_send_sync::<ConfigError>();
    }
}
