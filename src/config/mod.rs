//! Configuration data: units, sets and processor settings.
pub mod set;
pub mod settings;
pub mod toml_loader;
pub mod unit;

pub use set::ConfigurationSet;
pub use settings::{
    AdminPolicy, BackendKind, DscOptions, ExecutionPolicy, ModuleLocation, PowerShellOptions,
    ProcessorSettings, ProcessorType, processor_module_path,
};
pub use unit::{ConfigurationUnit, ModuleSpec};
