//! Backend-neutral processing: factory, set processor, resolver and unit
//! processor.
use std::fmt;

pub mod backend;
pub mod factory;
pub mod resolver;
pub mod resource;
pub mod set;
pub mod unit;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::ResourceBackend;
pub use factory::{ProcessorBackend, SetProcessorFactory};
pub use resolver::ResourceResolver;
pub use resource::{
    CatalogModule, ExportedInstance, ImplementationKind, ModuleInfo, PropertyInfo,
    ResolvedResource, ResourceOrigin, SetOutcome, UnitDetailFlags, UnitDetails,
};
pub use set::SetProcessor;
pub use unit::UnitProcessor;

/// A logical operation against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Enumerate providers.
    List,
    /// Read current state.
    Get,
    /// Compare current and desired state.
    Test,
    /// Apply desired state.
    Set,
    /// Enumerate instances.
    Export,
}

impl Verb {
    /// Lowercase name, as used on the runner's command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Test => "test",
            Self::Set => "set",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
