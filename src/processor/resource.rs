//! Resolved providers, catalog hits and verb result types.
use std::fmt;
use std::path::PathBuf;

use semver::Version;

use crate::value::ValueSet;

/// How a provider is implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ImplementationKind {
    /// Script (`.psm1` functions returning hashtables).
    #[default]
    Script,
    /// Class-based resource.
    Class,
    /// Compiled resource or standalone executable.
    Binary,
    /// A resource composed of other resources.
    Composite,
}

impl ImplementationKind {
    /// Map a host or runner label onto a kind; unknown labels are `None`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "script" | "powershell" => Some(Self::Script),
            "class" | "powershellclass" => Some(Self::Class),
            "binary" | "binaryprovider" | "resource" | "adapter" => Some(Self::Binary),
            "composite" | "group" | "importer" | "exporter" | "configuration" => {
                Some(Self::Composite)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ImplementationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Script => "script",
            Self::Class => "class",
            Self::Binary => "binary",
            Self::Composite => "composite",
        })
    }
}

/// Where a provider came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResourceOrigin {
    /// Already installed when first looked up.
    #[default]
    Local,
    /// Installed from the catalog during resolution.
    Catalog,
}

/// One property in a provider's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,
    /// Declared type, as the host spells it.
    pub property_type: String,
    /// Whether the property must be supplied.
    pub mandatory: bool,
    /// Allowed values; empty means unrestricted.
    pub values: Vec<String>,
}

/// The concrete provider bound to a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedResource {
    /// Resource name.
    pub name: String,
    /// Friendly name, when the provider declares one.
    pub friendly_name: Option<String>,
    /// Owning module; `None` for providers outside any module.
    pub module_name: Option<String>,
    /// Owning module version.
    pub version: Option<Version>,
    /// Implementation kind.
    pub kind: ImplementationKind,
    /// Implementing file.
    pub path: Option<PathBuf>,
    /// Directory containing the implementing file.
    pub parent_path: Option<PathBuf>,
    /// Property schema.
    pub properties: Vec<PropertyInfo>,
    /// Whether resolution had to install the module.
    pub origin: ResourceOrigin,
    /// Whether the provider implements Export.
    pub supports_export: bool,
}

impl ResolvedResource {
    /// A provider with just a name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// `Module/Name` when the module is known.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        self.module_name.as_ref().map_or_else(
            || self.name.clone(),
            |m| format!("{m}/{}", self.name),
        )
    }

    /// Look up a property by name, case-insensitively.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// A module found in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogModule {
    /// Module name.
    pub name: String,
    /// Module version.
    pub version: Option<Version>,
    /// Repository the module was found in.
    pub repository: Option<String>,
    /// Resource name inside the module that satisfies the unit.
    pub resource_name: String,
    /// Whether this is a prerelease build.
    pub prerelease: bool,
}

/// A module available on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name.
    pub name: String,
    /// Module version.
    pub version: Option<Version>,
    /// Module base directory.
    pub path: Option<PathBuf>,
    /// Author, when the manifest declares one.
    pub author: Option<String>,
    /// Description, when the manifest declares one.
    pub description: Option<String>,
}

bitflags::bitflags! {
    /// Which sources a detail query may consult, cheapest first.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct UnitDetailFlags: u8 {
        /// Installed modules only.
        const LOCAL = 1 << 0;
        /// Catalog metadata, without downloading.
        const CATALOG = 1 << 1;
        /// Save the catalog module to a temporary directory.
        const DOWNLOAD = 1 << 2;
        /// Install and import the module.
        const LOAD = 1 << 3;
    }
}

impl fmt::Display for UnitDetailFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        f.write_str(&names.join(", "))
    }
}

/// What a detail query learned about a unit's provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDetails {
    /// Resource name the unit resolves to.
    pub unit_type: String,
    /// Locally resolved provider, if one was found.
    pub resource: Option<ResolvedResource>,
    /// Module information from disk (local or downloaded).
    pub module: Option<ModuleInfo>,
    /// Catalog hit, when the catalog was consulted.
    pub catalog: Option<CatalogModule>,
    /// Whether the module was imported into the environment.
    pub loaded: bool,
}

/// Result of a Set call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the change needs a reboot to take effect.
    pub reboot_required: bool,
}

/// One instance returned by Export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedInstance {
    /// Type reported by the provider.
    pub resource_type: String,
    /// Instance name, when reported.
    pub name: Option<String>,
    /// Instance settings.
    pub settings: ValueSet,
}
