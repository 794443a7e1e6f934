//! Configuration units and module constraints.
use std::fmt;

use semver::{BuildMetadata, Version};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::value::ValueSet;

/// Directive names recognised on a unit (compared case-insensitively).
pub mod directives {
    /// Module that provides the resource.
    pub const MODULE: &str = "module";
    /// Exact module version.
    pub const VERSION: &str = "version";
    /// Minimum module version (inclusive).
    pub const MIN_VERSION: &str = "minVersion";
    /// Maximum module version (inclusive).
    pub const MAX_VERSION: &str = "maxVersion";
    /// Catalog repository to search.
    pub const REPOSITORY: &str = "repository";
    /// Whether prerelease modules may be installed.
    pub const ALLOW_PRERELEASE: &str = "allowPrerelease";
    /// Free-form description.
    pub const DESCRIPTION: &str = "description";
}

/// Parse a module version.
///
/// Accepts the host's one-to-four component versions: missing components
/// are zero and a fourth component is kept as build metadata, so `2.0`
/// becomes `2.0.0` and `1.0.0.1` becomes `1.0.0+1`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUnit`] if the text is not a version.
pub fn parse_version(text: &str) -> Result<Version, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidUnit {
        unit: text.to_string(),
        message,
    };
    let trimmed = text.trim();
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }
    let (core, pre) = trimmed
        .split_once('-')
        .map_or((trimmed, None), |(c, p)| (c, Some(p)));
    let parts: Vec<u64> = core
        .split('.')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|e| invalid(format!("invalid version: {e}")))?;
    let (major, minor, patch, revision) = match parts.as_slice() {
        [major] => (*major, 0, 0, None),
        [major, minor] => (*major, *minor, 0, None),
        [major, minor, patch] => (*major, *minor, *patch, None),
        [major, minor, patch, revision] => (*major, *minor, *patch, Some(*revision)),
        _ => return Err(invalid("expected one to four version components".to_string())),
    };
    let mut version = Version::new(major, minor, patch);
    if let Some(pre) = pre {
        version.pre =
            semver::Prerelease::new(pre).map_err(|e| invalid(format!("invalid prerelease: {e}")))?;
    }
    if let Some(revision) = revision {
        version.build = BuildMetadata::new(&revision.to_string())
            .map_err(|e| invalid(format!("invalid revision: {e}")))?;
    }
    Ok(version)
}

/// A module constraint: name plus an optional version window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleSpec {
    /// Module name (compared case-insensitively).
    pub name: String,
    /// Inclusive lower bound.
    pub min_version: Option<Version>,
    /// Inclusive upper bound.
    pub max_version: Option<Version>,
    /// Exact version; overrides both bounds.
    pub required_version: Option<Version>,
}

impl ModuleSpec {
    /// A constraint on the module name only.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_version: None,
            max_version: None,
            required_version: None,
        }
    }

    /// Set the inclusive lower bound.
    #[must_use]
    pub fn with_min(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Set the inclusive upper bound.
    #[must_use]
    pub fn with_max(mut self, version: Version) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Pin an exact version.
    #[must_use]
    pub fn with_required(mut self, version: Version) -> Self {
        self.required_version = Some(version);
        self
    }

    /// Whether `name` is this module.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Whether `version` satisfies the window. Missing bounds are open.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        if let Some(required) = &self.required_version {
            return version.cmp_precedence(required).is_eq();
        }
        let above_min = self
            .min_version
            .as_ref()
            .is_none_or(|min| version.cmp_precedence(min).is_ge());
        let below_max = self
            .max_version
            .as_ref()
            .is_none_or(|max| version.cmp_precedence(max).is_le());
        above_min && below_max
    }

    /// Whether the module `name` at `version` satisfies this constraint.
    /// A module without a known version only satisfies an unversioned spec.
    #[must_use]
    pub fn accepts(&self, name: &str, version: Option<&Version>) -> bool {
        if !self.matches_name(name) {
            return false;
        }
        version.map_or_else(|| !self.is_versioned(), |v| self.contains(v))
    }

    /// Whether any version bound is set.
    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.min_version.is_some() || self.max_version.is_some() || self.required_version.is_some()
    }
}

impl fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(required) = &self.required_version {
            return write!(f, " ={required}");
        }
        match (&self.min_version, &self.max_version) {
            (Some(min), Some(max)) => write!(f, " [{min}, {max}]"),
            (Some(min), None) => write!(f, " >={min}"),
            (None, Some(max)) => write!(f, " <={max}"),
            (None, None) => Ok(()),
        }
    }
}

/// One declared instance of a resource type with concrete settings.
///
/// Immutable once handed to a set processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationUnit {
    /// Resource type name, without any module prefix.
    pub resource_type: String,
    /// Instance identifier, unique within a set.
    pub identifier: String,
    /// Explicit module constraint.
    pub module: Option<ModuleSpec>,
    /// Desired settings.
    pub settings: ValueSet,
    /// Metadata overlay (module, version window, repository, ...).
    pub directives: ValueSet,
}

impl ConfigurationUnit {
    /// Create a unit from a type string; `Module/Type` splits into a module
    /// constraint plus a type.
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        let (module, resource_type) = match type_name.split_once('/') {
            Some((module, resource)) if !module.is_empty() && !resource.is_empty() => {
                (Some(ModuleSpec::named(module)), resource)
            }
            _ => (None, type_name),
        };
        Self {
            resource_type: resource_type.to_string(),
            identifier: String::new(),
            module,
            settings: ValueSet::new(),
            directives: ValueSet::new(),
        }
    }

    /// Set the identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_string();
        self
    }

    /// Replace the module constraint.
    #[must_use]
    pub fn with_module(mut self, module: ModuleSpec) -> Self {
        self.module = Some(module);
        self
    }

    /// Add one setting.
    #[must_use]
    pub fn with_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.settings.insert(key, value);
        self
    }

    /// Add one directive.
    #[must_use]
    pub fn with_directive(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.directives.insert(key, value);
        self
    }

    /// A string directive.
    #[must_use]
    pub fn directive_str(&self, name: &str) -> Option<&str> {
        self.directives
            .get_ignore_case(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// A boolean directive; strings `"true"`/`"false"` are accepted.
    #[must_use]
    pub fn directive_bool(&self, name: &str) -> Option<bool> {
        match self.directives.get_ignore_case(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Catalog repository requested by the unit.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.directive_str(directives::REPOSITORY)
    }

    /// Whether prerelease modules may satisfy the unit.
    #[must_use]
    pub fn allow_prerelease(&self) -> bool {
        self.directive_bool(directives::ALLOW_PRERELEASE)
            .unwrap_or(false)
    }

    /// The module constraint in force: the explicit one, or one assembled
    /// from the `module`/`version`/`minVersion`/`maxVersion` directives.
    /// Version directives refine an explicit constraint that has no bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUnit`] if a version directive does not
    /// parse.
    pub fn effective_module(&self) -> Result<Option<ModuleSpec>, ConfigError> {
        let base = match (&self.module, self.directive_str(directives::MODULE)) {
            (Some(module), _) => module.clone(),
            (None, Some(name)) => ModuleSpec::named(name),
            (None, None) => return Ok(None),
        };
        if base.is_versioned() {
            return Ok(Some(base));
        }
        let mut spec = base;
        if let Some(v) = self.directive_str(directives::VERSION) {
            spec.required_version = Some(parse_version(v)?);
        }
        if let Some(v) = self.directive_str(directives::MIN_VERSION) {
            spec.min_version = Some(parse_version(v)?);
        }
        if let Some(v) = self.directive_str(directives::MAX_VERSION) {
            spec.max_version = Some(parse_version(v)?);
        }
        Ok(Some(spec))
    }

    /// `Module/Type` when a module is known, otherwise `Type`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        let module = self
            .module
            .as_ref()
            .map(|m| m.name.as_str())
            .or_else(|| self.directive_str(directives::MODULE));
        module.map_or_else(
            || self.resource_type.clone(),
            |m| format!("{m}/{}", self.resource_type),
        )
    }
}

/// On-disk form of a unit inside a configuration set file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UnitDocument {
    #[serde(rename = "type", alias = "resource")]
    pub resource_type: String,
    #[serde(default, alias = "identifier")]
    pub id: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default, alias = "minVersion")]
    pub min_version: Option<String>,
    #[serde(default, alias = "maxVersion")]
    pub max_version: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Map<String, Value>,
    #[serde(default)]
    pub directives: serde_json::Map<String, Value>,
}

impl TryFrom<UnitDocument> for ConfigurationUnit {
    type Error = ConfigError;

    fn try_from(doc: UnitDocument) -> Result<Self, Self::Error> {
        if doc.resource_type.trim().is_empty() {
            return Err(ConfigError::InvalidUnit {
                unit: doc.id.unwrap_or_default(),
                message: "resource type is empty".to_string(),
            });
        }
        let mut unit = Self::new(doc.resource_type.trim());
        if let Some(name) = doc.module {
            if let Some(existing) = &unit.module
                && !existing.matches_name(&name)
            {
                return Err(ConfigError::InvalidUnit {
                    unit: doc.resource_type,
                    message: format!(
                        "module '{name}' conflicts with type prefix '{}'",
                        existing.name
                    ),
                });
            }
            unit.module = Some(ModuleSpec::named(&name));
        }
        if doc.min_version.is_some() || doc.max_version.is_some() {
            let Some(module) = unit.module.as_mut() else {
                return Err(ConfigError::InvalidUnit {
                    unit: doc.resource_type,
                    message: "a version window requires a module".to_string(),
                });
            };
            if let Some(min) = &doc.min_version {
                module.min_version = Some(parse_version(min)?);
            }
            if let Some(max) = &doc.max_version {
                module.max_version = Some(parse_version(max)?);
            }
        }
        unit.identifier = doc
            .id
            .unwrap_or_else(|| unit.resource_type.clone());
        unit.settings = doc.settings.into();
        unit.directives = doc.directives.into();
        Ok(unit)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn parse_version_normalises_short_and_long_forms() {
        assert_eq!(parse_version("2.0").unwrap(), Version::new(2, 0, 0));
        assert_eq!(parse_version("3").unwrap(), Version::new(3, 0, 0));
        let four = parse_version("1.0.0.1").unwrap();
        assert_eq!((four.major, four.minor, four.patch), (1, 0, 0));
        assert_eq!(four.build.as_str(), "1");
        assert_eq!(parse_version("2.0.7-preview").unwrap().pre.as_str(), "preview");
        assert!(parse_version("one.two").is_err());
        assert!(parse_version("1.2.3.4.5").is_err());
    }

    #[test]
    fn module_spec_window_is_inclusive() {
        let spec = ModuleSpec::named("PSDesiredStateConfiguration")
            .with_min(Version::new(2, 0, 5))
            .with_max(Version::new(2, 0, 7));
        assert!(spec.contains(&Version::new(2, 0, 5)));
        assert!(spec.contains(&Version::new(2, 0, 7)));
        assert!(!spec.contains(&Version::new(2, 0, 8)));
        assert!(!spec.contains(&Version::new(1, 1, 0)));
    }

    #[test]
    fn required_version_overrides_bounds() {
        let spec = ModuleSpec::named("M")
            .with_min(Version::new(1, 0, 0))
            .with_required(Version::new(1, 5, 0));
        assert!(spec.contains(&Version::new(1, 5, 0)));
        assert!(!spec.contains(&Version::new(1, 6, 0)));
    }

    #[test]
    fn accepts_checks_name_case_insensitively() {
        let spec = ModuleSpec::named("PSDesiredStateConfiguration");
        assert!(spec.accepts("psdesiredstateconfiguration", Some(&Version::new(2, 0, 7))));
        assert!(spec.accepts("PSDesiredStateConfiguration", None));
        assert!(!spec.accepts("Other", None));
        let versioned = spec.with_min(Version::new(2, 0, 0));
        assert!(!versioned.accepts("PSDesiredStateConfiguration", None));
    }

    #[test]
    fn unit_type_with_module_prefix_is_split() {
        let unit = ConfigurationUnit::new("PSDesiredStateConfiguration/File");
        assert_eq!(unit.resource_type, "File");
        assert_eq!(
            unit.module.as_ref().map(|m| m.name.as_str()),
            Some("PSDesiredStateConfiguration")
        );
        assert_eq!(unit.qualified_name(), "PSDesiredStateConfiguration/File");
        assert_eq!(ConfigurationUnit::new("File").qualified_name(), "File");
    }

    #[test]
    fn effective_module_comes_from_directives() {
        let unit = ConfigurationUnit::new("xHostsFile")
            .with_directive("Module", "xNetworking")
            .with_directive("minVersion", "5.0")
            .with_directive("maxVersion", "6.0");
        let spec = unit.effective_module().unwrap().unwrap();
        assert_eq!(spec.name, "xNetworking");
        assert_eq!(spec.min_version, Some(Version::new(5, 0, 0)));
        assert_eq!(spec.max_version, Some(Version::new(6, 0, 0)));
        assert_eq!(unit.qualified_name(), "xNetworking/xHostsFile");
    }

    #[test]
    fn effective_module_is_none_without_module() {
        let unit = ConfigurationUnit::new("File").with_directive("minVersion", "1.0");
        assert!(unit.effective_module().unwrap().is_none());
    }

    #[test]
    fn directive_bool_accepts_strings() {
        let unit = ConfigurationUnit::new("X").with_directive("allowPrerelease", "true");
        assert!(unit.allow_prerelease());
        let unit = ConfigurationUnit::new("X").with_directive("AllowPrerelease", false);
        assert!(!unit.allow_prerelease());
    }

    #[test]
    fn document_conversion_rejects_conflicting_module() {
        let doc = UnitDocument {
            resource_type: "A/File".to_string(),
            id: None,
            module: Some("B".to_string()),
            min_version: None,
            max_version: None,
            settings: serde_json::Map::new(),
            directives: serde_json::Map::new(),
        };
        let err = ConfigurationUnit::try_from(doc).unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }

    #[test]
    fn document_conversion_defaults_identifier_to_type() {
        let doc = UnitDocument {
            resource_type: "File".to_string(),
            id: None,
            module: Some("PSDesiredStateConfiguration".to_string()),
            min_version: Some("2.0.7".to_string()),
            max_version: None,
            settings: serde_json::Map::new(),
            directives: serde_json::Map::new(),
        };
        let unit = ConfigurationUnit::try_from(doc).unwrap();
        assert_eq!(unit.identifier, "File");
        assert_eq!(
            unit.module.unwrap().min_version,
            Some(Version::new(2, 0, 7))
        );
    }

    #[test]
    fn module_spec_display() {
        let spec = ModuleSpec::named("M")
            .with_min(Version::new(1, 0, 0))
            .with_max(Version::new(2, 0, 0));
        assert_eq!(spec.to_string(), "M [1.0.0, 2.0.0]");
        assert_eq!(ModuleSpec::named("M").to_string(), "M");
    }
}
