//! Configuration sets: an ordered list of units loaded from TOML.
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::toml_loader;
use super::unit::{ConfigurationUnit, UnitDocument};
use crate::error::ConfigError;
use crate::value::ValueSet;

/// An ordered collection of configuration units.
///
/// Ordering and dependency edges are the caller's concern; the processor
/// handles units one at a time in whatever order it is asked to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSet {
    /// Display name.
    pub name: String,
    /// File the set was loaded from, if any.
    pub path: Option<PathBuf>,
    /// Declared schema version.
    pub schema_version: Option<String>,
    /// Units in declaration order.
    pub units: Vec<ConfigurationUnit>,
    /// Declared parameters.
    pub parameters: ValueSet,
    /// Declared variables.
    pub variables: ValueSet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetHeader {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "schemaVersion")]
    schema_version: Option<String>,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
    #[serde(default)]
    variables: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetDocument {
    #[serde(default)]
    set: SetHeader,
    #[serde(default)]
    units: Vec<UnitDocument>,
}

impl ConfigurationSet {
    /// An empty, named set.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Append a unit.
    #[must_use]
    pub fn with_unit(mut self, unit: ConfigurationUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Load a set from a TOML file.
    ///
    /// The set name defaults to the file stem when the `[set]` header omits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, a unit is
    /// invalid, or two units share an identifier.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut set = Self::parse(&content, path)?;
        set.path = Some(path.to_path_buf());
        Ok(set)
    }

    /// Parse TOML text; `origin` is used for error messages and the default name.
    ///
    /// # Errors
    ///
    /// See [`ConfigurationSet::load`].
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let doc: SetDocument = toml_loader::parse(content, origin)?;
        let units = doc
            .units
            .into_iter()
            .map(ConfigurationUnit::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        for (i, unit) in units.iter().enumerate() {
            let duplicate = units
                .iter()
                .skip(i + 1)
                .any(|other| other.identifier.eq_ignore_ascii_case(&unit.identifier));
            if duplicate {
                return Err(ConfigError::InvalidUnit {
                    unit: unit.identifier.clone(),
                    message: "identifier is used by more than one unit".to_string(),
                });
            }
        }

        let name = doc.set.name.unwrap_or_else(|| {
            origin
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Ok(Self {
            name,
            path: None,
            schema_version: doc.set.schema_version,
            units,
            parameters: doc.set.parameters.into(),
            variables: doc.set.variables.into(),
        })
    }

    /// Find a unit by identifier, case-insensitively.
    #[must_use]
    pub fn unit(&self, identifier: &str) -> Option<&ConfigurationUnit> {
        self.units
            .iter()
            .find(|u| u.identifier.eq_ignore_ascii_case(identifier))
    }
}
