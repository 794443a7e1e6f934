//! Unit processor: one unit bound to its resolved provider.
use std::sync::Arc;

use super::Verb;
use super::backend::ResourceBackend;
use super::resource::{ExportedInstance, ResolvedResource, SetOutcome};
use crate::config::ConfigurationUnit;
use crate::error::{InvokeError, Result};
use crate::logging::Diagnostics;
use crate::value::ValueSet;

/// Exposes Get/Test/Set/Export for one bound unit.
///
/// Each verb is an independent synchronous call; a failing verb leaves the
/// processor usable for the next one.
#[derive(Debug)]
pub struct UnitProcessor {
    unit: ConfigurationUnit,
    resource: Arc<ResolvedResource>,
    backend: Arc<dyn ResourceBackend>,
    diagnostics: Arc<Diagnostics>,
}

impl UnitProcessor {
    pub(crate) fn new(
        unit: ConfigurationUnit,
        resource: Arc<ResolvedResource>,
        backend: Arc<dyn ResourceBackend>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            unit,
            resource,
            backend,
            diagnostics,
        }
    }

    /// The bound unit.
    #[must_use]
    pub const fn unit(&self) -> &ConfigurationUnit {
        &self.unit
    }

    /// The provider the unit resolved to.
    #[must_use]
    pub fn resource(&self) -> &ResolvedResource {
        &self.resource
    }

    fn announce(&self, verb: Verb) {
        self.diagnostics.verbose(&format!(
            "Invoking {verb} for {} ({})",
            self.unit.qualified_name(),
            self.resource.qualified_name()
        ));
    }

    /// Read the current state of the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails or its result is malformed.
    pub fn get(&self) -> Result<ValueSet> {
        self.announce(Verb::Get);
        self.backend
            .get(&self.resource, &self.unit)
            .map_err(|e| self.diagnostics.report(e))
    }

    /// Whether the system is already in the unit's desired state.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::InvalidResult`] if the backend produced no
    /// boolean result.
    pub fn test(&self) -> Result<bool> {
        self.announce(Verb::Test);
        let in_desired_state = self
            .backend
            .test(&self.resource, &self.unit)
            .map_err(|e| self.diagnostics.report(e))?;
        tracing::debug!(unit = %self.unit.identifier, in_desired_state, "test finished");
        Ok(in_desired_state)
    }

    /// Apply the unit's settings.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::PropertyAssignment`] when the settings could not
    /// be applied to the resource, [`InvokeError::ResourceInternal`] when the
    /// resource itself failed.
    pub fn set(&self) -> Result<SetOutcome> {
        self.announce(Verb::Set);
        let outcome = self
            .backend
            .set(&self.resource, &self.unit)
            .map_err(|e| self.diagnostics.report(e))?;
        if outcome.reboot_required {
            self.diagnostics.warning(&format!(
                "{} requires a reboot to finish applying",
                self.unit.qualified_name()
            ));
        }
        Ok(outcome)
    }

    /// Enumerate every instance of the unit's resource type.
    ///
    /// Every item must report the unit's type (case-insensitively); one
    /// mismatch fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::NotSupported`] when the provider cannot export
    /// and [`InvokeError::ExportTypeMismatch`] for a foreign item.
    pub fn export(&self) -> Result<Vec<ExportedInstance>> {
        self.announce(Verb::Export);
        let items = self
            .backend
            .export(&self.resource, &self.unit)
            .map_err(|e| self.diagnostics.report(e))?;
        if let Some((index, item)) = items
            .iter()
            .enumerate()
            .find(|(_, item)| !self.is_own_type(&item.resource_type))
        {
            return Err(self.diagnostics.report(
                InvokeError::ExportTypeMismatch {
                    expected: self.unit.qualified_name(),
                    actual: item.resource_type.clone(),
                    index,
                }
                .into(),
            ));
        }
        Ok(items)
    }

    fn is_own_type(&self, reported: &str) -> bool {
        [
            self.unit.resource_type.clone(),
            self.unit.qualified_name(),
            self.resource.name.clone(),
            self.resource.qualified_name(),
        ]
        .iter()
        .any(|own| own.eq_ignore_ascii_case(reported))
    }
}
