//! Validation diagnoses and the validators shipped with the crate.
//!
//! Validators are looked up by metadata tag (`required`, `enum`, ...) when a
//! factory is initialized and attached to the fields carrying that tag. At
//! validation time each attached validator inspects one field of one
//! instance and records [`Diagnosis`] entries on the instance; only
//! [`Severity::Error`] entries fail the operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::field::FieldDescriptor;
use crate::instance::ModelInstance;

/// Severity of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub severity: Severity,
    pub message: String,
    /// Field the diagnosis refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Diagnosis {
    #[must_use]
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, field, message)
    }

    #[must_use]
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, field, message)
    }

    #[must_use]
    pub fn info(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, field, message)
    }

    fn new(severity: Severity, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Raised when an instance carries at least one error diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {}", summary(&self.diagnoses))]
pub struct ValidationError {
    pub diagnoses: Vec<Diagnosis>,
}

fn summary(diagnoses: &[Diagnosis]) -> String {
    diagnoses
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A field validator attached by metadata tag.
pub trait Validator: Send + Sync {
    /// Tag this validator serves.
    fn name(&self) -> &str;

    /// Checks `field` on `instance`, recording diagnoses on the instance.
    ///
    /// Returning `false` stops the remaining validators of the current
    /// validation run.
    fn validate(&self, instance: &ModelInstance, field: &FieldDescriptor) -> bool;
}

impl fmt::Debug for dyn Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.name())
    }
}

/// Rejects missing and `null` values, and empty arrays on plural fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredValidator;

impl Validator for RequiredValidator {
    fn name(&self) -> &str {
        "required"
    }

    fn validate(&self, instance: &ModelInstance, field: &FieldDescriptor) -> bool {
        let missing = match instance.get(&field.name) {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => field.is_plural && items.is_empty(),
            Some(_) => false,
        };
        if missing {
            instance.add_diagnosis(Diagnosis::error(
                &field.name,
                format!("'{}' is required", field.name),
            ));
        }
        true
    }
}

/// Rejects values outside the field's declared enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumValidator;

impl Validator for EnumValidator {
    fn name(&self) -> &str {
        "enum"
    }

    fn validate(&self, instance: &ModelInstance, field: &FieldDescriptor) -> bool {
        let Some(allowed) = field.enumeration.as_deref() else {
            return true;
        };
        let values = match instance.get(&field.name) {
            None | Some(Value::Null) => return true,
            Some(Value::Array(items)) if field.is_plural => items,
            Some(value) => vec![value],
        };
        for value in values.iter().filter(|v| !allowed.contains(v)) {
            instance.add_diagnosis(Diagnosis::error(
                &field.name,
                format!("value {value} of '{}' is not one of the allowed values", field.name),
            ));
        }
        true
    }
}
