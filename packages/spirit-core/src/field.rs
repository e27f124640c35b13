//! Per-property field descriptors derived from a compiled schema.

use std::fmt;

use serde_json::Value;

use crate::class::{ModelClass, PredicateFn};
use crate::error::ConfigError;
use crate::instance::ModelInstance;
use crate::schema::{Invisibility, ReferenceInfo, SchemaEntry};

/// How a field decides whether it is serialized.
#[derive(Clone, Default)]
pub enum FieldVisibility {
    #[default]
    Visible,
    Hidden,
    /// Hidden for instances the named predicate returns `true` for.
    Predicate { name: String, hides: PredicateFn },
}

impl fmt::Debug for FieldVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => f.write_str("Visible"),
            Self::Hidden => f.write_str("Hidden"),
            Self::Predicate { name, .. } => write!(f, "Predicate({name})"),
        }
    }
}

/// Metadata view of one property or reference of a model.
#[derive(Debug, Clone, Default)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_name: Option<String>,
    /// Collection name of the referenced model, for reference fields.
    pub reference: Option<String>,
    pub is_plural: bool,
    pub is_reference: bool,
    pub is_reverse: bool,
    pub is_embedded: bool,
    pub is_read_only: bool,
    pub is_insert_only: bool,
    pub is_immutable: bool,
    pub is_unique: bool,
    pub is_required: bool,
    pub is_indexed: bool,
    pub enumeration: Option<Vec<Value>>,
    /// Metadata tags validators are resolved by.
    pub tags: Vec<String>,
    pub visibility: FieldVisibility,
}

impl FieldDescriptor {
    /// Builds a descriptor from a schema entry and resolves a predicate
    /// visibility against `class`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPredicate`] when `@invisible` names a
    /// predicate the class does not provide.
    pub fn new(
        model: &str,
        name: &str,
        entry: &SchemaEntry,
        reference: Option<&ReferenceInfo>,
        class: &ModelClass,
    ) -> Result<Self, ConfigError> {
        let mut field = Self::from_entry(name, entry, reference);
        if let Some(Invisibility::Predicate(predicate)) =
            entry.spec().and_then(|s| s.invisible.as_ref())
        {
            let hides = class.predicate(predicate).cloned().ok_or_else(|| {
                ConfigError::UnknownPredicate {
                    model: model.to_string(),
                    field: name.to_string(),
                    predicate: predicate.clone(),
                }
            })?;
            field.visibility = FieldVisibility::Predicate {
                name: predicate.clone(),
                hides,
            };
        }
        Ok(field)
    }

    /// Builds a descriptor from a schema entry alone.
    ///
    /// Predicate visibility is left as [`FieldVisibility::Visible`].
    #[must_use]
    pub fn from_entry(name: &str, entry: &SchemaEntry, reference: Option<&ReferenceInfo>) -> Self {
        let spec = entry.spec().cloned().unwrap_or_default();
        let reference_target = reference
            .map(|r| r.target.clone())
            .or_else(|| spec.reference.clone());
        Self {
            name: name.to_string(),
            type_name: entry.type_name().map(str::to_string),
            is_plural: entry.is_plural(),
            is_reference: reference_target.is_some(),
            is_reverse: reference.is_some_and(|r| r.reverse.is_some()),
            reference: reference_target,
            is_embedded: spec.embedded,
            is_read_only: spec.read_only,
            is_insert_only: spec.insert_only,
            is_immutable: spec.immutable,
            is_unique: spec.unique,
            is_required: spec.required,
            is_indexed: spec.index,
            tags: spec.tags(),
            visibility: match spec.invisible {
                Some(Invisibility::Flag(true)) => FieldVisibility::Hidden,
                _ => FieldVisibility::Visible,
            },
            enumeration: spec.enumeration,
        }
    }

    /// Returns `true` if the field is serialized for `instance`.
    #[must_use]
    pub fn is_visible(&self, instance: &ModelInstance) -> bool {
        match &self.visibility {
            FieldVisibility::Visible => true,
            FieldVisibility::Hidden => false,
            FieldVisibility::Predicate { hides, .. } => !hides(instance),
        }
    }
}
