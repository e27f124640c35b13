//! Compiled schema representation.
//!
//! A [`SchemaTree`] maps every property of a model to a [`SchemaEntry`]:
//! a bare type token, an object carrying decorator metadata ([`FieldSpec`]),
//! or a plural wrapper around either. The JSON form matches the document
//! shape connectors are expected to store.

use std::collections::BTreeMap;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier metadata field present on every model.
pub const ID_FIELD: &str = "_id";
/// Creation timestamp metadata field present on every model.
pub const CREATED_AT_FIELD: &str = "_createdAt";
/// Update timestamp metadata field present on every model.
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// Type tokens that never denote a model reference (compared case-insensitively).
pub const NATIVE_TYPES: [&str; 6] = ["string", "number", "date", "boolean", "array", "object"];

/// Returns `true` if `type_name` is one of [`NATIVE_TYPES`].
#[must_use]
pub fn is_native_type(type_name: &str) -> bool {
    NATIVE_TYPES
        .iter()
        .any(|native| native.eq_ignore_ascii_case(type_name))
}

/// Splits an array type into its element type.
///
/// `User[]` and `Array<User>` both yield `("User", true)`; anything else is
/// returned unchanged with `false`.
#[must_use]
pub fn split_plural(type_name: &str) -> (&str, bool) {
    let trimmed = type_name.trim();
    if let Some(element) = trimmed.strip_suffix("[]") {
        return (element.trim(), true);
    }
    if let Some(element) = trimmed
        .strip_prefix("Array<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return (element.trim(), true);
    }
    (trimmed, false)
}

/// Visibility marker set by `@invisible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Invisibility {
    /// `true` hides the field from serialization; `false` is a no-op.
    Flag(bool),
    /// Name of a predicate exported by the runtime class; the field is
    /// hidden for instances where it returns `true`.
    Predicate(String),
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Object form of a schema entry: a type plus decorator metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub insert_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub embedded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invisible: Option<Invisibility>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Metadata from decorators outside the built-in catalogue.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FieldSpec {
    /// A spec carrying only a type.
    #[must_use]
    pub fn typed(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    /// A reference spec: stored as a string id pointing at `target`.
    #[must_use]
    pub fn reference_to(target: impl Into<String>) -> Self {
        Self {
            type_name: Some("string".to_string()),
            reference: Some(target.into()),
            ..Self::default()
        }
    }

    /// Returns `true` when no metadata key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow merge: every key set on `other` overwrites the key on `self`.
    pub fn merge_from(&mut self, other: &Self) {
        self.required |= other.required;
        self.unique |= other.unique;
        self.index |= other.index;
        self.immutable |= other.immutable;
        self.read_only |= other.read_only;
        self.insert_only |= other.insert_only;
        self.embedded |= other.embedded;
        if other.invisible.is_some() {
            self.invisible.clone_from(&other.invisible);
        }
        if other.enumeration.is_some() {
            self.enumeration.clone_from(&other.enumeration);
        }
        if other.type_name.is_some() {
            self.type_name.clone_from(&other.type_name);
        }
        if other.reference.is_some() {
            self.reference.clone_from(&other.reference);
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Metadata tags set on this spec, in a stable order.
    ///
    /// Each tag is the name validators are looked up by.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let flags = [
            ("required", self.required),
            ("unique", self.unique),
            ("index", self.index),
            ("immutable", self.immutable),
            ("readOnly", self.read_only),
            ("insertOnly", self.insert_only),
            ("embedded", self.embedded),
            ("enum", self.enumeration.is_some()),
        ];
        flags
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(tag, _)| tag.to_string())
            .chain(self.extra.keys().cloned())
            .collect()
    }
}

/// Value of one [`SchemaTree`] slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaEntry {
    /// A bare type token, serialized as a string (`"number"`).
    Type(String),
    /// A type plus metadata, serialized as an object.
    Field(FieldSpec),
    /// Array-of wrapper, serialized as a one-element array.
    Plural(Box<SchemaEntry>),
}

impl SchemaEntry {
    /// The element entry: `self` for singular slots, the wrapped entry otherwise.
    #[must_use]
    pub fn element(&self) -> &Self {
        match self {
            Self::Plural(inner) => inner.element(),
            other => other,
        }
    }

    #[must_use]
    pub fn is_plural(&self) -> bool {
        matches!(self, Self::Plural(_))
    }

    /// Object metadata of the element, if the element is in object form.
    #[must_use]
    pub fn spec(&self) -> Option<&FieldSpec> {
        match self.element() {
            Self::Field(spec) => Some(spec),
            _ => None,
        }
    }

    /// Referenced collection name of the element.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.spec().and_then(|s| s.reference.as_deref())
    }

    /// Type token of the element.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self.element() {
            Self::Type(t) => Some(t),
            Self::Field(spec) => spec.type_name.as_deref(),
            Self::Plural(_) => None,
        }
    }

    /// Wraps the entry in [`SchemaEntry::Plural`] unless it already is.
    #[must_use]
    pub fn into_plural(self) -> Self {
        match self {
            Self::Plural(_) => self,
            other => Self::Plural(Box::new(other)),
        }
    }
}

impl Serialize for SchemaEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Type(t) => serializer.serialize_str(t),
            Self::Field(spec) => spec.serialize(serializer),
            Self::Plural(inner) => serializer.collect_seq(std::iter::once(inner.as_ref())),
        }
    }
}

/// Property name to schema entry, ordered for deterministic output.
pub type SchemaTree = BTreeMap<String, SchemaEntry>;

/// The three metadata fields every model carries.
#[must_use]
pub fn implicit_fields() -> [(String, SchemaEntry); 3] {
    [
        (
            ID_FIELD.to_string(),
            SchemaEntry::Field(FieldSpec {
                read_only: true,
                ..FieldSpec::typed("string")
            }),
        ),
        (
            CREATED_AT_FIELD.to_string(),
            SchemaEntry::Field(FieldSpec {
                read_only: true,
                ..FieldSpec::typed("Date")
            }),
        ),
        (
            UPDATED_AT_FIELD.to_string(),
            SchemaEntry::Field(FieldSpec::typed("Date")),
        ),
    ]
}

/// Reference descriptor stored in [`ModelSchema::references`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceInfo {
    /// Collection name of the referenced model.
    #[serde(rename = "ref")]
    pub target: String,
    /// Set for reverse references: the path on the target pointing back.
    #[serde(rename = "$reverse", skip_serializing_if = "Option::is_none")]
    pub reverse: Option<String>,
}

/// A custom route declared with `@route`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecl {
    /// Lower-case HTTP verb.
    pub method: String,
    /// Path appended to the model's route prefix; always starts with `/`.
    pub path: String,
    /// Name of the method serving the route.
    pub handler: String,
}

/// Everything the compiler derives for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSchema {
    #[serde(rename = "$prototype")]
    pub prototype: SchemaTree,
    /// Non-reference property names, implicit fields first.
    #[serde(rename = "$properties")]
    pub properties: Vec<String>,
    #[serde(rename = "$plurals")]
    pub plurals: Vec<String>,
    #[serde(rename = "$references")]
    pub references: BTreeMap<String, ReferenceInfo>,
    #[serde(rename = "$statics")]
    pub statics: Vec<String>,
    #[serde(rename = "$methods")]
    pub methods: Vec<String>,
    #[serde(rename = "$routes")]
    pub routes: Vec<RouteDecl>,
    /// Hook name to the method implementing it.
    #[serde(rename = "$hooks")]
    pub hooks: BTreeMap<String, String>,
}

impl ModelSchema {
    /// An empty schema, used before compilation.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            prototype: BTreeMap::new(),
            properties: Vec::new(),
            plurals: Vec::new(),
            references: BTreeMap::new(),
            statics: Vec::new(),
            methods: Vec::new(),
            routes: Vec::new(),
            hooks: BTreeMap::new(),
        }
    }

    /// Property and reference names, i.e. the keys fields are built for.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.properties
            .iter()
            .chain(self.references.keys())
            .cloned()
            .collect()
    }
}
