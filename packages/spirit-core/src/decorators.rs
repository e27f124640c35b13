//! Decorator catalogue and argument parsing.
//!
//! Decorator calls carry positional arguments. Each known decorator declares
//! its parameter names, and [`inspect`] pairs arguments with those names to
//! produce a `name -> value` map. The helpers below turn inspected decorators
//! into class, property and method metadata.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::decl::{ClassDecl, DecoratorCall};
use crate::error::ConfigError;
use crate::schema::{FieldSpec, Invisibility};

/// Parameter names of a known decorator, or `None` for unknown decorators.
#[must_use]
pub fn parameters(name: &str) -> Option<&'static [&'static str]> {
    let params: &'static [&'static str] = match name {
        "model" => &["options"],
        "collection" => &["name"],
        "required" | "unique" | "index" | "immutable" | "readonly" | "insertonly"
        | "embedded" => &[],
        "invisible" => &["predicate"],
        "reverse" => &["path"],
        "enumeration" => &["values"],
        "hook" => &["name"],
        "route" => &["method", "path"],
        _ => return None,
    };
    Some(params)
}

/// A decorator call with its arguments resolved to parameter names.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspected {
    pub name: String,
    pub args: BTreeMap<String, Value>,
}

impl Inspected {
    fn str_arg(&self, param: &str) -> Result<Option<&str>, ConfigError> {
        match self.args.get(param) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.invalid(format!("'{param}' must be a string, got {other}"))),
        }
    }

    fn invalid(&self, reason: String) -> ConfigError {
        ConfigError::InvalidDecorator {
            decorator: self.name.clone(),
            reason,
        }
    }
}

/// Resolves positional arguments against the decorator's parameter names.
///
/// Unknown decorators keep their arguments under `arg0`, `arg1`, ...
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDecorator`] when a known decorator receives
/// more arguments than it declares.
pub fn inspect(call: &DecoratorCall) -> Result<Inspected, ConfigError> {
    let args = match parameters(&call.name) {
        Some(params) => {
            if call.args.len() > params.len() {
                return Err(ConfigError::InvalidDecorator {
                    decorator: call.name.clone(),
                    reason: format!(
                        "expected at most {} argument(s), got {}",
                        params.len(),
                        call.args.len()
                    ),
                });
            }
            params
                .iter()
                .zip(&call.args)
                .map(|(param, arg)| ((*param).to_string(), arg.clone()))
                .collect()
        }
        None => call
            .args
            .iter()
            .enumerate()
            .map(|(idx, arg)| (format!("arg{idx}"), arg.clone()))
            .collect(),
    };
    Ok(Inspected {
        name: call.name.clone(),
        args,
    })
}

// ---------------------------------------------------------------------------
// Class metadata
// ---------------------------------------------------------------------------

/// Options carried by a model class marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    pub collection_name: String,
    pub persistent: bool,
    pub datasource: Option<String>,
    pub linked_factory: Option<String>,
}

/// Reads the model marker of a class.
///
/// Returns `Ok(None)` when the class carries neither `@model` nor
/// `@collection`, i.e. it is not a model.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDecorator`] for malformed marker arguments.
pub fn class_metadata(class: &ClassDecl) -> Result<Option<ClassMetadata>, ConfigError> {
    let mut meta: Option<ClassMetadata> = None;
    for call in &class.decorators {
        let deco = inspect(call)?;
        match deco.name.as_str() {
            "model" => {
                let m = meta.get_or_insert_with(|| default_class_metadata(class));
                match deco.args.get("options") {
                    None | Some(Value::Null) => {}
                    Some(Value::Object(options)) => apply_model_options(&deco, options, m)?,
                    Some(other) => {
                        return Err(deco.invalid(format!("'options' must be an object, got {other}")))
                    }
                }
            }
            "collection" => {
                let m = meta.get_or_insert_with(|| default_class_metadata(class));
                if let Some(name) = deco.str_arg("name")? {
                    m.collection_name = name.to_string();
                }
            }
            other => debug!(class = %class.name, decorator = other, "ignoring class decorator"),
        }
    }
    Ok(meta)
}

fn default_class_metadata(class: &ClassDecl) -> ClassMetadata {
    ClassMetadata {
        collection_name: class.name.clone(),
        persistent: true,
        datasource: None,
        linked_factory: None,
    }
}

fn apply_model_options(
    deco: &Inspected,
    options: &serde_json::Map<String, Value>,
    meta: &mut ClassMetadata,
) -> Result<(), ConfigError> {
    for (key, value) in options {
        match (key.as_str(), value) {
            ("persistent", Value::Bool(b)) => meta.persistent = *b,
            ("datasource", Value::String(s)) => meta.datasource = Some(s.clone()),
            ("collectionName", Value::String(s)) => meta.collection_name.clone_from(s),
            ("linkedFactory", Value::String(s)) => meta.linked_factory = Some(s.clone()),
            (_, Value::Null) => {}
            ("persistent" | "datasource" | "collectionName" | "linkedFactory", other) => {
                return Err(deco.invalid(format!("option '{key}' has an unexpected value {other}")));
            }
            (unknown, _) => debug!(option = unknown, "ignoring unknown model option"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Property metadata
// ---------------------------------------------------------------------------

/// Metadata contributed by property decorators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMetadata {
    /// Object metadata; `None` when no decorator contributed a key.
    pub spec: Option<FieldSpec>,
    /// Path on the referenced model for reverse references.
    pub reverse: Option<String>,
}

/// Folds property decorators into [`PropertyMetadata`].
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDecorator`] for malformed arguments.
pub fn property_metadata(decorators: &[DecoratorCall]) -> Result<PropertyMetadata, ConfigError> {
    let mut spec = FieldSpec::default();
    let mut reverse = None;
    for call in decorators {
        let deco = inspect(call)?;
        match deco.name.as_str() {
            "required" => spec.required = true,
            "unique" => spec.unique = true,
            "index" => spec.index = true,
            "immutable" => spec.immutable = true,
            "readonly" => spec.read_only = true,
            "insertonly" => spec.insert_only = true,
            "embedded" => spec.embedded = true,
            "invisible" => {
                spec.invisible = match deco.args.get("predicate") {
                    None | Some(Value::Null) => Some(Invisibility::Flag(true)),
                    Some(Value::Bool(b)) => Some(Invisibility::Flag(*b)),
                    Some(Value::String(name)) => Some(Invisibility::Predicate(name.clone())),
                    Some(other) => {
                        return Err(deco.invalid(format!(
                            "'predicate' must be a boolean or a predicate name, got {other}"
                        )))
                    }
                };
            }
            "reverse" => {
                let path = deco
                    .str_arg("path")?
                    .ok_or_else(|| deco.invalid("'path' is required".to_string()))?;
                reverse = Some(path.to_string());
            }
            "enumeration" => match deco.args.get("values") {
                Some(Value::Array(values)) => spec.enumeration = Some(values.clone()),
                other => {
                    return Err(deco.invalid(format!(
                        "'values' must be an array, got {}",
                        other.unwrap_or(&Value::Null)
                    )))
                }
            },
            "hook" | "route" | "model" | "collection" => {
                return Err(deco.invalid("not applicable to properties".to_string()));
            }
            _ => {
                spec.extra
                    .insert(deco.name.clone(), Value::Object(deco.args.into_iter().collect()));
            }
        }
    }
    Ok(PropertyMetadata {
        spec: (!spec.is_empty()).then_some(spec),
        reverse,
    })
}

// ---------------------------------------------------------------------------
// Method metadata
// ---------------------------------------------------------------------------

/// Role of a method as determined by its decorators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodRole {
    /// Invocable static or instance method.
    Plain,
    /// Lifecycle hook with the given name.
    Hook(String),
    /// Custom route.
    Route { method: String, path: String },
}

const ROUTE_VERBS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// Determines the role of a method from its decorators.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDecorator`] for a hook without a name or a
/// route with an unknown verb.
pub fn method_role(decorators: &[DecoratorCall]) -> Result<MethodRole, ConfigError> {
    for call in decorators {
        let deco = inspect(call)?;
        match deco.name.as_str() {
            "hook" => {
                let name = deco
                    .str_arg("name")?
                    .ok_or_else(|| deco.invalid("'name' is required".to_string()))?;
                return Ok(MethodRole::Hook(name.to_string()));
            }
            "route" => {
                let method = deco
                    .str_arg("method")?
                    .ok_or_else(|| deco.invalid("'method' is required".to_string()))?
                    .to_ascii_lowercase();
                if !ROUTE_VERBS.contains(&method.as_str()) {
                    return Err(deco.invalid(format!("unsupported HTTP verb '{method}'")));
                }
                let path = deco.str_arg("path")?.unwrap_or("");
                let path = if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{path}")
                };
                return Ok(MethodRole::Route { method, path });
            }
            _ => {}
        }
    }
    Ok(MethodRole::Plain)
}
