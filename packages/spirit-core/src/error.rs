//! Error types for the compile, lookup, and request phases.
//!
//! Errors are split by the phase that raises them:
//!
//! - [`ConfigError`]: fatal bootstrap failures (duplicate models, unresolved
//!   reference types, missing connectors). Raised synchronously while
//!   compiling and never retried.
//! - [`FactoryError`]: lookups and datastore calls made through a
//!   [`ModelFactory`](crate::ModelFactory) at request time.
//! - [`RequestError`]: what a controller hands back to the transport layer.

use std::path::PathBuf;

use crate::validation::ValidationError;

/// Configuration errors raised while loading and compiling models.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("model factory '{name}' is already registered")]
    DuplicateModel { name: String },
    #[error("no model factory registered for type '{type_name}' (property '{property}' of class '{class}')")]
    UnresolvedType {
        class: String,
        property: String,
        type_name: String,
    },
    #[error("no connector registered for datasource '{datasource}' (model '{model}')")]
    MissingConnector { model: String, datasource: String },
    #[error("inheritance cycle detected while inspecting class '{class}'")]
    InheritanceCycle { class: String },
    #[error("model '{model}' links to unknown model factory '{target}'")]
    UnknownLinkedFactory { model: String, target: String },
    #[error("schema of model '{name}' has already been compiled")]
    AlreadyCompiled { name: String },
    #[error("model factory '{name}' has already been initialized")]
    AlreadyInitialized { name: String },
    #[error("model factory '{name}' has no compiled schema")]
    NotCompiled { name: String },
    #[error("invalid arguments for decorator '@{decorator}': {reason}")]
    InvalidDecorator { decorator: String, reason: String },
    #[error("unknown visibility predicate '{predicate}' on '{model}.{field}'")]
    UnknownPredicate {
        model: String,
        field: String,
        predicate: String,
    },
    #[error("failed to read model source '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model source '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("connector setup failed: {0}")]
    Connector(#[from] anyhow::Error),
}

/// Errors raised by model factory lookups and datastore access.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("path '{path}' not found in '{model}' factory's prototype")]
    PathNotFound { path: String, model: String },
    #[error("model factory not found for '{name}'")]
    FactoryNotFound { name: String },
    #[error("model '{model}' is not persistent")]
    NotPersistent { model: String },
    #[error("model registry has been dropped")]
    RegistryDropped,
    #[error("hook '{hook}' failed on '{model}': {source}")]
    Hook {
        hook: String,
        model: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("datastore error: {0}")]
    Datastore(#[from] anyhow::Error),
}

/// Errors returned by controllers and invocation handlers.
///
/// The transport layer maps each variant onto a status code.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<FactoryError> for RequestError {
    fn from(err: FactoryError) -> Self {
        match err {
            FactoryError::PathNotFound { .. } | FactoryError::FactoryNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            FactoryError::Validation(v) => Self::Validation(v),
            FactoryError::NotPersistent { .. } => Self::BadRequest(err.to_string()),
            FactoryError::RegistryDropped | FactoryError::Hook { .. } => {
                Self::Internal(anyhow::anyhow!(err.to_string()))
            }
            FactoryError::Datastore(e) => Self::Internal(e),
        }
    }
}
