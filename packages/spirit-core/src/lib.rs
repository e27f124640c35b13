//! Spirit Core: model declarations, schema compiler, model registry and factories.

pub mod class;
pub mod compiler;
pub mod connector;
pub mod controller;
pub mod decl;
pub mod decorators;
pub mod error;
pub mod factory;
pub mod field;
pub mod helper;
pub mod instance;
pub mod loader;
pub mod memory;
pub mod params;
pub mod registry;
pub mod schema;
pub mod validation;

pub use class::{ModelClass, ModelClassBuilder, RouteRequest};
pub use compiler::SchemaCompiler;
pub use connector::{Connector, ConnectorRegistry, ModelActions, ModelBinding};
pub use controller::{ControllerRequest, DefaultModelController, ModelController, Outcome};
pub use decl::{ClassDecl, DecoratorCall, MemberDecl, MethodDecl, PropertyDecl, SourceFile};
pub use error::{ConfigError, FactoryError, RequestError};
pub use factory::{FactoryOptions, ModelFactory, NewData};
pub use field::{FieldDescriptor, FieldVisibility};
pub use helper::{DefaultModelHelper, ModelHelper};
pub use instance::ModelInstance;
pub use loader::{ClassTable, DeclarationLoader, LoadedSources};
pub use memory::MemoryConnector;
pub use params::{Include, Parameters};
pub use registry::ModelRegistry;
pub use schema::{FieldSpec, ModelSchema, SchemaEntry};
pub use validation::{Diagnosis, Severity, ValidationError, Validator};

