//! Model factories.
//!
//! A [`ModelFactory`] is the runtime object behind one model: it owns the
//! compiled schema, the field descriptors and their validators, the hook
//! table and, for persistent models, the actions/helper/controller binding.
//!
//! Factories are created bare during the first compile pass, receive their
//! schema exactly once during the second pass, and are initialized exactly
//! once afterwards. Both steps go through [`OnceLock`], so a factory is
//! immutable once shared with request handlers.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::class::{HookFn, ModelClass};
use crate::connector::{Connector, ModelActions, ModelBinding};
use crate::controller::ModelController;
use crate::error::{ConfigError, FactoryError, RequestError};
use crate::field::FieldDescriptor;
use crate::helper::{DefaultModelHelper, ModelHelper};
use crate::instance::ModelInstance;
use crate::params::Parameters;
use crate::registry::ModelRegistry;
use crate::schema::{ModelSchema, ID_FIELD};
use crate::validation::{ValidationError, Validator};

static EMPTY_SCHEMA: ModelSchema = ModelSchema::empty();
static DEFAULT_HELPER: DefaultModelHelper = DefaultModelHelper;

/// Hook run before an instance is written.
pub const BEFORE_SAVE: &str = "beforeSave";
/// Hook run after an instance is written.
pub const AFTER_SAVE: &str = "afterSave";

/// Options read from the model marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryOptions {
    pub persistent: bool,
    pub datasource: Option<String>,
    /// Class or collection name of the factory this one aliases. An alias
    /// shares the target's schema and storage and gets no routes.
    pub linked_factory: Option<String>,
}

impl FactoryOptions {
    /// Options of a persistent model stored in `datasource`.
    #[must_use]
    pub fn persistent(datasource: impl Into<String>) -> Self {
        Self {
            persistent: true,
            datasource: Some(datasource.into()),
            linked_factory: None,
        }
    }

    /// Options of a non-persistent (service only) model.
    #[must_use]
    pub fn service() -> Self {
        Self {
            persistent: false,
            datasource: None,
            linked_factory: None,
        }
    }
}

/// Input accepted by [`ModelFactory::create_new`].
#[derive(Debug, Clone, Default)]
pub enum NewData {
    #[default]
    Empty,
    /// An existing instance, returned unchanged when of the target model.
    Instance(ModelInstance),
    /// A bare id, shorthand for `{"_id": id}`.
    Id(String),
    /// Property values.
    Values(Value),
}

impl From<ModelInstance> for NewData {
    fn from(instance: ModelInstance) -> Self {
        Self::Instance(instance)
    }
}

impl From<&str> for NewData {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<String> for NewData {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<Value> for NewData {
    fn from(value: Value) -> Self {
        match value {
            Value::String(id) => Self::Id(id),
            Value::Null => Self::Empty,
            other => Self::Values(other),
        }
    }
}

/// A validator attached to one field.
struct AttachedValidator {
    field: usize,
    validator: Arc<dyn Validator>,
}

/// State built by [`ModelFactory::init`].
struct FactoryRuntime {
    fields: Vec<FieldDescriptor>,
    validators: Vec<AttachedValidator>,
    binding: Option<ModelBinding>,
}

/// Runtime object for one model.
pub struct ModelFactory {
    collection_name: String,
    class: Arc<ModelClass>,
    documentation: String,
    options: FactoryOptions,
    connector: Option<Arc<dyn Connector>>,
    registry: Weak<ModelRegistry>,
    schema: OnceLock<ModelSchema>,
    /// Collection name of the resolved alias target.
    link: OnceLock<String>,
    runtime: OnceLock<FactoryRuntime>,
}

impl ModelFactory {
    /// Creates a bare factory: no schema, not initialized.
    #[must_use]
    pub fn new(
        collection_name: impl Into<String>,
        class: Arc<ModelClass>,
        options: FactoryOptions,
        connector: Option<Arc<dyn Connector>>,
        registry: &Arc<ModelRegistry>,
    ) -> Self {
        Self {
            collection_name: collection_name.into(),
            class,
            documentation: String::new(),
            options,
            connector,
            registry: Arc::downgrade(registry),
            schema: OnceLock::new(),
            link: OnceLock::new(),
            runtime: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn documented(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Lower-camel-cased collection name used as the URL segment.
    #[must_use]
    pub fn route_name(&self) -> String {
        let mut chars = self.collection_name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    #[must_use]
    pub fn class(&self) -> &Arc<ModelClass> {
        &self.class
    }

    #[must_use]
    pub fn documentation(&self) -> &str {
        &self.documentation
    }

    #[must_use]
    pub fn options(&self) -> &FactoryOptions {
        &self.options
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.options.persistent
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.options.linked_factory.is_some()
    }

    /// Collection name of the aliased factory, once the compiler resolved it.
    #[must_use]
    pub fn linked_collection(&self) -> Option<&str> {
        self.link.get().map(String::as_str)
    }

    #[must_use]
    pub fn connector(&self) -> Option<&Arc<dyn Connector>> {
        self.connector.as_ref()
    }

    /// The compiled schema, or an empty one before compilation.
    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        self.schema.get().unwrap_or(&EMPTY_SCHEMA)
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.schema.get().is_some()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// Field descriptors, properties first then references. Empty before init.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.runtime.get().map_or(&[], |rt| rt.fields.as_slice())
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }

    fn binding(&self) -> Option<&ModelBinding> {
        self.runtime.get().and_then(|rt| rt.binding.as_ref())
    }

    #[must_use]
    pub fn actions(&self) -> Option<&Arc<dyn ModelActions>> {
        self.binding().map(|b| &b.actions)
    }

    #[must_use]
    pub fn controller(&self) -> Option<&Arc<dyn ModelController>> {
        self.binding().map(|b| &b.controller)
    }

    /// The bound helper, or the stateless default for unbound factories.
    #[must_use]
    pub fn helper(&self) -> &dyn ModelHelper {
        match self.binding() {
            Some(binding) => binding.helper.as_ref(),
            None => &DEFAULT_HELPER,
        }
    }

    pub(crate) fn require_actions(&self) -> Result<&Arc<dyn ModelActions>, FactoryError> {
        self.actions().ok_or_else(|| FactoryError::NotPersistent {
            model: self.collection_name.clone(),
        })
    }

    /// # Errors
    ///
    /// Returns [`FactoryError::RegistryDropped`] once the registry is gone.
    pub fn registry(&self) -> Result<Arc<ModelRegistry>, FactoryError> {
        self.registry.upgrade().ok_or(FactoryError::RegistryDropped)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Installs the compiled schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyCompiled`] on a second call.
    pub fn install_schema(&self, schema: ModelSchema) -> Result<(), ConfigError> {
        self.schema
            .set(schema)
            .map_err(|_| ConfigError::AlreadyCompiled {
                name: self.collection_name.clone(),
            })
    }

    /// Records the collection this alias shares its schema and storage with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyCompiled`] on a second call.
    pub fn link(&self, target: &str) -> Result<(), ConfigError> {
        self.link
            .set(target.to_string())
            .map_err(|_| ConfigError::AlreadyCompiled {
                name: self.collection_name.clone(),
            })
    }

    /// Builds field descriptors, attaches validators and stores `binding`
    /// for persistent models.
    ///
    /// Validators are resolved per metadata tag from the class, then the
    /// connector, then the global registry; the first match is attached.
    ///
    /// # Errors
    ///
    /// Fails if the schema is not compiled, the factory is already
    /// initialized, or a field names an unknown visibility predicate.
    pub fn init(&self, binding: Option<ModelBinding>) -> Result<(), ConfigError> {
        let schema = self.schema.get().ok_or_else(|| ConfigError::NotCompiled {
            name: self.collection_name.clone(),
        })?;
        if self.is_initialized() {
            return Err(ConfigError::AlreadyInitialized {
                name: self.collection_name.clone(),
            });
        }

        let mut fields = Vec::new();
        for name in schema.field_names() {
            let Some(entry) = schema.prototype.get(&name) else {
                debug!(model = %self.collection_name, field = %name, "field has no prototype entry");
                continue;
            };
            fields.push(FieldDescriptor::new(
                &self.collection_name,
                &name,
                entry,
                schema.references.get(&name),
                &self.class,
            )?);
        }

        let registry = self.registry.upgrade();
        let mut validators = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            for tag in &field.tags {
                let validator = self
                    .class
                    .validator(tag)
                    .cloned()
                    .or_else(|| self.connector.as_ref().and_then(|c| c.get_validator(tag)))
                    .or_else(|| registry.as_ref().and_then(|r| r.get_validator(tag)));
                match validator {
                    Some(validator) => validators.push(AttachedValidator {
                        field: index,
                        validator,
                    }),
                    None => debug!(
                        model = %self.collection_name,
                        field = %field.name,
                        tag = %tag,
                        "no validator for tag"
                    ),
                }
            }
        }

        let binding = if self.options.persistent {
            binding
        } else {
            None
        };
        let runtime = FactoryRuntime {
            fields,
            validators,
            binding,
        };
        self.runtime
            .set(runtime)
            .map_err(|_| ConfigError::AlreadyInitialized {
                name: self.collection_name.clone(),
            })?;
        info!(model = %self.collection_name, persistent = self.options.persistent, "model factory initialized");
        Ok(())
    }

    /// Connector-specific initialization: binds the connector's actions with
    /// the default helper and controller, then calls [`init`](Self::init).
    /// An alias binds the actions of its target's collection.
    ///
    /// # Errors
    ///
    /// Propagates connector failures and [`init`](Self::init) errors.
    pub fn setup(&self) -> Result<(), ConfigError> {
        let target = match self.linked_collection() {
            Some(collection) => Some(
                self.registry
                    .upgrade()
                    .and_then(|r| r.get_factory(collection))
                    .ok_or_else(|| ConfigError::UnknownLinkedFactory {
                        model: self.collection_name.clone(),
                        target: collection.to_string(),
                    })?,
            ),
            None => None,
        };
        let source = target.as_deref().unwrap_or(self);
        let binding = match (&source.connector, source.options.persistent) {
            (Some(connector), true) => {
                let datasource = source
                    .options
                    .datasource
                    .as_deref()
                    .unwrap_or_else(|| connector.datasource());
                let actions = connector.model_actions(&source.collection_name, datasource)?;
                Some(ModelBinding::with_defaults(actions))
            }
            _ => None,
        };
        self.init(binding)
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    /// Resolves the factory of the model referenced by property `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::PathNotFound`] if `path` is not a reference and
    /// [`FactoryError::FactoryNotFound`] if the target is not registered.
    pub fn get_model_factory_by_path(&self, path: &str) -> Result<Arc<Self>, FactoryError> {
        let target = self
            .schema()
            .prototype
            .get(path)
            .and_then(|entry| entry.reference())
            .ok_or_else(|| FactoryError::PathNotFound {
                path: path.to_string(),
                model: self.collection_name.clone(),
            })?;
        self.registry()?
            .get_factory(target)
            .ok_or_else(|| FactoryError::FactoryNotFound {
                name: target.to_string(),
            })
    }

    /// Collection name referenced by property `name`.
    #[must_use]
    pub fn get_reference_type(&self, name: &str) -> Option<&str> {
        self.schema()
            .prototype
            .get(name)
            .and_then(|entry| entry.reference())
    }

    /// Callback registered for hook `name`.
    #[must_use]
    pub fn get_hook_function(&self, name: &str) -> Option<&HookFn> {
        self.schema()
            .hooks
            .get(name)
            .and_then(|method| self.class.hook_handler(method))
    }

    /// Runs hook `name` on `instance`; a missing hook is a no-op.
    ///
    /// # Errors
    ///
    /// Wraps the hook's error in [`FactoryError::Hook`].
    pub fn run_hook(&self, name: &str, instance: &ModelInstance) -> Result<(), FactoryError> {
        let Some(hook) = self.get_hook_function(name) else {
            return Ok(());
        };
        debug!(model = %self.collection_name, hook = name, "running hook");
        hook(instance).map_err(|source| FactoryError::Hook {
            hook: name.to_string(),
            model: self.collection_name.clone(),
            source,
        })
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Builds an instance of this model, or of model `type_name` when given.
    ///
    /// An instance of the target model is returned as-is; an id becomes an
    /// `{"_id": id}` stub; values are applied with delete-missing semantics.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::FactoryNotFound`] for an unknown `type_name`.
    pub fn create_new(
        &self,
        data: impl Into<NewData>,
        type_name: Option<&str>,
    ) -> Result<ModelInstance, FactoryError> {
        let data = data.into();
        if let Some(type_name) = type_name.filter(|t| *t != self.collection_name) {
            let factory = self.registry()?.get_factory(type_name).ok_or_else(|| {
                FactoryError::FactoryNotFound {
                    name: type_name.to_string(),
                }
            })?;
            return factory.create_new(data, None);
        }

        let values = match data {
            NewData::Instance(instance) if instance.is_instance_of(&self.collection_name) => {
                return Ok(instance);
            }
            NewData::Instance(other) => Some(other.to_json()),
            NewData::Id(id) => {
                let mut stub = Map::new();
                stub.insert(ID_FIELD.to_string(), Value::String(id));
                Some(Value::Object(stub))
            }
            NewData::Values(values) => Some(values),
            NewData::Empty => None,
        };

        let instance = ModelInstance::new(self.collection_name.as_str());
        if let Some(values) = values {
            let params = Parameters::default().delete_missing(true);
            self.helper().update_values(self, &instance, &values, &params);
        }
        Ok(instance)
    }

    /// Replaces the id(s) stored at `item[key]` with the referenced records
    /// when `params` includes `key`.
    ///
    /// With an include `select`, each record is projected to `_id` plus the
    /// selected property. Ids without a record become `null`.
    ///
    /// # Errors
    ///
    /// Fails when `key` is not a reference, the target is not persistent, or
    /// the datastore read fails.
    pub async fn populate_field(
        &self,
        params: &Parameters,
        item: &mut Value,
        key: &str,
    ) -> Result<(), FactoryError> {
        let Some(include) = params.include(key) else {
            return Ok(());
        };
        let Some(raw) = item.get(key).filter(|v| !v.is_null()).cloned() else {
            return Ok(());
        };
        let target = self.get_model_factory_by_path(key)?;
        let actions = target.require_actions()?;
        let select = include.select.as_deref();

        let populated = match raw {
            Value::Array(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in &ids {
                    records.push(read_reference(actions.as_ref(), id, select).await?);
                }
                Value::Array(records)
            }
            single => read_reference(actions.as_ref(), &single, select).await?,
        };
        if let Some(obj) = item.as_object_mut() {
            obj.insert(key.to_string(), populated);
        }
        Ok(())
    }

    /// Deep copy of `item` with every populated reference reduced back to
    /// its `_id`. Non-reference properties are untouched.
    #[must_use]
    pub fn simplify_references(&self, item: &Value) -> Value {
        let mut transformed = item.clone();
        let Some(obj) = transformed.as_object_mut() else {
            return transformed;
        };
        for key in self.schema().references.keys() {
            if let Some(value) = obj.get_mut(key) {
                *value = simplify_reference(value);
            }
        }
        transformed
    }

    /// Runs every attached validator on `instance`.
    ///
    /// A validator returning `false` stops the run. Diagnoses from previous
    /// runs are cleared first.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::Validation`] if any error diagnosis was recorded.
    pub fn validate(&self, instance: &ModelInstance) -> Result<(), FactoryError> {
        instance.clear_diagnoses();
        if let Some(rt) = self.runtime.get() {
            for attached in &rt.validators {
                if !attached.validator.validate(instance, &rt.fields[attached.field]) {
                    break;
                }
            }
        }
        if instance.has_errors() {
            return Err(ValidationError {
                diagnoses: instance.diagnoses(),
            }
            .into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Invokes static method `name` with `body`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NotFound`] when `name` is not an allowed static
    /// or the class has no handler for it.
    pub async fn execute_service(&self, name: &str, body: Value) -> Result<Value, RequestError> {
        let handler = self
            .schema()
            .statics
            .iter()
            .any(|s| s == name)
            .then(|| self.class.static_handler(name))
            .flatten()
            .ok_or_else(|| {
                RequestError::NotFound(format!(
                    "service '{name}' not found on '{}'",
                    self.collection_name
                ))
            })?;
        debug!(model = %self.collection_name, service = name, "executing service");
        Ok(handler(body).await?)
    }

    /// Invokes instance method `name` on the instance `id` with `body`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NotFound`] when the method is not allowed, has
    /// no handler, or the instance does not exist.
    pub async fn execute_method(
        &self,
        id: &str,
        name: &str,
        body: Value,
    ) -> Result<Value, RequestError> {
        let not_found = || {
            RequestError::NotFound(format!(
                "method '{name}' not found on '{}' instance '{id}'",
                self.collection_name
            ))
        };
        let handler = self
            .schema()
            .methods
            .iter()
            .any(|m| m == name)
            .then(|| self.class.method_handler(name))
            .flatten()
            .ok_or_else(not_found)?;
        let instance = self
            .helper()
            .fetch_instance(self, id, &Parameters::default())
            .await?
            .ok_or_else(not_found)?;
        debug!(model = %self.collection_name, method = name, id, "executing method");
        Ok(handler(instance, body).await?)
    }

    /// Compiled schema as JSON, for logging and introspection.
    #[must_use]
    pub fn schema_json(&self) -> Value {
        serde_json::to_value(self.schema()).unwrap_or(Value::Null)
    }
}

async fn read_reference(
    actions: &dyn ModelActions,
    id: &Value,
    select: Option<&str>,
) -> Result<Value, FactoryError> {
    let id = match id {
        Value::String(id) => id.as_str(),
        Value::Object(obj) => match obj.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) => id,
            None => return Ok(id.clone()),
        },
        other => return Ok(other.clone()),
    };
    let Some(record) = actions.read(id, &Parameters::default()).await? else {
        return Ok(Value::Null);
    };
    Ok(match select {
        Some(select) => {
            let mut projected = Map::new();
            if let Some(id) = record.get(ID_FIELD) {
                projected.insert(ID_FIELD.to_string(), id.clone());
            }
            if let Some(value) = record.get(select) {
                projected.insert(select.to_string(), value.clone());
            }
            Value::Object(projected)
        }
        None => record,
    })
}

/// Reduces a populated reference value (single or plural) to bare id(s).
pub(crate) fn simplify_reference(value: &Value) -> Value {
    fn one(value: &Value) -> Value {
        value
            .as_object()
            .and_then(|obj| obj.get(ID_FIELD))
            .filter(|id| !id.is_null())
            .unwrap_or(value)
            .clone()
    }
    match value {
        Value::Array(items) => Value::Array(items.iter().map(one).collect()),
        single => one(single),
    }
}

impl fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFactory")
            .field("collection_name", &self.collection_name)
            .field("class", &self.class.name())
            .field("options", &self.options)
            .field("compiled", &self.is_compiled())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::compiler::SchemaCompiler;
    use crate::connector::ConnectorRegistry;
    use crate::decl::{ClassDecl, DecoratorCall, MethodDecl, PropertyDecl, SourceFile};
    use crate::loader::{ClassTable, DeclarationLoader};
    use crate::memory::MemoryConnector;
    use crate::params::Include;

    struct Fixture {
        registry: Arc<ModelRegistry>,
        connector: Arc<MemoryConnector>,
    }

    impl Fixture {
        fn factory(&self, name: &str) -> Arc<ModelFactory> {
            self.registry.get_factory(name).unwrap()
        }
    }

    fn compile(source: SourceFile, table: &ClassTable) -> Fixture {
        compile_into(Arc::new(ModelRegistry::with_builtin_validators()), source, table)
    }

    fn compile_into(registry: Arc<ModelRegistry>, source: SourceFile, table: &ClassTable) -> Fixture {
        let connector = Arc::new(MemoryConnector::new());
        let connectors = Arc::new(ConnectorRegistry::new());
        connectors.register(connector.clone());
        connector.connect_sync();

        let mut loader = DeclarationLoader::new();
        loader.add_source(source);
        let loaded = loader.load(table).unwrap();
        let factories = SchemaCompiler::new(Arc::clone(&registry), connectors)
            .compile(&loaded)
            .unwrap();
        for factory in &factories {
            factory.setup().unwrap();
        }
        Fixture {
            registry,
            connector,
        }
    }

    fn pets_source() -> SourceFile {
        SourceFile::new("models.json")
            .class(
                ClassDecl::model("User")
                    .property(PropertyDecl::new("title", "string").with("required"))
                    .property(PropertyDecl::new("pets", "Pet[]"))
                    .method(MethodDecl::statik("count"))
                    .method(MethodDecl::instance("greet"))
                    .method(MethodDecl::instance("missing")),
            )
            .class(
                ClassDecl::model("Pet")
                    .property(PropertyDecl::new("name", "string"))
                    .property(PropertyDecl::new("owner", "User")),
            )
    }

    fn pets_table() -> ClassTable {
        let mut table = ClassTable::new();
        table.export(
            ModelClass::builder("User")
                .static_fn("count", |_| async { Ok(json!(7)) })
                .method("greet", |inst, body| async move {
                    let title = inst.get("title").unwrap_or(Value::Null);
                    Ok(json!({ "hello": title, "from": body["from"] }))
                })
                .build(),
        );
        table.export(ModelClass::plain("Pet"));
        table
    }

    #[test]
    fn cyclic_references_resolve_both_ways() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let pet = fx.factory("Pet");
        assert_eq!(user.get_model_factory_by_path("pets").unwrap().collection_name(), "Pet");
        assert_eq!(pet.get_model_factory_by_path("owner").unwrap().collection_name(), "User");
        assert_eq!(user.get_reference_type("pets"), Some("Pet"));
        assert_eq!(pet.get_reference_type("name"), None);
    }

    #[test]
    fn unknown_path_is_reported_with_model_name() {
        let fx = compile(pets_source(), &pets_table());
        let err = fx
            .factory("Pet")
            .get_model_factory_by_path("name")
            .unwrap_err();
        assert_eq!(err.to_string(), "path 'name' not found in 'Pet' factory's prototype");
    }

    #[test]
    fn create_new_returns_existing_instance_unchanged() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let existing = user.create_new(json!({ "title": "a" }), None).unwrap();
        let same = user.create_new(existing.clone(), None).unwrap();
        assert!(same.ptr_eq(&existing));
    }

    #[test]
    fn create_new_from_id_matches_id_object() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let from_id = user.create_new("abc123", None).unwrap();
        let from_obj = user.create_new(json!({ "_id": "abc123" }), None).unwrap();
        assert_eq!(from_id.to_json(), from_obj.to_json());
        assert_eq!(from_id.id().as_deref(), Some("abc123"));
    }

    #[test]
    fn create_new_delegates_to_named_type() {
        let fx = compile(pets_source(), &pets_table());
        let pet = fx.factory("User").create_new("p1", Some("Pet")).unwrap();
        assert!(pet.is_instance_of("Pet"));
        assert!(matches!(
            fx.factory("User").create_new("p1", Some("Ghost")),
            Err(FactoryError::FactoryNotFound { .. })
        ));
    }

    #[test]
    fn validate_raises_on_error_diagnoses() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let inst = user.create_new(NewData::Empty, None).unwrap();
        let err = user.validate(&inst).unwrap_err();
        match err {
            FactoryError::Validation(v) => {
                assert_eq!(v.diagnoses.len(), 1);
                assert_eq!(v.diagnoses[0].field.as_deref(), Some("title"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        inst.set("title", json!("ok"));
        user.validate(&inst).unwrap();
        assert!(inst.diagnoses().is_empty());
    }

    #[tokio::test]
    async fn populate_then_simplify_round_trips() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let pets = fx.factory("Pet").require_actions().unwrap().clone();
        let rex = pets
            .create(json!({ "name": "rex" }), &Parameters::default())
            .await
            .unwrap();
        let rex_id = rex["_id"].clone();

        let original = json!({ "title": "bob", "pets": [rex_id.clone()] });
        let mut item = original.clone();
        let params = Parameters::default().with_includes(vec![Include::path("pets")]);
        user.populate_field(&params, &mut item, "pets").await.unwrap();
        assert_eq!(item["pets"][0]["name"], json!("rex"));
        assert_eq!(user.simplify_references(&item), original);
    }

    #[tokio::test]
    async fn populate_with_select_projects_record() {
        let fx = compile(pets_source(), &pets_table());
        let users = fx.factory("User").require_actions().unwrap().clone();
        let bob = users
            .create(json!({ "title": "bob" }), &Parameters::default())
            .await
            .unwrap();
        let pet = fx.factory("Pet");
        let mut item = json!({ "name": "rex", "owner": bob["_id"].clone() });
        let params =
            Parameters::default().with_includes(vec![Include::path("owner").select("title")]);
        pet.populate_field(&params, &mut item, "owner").await.unwrap();
        assert_eq!(item["owner"], json!({ "_id": bob["_id"].clone(), "title": "bob" }));
    }

    #[tokio::test]
    async fn populate_skips_keys_not_included() {
        let fx = compile(pets_source(), &pets_table());
        let mut item = json!({ "owner": "u1" });
        fx.factory("Pet")
            .populate_field(&Parameters::default(), &mut item, "owner")
            .await
            .unwrap();
        assert_eq!(item, json!({ "owner": "u1" }));
    }

    #[tokio::test]
    async fn execute_service_checks_allow_list_and_handler() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        assert_eq!(user.execute_service("count", Value::Null).await.unwrap(), json!(7));
        assert!(matches!(
            user.execute_service("doesNotExist", Value::Null).await,
            Err(RequestError::NotFound(_))
        ));
        // allowed on the instance side, not a static
        assert!(matches!(
            user.execute_service("greet", Value::Null).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn execute_method_requires_instance_and_handler() {
        let fx = compile(pets_source(), &pets_table());
        let user = fx.factory("User");
        let stored = user
            .require_actions()
            .unwrap()
            .create(json!({ "title": "bob" }), &Parameters::default())
            .await
            .unwrap();
        let id = stored["_id"].as_str().unwrap();

        let result = user
            .execute_method(id, "greet", json!({ "from": "alice" }))
            .await
            .unwrap();
        assert_eq!(result, json!({ "hello": "bob", "from": "alice" }));

        for (id, name) in [(id, "doesNotExist"), (id, "missing"), ("nope", "greet")] {
            assert!(matches!(
                user.execute_method(id, name, Value::Null).await,
                Err(RequestError::NotFound(_))
            ));
        }
    }

    /// Validator recording a fixed outcome under `tag`.
    struct Fixed {
        tag: &'static str,
        pass: bool,
    }

    impl Validator for Fixed {
        fn name(&self) -> &str {
            self.tag
        }

        fn validate(&self, instance: &ModelInstance, field: &FieldDescriptor) -> bool {
            if !self.pass {
                instance.add_diagnosis(crate::validation::Diagnosis::error(&field.name, "rejected"));
            }
            true
        }
    }

    #[test]
    fn class_validator_overrides_global_one() {
        let source = SourceFile::new("m.json").class(
            ClassDecl::model("User").property(PropertyDecl::new("title", "string").with("required")),
        );
        let mut table = ClassTable::new();
        table.export(
            ModelClass::builder("User")
                .validator("required", Arc::new(Fixed { tag: "required", pass: true }))
                .build(),
        );
        let fx = compile(source, &table);
        let user = fx.factory("User");
        assert!(user.validate(&user.create_new(json!({}), None).unwrap()).is_ok());

        let fx = compile(
            SourceFile::new("m.json").class(
                ClassDecl::model("User")
                    .property(PropertyDecl::new("title", "string").with("required")),
            ),
            &{
                let mut table = ClassTable::new();
                table.export(ModelClass::plain("User"));
                table
            },
        );
        let user = fx.factory("User");
        assert!(user.validate(&user.create_new(json!({}), None).unwrap()).is_err());
    }

    #[tokio::test]
    async fn connector_validator_overrides_global_one() {
        let registry = Arc::new(ModelRegistry::with_builtin_validators());
        registry.register_validator(Arc::new(Fixed { tag: "unique", pass: false }));
        let source = SourceFile::new("m.json").class(
            ClassDecl::model("Tag").property(PropertyDecl::new("label", "string").with("unique")),
        );
        let mut table = ClassTable::new();
        table.export(ModelClass::plain("Tag"));
        let fx = compile_into(registry, source, &table);
        let tag = fx.factory("Tag");

        let first = tag.create_new(json!({ "label": "a" }), None).unwrap();
        assert!(tag.validate(&first).is_ok());
        tag.helper()
            .save_instance(&tag, &first, &Parameters::default())
            .await
            .unwrap();

        let second = tag.create_new(json!({ "label": "a" }), None).unwrap();
        let err = tag.validate(&second).unwrap_err();
        assert!(err.to_string().contains("must be unique"));
    }

    #[tokio::test]
    async fn linked_factory_shares_schema_and_storage() {
        let source = pets_source().class(
            ClassDecl::new("Member")
                .decorate(DecoratorCall::with_args(
                    "model",
                    vec![json!({ "linkedFactory": "User" })],
                ))
                .property(PropertyDecl::new("ignored", "number")),
        );
        let mut table = pets_table();
        table.export(ModelClass::plain("Member"));
        let fx = compile(source, &table);
        let user = fx.factory("User");
        let member = fx.factory("Member");
        assert!(member.is_linked());
        assert_eq!(member.linked_collection(), Some("User"));
        assert_eq!(member.schema(), user.schema());
        assert!(member.schema().prototype.get("ignored").is_none());

        let saved = user.create_new(json!({ "title": "bob" }), None).unwrap();
        user.helper()
            .save_instance(&user, &saved, &Parameters::default())
            .await
            .unwrap();
        let id = saved.id().unwrap();
        let seen = member
            .helper()
            .fetch_instance(&member, &id, &Parameters::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.get("title"), Some(json!("bob")));
    }

    #[test]
    fn linked_factory_with_unknown_target_fails() {
        let source = SourceFile::new("m.json").class(ClassDecl::new("Alias").decorate(
            DecoratorCall::with_args("model", vec![json!({ "linkedFactory": "Nobody" })]),
        ));
        let mut table = ClassTable::new();
        table.export(ModelClass::plain("Alias"));

        let registry = Arc::new(ModelRegistry::new());
        let connectors = Arc::new(ConnectorRegistry::new());
        connectors.register(Arc::new(MemoryConnector::new()));
        let mut loader = DeclarationLoader::new();
        loader.add_source(source);
        let result = SchemaCompiler::new(registry, connectors).compile(&loader.load(&table).unwrap());
        assert!(matches!(
            result,
            Err(ConfigError::UnknownLinkedFactory { ref target, .. }) if target == "Nobody"
        ));
    }

    #[test]
    fn non_persistent_factory_gets_no_binding() {
        let source = SourceFile::new("m.json").class(ClassDecl::new("Tools").decorate(
            DecoratorCall::with_args("model", vec![json!({ "persistent": false })]),
        ));
        let mut table = ClassTable::new();
        table.export(ModelClass::plain("Tools"));
        let fx = compile(source, &table);
        let tools = fx.factory("Tools");
        assert!(tools.is_initialized());
        assert!(tools.actions().is_none());
        assert!(tools.controller().is_none());
        // the default helper still builds instances
        let inst = tools.create_new("t1", None).unwrap();
        assert_eq!(inst.id().as_deref(), Some("t1"));
        assert_eq!(fx.connector.database("memory").unwrap().collection_len("Tools"), 0);
    }

    #[test]
    fn init_twice_is_rejected() {
        let fx = compile(pets_source(), &pets_table());
        assert!(matches!(
            fx.factory("Pet").init(None),
            Err(ConfigError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn route_name_is_lower_camel_case() {
        let registry = Arc::new(ModelRegistry::new());
        let f = ModelFactory::new(
            "UserProfile",
            ModelClass::plain("UserProfile"),
            FactoryOptions::service(),
            None,
            &registry,
        );
        assert_eq!(f.route_name(), "userProfile");
    }

    proptest! {
        #[test]
        fn simplify_is_idempotent_on_bare_ids(ids in proptest::collection::vec("[a-z0-9]{1,12}", 0..6)) {
            let fx = compile(pets_source(), &pets_table());
            let user = fx.factory("User");
            let item = json!({ "title": "x", "pets": ids });
            prop_assert_eq!(user.simplify_references(&item), item.clone());

            let populated: Vec<Value> = ids.iter().map(|id| json!({ "_id": id, "name": id })).collect();
            let expanded = json!({ "title": "x", "pets": populated });
            prop_assert_eq!(user.simplify_references(&expanded), item);
        }
    }
}
