//! Transport-neutral CRUD controllers.
//!
//! The HTTP layer decodes path, query and body into a [`ControllerRequest`]
//! and maps the returned [`Outcome`] or [`RequestError`] onto a response.
//! Requests carrying a reference path (`/:id/:ref`) act on that single
//! reference property of the instance.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::factory::{simplify_reference, ModelFactory, NewData};
use crate::instance::ModelInstance;
use crate::params::{parse_filter, Include, Parameters};

/// Decoded request handed to a controller.
#[derive(Debug, Clone, Default)]
pub struct ControllerRequest {
    pub id: Option<String>,
    /// Reference property addressed by `/:id/:ref`.
    pub reference: Option<String>,
    pub query: BTreeMap<String, String>,
    pub body: Value,
}

impl ControllerRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    fn require_id(&self) -> Result<&str, RequestError> {
        self.id
            .as_deref()
            .ok_or_else(|| RequestError::BadRequest("missing instance id".to_string()))
    }

    fn parameters(&self) -> Result<Parameters, RequestError> {
        let mut params = Parameters::from_query(&self.query)?;
        params.reference.clone_from(&self.reference);
        Ok(params)
    }
}

/// Successful controller result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Created(Value),
    Deleted,
}

impl Outcome {
    /// The response body, `Null` for deletions.
    #[must_use]
    pub fn into_body(self) -> Value {
        match self {
            Self::Ok(v) | Self::Created(v) => v,
            Self::Deleted => Value::Null,
        }
    }
}

#[async_trait]
pub trait ModelController: Send + Sync {
    async fn query(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;

    async fn read(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;

    async fn create(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;

    /// Full replacement (`PUT`): properties missing from the body are removed.
    async fn update(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;

    /// Partial update (`PATCH`): properties missing from the body are kept.
    async fn patch(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;

    async fn delete(&self, factory: &ModelFactory, req: ControllerRequest)
        -> Result<Outcome, RequestError>;
}

/// Controller driving the factory's helper.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelController;

impl DefaultModelController {
    async fn load(
        factory: &ModelFactory,
        id: &str,
        params: &Parameters,
    ) -> Result<ModelInstance, RequestError> {
        factory
            .helper()
            .fetch_instance(factory, id, params)
            .await?
            .ok_or_else(|| {
                RequestError::NotFound(format!(
                    "instance '{id}' not found in '{}'",
                    factory.collection_name()
                ))
            })
    }

    async fn read_reference(
        factory: &ModelFactory,
        instance: &ModelInstance,
        reference: &str,
    ) -> Result<Value, RequestError> {
        // resolves the target and rejects non-reference paths
        factory.get_model_factory_by_path(reference)?;
        let params = Parameters::default().with_includes(vec![Include::path(reference)]);
        let mut fields = Map::new();
        fields.insert(
            reference.to_string(),
            instance.get(reference).unwrap_or(Value::Null),
        );
        let mut item = Value::Object(fields);
        factory.populate_field(&params, &mut item, reference).await?;
        Ok(item[reference].take())
    }

    async fn write_reference(
        factory: &ModelFactory,
        req: ControllerRequest,
        reference: &str,
        append: bool,
    ) -> Result<Outcome, RequestError> {
        factory.get_model_factory_by_path(reference)?;
        let params = req.parameters()?;
        let instance = Self::load(factory, req.require_id()?, &params).await?;
        let incoming = simplify_reference(&req.body);
        let plural = factory.field(reference).is_some_and(|f| f.is_plural);

        let value = match (plural, append, incoming) {
            (true, true, incoming) => {
                let mut ids = match instance.get(reference) {
                    Some(Value::Array(ids)) => ids,
                    _ => Vec::new(),
                };
                let additions = match incoming {
                    Value::Array(items) => items,
                    single => vec![single],
                };
                for id in additions {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Value::Array(ids)
            }
            (true, false, Value::Array(items)) => Value::Array(items),
            (true, false, Value::Null) => Value::Array(Vec::new()),
            (true, false, single) => Value::Array(vec![single]),
            (false, _, Value::Array(_)) => {
                return Err(RequestError::BadRequest(format!(
                    "reference '{reference}' holds a single value"
                )))
            }
            (false, _, single) => single,
        };
        instance.set(reference, value);
        factory
            .helper()
            .save_instance(factory, &instance, &params)
            .await?;
        Ok(Outcome::Ok(
            Self::read_reference(factory, &instance, reference).await?,
        ))
    }

    async fn write(
        factory: &ModelFactory,
        req: ControllerRequest,
        delete_missing: bool,
    ) -> Result<Outcome, RequestError> {
        if let Some(reference) = req.reference.clone() {
            return Self::write_reference(factory, req, &reference, !delete_missing).await;
        }
        require_object(&req.body)?;
        let params = req.parameters()?;
        let instance = Self::load(factory, req.require_id()?, &params).await?;
        let update_params = Parameters {
            delete_missing,
            ..params.clone()
        };
        let helper = factory.helper();
        helper.update_values(factory, &instance, &req.body, &update_params);
        helper.save_instance(factory, &instance, &params).await?;
        Ok(Outcome::Ok(
            helper.serialize(factory, &instance, &params).await?,
        ))
    }
}

fn require_object(body: &Value) -> Result<(), RequestError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(RequestError::BadRequest(
            "request body must be a JSON object".to_string(),
        ))
    }
}

#[async_trait]
impl ModelController for DefaultModelController {
    async fn query(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        let filter = parse_filter(&req.query)?;
        let params = req.parameters()?;
        let helper = factory.helper();
        let instances = helper.fetch_instances(factory, &filter, &params).await?;
        let mut items = Vec::with_capacity(instances.len());
        for instance in &instances {
            items.push(helper.serialize(factory, instance, &params).await?);
        }
        Ok(Outcome::Ok(Value::Array(items)))
    }

    async fn read(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        let params = req.parameters()?;
        let instance = Self::load(factory, req.require_id()?, &params).await?;
        if let Some(reference) = &req.reference {
            return Ok(Outcome::Ok(
                Self::read_reference(factory, &instance, reference).await?,
            ));
        }
        Ok(Outcome::Ok(
            factory.helper().serialize(factory, &instance, &params).await?,
        ))
    }

    async fn create(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        require_object(&req.body)?;
        let params = req.parameters()?;
        let instance = factory.create_new(NewData::Values(req.body), None)?;
        let helper = factory.helper();
        helper.save_instance(factory, &instance, &params).await?;
        Ok(Outcome::Created(
            helper.serialize(factory, &instance, &params).await?,
        ))
    }

    async fn update(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        Self::write(factory, req, true).await
    }

    async fn patch(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        Self::write(factory, req, false).await
    }

    async fn delete(
        &self,
        factory: &ModelFactory,
        req: ControllerRequest,
    ) -> Result<Outcome, RequestError> {
        let params = req.parameters()?;
        let instance = Self::load(factory, req.require_id()?, &params).await?;
        if factory.helper().delete_instance(factory, &instance).await? {
            Ok(Outcome::Deleted)
        } else {
            Err(RequestError::NotFound(format!(
                "instance '{}' not found in '{}'",
                instance.id().unwrap_or_default(),
                factory.collection_name()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::class::ModelClass;
    use crate::compiler::SchemaCompiler;
    use crate::connector::ConnectorRegistry;
    use crate::decl::{ClassDecl, PropertyDecl, SourceFile};
    use crate::loader::{ClassTable, DeclarationLoader};
    use crate::memory::MemoryConnector;
    use crate::registry::ModelRegistry;

    struct Models {
        _registry: Arc<ModelRegistry>,
        user: Arc<ModelFactory>,
        pet: Arc<ModelFactory>,
    }

    fn models() -> Models {
        let source = SourceFile::new("models.json")
            .class(
                ClassDecl::model("User")
                    .property(PropertyDecl::new("title", "string").with("required"))
                    .property(PropertyDecl::new("score", "number").with("readonly"))
                    .property(PropertyDecl::new("pets", "Pet[]")),
            )
            .class(
                ClassDecl::model("Pet")
                    .property(PropertyDecl::new("name", "string"))
                    .property(PropertyDecl::new("owner", "User")),
            );
        let mut table = ClassTable::new();
        table.export(ModelClass::plain("User"));
        table.export(ModelClass::plain("Pet"));

        let registry = Arc::new(ModelRegistry::with_builtin_validators());
        let connectors = Arc::new(ConnectorRegistry::new());
        let memory = Arc::new(MemoryConnector::new());
        memory.connect_sync();
        connectors.register(memory);
        let mut loader = DeclarationLoader::new();
        loader.add_source(source);
        let factories = SchemaCompiler::new(Arc::clone(&registry), connectors)
            .compile(&loader.load(&table).unwrap())
            .unwrap();
        for factory in &factories {
            factory.setup().unwrap();
        }
        Models {
            user: registry.get_factory("User").unwrap(),
            pet: registry.get_factory("Pet").unwrap(),
            _registry: registry,
        }
    }

    async fn create(factory: &ModelFactory, body: Value) -> Value {
        let outcome = DefaultModelController
            .create(factory, ControllerRequest::new().body(body))
            .await
            .unwrap();
        match outcome {
            Outcome::Created(v) => v,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn crud_cycle() {
        let m = models();
        let ctl = DefaultModelController;
        let created = create(&m.user, json!({ "title": "bob", "_createdAt": "1970" })).await;
        let id = created["_id"].as_str().unwrap().to_string();
        assert_ne!(created["_createdAt"], json!("1970"));

        let read = ctl
            .read(&m.user, ControllerRequest::new().id(&id))
            .await
            .unwrap()
            .into_body();
        assert_eq!(read["title"], json!("bob"));

        let patched = ctl
            .patch(&m.user, ControllerRequest::new().id(&id).body(json!({ "pets": [] })))
            .await
            .unwrap()
            .into_body();
        assert_eq!(patched["title"], json!("bob"));

        let replaced = ctl
            .update(&m.user, ControllerRequest::new().id(&id).body(json!({ "title": "rob" })))
            .await
            .unwrap()
            .into_body();
        assert_eq!(replaced["title"], json!("rob"));
        assert!(replaced.get("pets").is_none());

        let listed = ctl
            .query(&m.user, ControllerRequest::new().query("where", r#"{"title":"rob"}"#))
            .await
            .unwrap()
            .into_body();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        assert_eq!(
            ctl.delete(&m.user, ControllerRequest::new().id(&id)).await.unwrap(),
            Outcome::Deleted
        );
        assert!(matches!(
            ctl.read(&m.user, ControllerRequest::new().id(&id)).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_invalid_payloads() {
        let m = models();
        let ctl = DefaultModelController;
        assert!(matches!(
            ctl.create(&m.user, ControllerRequest::new().body(json!({}))).await,
            Err(RequestError::Validation(_))
        ));
        assert!(matches!(
            ctl.create(&m.user, ControllerRequest::new().body(json!([1]))).await,
            Err(RequestError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn reference_paths_read_replace_and_append() {
        let m = models();
        let ctl = DefaultModelController;
        let user = create(&m.user, json!({ "title": "bob" })).await;
        let uid = user["_id"].as_str().unwrap().to_string();
        let rex = create(&m.pet, json!({ "name": "rex" })).await;
        let tom = create(&m.pet, json!({ "name": "tom" })).await;

        let pets = ctl
            .update(
                &m.user,
                ControllerRequest::new().id(&uid).reference("pets").body(json!([rex.clone()])),
            )
            .await
            .unwrap()
            .into_body();
        assert_eq!(pets.as_array().unwrap().len(), 1);
        assert_eq!(pets[0]["name"], json!("rex"));

        let pets = ctl
            .patch(
                &m.user,
                ControllerRequest::new()
                    .id(&uid)
                    .reference("pets")
                    .body(json!([rex["_id"].clone(), tom["_id"].clone()])),
            )
            .await
            .unwrap()
            .into_body();
        let names: Vec<_> = pets.as_array().unwrap().iter().map(|p| p["name"].clone()).collect();
        assert_eq!(names, vec![json!("rex"), json!("tom")]);

        let read = ctl
            .read(&m.user, ControllerRequest::new().id(&uid).reference("pets"))
            .await
            .unwrap()
            .into_body();
        assert_eq!(read, pets);

        assert!(matches!(
            ctl.read(&m.user, ControllerRequest::new().id(&uid).reference("title")).await,
            Err(RequestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn includes_populate_on_read() {
        let m = models();
        let ctl = DefaultModelController;
        let user = create(&m.user, json!({ "title": "bob" })).await;
        let pet = create(&m.pet, json!({ "name": "rex", "owner": user["_id"].clone() })).await;
        let pid = pet["_id"].as_str().unwrap().to_string();

        let read = ctl
            .read(&m.pet, ControllerRequest::new().id(&pid).query("includes", "owner.title"))
            .await
            .unwrap()
            .into_body();
        assert_eq!(read["owner"], json!({ "_id": user["_id"].clone(), "title": "bob" }));
    }

    #[tokio::test]
    async fn read_only_fields_ignore_query_override() {
        let m = models();
        let ctl = DefaultModelController;
        let user = create(&m.user, json!({ "title": "bob", "score": 10 })).await;
        assert!(user.get("score").is_none());
        let uid = user["_id"].as_str().unwrap().to_string();

        let patched = ctl
            .patch(
                &m.user,
                ControllerRequest::new()
                    .id(&uid)
                    .query("ignoreReadOnly", "true")
                    .body(json!({ "score": 1_000_000 })),
            )
            .await
            .unwrap()
            .into_body();
        assert!(patched.get("score").is_none());
        assert_eq!(patched["title"], json!("bob"));
    }

    #[tokio::test]
    async fn singular_reference_rejects_array_body() {
        let m = models();
        let ctl = DefaultModelController;
        let user = create(&m.user, json!({ "title": "bob" })).await;
        let pet = create(&m.pet, json!({ "name": "rex" })).await;
        let pid = pet["_id"].as_str().unwrap().to_string();

        assert!(matches!(
            ctl.update(
                &m.pet,
                ControllerRequest::new()
                    .id(&pid)
                    .reference("owner")
                    .body(json!([user["_id"].clone()])),
            )
            .await,
            Err(RequestError::BadRequest(_))
        ));

        let owner = ctl
            .update(
                &m.pet,
                ControllerRequest::new().id(&pid).reference("owner").body(user["_id"].clone()),
            )
            .await
            .unwrap()
            .into_body();
        assert_eq!(owner["title"], json!("bob"));
    }
}
