//! Instance-level persistence helpers.
//!
//! A [`ModelHelper`] turns datastore records into [`ModelInstance`]s and
//! back. The factory is passed to every call rather than stored, so one
//! helper value can serve any number of models.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::FactoryError;
use crate::factory::{simplify_reference, ModelFactory, AFTER_SAVE, BEFORE_SAVE};
use crate::instance::ModelInstance;
use crate::params::Parameters;
use crate::schema::{CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};

#[async_trait]
pub trait ModelHelper: Send + Sync {
    /// Instances matching the equality `filter`.
    async fn fetch_instances(
        &self,
        factory: &ModelFactory,
        filter: &Map<String, Value>,
        params: &Parameters,
    ) -> Result<Vec<ModelInstance>, FactoryError>;

    /// The instance with `_id == id`, if any.
    async fn fetch_instance(
        &self,
        factory: &ModelFactory,
        id: &str,
        params: &Parameters,
    ) -> Result<Option<ModelInstance>, FactoryError>;

    /// Runs `beforeSave`, validates, creates or updates the record, reloads
    /// the instance from the stored record, then runs `afterSave`.
    async fn save_instance(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        params: &Parameters,
    ) -> Result<(), FactoryError>;

    /// Deletes the record backing `instance`. Returns `false` if there was none.
    async fn delete_instance(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
    ) -> Result<bool, FactoryError>;

    /// JSON view of `instance`: visible fields only, with included
    /// references populated.
    async fn serialize(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        params: &Parameters,
    ) -> Result<Value, FactoryError>;

    /// Applies `data` to `instance` field by field.
    fn update_values(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        data: &Value,
        params: &Parameters,
    );
}

/// Helper backed by the factory's [`ModelActions`](crate::ModelActions).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModelHelper;

#[async_trait]
impl ModelHelper for DefaultModelHelper {
    async fn fetch_instances(
        &self,
        factory: &ModelFactory,
        filter: &Map<String, Value>,
        params: &Parameters,
    ) -> Result<Vec<ModelInstance>, FactoryError> {
        let records = factory.require_actions()?.query(filter, params).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match record {
                Value::Object(values) => {
                    Some(ModelInstance::with_values(factory.collection_name(), values))
                }
                _ => None,
            })
            .collect())
    }

    async fn fetch_instance(
        &self,
        factory: &ModelFactory,
        id: &str,
        params: &Parameters,
    ) -> Result<Option<ModelInstance>, FactoryError> {
        let record = factory.require_actions()?.read(id, params).await?;
        Ok(match record {
            Some(Value::Object(values)) => {
                Some(ModelInstance::with_values(factory.collection_name(), values))
            }
            _ => None,
        })
    }

    async fn save_instance(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        params: &Parameters,
    ) -> Result<(), FactoryError> {
        factory.run_hook(BEFORE_SAVE, instance)?;
        factory.validate(instance)?;

        let actions = factory.require_actions()?;
        let item = factory.simplify_references(&instance.to_json());
        let stored = match instance.id() {
            Some(id) => {
                let replace = Parameters {
                    delete_missing: true,
                    ..params.clone()
                };
                match actions.update(&id, item.clone(), &replace).await? {
                    Some(stored) => stored,
                    None => actions.create(item, params).await?,
                }
            }
            None => actions.create(item, params).await?,
        };
        if let Value::Object(values) = stored {
            instance.replace_values(values);
        }

        factory.run_hook(AFTER_SAVE, instance)
    }

    async fn delete_instance(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
    ) -> Result<bool, FactoryError> {
        let Some(id) = instance.id() else {
            return Ok(false);
        };
        Ok(factory.require_actions()?.delete(&id).await?)
    }

    async fn serialize(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        params: &Parameters,
    ) -> Result<Value, FactoryError> {
        let values = instance.values();
        let visible: Map<String, Value> = factory
            .fields()
            .iter()
            .filter(|field| field.is_visible(instance))
            .filter_map(|field| {
                values
                    .get(&field.name)
                    .map(|value| (field.name.clone(), value.clone()))
            })
            .collect();
        let mut item = Value::Object(visible);
        for field in factory.fields().iter().filter(|f| f.is_reference) {
            factory.populate_field(params, &mut item, &field.name).await?;
        }
        Ok(item)
    }

    fn update_values(
        &self,
        factory: &ModelFactory,
        instance: &ModelInstance,
        data: &Value,
        params: &Parameters,
    ) {
        let Some(data) = data.as_object() else {
            return;
        };
        let has_id = instance.id().is_some();
        for field in factory.fields() {
            let name = field.name.as_str();
            let incoming = data.get(name);
            match name {
                // identity is only ever assigned once
                ID_FIELD => {
                    if let Some(id) = incoming.filter(|v| !v.is_null()) {
                        if !has_id {
                            instance.set(ID_FIELD, id.clone());
                        }
                    }
                    continue;
                }
                CREATED_AT_FIELD | UPDATED_AT_FIELD => {
                    if let Some(value) = incoming {
                        instance.set(name, value.clone());
                    }
                    continue;
                }
                _ => {}
            }
            if field.is_read_only && !params.ignore_read_only {
                continue;
            }
            if has_id && (field.is_insert_only || field.is_immutable) {
                continue;
            }
            match incoming {
                Some(value) if field.is_reference => instance.set(name, simplify_reference(value)),
                Some(value) => instance.set(name, value.clone()),
                None if params.delete_missing => {
                    instance.remove(name);
                }
                None => {}
            }
        }
    }
}
