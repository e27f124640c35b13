//! Runtime model classes.
//!
//! A [`ModelClass`] is the live counterpart of a class declaration. It owns
//! the behaviour a declaration can only name: static and instance method
//! handlers, hook callbacks, custom route handlers, visibility predicates and
//! explicitly registered validators. Every invocable name maps to a typed
//! handler built at registration time; nothing is dispatched by reflection.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::instance::ModelInstance;
use crate::validation::Validator;

/// Boxed future returned by async handlers.
pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Static method handler: receives the request body.
pub type StaticFn = Arc<dyn Fn(Value) -> BoxedFuture<anyhow::Result<Value>> + Send + Sync>;

/// Instance method handler: receives the target instance and the request body.
pub type MethodFn =
    Arc<dyn Fn(ModelInstance, Value) -> BoxedFuture<anyhow::Result<Value>> + Send + Sync>;

/// Lifecycle hook callback.
pub type HookFn = Arc<dyn Fn(&ModelInstance) -> anyhow::Result<()> + Send + Sync>;

/// Custom route handler.
pub type RouteFn = Arc<dyn Fn(RouteRequest) -> BoxedFuture<anyhow::Result<Value>> + Send + Sync>;

/// Visibility predicate: returns `true` when the field must be hidden.
pub type PredicateFn = Arc<dyn Fn(&ModelInstance) -> bool + Send + Sync>;

/// Request data handed to custom route handlers.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Path parameters captured by the route template.
    pub params: BTreeMap<String, String>,
    /// Decoded query string.
    pub query: BTreeMap<String, String>,
    /// JSON body, `Null` when absent.
    pub body: Value,
}

/// Runtime class resolved for a model declaration.
pub struct ModelClass {
    name: String,
    statics: HashMap<String, StaticFn>,
    methods: HashMap<String, MethodFn>,
    hooks: HashMap<String, HookFn>,
    routes: HashMap<String, RouteFn>,
    predicates: HashMap<String, PredicateFn>,
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ModelClass {
    /// Starts building a class with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelClassBuilder {
        ModelClassBuilder {
            class: Self {
                name: name.into(),
                statics: HashMap::new(),
                methods: HashMap::new(),
                hooks: HashMap::new(),
                routes: HashMap::new(),
                predicates: HashMap::new(),
                validators: HashMap::new(),
            },
        }
    }

    /// A data-only class without any behaviour.
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Arc<Self> {
        Self::builder(name).build()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn static_handler(&self, name: &str) -> Option<&StaticFn> {
        self.statics.get(name)
    }

    #[must_use]
    pub fn method_handler(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    /// Hook callback implemented by the method `method`.
    #[must_use]
    pub fn hook_handler(&self, method: &str) -> Option<&HookFn> {
        self.hooks.get(method)
    }

    /// Route handler implemented by the method `method`.
    #[must_use]
    pub fn route_handler(&self, method: &str) -> Option<&RouteFn> {
        self.routes.get(method)
    }

    #[must_use]
    pub fn predicate(&self, name: &str) -> Option<&PredicateFn> {
        self.predicates.get(name)
    }

    /// Validator registered on the class for the metadata tag `tag`.
    #[must_use]
    pub fn validator(&self, tag: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(tag)
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut statics: Vec<_> = self.statics.keys().collect();
        statics.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field("statics", &statics)
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ModelClass`].
pub struct ModelClassBuilder {
    class: ModelClass,
}

impl ModelClassBuilder {
    /// Registers a static method handler.
    #[must_use]
    pub fn static_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: StaticFn = Arc::new(move |body| Box::pin(f(body)));
        self.class.statics.insert(name.into(), handler);
        self
    }

    /// Registers an instance method handler.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ModelInstance, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: MethodFn = Arc::new(move |instance, body| Box::pin(f(instance, body)));
        self.class.methods.insert(name.into(), handler);
        self
    }

    /// Registers the callback for a method decorated with `@hook`.
    #[must_use]
    pub fn hook<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ModelInstance) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.class.hooks.insert(method.into(), Arc::new(f));
        self
    }

    /// Registers the handler for a method decorated with `@route`.
    #[must_use]
    pub fn route<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: RouteFn = Arc::new(move |req| Box::pin(f(req)));
        self.class.routes.insert(method.into(), handler);
        self
    }

    /// Registers a visibility predicate referenced by `@invisible("name")`.
    #[must_use]
    pub fn predicate<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ModelInstance) -> bool + Send + Sync + 'static,
    {
        self.class.predicates.insert(name.into(), Arc::new(f));
        self
    }

    /// Registers a validator for the metadata tag `tag` on this class only.
    #[must_use]
    pub fn validator(mut self, tag: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.class.validators.insert(tag.into(), validator);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<ModelClass> {
        Arc::new(self.class)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn handlers_are_invocable_by_name() {
        let class = ModelClass::builder("Counter")
            .static_fn("double", |body| async move {
                let n = body["n"].as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            })
            .method("label", |inst, _body| async move {
                Ok(json!(format!("{}:{}", inst.model(), inst.id().unwrap_or_default())))
            })
            .build();

        let double = class.static_handler("double").unwrap();
        assert_eq!(double(json!({ "n": 21 })).await.unwrap(), json!(42));

        let inst = ModelInstance::new("Counter");
        inst.set("_id", json!("c1"));
        let label = class.method_handler("label").unwrap();
        assert_eq!(label(inst, Value::Null).await.unwrap(), json!("Counter:c1"));

        assert!(class.static_handler("label").is_none());
        assert!(class.method_handler("double").is_none());
    }

    #[test]
    fn predicates_and_hooks_are_keyed_by_name() {
        let class = ModelClass::builder("Doc")
            .predicate("isDraft", |inst| inst.get("draft") == Some(json!(true)))
            .hook("stamp", |inst| {
                inst.set("stamped", json!(true));
                Ok(())
            })
            .build();

        let inst = ModelInstance::new("Doc");
        inst.set("draft", json!(true));
        assert!(class.predicate("isDraft").unwrap()(&inst));

        class.hook_handler("stamp").unwrap()(&inst).unwrap();
        assert_eq!(inst.get("stamped"), Some(json!(true)));
    }

    #[test]
    fn plain_class_has_no_behaviour() {
        let class = ModelClass::plain("Tag");
        assert_eq!(class.name(), "Tag");
        assert!(class.static_handler("anything").is_none());
        assert!(class.validator("required").is_none());
    }
}
