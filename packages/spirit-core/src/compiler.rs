//! Two-pass schema compiler.
//!
//! Pass 1 creates and registers a bare [`ModelFactory`] for every loaded
//! model, so any model can be referenced by any other, cycles included.
//! Pass 2 walks each declaration (superclasses first) and builds its
//! [`ModelSchema`]; reference types are resolved against the factories
//! registered in pass 1 and an unknown type fails the whole compile.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::class::ModelClass;
use crate::connector::ConnectorRegistry;
use crate::decl::{ClassDecl, Initializer, MemberDecl, MethodDecl, PropertyDecl, Visibility};
use crate::decorators::{class_metadata, method_role, property_metadata, MethodRole};
use crate::error::ConfigError;
use crate::factory::{FactoryOptions, ModelFactory};
use crate::loader::LoadedSources;
use crate::memory::DEFAULT_DATASOURCE;
use crate::registry::ModelRegistry;
use crate::schema::{
    implicit_fields, is_native_type, split_plural, FieldSpec, ModelSchema, ReferenceInfo,
    RouteDecl, SchemaEntry,
};

/// Compiles loaded declarations into registered factories.
pub struct SchemaCompiler {
    registry: Arc<ModelRegistry>,
    connectors: Arc<ConnectorRegistry>,
    default_datasource: String,
}

/// Per-compile lookup state shared by the inspection functions.
struct CompileContext<'a> {
    sources: &'a LoadedSources,
    /// Class name -> collection name of every model registered in pass 1.
    collections: HashMap<String, String>,
}

impl SchemaCompiler {
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, connectors: Arc<ConnectorRegistry>) -> Self {
        Self {
            registry,
            connectors,
            default_datasource: DEFAULT_DATASOURCE.to_string(),
        }
    }

    /// Datasource used by models that do not name one.
    #[must_use]
    pub fn default_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.default_datasource = datasource.into();
        self
    }

    /// Runs both passes and returns the new factories in load order.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; the registry may hold the factories registered
    /// before the failure.
    pub fn compile(&self, sources: &LoadedSources) -> Result<Vec<Arc<ModelFactory>>, ConfigError> {
        let mut ctx = CompileContext {
            sources,
            collections: HashMap::new(),
        };

        // pass 1: register bare factories
        let mut pending = Vec::with_capacity(sources.models.len());
        for model in &sources.models {
            let Some(meta) = class_metadata(&model.decl)? else {
                continue;
            };
            let datasource = meta
                .datasource
                .clone()
                .unwrap_or_else(|| self.default_datasource.clone());
            let connector = self.connectors.get(&datasource);
            if meta.persistent && connector.is_none() {
                return Err(ConfigError::MissingConnector {
                    model: meta.collection_name,
                    datasource,
                });
            }
            let options = FactoryOptions {
                persistent: meta.persistent,
                datasource: Some(datasource),
                linked_factory: meta.linked_factory,
            };
            let factory = Arc::new(
                ModelFactory::new(
                    meta.collection_name.as_str(),
                    Arc::clone(&model.class),
                    options,
                    connector,
                    &self.registry,
                )
                .documented(model.decl.documentation.as_str()),
            );
            self.registry.register(Arc::clone(&factory))?;
            debug!(class = %model.decl.name, model = %meta.collection_name, "factory loaded");
            ctx.collections
                .insert(model.decl.name.clone(), meta.collection_name);
            pending.push((factory, &model.decl));
        }

        // pass 2: inspect and install schemas, aliases last
        for (factory, decl) in pending.iter().filter(|(f, _)| !f.is_linked()) {
            debug!(class = %decl.name, "inspecting class");
            let mut schema = ModelSchema::empty();
            for (name, entry) in implicit_fields() {
                schema.properties.push(name.clone());
                schema.prototype.insert(name, entry);
            }
            let mut visiting = HashSet::new();
            self.inspect_class(&ctx, decl, factory.class(), &mut schema, &mut visiting)?;
            factory.install_schema(schema)?;
        }
        for (factory, _) in pending.iter().filter(|(f, _)| f.is_linked()) {
            self.link_factory(&ctx, factory)?;
        }

        info!(models = pending.len(), "schemas compiled");
        Ok(pending.into_iter().map(|(factory, _)| factory).collect())
    }

    /// Points an alias at its target and shares the target's schema.
    fn link_factory(
        &self,
        ctx: &CompileContext<'_>,
        factory: &ModelFactory,
    ) -> Result<(), ConfigError> {
        let name = factory.options().linked_factory.as_deref().unwrap_or_default();
        let unknown = || ConfigError::UnknownLinkedFactory {
            model: factory.collection_name().to_string(),
            target: name.to_string(),
        };
        let collection = ctx.collections.get(name).map_or(name, String::as_str);
        let target = self.registry.get_factory(collection).ok_or_else(unknown)?;
        if target.is_linked() || !target.is_compiled() {
            return Err(unknown());
        }
        debug!(model = %factory.collection_name(), target = %collection, "linked factory");
        factory.link(target.collection_name())?;
        factory.install_schema(target.schema().clone())
    }

    fn inspect_class(
        &self,
        ctx: &CompileContext<'_>,
        decl: &ClassDecl,
        class: &ModelClass,
        schema: &mut ModelSchema,
        visiting: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        if !visiting.insert(decl.name.clone()) {
            return Err(ConfigError::InheritanceCycle {
                class: decl.name.clone(),
            });
        }

        if let Some(parent) = &decl.extends {
            match ctx.sources.classes.get(parent) {
                Some(parent_decl) if class_metadata(parent_decl)?.is_some() => {
                    debug!(class = %decl.name, superclass = %parent, "inspecting superclass");
                    self.inspect_class(ctx, parent_decl, class, schema, visiting)?;
                }
                _ => debug!(class = %decl.name, superclass = %parent, "superclass is not a model"),
            }
        }

        for member in &decl.members {
            match member {
                MemberDecl::Property(prop) => self.inspect_property(ctx, decl, prop, schema)?,
                MemberDecl::Method(method) => inspect_method(decl, method, class, schema)?,
            }
        }
        Ok(())
    }

    fn inspect_property(
        &self,
        ctx: &CompileContext<'_>,
        decl: &ClassDecl,
        prop: &PropertyDecl,
        schema: &mut ModelSchema,
    ) -> Result<(), ConfigError> {
        if prop.visibility == Visibility::Private
            || prop.initializer == Some(Initializer::ArrowFunction)
        {
            return Ok(());
        }

        let (element, plural) = split_plural(&prop.type_name);
        let target = if is_native_type(element) {
            None
        } else {
            Some(self.resolve_reference(ctx, decl, prop, element)?)
        };
        debug!(
            class = %decl.name,
            property = %prop.name,
            type_name = %prop.type_name,
            reference = target.as_deref().unwrap_or(""),
            "property"
        );

        let meta = property_metadata(&prop.decorators)?;
        let type_value = match &target {
            Some(target) => SchemaEntry::Field(FieldSpec::reference_to(target.as_str())),
            None => SchemaEntry::Type(element.to_string()),
        };

        // decorator metadata lands in the slot first, then the type
        let mut slot = schema
            .prototype
            .remove(&prop.name)
            .map(|entry| match entry {
                SchemaEntry::Plural(inner) => *inner,
                other => other,
            });
        if let Some(spec) = &meta.spec {
            slot = Some(match slot {
                Some(SchemaEntry::Field(mut existing)) => {
                    existing.merge_from(spec);
                    SchemaEntry::Field(existing)
                }
                _ => SchemaEntry::Field(spec.clone()),
            });
        }
        let mut entry = match slot {
            Some(SchemaEntry::Field(mut existing)) => {
                let typed = match type_value {
                    SchemaEntry::Field(spec) => spec,
                    _ => FieldSpec::typed(element),
                };
                existing.merge_from(&typed);
                SchemaEntry::Field(existing)
            }
            _ => type_value,
        };

        if plural {
            entry = entry.into_plural();
            push_unique(&mut schema.plurals, &prop.name);
        } else {
            schema.plurals.retain(|p| p != &prop.name);
        }
        schema.prototype.insert(prop.name.clone(), entry);

        match target {
            Some(target) => {
                schema.properties.retain(|p| p != &prop.name);
                schema.references.insert(
                    prop.name.clone(),
                    ReferenceInfo {
                        target,
                        reverse: meta.reverse,
                    },
                );
            }
            None => {
                schema.references.remove(&prop.name);
                push_unique(&mut schema.properties, &prop.name);
            }
        }
        Ok(())
    }

    /// Maps a non-native type to the collection name of a registered model.
    fn resolve_reference(
        &self,
        ctx: &CompileContext<'_>,
        decl: &ClassDecl,
        prop: &PropertyDecl,
        type_name: &str,
    ) -> Result<String, ConfigError> {
        ctx.collections
            .get(type_name)
            .cloned()
            .or_else(|| {
                self.registry
                    .contains(type_name)
                    .then(|| type_name.to_string())
            })
            .ok_or_else(|| ConfigError::UnresolvedType {
                class: decl.name.clone(),
                property: prop.name.clone(),
                type_name: type_name.to_string(),
            })
    }
}

fn inspect_method(
    decl: &ClassDecl,
    method: &MethodDecl,
    class: &ModelClass,
    schema: &mut ModelSchema,
) -> Result<(), ConfigError> {
    match method_role(&method.decorators)? {
        MethodRole::Hook(hook) => {
            if class.hook_handler(&method.name).is_some() {
                debug!(class = %decl.name, hook = %hook, method = %method.name, "hook");
                schema.hooks.insert(hook, method.name.clone());
            } else {
                warn!(class = %decl.name, hook = %hook, method = %method.name, "hook has no runtime handler, skipping");
            }
        }
        MethodRole::Route { method: verb, path } => {
            if class.route_handler(&method.name).is_some() {
                debug!(class = %decl.name, verb = %verb, path = %path, "route");
                schema.routes.push(RouteDecl {
                    method: verb,
                    path,
                    handler: method.name.clone(),
                });
            } else {
                warn!(class = %decl.name, route = %path, method = %method.name, "route has no runtime handler, skipping");
            }
        }
        MethodRole::Plain if method.visibility == Visibility::Private => {}
        MethodRole::Plain => {
            let list = if method.is_static {
                &mut schema.statics
            } else {
                &mut schema.methods
            };
            push_unique(list, &method.name);
        }
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}
