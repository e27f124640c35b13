//! Server lifecycle.
//!
//! `init()` loads the declarations, compiles them, sets up every factory and
//! binds the routes; `start()` binds the listener; `serve()` runs until the
//! shutdown signal fires. Models are only registered during `init()`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use spirit_core::{
    ClassTable, Connector, ConnectorRegistry, DeclarationLoader, ModelClass, ModelRegistry,
    SchemaCompiler, SourceFile,
};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::network::NetworkModule;
use crate::routes::build_api_router;

/// A Spirit application: registered connectors, classes and model sources.
pub struct SpiritServer {
    config: ServerConfig,
    registry: Arc<ModelRegistry>,
    connectors: Arc<ConnectorRegistry>,
    loader: DeclarationLoader,
    classes: ClassTable,
    network: NetworkModule,
    router: Option<Router>,
}

impl SpiritServer {
    /// Creates a server with its own registry holding the built-in validators.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(ModelRegistry::with_builtin_validators()))
    }

    /// Creates a server registering its models into `registry`.
    #[must_use]
    pub fn with_registry(config: ServerConfig, registry: Arc<ModelRegistry>) -> Self {
        let network = NetworkModule::new(config.network.clone());
        Self {
            config,
            registry,
            connectors: Arc::new(ConnectorRegistry::new()),
            loader: DeclarationLoader::new(),
            classes: ClassTable::new(),
            network,
            router: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ModelRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn connectors(&self) -> Arc<ConnectorRegistry> {
        Arc::clone(&self.connectors)
    }

    /// Registers a connector under its datasource key.
    pub fn add_connector(&mut self, connector: Arc<dyn Connector>) -> &mut Self {
        info!(datasource = connector.datasource(), "connector registered");
        self.connectors.register(connector);
        self
    }

    /// Exports a runtime class for the declaration of the same name.
    pub fn add_class(&mut self, class: Arc<ModelClass>) -> &mut Self {
        self.classes.export(class);
        self
    }

    /// Adds a source of model declarations.
    pub fn add_module(&mut self, source: SourceFile) -> &mut Self {
        self.loader.add_source(source);
        self
    }

    /// Connects the datasources, compiles every model and binds the routes.
    ///
    /// Returns the application router (middleware not applied).
    ///
    /// # Errors
    ///
    /// Any configuration error aborts the bootstrap.
    pub async fn init(&mut self) -> Result<Router, ServerError> {
        for dir in &self.config.model_dirs {
            let files = self.loader.load_dir(dir)?;
            debug!(dir = %dir.display(), files, "model directory loaded");
        }
        if self.config.export_plain_classes {
            for name in self.loader.class_names() {
                if self.classes.resolve(&name).is_none() {
                    self.classes.export(ModelClass::plain(name));
                }
            }
        }

        self.connectors
            .connect_all()
            .await
            .map_err(ServerError::Connector)?;

        let loaded = self.loader.load(&self.classes)?;
        let factories = SchemaCompiler::new(Arc::clone(&self.registry), Arc::clone(&self.connectors))
            .default_datasource(self.config.default_datasource.as_str())
            .compile(&loaded)?;
        for factory in &factories {
            factory.setup()?;
        }

        let models = factories.len();
        let router = build_api_router(&factories, &self.config.api_prefix())?.route(
            "/health",
            get(health).with_state(Arc::clone(&self.registry)),
        );
        info!(models, prefix = %self.config.api_prefix(), "server initialized");

        self.router = Some(router.clone());
        Ok(router)
    }

    /// Binds the TCP listener. Returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        self.network.start().await
    }

    /// Serves the initialized router with the HTTP middleware stack until
    /// `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Fails when `init()` or `start()` was not called, or on a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(router) = self.router else {
            anyhow::bail!("init() must be called before serve()");
        };
        let router = self.network.layered(router);
        self.network.serve(router, shutdown).await
    }
}

async fn health(State(registry): State<Arc<ModelRegistry>>) -> Json<Value> {
    Json(json!({ "state": "ready", "models": registry.len() }))
}
