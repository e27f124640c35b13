//! Route binding.
//!
//! For a persistent model with route name `c` the binder registers
//!
//! - `GET /c`, `POST /c`
//! - `GET|PUT|PATCH|DELETE /c/:id`
//! - `GET|PUT|PATCH /c/:id/:ref`
//! - `POST /c/:id/$execute/:name`
//!
//! and, for every model, `POST /c/$service/:name` plus the custom routes
//! declared with `@route`. Linked factories share another model's routes
//! and bind nothing.

pub mod handlers;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, on, patch, post, put, MethodFilter, MethodRouter};
use axum::Router;
use spirit_core::ModelFactory;
use tracing::{debug, info};

use crate::error::ServerError;
use handlers::CustomRoute;

/// Converts an express-style template (`/users/:id`) to axum's syntax
/// (`/users/{id}`).
#[must_use]
pub fn path_template(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(param) if !param.is_empty() => format!("{{{param}}}"),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Path shape used for conflict detection: parameter names are erased.
fn path_shape(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with('{') && segment.ends_with('}') {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Verb-keyed route registration over an axum [`Router`].
///
/// Registration fails instead of panicking when a verb is bound twice on
/// the same path or when two templates differ only in parameter names.
#[derive(Default)]
pub struct ApiRouter {
    router: Router,
    bound: BTreeSet<(String, String)>,
    shapes: HashMap<String, String>,
}

impl ApiRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` for `method` on `template` (`:param` or `{param}`).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::RouteConflict`] on a duplicate binding.
    pub fn route(
        &mut self,
        method: &Method,
        template: &str,
        endpoint: MethodRouter,
    ) -> Result<&mut Self, ServerError> {
        let path = path_template(template);
        let conflict = || ServerError::RouteConflict {
            method: method.to_string(),
            path: path.clone(),
        };
        match self.shapes.get(&path_shape(&path)) {
            Some(existing) if *existing != path => return Err(conflict()),
            _ => {}
        }
        if !self.bound.insert((method.to_string(), path.clone())) {
            return Err(conflict());
        }
        self.shapes.insert(path_shape(&path), path.clone());
        debug!(method = %method, path = %path, "route bound");
        self.router = std::mem::take(&mut self.router).route(&path, endpoint);
        Ok(self)
    }

    /// Bound `(method, path)` pairs, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<(String, String)> {
        self.bound.iter().cloned().collect()
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

fn method_filter(method: &Method) -> Result<MethodFilter, ServerError> {
    MethodFilter::try_from(method.clone())
        .map_err(|_| ServerError::UnsupportedVerb(method.to_string()))
}

/// Binds every route of `factory`. Returns the number of routes bound.
///
/// # Errors
///
/// Returns a [`ServerError`] on a route conflict or an unsupported verb.
pub fn bind_model(router: &mut ApiRouter, factory: &Arc<ModelFactory>) -> Result<usize, ServerError> {
    if factory.is_linked() {
        debug!(model = %factory.collection_name(), "linked factory, no routes bound");
        return Ok(0);
    }
    let before = router.bound.len();
    let base = format!("/{}", factory.route_name());
    let state = || Arc::clone(factory);

    if factory.is_persistent() {
        let item = format!("{base}/{{id}}");
        let reference = format!("{base}/{{id}}/{{ref}}");
        router
            .route(&Method::GET, &base, get(handlers::query).with_state(state()))?
            .route(&Method::POST, &base, post(handlers::create).with_state(state()))?
            .route(&Method::GET, &item, get(handlers::read).with_state(state()))?
            .route(&Method::PUT, &item, put(handlers::update).with_state(state()))?
            .route(&Method::PATCH, &item, patch(handlers::patch).with_state(state()))?
            .route(&Method::DELETE, &item, delete(handlers::delete).with_state(state()))?
            .route(
                &Method::GET,
                &reference,
                get(handlers::read_reference).with_state(state()),
            )?
            .route(
                &Method::PUT,
                &reference,
                put(handlers::update_reference).with_state(state()),
            )?
            .route(
                &Method::PATCH,
                &reference,
                patch(handlers::patch_reference).with_state(state()),
            )?
            .route(
                &Method::POST,
                &format!("{base}/{{id}}/$execute/{{name}}"),
                post(handlers::execute_method).with_state(state()),
            )?;
    }

    router.route(
        &Method::POST,
        &format!("{base}/$service/{{name}}"),
        post(handlers::execute_service).with_state(state()),
    )?;

    for decl in &factory.schema().routes {
        let method = Method::from_bytes(decl.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ServerError::UnsupportedVerb(decl.method.clone()))?;
        let custom = CustomRoute {
            factory: state(),
            handler: decl.handler.clone(),
        };
        let endpoint = on(method_filter(&method)?, handlers::custom).with_state(custom);
        router.route(&method, &format!("{base}{}", decl.path), endpoint)?;
    }

    let count = router.bound.len() - before;
    info!(model = %factory.collection_name(), path = %base, routes = count, "model routes bound");
    Ok(count)
}

/// Binds every factory and nests the result under `prefix` (e.g. `/v1`).
///
/// # Errors
///
/// Returns the first binding failure.
pub fn build_api_router(
    factories: &[Arc<ModelFactory>],
    prefix: &str,
) -> Result<Router, ServerError> {
    let mut api = ApiRouter::new();
    for factory in factories {
        bind_model(&mut api, factory)?;
    }
    Ok(Router::new().nest(prefix, api.into_router()))
}
