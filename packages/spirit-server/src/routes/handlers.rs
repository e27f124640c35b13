//! Axum handlers for model routes.
//!
//! Each handler receives its factory as router state, decodes the request
//! into a [`ControllerRequest`] and renders the [`Outcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use spirit_core::{
    ControllerRequest, ModelController, ModelFactory, Outcome, RequestError, RouteRequest,
};

use crate::error::ApiError;

type QueryMap = Query<BTreeMap<String, String>>;

/// State of a custom route: the factory plus the handler method name.
#[derive(Clone)]
pub struct CustomRoute {
    pub factory: Arc<ModelFactory>,
    pub handler: String,
}

/// Decodes an optional JSON body; an empty body is `Null`.
fn decode_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError(RequestError::BadRequest(format!("invalid JSON body: {e}"))))
}

fn controller(factory: &ModelFactory) -> Result<&Arc<dyn ModelController>, ApiError> {
    factory.controller().ok_or_else(|| {
        ApiError(RequestError::Internal(anyhow::anyhow!(
            "model '{}' has no controller",
            factory.collection_name()
        )))
    })
}

fn render(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Ok(body) => Json(body).into_response(),
        Outcome::Created(body) => (StatusCode::CREATED, Json(body)).into_response(),
        Outcome::Deleted => StatusCode::NO_CONTENT.into_response(),
    }
}

fn request(query: BTreeMap<String, String>) -> ControllerRequest {
    ControllerRequest {
        query,
        ..ControllerRequest::default()
    }
}

// ---------------------------------------------------------------------------
// Collection routes
// ---------------------------------------------------------------------------

pub async fn query(
    State(factory): State<Arc<ModelFactory>>,
    Query(query): QueryMap,
) -> Result<Response, ApiError> {
    let outcome = controller(&factory)?.query(&factory, request(query)).await?;
    Ok(render(outcome))
}

pub async fn create(
    State(factory): State<Arc<ModelFactory>>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = request(query).body(decode_body(&body)?);
    let outcome = controller(&factory)?.create(&factory, req).await?;
    Ok(render(outcome))
}

// ---------------------------------------------------------------------------
// Instance routes
// ---------------------------------------------------------------------------

pub async fn read(
    State(factory): State<Arc<ModelFactory>>,
    Path(id): Path<String>,
    Query(query): QueryMap,
) -> Result<Response, ApiError> {
    let outcome = controller(&factory)?
        .read(&factory, request(query).id(id))
        .await?;
    Ok(render(outcome))
}

pub async fn update(
    State(factory): State<Arc<ModelFactory>>,
    Path(id): Path<String>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = request(query).id(id).body(decode_body(&body)?);
    let outcome = controller(&factory)?.update(&factory, req).await?;
    Ok(render(outcome))
}

pub async fn patch(
    State(factory): State<Arc<ModelFactory>>,
    Path(id): Path<String>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = request(query).id(id).body(decode_body(&body)?);
    let outcome = controller(&factory)?.patch(&factory, req).await?;
    Ok(render(outcome))
}

pub async fn delete(
    State(factory): State<Arc<ModelFactory>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = controller(&factory)?
        .delete(&factory, ControllerRequest::new().id(id))
        .await?;
    Ok(render(outcome))
}

// ---------------------------------------------------------------------------
// Reference routes (`/:id/:ref`)
// ---------------------------------------------------------------------------

pub async fn read_reference(
    State(factory): State<Arc<ModelFactory>>,
    Path((id, reference)): Path<(String, String)>,
    Query(query): QueryMap,
) -> Result<Response, ApiError> {
    let req = request(query).id(id).reference(reference);
    let outcome = controller(&factory)?.read(&factory, req).await?;
    Ok(render(outcome))
}

pub async fn update_reference(
    State(factory): State<Arc<ModelFactory>>,
    Path((id, reference)): Path<(String, String)>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = request(query)
        .id(id)
        .reference(reference)
        .body(decode_body(&body)?);
    let outcome = controller(&factory)?.update(&factory, req).await?;
    Ok(render(outcome))
}

pub async fn patch_reference(
    State(factory): State<Arc<ModelFactory>>,
    Path((id, reference)): Path<(String, String)>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req = request(query)
        .id(id)
        .reference(reference)
        .body(decode_body(&body)?);
    let outcome = controller(&factory)?.patch(&factory, req).await?;
    Ok(render(outcome))
}

// ---------------------------------------------------------------------------
// Invocation routes
// ---------------------------------------------------------------------------

/// `POST /c/$service/:name`
pub async fn execute_service(
    State(factory): State<Arc<ModelFactory>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let result = factory.execute_service(&name, decode_body(&body)?).await?;
    Ok(Json(result))
}

/// `POST /c/:id/$execute/:name`
pub async fn execute_method(
    State(factory): State<Arc<ModelFactory>>,
    Path((id, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let result = factory
        .execute_method(&id, &name, decode_body(&body)?)
        .await?;
    Ok(Json(result))
}

/// A route declared with `@route`.
pub async fn custom(
    State(route): State<CustomRoute>,
    Path(params): Path<BTreeMap<String, String>>,
    Query(query): QueryMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let handler = route
        .factory
        .class()
        .route_handler(&route.handler)
        .ok_or_else(|| {
            ApiError(RequestError::NotFound(format!(
                "route handler '{}' not found on '{}'",
                route.handler,
                route.factory.collection_name()
            )))
        })?;
    let result = handler(RouteRequest {
        params,
        query,
        body: decode_body(&body)?,
    })
    .await
    .map_err(RequestError::Internal)?;
    Ok(Json(result))
}
