//! HTTP middleware applied around the API router.
//!
//! Outermost first: request id assignment, request id echo, tracing, panic
//! recovery, CORS, timeout. The request id layers sit outside the panic and
//! timeout layers so that synthesized 500 and 408 responses still carry
//! `x-request-id`.

use axum::http::header::HeaderName;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::config::NetworkConfig;

const REQUEST_ID: &str = "x-request-id";

/// Verbs the route binder can register.
const API_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

/// Wraps `router` in the HTTP middleware stack.
///
/// `Router::layer` wraps everything added before it, so layers are applied
/// innermost first.
#[must_use]
pub fn apply_http_layers(router: Router, config: &NetworkConfig) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID);
    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(cors_layer(&config.cors_origins))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// `"*"` allows any origin; otherwise only the listed origins are allowed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(API_METHODS.to_vec())
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, Response};
    use serde_json::{json, Value};
    use spirit_core::decl::{ClassDecl, DecoratorCall, MethodDecl, PropertyDecl, SourceFile};
    use spirit_core::{
        ClassTable, ConnectorRegistry, DeclarationLoader, MemoryConnector, ModelClass,
        ModelRegistry, SchemaCompiler,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::routes::build_api_router;

    /// A `Gadget` model whose `/explode` route panics.
    fn app(config: &NetworkConfig) -> (Arc<ModelRegistry>, Router) {
        let source = SourceFile::new("gadgets.json").class(
            ClassDecl::model("Gadget")
                .property(PropertyDecl::new("name", "string"))
                .method(MethodDecl::statik("explode").decorate(DecoratorCall::with_args(
                    "route",
                    vec![json!("get"), json!("/explode")],
                ))),
        );
        let mut table = ClassTable::new();
        table.export(
            ModelClass::builder("Gadget")
                .route("explode", |_| async {
                    if true {
                        panic!("gadget exploded");
                    }
                    Ok(Value::Null)
                })
                .build(),
        );

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
        let router = build_api_router(&factories, "/v1").unwrap();
        (registry, apply_http_layers(router, config))
    }

    async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
        router.clone().oneshot(request).await.unwrap()
    }

    fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn request_id_is_echoed_or_generated() {
        let (_registry, router) = app(&NetworkConfig::default());

        let echoed = send(
            &router,
            Request::builder()
                .uri("/v1/gadget")
                .header(REQUEST_ID, "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(echoed.status(), StatusCode::OK);
        assert_eq!(header_str(&echoed, REQUEST_ID), Some("req-42"));

        let generated = send(
            &router,
            Request::builder().uri("/v1/gadget").body(Body::empty()).unwrap(),
        )
        .await;
        let id = header_str(&generated, REQUEST_ID).unwrap();
        assert_eq!(id.len(), 36);
    }

    #[tokio::test]
    async fn preflight_allows_api_methods_for_any_origin() {
        let (_registry, router) = app(&NetworkConfig::default());
        let response = send(
            &router,
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/v1/gadget")
                .header(header::ORIGIN, "https://app.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, "access-control-allow-origin"),
            Some("*")
        );
        let methods = header_str(&response, "access-control-allow-methods").unwrap();
        for verb in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            assert!(methods.contains(verb), "{verb} missing from {methods}");
        }
    }

    #[tokio::test]
    async fn preflight_honours_origin_allowlist() {
        let config = NetworkConfig {
            cors_origins: vec!["https://app.example".to_string(), "bad\norigin".to_string()],
            ..NetworkConfig::default()
        };
        let (_registry, router) = app(&config);
        let preflight = |origin: &'static str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/v1/gadget")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = send(&router, preflight("https://app.example")).await;
        assert_eq!(
            header_str(&allowed, "access-control-allow-origin"),
            Some("https://app.example")
        );
        let denied = send(&router, preflight("https://evil.example")).await;
        assert!(header_str(&denied, "access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn handler_panic_becomes_500_with_request_id() {
        let (_registry, router) = app(&NetworkConfig::default());
        let response = send(
            &router,
            Request::builder()
                .uri("/v1/gadget/explode")
                .header(REQUEST_ID, "req-boom")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header_str(&response, REQUEST_ID), Some("req-boom"));
    }
}
