//! HTTP API for blueprint authoring and manual watch runs.

mod auth;
mod handlers;
mod routes;

pub use routes::create_router;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::blueprint::authoring::AuthoringClient;
use crate::fetcher::HtmlFetcher;
use crate::scheduler::Scheduler;

/// How long in-flight requests get to drain after shutdown begins.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<dyn HtmlFetcher>,
    pub authoring: Arc<AuthoringClient>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub api_key: String,
}

/// Serve the API until the cancellation token fires, then drain with a
/// deadline.
pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "worker API listening");

    let deadline = {
        let cancel = cancel.clone();
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .into_future();
    tokio::select! {
        result = server => result?,
        _ = deadline => {
            warn!("graceful shutdown deadline exceeded, aborting open connections");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::fetcher::{FetchError, HtmlFetcher};

    struct StubFetcher {
        html: String,
    }

    #[async_trait]
    impl HtmlFetcher for StubFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
            if self.html.is_empty() {
                return Err(FetchError::EmptyBody {
                    url: url.to_string(),
                });
            }
            Ok(self.html.clone())
        }
    }

    fn test_state(html: &str) -> AppState {
        AppState {
            fetcher: Arc::new(StubFetcher {
                html: html.to_string(),
            }),
            authoring: Arc::new(AuthoringClient::new(
                "test-key".to_string(),
                "test-model".to_string(),
            )),
            scheduler: None,
            api_key: "secret".to_string(),
        }
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request.header(header::AUTHORIZATION, "Bearer secret")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_exempt_from_auth() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn missing_bearer_token_is_unauthorized() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(
                Request::post("/api/fetch-html")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"o","url":"https://x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_bearer_token_is_unauthorized() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(
                Request::post("/api/fetch-html")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"o","url":"https://x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn fetch_html_cleans_fetched_page() {
        let app = create_router(test_state(
            "<html><body><style>.x{}</style><div class='p'>hello</div></body></html>",
        ));
        let response = app
            .oneshot(
                authed(Request::post("/api/fetch-html"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"o","url":"https://x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let cleaned = json["cleaned_html"].as_str().unwrap();
        assert!(cleaned.contains("hello"));
        assert!(!cleaned.contains("<style"));
    }

    #[tokio::test]
    async fn fetch_html_requires_fields() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(
                authed(Request::post("/api/fetch-html"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"","url":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fetch_failure_maps_to_bad_gateway() {
        let app = create_router(test_state(""));
        let response = app
            .oneshot(
                authed(Request::post("/api/fetch-html"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"o","url":"https://x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn generate_blueprint_rejects_unknown_schema() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(
                authed(Request::post("/api/generate-blueprint"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"org_id":"o","cleaned_html":"<div></div>","schema_type":"bogus"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_blueprint_extracts_entities() {
        let app = create_router(test_state(
            "<html><body><div class='product'><span class='name'>Widget</span></div></body></html>",
        ));
        let body = r#"{
            "org_id": "o",
            "url": "https://x",
            "schema_type": "ecommerce_product",
            "extraction_rules": {
                "container": "//div[@class='product']",
                "fields": {
                    "name": {"xpath": ".//span[@class='name']", "type": "string", "attribute": "text"}
                }
            }
        }"#;
        let response = app
            .oneshot(
                authed(Request::post("/api/test-blueprint"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["entities"][0]["name"], "Widget");
        assert_eq!(json["errors"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn run_watch_without_scheduler_is_unavailable() {
        let app = create_router(test_state("<html></html>"));
        let response = app
            .oneshot(
                authed(Request::post("/api/run-watch"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"org_id":"o","watch_id":"w"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
