// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use dlhub_common_telemetry::metrics::{METRICS_CONTENT_TYPE, render_metrics};
use dlhub_error::{BindSnafu, ParseAddressSnafu, Result};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::ServiceHandler;

/// Default maximum HTTP request body size (1 MiB)
pub const DEFAULT_MAX_HTTP_BODY_SIZE: usize = 1024 * 1024;

/// Configuration options for a REST server
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct RestServerConfig {
    /// The address to bind the REST server
    #[default = "127.0.0.1:3000"]
    #[builder(default = "127.0.0.1:3000".to_string(), into)]
    pub bind_address:  String,
    /// Maximum HTTP request body size in bytes
    #[default(DEFAULT_MAX_HTTP_BODY_SIZE)]
    #[builder(default = DEFAULT_MAX_HTTP_BODY_SIZE)]
    pub max_body_size: usize,
    /// Whether to enable CORS
    #[default = true]
    #[builder(default = true)]
    pub enable_cors:   bool,
}

/// Binds the configured address, registers every route handler and spawns
/// the server task.
///
/// Layers (tracing, body limit, CORS) wrap all routes registered by
/// `route_handlers`.
///
/// # Errors
/// Returns an error if the bind address cannot be parsed or bound.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::get};
/// use dlhub_server::http::{RestServerConfig, start_rest_server};
///
/// fn hello_routes(router: Router) -> Router {
///     router.route("/api/v1/hello", get(|| async { "Hello, World!" }))
/// }
///
/// # async fn demo() -> dlhub_server::Result<()> {
/// let mut handle = start_rest_server(RestServerConfig::default(), vec![hello_routes]).await?;
/// handle.wait_for_start().await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_rest_server<F>(
    config: RestServerConfig,
    route_handlers: Vec<F>,
) -> Result<ServiceHandler>
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    let bind_addr = config
        .bind_address
        .parse::<std::net::SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;

    let mut router = Router::new().route("/health", get(health_check));
    for handler in &route_handlers {
        router = handler(router);
    }
    info!(handlers = route_handlers.len(), "registered REST route handlers");

    router = router
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());
    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(BindSnafu {
            addr: config.bind_address.clone(),
        })?;
    let local_addr = listener.local_addr().context(BindSnafu {
        addr: config.bind_address.clone(),
    })?;

    let cancellation_token = CancellationToken::new();
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let shutdown = cancellation_token.clone();
    let join_handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = started_tx.send(());
                info!(addr = %local_addr, "REST server started");
                shutdown.cancelled().await;
                info!(addr = %local_addr, "REST server received shutdown signal");
            })
            .await;
        info!(addr = %local_addr, ?result, "REST server task completed");
    });

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        started_rx: Some(started_rx),
        local_addr,
    })
}

/// Health check endpoint for the REST server
async fn health_check() -> impl IntoResponse { (StatusCode::OK, "OK") }

/// Health check handler that returns detailed health information
async fn api_health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "timestamp": jiff::Timestamp::now().to_string(),
        "service": "dlhub",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    ([(CONTENT_TYPE, METRICS_CONTENT_TYPE)], render_metrics())
}

/// Adds `/api/v1/health` and the prometheus `/metrics` endpoint.
pub fn health_routes(router: Router) -> Router {
    router
        .route("/api/v1/health", get(api_health_handler))
        .route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use axum::{Json, routing::get};

    use super::*;

    fn init_test_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn ephemeral(enable_cors: bool) -> RestServerConfig {
        RestServerConfig::builder()
            .bind_address("127.0.0.1:0")
            .enable_cors(enable_cors)
            .build()
    }

    #[tokio::test]
    async fn rest_server_lifecycle() {
        init_test_logging();

        let handlers: Vec<fn(Router) -> Router> = vec![health_routes];
        let mut handler = start_rest_server(ephemeral(true), handlers).await.unwrap();
        handler.wait_for_start().await.unwrap();
        let base = format!("http://{}", handler.local_addr());

        let client = reqwest::Client::new();
        let response = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .get(format!("{base}/api/v1/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["service"], "dlhub");

        let response = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert_eq!(response.status(), 200);

        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn rest_server_without_cors() {
        init_test_logging();

        let mut handler = start_rest_server(ephemeral(false), vec![health_routes])
            .await
            .unwrap();
        handler.wait_for_start().await.unwrap();

        let response = reqwest::get(format!("http://{}/health", handler.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn multiple_route_handlers() {
        init_test_logging();

        async fn goodbye_handler() -> Json<&'static str> { Json("Goodbye, World!") }

        fn goodbye_routes(router: Router) -> Router {
            router.route("/api/v1/goodbye", get(goodbye_handler))
        }

        let handlers = vec![health_routes, goodbye_routes];
        let mut handler = start_rest_server(ephemeral(true), handlers).await.unwrap();
        handler.wait_for_start().await.unwrap();
        let base = format!("http://{}", handler.local_addr());

        let client = reqwest::Client::new();
        let response = client
            .get(format!("{base}/api/v1/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .get(format!("{base}/api/v1/goodbye"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        handler.shutdown();
        handler.wait_for_stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_bind_address() {
        let config = RestServerConfig::builder().bind_address("not-an-addr").build();
        let handlers: Vec<fn(Router) -> Router> = vec![health_routes];
        assert!(start_rest_server(config, handlers).await.is_err());
    }
}
