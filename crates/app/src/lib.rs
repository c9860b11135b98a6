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

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::Router;
use bon::Builder;
use dlhub_common_broadcast::{BroadcastConfig, Broadcaster};
use dlhub_common_telemetry::{self as telemetry, logging::LoggingOptions};
use dlhub_download::{
    DownloadCategory, DownloadConfig, DownloadManager, FileStore, Settings, SettingsStore,
};
use dlhub_remote::{OneFichierClientFactory, RemoteConfig};
use dlhub_server::{
    ServiceHandler,
    api::{ApiState, api_routes},
    http::{RestServerConfig, health_routes, start_rest_server},
};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type RouteHandler = Box<dyn Fn(Router) -> Router + Send + Sync>;

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    /// Application configuration
    pub config:             AppConfig,
    /// Controls if the application should continue running
    #[default(_code = "Arc::new(AtomicBool::new(false))")]
    pub running:            Arc<AtomicBool>,
    /// Fired once every component has stopped
    #[default(_code = "CancellationToken::new()")]
    pub cancellation_token: CancellationToken,
}

/// Configuration for the application
#[derive(Debug, Clone, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding download records and settings
    #[default(PathBuf::from("data"))]
    #[builder(default = PathBuf::from("data"), into)]
    pub data_dir:                 PathBuf,
    /// API key written to the settings store at startup, if given
    pub api_key:                  Option<String>,
    /// REST server configuration
    #[builder(default)]
    pub http_config:              RestServerConfig,
    #[builder(default)]
    pub download:                 DownloadConfig,
    #[builder(default)]
    pub broadcast:                BroadcastConfig,
    #[builder(default)]
    pub remote:                   RemoteConfig,
    #[builder(default)]
    pub logging:                  LoggingOptions,
    /// Whether to react to Ctrl-C and SIGTERM
    #[default = true]
    #[builder(default = true)]
    pub enable_graceful_shutdown: bool,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config: self,
            ..Default::default()
        }
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    /// Sender for triggering shutdown
    shutdown_tx:        Option<oneshot::Sender<()>>,
    /// Application running flag
    running:            Arc<AtomicBool>,
    /// Fired once shutdown completed
    cancellation_token: CancellationToken,
    /// Address of the REST server
    local_addr:         SocketAddr,
}

impl AppHandle {
    /// Starts a graceful shutdown without waiting for it.
    pub fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Waits until every component has stopped.
    pub async fn wait_for_shutdown(&self) { self.cancellation_token.cancelled().await; }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}

/// Components shut down in order when the application stops.
struct Services {
    http:        ServiceHandler,
    manager:     Arc<DownloadManager>,
    broadcaster: Arc<Broadcaster>,
}

impl Services {
    async fn stop(self, config: &AppConfig) {
        info!("Shutting down REST server");
        self.http.shutdown();

        let settled = self.manager.shutdown(config.download.shutdown_timeout).await;
        info!(settled, "Download manager stopped");

        // Ends open progress streams so the server can drain.
        if let Err(e) = self.broadcaster.close() {
            warn!(error = %e, "broadcaster already closed");
        }
        if let Err(e) = self.http.wait_for_stop().await {
            error!(error = %e, "REST server did not stop cleanly");
        }
    }
}

impl App {
    /// Writes the configured API key into the settings store.
    async fn seed_settings(&self, store: &FileStore) -> Result<(), Whatever> {
        let Some(api_key) = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        else {
            return Ok(());
        };
        let current = store
            .get_settings()
            .await
            .whatever_context("Failed to read settings")?;
        if current.credential() == Some(api_key) {
            return Ok(());
        }
        store
            .update_settings(&Settings {
                api_key: Some(api_key.to_string()),
            })
            .await
            .whatever_context("Failed to store API key")?;
        info!("API key seeded from configuration");
        Ok(())
    }

    async fn build_services(&self) -> Result<Services, Whatever> {
        let store = Arc::new(
            FileStore::open(&self.config.data_dir)
                .await
                .whatever_context("Failed to open record store")?,
        );
        self.seed_settings(&store).await?;

        for category in DownloadCategory::ALL {
            let dir = self.config.download.download_dir.join(category.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_whatever_context(|_| format!("Failed to create {}", dir.display()))?;
        }

        let broadcaster = Arc::new(Broadcaster::new(self.config.broadcast.clone()));
        broadcaster
            .on_connect(|id| info!(subscriber = %id, "progress stream connected"))
            .on_disconnect(|id| info!(subscriber = %id, "progress stream disconnected"));

        let clients = OneFichierClientFactory::new(self.config.remote.clone())
            .whatever_context("Failed to build remote client")?;
        let manager = Arc::new(
            DownloadManager::builder()
                .store(store.clone())
                .settings(store)
                .clients(Arc::new(clients))
                .broadcaster(broadcaster.clone())
                .config(self.config.download.clone())
                .build(),
        );
        match manager.recover().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Resumed interrupted downloads"),
            Err(e) => warn!(error = %e, "Failed to recover interrupted downloads"),
        }

        let handlers: Vec<RouteHandler> = vec![
            Box::new(health_routes),
            Box::new(api_routes(ApiState {
                manager:     manager.clone(),
                broadcaster: broadcaster.clone(),
            })),
        ];
        let http = start_rest_server(self.config.http_config.clone(), handlers)
            .await
            .whatever_context("Failed to start REST server")?;

        Ok(Services {
            http,
            manager,
            broadcaster,
        })
    }

    /// Start the application and return a handle for controlling it
    async fn start(&self) -> Result<AppHandle, Whatever> {
        info!("Starting dlhub application");

        let mut services = self.build_services().await?;
        services
            .http
            .wait_for_start()
            .await
            .whatever_context("REST server failed to start")?;
        let local_addr = services.http.local_addr();

        self.running.store(true, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app_handle = AppHandle {
            shutdown_tx: Some(shutdown_tx),
            running: Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
            local_addr,
        };
        info!(addr = %local_addr, "Application started successfully");

        let running = Arc::clone(&self.running);
        let cancellation_token = self.cancellation_token.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if config.enable_graceful_shutdown {
                shutdown_signal(shutdown_rx).await;
            } else {
                let _ = shutdown_rx.await;
            }

            services.stop(&config).await;
            running.store(false, Ordering::SeqCst);
            cancellation_token.cancel();
            info!("Application shutdown complete");
        });

        Ok(app_handle)
    }

    /// Run the application blocking until it's shut down
    pub async fn run(self) -> Result<(), Whatever> {
        let _guards = telemetry::logging::init_global_logging("dlhub", &self.config.logging);
        telemetry::panic_hook::set_panic_hook();

        let handle = self.start().await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        _ = shutdown_rx => { info!("Received shutdown signal"); },
    }
}
