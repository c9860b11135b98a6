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

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use dlhub_app::AppConfig;
use dlhub_common_broadcast::BroadcastConfig;
use dlhub_common_telemetry::logging::{LogFormat, LoggingOptions};
use dlhub_download::DownloadConfig;
use dlhub_remote::RemoteConfig;
use dlhub_server::http::RestServerConfig;
use snafu::Whatever;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "dlhub",
about = "Personal download manager backend",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the dlhub server.
Examples:

dlhub server
dlhub server --bind 0.0.0.0:8080 --download-dir /srv/media --api-key $KEY

")]
struct ServerArgs {
    /// Address of the REST server
    #[arg(long, env = "DLHUB_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    /// Directory holding download records and settings
    #[arg(long, env = "DLHUB_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Root of the movies/ and series/ directories
    #[arg(long, env = "DLHUB_DOWNLOAD_DIR", default_value = "downloads")]
    download_dir: PathBuf,

    /// Remote service API key, stored in the settings at startup
    #[arg(long, env = "DLHUB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Remote API root
    #[arg(long, env = "DLHUB_API_BASE_URL", default_value = "https://api.1fichier.com/v1")]
    api_base_url: String,

    /// Seconds between stream heartbeats, 0 disables them
    #[arg(long, env = "DLHUB_HEARTBEAT_SECS", default_value_t = 15)]
    heartbeat_secs: u64,

    /// Disable permissive CORS headers
    #[arg(long, env = "DLHUB_NO_CORS")]
    no_cors: bool,

    /// Directory for rotated log files
    #[arg(long, env = "DLHUB_LOG_DIR", default_value = "")]
    log_dir: String,

    /// Log filter such as `info,dlhub_download=debug`
    #[arg(long, env = "DLHUB_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, env = "DLHUB_LOG_JSON")]
    log_json: bool,
}

impl ServerArgs {
    fn config(&self) -> AppConfig {
        AppConfig::builder()
            .data_dir(self.data_dir.clone())
            .maybe_api_key(self.api_key.clone())
            .http_config(
                RestServerConfig::builder()
                    .bind_address(self.bind.clone())
                    .enable_cors(!self.no_cors)
                    .build(),
            )
            .download(
                DownloadConfig::builder()
                    .download_dir(self.download_dir.clone())
                    .build(),
            )
            .broadcast(
                BroadcastConfig::builder()
                    .heartbeat_interval(Duration::from_secs(self.heartbeat_secs))
                    .build(),
            )
            .remote(
                RemoteConfig::builder()
                    .base_url(self.api_base_url.clone())
                    .user_agent(format!("dlhub/{}", env!("CARGO_PKG_VERSION")))
                    .build(),
            )
            .logging(
                LoggingOptions::builder()
                    .dir(self.log_dir.clone())
                    .maybe_level(self.log_level.clone())
                    .log_format(if self.log_json {
                        LogFormat::Json
                    } else {
                        LogFormat::Text
                    })
                    .build(),
            )
            .build()
    }

    async fn run(&self) -> Result<(), Whatever> { self.config().open().run().await }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run().await,
    }
}
