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

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{StatusCode, header};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::{
    config::RemoteConfig,
    error::{
        BuildClientSnafu, DecodeSnafu, HttpSnafu, NetworkSnafu, Result, TokenRejectedSnafu,
    },
    types::{DownloadToken, FileInfo, RemoteBody},
};

const INFO_PATH: &str = "/file/info.cgi";
const TOKEN_PATH: &str = "/download/get_token.cgi";

/// Operations a download needs from the hosting service.
#[async_trait]
pub trait RemoteFileService: Send + Sync {
    /// Resolves name, size, checksum and content type of `url`.
    async fn file_info(&self, url: &str) -> Result<FileInfo>;

    /// Obtains a direct-download link for `url`. Fails unless the service
    /// reports status `OK`.
    async fn download_token(&self, url: &str) -> Result<DownloadToken>;

    /// Starts streaming `direct_url` from `offset`.
    async fn open(&self, direct_url: &str, offset: u64) -> Result<RemoteBody>;
}

/// Builds a client bound to an API credential.
pub trait ClientFactory: Send + Sync {
    fn build(&self, api_key: &str) -> Result<Arc<dyn RemoteFileService>>;
}

#[derive(Debug, Clone)]
pub struct OneFichierClient {
    http:     reqwest::Client,
    base_url: String,
    api_key:  String,
    timeout:  Duration,
}

impl OneFichierClient {
    pub fn new(config: &RemoteConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self::with_http(http_client(config)?, config, api_key))
    }

    /// Reuses an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        config: &RemoteConfig,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: config.timeout,
        }
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, file_url: &str) -> Result<T> {
        let endpoint = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&serde_json::json!({ "url": file_url }))
            .send()
            .await
            .context(NetworkSnafu { url: &endpoint })?;

        let status = response.status();
        ensure!(
            status.is_success(),
            HttpSnafu {
                status: status.as_u16(),
                url:    &endpoint,
            }
        );

        response
            .json::<T>()
            .await
            .context(DecodeSnafu { url: &endpoint })
    }
}

fn http_client(config: &RemoteConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(agent) = config.user_agent.as_deref() {
        builder = builder.user_agent(agent);
    }
    builder.build().context(BuildClientSnafu)
}

#[async_trait]
impl RemoteFileService for OneFichierClient {
    async fn file_info(&self, url: &str) -> Result<FileInfo> {
        let info: FileInfo = self.post_json(INFO_PATH, url).await?;
        debug!(url, filename = %info.filename, size = info.size, "resolved file info");
        Ok(info)
    }

    async fn download_token(&self, url: &str) -> Result<DownloadToken> {
        let token: DownloadToken = self.post_json(TOKEN_PATH, url).await?;
        ensure!(
            token.is_ok(),
            TokenRejectedSnafu {
                status:  token.status.clone(),
                message: token.message.clone().unwrap_or_default(),
            }
        );
        Ok(token)
    }

    async fn open(&self, direct_url: &str, offset: u64) -> Result<RemoteBody> {
        let mut request = self.http.get(direct_url);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .await
            .context(NetworkSnafu { url: direct_url })?;

        let status = response.status();
        if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(offset, "range starts past the end, nothing left to transfer");
            return Ok(RemoteBody {
                partial:        true,
                content_length: Some(0),
                reader:         Box::pin(tokio::io::empty()),
            });
        }
        ensure!(
            status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT,
            HttpSnafu {
                status: status.as_u16(),
                url:    direct_url,
            }
        );

        let partial = status == StatusCode::PARTIAL_CONTENT;
        let content_length = response.content_length();
        debug!(offset, partial, ?content_length, "transfer opened");

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(RemoteBody {
            partial,
            content_length,
            reader: Box::pin(StreamReader::new(stream)),
        })
    }
}

/// Factory sharing one connection pool across credentials.
#[derive(Debug, Clone)]
pub struct OneFichierClientFactory {
    config: RemoteConfig,
    http:   reqwest::Client,
}

impl OneFichierClientFactory {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let http = http_client(&config)?;
        Ok(Self { config, http })
    }
}

impl ClientFactory for OneFichierClientFactory {
    fn build(&self, api_key: &str) -> Result<Arc<dyn RemoteFileService>> {
        Ok(Arc::new(OneFichierClient::with_http(
            self.http.clone(),
            &self.config,
            api_key,
        )))
    }
}
