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

//! Download, settings and progress-stream routes.
//!
//! Handlers only translate between HTTP and [`DownloadManager`]; every rule
//! about what an operation may do lives in the manager.

use std::{str::FromStr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{
        HeaderName, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dlhub_common_broadcast::{Broadcaster, ChannelSink};
use dlhub_download::{
    Download, DownloadCategory, DownloadFilter, DownloadId, DownloadManager, DownloadPage,
    DownloadStatus, Settings,
};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::{ApiError, ApiResult, InvalidArgumentSnafu, StreamSnafu};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Shared state of the API routes.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub manager:     Arc<DownloadManager>,
    pub broadcaster: Arc<Broadcaster>,
}

/// All API routes, bound to `state`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/downloads", get(list_downloads).post(create_download))
        .route("/api/v1/downloads/active", get(list_active))
        .route("/api/v1/downloads/streams", get(stream_progress))
        .route(
            "/api/v1/downloads/{id}",
            get(get_download).delete(delete_download),
        )
        .route("/api/v1/downloads/{id}/pause", post(pause_download))
        .route("/api/v1/downloads/{id}/resume", post(resume_download))
        .route("/api/v1/downloads/{id}/cancel", post(cancel_download))
        .route("/api/v1/downloads/{id}/retry", post(retry_download))
        .route("/api/v1/downloads/{id}/archive", post(archive_download))
        .route("/api/v1/settings", get(get_settings).patch(update_settings))
        .with_state(state)
}

/// Route handler for [`crate::http::start_rest_server`].
pub fn api_routes(state: ApiState) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |root| root.merge(router(state.clone()))
}

fn parse_id(raw: &str) -> ApiResult<DownloadId> {
    raw.parse().ok().context(InvalidArgumentSnafu {
        reason: format!("invalid download id {raw}"),
    })
}

/// Parses a comma separated list such as `DOWNLOADING,PAUSED`.
fn parse_list<T: FromStr>(raw: Option<&str>, field: &str) -> ApiResult<Vec<T>> {
    raw.into_iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.to_ascii_uppercase().parse().ok().context(InvalidArgumentSnafu {
                reason: format!("unknown {field} {s}"),
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub status:   Option<String>,
    #[serde(rename = "type")]
    pub category: Option<String>,
    pub page:     Option<usize>,
    pub limit:    Option<usize>,
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<DownloadFilter> {
        Ok(DownloadFilter {
            statuses:   parse_list::<DownloadStatus>(self.status.as_deref(), "status")?,
            categories: parse_list::<DownloadCategory>(self.category.as_deref(), "type")?,
            page:       self.page.unwrap_or(1),
            limit:      self.limit.unwrap_or_default(),
        }
        .normalized())
    }
}

async fn list_downloads(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<DownloadPage>> {
    let filter = query.into_filter()?;
    Ok(Json(state.manager.list(&filter).await?))
}

async fn list_active(State(state): State<ApiState>) -> ApiResult<Json<Vec<Download>>> {
    Ok(Json(state.manager.list_active().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadRequest {
    pub url:              String,
    #[serde(rename = "type")]
    pub category:         DownloadCategory,
    #[serde(default)]
    pub custom_file_dir:  Option<String>,
    #[serde(default)]
    pub custom_file_name: Option<String>,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value).map_err(|rejection| {
        InvalidArgumentSnafu {
            reason: rejection.body_text(),
        }
        .build()
    })
}

async fn create_download(
    State(state): State<ApiState>,
    body: Result<Json<CreateDownloadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Download>)> {
    let request = json_body(body)?;
    let url = request.url.trim();
    snafu::ensure!(
        !url.is_empty(),
        InvalidArgumentSnafu {
            reason: "url must not be empty",
        }
    );
    let download = state
        .manager
        .create(
            url,
            request.category,
            request.custom_file_dir,
            request.custom_file_name,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(download)))
}

async fn get_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    Ok(Json(state.manager.get(parse_id(&id)?).await?))
}

async fn delete_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    let id = parse_id(&id)?;
    state.manager.pause(id)?;
    Ok(Json(state.manager.get(id).await?))
}

async fn resume_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    let id = parse_id(&id)?;
    state.manager.resume(id)?;
    Ok(Json(state.manager.get(id).await?))
}

async fn cancel_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    let id = parse_id(&id)?;
    state.manager.cancel(id)?;
    Ok(Json(state.manager.get(id).await?))
}

async fn retry_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    Ok(Json(state.manager.retry(parse_id(&id)?).await?))
}

async fn archive_download(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Download>> {
    Ok(Json(state.manager.archive(parse_id(&id)?).await?))
}

/// Opens a server-push stream of progress events.
async fn stream_progress(State(state): State<ApiState>) -> ApiResult<Response> {
    let subscription = state.broadcaster.subscribe().context(StreamSnafu)?;
    debug!(subscriber = %subscription.id(), "progress stream opened");

    let (tx, rx) = mpsc::channel(state.broadcaster.config().buffer_size.max(1));
    let broadcaster = Arc::clone(&state.broadcaster);
    tokio::spawn(async move {
        broadcaster
            .deliver(subscription, ChannelSink::new(tx))
            .await;
    });

    let headers = [
        (CONTENT_TYPE, "text/event-stream"),
        (CACHE_CONTROL, "no-cache"),
        (X_ACCEL_BUFFERING, "no"),
    ];
    Ok((headers, Body::from_stream(ReceiverStream::new(rx))).into_response())
}

/// Settings as returned to clients. The key itself is never echoed back.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub api_key_configured: bool,
    pub api_key_hint:       Option<String>,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        let key = settings.credential();
        Self {
            api_key_configured: key.is_some(),
            api_key_hint:       key.map(|k| {
                let tail: String = k.chars().skip(k.chars().count().saturating_sub(4)).collect();
                format!("****{tail}")
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    /// `null` or an empty string clears the key.
    pub api_key: Option<String>,
}

async fn get_settings(State(state): State<ApiState>) -> ApiResult<Json<SettingsView>> {
    let settings = state.manager.settings().await?;
    Ok(Json(SettingsView::from(&settings)))
}

async fn update_settings(
    State(state): State<ApiState>,
    body: Result<Json<SettingsPatch>, JsonRejection>,
) -> ApiResult<Json<SettingsView>> {
    let patch = json_body(body)?;
    let mut settings = state.manager.settings().await?;
    settings.api_key = patch.api_key.filter(|k| !k.trim().is_empty());
    let settings = state.manager.update_settings(settings).await?;
    Ok(Json(SettingsView::from(&settings)))
}
