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

use std::any::Any;

use axum::{Json, response::IntoResponse};
use dlhub_common_broadcast::BroadcastError;
use dlhub_download::ManagerError;
use dlhub_error::{ErrorExt, StackError, StatusCode};
use serde::Serialize;
use snafu::Snafu;
use strum::EnumProperty;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code:    StatusCode,
    pub message: String,
}

#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum ApiError {
    #[snafu(display("Invalid argument: {reason}"))]
    #[strum(props(status_code = "invalid_argument"))]
    InvalidArgument { reason: String },

    #[snafu(display("{source}"))]
    Manager { source: ManagerError },

    #[snafu(display("Event stream unavailable: {source}"))]
    #[strum(props(status_code = "failed_precondition"))]
    Stream { source: BroadcastError },
}

impl From<ManagerError> for ApiError {
    fn from(source: ManagerError) -> Self { Self::Manager { source } }
}

impl ErrorExt for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Manager { source } => source.status_code(),
            _ => self
                .get_str("status_code")
                .and_then(|value| value.parse().ok())
                .unwrap_or(StatusCode::Unknown),
        }
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for ApiError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}"));
        if let Some(next) = self.next() {
            next.debug_fmt(layer + 1, buf);
        }
    }

    fn next(&self) -> Option<&dyn StackError> {
        match self {
            Self::Manager { source } => Some(source),
            _ => None,
        }
    }

    fn transparent(&self) -> bool { matches!(self, Self::Manager { .. }) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let code = self.status_code();
        if matches!(code, StatusCode::Internal | StatusCode::Unknown) {
            let mut stack = Vec::new();
            self.debug_fmt(0, &mut stack);
            error!(error = ?stack, "request failed");
        }
        let body = Json(ErrorBody {
            code,
            message: self.output_msg(),
        });
        (code.http_status(), body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
