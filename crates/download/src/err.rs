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

use std::{any::Any, io, path::PathBuf};

use dlhub_error::{ErrorExt, StackError, StatusCode};
use dlhub_remote::RemoteError;
use snafu::Snafu;
use strum::EnumProperty;

use crate::{id::DownloadId, types::DownloadStatus};

/// Failure of one worker step. Only the worker's own failure handler sees
/// these; its display text becomes the record's error message.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransferError {
    #[snafu(display("failed to get file info: {source}"))]
    FileInfo { source: RemoteError },

    #[snafu(display("failed to get download token: {source}"))]
    DownloadToken { source: RemoteError },

    #[snafu(display("remote service returned no file name"))]
    MissingFileName,

    #[snafu(display("no download URL"))]
    MissingDirectUrl,

    #[snafu(display("failed to start download: {source}"))]
    OpenTransfer { source: RemoteError },

    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDir { path: PathBuf, source: io::Error },

    #[snafu(display("failed to open temp file {}: {source}", path.display()))]
    OpenTempFile { path: PathBuf, source: io::Error },

    #[snafu(display("failed to read response body: {source}"))]
    ReadBody { source: io::Error },

    #[snafu(display("failed to write: {source}"))]
    WriteFile { source: io::Error },

    #[snafu(display("size mismatch: expected {expected} bytes, received {actual}"))]
    SizeMismatch { expected: u64, actual: u64 },

    #[snafu(display("failed to finalize {}: {source}", path.display()))]
    Finalize { path: PathBuf, source: io::Error },

    #[snafu(display("transfer interrupted"))]
    Interrupted,

    #[snafu(display("worker panicked: {message}"))]
    Panicked { message: String },
}

impl TransferError {
    /// Failures after which the partial file cannot be trusted.
    pub const fn is_corruption(&self) -> bool { matches!(self, Self::SizeMismatch { .. }) }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("download {id} not found"))]
    RecordNotFound { id: DownloadId },

    #[snafu(display("download {id} already exists"))]
    RecordExists { id: DownloadId },

    #[snafu(display("store I/O error at {}: {source}", path.display()))]
    StoreIo { path: PathBuf, source: io::Error },

    #[snafu(display("corrupt store document {}: {source}", path.display()))]
    StoreSerde {
        path:   PathBuf,
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned to callers of the download manager.
#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum ManagerError {
    #[snafu(display("remote API key is not configured"))]
    #[strum(props(status_code = "failed_precondition"))]
    MissingCredential,

    #[snafu(display("download {id} not found"))]
    #[strum(props(status_code = "not_found"))]
    NotFound { id: DownloadId },

    #[snafu(display("download {id} is already running"))]
    #[strum(props(status_code = "conflict"))]
    AlreadyRunning { id: DownloadId },

    #[snafu(display("cannot {action} download {id} in status {status}"))]
    #[strum(props(status_code = "conflict"))]
    InvalidState {
        id:     DownloadId,
        status: DownloadStatus,
        action: &'static str,
    },

    #[snafu(display("download manager is shutting down"))]
    #[strum(props(status_code = "failed_precondition"))]
    ShuttingDown,

    #[snafu(display("record store failure: {source}"))]
    #[strum(props(status_code = "internal"))]
    Store { source: StoreError },

    #[snafu(display("failed to build remote client: {source}"))]
    #[strum(props(status_code = "internal"))]
    Client { source: RemoteError },

    #[snafu(display("failed to remove {}: {source}", path.display()))]
    #[strum(props(status_code = "internal"))]
    RemoveFile { path: PathBuf, source: io::Error },
}

impl From<StoreError> for ManagerError {
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::RecordNotFound { id } => Self::NotFound { id },
            source => Self::Store { source },
        }
    }
}

impl ErrorExt for ManagerError {
    fn status_code(&self) -> StatusCode {
        self.get_str("status_code")
            .and_then(|value| value.parse().ok())
            .unwrap_or(StatusCode::Unknown)
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for ManagerError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}"));
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
