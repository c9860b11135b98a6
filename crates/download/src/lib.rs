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

//! Download records, the per-download worker state machine and the manager
//! that supervises workers.
//!
//! A [`DownloadWorker`] resolves metadata, obtains a direct link and streams
//! the body into a hidden temp file, persisting the record and publishing a
//! progress event at every step. The [`DownloadManager`] creates records,
//! launches one worker task per running download and routes
//! pause/resume/cancel calls to the worker's [`WorkerControl`].

pub mod config;
pub mod control;
pub mod err;
mod id;
pub mod manager;
pub mod metrics;
pub mod store;
pub mod types;
pub mod worker;

pub use config::DownloadConfig;
pub use control::{ControlState, WorkerControl};
pub use err::{ManagerError, Result, StoreError, TransferError};
pub use id::DownloadId;
pub use manager::{DownloadManager, WorkerRegistry};
pub use store::{DownloadStore, FileStore, MemoryStore, SettingsStore};
pub use types::{
    DEFAULT_PAGE_SIZE, Download, DownloadCategory, DownloadFilter, DownloadPage, DownloadStatus,
    MAX_PAGE_SIZE, PROGRESS_EVENT, ProgressEvent, Settings,
};
pub use worker::{DownloadWorker, WorkerOutcome};
