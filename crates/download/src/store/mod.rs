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

//! Persistence of download records and settings.
//!
//! The core only needs simple CRUD by id plus a few list queries, so the
//! traits stay small. [`MemoryStore`] backs tests and embedding;
//! [`FileStore`] keeps one JSON document per record on disk.

mod file;
mod memory;

use async_trait::async_trait;
pub use file::FileStore;
use jiff::Timestamp;
pub use memory::MemoryStore;

use crate::{
    err::StoreResult,
    id::DownloadId,
    types::{Download, DownloadFilter, DownloadPage, DownloadStatus, Settings},
};

#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Fails if a record with the same id exists.
    async fn create(&self, download: &Download) -> StoreResult<()>;

    async fn get(&self, id: DownloadId) -> StoreResult<Download>;

    /// Full replace of an existing record.
    async fn update(&self, download: &Download) -> StoreResult<()>;

    async fn update_status(&self, id: DownloadId, status: DownloadStatus) -> StoreResult<()> {
        let mut download = self.get(id).await?;
        download.status = status;
        download.updated_at = Timestamp::now();
        self.update(&download).await
    }

    async fn update_progress(
        &self,
        id: DownloadId,
        progress: f64,
        downloaded_bytes: u64,
        speed: Option<f64>,
    ) -> StoreResult<()> {
        let mut download = self.get(id).await?;
        download.progress = progress;
        download.downloaded_bytes = downloaded_bytes;
        download.speed = speed;
        download.updated_at = Timestamp::now();
        self.update(&download).await
    }

    /// Non-archived records matching `filter`, newest first.
    async fn list(&self, filter: &DownloadFilter) -> StoreResult<DownloadPage>;

    /// Records in one of [`DownloadStatus::ACTIVE`].
    async fn list_active(&self) -> StoreResult<Vec<Download>>;

    async fn delete(&self, id: DownloadId) -> StoreResult<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self) -> StoreResult<Settings>;

    async fn update_settings(&self, settings: &Settings) -> StoreResult<()>;
}

/// Applies filter, ordering and pagination to a full record set.
pub(crate) fn paginate(
    records: impl IntoIterator<Item = Download>,
    filter: &DownloadFilter,
) -> DownloadPage {
    let filter = filter.clone().normalized();
    let mut matching: Vec<_> = records.into_iter().filter(|d| filter.matches(d)).collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = matching.len();
    let items = matching
        .into_iter()
        .skip((filter.page - 1).saturating_mul(filter.limit))
        .take(filter.limit)
        .collect();
    DownloadPage {
        items,
        total,
        page: filter.page,
        limit: filter.limit,
        total_pages: total.div_ceil(filter.limit),
    }
}
