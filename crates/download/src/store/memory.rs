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

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use snafu::ensure;

use super::{DownloadStore, SettingsStore, paginate};
use crate::{
    err::{RecordExistsSnafu, RecordNotFoundSnafu, StoreResult},
    id::DownloadId,
    types::{Download, DownloadFilter, DownloadPage, Settings},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    downloads: RwLock<HashMap<DownloadId, Download>>,
    settings:  RwLock<Settings>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            downloads: RwLock::default(),
            settings:  RwLock::new(settings),
        }
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn create(&self, download: &Download) -> StoreResult<()> {
        let mut downloads = self.downloads.write();
        ensure!(
            !downloads.contains_key(&download.id),
            RecordExistsSnafu { id: download.id }
        );
        downloads.insert(download.id, download.clone());
        Ok(())
    }

    async fn get(&self, id: DownloadId) -> StoreResult<Download> {
        self.downloads
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| RecordNotFoundSnafu { id }.build())
    }

    async fn update(&self, download: &Download) -> StoreResult<()> {
        let mut downloads = self.downloads.write();
        let slot = downloads
            .get_mut(&download.id)
            .ok_or_else(|| RecordNotFoundSnafu { id: download.id }.build())?;
        *slot = download.clone();
        Ok(())
    }

    async fn list(&self, filter: &DownloadFilter) -> StoreResult<DownloadPage> {
        let records: Vec<_> = self.downloads.read().values().cloned().collect();
        Ok(paginate(records, filter))
    }

    async fn list_active(&self) -> StoreResult<Vec<Download>> {
        Ok(self
            .downloads
            .read()
            .values()
            .filter(|d| d.status.is_active())
            .cloned()
            .collect())
    }

    async fn delete(&self, id: DownloadId) -> StoreResult<()> {
        self.downloads
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RecordNotFoundSnafu { id }.build())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_settings(&self) -> StoreResult<Settings> { Ok(self.settings.read().clone()) }

    async fn update_settings(&self, settings: &Settings) -> StoreResult<()> {
        *self.settings.write() = settings.clone();
        Ok(())
    }
}
