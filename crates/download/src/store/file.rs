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
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, ensure};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use super::{DownloadStore, SettingsStore, paginate};
use crate::{
    err::{
        RecordExistsSnafu, RecordNotFoundSnafu, StoreError, StoreIoSnafu, StoreResult,
        StoreSerdeSnafu,
    },
    id::DownloadId,
    types::{Download, DownloadFilter, DownloadPage, Settings},
};

const DOWNLOADS_DIR: &str = "downloads";
const SETTINGS_FILE: &str = "settings.json";

/// Records as `<data_dir>/downloads/<id>.json`, settings as
/// `<data_dir>/settings.json`. Every write lands in a temp file first and is
/// renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = data_dir.into();
        let downloads = root.join(DOWNLOADS_DIR);
        fs::create_dir_all(&downloads)
            .await
            .context(StoreIoSnafu { path: &downloads })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn record_path(&self, id: DownloadId) -> PathBuf {
        self.root.join(DOWNLOADS_DIR).join(format!("{id}.json"))
    }

    fn settings_path(&self) -> PathBuf { self.root.join(SETTINGS_FILE) }

    async fn exists(path: &Path) -> StoreResult<bool> {
        fs::try_exists(path).await.context(StoreIoSnafu { path })
    }

    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value).context(StoreSerdeSnafu { path })?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes)
            .await
            .context(StoreIoSnafu { path: &tmp })?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).context(StoreIoSnafu { path });
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .context(StoreSerdeSnafu { path }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(StoreIoSnafu { path }),
        }
    }

    async fn load_all(&self) -> StoreResult<Vec<Download>> {
        let dir = self.root.join(DOWNLOADS_DIR);
        let mut entries = fs::read_dir(&dir)
            .await
            .context(StoreIoSnafu { path: &dir })?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(StoreIoSnafu { path: &dir })?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_json::<Download>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl DownloadStore for FileStore {
    async fn create(&self, download: &Download) -> StoreResult<()> {
        let path = self.record_path(download.id);
        ensure!(
            !Self::exists(&path).await?,
            RecordExistsSnafu { id: download.id }
        );
        Self::write_json(&path, download).await
    }

    async fn get(&self, id: DownloadId) -> StoreResult<Download> {
        Self::read_json(&self.record_path(id))
            .await?
            .ok_or_else(|| RecordNotFoundSnafu { id }.build())
    }

    async fn update(&self, download: &Download) -> StoreResult<()> {
        let path = self.record_path(download.id);
        ensure!(
            Self::exists(&path).await?,
            RecordNotFoundSnafu { id: download.id }
        );
        Self::write_json(&path, download).await
    }

    async fn list(&self, filter: &DownloadFilter) -> StoreResult<DownloadPage> {
        Ok(paginate(self.load_all().await?, filter))
    }

    async fn list_active(&self) -> StoreResult<Vec<Download>> {
        let mut records = self.load_all().await?;
        records.retain(|d| d.status.is_active());
        Ok(records)
    }

    async fn delete(&self, id: DownloadId) -> StoreResult<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => RecordNotFoundSnafu { id }.fail(),
            Err(e) => Err(StoreError::StoreIo { path, source: e }),
        }
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn get_settings(&self) -> StoreResult<Settings> {
        Ok(Self::read_json(&self.settings_path())
            .await?
            .unwrap_or_default())
    }

    async fn update_settings(&self, settings: &Settings) -> StoreResult<()> {
        Self::write_json(&self.settings_path(), settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DownloadCategory, DownloadStatus};

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let mut d = Download::new("u", DownloadCategory::Serie, Some("Show".into()), None);
        store.create(&d).await.unwrap();
        d.file_name = "a.mkv".into();
        d.status = DownloadStatus::Downloading;
        store.update(&d).await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(d.id).await.unwrap(), d);
        assert_eq!(reopened.list_active().await.unwrap(), vec![d.clone()]);

        reopened.delete(d.id).await.unwrap();
        assert!(matches!(
            reopened.get(d.id).await,
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let d = Download::new("u", DownloadCategory::Movie, None, None);
        assert!(matches!(
            store.update(&d).await,
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_documents_are_skipped_in_listings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let d = Download::new("u", DownloadCategory::Movie, None, None);
        store.create(&d).await.unwrap();
        fs::write(dir.path().join("downloads/broken.json"), b"{not json")
            .await
            .unwrap();

        let page = store.list(&DownloadFilter::default()).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn settings_default_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), Settings::default());

        let settings = Settings {
            api_key: Some("k".into()),
        };
        store.update_settings(&settings).await.unwrap();
        assert_eq!(store.get_settings().await.unwrap(), settings);
    }
}
