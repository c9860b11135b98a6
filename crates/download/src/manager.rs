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
    any::Any,
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bon::bon;
use dlhub_common_broadcast::Broadcaster;
use dlhub_remote::ClientFactory;
use jiff::Timestamp;
use parking_lot::RwLock;
use snafu::{OptionExt, ResultExt, ensure};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    config::DownloadConfig,
    control::WorkerControl,
    err::{
        AlreadyRunningSnafu, ClientSnafu, InvalidStateSnafu, MissingCredentialSnafu,
        NotFoundSnafu, RemoveFileSnafu, Result, ShuttingDownSnafu, TransferError,
    },
    id::DownloadId,
    metrics::{ACTIVE_WORKERS, DOWNLOADS_STARTED},
    store::{DownloadStore, SettingsStore},
    types::{Download, DownloadCategory, DownloadFilter, DownloadPage, DownloadStatus, Settings},
    worker::{DownloadWorker, remove_if_exists},
};

/// Live workers keyed by download id.
///
/// An entry is inserted once when its worker starts and removed once when the
/// run settles. Lookups racing with removal see the worker or nothing.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<DownloadId, Arc<DownloadWorker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self { Self::default() }

    /// Returns `false` if a worker is already registered under the same id.
    pub fn insert(&self, worker: Arc<DownloadWorker>) -> bool {
        let mut workers = self.workers.write();
        if workers.contains_key(&worker.id()) {
            return false;
        }
        workers.insert(worker.id(), worker);
        true
    }

    pub fn get(&self, id: DownloadId) -> Option<Arc<DownloadWorker>> {
        self.workers.read().get(&id).cloned()
    }

    /// Removes `worker` only if it is still the registered entry.
    pub fn remove(&self, worker: &Arc<DownloadWorker>) -> bool {
        let mut workers = self.workers.write();
        match workers.get(&worker.id()) {
            Some(current) if Arc::ptr_eq(current, worker) => {
                workers.remove(&worker.id());
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: DownloadId) -> bool { self.workers.read().contains_key(&id) }

    pub fn len(&self) -> usize { self.workers.read().len() }

    pub fn is_empty(&self) -> bool { self.workers.read().is_empty() }

    pub fn ids(&self) -> Vec<DownloadId> { self.workers.read().keys().copied().collect() }
}

/// Owns the lifecycle of every download: creation, worker supervision,
/// control, and cleanup.
pub struct DownloadManager {
    store:         Arc<dyn DownloadStore>,
    settings:      Arc<dyn SettingsStore>,
    clients:       Arc<dyn ClientFactory>,
    broadcaster:   Arc<Broadcaster>,
    config:        Arc<DownloadConfig>,
    registry:      Arc<WorkerRegistry>,
    shutdown:      CancellationToken,
    tracker:       TaskTracker,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("config", &self.config)
            .field("workers", &self.registry.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[bon]
impl DownloadManager {
    #[builder]
    pub fn new(
        store: Arc<dyn DownloadStore>,
        settings: Arc<dyn SettingsStore>,
        clients: Arc<dyn ClientFactory>,
        broadcaster: Arc<Broadcaster>,
        #[builder(default)] config: DownloadConfig,
        #[builder(default)] registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            store,
            settings,
            clients,
            broadcaster,
            config: Arc::new(config),
            registry,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        }
    }
}

impl DownloadManager {
    pub fn config(&self) -> &DownloadConfig { &self.config }

    pub fn registry(&self) -> &WorkerRegistry { &self.registry }

    pub fn is_shutting_down(&self) -> bool { self.shutting_down.load(Ordering::Acquire) }

    async fn credential(&self) -> Result<String> {
        let settings = self.settings.get_settings().await?;
        settings
            .credential()
            .map(ToOwned::to_owned)
            .context(MissingCredentialSnafu)
    }

    /// Creates a PENDING record for `url`, persists it and starts its worker.
    pub async fn create(
        &self,
        url: impl Into<String>,
        category: DownloadCategory,
        custom_file_dir: Option<String>,
        custom_file_name: Option<String>,
    ) -> Result<Download> {
        ensure!(!self.is_shutting_down(), ShuttingDownSnafu);
        self.credential().await?;

        let download = Download::new(url, category, custom_file_dir, custom_file_name);
        self.store.create(&download).await?;
        info!(download_id = %download.id, url = %download.file_url, "download created");

        let id = download.id;
        match self.start(download).await {
            Ok(started) => Ok(started),
            Err(e) => {
                self.mark_failed(id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Registers a worker for `download` and launches it. Returns without
    /// waiting for the transfer.
    pub async fn start(&self, download: Download) -> Result<Download> {
        ensure!(!self.is_shutting_down(), ShuttingDownSnafu);
        let id = download.id;
        ensure!(!self.registry.contains(id), AlreadyRunningSnafu { id });

        let api_key = self.credential().await?;
        let client = self.clients.build(&api_key).context(ClientSnafu)?;

        let worker = Arc::new(DownloadWorker::new(
            download,
            WorkerControl::new(self.shutdown.child_token()),
            client,
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.config),
        ));
        ensure!(
            self.registry.insert(Arc::clone(&worker)),
            AlreadyRunningSnafu { id }
        );

        let snapshot = worker.snapshot();
        self.spawn(worker);
        Ok(snapshot)
    }

    fn spawn(&self, worker: Arc<DownloadWorker>) {
        DOWNLOADS_STARTED.inc();
        ACTIVE_WORKERS.inc();
        let registry = Arc::clone(&self.registry);

        self.tracker.spawn(async move {
            let id = worker.id();
            debug!(download_id = %id, "worker started");

            let run = tokio::spawn({
                let worker = Arc::clone(&worker);
                async move { worker.run().await }
            });
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = if e.is_panic() {
                        panic_message(e.into_panic().as_ref())
                    } else {
                        e.to_string()
                    };
                    error!(download_id = %id, %message, "worker task aborted");
                    worker.fail(TransferError::Panicked { message }).await
                }
            };

            registry.remove(&worker);
            ACTIVE_WORKERS.dec();
            worker.mark_finished();
            debug!(download_id = %id, ?outcome, "worker finished");
        });
    }

    async fn mark_failed(&self, id: DownloadId, message: &str) {
        let result = async {
            let mut download = self.store.get(id).await?;
            download.status = DownloadStatus::Failed;
            download.error_message = Some(message.to_owned());
            download.retry_count += 1;
            download.updated_at = Timestamp::now();
            self.store.update(&download).await
        }
        .await;
        if let Err(e) = result {
            error!(download_id = %id, error = %e, "failed to record start failure");
        }
    }

    pub fn pause(&self, id: DownloadId) -> Result<()> {
        self.registry.get(id).context(NotFoundSnafu { id })?.pause();
        Ok(())
    }

    pub fn resume(&self, id: DownloadId) -> Result<()> {
        self.registry.get(id).context(NotFoundSnafu { id })?.resume();
        Ok(())
    }

    pub fn cancel(&self, id: DownloadId) -> Result<()> {
        self.registry.get(id).context(NotFoundSnafu { id })?.cancel();
        Ok(())
    }

    /// Relaunches a FAILED record, or a PAUSED one whose worker is gone.
    /// Transferred bytes are kept so the transfer resumes from the temp file.
    pub async fn retry(&self, id: DownloadId) -> Result<Download> {
        ensure!(!self.registry.contains(id), AlreadyRunningSnafu { id });

        let mut download = self.store.get(id).await?;
        ensure!(
            matches!(download.status, DownloadStatus::Failed | DownloadStatus::Paused),
            InvalidStateSnafu {
                id,
                status: download.status,
                action: "retry",
            }
        );

        download.status = DownloadStatus::Pending;
        download.error_message = None;
        download.speed = None;
        download.direct_download_url = None;
        download.direct_url_expires_at = None;
        download.updated_at = Timestamp::now();
        self.store.update(&download).await?;
        info!(download_id = %id, retry_count = download.retry_count, "retrying download");

        self.start(download).await
    }

    /// The live snapshot when a worker runs, else the stored record.
    pub async fn get(&self, id: DownloadId) -> Result<Download> {
        if let Some(worker) = self.registry.get(id) {
            return Ok(worker.snapshot());
        }
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, filter: &DownloadFilter) -> Result<DownloadPage> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<Download>> {
        let mut active = self.store.list_active().await?;
        for download in &mut active {
            if let Some(worker) = self.registry.get(download.id) {
                *download = worker.snapshot();
            }
        }
        Ok(active)
    }

    /// Hides a terminal record from listings.
    pub async fn archive(&self, id: DownloadId) -> Result<Download> {
        let mut download = self.get(id).await?;
        ensure!(
            download.status.is_terminal(),
            InvalidStateSnafu {
                id,
                status: download.status,
                action: "archive",
            }
        );
        download.is_archived = true;
        download.updated_at = Timestamp::now();
        self.store.update(&download).await?;
        Ok(download)
    }

    /// Cancels a running worker, then removes the files and the record.
    pub async fn delete(&self, id: DownloadId) -> Result<()> {
        if let Some(worker) = self.registry.get(id) {
            worker.cancel();
            if tokio::time::timeout(self.config.shutdown_timeout, worker.finished())
                .await
                .is_err()
            {
                warn!(download_id = %id, "worker did not settle before delete");
            }
        }

        let download = self.store.get(id).await?;
        let root = &self.config.download_dir;
        if download.status == DownloadStatus::Completed {
            if let Some(path) = download.final_file_path(root) {
                remove_if_exists(&path)
                    .await
                    .context(RemoveFileSnafu { path: &path })?;
            }
        }
        if let Some(path) = download.temp_file_path(root) {
            remove_if_exists(&path)
                .await
                .context(RemoveFileSnafu { path: &path })?;
        }

        self.store.delete(id).await?;
        info!(download_id = %id, "download deleted");
        Ok(())
    }

    /// Relaunches records a previous process left in an active status.
    /// Returns how many workers were started.
    pub async fn recover(&self) -> Result<usize> {
        let orphaned: Vec<_> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|d| !self.registry.contains(d.id))
            .collect();
        if orphaned.is_empty() {
            return Ok(0);
        }
        if self.credential().await.is_err() {
            warn!(count = orphaned.len(), "cannot recover downloads without an API key");
            return Ok(0);
        }

        let mut started = 0;
        for download in orphaned {
            let id = download.id;
            match self.start(download).await {
                Ok(_) => started += 1,
                Err(e) => error!(download_id = %id, error = %e, "failed to recover download"),
            }
        }
        info!(started, "recovered interrupted downloads");
        Ok(started)
    }

    pub async fn settings(&self) -> Result<Settings> { Ok(self.settings.get_settings().await?) }

    pub async fn update_settings(&self, settings: Settings) -> Result<Settings> {
        self.settings.update_settings(&settings).await?;
        info!(api_key_set = settings.credential().is_some(), "settings updated");
        Ok(settings)
    }

    /// Interrupts every worker without cancelling its download. Interrupted
    /// records end up PAUSED with their temp files kept. Returns whether all
    /// workers settled within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return self.tracker.is_empty();
        }
        info!(workers = self.registry.len(), "shutting down download manager");
        self.shutdown.cancel();
        self.tracker.close();

        let settled = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !settled {
            warn!(remaining = self.tracker.len(), "workers still running after shutdown timeout");
        }
        settled
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
