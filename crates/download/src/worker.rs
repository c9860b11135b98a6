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
    future::Future,
    io::{ErrorKind, SeekFrom},
    path::Path,
    sync::Arc,
    time::Instant,
};

use dlhub_common_broadcast::Broadcaster;
use dlhub_remote::{RemoteBody, RemoteFileService};
use jiff::Timestamp;
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::DownloadConfig,
    control::{ControlState, WorkerControl},
    err::{
        CreateDirSnafu, DownloadTokenSnafu, FileInfoSnafu, FinalizeSnafu, InterruptedSnafu,
        MissingDirectUrlSnafu, MissingFileNameSnafu, OpenTempFileSnafu, OpenTransferSnafu,
        ReadBodySnafu, SizeMismatchSnafu, TransferError, WriteFileSnafu,
    },
    id::DownloadId,
    metrics::{BYTES_TRANSFERRED, DOWNLOADS_CANCELLED, DOWNLOADS_COMPLETED, DOWNLOADS_FAILED},
    store::DownloadStore,
    types::{Download, DownloadStatus, PROGRESS_EVENT},
};

type TransferResult<T> = std::result::Result<T, TransferError>;
type TempFile = BufWriter<File>;

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Stopped by shutdown. The record is PAUSED and the temp file kept.
    Interrupted,
}

/// Result of streaming one response body.
enum BodyOutcome {
    EndOfStream,
    Paused,
}

/// Owns one download from metadata resolution to the final rename.
///
/// The record is mutated only by [`DownloadWorker::run`]; the mutex exists so
/// handlers can take consistent snapshots while it runs.
pub struct DownloadWorker {
    id:          DownloadId,
    download:    Mutex<Download>,
    control:     WorkerControl,
    client:      Arc<dyn RemoteFileService>,
    store:       Arc<dyn DownloadStore>,
    broadcaster: Arc<Broadcaster>,
    config:      Arc<DownloadConfig>,
    done:        CancellationToken,
}

impl std::fmt::Debug for DownloadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadWorker")
            .field("id", &self.id)
            .field("control", &self.control.state())
            .finish_non_exhaustive()
    }
}

impl DownloadWorker {
    pub fn new(
        download: Download,
        control: WorkerControl,
        client: Arc<dyn RemoteFileService>,
        store: Arc<dyn DownloadStore>,
        broadcaster: Arc<Broadcaster>,
        config: Arc<DownloadConfig>,
    ) -> Self {
        Self {
            id: download.id,
            download: Mutex::new(download),
            control,
            client,
            store,
            broadcaster,
            config,
            done: CancellationToken::new(),
        }
    }

    pub const fn id(&self) -> DownloadId { self.id }

    pub const fn control(&self) -> &WorkerControl { &self.control }

    pub fn snapshot(&self) -> Download { self.download.lock().clone() }

    /// Resolves once the run has settled the record.
    pub async fn finished(&self) { self.done.cancelled().await }

    pub(crate) fn mark_finished(&self) { self.done.cancel() }

    pub fn pause(&self) {
        if self.control.pause() {
            info!(download_id = %self.id, "pause requested");
        }
    }

    pub fn resume(&self) {
        if self.control.resume() {
            info!(download_id = %self.id, "resume requested");
        }
    }

    pub fn cancel(&self) {
        if self.control.cancel() {
            info!(download_id = %self.id, "cancel requested");
        }
    }

    /// Runs the three steps and settles the record exactly once.
    pub async fn run(&self) -> WorkerOutcome {
        let result = async {
            self.resolve_metadata().await?;
            self.resolve_token().await?;
            self.transfer().await?;
            self.finalize().await
        }
        .await;

        match result {
            Ok(()) => WorkerOutcome::Completed,
            Err(_) if self.control.is_cancelled() => self.cancel_cleanup().await,
            Err(_) if self.control.token().is_cancelled() => self.interrupt().await,
            Err(e) => self.fail(e).await,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Download) -> R) -> R { f(&mut self.download.lock()) }

    fn set_status(&self, status: DownloadStatus) { self.update(|d| d.status = status) }

    /// Stores the full record and publishes a progress event.
    async fn persist(&self) {
        let snapshot = self.update(|d| {
            d.updated_at = Timestamp::now();
            d.clone()
        });
        if let Err(e) = self.store.update(&snapshot).await {
            error!(download_id = %self.id, error = %e, "failed to persist download");
        }
        self.publish(&snapshot).await;
    }

    /// Stores only the progress columns and publishes a progress event.
    async fn persist_progress(&self) {
        let snapshot = self.update(|d| {
            d.updated_at = Timestamp::now();
            d.clone()
        });
        if let Err(e) = self
            .store
            .update_progress(
                self.id,
                snapshot.progress,
                snapshot.downloaded_bytes,
                snapshot.speed,
            )
            .await
        {
            error!(download_id = %self.id, error = %e, "failed to persist progress");
        }
        self.publish(&snapshot).await;
    }

    async fn publish(&self, snapshot: &Download) {
        if let Err(e) = self
            .broadcaster
            .publish(PROGRESS_EVENT, &snapshot.progress_event())
            .await
        {
            warn!(download_id = %self.id, error = %e, "failed to publish progress");
        }
    }

    /// Races `fut` against the cancellation token.
    async fn guarded<T>(&self, fut: impl Future<Output = T>) -> TransferResult<T> {
        tokio::select! {
            biased;
            () = self.control.token().cancelled() => InterruptedSnafu.fail(),
            out = fut => Ok(out),
        }
    }

    async fn resolve_metadata(&self) -> TransferResult<()> {
        self.set_status(DownloadStatus::RequestingInfos);
        self.persist().await;

        let url = self.update(|d| d.file_url.clone());
        let info = self
            .guarded(self.client.file_info(&url))
            .await?
            .context(FileInfoSnafu)?;

        self.update(|d| {
            d.file_name = info.filename;
            d.file_size = Some(info.size).filter(|s| *s > 0);
            d.checksum = Some(info.checksum).filter(|c| !c.is_empty());
            d.mime_type = Some(info.content_type).filter(|c| !c.is_empty());
            d.recompute_progress();
        });
        let named = self.update(|d| !d.display_name().is_empty());
        snafu::ensure!(named, MissingFileNameSnafu);
        self.persist().await;
        Ok(())
    }

    async fn resolve_token(&self) -> TransferResult<()> {
        self.set_status(DownloadStatus::RequestingToken);
        self.persist().await;

        let url = self.update(|d| d.file_url.clone());
        let token = self
            .guarded(self.client.download_token(&url))
            .await?
            .context(DownloadTokenSnafu)?;

        let validity = self.config.token_validity;
        self.update(|d| {
            d.direct_download_url = Some(token.url);
            d.direct_url_expires_at = Timestamp::now().checked_add(validity).ok();
        });
        self.persist().await;
        Ok(())
    }

    async fn transfer(&self) -> TransferResult<()> {
        self.update(|d| {
            d.status = DownloadStatus::Downloading;
            d.started_at.get_or_insert_with(Timestamp::now);
        });
        self.persist().await;

        let (direct_url, temp_path) = {
            let d = self.download.lock();
            (
                d.direct_download_url.clone().context(MissingDirectUrlSnafu)?,
                d.temp_file_path(&self.config.download_dir)
                    .context(MissingFileNameSnafu)?,
            )
        };

        let mut file = self.prepare_file(&temp_path).await?;
        let result = self.transfer_loop(&direct_url, &mut file).await;
        let synced = sync_file(&mut file).await;
        result?;
        synced
    }

    /// Opens the temp file positioned at the resume offset. A file whose size
    /// disagrees with the recorded byte count is discarded.
    async fn prepare_file(&self, path: &Path) -> TransferResult<TempFile> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(CreateDirSnafu { path: parent })?;
        }

        let recorded = self.update(|d| d.downloaded_bytes);
        let mut offset = 0;
        if recorded > 0 {
            let on_disk = fs::metadata(path).await.ok().map(|m| m.len());
            if on_disk == Some(recorded) {
                offset = recorded;
            } else {
                warn!(
                    download_id = %self.id,
                    recorded,
                    ?on_disk,
                    "temp file mismatch, restarting from zero"
                );
                self.update(|d| {
                    d.downloaded_bytes = 0;
                    d.recompute_progress();
                });
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .context(OpenTempFileSnafu { path })?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .context(OpenTempFileSnafu { path })?;
        } else {
            file.set_len(0).await.context(OpenTempFileSnafu { path })?;
        }
        Ok(BufWriter::with_capacity(self.config.chunk_size, file))
    }

    /// Streams bodies until end-of-stream, waiting out pauses in between.
    /// Every resume issues a fresh request from the current offset.
    async fn transfer_loop(&self, direct_url: &str, file: &mut TempFile) -> TransferResult<()> {
        loop {
            self.ensure_running()?;

            if self.control.is_paused() {
                file.flush().await.context(WriteFileSnafu)?;
                self.update(|d| {
                    d.status = DownloadStatus::Paused;
                    d.speed = None;
                });
                self.persist().await;
                debug!(download_id = %self.id, "paused, waiting for resume");

                let state = self
                    .control
                    .wait_while_paused(self.config.pause_poll_interval)
                    .await;
                if state == ControlState::Cancelled || self.control.token().is_cancelled() {
                    return InterruptedSnafu.fail();
                }

                self.set_status(DownloadStatus::Downloading);
                self.persist().await;
                debug!(download_id = %self.id, "resumed");
            }

            let complete = self.update(|d| {
                d.file_size
                    .is_some_and(|size| size > 0 && d.downloaded_bytes >= size)
            });
            if complete {
                debug!(download_id = %self.id, "all bytes already on disk");
                return Ok(());
            }

            match self.stream_body(direct_url, file).await? {
                BodyOutcome::EndOfStream => return Ok(()),
                BodyOutcome::Paused => {}
            }
        }
    }

    fn ensure_running(&self) -> TransferResult<()> {
        if self.control.is_cancelled() || self.control.token().is_cancelled() {
            return InterruptedSnafu.fail();
        }
        Ok(())
    }

    async fn stream_body(&self, direct_url: &str, file: &mut TempFile) -> TransferResult<BodyOutcome> {
        let offset = self.update(|d| d.downloaded_bytes);
        let body = self
            .guarded(self.client.open(direct_url, offset))
            .await?
            .context(OpenTransferSnafu)?;
        let RemoteBody {
            partial,
            content_length,
            mut reader,
        } = body;
        self.reconcile_total(offset, partial, content_length, file)
            .await?;

        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut last_sample = Instant::now();
        let mut last_bytes = self.update(|d| d.downloaded_bytes);

        loop {
            self.ensure_running()?;
            if self.control.is_paused() {
                debug!(download_id = %self.id, "pause observed between chunks");
                return Ok(BodyOutcome::Paused);
            }

            if last_sample.elapsed() >= self.config.speed_interval {
                self.sample_speed(&mut last_sample, &mut last_bytes, file)
                    .await?;
            }

            let read = tokio::select! {
                biased;
                () = self.control.token().cancelled() => return InterruptedSnafu.fail(),
                read = reader.read(&mut buf) => read.context(ReadBodySnafu)?,
            };

            if read == 0 {
                self.sample_speed(&mut last_sample, &mut last_bytes, file)
                    .await?;
                return Ok(BodyOutcome::EndOfStream);
            }

            file.write_all(&buf[..read])
                .await
                .context(WriteFileSnafu)?;
            BYTES_TRANSFERRED.inc_by(read as u64);
            self.update(|d| {
                d.downloaded_bytes += read as u64;
                d.recompute_progress();
            });
        }
    }

    /// Settles the total size for this response. A server answering a ranged
    /// request with the full body cannot resume, so the offset and the temp
    /// file go back to zero.
    async fn reconcile_total(
        &self,
        offset: u64,
        partial: bool,
        content_length: Option<u64>,
        file: &mut TempFile,
    ) -> TransferResult<()> {
        let mut offset = offset;
        if offset > 0 && !partial {
            warn!(download_id = %self.id, offset, "server rejected resume, restarting from zero");
            file.flush().await.context(WriteFileSnafu)?;
            file.get_mut().set_len(0).await.context(WriteFileSnafu)?;
            file.seek(SeekFrom::Start(0)).await.context(WriteFileSnafu)?;
            offset = 0;
            self.update(|d| d.downloaded_bytes = 0);
        }

        let length = content_length.unwrap_or(0);
        self.update(|d| {
            if d.file_size.is_none_or(|s| s == 0) {
                let total = if partial { offset + length } else { length };
                d.file_size = Some(total).filter(|t| *t > 0);
            }
            d.recompute_progress();
        });
        Ok(())
    }

    async fn sample_speed(
        &self,
        last_sample: &mut Instant,
        last_bytes: &mut u64,
        file: &mut TempFile,
    ) -> TransferResult<()> {
        let elapsed = last_sample.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Ok(());
        }
        file.flush().await.context(WriteFileSnafu)?;

        let current = self.update(|d| d.downloaded_bytes);
        let speed = current.saturating_sub(*last_bytes) as f64 / elapsed;
        self.update(|d| d.speed = Some(speed));
        self.persist_progress().await;

        *last_sample = Instant::now();
        *last_bytes = current;
        Ok(())
    }

    /// Checks the byte count and renames the temp file over the final path.
    async fn finalize(&self) -> TransferResult<()> {
        let (temp_path, final_path, expected, actual) = {
            let d = self.download.lock();
            let root = &self.config.download_dir;
            (
                d.temp_file_path(root).context(MissingFileNameSnafu)?,
                d.final_file_path(root).context(MissingFileNameSnafu)?,
                d.file_size,
                d.downloaded_bytes,
            )
        };

        if let Some(expected) = expected.filter(|s| *s > 0) {
            snafu::ensure!(expected == actual, SizeMismatchSnafu { expected, actual });
        }

        remove_if_exists(&final_path)
            .await
            .context(FinalizeSnafu { path: &final_path })?;
        fs::rename(&temp_path, &final_path)
            .await
            .context(FinalizeSnafu { path: &final_path })?;

        self.update(|d| {
            d.status = DownloadStatus::Completed;
            d.progress = 100.0;
            d.completed_at = Some(Timestamp::now());
            d.error_message = None;
            if d.file_size.is_none() {
                d.file_size = Some(d.downloaded_bytes);
            }
        });
        self.persist().await;
        DOWNLOADS_COMPLETED.inc();
        info!(download_id = %self.id, path = %final_path.display(), "download completed");
        Ok(())
    }

    /// Records `err` as the failure of this run.
    pub(crate) async fn fail(&self, err: TransferError) -> WorkerOutcome {
        if err.is_corruption() {
            self.remove_temp_file().await;
        }
        let message = err.to_string();
        self.update(|d| {
            d.status = DownloadStatus::Failed;
            d.error_message = Some(message);
            d.retry_count += 1;
            d.speed = None;
        });
        self.persist().await;
        DOWNLOADS_FAILED.inc();
        error!(download_id = %self.id, error = %err, "download failed");
        WorkerOutcome::Failed
    }

    async fn cancel_cleanup(&self) -> WorkerOutcome {
        self.remove_temp_file().await;
        self.update(|d| {
            d.status = DownloadStatus::Cancelled;
            d.speed = None;
        });
        self.persist().await;
        DOWNLOADS_CANCELLED.inc();
        info!(download_id = %self.id, "download cancelled");
        WorkerOutcome::Cancelled
    }

    async fn interrupt(&self) -> WorkerOutcome {
        self.update(|d| {
            d.status = DownloadStatus::Paused;
            d.speed = None;
        });
        self.persist().await;
        info!(download_id = %self.id, "download interrupted by shutdown");
        WorkerOutcome::Interrupted
    }

    async fn remove_temp_file(&self) {
        let temp_path = self.update(|d| d.temp_file_path(&self.config.download_dir));
        if let Some(path) = temp_path {
            if let Err(e) = remove_if_exists(&path).await {
                warn!(download_id = %self.id, path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

async fn sync_file(file: &mut TempFile) -> TransferResult<()> {
    file.flush().await.context(WriteFileSnafu)?;
    file.get_mut().sync_all().await.context(WriteFileSnafu)
}

pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
