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

mod common;

use std::{path::Path, sync::Arc};

use common::{ScriptedRemote, broadcaster, download_config, keyed_store, movie, wait_for, wait_until};
use dlhub_common_broadcast::{Broadcaster, Subscription};
use dlhub_download::{
    ControlState, Download, DownloadStatus, DownloadStore, DownloadWorker, MemoryStore,
    ProgressEvent, WorkerControl, WorkerOutcome,
};
use tokio_util::sync::CancellationToken;

struct Fixture {
    dir:         tempfile::TempDir,
    remote:      Arc<ScriptedRemote>,
    store:       Arc<MemoryStore>,
    broadcaster: Arc<Broadcaster>,
}

impl Fixture {
    fn new(remote: ScriptedRemote) -> Self {
        Self {
            dir:         tempfile::tempdir().unwrap(),
            remote:      Arc::new(remote),
            store:       keyed_store(),
            broadcaster: broadcaster(),
        }
    }

    fn root(&self) -> &Path { self.dir.path() }

    fn temp_path(&self) -> std::path::PathBuf { self.root().join("movies").join(".a.mkv.tmp") }

    fn final_path(&self) -> std::path::PathBuf { self.root().join("movies").join("a.mkv") }

    async fn worker(&self, download: &Download, control: WorkerControl) -> Arc<DownloadWorker> {
        self.store.create(download).await.unwrap();
        Arc::new(DownloadWorker::new(
            download.clone(),
            control,
            self.remote.clone(),
            self.store.clone(),
            self.broadcaster.clone(),
            Arc::new(download_config(self.root())),
        ))
    }

    fn seed_temp(&self, len: usize) {
        std::fs::create_dir_all(self.root().join("movies")).unwrap();
        std::fs::write(self.temp_path(), &self.remote.content[..len]).unwrap();
    }
}

fn running() -> WorkerControl { WorkerControl::new(CancellationToken::new()) }

fn resumable(downloaded: u64) -> Download {
    let mut download = movie();
    download.file_name = "a.mkv".to_string();
    download.file_size = Some(1000);
    download.downloaded_bytes = downloaded;
    download.status = DownloadStatus::Paused;
    download
}

/// Drains a subscription after the broadcaster was closed.
async fn statuses(mut events: Subscription) -> Vec<DownloadStatus> {
    let mut statuses = Vec::new();
    while let Some(event) = events.recv().await {
        assert_eq!(event.event, "progress");
        let progress: ProgressEvent = serde_json::from_str(&event.data).unwrap();
        statuses.push(progress.status);
    }
    statuses.dedup();
    statuses
}

#[tokio::test]
async fn completes_two_chunk_transfer() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 500));
    let events = fx.broadcaster.subscribe().unwrap();
    let download = movie();
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Completed);

    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Completed);
    assert!((stored.progress - 100.0).abs() < f64::EPSILON);
    assert_eq!(stored.downloaded_bytes, 1000);
    assert_eq!(stored.file_size, Some(1000));
    assert_eq!(stored.checksum.as_deref(), Some("x"));
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
    assert!(stored.direct_url_expires_at.is_some());

    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
    assert!(!fx.temp_path().exists());
    assert_eq!(fx.remote.offsets(), vec![0]);

    fx.broadcaster.close().unwrap();
    assert_eq!(statuses(events).await, vec![
        DownloadStatus::RequestingInfos,
        DownloadStatus::RequestingToken,
        DownloadStatus::Downloading,
        DownloadStatus::Completed,
    ]);
}

#[tokio::test]
async fn pause_then_resume_reissues_range_from_offset() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 400));
    let control = running();
    {
        let control = control.clone();
        fx.remote.on_first_chunk(move || {
            control.pause();
        });
    }
    let download = movie();
    let worker = fx.worker(&download, control.clone()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    let paused = wait_for(fx.store.as_ref(), download.id, |d| {
        d.status == DownloadStatus::Paused
    })
    .await;
    assert_eq!(paused.downloaded_bytes, 400);
    assert_eq!(std::fs::metadata(fx.temp_path()).unwrap().len(), 400);

    assert!(control.resume());
    assert_eq!(handle.await.unwrap(), WorkerOutcome::Completed);

    assert_eq!(fx.remote.offsets(), vec![0, 400]);
    assert_eq!(worker.snapshot().downloaded_bytes, 1000);
    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
}

#[tokio::test]
async fn metadata_failure_records_failed_without_temp_file() {
    let mut remote = ScriptedRemote::new(1000, 500);
    remote.fail_info = true;
    let fx = Fixture::new(remote);
    let events = fx.broadcaster.subscribe().unwrap();
    let download = movie();
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Failed);

    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(
        stored
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("failed to get file info")
    );
    assert!(!fx.root().join("movies").exists());
    assert!(fx.remote.offsets().is_empty());

    fx.broadcaster.close().unwrap();
    assert_eq!(statuses(events).await, vec![
        DownloadStatus::RequestingInfos,
        DownloadStatus::Failed,
    ]);
}

#[tokio::test]
async fn size_mismatch_fails_and_discards_temp_file() {
    let mut remote = ScriptedRemote::new(1000, 500);
    remote.declared_size = 2000;
    let fx = Fixture::new(remote);
    let download = movie();
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Failed);

    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Failed);
    assert!(stored.error_message.unwrap().contains("size mismatch"));
    assert!(!fx.temp_path().exists());
    assert!(!fx.final_path().exists());
}

#[tokio::test]
async fn resumes_from_matching_temp_file() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 300));
    fx.seed_temp(400);
    let download = resumable(400);
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Completed);
    assert_eq!(fx.remote.offsets(), vec![400]);
    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
}

#[tokio::test]
async fn restarts_when_temp_file_disagrees_with_record() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 300));
    fx.seed_temp(250);
    let download = resumable(400);
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Completed);
    assert_eq!(fx.remote.offsets(), vec![0]);
    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
}

#[tokio::test]
async fn full_response_to_ranged_request_restarts_from_zero() {
    let mut remote = ScriptedRemote::new(1000, 300);
    remote.honor_range = false;
    let fx = Fixture::new(remote);
    fx.seed_temp(400);
    let download = resumable(400);
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Completed);
    assert_eq!(fx.remote.offsets(), vec![400]);
    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
    assert_eq!(worker.snapshot().downloaded_bytes, 1000);
}

#[tokio::test]
async fn cancel_interrupts_read_and_cleans_up() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 500));
    fx.remote.set_stall(true);
    let control = running();
    let download = movie();
    let worker = fx.worker(&download, control.clone()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    wait_until(|| worker.snapshot().downloaded_bytes == 1000).await;
    assert!(fx.temp_path().exists());

    assert!(control.cancel());
    assert!(!control.cancel());
    assert_eq!(handle.await.unwrap(), WorkerOutcome::Cancelled);

    assert_eq!(control.state(), ControlState::Cancelled);
    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Cancelled);
    assert_eq!(stored.error_message, None);
    assert_eq!(stored.retry_count, 0);
    assert!(!fx.temp_path().exists());
    assert!(!fx.final_path().exists());
}

#[tokio::test]
async fn shutdown_leaves_paused_record_and_temp_file() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 500));
    fx.remote.set_stall(true);
    let parent = CancellationToken::new();
    let control = WorkerControl::new(parent.child_token());
    let download = movie();
    let worker = fx.worker(&download, control.clone()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    wait_until(|| worker.snapshot().downloaded_bytes == 1000).await;
    parent.cancel();
    assert_eq!(handle.await.unwrap(), WorkerOutcome::Interrupted);

    assert_eq!(control.state(), ControlState::Running);
    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Paused);
    assert_eq!(stored.downloaded_bytes, 1000);
    assert_eq!(std::fs::metadata(fx.temp_path()).unwrap().len(), 1000);
    assert!(!fx.final_path().exists());
}

#[tokio::test]
async fn resume_with_every_byte_on_disk_finalizes_without_request() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 500));
    fx.seed_temp(1000);
    let download = resumable(1000);
    let worker = fx.worker(&download, running()).await;

    assert_eq!(worker.run().await, WorkerOutcome::Completed);

    assert!(fx.remote.offsets().is_empty());
    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Completed);
    assert_eq!(stored.downloaded_bytes, 1000);
    assert_eq!(std::fs::read(fx.final_path()).unwrap(), fx.remote.content);
    assert!(!fx.temp_path().exists());
}

#[tokio::test]
async fn cancel_while_paused_removes_temp_file() {
    let fx = Fixture::new(ScriptedRemote::new(1000, 400));
    let events = fx.broadcaster.subscribe().unwrap();
    let control = running();
    {
        let control = control.clone();
        fx.remote.on_first_chunk(move || {
            control.pause();
        });
    }
    let download = movie();
    let worker = fx.worker(&download, control.clone()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    wait_for(fx.store.as_ref(), download.id, |d| {
        d.status == DownloadStatus::Paused
    })
    .await;
    assert!(fx.temp_path().exists());

    assert!(control.cancel());
    assert_eq!(handle.await.unwrap(), WorkerOutcome::Cancelled);

    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Cancelled);
    assert_eq!(stored.retry_count, 0);
    assert!(!fx.temp_path().exists());
    assert!(!fx.final_path().exists());
    assert_eq!(fx.remote.offsets(), vec![0]);

    fx.broadcaster.close().unwrap();
    let seen = statuses(events).await;
    assert_eq!(&seen[seen.len() - 2..], &[
        DownloadStatus::Paused,
        DownloadStatus::Cancelled,
    ]);
}

#[tokio::test]
async fn cancel_during_metadata_leaves_nothing_behind() {
    let mut remote = ScriptedRemote::new(1000, 500);
    remote.info_delay = std::time::Duration::from_secs(30);
    let fx = Fixture::new(remote);
    let control = running();
    let download = movie();
    let worker = fx.worker(&download, control.clone()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    wait_for(fx.store.as_ref(), download.id, |d| {
        d.status == DownloadStatus::RequestingInfos
    })
    .await;
    assert!(control.cancel());
    assert_eq!(handle.await.unwrap(), WorkerOutcome::Cancelled);

    let stored = fx.store.get(download.id).await.unwrap();
    assert_eq!(stored.status, DownloadStatus::Cancelled);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.error_message, None);
    assert!(!fx.root().join("movies").exists());
    assert!(fx.remote.offsets().is_empty());
}

#[tokio::test]
async fn speed_samples_are_persisted_while_downloading() {
    let mut remote = ScriptedRemote::new(1000, 100);
    remote.chunk_delay = std::time::Duration::from_millis(20);
    let fx = Fixture::new(remote);
    let download = movie();
    let worker = fx.worker(&download, running()).await;
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    let sampled = wait_for(fx.store.as_ref(), download.id, |d| {
        d.status == DownloadStatus::Downloading && d.speed.is_some_and(|s| s > 0.0)
    })
    .await;
    assert!(sampled.downloaded_bytes > 0);

    assert_eq!(handle.await.unwrap(), WorkerOutcome::Completed);
}
