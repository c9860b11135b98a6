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

//! Scripted remote service and fixtures shared by the integration suites.

#![allow(dead_code)]

use std::{
    io,
    path::Path,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dlhub_common_broadcast::{BroadcastConfig, Broadcaster};
use dlhub_download::{
    Download, DownloadCategory, DownloadConfig, DownloadId, DownloadStore, MemoryStore,
    Settings,
};
use dlhub_remote::{
    ClientFactory, DownloadToken, FileInfo, RemoteBody, RemoteError, RemoteFileService,
};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

pub const DIRECT_URL: &str = "https://cdn.example/a.mkv";
pub const FILE_URL: &str = "https://1fichier.com/?abc";

type Hook = Box<dyn FnOnce() + Send>;

/// Deterministic remote service serving `content` in fixed-size chunks.
pub struct ScriptedRemote {
    pub content:       Vec<u8>,
    pub chunk:         usize,
    pub declared_size: u64,
    pub filename:      String,
    pub fail_info:     bool,
    pub honor_range:   bool,
    pub panic_on_open: bool,
    /// Delay before the metadata call answers.
    pub info_delay:    Duration,
    /// Delay before every chunk after the first.
    pub chunk_delay:   Duration,
    /// Leaves the body open after the last chunk until cleared.
    pub stall:         AtomicBool,
    offsets:           Mutex<Vec<u64>>,
    first_chunk_hook:  Mutex<Option<Hook>>,
}

impl ScriptedRemote {
    pub fn new(len: usize, chunk: usize) -> Self {
        Self {
            content: (0..len).map(|i| (i % 251) as u8).collect(),
            chunk,
            declared_size: len as u64,
            filename: "a.mkv".to_string(),
            fail_info: false,
            honor_range: true,
            panic_on_open: false,
            info_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            stall: AtomicBool::new(false),
            offsets: Mutex::new(Vec::new()),
            first_chunk_hook: Mutex::new(None),
        }
    }

    pub fn offsets(&self) -> Vec<u64> { self.offsets.lock().clone() }

    /// Runs `hook` right before the first chunk of the next body is handed
    /// out.
    pub fn on_first_chunk(&self, hook: impl FnOnce() + Send + 'static) {
        *self.first_chunk_hook.lock() = Some(Box::new(hook));
    }

    pub fn set_stall(&self, stall: bool) { self.stall.store(stall, Ordering::SeqCst) }
}

#[async_trait]
impl RemoteFileService for ScriptedRemote {
    async fn file_info(&self, url: &str) -> Result<FileInfo, RemoteError> {
        if !self.info_delay.is_zero() {
            tokio::time::sleep(self.info_delay).await;
        }
        if self.fail_info {
            return Err(RemoteError::Http {
                status: 500,
                url:    url.to_string(),
            });
        }
        Ok(FileInfo {
            url:          url.to_string(),
            filename:     self.filename.clone(),
            size:         self.declared_size,
            checksum:     "x".to_string(),
            content_type: "video/x-matroska".to_string(),
        })
    }

    async fn download_token(&self, _url: &str) -> Result<DownloadToken, RemoteError> {
        Ok(DownloadToken {
            url:     DIRECT_URL.to_string(),
            status:  "OK".to_string(),
            message: None,
        })
    }

    async fn open(&self, direct_url: &str, offset: u64) -> Result<RemoteBody, RemoteError> {
        assert!(!self.panic_on_open, "scripted panic");
        self.offsets.lock().push(offset);
        if self.honor_range && offset > 0 && offset >= self.content.len() as u64 {
            return Err(RemoteError::Http {
                status: 416,
                url:    direct_url.to_string(),
            });
        }

        let partial = self.honor_range && offset > 0;
        let start = if partial { offset as usize } else { 0 };
        let body = self.content[start.min(self.content.len())..].to_vec();
        let content_length = body.len() as u64;

        let mut chunks: Vec<Bytes> = body
            .chunks(self.chunk.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        let first = if chunks.is_empty() {
            None
        } else {
            Some(chunks.remove(0))
        };

        let mut hook = self.first_chunk_hook.lock().take();
        let head = stream::iter(first).map(move |chunk| {
            if let Some(hook) = hook.take() {
                hook();
            }
            Ok::<_, io::Error>(chunk)
        });
        let delay = self.chunk_delay;
        let rest = if delay.is_zero() {
            stream::iter(chunks.into_iter().map(Ok::<_, io::Error>)).boxed()
        } else {
            stream::iter(chunks)
                .then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, io::Error>(chunk)
                })
                .boxed()
        };
        let reader: Pin<Box<dyn AsyncRead + Send>> = if self.stall.load(Ordering::SeqCst) {
            let tail = stream::pending::<io::Result<Bytes>>();
            Box::pin(StreamReader::new(head.chain(rest).chain(tail)))
        } else {
            Box::pin(StreamReader::new(head.chain(rest)))
        };

        Ok(RemoteBody {
            partial,
            content_length: Some(content_length),
            reader,
        })
    }
}

/// Hands out the same scripted remote for every key.
pub struct ScriptedFactory(pub Arc<ScriptedRemote>);

impl ClientFactory for ScriptedFactory {
    fn build(&self, _api_key: &str) -> Result<Arc<dyn RemoteFileService>, RemoteError> {
        Ok(Arc::clone(&self.0) as Arc<dyn RemoteFileService>)
    }
}

pub fn keyed_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_settings(Settings {
        api_key: Some("secret".to_string()),
    }))
}

pub fn broadcaster() -> Arc<Broadcaster> {
    Arc::new(Broadcaster::new(
        BroadcastConfig::builder()
            .buffer_size(256)
            .heartbeat_interval(Duration::ZERO)
            .build(),
    ))
}

pub fn download_config(root: &Path) -> DownloadConfig {
    DownloadConfig::builder()
        .download_dir(root)
        .speed_interval(Duration::from_millis(50))
        .pause_poll_interval(Duration::from_millis(10))
        .shutdown_timeout(Duration::from_secs(5))
        .build()
}

pub fn movie() -> Download { Download::new(FILE_URL, DownloadCategory::Movie, None, None) }

/// Polls the store until `check` accepts the record.
pub async fn wait_for(
    store: &dyn DownloadStore,
    id: DownloadId,
    check: impl Fn(&Download) -> bool,
) -> Download {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(download) = store.get(id).await {
                if check(&download) {
                    return download;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("record never reached the expected state")
}

/// Polls `check` until it holds.
pub async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
