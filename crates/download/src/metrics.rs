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

use std::sync::LazyLock;

use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

pub static DOWNLOADS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("downloads_started_total", "Total number of workers launched").unwrap()
});

pub static DOWNLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("downloads_completed_total", "Total number of finished downloads")
        .unwrap()
});

pub static DOWNLOADS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("downloads_failed_total", "Total number of failed downloads").unwrap()
});

pub static DOWNLOADS_CANCELLED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("downloads_cancelled_total", "Total number of cancelled downloads")
        .unwrap()
});

pub static WORKER_PAUSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "download_worker_paused_total",
        "Total number of times workers were paused"
    )
    .unwrap()
});

pub static WORKER_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "download_worker_resumed_total",
        "Total number of times workers were resumed"
    )
    .unwrap()
});

pub static ACTIVE_WORKERS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("download_workers_active", "Number of registered download workers")
        .unwrap()
});

pub static BYTES_TRANSFERRED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "download_bytes_transferred_total",
        "Total number of bytes written to temp files"
    )
    .unwrap()
});
