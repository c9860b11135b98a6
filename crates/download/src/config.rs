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

use std::{path::PathBuf, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Configuration for download workers
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root holding one sub-directory per category
    #[default(PathBuf::from("downloads"))]
    #[builder(default = PathBuf::from("downloads"), into)]
    pub download_dir: PathBuf,

    /// Bytes read from the body per loop iteration (default: 64KiB)
    #[default = 65536]
    #[builder(default = 65536)]
    pub chunk_size: usize,

    /// Cadence of speed samples, each of which persists and notifies
    #[default(Duration::from_millis(500))]
    #[builder(default = Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub speed_interval: Duration,

    /// Upper bound on one wait of a paused worker before re-checking its flag
    #[default(Duration::from_millis(100))]
    #[builder(default = Duration::from_millis(100))]
    #[serde(with = "humantime_serde")]
    pub pause_poll_interval: Duration,

    /// Assumed validity of a direct-download link
    #[default(Duration::from_secs(300))]
    #[builder(default = Duration::from_secs(300))]
    #[serde(with = "humantime_serde")]
    pub token_validity: Duration,

    /// How long shutdown waits for workers to flush
    #[default(Duration::from_secs(10))]
    #[builder(default = Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}
