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

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Settings for one broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Channel name, used in log lines.
    #[default = "downloads"]
    #[builder(default = "downloads".to_string(), into)]
    pub name: String,

    /// Capacity of each subscriber queue.
    #[default = 10]
    #[builder(default = 10)]
    pub buffer_size: usize,

    /// Interval between keep-alive comments. Zero disables heartbeats.
    #[default(Duration::from_secs(15))]
    #[builder(default = Duration::from_secs(15))]
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Longest a publish waits on a single full queue.
    #[default(Duration::from_secs(1))]
    #[builder(default = Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}
