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

/// Configuration for the remote API client
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API root, without trailing slash
    #[default = "https://api.1fichier.com/v1"]
    #[builder(default = "https://api.1fichier.com/v1".to_string(), into)]
    pub base_url: String,

    /// Timeout for the metadata and token calls. Transfers are not bounded.
    #[default(Duration::from_secs(30))]
    #[builder(default = Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Custom User-Agent header
    #[builder(into)]
    pub user_agent: Option<String>,
}
