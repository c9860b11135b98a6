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

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// Token status the API returns on success.
pub const TOKEN_STATUS_OK: &str = "OK";

/// Metadata returned by the info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    pub url:          String,
    pub filename:     String,
    pub size:         u64,
    pub checksum:     String,
    #[serde(rename = "content-type")]
    pub content_type: String,
}

/// Direct-download link returned by the token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadToken {
    pub url:     String,
    pub status:  String,
    pub message: Option<String>,
}

impl DownloadToken {
    pub fn is_ok(&self) -> bool { self.status == TOKEN_STATUS_OK }
}

/// An opened transfer.
pub struct RemoteBody {
    /// Server answered 206, i.e. the requested offset was honored.
    pub partial:        bool,
    /// Length of this response body, not of the whole resource.
    pub content_length: Option<u64>,
    pub reader:         Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBody")
            .field("partial", &self.partial)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
