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

use std::path::{Component, Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::id::DownloadId;

/// Name of the event carrying a [`ProgressEvent`].
pub const PROGRESS_EVENT: &str = "progress";

/// Persisted lifecycle status of a download.
///
/// `PENDING → REQUESTING_INFOS → REQUESTING_TOKEN → DOWNLOADING ⇄ PAUSED →
/// COMPLETED`, with `FAILED` and `CANCELLED` reachable from any step.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Pending,
    RequestingInfos,
    RequestingToken,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Statuses a crashed process may have left behind mid-run.
    pub const ACTIVE: [Self; 4] = [
        Self::Pending,
        Self::RequestingInfos,
        Self::RequestingToken,
        Self::Downloading,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::RequestingInfos | Self::RequestingToken | Self::Downloading
        )
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadCategory {
    Movie,
    Serie,
}

impl DownloadCategory {
    pub const ALL: [Self; 2] = [Self::Movie, Self::Serie];

    /// Sub-directory of the download root holding this category.
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Movie => "movies",
            Self::Serie => "series",
        }
    }
}

/// One requested file and everything known about its transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    pub id:                    DownloadId,
    pub file_url:              String,
    #[serde(rename = "type")]
    pub category:              DownloadCategory,
    pub custom_file_dir:       Option<String>,
    pub custom_file_name:      Option<String>,

    pub file_name:             String,
    pub file_size:             Option<u64>,
    pub checksum:              Option<String>,
    pub mime_type:             Option<String>,

    pub direct_download_url:   Option<String>,
    pub direct_url_expires_at: Option<Timestamp>,

    pub status:                DownloadStatus,
    pub error_message:         Option<String>,
    pub retry_count:           u32,

    pub progress:              f64,
    pub downloaded_bytes:      u64,
    pub speed:                 Option<f64>,

    pub created_at:            Timestamp,
    pub started_at:            Option<Timestamp>,
    pub completed_at:          Option<Timestamp>,
    pub updated_at:            Timestamp,
    pub is_archived:           bool,
}

impl Download {
    pub fn new(
        file_url: impl Into<String>,
        category: DownloadCategory,
        custom_file_dir: Option<String>,
        custom_file_name: Option<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: DownloadId::new(),
            file_url: file_url.into(),
            category,
            custom_file_dir: custom_file_dir.filter(|d| !d.trim().is_empty()),
            custom_file_name: custom_file_name.filter(|n| !n.trim().is_empty()),
            file_name: String::new(),
            file_size: None,
            checksum: None,
            mime_type: None,
            direct_download_url: None,
            direct_url_expires_at: None,
            status: DownloadStatus::Pending,
            error_message: None,
            retry_count: 0,
            progress: 0.0,
            downloaded_bytes: 0,
            speed: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            is_archived: false,
        }
    }

    /// Name shown to users and used on disk: the custom name when set,
    /// otherwise the name resolved from the remote service.
    pub fn display_name(&self) -> &str {
        self.custom_file_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.file_name)
    }

    /// `<root>/<category>/<custom dir>`. Only plain components of the custom
    /// dir are kept so it cannot escape the category directory.
    pub fn target_dir(&self, root: &Path) -> PathBuf {
        let mut dir = root.join(self.category.dir_name());
        if let Some(custom) = self.custom_file_dir.as_deref() {
            for component in Path::new(custom).components() {
                if let Component::Normal(part) = component {
                    dir.push(part);
                }
            }
        }
        dir
    }

    fn file_component(&self) -> Option<&std::ffi::OsStr> {
        Path::new(self.display_name()).file_name()
    }

    /// Hidden `.<name>.tmp` next to the final file. `None` until a name is
    /// known.
    pub fn temp_file_path(&self, root: &Path) -> Option<PathBuf> {
        let name = self.file_component()?;
        let mut hidden = std::ffi::OsString::from(".");
        hidden.push(name);
        hidden.push(".tmp");
        Some(self.target_dir(root).join(hidden))
    }

    pub fn final_file_path(&self, root: &Path) -> Option<PathBuf> {
        let name = self.file_component()?;
        Some(self.target_dir(root).join(name))
    }

    /// `downloaded_bytes / file_size * 100`, or 0 when the size is unknown.
    pub fn recompute_progress(&mut self) {
        self.progress = match self.file_size {
            Some(size) if size > 0 => self.downloaded_bytes as f64 / size as f64 * 100.0,
            _ => 0.0,
        };
    }

    pub fn progress_event(&self) -> ProgressEvent {
        ProgressEvent {
            download_id:      self.id,
            file_name:        self.file_name.clone(),
            custom_file_dir:  self.custom_file_dir.clone(),
            custom_file_name: self.custom_file_name.clone(),
            status:           self.status,
            progress:         self.progress,
            downloaded_bytes: self.downloaded_bytes.to_string(),
            file_size:        self.file_size.map(|s| s.to_string()),
            speed:            self.speed,
        }
    }
}

/// Ephemeral progress notification. Byte counts travel as decimal strings so
/// clients never lose precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub download_id:      DownloadId,
    pub file_name:        String,
    pub custom_file_dir:  Option<String>,
    pub custom_file_name: Option<String>,
    pub status:           DownloadStatus,
    pub progress:         f64,
    pub downloaded_bytes: String,
    pub file_size:        Option<String>,
    pub speed:            Option<f64>,
}

/// Server-side settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: Option<String>,
}

impl Settings {
    /// The API key, if configured and not blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Listing query over non-archived records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadFilter {
    pub statuses:   Vec<DownloadStatus>,
    pub categories: Vec<DownloadCategory>,
    /// 1-based.
    pub page:       usize,
    pub limit:      usize,
}

impl DownloadFilter {
    /// Page below 1 becomes 1; a limit outside `1..=100` becomes 20.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        if !(1..=MAX_PAGE_SIZE).contains(&self.limit) {
            self.limit = DEFAULT_PAGE_SIZE;
        }
        self
    }

    pub fn matches(&self, download: &Download) -> bool {
        !download.is_archived
            && (self.statuses.is_empty() || self.statuses.contains(&download.status))
            && (self.categories.is_empty() || self.categories.contains(&download.category))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadPage {
    pub items:       Vec<Download>,
    pub total:       usize,
    pub page:        usize,
    pub limit:       usize,
    pub total_pages: usize,
}
