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

use derive_more::{Debug, Display, FromStr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a download record, fixed at creation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, FromStr, Serialize, Deserialize)]
#[debug("DownloadId({_0})")]
#[display("{_0}")]
#[serde(transparent)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for DownloadId {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_own_display() {
        let id = DownloadId::new();
        let parsed: DownloadId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<DownloadId>().is_err());
    }
}
