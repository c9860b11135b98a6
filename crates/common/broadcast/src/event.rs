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

use std::{fmt::Write as _, time::Duration};

use bytes::Bytes;

/// Keep-alive comment frame written on idle streams.
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// One server-push event. `data` is an already serialized JSON document and
/// is treated as opaque text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id:    Option<String>,
    pub retry: Option<Duration>,
    pub event: String,
    pub data:  String,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id:    None,
            retry: None,
            event: event.into(),
            data:  data.into(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Encodes the event as `id:`/`retry:` (when set), `event:` and `data:`
    /// lines followed by a blank line.
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.event.len() + self.data.len() + 32);
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            let _ = writeln!(out, "id: {id}");
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(out, "retry: {}", retry.as_millis());
        }
        let _ = writeln!(out, "event: {}", self.event);
        let _ = write!(out, "data: {}\n\n", self.data);
        Bytes::from(out)
    }
}
