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

//! Fan-out of named events to live server-push subscribers.
//!
//! A [`Broadcaster`] owns one bounded queue per subscriber. Producers call
//! [`Broadcaster::publish`], which serializes the payload once and offers it
//! to every queue concurrently with a per-subscriber timeout, so one stalled
//! consumer never holds the producer past that timeout. Each subscriber is
//! drained by [`Broadcaster::deliver`], which writes [`SseEvent`] frames and
//! heartbeats to an [`EventSink`] until the sink fails or the queue closes.
//!
//! ```rust,no_run
//! use dlhub_common_broadcast::{BroadcastConfig, Broadcaster, WriterSink};
//!
//! # async fn demo() -> Result<(), dlhub_common_broadcast::BroadcastError> {
//! let broadcaster = std::sync::Arc::new(Broadcaster::new(BroadcastConfig::default()));
//! let subscription = broadcaster.subscribe()?;
//! let b = broadcaster.clone();
//! tokio::spawn(async move { b.deliver(subscription, WriterSink::new(tokio::io::stdout())).await });
//! broadcaster.publish("progress", &serde_json::json!({"progress": 42})).await?;
//! # Ok(())
//! # }
//! ```

mod broadcaster;
mod config;
mod err;
mod event;
mod id;
mod metrics;
mod sink;

pub use broadcaster::{Broadcaster, PublishReport, Subscription};
pub use config::BroadcastConfig;
pub use err::{BroadcastError, Result};
pub use event::{HEARTBEAT_FRAME, SseEvent};
pub use id::SubscriberId;
pub use sink::{ChannelSink, EventSink, WriterSink};
