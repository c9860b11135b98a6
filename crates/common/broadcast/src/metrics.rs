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

use prometheus::{IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec};

pub const CHANNEL_LABEL: &str = "channel";

pub static EVENTS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "broadcast_events_published_total",
        "Total number of events published",
        &[CHANNEL_LABEL]
    )
    .unwrap()
});

pub static DELIVERY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "broadcast_delivery_failures_total",
        "Total number of per-subscriber enqueue timeouts or closed queues",
        &[CHANNEL_LABEL]
    )
    .unwrap()
});

pub static SUBSCRIBERS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "broadcast_subscribers",
        "Number of currently connected subscribers",
        &[CHANNEL_LABEL]
    )
    .unwrap()
});
