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

use prometheus::{Encoder, TextEncoder};

/// Content type of the prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Renders every metric in the default registry.
///
/// Encoding failures are logged and yield whatever was written so far.
#[must_use]
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use prometheus::{IntCounter, register_int_counter};

    use super::*;

    #[test]
    fn rendered_output_contains_registered_counter() {
        let counter: IntCounter =
            register_int_counter!("dlhub_telemetry_test_total", "test counter").unwrap();
        counter.inc_by(3);

        let text = render_metrics();
        assert!(text.contains("dlhub_telemetry_test_total 3"));
    }
}
