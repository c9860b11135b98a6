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

//! # Telemetry
//!
//! Process-wide observability for dlhub:
//!
//! - [`logging`]: stdout and rolling-file `tracing` output with a reloadable
//!   level filter.
//! - [`panic_hook`]: panics logged as structured events and counted.
//! - [`metrics`]: text exposition of the default prometheus registry.
//!
//! ```rust,no_run
//! use dlhub_common_telemetry::{logging::{LoggingOptions, init_global_logging}, panic_hook::set_panic_hook};
//!
//! let _guards = init_global_logging("dlhub", &LoggingOptions::default());
//! set_panic_hook();
//! tracing::info!("service started");
//! ```

pub mod logging;
pub mod metrics;
pub mod panic_hook;
