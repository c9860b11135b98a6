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

pub mod api;
pub mod error;
pub mod http;

use std::net::SocketAddr;

use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use dlhub_error::{Error, NetworkError, Result};

/// Handle for managing a running HTTP service.
///
/// This handle provides control over a running service, allowing you to:
/// - Wait for the service to start accepting connections
/// - Signal graceful shutdown
/// - Wait for the service to fully stop
///
/// The handle uses a cancellation token for graceful shutdown.
pub struct ServiceHandler {
    /// Join handle for the server task
    join_handle:        JoinHandle<()>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Receiver for server start notification
    started_rx:         Option<Receiver<()>>,
    /// Address the listener is bound to
    local_addr:         SocketAddr,
}

impl ServiceHandler {
    /// Waits for the server to start serving. Later calls return at once.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        if let Some(started_rx) = self.started_rx.take() {
            // A dropped sender means the task already ended; wait_for_stop
            // reports that.
            let _ = started_rx.await;
        }
        Ok(())
    }

    /// Waits for the server task to finish. Call after [`Self::shutdown`].
    pub async fn wait_for_stop(self) -> Result<()> {
        if let Err(e) = self.join_handle.await {
            tracing::error!(error = %e, "server task failed");
        }
        Ok(())
    }

    /// Signals the server to begin graceful shutdown without waiting.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    pub fn is_finished(&self) -> bool { self.join_handle.is_finished() }

    /// The bound address, useful when configured with port 0.
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}
