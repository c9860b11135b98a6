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

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::metrics::{WORKER_PAUSED, WORKER_RESUMED};

/// Value of the control flag steering a transfer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlState {
    Running   = 0,
    Paused    = 1,
    Cancelled = 2,
}

impl ControlState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Paused,
            _ => Self::Cancelled,
        }
    }
}

/// Lock-free pause/resume/cancel handle shared between a worker and its
/// callers. Cloning shares the same flag.
///
/// The flag is advisory for pause: the loop observes it between chunks.
/// Cancellation additionally fires the token so an in-flight read is
/// interrupted at its next poll.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    state:  Arc<AtomicU8>,
    wake:   Arc<Notify>,
    cancel: CancellationToken,
}

impl WorkerControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ControlState::Running as u8)),
            wake: Arc::new(Notify::new()),
            cancel,
        }
    }

    pub fn state(&self) -> ControlState { ControlState::from_u8(self.state.load(Ordering::Acquire)) }

    pub fn is_paused(&self) -> bool { self.state() == ControlState::Paused }

    /// Set only through [`Self::cancel`]. A fired token without this flag
    /// means the worker is being interrupted by shutdown.
    pub fn is_cancelled(&self) -> bool { self.state() == ControlState::Cancelled }

    pub fn token(&self) -> &CancellationToken { &self.cancel }

    /// RUNNING → PAUSED. Returns whether the flag changed.
    pub fn pause(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(
                ControlState::Running as u8,
                ControlState::Paused as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if changed {
            WORKER_PAUSED.inc();
        }
        changed
    }

    /// PAUSED → RUNNING, waking the waiting loop. Returns whether the flag
    /// changed.
    pub fn resume(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(
                ControlState::Paused as u8,
                ControlState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if changed {
            self.wake.notify_one();
            WORKER_RESUMED.inc();
        }
        changed
    }

    /// Moves to CANCELLED and fires the token. Only the first call has any
    /// effect; it returns `true`.
    pub fn cancel(&self) -> bool {
        let previous = self.state.swap(ControlState::Cancelled as u8, Ordering::AcqRel);
        if previous == ControlState::Cancelled as u8 {
            return false;
        }
        self.cancel.cancel();
        self.wake.notify_one();
        true
    }

    /// Waits while paused. Wakes on resume, on token cancellation, or after
    /// `poll` at the latest, and returns the state then observed.
    pub async fn wait_while_paused(&self, poll: Duration) -> ControlState {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state();
            if state != ControlState::Paused || self.cancel.is_cancelled() {
                return state;
            }

            tokio::select! {
                () = &mut notified => {}
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pause_resume_only_from_expected_states() {
        let control = WorkerControl::new(CancellationToken::new());
        assert!(!control.resume());
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert_eq!(control.state(), ControlState::Running);
    }

    #[test]
    fn cancel_is_idempotent_and_final() {
        let control = WorkerControl::new(CancellationToken::new());
        assert!(control.cancel());
        assert!(!control.cancel());
        assert!(control.token().is_cancelled());
        assert!(!control.pause());
        assert!(!control.resume());
        assert!(control.is_cancelled());
    }

    #[tokio::test]
    async fn resume_wakes_waiter_before_poll_interval() {
        let control = WorkerControl::new(CancellationToken::new());
        control.pause();

        let waiter = control.clone();
        let task =
            tokio::spawn(async move { waiter.wait_while_paused(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.resume();

        let state = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ControlState::Running);
    }

    #[tokio::test]
    async fn shutdown_token_releases_waiter_without_cancel_flag() {
        let token = CancellationToken::new();
        let control = WorkerControl::new(token.child_token());
        control.pause();

        let waiter = control.clone();
        let task =
            tokio::spawn(async move { waiter.wait_while_paused(Duration::from_secs(60)).await });
        token.cancel();

        let state = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ControlState::Paused);
        assert!(control.token().is_cancelled());
        assert!(!control.is_cancelled());
    }
}
