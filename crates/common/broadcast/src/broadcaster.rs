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
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use snafu::{ResultExt, ensure};
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior, interval_at, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::BroadcastConfig,
    err::{ClosedSnafu, Result, SerializeSnafu},
    event::{HEARTBEAT_FRAME, SseEvent},
    id::SubscriberId,
    metrics::{DELIVERY_FAILURES, EVENTS_PUBLISHED, SUBSCRIBERS},
    sink::EventSink,
};

type LifecycleHook = Arc<dyn Fn(SubscriberId) + Send + Sync>;
type EventHook = Arc<dyn Fn(SubscriberId, &SseEvent) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    connect:    Vec<LifecycleHook>,
    disconnect: Vec<LifecycleHook>,
    events:     HashMap<String, Vec<EventHook>>,
}

/// Receiving half handed out by [`Broadcaster::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id:       SubscriberId,
    receiver: mpsc::Receiver<Arc<SseEvent>>,
}

impl Subscription {
    pub const fn id(&self) -> SubscriberId { self.id }

    /// Next queued event, or `None` once the subscriber was removed.
    pub async fn recv(&mut self) -> Option<Arc<SseEvent>> { self.receiver.recv().await }
}

/// Outcome of one publish across all subscribers present at that moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed:    usize,
}

pub struct Broadcaster {
    config:      BroadcastConfig,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<SseEvent>>>>,
    hooks:       RwLock<Hooks>,
    closed:      AtomicBool,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("name", &self.config.name)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        info!(channel = %config.name, "broadcast channel created");
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            hooks: RwLock::new(Hooks::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub const fn config(&self) -> &BroadcastConfig { &self.config }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    pub fn subscriber_count(&self) -> usize { self.subscribers.read().len() }

    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.read().keys().copied().collect()
    }

    /// Registers a new subscriber with its own bounded queue.
    pub fn subscribe(&self) -> Result<Subscription> {
        let (tx, receiver) = mpsc::channel(self.config.buffer_size.max(1));
        let id = SubscriberId::new();
        {
            let mut subscribers = self.subscribers.write();
            ensure!(
                !self.is_closed(),
                ClosedSnafu {
                    name: &self.config.name,
                }
            );
            subscribers.insert(id, tx);
            debug!(
                channel = %self.config.name,
                subscriber = %id,
                total = subscribers.len(),
                "subscriber added"
            );
        }
        SUBSCRIBERS.with_label_values(&[self.config.name.as_str()]).inc();
        Ok(Subscription { id, receiver })
    }

    /// Removes the subscriber and closes its queue. Returns whether it was
    /// present.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            SUBSCRIBERS.with_label_values(&[self.config.name.as_str()]).dec();
            debug!(channel = %self.config.name, subscriber = %id, "subscriber removed");
        }
        removed
    }

    /// Serializes `payload` once and offers it to every subscriber.
    pub async fn publish<T>(&self, event: &str, payload: &T) -> Result<PublishReport>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_string(payload).context(SerializeSnafu { event })?;
        self.publish_event(SseEvent::new(event, data)).await
    }

    /// Offers a prepared event to every subscriber concurrently.
    ///
    /// Each enqueue waits at most `send_timeout`. Subscribers that miss it
    /// are counted as failed but stay registered.
    pub async fn publish_event(&self, event: SseEvent) -> Result<PublishReport> {
        ensure!(
            !self.is_closed(),
            ClosedSnafu {
                name: &self.config.name,
            }
        );

        let event = Arc::new(event);
        let targets: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let send_timeout = self.config.send_timeout;
        let outcomes = join_all(targets.into_iter().map(|(id, tx)| {
            let event = Arc::clone(&event);
            async move {
                let accepted = matches!(timeout(send_timeout, tx.send(event)).await, Ok(Ok(())));
                (id, accepted)
            }
        }))
        .await;

        let mut report = PublishReport::default();
        for (id, accepted) in outcomes {
            if accepted {
                report.delivered += 1;
            } else {
                report.failed += 1;
                warn!(
                    channel = %self.config.name,
                    subscriber = %id,
                    event = %event.event,
                    "subscriber did not accept event in time"
                );
            }
        }

        EVENTS_PUBLISHED.with_label_values(&[self.config.name.as_str()]).inc();
        if report.failed > 0 {
            DELIVERY_FAILURES
                .with_label_values(&[self.config.name.as_str()])
                .inc_by(report.failed as u64);
        }
        Ok(report)
    }

    /// Closes every queue and rejects further subscribe and publish calls.
    pub fn close(&self) -> Result<()> {
        ensure!(
            !self.closed.swap(true, Ordering::AcqRel),
            ClosedSnafu {
                name: &self.config.name,
            }
        );
        let drained = std::mem::take(&mut *self.subscribers.write());
        SUBSCRIBERS
            .with_label_values(&[self.config.name.as_str()])
            .sub(i64::try_from(drained.len()).unwrap_or(i64::MAX));
        info!(channel = %self.config.name, dropped = drained.len(), "broadcast channel closed");
        Ok(())
    }

    pub fn on_connect(&self, hook: impl Fn(SubscriberId) + Send + Sync + 'static) -> &Self {
        self.hooks.write().connect.push(Arc::new(hook));
        self
    }

    pub fn on_disconnect(&self, hook: impl Fn(SubscriberId) + Send + Sync + 'static) -> &Self {
        self.hooks.write().disconnect.push(Arc::new(hook));
        self
    }

    /// Hook run inline, before the write, for every delivered event named
    /// `event`. Keep it cheap.
    pub fn on_event(
        &self,
        event: impl Into<String>,
        hook: impl Fn(SubscriberId, &SseEvent) + Send + Sync + 'static,
    ) -> &Self {
        self.hooks
            .write()
            .events
            .entry(event.into())
            .or_default()
            .push(Arc::new(hook));
        self
    }

    /// Drains `subscription` into `sink` until a write fails, the sink
    /// reports its peer gone or the queue is closed. Heartbeats are
    /// interleaved on the configured interval.
    ///
    /// On exit the subscriber is unsubscribed and disconnect hooks run.
    pub async fn deliver<S: EventSink>(&self, mut subscription: Subscription, mut sink: S) {
        let id = subscription.id;
        let connect = self.hooks.read().connect.clone();
        for hook in &connect {
            hook(id);
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = (!period.is_zero()).then(|| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let frame = tokio::select! {
                next = subscription.receiver.recv() => {
                    let Some(event) = next else {
                        debug!(channel = %self.config.name, subscriber = %id, "queue closed");
                        break;
                    };
                    self.fire_event_hooks(id, &event);
                    event.encode()
                }
                () = next_heartbeat(heartbeat.as_mut()) => Bytes::from_static(HEARTBEAT_FRAME.as_bytes()),
                () = sink.closed() => {
                    debug!(channel = %self.config.name, subscriber = %id, "peer gone");
                    break;
                }
            };

            if let Err(e) = sink.write_frame(frame).await {
                debug!(channel = %self.config.name, subscriber = %id, error = %e, "write failed");
                break;
            }
        }

        self.unsubscribe(id);
        let disconnect = self.hooks.read().disconnect.clone();
        for hook in &disconnect {
            hook(id);
        }
    }

    fn fire_event_hooks(&self, id: SubscriberId, event: &SseEvent) {
        let hooks = self.hooks.read().events.get(&event.event).cloned();
        for hook in hooks.iter().flatten() {
            hook(id, event);
        }
    }
}

async fn next_heartbeat(heartbeat: Option<&mut Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
