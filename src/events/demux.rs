// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::oneshot;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::ChannelError;
use crate::events::bus::{Event, EventBus};
use crate::wire::{ContentCase, StreamingMessage};

struct Waiter {
    id: u64,
    tx: oneshot::Sender<StreamingMessage>,
}

/// Filters the event bus down to messages belonging to one worker, and offers one-shot, timed,
/// typed subscriptions on top of it.
///
/// One-shot subscriptions are served by a typed waiter registry keyed by content-case: a single
/// background pump task reads the bus and, for each matching content-case, drains and fires every
/// currently registered waiter for that case. A waiter that times out removes itself from the
/// registry by id so it isn't fired (or leaked) after the fact. Continuous subscriptions don't go
/// through the registry at all — they're served directly off a fresh broadcast receiver, since
/// there's no "first match wins" bookkeeping required for them.
pub struct InboundDemux {
    worker_id: String,
    bus: EventBus,
    waiters: Arc<DashMap<ContentCase, Vec<Waiter>>>,
    next_waiter_id: AtomicU64,
    pump: tokio::task::JoinHandle<()>,
}

impl InboundDemux {
    pub fn new(worker_id: impl Into<String>, bus: EventBus) -> Self {
        let worker_id = worker_id.into();
        let waiters: Arc<DashMap<ContentCase, Vec<Waiter>>> = Arc::new(DashMap::new());

        let pump_waiters = waiters.clone();
        let pump_worker_id = worker_id.clone();
        let mut rx = bus.subscribe();
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Inbound { worker_id, message }) if worker_id == pump_worker_id => {
                        let Some(content) = message.content.as_ref() else {
                            continue;
                        };
                        let Some(case) = ContentCase::of(content) else {
                            continue;
                        };
                        if let Some((_, waiters)) = pump_waiters.remove(&case) {
                            for waiter in waiters {
                                let _ = waiter.tx.send(message.clone());
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            worker_id,
            bus,
            waiters,
            next_waiter_id: AtomicU64::new(0),
            pump,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Arms a one-shot wait for the first inbound message of `case`, returning a future that
    /// resolves once it arrives or `timeout` elapses.
    ///
    /// Waiter registration happens synchronously, before this method returns, not when the
    /// returned future is first polled. Callers that trigger a worker response (dialing the
    /// stream, sending a request) must call this *before* that triggering action so the waiter is
    /// already in the registry when the worker's message reaches the pump — an `async fn` here
    /// would defer registration to the caller's `.await`, which runs after the trigger and can
    /// lose a response that arrives in between.
    ///
    /// Per the data model invariant, at most one such subscription should be outstanding per
    /// content-case at a time; this is not enforced here (a second concurrent waiter is simply
    /// queued behind — or alongside — the first and both fire on the same matching message), since
    /// enforcing it would require the registry to reject rather than queue, and nothing in this
    /// crate's call pattern produces overlapping one-shot waits for the same case.
    pub fn subscribe_once(
        &self,
        case: ContentCase,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<StreamingMessage, ChannelError>> + Send + 'static
    {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(case).or_default().push(Waiter { id, tx });

        let waiters = self.waiters.clone();
        let worker_id = self.worker_id.clone();

        async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(message)) => Ok(message),
                // Sender dropped without firing: only happens via `fail_all` at dispose.
                Ok(Err(_)) => Err(ChannelError::Disposed { worker_id }),
                Err(_) => {
                    remove_waiter(&waiters, case, id);
                    Err(timeout_error(case))
                }
            }
        }
    }

    /// A stream of every inbound message matching `case`, for as long as the channel lives.
    pub fn subscribe_stream(
        &self,
        case: ContentCase,
    ) -> impl Stream<Item = StreamingMessage> + Send + 'static {
        let worker_id = self.worker_id.clone();
        BroadcastStream::new(self.bus.subscribe()).filter_map(move |event| match event {
            Ok(Event::Inbound { worker_id: wid, message }) if wid == worker_id => {
                match message.content.as_ref() {
                    Some(content) if case.matches(content) => Some(message),
                    _ => None,
                }
            }
            _ => None,
        })
    }

    /// Completes every outstanding one-shot waiter with a dispose error and drops the pump.
    pub fn dispose(&self) {
        self.waiters.clear();
        self.pump.abort();
    }
}

impl Drop for InboundDemux {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn remove_waiter(waiters: &DashMap<ContentCase, Vec<Waiter>>, case: ContentCase, id: u64) {
    if let Some(mut waiters) = waiters.get_mut(&case) {
        waiters.retain(|w| w.id != id);
    }
}

fn timeout_error(case: ContentCase) -> ChannelError {
    match case {
        ContentCase::StartStream => ChannelError::StartupTimeout,
        ContentCase::WorkerInitResponse => ChannelError::InitTimeout,
        ContentCase::FunctionEnvironmentReloadResponse => ChannelError::ReloadTimeout,
        // The remaining cases are only ever waited on continuously, never one-shot, in this
        // crate's own call sites, but a generic fallback keeps the function total.
        _ => ChannelError::InitTimeout,
    }
}
