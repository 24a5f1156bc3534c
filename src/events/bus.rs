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

use tokio::sync::broadcast;

use crate::wire::StreamingMessage;

/// Events published on the process-wide bus that this channel either produces or consumes.
///
/// This is an in-process pub/sub fabric, not a network service — "external" in the sense that
/// higher layers also publish to and read from it, but its implementation lives in this crate
/// because no existing collaborator provides it.
#[derive(Debug, Clone)]
pub enum Event {
    /// A message read off the Transport's receive loop, tagged with the worker it came from.
    Inbound {
        worker_id: String,
        message: StreamingMessage,
    },
    /// The worker process or transport suffered a fatal error.
    WorkerError(WorkerErrorEvent),
    /// A debounced batch of file-system changes under a watched script root settled; the host
    /// should restart the worker.
    HostRestart { worker_id: String },
}

#[derive(Debug, Clone)]
pub struct WorkerErrorEvent {
    pub language: String,
    pub worker_id: String,
    pub error: String,
}

/// A thin, cloneable handle onto a `tokio::sync::broadcast` channel.
///
/// Every subscriber gets its own receiver and therefore its own view of backlog; a slow
/// subscriber can lag and miss messages (reported as `RecvError::Lagged`), which is the standard
/// broadcast trade-off and is acceptable here since every event is either re-derivable (another
/// `InvocationResponse` will never come, but a missed `WorkerError` is still observable via the
/// channel's own failed futures) or idempotent to miss in this crate's own consumers, which never
/// lag because they do no blocking work inline.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is not an error — e.g. at startup, before the demux pump is running.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
