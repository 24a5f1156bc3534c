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

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use crate::error::ChannelError;
use crate::model::{FunctionMetadata, ScriptInvocationContext};

type Inbox = mpsc::UnboundedReceiver<Arc<ScriptInvocationContext>>;

/// One function's input queue: an unbounded FIFO, plus the shared receiver handle the dispatcher's
/// bounded consumer pool pulls from.
///
/// The receiver is wrapped in `Arc<Mutex<_>>` rather than handed out by value because the
/// dispatcher runs `dispatch_parallelism` consumer tasks against a single queue — only one task
/// holds the lock (and therefore calls `.recv()`) at a time, which keeps dequeue order FIFO even
/// though completion order across the pool is not.
struct FunctionQueue {
    sender: mpsc::UnboundedSender<Arc<ScriptInvocationContext>>,
    receiver: Arc<Mutex<Inbox>>,
}

/// A mapping from function identifier to its input queue, plus a parallel map of load errors.
///
/// Per the data model invariants: a function id appears here with a queue iff
/// `setup_function_invocation_buffers` has been called for it; it appears in the load-errors map
/// iff the worker returned a load failure for it.
#[derive(Default)]
pub struct FunctionRegistry {
    queues: DashMap<String, FunctionQueue>,
    metadata: DashMap<String, Arc<FunctionMetadata>>,
    load_errors: DashMap<String, ChannelError>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an empty input queue per function. Idempotent per function id: re-entry replaces
    /// the queue, dropping the old sender (any receiver still parked on the old queue simply sees
    /// it close). Callers must not re-setup a function with in-flight work still pending.
    pub fn setup(&self, functions: impl IntoIterator<Item = Arc<FunctionMetadata>>) {
        for function in functions {
            if self.queues.contains_key(&function.function_id) {
                tracing::warn!(
                    function_id = %function.function_id,
                    "re-setting up invocation buffers for a function that already has a queue"
                );
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            self.queues.insert(
                function.function_id.clone(),
                FunctionQueue {
                    sender,
                    receiver: Arc::new(Mutex::new(receiver)),
                },
            );
            self.metadata.insert(function.function_id.clone(), function);
        }
    }

    pub fn function_ids(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn metadata(&self, function_id: &str) -> Option<Arc<FunctionMetadata>> {
        self.metadata.get(function_id).map(|e| e.clone())
    }

    pub fn enqueue(
        &self,
        function_id: &str,
        context: Arc<ScriptInvocationContext>,
    ) -> Result<(), ChannelError> {
        match self.queues.get(function_id) {
            Some(queue) => queue.sender.send(context).map_err(|_| ChannelError::Transport {
                worker_id: function_id.to_string(),
                message: "input queue closed".to_string(),
            }),
            None => Err(ChannelError::UnknownFunction {
                function_id: function_id.to_string(),
            }),
        }
    }

    pub(crate) fn receiver(&self, function_id: &str) -> Option<Arc<Mutex<Inbox>>> {
        self.queues.get(function_id).map(|q| q.receiver.clone())
    }

    pub fn record_load_error(&self, function_id: &str, error: ChannelError) {
        self.load_errors.insert(function_id.to_string(), error);
    }

    pub fn load_error(&self, function_id: &str) -> Option<ChannelError> {
        self.load_errors.get(function_id).map(|e| e.clone())
    }

    /// Drains every context still sitting in every input queue and completes it with `error`.
    /// Called at dispose, after the dispatcher's consumer tasks have been cancelled so nothing is
    /// concurrently racing to dequeue the same items.
    pub async fn drain_all(&self, error: ChannelError) {
        for entry in self.queues.iter() {
            let receiver = entry.value().receiver.clone();
            let mut guard = receiver.lock().await;
            while let Ok(context) = guard.try_recv() {
                context.complete(Err(error.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptInvocationContext;
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn function(id: &str) -> Arc<FunctionMetadata> {
        Arc::new(FunctionMetadata {
            function_id: id.to_string(),
            name: id.to_string(),
            entry_point: "handler".into(),
            script_file: format!("{id}.py"),
            directory: ".".into(),
            is_proxy: false,
            bindings: vec![],
            managed_dependency_enabled: false,
        })
    }

    #[test]
    fn enqueue_without_setup_is_unknown_function() {
        let registry = FunctionRegistry::new();
        let (ctx, _rx) = ScriptInvocationContext::new(
            "i1",
            function("f1"),
            HashMap::new(),
            HashMap::new(),
            CancellationToken::new(),
        );
        let err = registry.enqueue("f1", Arc::new(ctx)).unwrap_err();
        assert!(matches!(err, ChannelError::UnknownFunction { .. }));
    }

    #[tokio::test]
    async fn setup_then_enqueue_then_drain_completes_with_error() {
        let registry = FunctionRegistry::new();
        registry.setup([function("f1")]);
        let (ctx, rx) = ScriptInvocationContext::new(
            "i1",
            function("f1"),
            HashMap::new(),
            HashMap::new(),
            CancellationToken::new(),
        );
        registry.enqueue("f1", Arc::new(ctx)).unwrap();
        registry
            .drain_all(ChannelError::Disposed {
                worker_id: "w1".into(),
            })
            .await;
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(ChannelError::Disposed { .. })));
    }

    #[test]
    fn load_error_is_recorded_and_retrievable() {
        let registry = FunctionRegistry::new();
        registry.record_load_error(
            "f1",
            ChannelError::FunctionLoadFailed {
                function_id: "f1".into(),
                message: "syntax error".into(),
                stack_trace: None,
            },
        );
        assert!(registry.load_error("f1").is_some());
        assert!(registry.load_error("f2").is_none());
    }
}
