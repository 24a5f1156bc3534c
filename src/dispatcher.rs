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

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::converter;
use crate::correlation::CorrelationTable;
use crate::metrics::Metrics;
use crate::model::ScriptInvocationContext;
use crate::registry::FunctionRegistry;
use crate::transport::Transport;
use crate::wire::{streaming_message::Content, InvocationRequest, StreamingMessage};

/// Spawns `parallelism` consumer tasks against a function's input queue.
///
/// Each task loops: lock the queue's shared receiver, race a `.recv()` against the cancellation
/// token, dispatch whatever context comes out, release the lock, repeat. Only one task holds the
/// lock at a time, so dequeue order is FIFO across the pool even though completion order (which
/// depends on how fast the worker answers each `InvocationRequest`) is not. This is the
/// per-function Dispatcher described by the design: requests within a function may be reordered
/// across the pool, but across functions there's no ordering relationship at all — the
/// correlation table is the only state shared between them on this hot path.
///
/// `parallelism` also bounds how many `InvocationRequest`s may be outstanding at once: a shared
/// `Semaphore` of that many permits is acquired in `dispatch_one` before the request is sent and
/// held in the correlation table until the response arrives (or the entry is otherwise removed),
/// so the consumer pool itself can race ahead through its queue without the outstanding-request
/// count exceeding `parallelism`.
pub fn spawn_consumers(
    function_id: String,
    registry: Arc<FunctionRegistry>,
    correlation: Arc<CorrelationTable>,
    transport: Arc<Transport>,
    capabilities: Arc<Capabilities>,
    metrics: Arc<Metrics>,
    parallelism: usize,
    cancellation: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let Some(receiver) = registry.receiver(&function_id) else {
        tracing::error!(function_id = %function_id, "spawn_consumers called without a queue");
        return Vec::new();
    };

    let in_flight = Arc::new(Semaphore::new(parallelism.max(1)));

    (0..parallelism.max(1))
        .map(|worker_index| {
            let receiver = receiver.clone();
            let registry = registry.clone();
            let correlation = correlation.clone();
            let transport = transport.clone();
            let capabilities = capabilities.clone();
            let metrics = metrics.clone();
            let function_id = function_id.clone();
            let cancellation = cancellation.clone();
            let in_flight = in_flight.clone();

            tokio::spawn(async move {
                tracing::debug!(function_id = %function_id, worker_index, "dispatcher consumer started");
                loop {
                    let context = {
                        let mut guard = receiver.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancellation.cancelled() => break,
                            next = guard.recv() => match next {
                                Some(context) => context,
                                None => break,
                            },
                        }
                    };
                    dispatch_one(
                        &function_id,
                        context,
                        &registry,
                        &correlation,
                        &transport,
                        &capabilities,
                        &metrics,
                        &in_flight,
                    )
                    .await;
                }
                tracing::debug!(function_id = %function_id, worker_index, "dispatcher consumer stopped");
            })
        })
        .collect()
}

async fn dispatch_one(
    function_id: &str,
    context: Arc<ScriptInvocationContext>,
    registry: &FunctionRegistry,
    correlation: &CorrelationTable,
    transport: &Transport,
    capabilities: &Capabilities,
    metrics: &Metrics,
    in_flight: &Arc<Semaphore>,
) {
    if let Some(load_error) = registry.load_error(function_id) {
        correlation.remove(&context.invocation_id);
        context.complete(Err(load_error));
        return;
    }

    if context.is_cancelled() {
        context.complete_cancelled();
        return;
    }

    // Held until the entry is removed from the correlation table (response, send failure, or
    // dispose), so the request stays "outstanding" for the whole round trip, not just dispatch.
    let permit = match in_flight.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // The semaphore is only closed by `close()`, which this crate never calls.
            tracing::error!(function_id = %function_id, "dispatch semaphore closed unexpectedly");
            return;
        }
    };

    let request = InvocationRequest {
        invocation_id: context.invocation_id.clone(),
        function_id: function_id.to_string(),
        input_data: converter::inputs_to_wire(
            &binding_order(&context),
            &context.inputs,
            capabilities,
        ),
        trigger_metadata: converter::trigger_metadata_to_wire(
            &context.trigger_metadata,
            capabilities,
        ),
    };

    correlation.insert(context.invocation_id.clone(), context.clone(), permit);
    metrics.invocation_dispatched(function_id);

    let message = StreamingMessage {
        request_id: Uuid::new_v4().to_string(),
        content: Some(Content::InvocationRequest(request)),
    };

    if let Err(error) = transport.send(message) {
        if let Some(context) = correlation.remove(&context.invocation_id) {
            metrics.invocation_completed(function_id);
            context.complete(Err(error));
        }
    }
}

/// The order in which input bindings are serialized: the function's declared binding order, so
/// the wire representation is stable rather than depending on a `HashMap`'s iteration order.
fn binding_order(context: &ScriptInvocationContext) -> Vec<String> {
    context
        .function
        .bindings
        .iter()
        .map(|b| b.name.clone())
        .collect()
}
