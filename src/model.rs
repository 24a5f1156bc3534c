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

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::{ChannelError, ChannelResult};

/// Direction of a binding between a function parameter and a trigger/input/output source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub name: String,
    pub direction: Direction,
    pub binding_type: String,
    pub data_type: Option<String>,
}

/// Read-only metadata for one user function, as discovered and parsed upstream of this crate.
#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    pub function_id: String,
    pub name: String,
    pub entry_point: String,
    pub script_file: String,
    pub directory: String,
    pub is_proxy: bool,
    pub bindings: Vec<BindingInfo>,
    pub managed_dependency_enabled: bool,
}

/// Read-only worker configuration: what language the worker speaks and which file extensions,
/// when changed under the script root, should trigger a host restart.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub language: String,
    pub extensions: Vec<String>,
}

/// One HTTP claims identity, as carried by a trigger's `RpcHttp` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsIdentity {
    pub claims: HashMap<String, String>,
    pub authentication_type: Option<String>,
}

/// The domain-side counterpart of the wire `TypedData` oneof. `convert` maps between this and the
/// generated `wire::TypedData`; nothing else in the crate should need to know the wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
    Double(f64),
    Json(serde_json::Value),
    CollectionBytes(Vec<Vec<u8>>),
    CollectionString(Vec<String>),
    CollectionDouble(Vec<f64>),
    CollectionInt(Vec<i64>),
    Http(Box<HttpValue>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpValue {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub identities: Vec<ClaimsIdentity>,
    pub body: Box<Value>,
    pub raw_body: Option<Vec<u8>>,
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

/// The materialized result of a successful invocation: named output bindings plus the function's
/// return value, if any.
#[derive(Debug, Clone, Default)]
pub struct InvocationOutcome {
    pub outputs: HashMap<String, Value>,
    pub return_value: Option<Value>,
}

/// Per-invocation state handed to the channel via a function's input queue.
///
/// The result promise is a `oneshot::Sender` guarded by a `Mutex<Option<_>>` so it can be
/// completed exactly once from whichever code path gets there first (load-error short-circuit,
/// cancellation check, response handler, or dispose) without risking a double-send panic.
pub struct ScriptInvocationContext {
    pub invocation_id: String,
    pub function: Arc<FunctionMetadata>,
    pub inputs: HashMap<String, Value>,
    pub trigger_metadata: HashMap<String, Value>,
    pub cancellation: CancellationToken,
    pub span: Span,
    result: Mutex<Option<oneshot::Sender<ChannelResult<InvocationOutcome>>>>,
}

/// The caller's half of a `ScriptInvocationContext`'s result promise.
pub type InvocationResultReceiver = oneshot::Receiver<ChannelResult<InvocationOutcome>>;

impl ScriptInvocationContext {
    pub fn new(
        invocation_id: impl Into<String>,
        function: Arc<FunctionMetadata>,
        inputs: HashMap<String, Value>,
        trigger_metadata: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> (Self, InvocationResultReceiver) {
        let (tx, rx) = oneshot::channel();
        let invocation_id = invocation_id.into();
        let span = tracing::info_span!(
            "invocation",
            invocation_id = %invocation_id,
            function_id = %function.function_id
        );
        (
            Self {
                invocation_id,
                function,
                inputs,
                trigger_metadata,
                cancellation,
                span,
                result: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Complete the result promise. A no-op (other than a debug log) if already completed —
    /// callers are expected to reach this at most once per code path, but a second call is not a
    /// bug by itself (e.g. a duplicate `InvocationResponse`), so this stays silent rather than
    /// panicking.
    pub fn complete(&self, outcome: ChannelResult<InvocationOutcome>) {
        let sender = self.result.lock().unwrap().take();
        match sender {
            Some(sender) => {
                // The receiver may already be gone if the caller stopped waiting; that's fine.
                let _ = sender.send(outcome);
            }
            None => {
                tracing::debug!(
                    invocation_id = %self.invocation_id,
                    "result promise already completed, dropping late completion"
                );
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn complete_cancelled(&self) {
        self.complete(Err(ChannelError::Cancelled));
    }
}
