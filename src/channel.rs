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
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::{Capabilities, RAW_HTTP_BODY_BYTES, TYPED_DATA_COLLECTION_SUPPORTED};
use crate::config::ChannelConfig;
use crate::converter;
use crate::correlation::CorrelationTable;
use crate::dispatcher;
use crate::error::{ChannelError, ChannelResult};
use crate::events::{Event, EventBus, InboundDemux, WorkerErrorEvent};
use crate::filewatch::FileWatcher;
use crate::metrics::Metrics;
use crate::model::{
    BindingInfo, Direction, FunctionMetadata, InvocationOutcome, ScriptInvocationContext,
    WorkerConfig,
};
use crate::process::WorkerProcessHandle;
use crate::registry::FunctionRegistry;
use crate::state::{ChannelState, ChannelStateCell};
use crate::transport::Transport;
use crate::wire::streaming_message::Content;
use crate::wire::{
    self, BindingDirection, ContentCase, FunctionEnvironmentReloadRequest, FunctionLoadRequest,
    RpcFunctionMetadata, StreamingMessage, WorkerInitRequest,
};

/// The host-side control channel for one out-of-process language worker.
///
/// Owns the worker's lifecycle state machine, the function registry and its input queues, the
/// correlation table, and the demultiplexed view of the event bus. One instance per worker
/// process; see `DESIGN.md` for how this composes the crate's other modules.
pub struct Channel {
    worker_id: String,
    script_root: PathBuf,
    worker_config: WorkerConfig,
    config: ChannelConfig,
    bus: EventBus,
    demux: Arc<InboundDemux>,
    transport: Mutex<Option<Arc<Transport>>>,
    capabilities: Arc<Capabilities>,
    registry: Arc<FunctionRegistry>,
    correlation: Arc<CorrelationTable>,
    state: ChannelStateCell,
    metrics: Arc<Metrics>,
    process: Mutex<Option<Box<dyn WorkerProcessHandle>>>,
    dispatcher_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    response_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    file_watcher: Mutex<Option<FileWatcher>>,
    dispose_token: CancellationToken,
}

impl Channel {
    pub fn new(
        worker_id: impl Into<String>,
        script_root: PathBuf,
        worker_config: WorkerConfig,
        config: ChannelConfig,
        bus: EventBus,
    ) -> Arc<Self> {
        let worker_id = worker_id.into();
        let demux = Arc::new(InboundDemux::new(worker_id.clone(), bus.clone()));
        let channel = Arc::new(Self {
            state: ChannelStateCell::new(worker_id.clone()),
            worker_id,
            script_root,
            worker_config,
            config,
            bus,
            demux,
            transport: Mutex::new(None),
            capabilities: Arc::new(Capabilities::new()),
            registry: Arc::new(FunctionRegistry::new()),
            correlation: Arc::new(CorrelationTable::new()),
            metrics: Arc::new(Metrics::new()),
            process: Mutex::new(None),
            dispatcher_tasks: Mutex::new(Vec::new()),
            response_tasks: Mutex::new(Vec::new()),
            file_watcher: Mutex::new(None),
            dispose_token: CancellationToken::new(),
        });
        channel.spawn_response_handlers();
        channel
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Starts the watcher for this channel's script root, filtered to `worker_config.extensions`.
    /// A matching file change (debounced per `config.file_watch_debounce`) publishes a single
    /// `Event::HostRestart` per quiet period.
    pub fn start_file_watch(&self) -> notify::Result<()> {
        let watcher = FileWatcher::start(
            self.worker_id.clone(),
            &self.script_root,
            self.worker_config.extensions.clone(),
            self.config.file_watch_debounce,
            self.bus.clone(),
        )?;
        *self.file_watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }

    /// Runs the startup sequence: arms the `StartStream` wait, connects the Transport, then on
    /// `StartStream` arms the `WorkerInitResponse` wait and sends `WorkerInitRequest`. Resolves
    /// once the init handshake settles one way or the other.
    pub async fn start_worker_process(
        &self,
        process: Box<dyn WorkerProcessHandle>,
    ) -> ChannelResult<()> {
        self.state
            .transition(&[ChannelState::Default], ChannelState::Initializing)?;
        *self.process.lock().unwrap() = Some(process);

        let timer = self.metrics.start_startup_timer();
        let result = self.run_startup_sequence().await;

        match &result {
            Ok(()) => drop(timer),
            Err(error) => {
                timer.stop_and_discard();
                self.bus.publish(Event::WorkerError(WorkerErrorEvent {
                    language: self.worker_config.language.clone(),
                    worker_id: self.worker_id.clone(),
                    error: error.to_string(),
                }));
            }
        }
        result
    }

    async fn run_startup_sequence(&self) -> ChannelResult<()> {
        let start_stream_wait = self
            .demux
            .subscribe_once(ContentCase::StartStream, self.config.startup_timeout);

        let transport = Transport::connect(
            self.config.endpoint,
            self.worker_id.clone(),
            self.worker_config.language.clone(),
            self.bus.clone(),
        )
        .await?;
        *self.transport.lock().unwrap() = Some(Arc::new(transport));

        start_stream_wait.await?;

        let init_wait = self
            .demux
            .subscribe_once(ContentCase::WorkerInitResponse, self.config.init_timeout);

        let mut requested_capabilities = HashMap::new();
        requested_capabilities.insert(RAW_HTTP_BODY_BYTES.to_string(), "1".to_string());
        requested_capabilities.insert(TYPED_DATA_COLLECTION_SUPPORTED.to_string(), "1".to_string());
        let init_request = WorkerInitRequest {
            host_version: self.config.host_version.clone(),
            capabilities: requested_capabilities,
        };
        self.send(StreamingMessage {
            request_id: Uuid::new_v4().to_string(),
            content: Some(Content::WorkerInitRequest(init_request)),
        })?;

        let init_message = init_wait.await?;
        let Some(Content::WorkerInitResponse(response)) = init_message.content else {
            return Err(ChannelError::InitFailed {
                message: "malformed WorkerInitResponse".to_string(),
            });
        };

        let succeeded = response
            .result
            .as_ref()
            .map(|r| r.is_success())
            .unwrap_or(false);
        if !succeeded {
            let message = response
                .result
                .and_then(|r| r.exception)
                .map(|e| e.message)
                .unwrap_or_else(|| "worker init failed".to_string());
            return Err(ChannelError::InitFailed { message });
        }

        self.capabilities.update(response.capabilities);
        self.state
            .transition(&[ChannelState::Initializing], ChannelState::Initialized)?;
        Ok(())
    }

    /// Installs an empty input queue per function. See `FunctionRegistry::setup`.
    pub fn setup_function_invocation_buffers(
        &self,
        functions: impl IntoIterator<Item = Arc<FunctionMetadata>>,
    ) {
        self.registry.setup(functions);
    }

    /// Writes one `FunctionLoadRequest` per registered function, in registration order.
    pub fn send_function_load_requests(&self) -> ChannelResult<()> {
        for function_id in self.registry.function_ids() {
            let Some(metadata) = self.registry.metadata(&function_id) else {
                continue;
            };
            let request = FunctionLoadRequest {
                function_id: function_id.clone(),
                metadata: Some(function_metadata_to_wire(&metadata)),
            };
            self.send(StreamingMessage {
                request_id: Uuid::new_v4().to_string(),
                content: Some(Content::FunctionLoadRequest(request)),
            })?;
        }
        Ok(())
    }

    /// Enqueues an invocation context onto its function's input queue.
    pub fn enqueue_invocation(&self, context: Arc<ScriptInvocationContext>) -> ChannelResult<()> {
        let function_id = context.function.function_id.clone();
        self.registry.enqueue(&function_id, context)
    }

    /// Arms a `FunctionEnvironmentReloadResponse` wait, snapshots the process environment, and
    /// sends `FunctionEnvironmentReloadRequest`. Resolves to `true`/`false` per the worker's
    /// result, or an error if the wait times out.
    pub async fn send_function_environment_reload_request(&self) -> ChannelResult<bool> {
        self.state
            .transition(&[ChannelState::Initialized], ChannelState::Reloading)?;

        let wait = self.demux.subscribe_once(
            ContentCase::FunctionEnvironmentReloadResponse,
            self.config.reload_timeout,
        );

        let environment_variables: HashMap<String, String> = std::env::vars().collect();
        let request = FunctionEnvironmentReloadRequest {
            environment_variables,
            function_app_directory: self.script_root.to_string_lossy().into_owned(),
        };
        if let Err(error) = self.send(StreamingMessage {
            request_id: Uuid::new_v4().to_string(),
            content: Some(Content::FunctionEnvironmentReloadRequest(request)),
        }) {
            let _ = self
                .state
                .transition(&[ChannelState::Reloading], ChannelState::Initialized);
            return Err(error);
        }

        let message = match wait.await {
            Ok(message) => message,
            Err(error) => {
                let _ = self
                    .state
                    .transition(&[ChannelState::Reloading], ChannelState::Initialized);
                return Err(error);
            }
        };

        self.state
            .transition(&[ChannelState::Reloading], ChannelState::Initialized)?;

        let Some(Content::FunctionEnvironmentReloadResponse(response)) = message.content else {
            return Ok(false);
        };
        let succeeded = response
            .result
            .as_ref()
            .map(|r| r.is_success())
            .unwrap_or(false);
        if succeeded {
            self.capabilities.update(response.capabilities);
        }
        Ok(succeeded)
    }

    /// Tears the channel down: cancels subscriptions, stops the file watcher, cascades a cancel
    /// into the worker process, stops the dispatcher pools cooperatively, then completes every
    /// context still sitting in an input queue or the correlation table with a dispose error.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.state.is_disposed() {
            return;
        }
        self.state.dispose();
        self.dispose_token.cancel();
        self.demux.dispose();

        if let Some(watcher) = self.file_watcher.lock().unwrap().take() {
            watcher.stop();
        }
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.close();
        }
        if let Some(process) = self.process.lock().unwrap().take() {
            process.cancel();
        }

        // Join rather than abort: dispatch_one has no await points, so once a consumer observes
        // the cancellation token it has either not yet pulled an item (nothing to lose) or has
        // already finished handling the one it pulled (fully enqueued in the correlation table or
        // fully completed) before the next check. Aborting instead could race a task mid-way
        // through inserting into the correlation table, leaking a context past this drain.
        let dispatcher_handles: Vec<_> = self.dispatcher_tasks.lock().unwrap().drain(..).collect();
        for handle in dispatcher_handles {
            let _ = handle.await;
        }

        for handle in self.response_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }

        let dispose_error = ChannelError::Disposed {
            worker_id: self.worker_id.clone(),
        };
        self.registry.drain_all(dispose_error.clone()).await;
        for context in self.correlation.drain() {
            context.complete(Err(dispose_error.clone()));
        }
    }

    fn send(&self, message: StreamingMessage) -> ChannelResult<()> {
        let transport = self.transport.lock().unwrap().clone().ok_or_else(|| {
            ChannelError::Transport {
                worker_id: self.worker_id.clone(),
                message: "transport is not connected".to_string(),
            }
        })?;
        transport.send(message)
    }

    fn spawn_response_handlers(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(3);

        let load_responses = self.demux.subscribe_stream(ContentCase::FunctionLoadResponse);
        let this = self.clone();
        handles.push(tokio::spawn(async move {
            tokio::pin!(load_responses);
            while let Some(message) = load_responses.next().await {
                this.handle_function_load_response(message);
            }
        }));

        let invocation_responses = self.demux.subscribe_stream(ContentCase::InvocationResponse);
        let this = self.clone();
        handles.push(tokio::spawn(async move {
            tokio::pin!(invocation_responses);
            while let Some(message) = invocation_responses.next().await {
                this.handle_invocation_response(message);
            }
        }));

        let logs = self.demux.subscribe_stream(ContentCase::RpcLog);
        let this = self.clone();
        handles.push(tokio::spawn(async move {
            tokio::pin!(logs);
            while let Some(message) = logs.next().await {
                this.handle_rpc_log(message);
            }
        }));

        self.response_tasks.lock().unwrap().extend(handles);
    }

    fn handle_function_load_response(&self, message: StreamingMessage) {
        let Some(Content::FunctionLoadResponse(response)) = message.content else {
            return;
        };
        let function_id = response.function_id;
        let succeeded = response
            .result
            .as_ref()
            .map(|r| r.is_success())
            .unwrap_or(false);

        if !succeeded {
            let exception = response.result.and_then(|r| r.exception).unwrap_or_default();
            let error = ChannelError::FunctionLoadFailed {
                function_id: function_id.clone(),
                message: exception.message,
                stack_trace: (!exception.stack_trace.is_empty()).then_some(exception.stack_trace),
            };
            tracing::error!(function_id = %function_id, error = %error, "function load failed");
            self.registry.record_load_error(&function_id, error);
        }

        self.attach_dispatcher(function_id);
    }

    fn attach_dispatcher(&self, function_id: String) {
        let transport = self.transport.lock().unwrap().clone();
        let Some(transport) = transport else {
            tracing::error!(function_id = %function_id, "cannot attach dispatcher before transport is connected");
            return;
        };
        let handles = dispatcher::spawn_consumers(
            function_id,
            self.registry.clone(),
            self.correlation.clone(),
            transport,
            self.capabilities.clone(),
            self.metrics.clone(),
            self.config.dispatch_parallelism,
            self.dispose_token.clone(),
        );
        self.dispatcher_tasks.lock().unwrap().extend(handles);
    }

    fn handle_invocation_response(&self, message: StreamingMessage) {
        let Some(Content::InvocationResponse(response)) = message.content else {
            return;
        };
        let Some(context) = self.correlation.remove(&response.invocation_id) else {
            tracing::debug!(
                invocation_id = %response.invocation_id,
                "dropping InvocationResponse for unknown or already-completed invocation"
            );
            return;
        };
        self.metrics.invocation_completed(&context.function.function_id);

        let outcome = materialize_outcome(response);
        context.complete(outcome);
    }

    fn handle_rpc_log(&self, message: StreamingMessage) {
        let Some(Content::RpcLog(log)) = message.content else {
            return;
        };
        let level = wire::RpcLogLevel::try_from(log.log_level).unwrap_or(wire::RpcLogLevel::Information);
        let exception = log.exception.as_ref();

        if log.invocation_id.is_empty() {
            emit_log(&self.worker_id, level, &log.message, exception);
            return;
        }

        match self.correlation.get(&log.invocation_id) {
            Some(context) => {
                let span = context.span.clone();
                span.in_scope(|| emit_log(&self.worker_id, level, &log.message, exception));
            }
            None => emit_log(&self.worker_id, level, &log.message, exception),
        }
    }
}

fn materialize_outcome(response: wire::InvocationResponse) -> ChannelResult<InvocationOutcome> {
    let result = response.result.ok_or_else(|| ChannelError::InvocationFailed {
        invocation_id: response.invocation_id.clone(),
        message: "InvocationResponse carried no result".to_string(),
        stack_trace: None,
    })?;

    if !result.is_success() {
        let exception = result.exception.unwrap_or_default();
        let message = if exception.message.is_empty() {
            result.result
        } else {
            exception.message
        };
        return Err(ChannelError::InvocationFailed {
            invocation_id: response.invocation_id,
            message,
            stack_trace: (!exception.stack_trace.is_empty()).then_some(exception.stack_trace),
        });
    }

    let mut outputs = HashMap::with_capacity(response.output_data.len());
    for binding in response.output_data {
        if let Some(data) = binding.data {
            outputs.insert(binding.name, converter::from_wire(&data));
        }
    }
    let return_value = response.return_value.as_ref().map(converter::from_wire);

    Ok(InvocationOutcome {
        outputs,
        return_value,
    })
}

fn emit_log(worker_id: &str, level: wire::RpcLogLevel, message: &str, exception: Option<&wire::RpcException>) {
    let exception_message = exception.map(|e| e.message.as_str()).unwrap_or("");
    match level {
        wire::RpcLogLevel::Trace => {
            tracing::trace!(worker_id, exception = exception_message, "{message}")
        }
        wire::RpcLogLevel::Debug => {
            tracing::debug!(worker_id, exception = exception_message, "{message}")
        }
        wire::RpcLogLevel::Information => {
            tracing::info!(worker_id, exception = exception_message, "{message}")
        }
        wire::RpcLogLevel::Warning => {
            tracing::warn!(worker_id, exception = exception_message, "{message}")
        }
        wire::RpcLogLevel::Error | wire::RpcLogLevel::Critical => {
            tracing::error!(worker_id, exception = exception_message, "{message}")
        }
        wire::RpcLogLevel::None => {}
    }
}

fn function_metadata_to_wire(metadata: &FunctionMetadata) -> RpcFunctionMetadata {
    RpcFunctionMetadata {
        function_id: metadata.function_id.clone(),
        name: metadata.name.clone(),
        entry_point: metadata.entry_point.clone(),
        directory: metadata.directory.clone(),
        script_file: metadata.script_file.clone(),
        is_proxy: metadata.is_proxy,
        bindings: metadata.bindings.iter().map(binding_to_wire).collect(),
        managed_dependency_enabled: metadata.managed_dependency_enabled,
    }
}

fn binding_to_wire(binding: &BindingInfo) -> wire::BindingInfo {
    let direction = match binding.direction {
        Direction::In => BindingDirection::In,
        Direction::Out => BindingDirection::Out,
        Direction::InOut => BindingDirection::Inout,
    };
    wire::BindingInfo {
        name: binding.name.clone(),
        direction: direction as i32,
        r#type: binding.binding_type.clone(),
        data_type: binding.data_type.clone().unwrap_or_default(),
    }
}
