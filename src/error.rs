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

use thiserror::Error;

/// Errors surfaced by the channel's public API and used to complete invocation result promises.
///
/// Kept separate from the crate's internal `anyhow`-friendly plumbing: callers need to match on
/// kind (a load failure is retryable by the caller in a way a transport failure is not) so this
/// stays a closed, `thiserror`-derived enum rather than a type-erased error.
#[derive(Debug, Error, Clone)]
pub enum ChannelError {
    #[error("worker did not emit StartStream within the startup timeout")]
    StartupTimeout,

    #[error("worker did not respond to WorkerInitRequest within the init timeout")]
    InitTimeout,

    #[error("worker init failed: {message}")]
    InitFailed { message: String },

    #[error("function {function_id} failed to load: {message}")]
    FunctionLoadFailed {
        function_id: String,
        message: String,
        stack_trace: Option<String>,
    },

    #[error("invocation {invocation_id} failed: {message}")]
    InvocationFailed {
        invocation_id: String,
        message: String,
        stack_trace: Option<String>,
    },

    #[error("failed to convert value for invocation {invocation_id}: {message}")]
    Conversion {
        invocation_id: String,
        message: String,
    },

    #[error("worker environment reload did not complete within the reload timeout")]
    ReloadTimeout,

    #[error("transport to worker {worker_id} failed: {message}")]
    Transport { worker_id: String, message: String },

    #[error("channel for worker {worker_id} was disposed")]
    Disposed { worker_id: String },

    #[error("invocation was cancelled before it was sent")]
    Cancelled,

    #[error("no input queue has been set up for function {function_id}")]
    UnknownFunction { function_id: String },

    #[error("illegal state transition for worker {worker_id}: {message}")]
    IllegalStateTransition { worker_id: String, message: String },
}

impl ChannelError {
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport { .. } | ChannelError::Disposed { .. }
        )
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;
