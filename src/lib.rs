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

//! Host-side control channel for an out-of-process language worker.
//!
//! This crate implements the concurrent dispatch/state machine that mediates between a
//! function-hosting runtime and a language worker process over a bidirectional gRPC stream: the
//! worker's lifecycle (handshake, capability negotiation, environment reload, teardown), function
//! registration, and bounded-concurrency invocation dispatch with response correlation.
//!
//! See `DESIGN.md` for how the modules below were grounded against this codebase's existing
//! conventions, and `SPEC_FULL.md` for the full requirements this crate implements.
//!
//! [`channel::Channel`] is the entry point; it composes every other module.

pub mod capabilities;
pub mod channel;
pub mod config;
pub mod converter;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filewatch;
pub mod metrics;
pub mod model;
pub mod process;
pub mod registry;
pub mod state;
pub mod transport;
pub mod wire;

pub use channel::Channel;
pub use config::ChannelConfig;
pub use error::{ChannelError, ChannelResult};
pub use model::{
    BindingInfo, ClaimsIdentity, Direction, FunctionMetadata, HttpValue, InvocationOutcome,
    InvocationResultReceiver, ScriptInvocationContext, Value, WorkerConfig,
};
pub use state::ChannelState;
