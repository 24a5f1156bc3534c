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

//! The in-process event bus and the demultiplexer built on top of it.
//!
//! See `bus::EventBus` for the pub/sub fabric and `demux::InboundDemux` for the per-worker,
//! per-content-case filtering and one-shot subscriptions used by the channel state machine.

pub mod bus;
pub mod demux;

pub use bus::{Event, EventBus, WorkerErrorEvent};
pub use demux::InboundDemux;
