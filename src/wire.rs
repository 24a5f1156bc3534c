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

//! Generated wire types for the `FunctionRpc` service.
//!
//! The `.proto` file under `proto/worker_rpc.proto` is the source of truth; `build.rs` compiles it
//! with `tonic-build`/`prost` at build time. Nothing in this module is hand-written except the
//! `pub use` surface below, which gives the rest of the crate a short, stable set of names instead
//! of the fully qualified generated paths.

tonic::include_proto!("funcrpc");

pub use function_rpc_client::FunctionRpcClient;
pub use function_rpc_server::{FunctionRpc, FunctionRpcServer};
pub use streaming_message::Content;

impl StreamingMessage {
    pub fn content_case_name(&self) -> &'static str {
        match &self.content {
            Some(Content::StartStream(_)) => "StartStream",
            Some(Content::WorkerInitRequest(_)) => "WorkerInitRequest",
            Some(Content::WorkerInitResponse(_)) => "WorkerInitResponse",
            Some(Content::FunctionLoadRequest(_)) => "FunctionLoadRequest",
            Some(Content::FunctionLoadResponse(_)) => "FunctionLoadResponse",
            Some(Content::InvocationRequest(_)) => "InvocationRequest",
            Some(Content::InvocationResponse(_)) => "InvocationResponse",
            Some(Content::FunctionEnvironmentReloadRequest(_)) => {
                "FunctionEnvironmentReloadRequest"
            }
            Some(Content::FunctionEnvironmentReloadResponse(_)) => {
                "FunctionEnvironmentReloadResponse"
            }
            Some(Content::RpcLog(_)) => "RpcLog",
            None => "Empty",
        }
    }
}

impl StatusResult {
    pub fn is_success(&self) -> bool {
        self.status == StatusResultStatus::Success as i32
    }
}

/// A single content-case discriminant, used by the inbound demultiplexer to filter and by
/// subscriptions to name what they're waiting for. Kept separate from the generated
/// `Content` enum because waiters need to name a case *before* a message carrying that
/// variant exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCase {
    StartStream,
    WorkerInitResponse,
    FunctionLoadResponse,
    InvocationResponse,
    FunctionEnvironmentReloadResponse,
    RpcLog,
}

impl ContentCase {
    /// The content-case of a concrete message, if it's one the demultiplexer knows how to filter.
    pub fn of(content: &Content) -> Option<ContentCase> {
        match content {
            Content::StartStream(_) => Some(ContentCase::StartStream),
            Content::WorkerInitResponse(_) => Some(ContentCase::WorkerInitResponse),
            Content::FunctionLoadResponse(_) => Some(ContentCase::FunctionLoadResponse),
            Content::InvocationResponse(_) => Some(ContentCase::InvocationResponse),
            Content::FunctionEnvironmentReloadResponse(_) => {
                Some(ContentCase::FunctionEnvironmentReloadResponse)
            }
            Content::RpcLog(_) => Some(ContentCase::RpcLog),
            _ => None,
        }
    }

    pub fn matches(self, content: &Content) -> bool {
        matches!(
            (self, content),
            (ContentCase::StartStream, Content::StartStream(_))
                | (ContentCase::WorkerInitResponse, Content::WorkerInitResponse(_))
                | (ContentCase::FunctionLoadResponse, Content::FunctionLoadResponse(_))
                | (ContentCase::InvocationResponse, Content::InvocationResponse(_))
                | (
                    ContentCase::FunctionEnvironmentReloadResponse,
                    Content::FunctionEnvironmentReloadResponse(_)
                )
                | (ContentCase::RpcLog, Content::RpcLog(_))
        )
    }
}
