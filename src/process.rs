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

/// A handle onto the out-of-process worker executable.
///
/// Spawning policy, restart policy, and stdout/stderr plumbing belong to a collaborator upstream
/// of this crate (see §1/§6 — "the worker process launcher" is explicitly out of scope); this
/// crate only needs enough of a handle to know the worker's pid for diagnostics and to cascade a
/// cancel into it at dispose.
pub trait WorkerProcessHandle: Send + Sync + 'static {
    /// The OS process id, for logging and diagnostics.
    fn id(&self) -> u32;

    /// Requests termination of the worker process. Called exactly once, from `Channel::dispose`.
    /// Implementations decide how forceful this is (graceful shutdown signal vs. kill).
    fn cancel(&self);
}

/// A `WorkerProcessHandle` that does nothing, for tests and for embedding this crate in a context
/// where the worker process's lifecycle is managed entirely externally.
pub struct NoopProcessHandle {
    pid: u32,
}

impl NoopProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl WorkerProcessHandle for NoopProcessHandle {
    fn id(&self) -> u32 {
        self.pid
    }

    fn cancel(&self) {}
}
