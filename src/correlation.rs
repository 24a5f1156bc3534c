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
use tokio::sync::OwnedSemaphorePermit;

use crate::model::ScriptInvocationContext;

/// A context awaiting its response, together with the dispatch-parallelism permit it holds for
/// the duration of the round trip. The permit is acquired before the `InvocationRequest` is sent
/// and is only released when this struct is dropped — i.e. when the entry is removed from the
/// table on response, send failure, or dispose — so the in-flight bound covers the whole request
/// lifetime, not just the instantaneous work of constructing the request.
struct InFlight {
    context: Arc<ScriptInvocationContext>,
    _permit: OwnedSemaphorePermit,
}

/// Concurrent map from invocation id to the context awaiting its response.
///
/// Per the data model invariant, an invocation id is present here iff an `InvocationRequest` has
/// been sent and no `InvocationResponse` (or cancellation/dispose) has yet completed its promise.
/// The dispatcher is the sole inserter for a given id; the response handler and dispose are the
/// only removers, and both remove-then-complete, so a given context is completed at most once
/// through this table.
#[derive(Default)]
pub struct CorrelationTable {
    inner: DashMap<String, InFlight>,
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a context along with the dispatch-parallelism permit it holds until completion.
    pub fn insert(
        &self,
        invocation_id: String,
        context: Arc<ScriptInvocationContext>,
        permit: OwnedSemaphorePermit,
    ) {
        self.inner.insert(
            invocation_id,
            InFlight {
                context,
                _permit: permit,
            },
        );
    }

    /// Removes and returns the context for `invocation_id`, if one is still waiting. Returns
    /// `None` for a duplicate response or a response that arrived after the context was already
    /// completed some other way (e.g. dispose) — both are expected, not errors. Dropping the
    /// removed entry releases its dispatch-parallelism permit.
    pub fn remove(&self, invocation_id: &str) -> Option<Arc<ScriptInvocationContext>> {
        self.inner.remove(invocation_id).map(|(_, v)| v.context)
    }

    /// Looks up a context without removing it — used by log routing, which must not consume the
    /// correlation entry an eventual `InvocationResponse` still needs.
    pub fn get(&self, invocation_id: &str) -> Option<Arc<ScriptInvocationContext>> {
        self.inner.get(invocation_id).map(|e| e.value().context.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drains every entry out of the table. Used at dispose: the caller completes each returned
    /// context with a dispose error. Each drained entry's permit is released as it's dropped.
    pub fn drain(&self) -> Vec<Arc<ScriptInvocationContext>> {
        let ids: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.inner.remove(&id).map(|(_, v)| v.context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptInvocationContext;
    use std::collections::HashMap;
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    /// A standalone permit for tests that don't care about the dispatch-parallelism bound itself.
    fn throwaway_permit() -> OwnedSemaphorePermit {
        Arc::new(Semaphore::new(1)).try_acquire_owned().expect("acquire permit")
    }

    fn function() -> Arc<crate::model::FunctionMetadata> {
        Arc::new(crate::model::FunctionMetadata {
            function_id: "f1".into(),
            name: "f1".into(),
            entry_point: "handler".into(),
            script_file: "f1.py".into(),
            directory: ".".into(),
            is_proxy: false,
            bindings: vec![],
            managed_dependency_enabled: false,
        })
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let table = CorrelationTable::new();
        let (ctx, _rx) = ScriptInvocationContext::new(
            "inv-1",
            function(),
            HashMap::new(),
            HashMap::new(),
            CancellationToken::new(),
        );
        let ctx = Arc::new(ctx);
        table.insert("inv-1".to_string(), ctx.clone(), throwaway_permit());
        assert_eq!(table.len(), 1);
        let removed = table.remove("inv-1").expect("present");
        assert_eq!(removed.invocation_id, "inv-1");
        assert!(table.is_empty());
    }

    #[test]
    fn remove_of_unknown_id_is_none() {
        let table = CorrelationTable::new();
        assert!(table.remove("missing").is_none());
    }

    #[test]
    fn drain_empties_the_table() {
        let table = CorrelationTable::new();
        for i in 0..3 {
            let (ctx, _rx) = ScriptInvocationContext::new(
                format!("inv-{i}"),
                function(),
                HashMap::new(),
                HashMap::new(),
                CancellationToken::new(),
            );
            table.insert(format!("inv-{i}"), Arc::new(ctx), throwaway_permit());
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 3);
        assert!(table.is_empty());
    }
}
