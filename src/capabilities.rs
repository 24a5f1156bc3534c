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

use dashmap::DashMap;

/// Capabilities advertised by the worker at handshake time.
///
/// Per the data model invariant, entries are only ever added or overwritten — they are never
/// removed — which is why this wraps a plain `DashMap` rather than something that would also need
/// to support deletion.
#[derive(Debug, Default)]
pub struct Capabilities {
    entries: DashMap<String, String>,
}

/// Capability advertised by the worker that enables raw HTTP body bytes alongside the parsed body.
pub const RAW_HTTP_BODY_BYTES: &str = "RawHttpBodyBytes";
/// Capability advertised by the worker that enables typed-data collection variants.
pub const TYPED_DATA_COLLECTION_SUPPORTED: &str = "TypedDataCollectionSupported";

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a handshake response's capability map in. Empty values are dropped — the data model
    /// requires capability values to be non-empty.
    pub fn update(&self, entries: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in entries {
            if value.is_empty() {
                continue;
            }
            self.entries.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn supports_raw_http_body_bytes(&self) -> bool {
        self.has(RAW_HTTP_BODY_BYTES)
    }

    pub fn supports_typed_data_collections(&self) -> bool {
        self.has(TYPED_DATA_COLLECTION_SUPPORTED)
    }

    pub fn snapshot(&self) -> std::collections::HashMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
