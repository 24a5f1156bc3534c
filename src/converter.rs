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

//! Pure, stateless mapping between this crate's domain `Value` and the wire `TypedData` oneof.
//!
//! Nothing here depends on any particular HTTP framework or on the rest of the channel's state —
//! it sits on the dispatch hot path (every input binding and every output binding passes through
//! it) but it is entirely self-contained, consistent with the "pure, stateless mapping" framing
//! this crate's design is built around.

use std::collections::HashMap;

use crate::capabilities::Capabilities;
use crate::model::{HttpValue, Value};
use crate::wire::{
    self, typed_data::Data, CollectionBytes, CollectionDouble, CollectionSInt64, CollectionString,
    RpcClaimsIdentity, RpcHttp, TypedData,
};

/// Converts a domain `Value` into its wire representation.
///
/// Collection variants are only emitted when the worker has advertised
/// `TypedDataCollectionSupported`; otherwise a collection is JSON-serialized like any other
/// compound value. Raw HTTP body bytes are only attached when `RawHttpBodyBytes` is advertised.
pub fn to_wire(value: &Value, capabilities: &Capabilities) -> TypedData {
    let data = match value {
        Value::Empty => None,
        Value::Bytes(bytes) => Some(Data::Bytes(bytes.clone())),
        Value::String(s) => Some(Data::String(s.clone())),
        Value::Int(i) => Some(Data::Int(*i)),
        Value::Double(d) => Some(Data::Double(*d)),
        Value::Http(http) => Some(Data::Http(http_to_wire(http, capabilities))),
        Value::CollectionBytes(items) if capabilities.supports_typed_data_collections() => {
            Some(Data::CollectionBytes(CollectionBytes {
                value: items.clone(),
            }))
        }
        Value::CollectionString(items) if capabilities.supports_typed_data_collections() => {
            Some(Data::CollectionString(CollectionString {
                value: items.clone(),
            }))
        }
        Value::CollectionDouble(items) if capabilities.supports_typed_data_collections() => {
            Some(Data::CollectionDouble(CollectionDouble {
                value: items.clone(),
            }))
        }
        Value::CollectionInt(items) if capabilities.supports_typed_data_collections() => {
            Some(Data::CollectionSint64(CollectionSInt64 {
                value: items.clone(),
            }))
        }
        // Collections without capability support, and the catch-all Json case, both fall through
        // to JSON serialization below.
        Value::CollectionBytes(_)
        | Value::CollectionString(_)
        | Value::CollectionDouble(_)
        | Value::CollectionInt(_)
        | Value::Json(_) => Some(to_json_data(value)),
    };
    TypedData { data }
}

fn to_json_data(value: &Value) -> Data {
    let json = match value {
        Value::Json(json) => serde_json::to_string(json),
        Value::CollectionBytes(items) => serde_json::to_string(items),
        Value::CollectionString(items) => serde_json::to_string(items),
        Value::CollectionDouble(items) => serde_json::to_string(items),
        Value::CollectionInt(items) => serde_json::to_string(items),
        other => serde_json::to_string(&fallback_string(other)),
    };
    match json {
        Ok(s) => Data::Json(s),
        Err(_) => Data::String(fallback_string(value)),
    }
}

fn fallback_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

fn http_to_wire(http: &HttpValue, capabilities: &Capabilities) -> RpcHttp {
    let headers = http
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    let identities = http
        .identities
        .iter()
        .map(|identity| RpcClaimsIdentity {
            claims: identity.claims.clone(),
            authentication_type: identity.authentication_type.clone().unwrap_or_default(),
        })
        .collect();
    let raw_body = if capabilities.supports_raw_http_body_bytes() {
        http.raw_body.clone()
    } else {
        None
    };
    RpcHttp {
        url: http.url.clone(),
        method: http.method.clone(),
        headers,
        query: http.query.clone(),
        params: http.params.clone(),
        identities,
        body: Some(to_wire(&http.body, capabilities)),
        has_raw_body: raw_body.is_some(),
        raw_body: raw_body.unwrap_or_default(),
    }
}

/// Converts a wire `TypedData` into its domain representation. JSON payloads are parsed without
/// any date coercion: date-shaped strings remain strings.
pub fn from_wire(data: &TypedData) -> Value {
    match &data.data {
        None => Value::Empty,
        Some(Data::Bytes(b)) => Value::Bytes(b.clone()),
        Some(Data::String(s)) => Value::String(s.clone()),
        Some(Data::Int(i)) => Value::Int(*i),
        Some(Data::Double(d)) => Value::Double(*d),
        Some(Data::Json(json)) => match serde_json::from_str(json) {
            Ok(value) => Value::Json(value),
            Err(_) => Value::String(json.clone()),
        },
        Some(Data::Http(http)) => Value::Http(Box::new(http_from_wire(http))),
        Some(Data::CollectionBytes(c)) => Value::CollectionBytes(c.value.clone()),
        Some(Data::CollectionString(c)) => Value::CollectionString(c.value.clone()),
        Some(Data::CollectionDouble(c)) => Value::CollectionDouble(c.value.clone()),
        Some(Data::CollectionSint64(c)) => Value::CollectionInt(c.value.clone()),
    }
}

fn http_from_wire(http: &RpcHttp) -> HttpValue {
    let identities = http
        .identities
        .iter()
        .map(|identity| crate::model::ClaimsIdentity {
            claims: identity.claims.clone(),
            authentication_type: if identity.authentication_type.is_empty() {
                None
            } else {
                Some(identity.authentication_type.clone())
            },
        })
        .collect();
    let body = http
        .body
        .as_ref()
        .map(from_wire)
        .unwrap_or(Value::Empty);
    HttpValue {
        url: http.url.clone(),
        method: http.method.clone(),
        headers: http.headers.clone(),
        query: http.query.clone(),
        params: http.params.clone(),
        identities,
        body: Box::new(body),
        raw_body: http.has_raw_body.then(|| http.raw_body.clone()),
    }
}

/// The content-type-driven classification used when building an `HttpValue` body from a raw
/// request upstream of this crate. Exposed so the out-of-scope HTTP-adaptation layer can reuse
/// the same branching this crate's design assumes, without duplicating it.
pub fn classify_http_body(content_type: Option<&str>, body: &[u8]) -> Value {
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    if content_type.starts_with("application/octet-stream") || content_type.starts_with("multipart/") {
        return Value::Bytes(body.to_vec());
    }
    if content_type.contains("json") {
        return match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(json) => Value::Json(json),
            Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
        };
    }
    Value::String(String::from_utf8_lossy(body).into_owned())
}

/// Builds the wire `trigger_metadata` map from a context's trigger metadata values.
pub fn trigger_metadata_to_wire(
    metadata: &HashMap<String, Value>,
    capabilities: &Capabilities,
) -> HashMap<String, TypedData> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), to_wire(v, capabilities)))
        .collect()
}

/// Builds the wire `input_data` parameter bindings from a context's input values, preserving a
/// stable order derived from the supplied name ordering (callers pass `FunctionMetadata`'s
/// binding order; this crate imposes none of its own).
pub fn inputs_to_wire(
    ordered_names: &[String],
    inputs: &HashMap<String, Value>,
    capabilities: &Capabilities,
) -> Vec<wire::ParameterBinding> {
    ordered_names
        .iter()
        .filter_map(|name| {
            inputs.get(name).map(|value| wire::ParameterBinding {
                name: name.clone(),
                data: Some(to_wire(value, capabilities)),
            })
        })
        .collect()
}
