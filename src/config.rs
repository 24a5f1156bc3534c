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

use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Renders a config (or a piece of one) in a form that is safe to put in a log line — i.e. with
/// any secret fields redacted. Nothing in `ChannelConfig` is secret today, but the convention is
/// kept so a future field has somewhere obvious to be redacted.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Timeouts and concurrency knobs the state machine and dispatcher are built around. All three
/// timeouts are fixed at 30s by the spec this channel implements; they are exposed here as
/// configuration rather than hardcoded so tests can shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub endpoint: SocketAddr,
    #[serde(with = "humantime_duration")]
    pub startup_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub init_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub reload_timeout: Duration,
    pub dispatch_parallelism: usize,
    #[serde(with = "humantime_duration")]
    pub file_watch_debounce: Duration,
    pub host_version: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 49150),
            startup_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(30),
            reload_timeout: Duration::from_secs(30),
            dispatch_parallelism: 6,
            file_watch_debounce: Duration::from_millis(300),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl SafeDisplay for ChannelConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "endpoint: {}", self.endpoint);
        let _ = writeln!(&mut result, "startup timeout: {:?}", self.startup_timeout);
        let _ = writeln!(&mut result, "init timeout: {:?}", self.init_timeout);
        let _ = writeln!(&mut result, "reload timeout: {:?}", self.reload_timeout);
        let _ = writeln!(
            &mut result,
            "dispatch parallelism: {}",
            self.dispatch_parallelism
        );
        let _ = writeln!(
            &mut result,
            "file watch debounce: {:?}",
            self.file_watch_debounce
        );
        let _ = write!(&mut result, "host version: {}", self.host_version);
        result
    }
}

/// Loads a `ChannelConfig` by layering, in increasing priority: the built-in `Default`, an
/// optional TOML file, and environment variables prefixed `WORKER_CHANNEL_`. Mirrors the
/// file-then-env layering this codebase's service configs use.
pub struct ConfigLoader {
    file: PathBuf,
}

impl ConfigLoader {
    pub fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<ChannelConfig, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(
            ChannelConfig::default(),
        ))
        .merge(Toml::file(&self.file))
        .merge(Env::prefixed("WORKER_CHANNEL_").split("__"))
        .extract()
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        humantime_serde::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum DurationOrMillis {
            Millis(u64),
            Humantime(String),
        }
        match DurationOrMillis::deserialize(deserializer)? {
            DurationOrMillis::Millis(ms) => Ok(Duration::from_millis(ms)),
            DurationOrMillis::Humantime(s) => humantime_serde::deserialize(
                serde_json::Value::String(s)
                    .serialize(serde_json::value::Serializer)
                    .map_err(serde::de::Error::custom)?,
            )
            .map_err(serde::de::Error::custom),
        }
    }
}
