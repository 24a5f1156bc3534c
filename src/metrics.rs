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

use prometheus::{
    histogram_opts, opts, Histogram, HistogramTimer, IntGaugeVec, Registry,
};

/// Process metrics for one channel instance.
///
/// Exposes `register(&Registry)` rather than owning a global registry, consistent with how a
/// process-wide `prometheus::Registry` is assembled by the binary that hosts this crate rather
/// than by the crate itself.
pub struct Metrics {
    startup_latency: Histogram,
    in_flight: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let startup_latency = Histogram::with_opts(histogram_opts!(
            "worker_channel_startup_latency_seconds",
            "Time from worker process launch to a completed init handshake.",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ))
        .expect("static histogram config is valid");

        let in_flight = IntGaugeVec::new(
            opts!(
                "worker_channel_invocations_in_flight",
                "Invocations dispatched to the worker with no response yet, per function."
            ),
            &["function_id"],
        )
        .expect("static gauge config is valid");

        Self {
            startup_latency,
            in_flight,
        }
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.startup_latency.clone()))?;
        registry.register(Box::new(self.in_flight.clone()))?;
        Ok(())
    }

    pub fn start_startup_timer(&self) -> HistogramTimer {
        self.startup_latency.start_timer()
    }

    pub fn invocation_dispatched(&self, function_id: &str) {
        self.in_flight.with_label_values(&[function_id]).inc();
    }

    pub fn invocation_completed(&self, function_id: &str) {
        self.in_flight.with_label_values(&[function_id]).dec();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
