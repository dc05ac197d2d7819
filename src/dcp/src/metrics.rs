// Copyright 2026 DCP Stream Coordinator Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Grounded in `src/storage/src/monitor/local_metrics.rs`'s split between a
//! plain local snapshot struct and registered `prometheus` collectors.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{exponential_buckets, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Snapshot returned by `GetMetric` (spec §6): the most recently observed
/// latencies in milliseconds, plus the lifetime rebalance count.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metric {
    pub process_latency_ms: i64,
    pub dcp_latency_ms: i64,
    pub rebalance: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointMetric {
    pub flush_total: u64,
    pub flush_failures_total: u64,
}

/// Registers histograms/counters against a caller-supplied [`Registry`] and
/// keeps a lock-free last-value snapshot alongside them, the same
/// local-field-plus-collector split as the teacher's `StoreLocalMetrics`.
pub struct CoordinatorMetrics {
    dcp_latency: Histogram,
    process_latency: Histogram,
    rebalance_total: IntCounter,
    active_streams: IntGauge,
    checkpoint_flush_total: IntCounter,
    checkpoint_flush_failures_total: IntCounter,

    last_dcp_latency_ms: AtomicI64,
    last_process_latency_ms: AtomicI64,
    rebalance_count: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let dcp_latency = Histogram::with_opts(
            HistogramOpts::new("dcp_coordinator_dcp_latency_ms", "DCP event arrival latency")
                .buckets(exponential_buckets(1.0, 2.0, 16)?),
        )?;
        let process_latency = Histogram::with_opts(
            HistogramOpts::new(
                "dcp_coordinator_process_latency_ms",
                "Consumer processing latency",
            )
            .buckets(exponential_buckets(1.0, 2.0, 16)?),
        )?;
        let rebalance_total =
            IntCounter::new("dcp_coordinator_rebalance_total", "Rebalances completed")?;
        let active_streams = IntGauge::new(
            "dcp_coordinator_active_streams",
            "Currently open DCP sub-streams",
        )?;
        let checkpoint_flush_total = IntCounter::new(
            "dcp_coordinator_checkpoint_flush_total",
            "Checkpoint flush attempts",
        )?;
        let checkpoint_flush_failures_total = IntCounter::new(
            "dcp_coordinator_checkpoint_flush_failures_total",
            "Checkpoint flush failures",
        )?;

        registry.register(Box::new(dcp_latency.clone()))?;
        registry.register(Box::new(process_latency.clone()))?;
        registry.register(Box::new(rebalance_total.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(checkpoint_flush_total.clone()))?;
        registry.register(Box::new(checkpoint_flush_failures_total.clone()))?;

        Ok(Self {
            dcp_latency,
            process_latency,
            rebalance_total,
            active_streams,
            checkpoint_flush_total,
            checkpoint_flush_failures_total,
            last_dcp_latency_ms: AtomicI64::new(0),
            last_process_latency_ms: AtomicI64::new(0),
            rebalance_count: AtomicU64::new(0),
        })
    }

    pub fn observe_dcp_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as i64;
        self.dcp_latency.observe(ms as f64);
        self.last_dcp_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn observe_process_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as i64;
        self.process_latency.observe(ms as f64);
        self.last_process_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn record_rebalance(&self) {
        self.rebalance_total.inc();
        self.rebalance_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_streams(&self, count: i64) {
        self.active_streams.set(count);
    }

    pub fn record_checkpoint_flush(&self, ok: bool) {
        self.checkpoint_flush_total.inc();
        if !ok {
            self.checkpoint_flush_failures_total.inc();
        }
    }

    pub fn metric(&self) -> Metric {
        Metric {
            process_latency_ms: self.last_process_latency_ms.load(Ordering::Relaxed),
            dcp_latency_ms: self.last_dcp_latency_ms.load(Ordering::Relaxed),
            rebalance: self.rebalance_count.load(Ordering::Relaxed) as i64,
        }
    }

    pub fn checkpoint_metric(&self) -> CheckpointMetric {
        CheckpointMetric {
            flush_total: self.checkpoint_flush_total.get() as u64,
            flush_failures_total: self.checkpoint_flush_failures_total.get() as u64,
        }
    }
}
