//! Exit metrics: outcome counters and per-method latency percentiles.
//!
//! Every recorded exit is also emitted through the `metrics` facade as
//! `exitgate_exits_total{code}` and `exitgate_exit_latency_ms{method}`; the
//! local counters back the diagnostics snapshot.

use std::collections::{BTreeMap, VecDeque};

use exitgate_storage::{CacheStats, ExitSummary};
use serde::Serialize;

use crate::result::{ExitResult, ResultCode, SearchMethod};
use crate::state_machine::GateState;

/// Latency samples kept per search method.
const MAX_SAMPLES: usize = 1024;

/// Latency distribution of one search method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Point-in-time view of the lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_exits: u64,
    pub successes: u64,
    pub failures: u64,
    /// Fees of exits that closed a record.
    pub revenue: i64,
    pub by_code: BTreeMap<ResultCode, u64>,
    pub by_method: BTreeMap<SearchMethod, LatencyStats>,
    pub gate_state: GateState,
    pub cache: Option<CacheStats>,
    /// Closed records since midnight UTC, if the store answered.
    pub today: Option<ExitSummary>,
}

#[derive(Debug, Default)]
struct MethodSamples {
    count: u64,
    samples: VecDeque<u64>,
}

impl MethodSamples {
    fn push(&mut self, elapsed_ms: u64) {
        self.count += 1;
        self.samples.push_back(elapsed_ms);
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    fn stats(&self) -> LatencyStats {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        LatencyStats {
            count: self.count,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

/// Counters owned by the lane worker.
#[derive(Debug, Default)]
pub struct LaneMetrics {
    total_exits: u64,
    successes: u64,
    revenue: i64,
    by_code: BTreeMap<ResultCode, u64>,
    by_method: BTreeMap<SearchMethod, MethodSamples>,
}

impl LaneMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &ExitResult) {
        metrics::counter!("exitgate_exits_total", "code" => result.code.as_str()).increment(1);
        if let Some(method) = result.search_method {
            metrics::histogram!("exitgate_exit_latency_ms", "method" => method.as_str())
                .record(result.elapsed_ms as f64);
        }

        self.total_exits += 1;
        if result.success {
            self.successes += 1;
        }
        *self.by_code.entry(result.code).or_default() += 1;

        // a closed record counts even when the gate failed afterwards
        if let Some(fee) = result.fee {
            self.revenue += fee;
        }
        if let Some(method) = result.search_method {
            self.by_method
                .entry(method)
                .or_default()
                .push(result.elapsed_ms);
        }
    }

    pub fn snapshot(
        &self,
        gate_state: GateState,
        cache: Option<CacheStats>,
        today: Option<ExitSummary>,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            total_exits: self.total_exits,
            successes: self.successes,
            failures: self.total_exits - self.successes,
            revenue: self.revenue,
            by_code: self.by_code.clone(),
            by_method: self
                .by_method
                .iter()
                .map(|(method, samples)| (*method, samples.stats()))
                .collect(),
            gate_state,
            cache,
            today,
        }
    }
}
