// Copyright 2025 Scorebook Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metric trait contracts and per-invocation result snapshots
//!
//! Metrics are stateless: `measure` returns an immutable [`Measurement`]
//! rather than writing score/error fields back onto the metric object. The
//! same metric instance may therefore serve any number of invocations,
//! including concurrent ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::test_case::{ConversationalTestCase, TurnTestCase};

/// Tri-state outcome of a single measurement.
///
/// `Indeterminate` exists for third-party metrics that cannot decide
/// pass/fail cleanly for every score; the aggregator counts it as a failure
/// through an explicit match arm rather than a caught exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    Indeterminate,
}

impl Verdict {
    /// Threshold comparison used by most score-based metrics
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score >= threshold {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn passed(self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Immutable outcome of one `measure` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    /// Score in the metric's own scale (typically 0.0 - 1.0)
    pub score: f64,

    /// Whether the score clears the metric's bar
    pub verdict: Verdict,

    /// Human-readable explanation of the score
    pub reason: Option<String>,

    /// Cost incurred for this measurement in USD
    pub evaluation_cost: Option<f64>,

    /// Verbose diagnostic output, when the metric produces any
    pub verbose_logs: Option<String>,
}

impl Measurement {
    /// Measurement whose verdict follows from a threshold comparison
    pub fn scored(score: f64, threshold: f64) -> Self {
        Self {
            score,
            verdict: Verdict::from_score(score, threshold),
            reason: None,
            evaluation_cost: None,
            verbose_logs: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.evaluation_cost = Some(cost);
        self
    }

    pub fn with_verbose_logs(mut self, logs: impl Into<String>) -> Self {
        self.verbose_logs = Some(logs.into());
        self
    }
}

/// Errors raised from a metric's scoring logic.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("evaluation timeout")]
    Timeout,

    #[error("{0}")]
    Evaluation(String),
}

/// Scoring configuration that participates in cache validity.
///
/// A cached result is replayable only when the stored configuration equals
/// the metric's current one; any drift (threshold, strict mode, model, or
/// metric-specific settings) forces recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfiguration {
    pub threshold: f64,
    pub strict_mode: bool,
    pub evaluation_model: Option<String>,

    /// Metric-specific knobs beyond the common trio
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

/// Single-turn metric contract.
///
/// `measure` is the synchronous path; `a_measure` defaults to delegating to
/// it and is overridden by metrics that are natively async. The orchestrator
/// controls timing externally in both cases: a measurement runs to completion
/// within its invocation regardless of [`Metric::async_capable`].
#[async_trait]
pub trait Metric: Send + Sync {
    /// Name under which results are recorded and aggregated
    fn name(&self) -> &str;

    /// Minimum passing score
    fn threshold(&self) -> f64;

    /// Strict mode collapses the passing band to a binary decision
    fn strict_mode(&self) -> bool {
        false
    }

    /// Identifier of the model used for scoring, if any
    fn evaluation_model(&self) -> Option<String> {
        None
    }

    /// Whether the metric supports internal concurrency
    fn async_capable(&self) -> bool {
        true
    }

    /// Configuration fingerprint for cache validity. Metrics with extra
    /// scoring knobs should override and add them to `settings`.
    fn configuration(&self) -> MetricConfiguration {
        MetricConfiguration {
            threshold: self.threshold(),
            strict_mode: self.strict_mode(),
            evaluation_model: self.evaluation_model(),
            settings: BTreeMap::new(),
        }
    }

    /// Score a single-turn case
    fn measure(&self, test_case: &TurnTestCase) -> Result<Measurement, MetricError>;

    /// Async scoring path; defaults to the synchronous implementation
    async fn a_measure(&self, test_case: &TurnTestCase) -> Result<Measurement, MetricError> {
        self.measure(test_case)
    }
}

/// Conversation-level metric contract.
#[async_trait]
pub trait ConversationalMetric: Send + Sync {
    fn name(&self) -> &str;

    fn threshold(&self) -> f64;

    fn strict_mode(&self) -> bool {
        false
    }

    fn evaluation_model(&self) -> Option<String> {
        None
    }

    fn async_capable(&self) -> bool {
        true
    }

    /// Score a whole conversation
    fn measure(&self, test_case: &ConversationalTestCase) -> Result<Measurement, MetricError>;

    /// Async scoring path; defaults to the synchronous implementation
    async fn a_measure(
        &self,
        test_case: &ConversationalTestCase,
    ) -> Result<Measurement, MetricError> {
        self.measure(test_case)
    }
}

/// Closed union over the two metric variants, matched exhaustively when the
/// orchestrator partitions a batch's metrics.
#[derive(Clone)]
pub enum EvalMetric {
    Turn(Arc<dyn Metric>),
    Conversation(Arc<dyn ConversationalMetric>),
}

impl EvalMetric {
    pub fn turn(metric: impl Metric + 'static) -> Self {
        EvalMetric::Turn(Arc::new(metric))
    }

    pub fn conversation(metric: impl ConversationalMetric + 'static) -> Self {
        EvalMetric::Conversation(Arc::new(metric))
    }

    pub fn name(&self) -> &str {
        match self {
            EvalMetric::Turn(m) => m.name(),
            EvalMetric::Conversation(m) => m.name(),
        }
    }
}

/// Immutable snapshot of one metric's outcome for one test case.
///
/// Created once per (test case, metric) pair and never mutated afterwards;
/// this is what result records accumulate and what the cache stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub threshold: f64,
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub success: bool,
    pub strict_mode: bool,
    pub evaluation_model: Option<String>,
    pub error: Option<String>,
    pub evaluation_cost: Option<f64>,
    pub verbose_logs: Option<String>,
}

impl MetricData {
    /// Snapshot of a completed measurement.
    ///
    /// `verbose_override` is the run-level verbose toggle: `Some(false)`
    /// strips verbose logs, `Some(true)` and `None` keep whatever the metric
    /// produced. The tri-state verdict is collapsed here: `Indeterminate`
    /// records as unsuccessful.
    pub fn from_measurement(
        metric: &dyn Metric,
        measurement: &Measurement,
        verbose_override: Option<bool>,
    ) -> Self {
        let success = match measurement.verdict {
            Verdict::Pass => true,
            Verdict::Fail | Verdict::Indeterminate => false,
        };
        let verbose_logs = match verbose_override {
            Some(false) => None,
            _ => measurement.verbose_logs.clone(),
        };
        Self {
            name: metric.name().to_string(),
            threshold: metric.threshold(),
            score: Some(measurement.score),
            reason: measurement.reason.clone(),
            success,
            strict_mode: metric.strict_mode(),
            evaluation_model: metric.evaluation_model(),
            error: None,
            evaluation_cost: measurement.evaluation_cost,
            verbose_logs,
        }
    }

    /// Snapshot of a failed invocation: score and reason are absent and
    /// success is forced false.
    pub fn from_error(metric: &dyn Metric, error: String) -> Self {
        Self {
            name: metric.name().to_string(),
            threshold: metric.threshold(),
            score: None,
            reason: None,
            success: false,
            strict_mode: metric.strict_mode(),
            evaluation_model: metric.evaluation_model(),
            error: Some(error),
            evaluation_cost: None,
            verbose_logs: None,
        }
    }

    /// As [`MetricData::from_measurement`], for conversational metrics.
    pub fn from_conversational_measurement(
        metric: &dyn ConversationalMetric,
        measurement: &Measurement,
        verbose_override: Option<bool>,
    ) -> Self {
        let success = match measurement.verdict {
            Verdict::Pass => true,
            Verdict::Fail | Verdict::Indeterminate => false,
        };
        let verbose_logs = match verbose_override {
            Some(false) => None,
            _ => measurement.verbose_logs.clone(),
        };
        Self {
            name: metric.name().to_string(),
            threshold: metric.threshold(),
            score: Some(measurement.score),
            reason: measurement.reason.clone(),
            success,
            strict_mode: metric.strict_mode(),
            evaluation_model: metric.evaluation_model(),
            error: None,
            evaluation_cost: measurement.evaluation_cost,
            verbose_logs,
        }
    }

    /// As [`MetricData::from_error`], for conversational metrics.
    pub fn from_conversational_error(metric: &dyn ConversationalMetric, error: String) -> Self {
        Self {
            name: metric.name().to_string(),
            threshold: metric.threshold(),
            score: None,
            reason: None,
            success: false,
            strict_mode: metric.strict_mode(),
            evaluation_model: metric.evaluation_model(),
            error: Some(error),
            evaluation_cost: None,
            verbose_logs: None,
        }
    }
}
