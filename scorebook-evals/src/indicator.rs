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

//! Progress notifications and grouped metric dispatch
//!
//! The listener is purely observational: enabling, disabling, or swapping it
//! never alters result semantics. The grouped dispatcher is the concurrent
//! strategy's collaborator; it runs every metric for one unit of work
//! together and awaits them as a group.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::cache::CachedTestCase;
use crate::runner::{a_run_conversational_metric, a_run_metric, MetricOutcome};
use scorebook_core::{
    ConversationalMetric, ConversationalTestCase, EvalError, Metric, MetricData, TurnTestCase,
};

/// Observer of batch and metric lifecycle events.
pub trait ProgressListener: Send + Sync {
    fn batch_started(&self, total_units: usize) {
        let _ = total_units;
    }

    fn metric_started(&self, metric_name: &str) {
        let _ = metric_name;
    }

    fn metric_finished(&self, metric_name: &str, from_cache: bool) {
        let _ = (metric_name, from_cache);
    }

    fn batch_finished(&self) {}
}

/// Listener that drops every event; used when the indicator is disabled.
pub struct NoopProgress;

impl ProgressListener for NoopProgress {}

/// Default listener: emits lifecycle events as tracing records.
pub struct TracingProgress;

impl ProgressListener for TracingProgress {
    fn batch_started(&self, total_units: usize) {
        debug!(total_units, "evaluation batch started");
    }

    fn metric_started(&self, metric_name: &str) {
        debug!(metric = metric_name, "measuring");
    }

    fn metric_finished(&self, metric_name: &str, from_cache: bool) {
        debug!(metric = metric_name, from_cache, "measured");
    }

    fn batch_finished(&self) {
        debug!("evaluation batch finished");
    }
}

/// Dispatch a unit's whole single-turn metric set and await it as a group.
///
/// Metrics for the same unit may run concurrently; no per-metric ordering is
/// imposed beyond all completing before the unit's record is finalized.
/// Outcomes come back in metric order regardless of completion order. The
/// first propagating failure (with `ignore_errors` off) aborts the group.
pub async fn measure_metrics_with_indicator(
    metrics: &[Arc<dyn Metric>],
    case: &TurnTestCase,
    cached: Option<&CachedTestCase>,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
    progress: &dyn ProgressListener,
) -> Result<Vec<MetricOutcome>, EvalError> {
    let futures = metrics.iter().map(|metric| async move {
        progress.metric_started(metric.name());
        let outcome =
            a_run_metric(metric.as_ref(), case, cached, ignore_errors, verbose_mode).await;
        if let Ok(outcome) = &outcome {
            progress.metric_finished(metric.name(), outcome.from_cache);
        }
        outcome
    });

    join_all(futures).await.into_iter().collect()
}

/// Conversational counterpart of [`measure_metrics_with_indicator`]. No
/// cached entry is consulted; conversational results are never cached.
pub async fn measure_conversational_metrics_with_indicator(
    metrics: &[Arc<dyn ConversationalMetric>],
    case: &ConversationalTestCase,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
    progress: &dyn ProgressListener,
) -> Result<Vec<MetricData>, EvalError> {
    let futures = metrics.iter().map(|metric| async move {
        progress.metric_started(metric.name());
        let data =
            a_run_conversational_metric(metric.as_ref(), case, ignore_errors, verbose_mode).await;
        if data.is_ok() {
            progress.metric_finished(metric.name(), false);
        }
        data
    });

    join_all(futures).await.into_iter().collect()
}
