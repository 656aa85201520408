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

//! Single-metric invocation with cache probing and failure isolation

use tracing::{debug, warn};

use crate::cache::{CachedMetricData, CachedTestCase};
use scorebook_core::{
    ConversationalMetric, ConversationalTestCase, EvalError, Metric, MetricData, TurnTestCase,
};

/// Outcome of running one metric against one unit of work.
#[derive(Debug, Clone)]
pub struct MetricOutcome {
    /// The immutable result snapshot appended to the unit's record
    pub data: MetricData,

    /// True when no invocation occurred and `data` is the stored snapshot
    pub from_cache: bool,

    /// Copy queued for cache write-back; present only when the metric did
    /// not error. Evaluation cost is zeroed on the copy, since a replay
    /// performs no computation.
    pub cacheable: Option<CachedMetricData>,
}

/// Run one single-turn metric, preferring a valid cached result.
///
/// A cache hit requires the stored configuration to equal the metric's
/// current one; the stored snapshot is returned unchanged, cost included.
/// On a fresh invocation failure: with `ignore_errors` the message is
/// captured into an errored snapshot and processing continues, otherwise the
/// failure propagates and aborts the batch.
pub fn run_metric(
    metric: &dyn Metric,
    case: &TurnTestCase,
    cached: Option<&CachedTestCase>,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
) -> Result<MetricOutcome, EvalError> {
    let configuration = metric.configuration();
    if let Some(entry) = cached {
        if let Some(stored) = entry.metric_data_for(metric.name(), &configuration) {
            debug!(metric = metric.name(), "cache hit, skipping measurement");
            return Ok(cache_hit_outcome(stored.clone(), configuration));
        }
    }

    let data = match metric.measure(case) {
        Ok(measurement) => MetricData::from_measurement(metric, &measurement, verbose_mode),
        Err(err) if ignore_errors => {
            warn!(metric = metric.name(), error = %err, "metric failed, continuing");
            MetricData::from_error(metric, err.to_string())
        }
        Err(err) => {
            return Err(EvalError::MetricFailure {
                name: metric.name().to_string(),
                message: err.to_string(),
            })
        }
    };
    Ok(fresh_outcome(data, configuration))
}

/// Async variant of [`run_metric`]. The measurement still runs to completion
/// within this invocation; concurrency across metrics is the caller's.
pub async fn a_run_metric(
    metric: &dyn Metric,
    case: &TurnTestCase,
    cached: Option<&CachedTestCase>,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
) -> Result<MetricOutcome, EvalError> {
    let configuration = metric.configuration();
    if let Some(entry) = cached {
        if let Some(stored) = entry.metric_data_for(metric.name(), &configuration) {
            debug!(metric = metric.name(), "cache hit, skipping measurement");
            return Ok(cache_hit_outcome(stored.clone(), configuration));
        }
    }

    let data = match metric.a_measure(case).await {
        Ok(measurement) => MetricData::from_measurement(metric, &measurement, verbose_mode),
        Err(err) if ignore_errors => {
            warn!(metric = metric.name(), error = %err, "metric failed, continuing");
            MetricData::from_error(metric, err.to_string())
        }
        Err(err) => {
            return Err(EvalError::MetricFailure {
                name: metric.name().to_string(),
                message: err.to_string(),
            })
        }
    };
    Ok(fresh_outcome(data, configuration))
}

/// Run one conversational metric. Conversational results are never cached.
pub fn run_conversational_metric(
    metric: &dyn ConversationalMetric,
    case: &ConversationalTestCase,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
) -> Result<MetricData, EvalError> {
    match metric.measure(case) {
        Ok(measurement) => Ok(MetricData::from_conversational_measurement(
            metric,
            &measurement,
            verbose_mode,
        )),
        Err(err) if ignore_errors => {
            warn!(metric = metric.name(), error = %err, "metric failed, continuing");
            Ok(MetricData::from_conversational_error(metric, err.to_string()))
        }
        Err(err) => Err(EvalError::MetricFailure {
            name: metric.name().to_string(),
            message: err.to_string(),
        }),
    }
}

/// Async variant of [`run_conversational_metric`].
pub async fn a_run_conversational_metric(
    metric: &dyn ConversationalMetric,
    case: &ConversationalTestCase,
    ignore_errors: bool,
    verbose_mode: Option<bool>,
) -> Result<MetricData, EvalError> {
    match metric.a_measure(case).await {
        Ok(measurement) => Ok(MetricData::from_conversational_measurement(
            metric,
            &measurement,
            verbose_mode,
        )),
        Err(err) if ignore_errors => {
            warn!(metric = metric.name(), error = %err, "metric failed, continuing");
            Ok(MetricData::from_conversational_error(metric, err.to_string()))
        }
        Err(err) => Err(EvalError::MetricFailure {
            name: metric.name().to_string(),
            message: err.to_string(),
        }),
    }
}

fn cache_hit_outcome(
    stored: MetricData,
    configuration: scorebook_core::MetricConfiguration,
) -> MetricOutcome {
    let mut cache_copy = stored.clone();
    cache_copy.evaluation_cost = Some(0.0);
    MetricOutcome {
        data: stored,
        from_cache: true,
        cacheable: Some(CachedMetricData {
            metric_data: cache_copy,
            metric_configuration: configuration,
        }),
    }
}

fn fresh_outcome(
    data: MetricData,
    configuration: scorebook_core::MetricConfiguration,
) -> MetricOutcome {
    let cacheable = if data.error.is_none() {
        let mut cache_copy = data.clone();
        cache_copy.evaluation_cost = Some(0.0);
        Some(CachedMetricData {
            metric_data: cache_copy,
            metric_configuration: configuration,
        })
    } else {
        None
    };
    MetricOutcome {
        data,
        from_cache: false,
        cacheable,
    }
}
