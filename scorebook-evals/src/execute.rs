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

//! Central execution loop over flattened units of work
//!
//! Two interchangeable strategies share one contract: [`execute_test_cases`]
//! runs strictly sequentially, [`a_execute_test_cases`] dispatches each
//! unit's metric set as a group. For identical inputs they produce equivalent
//! records modulo wall-clock duration.

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::cache::{CacheManager, CacheTier, CachedTestCase};
use crate::flatten::{flatten_test_cases, BatchContext, WorkUnit};
use crate::indicator::{
    measure_conversational_metrics_with_indicator, measure_metrics_with_indicator,
    ProgressListener,
};
use crate::records::ResultRecord;
use crate::runner::{run_conversational_metric, run_metric, MetricOutcome};
use crate::test_run::RunRecorder;
use scorebook_core::{
    ConversationalMetric, EvalError, EvalMetric, Hyperparameters, Metric, TestCase, TurnTestCase,
};

/// Per-batch execution switches.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Capture metric failures as errored results instead of aborting
    pub ignore_errors: bool,

    /// Consult the cache before invoking metrics
    pub use_cache: bool,

    /// Enable durable-tier cache writes and durable run records
    pub save_to_disk: bool,

    /// Run-level verbose override; `None` defers to each metric
    pub verbose_mode: Option<bool>,
}

/// Collaborators threaded through one batch.
pub struct ExecutionContext<'a> {
    pub cache: &'a CacheManager,
    pub hyperparameters: Option<&'a Hyperparameters>,
    pub recorder: &'a dyn RunRecorder,
    pub progress: &'a dyn ProgressListener,
}

fn partition_metrics(
    metrics: &[EvalMetric],
) -> (Vec<Arc<dyn Metric>>, Vec<Arc<dyn ConversationalMetric>>) {
    let mut turn_metrics = Vec::new();
    let mut conversation_metrics = Vec::new();
    for metric in metrics {
        match metric {
            EvalMetric::Turn(m) => turn_metrics.push(m.clone()),
            EvalMetric::Conversation(m) => conversation_metrics.push(m.clone()),
        }
    }
    (turn_metrics, conversation_metrics)
}

/// Fold a unit's metric outcomes into its record and write the accumulated
/// cache-eligible results back to both tiers. Duration is exactly zero when
/// every outcome came from the cache.
fn finalize_turn_record(
    mut record: ResultRecord,
    outcomes: Vec<MetricOutcome>,
    started: Instant,
    case: &TurnTestCase,
    ctx: &ExecutionContext,
) -> ResultRecord {
    let mut new_entry = CachedTestCase::default();
    let mut all_from_cache = true;
    for outcome in outcomes {
        if !outcome.from_cache {
            all_from_cache = false;
        }
        if let Some(cacheable) = outcome.cacheable {
            new_entry.cached_metrics_data.push(cacheable);
        }
        record.update_metric_data(outcome.data);
    }

    let run_duration = if all_from_cache {
        0.0
    } else {
        started.elapsed().as_secs_f64()
    };
    record.update_run_duration(run_duration);

    // Write-back happens unconditionally after the unit's metrics complete,
    // even when some of them errored; errored results were never queued.
    ctx.cache
        .write(case, &new_entry, ctx.hyperparameters, CacheTier::Durable);
    ctx.cache
        .write(case, &new_entry, ctx.hyperparameters, CacheTier::Transient);

    record
}

/// Push a finalized message record onto its parent conversation and restate
/// the parent's success as this (the latest) message's success.
fn attach_to_parent(
    records: &mut [ResultRecord],
    batch: &BatchContext,
    parent_unit: usize,
    message_record_index: usize,
    recorder: &dyn RunRecorder,
) {
    let Some(parent_index) = batch.conversation_record(parent_unit) else {
        return;
    };
    let Some(message) = records.get(message_record_index).cloned() else {
        return;
    };
    let parent = &mut records[parent_index];
    parent.success = message.success;
    parent.messages.push(message);
    recorder.record(parent);
}

/// Sequential execution strategy: each metric's `measure` call blocks the
/// orchestrator until complete.
pub fn execute_test_cases(
    test_cases: &[TestCase],
    metrics: &[EvalMetric],
    options: &ExecutionOptions,
    ctx: &ExecutionContext,
) -> Result<Vec<ResultRecord>, EvalError> {
    ctx.cache.set_durable_writes(options.save_to_disk);
    ctx.recorder.set_save_to_disk(options.save_to_disk);

    let (turn_metrics, conversation_metrics) = partition_metrics(metrics);
    let units = flatten_test_cases(test_cases);
    ctx.progress.batch_started(units.len());

    let mut batch = BatchContext::new();
    let mut records: Vec<ResultRecord> = Vec::new();

    for unit in &units {
        match unit {
            WorkUnit::Turn { case } => {
                if turn_metrics.is_empty() {
                    continue;
                }
                let index = batch.next_turn_index();
                let record = run_turn_unit_sync(
                    case,
                    ResultRecord::for_turn(case, index),
                    &turn_metrics,
                    options,
                    ctx,
                )?;
                ctx.recorder.record(&record);
                records.push(record);
            }
            WorkUnit::Conversation { case, unit_index } => {
                let index = batch.next_conversation_index();
                let mut record = ResultRecord::for_conversation(case, index);
                if !conversation_metrics.is_empty() {
                    let started = Instant::now();
                    for metric in &conversation_metrics {
                        ctx.progress.metric_started(metric.name());
                        let data = run_conversational_metric(
                            metric.as_ref(),
                            case,
                            options.ignore_errors,
                            options.verbose_mode,
                        )?;
                        ctx.progress.metric_finished(metric.name(), false);
                        record.update_metric_data(data);
                    }
                    record.update_run_duration(started.elapsed().as_secs_f64());
                }
                batch.register_conversation_record(*unit_index, records.len());
                ctx.recorder.record(&record);
                records.push(record);
            }
            WorkUnit::Message {
                case,
                parent_unit,
                message_index,
                additional_metadata,
                comments,
            } => {
                if turn_metrics.is_empty() {
                    continue;
                }
                if batch.message_record(case).is_some() {
                    debug!(message = message_index, "message identity already processed");
                    continue;
                }
                let record = run_turn_unit_sync(
                    case,
                    ResultRecord::for_message(
                        case,
                        *message_index,
                        additional_metadata.clone(),
                        comments.clone(),
                    ),
                    &turn_metrics,
                    options,
                    ctx,
                )?;
                ctx.recorder.record(&record);
                batch.register_message_record(case, records.len());
                records.push(record);
                let record_index = records.len() - 1;
                attach_to_parent(
                    &mut records,
                    &batch,
                    *parent_unit,
                    record_index,
                    ctx.recorder,
                );
            }
        }
    }

    ctx.progress.batch_finished();
    Ok(records)
}

fn run_turn_unit_sync(
    case: &Arc<TurnTestCase>,
    record: ResultRecord,
    turn_metrics: &[Arc<dyn Metric>],
    options: &ExecutionOptions,
    ctx: &ExecutionContext,
) -> Result<ResultRecord, EvalError> {
    let cached = if options.use_cache {
        ctx.cache.lookup(case, ctx.hyperparameters)
    } else {
        None
    };

    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(turn_metrics.len());
    for metric in turn_metrics {
        ctx.progress.metric_started(metric.name());
        let outcome = run_metric(
            metric.as_ref(),
            case,
            cached.as_ref(),
            options.ignore_errors,
            options.verbose_mode,
        )?;
        ctx.progress.metric_finished(metric.name(), outcome.from_cache);
        outcomes.push(outcome);
    }

    Ok(finalize_turn_record(record, outcomes, started, case, ctx))
}

/// Concurrent execution strategy: each unit's metric set is dispatched
/// together and awaited as a group. Units are still processed one after
/// another; there is no cross-unit concurrency.
pub async fn a_execute_test_cases(
    test_cases: &[TestCase],
    metrics: &[EvalMetric],
    options: &ExecutionOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<Vec<ResultRecord>, EvalError> {
    ctx.cache.set_durable_writes(options.save_to_disk);
    ctx.recorder.set_save_to_disk(options.save_to_disk);

    let (turn_metrics, conversation_metrics) = partition_metrics(metrics);
    let units = flatten_test_cases(test_cases);
    ctx.progress.batch_started(units.len());

    let mut batch = BatchContext::new();
    let mut records: Vec<ResultRecord> = Vec::new();

    for unit in &units {
        match unit {
            WorkUnit::Turn { case } => {
                if turn_metrics.is_empty() {
                    continue;
                }
                let index = batch.next_turn_index();
                let record = run_turn_unit_async(
                    case,
                    ResultRecord::for_turn(case, index),
                    &turn_metrics,
                    options,
                    ctx,
                )
                .await?;
                ctx.recorder.record(&record);
                records.push(record);
            }
            WorkUnit::Conversation { case, unit_index } => {
                let index = batch.next_conversation_index();
                let mut record = ResultRecord::for_conversation(case, index);
                if !conversation_metrics.is_empty() {
                    let started = Instant::now();
                    let data = measure_conversational_metrics_with_indicator(
                        &conversation_metrics,
                        case,
                        options.ignore_errors,
                        options.verbose_mode,
                        ctx.progress,
                    )
                    .await?;
                    for metric_data in data {
                        record.update_metric_data(metric_data);
                    }
                    record.update_run_duration(started.elapsed().as_secs_f64());
                }
                batch.register_conversation_record(*unit_index, records.len());
                ctx.recorder.record(&record);
                records.push(record);
            }
            WorkUnit::Message {
                case,
                parent_unit,
                message_index,
                additional_metadata,
                comments,
            } => {
                if turn_metrics.is_empty() {
                    continue;
                }
                if batch.message_record(case).is_some() {
                    debug!(message = message_index, "message identity already processed");
                    continue;
                }
                let record = run_turn_unit_async(
                    case,
                    ResultRecord::for_message(
                        case,
                        *message_index,
                        additional_metadata.clone(),
                        comments.clone(),
                    ),
                    &turn_metrics,
                    options,
                    ctx,
                )
                .await?;
                ctx.recorder.record(&record);
                batch.register_message_record(case, records.len());
                records.push(record);
                let record_index = records.len() - 1;
                attach_to_parent(
                    &mut records,
                    &batch,
                    *parent_unit,
                    record_index,
                    ctx.recorder,
                );
            }
        }
    }

    ctx.progress.batch_finished();
    Ok(records)
}

async fn run_turn_unit_async(
    case: &Arc<TurnTestCase>,
    record: ResultRecord,
    turn_metrics: &[Arc<dyn Metric>],
    options: &ExecutionOptions,
    ctx: &ExecutionContext<'_>,
) -> Result<ResultRecord, EvalError> {
    let cached = if options.use_cache {
        ctx.cache.lookup(case, ctx.hyperparameters)
    } else {
        None
    };

    let started = Instant::now();
    let outcomes = measure_metrics_with_indicator(
        turn_metrics,
        case,
        cached.as_ref(),
        options.ignore_errors,
        options.verbose_mode,
        ctx.progress,
    )
    .await?;

    Ok(finalize_turn_record(record, outcomes, started, case, ctx))
}
