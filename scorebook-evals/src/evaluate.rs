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

//! Public entry points: batch evaluation and single-case assertion

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::assertion::{assertion_failure, resolve_asserted_record};
use crate::cache::{CacheBackend, CacheManager};
use crate::execute::{
    a_execute_test_cases, execute_test_cases, ExecutionContext, ExecutionOptions,
};
use crate::indicator::{NoopProgress, ProgressListener, TracingProgress};
use crate::records::{RecordKind, ResultRecord, TestResult};
use crate::summary::{print_test_result, RunSummary};
use crate::test_run::{InMemoryRunRecorder, RunRecorder};
use scorebook_core::{EvalError, EvalMetric, Hyperparameters, TestCase};

/// Options for one `evaluate` call.
#[derive(Debug, Clone)]
pub struct EvaluateOptions {
    /// Logged with the run and folded into cache keys; when supplied, both
    /// mandatory keys are validated before any execution begins
    pub hyperparameters: Option<Hyperparameters>,

    /// Use the grouped-concurrent strategy instead of the sequential one
    pub run_async: bool,

    /// Notify the progress listener; never alters result semantics
    pub show_indicator: bool,

    /// Print per-case results and the pass-rate table to stdout
    pub print_results: bool,

    /// Enable durable cache writes (`save_to_disk`)
    pub write_cache: bool,

    /// Consult the cache before invoking metrics
    pub use_cache: bool,

    /// Record metric failures instead of aborting the batch
    pub ignore_errors: bool,

    /// Run-level verbose override; `None` defers to each metric
    pub verbose_mode: Option<bool>,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            hyperparameters: None,
            run_async: true,
            show_indicator: true,
            print_results: true,
            write_cache: true,
            use_cache: false,
            ignore_errors: false,
            verbose_mode: None,
        }
    }
}

impl EvaluateOptions {
    fn execution(&self) -> ExecutionOptions {
        ExecutionOptions {
            ignore_errors: self.ignore_errors,
            use_cache: self.use_cache,
            save_to_disk: self.write_cache,
            verbose_mode: self.verbose_mode,
        }
    }
}

/// Owns the orchestration collaborators across runs: the two-tier cache, the
/// run-record sink, and the progress listener.
pub struct EvalHarness {
    cache: CacheManager,
    recorder: Arc<dyn RunRecorder>,
    progress: Arc<dyn ProgressListener>,
}

impl Default for EvalHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalHarness {
    pub fn new() -> Self {
        Self {
            cache: CacheManager::in_memory(),
            recorder: Arc::new(InMemoryRunRecorder::new()),
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = CacheManager::new(backend);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Run a batch of test cases against a set of metrics.
    ///
    /// With `run_async` on, a current-thread runtime drives the concurrent
    /// strategy; call [`EvalHarness::a_evaluate`] instead from async code.
    pub fn evaluate(
        &self,
        test_cases: &[TestCase],
        metrics: &[EvalMetric],
        options: EvaluateOptions,
    ) -> Result<Vec<TestResult>, EvalError> {
        if let Some(hp) = &options.hyperparameters {
            hp.validate()?;
        }
        if options.print_results {
            println!("Evaluating test cases...");
        }

        let started = Instant::now();
        let records = if options.run_async {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| EvalError::Runtime(e.to_string()))?;
            runtime.block_on(self.run(test_cases, metrics, &options, true))?
        } else {
            futures::executor::block_on(self.run(test_cases, metrics, &options, false))?
        };
        self.finish(&records, &options, started)
    }

    /// Async entry point; always uses the grouped-concurrent strategy.
    pub async fn a_evaluate(
        &self,
        test_cases: &[TestCase],
        metrics: &[EvalMetric],
        options: EvaluateOptions,
    ) -> Result<Vec<TestResult>, EvalError> {
        if let Some(hp) = &options.hyperparameters {
            hp.validate()?;
        }
        let started = Instant::now();
        let records = self.run(test_cases, metrics, &options, true).await?;
        self.finish(&records, &options, started)
    }

    /// Run a batch of one and raise a descriptive failure when the resolved
    /// record (the last message, for a conversational case) did not pass.
    ///
    /// Metric failures are captured per-metric so the assertion message can
    /// enumerate errored metrics alongside under-threshold ones.
    pub fn assert_test(
        &self,
        test_case: TestCase,
        metrics: &[EvalMetric],
        run_async: bool,
    ) -> Result<(), EvalError> {
        let options = EvaluateOptions {
            run_async,
            show_indicator: false,
            print_results: false,
            write_cache: false,
            ignore_errors: true,
            ..Default::default()
        };

        let records = if run_async {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| EvalError::Runtime(e.to_string()))?;
            runtime.block_on(self.run(
                std::slice::from_ref(&test_case),
                metrics,
                &options,
                true,
            ))?
        } else {
            futures::executor::block_on(self.run(
                std::slice::from_ref(&test_case),
                metrics,
                &options,
                false,
            ))?
        };

        Self::assert_records(&records)
    }

    /// Async variant of [`EvalHarness::assert_test`].
    pub async fn a_assert_test(
        &self,
        test_case: TestCase,
        metrics: &[EvalMetric],
    ) -> Result<(), EvalError> {
        let options = EvaluateOptions {
            show_indicator: false,
            print_results: false,
            write_cache: false,
            ignore_errors: true,
            ..Default::default()
        };
        let records = self
            .run(std::slice::from_ref(&test_case), metrics, &options, true)
            .await?;
        Self::assert_records(&records)
    }

    fn assert_records(records: &[ResultRecord]) -> Result<(), EvalError> {
        let Some(first) = records.first() else {
            // No compatible metric was configured for this case
            return Ok(());
        };
        let Some(resolved) = resolve_asserted_record(first) else {
            return Ok(());
        };
        match assertion_failure(resolved) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        test_cases: &[TestCase],
        metrics: &[EvalMetric],
        options: &EvaluateOptions,
        concurrent: bool,
    ) -> Result<Vec<ResultRecord>, EvalError> {
        let noop = NoopProgress;
        let progress: &dyn ProgressListener = if options.show_indicator {
            self.progress.as_ref()
        } else {
            &noop
        };
        let ctx = ExecutionContext {
            cache: &self.cache,
            hyperparameters: options.hyperparameters.as_ref(),
            recorder: self.recorder.as_ref(),
            progress,
        };
        let execution = options.execution();
        if concurrent {
            a_execute_test_cases(test_cases, metrics, &execution, &ctx).await
        } else {
            execute_test_cases(test_cases, metrics, &execution, &ctx)
        }
    }

    fn finish(
        &self,
        records: &[ResultRecord],
        options: &EvaluateOptions,
        started: Instant,
    ) -> Result<Vec<TestResult>, EvalError> {
        let results: Vec<TestResult> = records
            .iter()
            .filter(|record| record.kind == RecordKind::Turn)
            .filter_map(|record| record.to_test_result())
            .collect();

        let run_duration = started.elapsed().as_secs_f64();
        let summary = RunSummary::from_results(&results, run_duration);
        self.recorder.finalize(&summary);
        info!(
            results = results.len(),
            run_duration, "evaluation run finished"
        );

        if options.print_results {
            for result in &results {
                print_test_result(result);
            }
            println!("\n{summary}");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scorebook_core::{
        ConversationTurn, ConversationalTestCase, Measurement, Metric, MetricError, TurnTestCase,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubMetric {
        name: String,
        threshold: f64,
        score: f64,
        fail_with: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl StubMetric {
        fn scoring(name: &str, threshold: f64, score: f64) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name: name.to_string(),
                    threshold,
                    score,
                    fail_with: None,
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn failing(name: &str, message: &str) -> Self {
            Self {
                name: name.to_string(),
                threshold: 0.5,
                score: 0.0,
                fail_with: Some(message.to_string()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Metric for StubMetric {
        fn name(&self) -> &str {
            &self.name
        }

        fn threshold(&self) -> f64 {
            self.threshold
        }

        fn measure(&self, _case: &TurnTestCase) -> Result<Measurement, MetricError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(message) => Err(MetricError::Evaluation(message.clone())),
                None => Ok(Measurement::scored(self.score, self.threshold)),
            }
        }
    }

    fn quiet() -> EvaluateOptions {
        EvaluateOptions {
            print_results: false,
            show_indicator: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_hyperparameters_fail_before_execution() {
        let harness = EvalHarness::new();
        let (metric, calls) = StubMetric::scoring("relevance", 0.5, 0.9);
        let cases = vec![TestCase::turn(TurnTestCase::new("q", "a"))];

        let options = EvaluateOptions {
            hyperparameters: Some(Hyperparameters::from_map(Default::default())),
            ..quiet()
        };
        let err = harness
            .evaluate(&cases, &[EvalMetric::turn(metric)], options)
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidHyperparameters));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_evaluate_returns_results_and_finalizes_summary() {
        let recorder = Arc::new(InMemoryRunRecorder::new());
        let harness = EvalHarness::new().with_recorder(recorder.clone());
        let (metric, _) = StubMetric::scoring("relevance", 0.5, 0.9);
        let cases = vec![
            TestCase::turn(TurnTestCase::new("q1", "a1")),
            TestCase::turn(TurnTestCase::new("q2", "a2")),
        ];

        let results = harness
            .evaluate(&cases, &[EvalMetric::turn(metric)], quiet())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));

        let summary = recorder.summary().unwrap();
        assert_eq!(summary.pass_rates["relevance"].pass_rate, 1.0);
        assert_eq!(recorder.records().len(), 2);
    }

    #[test]
    fn test_sequential_strategy_also_works() {
        let harness = EvalHarness::new();
        let (metric, _) = StubMetric::scoring("relevance", 0.5, 0.2);
        let cases = vec![TestCase::turn(TurnTestCase::new("q", "a"))];
        let options = EvaluateOptions {
            run_async: false,
            ..quiet()
        };

        let results = harness
            .evaluate(&cases, &[EvalMetric::turn(metric)], options)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    #[test]
    fn test_conversation_contributes_message_results_only() {
        let harness = EvalHarness::new();
        let (metric, _) = StubMetric::scoring("relevance", 0.5, 0.9);
        let conv = ConversationalTestCase::new(vec![
            ConversationTurn::new(Arc::new(TurnTestCase::new("q0", "a0"))),
            ConversationTurn::new(Arc::new(TurnTestCase::new("q1", "a1"))),
        ]);

        let results = harness
            .evaluate(
                &[TestCase::conversation(conv)],
                &[EvalMetric::turn(metric)],
                quiet(),
            )
            .unwrap();
        // Two message results; the conversation-level record has no
        // flattened result of its own
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_a_evaluate_from_async_context() {
        let harness = EvalHarness::new();
        let (metric, _) = StubMetric::scoring("relevance", 0.5, 0.9);
        let cases = vec![TestCase::turn(TurnTestCase::new("q", "a"))];

        let results = harness
            .a_evaluate(&cases, &[EvalMetric::turn(metric)], quiet())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_assert_test_passes_and_fails() {
        let harness = EvalHarness::new();
        let (passing, _) = StubMetric::scoring("relevance", 0.5, 0.9);
        harness
            .assert_test(
                TestCase::turn(TurnTestCase::new("q", "a")),
                &[EvalMetric::turn(passing)],
                true,
            )
            .unwrap();

        let (failing, _) = StubMetric::scoring("relevance", 0.5, 0.2);
        let err = harness
            .assert_test(
                TestCase::turn(TurnTestCase::new("q", "a")),
                &[EvalMetric::turn(failing)],
                true,
            )
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("relevance"));
        assert!(message.contains("score: 0.2"));
        assert!(message.contains("threshold: 0.5"));
    }

    #[test]
    fn test_assert_test_includes_errored_metrics() {
        let harness = EvalHarness::new();
        let err = harness
            .assert_test(
                TestCase::turn(TurnTestCase::new("q", "a")),
                &[EvalMetric::turn(StubMetric::failing("flaky", "boom"))],
                false,
            )
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("flaky"));
        assert!(message.contains("error: boom"));
    }

    #[test]
    fn test_assert_conversational_judges_last_message() {
        let harness = EvalHarness::new();

        struct LastFailsMetric;

        #[async_trait]
        impl Metric for LastFailsMetric {
            fn name(&self) -> &str {
                "picky"
            }

            fn threshold(&self) -> f64 {
                0.5
            }

            fn measure(&self, case: &TurnTestCase) -> Result<Measurement, MetricError> {
                let score = if case.input == "last" { 0.1 } else { 0.9 };
                Ok(Measurement::scored(score, 0.5))
            }
        }

        let conv = ConversationalTestCase::new(vec![
            ConversationTurn::new(Arc::new(TurnTestCase::new("first", "a"))),
            ConversationTurn::new(Arc::new(TurnTestCase::new("last", "a"))),
        ]);

        let err = harness
            .assert_test(
                TestCase::conversation(conv),
                &[EvalMetric::turn(LastFailsMetric)],
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("picky"));
    }

    #[test]
    fn test_assert_without_compatible_metrics_passes() {
        let harness = EvalHarness::new();
        harness
            .assert_test(TestCase::turn(TurnTestCase::new("q", "a")), &[], false)
            .unwrap();
    }
}
