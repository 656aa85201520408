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

//! # Scorebook Evaluation Engine
//!
//! The execution and caching orchestration engine: it flattens single-turn
//! and conversational test cases into a uniform stream of work units, runs
//! every applicable metric against every unit, deduplicates repeated work
//! through a content-addressed result cache, aggregates pass rates, and
//! exposes an assertion-style entry point for single-case runs.
//!
//! ## Features
//!
//! - **Two interchangeable execution strategies**: strictly sequential and
//!   grouped-concurrent, producing equivalent records
//! - **Content-addressed caching**: durable tier behind a pluggable backend
//!   plus a transient this-run overlay
//! - **Per-metric failure isolation**: a raising metric is recorded as an
//!   errored result without stopping sibling units (when `ignore_errors` is
//!   on)
//! - **Pass-rate aggregation** and a single-case assertion adapter
//!
//! ## Example
//!
//! ```rust,ignore
//! use scorebook_core::{EvalMetric, TestCase, TurnTestCase};
//! use scorebook_evals::{EvalHarness, EvaluateOptions};
//!
//! let harness = EvalHarness::new();
//! let cases = vec![TestCase::turn(TurnTestCase::new("What is 2+2?", "4"))];
//! let metrics = vec![EvalMetric::turn(MyRelevanceMetric::new(0.5))];
//!
//! let results = harness.evaluate(&cases, &metrics, EvaluateOptions::default())?;
//! ```

pub mod assertion;
pub mod cache;
pub mod evaluate;
pub mod execute;
pub mod flatten;
pub mod indicator;
pub mod records;
pub mod runner;
pub mod summary;
pub mod test_run;

pub use cache::{
    CacheBackend, CacheKey, CacheManager, CacheStats, CacheTier, CachedMetricData, CachedTestCase,
    MemoryCacheBackend,
};
pub use evaluate::{EvalHarness, EvaluateOptions};
pub use execute::{
    a_execute_test_cases, execute_test_cases, ExecutionContext, ExecutionOptions,
};
pub use flatten::{flatten_test_cases, BatchContext, WorkUnit};
pub use indicator::{NoopProgress, ProgressListener, TracingProgress};
pub use records::{RecordKind, ResultRecord, TestResult};
pub use runner::MetricOutcome;
pub use summary::{format_test_result, print_test_result, MetricPassRate, RunSummary};
pub use test_run::{InMemoryRunRecorder, NoopRunRecorder, RunRecorder};

pub use scorebook_core::{
    ConversationTurn, ConversationalMetric, ConversationalTestCase, EvalError, EvalMetric,
    Hyperparameters, Measurement, Metric, MetricConfiguration, MetricData, MetricError, TestCase,
    TurnTestCase, Verdict,
};
