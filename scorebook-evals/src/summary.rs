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

//! Run-level aggregation and result reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::records::TestResult;

/// Per-metric-name tally across a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPassRate {
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
}

/// Aggregate outcome across a batch, computed once from the final results.
///
/// A metric name only appears in the tally when it produced at least one
/// result, so the pass-rate division is never by zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total wall-clock duration of the batch in seconds
    pub run_duration: f64,

    pub completed_at: DateTime<Utc>,

    /// Tallies keyed by metric name
    pub pass_rates: BTreeMap<String, MetricPassRate>,
}

impl RunSummary {
    pub fn from_results(results: &[TestResult], run_duration: f64) -> Self {
        let mut pass_rates: BTreeMap<String, MetricPassRate> = BTreeMap::new();
        for result in results {
            for metric_data in &result.metrics_data {
                let tally = pass_rates
                    .entry(metric_data.name.clone())
                    .or_insert(MetricPassRate {
                        total: 0,
                        passed: 0,
                        pass_rate: 0.0,
                    });
                tally.total += 1;
                // Errored and indeterminate results already carry
                // success = false; no special-casing here.
                if metric_data.success {
                    tally.passed += 1;
                }
            }
        }
        for tally in pass_rates.values_mut() {
            tally.pass_rate = tally.passed as f64 / tally.total as f64;
        }
        Self {
            run_duration,
            completed_at: Utc::now(),
            pass_rates,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(70))?;
        writeln!(f)?;
        writeln!(f, "Overall Metric Pass Rates")?;
        writeln!(f)?;
        for (name, tally) in &self.pass_rates {
            writeln!(
                f,
                "{}: {:.2}% pass rate ({}/{})",
                name,
                tally.pass_rate * 100.0,
                tally.passed,
                tally.total
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", "=".repeat(70))
    }
}

/// Render one test result's metric summary the way the report path prints it.
pub fn format_test_result(result: &TestResult) -> String {
    let mut out = String::new();
    out.push_str(&"=".repeat(70));
    out.push_str("\n\nMetrics Summary\n");
    for metric_data in &result.metrics_data {
        let marker = if metric_data.success && metric_data.error.is_none() {
            "PASS"
        } else {
            "FAIL"
        };
        out.push_str(&format!(
            "  - [{}] {} (score: {}, threshold: {}, strict: {}, evaluation model: {}, reason: {}, error: {})\n",
            marker,
            metric_data.name,
            display_opt_f64(metric_data.score),
            metric_data.threshold,
            metric_data.strict_mode,
            display_opt(metric_data.evaluation_model.as_deref()),
            display_opt(metric_data.reason.as_deref()),
            display_opt(metric_data.error.as_deref()),
        ));
    }
    out.push_str("\nFor test case:\n");
    out.push_str(&format!("  - input: {}\n", result.input));
    out.push_str(&format!("  - actual output: {}\n", result.actual_output));
    out.push_str(&format!(
        "  - expected output: {}\n",
        display_opt(result.expected_output.as_deref())
    ));
    out.push_str(&format!(
        "  - context: {}\n",
        display_opt_list(result.context.as_deref())
    ));
    out.push_str(&format!(
        "  - retrieval context: {}",
        display_opt_list(result.retrieval_context.as_deref())
    ));
    out
}

/// Print one test result to stdout.
pub fn print_test_result(result: &TestResult) {
    println!("\n{}", format_test_result(result));
}

pub(crate) fn display_opt(value: Option<&str>) -> String {
    value.unwrap_or("none").to_string()
}

pub(crate) fn display_opt_f64(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "none".to_string(),
    }
}

fn display_opt_list(values: Option<&[String]>) -> String {
    match values {
        Some(vs) => format!("{vs:?}"),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_core::MetricData;

    fn result_with(metrics: Vec<(&str, bool)>) -> TestResult {
        TestResult {
            success: metrics.iter().all(|(_, s)| *s),
            metrics_data: metrics
                .into_iter()
                .map(|(name, success)| MetricData {
                    name: name.to_string(),
                    threshold: 0.5,
                    score: Some(if success { 0.9 } else { 0.2 }),
                    reason: None,
                    success,
                    strict_mode: false,
                    evaluation_model: None,
                    error: None,
                    evaluation_cost: None,
                    verbose_logs: None,
                })
                .collect(),
            input: "q".to_string(),
            actual_output: "a".to_string(),
            expected_output: None,
            context: None,
            retrieval_context: None,
        }
    }

    #[test]
    fn test_pass_rates_per_metric_name() {
        let results = vec![
            result_with(vec![("relevance", true), ("faithfulness", true)]),
            result_with(vec![("relevance", false)]),
        ];
        let summary = RunSummary::from_results(&results, 1.5);

        let relevance = &summary.pass_rates["relevance"];
        assert_eq!(relevance.total, 2);
        assert_eq!(relevance.passed, 1);
        assert_eq!(relevance.pass_rate, 0.5);

        let faithfulness = &summary.pass_rates["faithfulness"];
        assert_eq!(faithfulness.total, 1);
        assert_eq!(faithfulness.pass_rate, 1.0);
        assert_eq!(summary.run_duration, 1.5);
    }

    #[test]
    fn test_failing_metric_contributes_zero() {
        let results = vec![result_with(vec![("relevance", false)])];
        let summary = RunSummary::from_results(&results, 0.1);
        assert_eq!(summary.pass_rates["relevance"].pass_rate, 0.0);
    }

    #[test]
    fn test_no_results_no_tallies() {
        let summary = RunSummary::from_results(&[], 0.0);
        assert!(summary.pass_rates.is_empty());
    }

    #[test]
    fn test_format_marks_failures() {
        let rendered = format_test_result(&result_with(vec![("relevance", false)]));
        assert!(rendered.contains("[FAIL] relevance"));
        assert!(rendered.contains("score: 0.2"));
        assert!(rendered.contains("input: q"));
    }

    #[test]
    fn test_display_renders_table() {
        let results = vec![result_with(vec![("relevance", true)])];
        let summary = RunSummary::from_results(&results, 0.2);
        let rendered = summary.to_string();
        assert!(rendered.contains("Overall Metric Pass Rates"));
        assert!(rendered.contains("relevance: 100.00% pass rate (1/1)"));
    }
}
