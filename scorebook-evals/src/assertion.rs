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

//! Assertion adapter: translate a single-case run into pass/fail

use crate::records::{RecordKind, ResultRecord};
use crate::summary::{display_opt, display_opt_f64};
use scorebook_core::{EvalError, MetricData};

/// Resolve the record a single-case assertion judges: a conversational
/// record resolves to its last evaluated message.
pub fn resolve_asserted_record(record: &ResultRecord) -> Option<&ResultRecord> {
    match record.kind {
        RecordKind::Turn => Some(record),
        RecordKind::Conversation => record.last_message(),
    }
}

/// Enumerate every metric that did not pass, errored ones included.
pub fn failed_metrics(metrics_data: &[MetricData]) -> Vec<&MetricData> {
    metrics_data
        .iter()
        .filter(|data| data.error.is_some() || !data.success)
        .collect()
}

/// Build the assertion failure for a resolved record, or `None` when it
/// passed.
pub fn assertion_failure(record: &ResultRecord) -> Option<EvalError> {
    if record.success {
        return None;
    }
    let failed = failed_metrics(&record.metrics_data);
    let message = failed
        .iter()
        .map(|data| {
            format!(
                "{} (score: {}, threshold: {}, strict: {}, error: {})",
                data.name,
                display_opt_f64(data.score),
                data.threshold,
                data.strict_mode,
                display_opt(data.error.as_deref()),
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(EvalError::AssertionFailed(message))
}
