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

//! Result records accumulated per unit of work

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use scorebook_core::{ConversationalTestCase, MetricData, TurnTestCase};

/// Variant tag for a [`ResultRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Turn,
    Conversation,
}

/// Accumulated outcome for one unit of work across all its metrics.
///
/// Created when the unit starts processing, mutated by appending metric data
/// as each metric completes, and finalized when the duration is stamped.
/// Conversational records own the records of their evaluated messages; a
/// conversation's `success` is defined as its *last* message's success, a
/// deliberate simplification rather than an aggregate over all messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub kind: RecordKind,
    pub name: String,
    pub success: bool,

    /// Ordered metric outcomes; at most one entry per metric name
    pub metrics_data: Vec<MetricData>,

    /// Wall-clock seconds spent on this unit's metrics; exactly 0.0 when
    /// every result came from the cache
    pub run_duration: f64,

    pub order: usize,

    pub input: Option<String>,
    pub actual_output: Option<String>,
    pub expected_output: Option<String>,
    pub context: Option<Vec<String>>,
    pub retrieval_context: Option<Vec<String>>,
    pub tools_used: Option<Vec<String>>,
    pub expected_tools: Option<Vec<String>>,
    pub additional_metadata: Option<HashMap<String, serde_json::Value>>,
    pub comments: Option<String>,

    /// Records of evaluated messages, for conversational parents
    pub messages: Vec<ResultRecord>,
}

impl ResultRecord {
    /// Record for a standalone single-turn unit
    pub fn for_turn(case: &TurnTestCase, index: usize) -> Self {
        Self {
            kind: RecordKind::Turn,
            name: format!("test_case_{index}"),
            success: true,
            metrics_data: Vec::new(),
            run_duration: 0.0,
            order: case.dataset_rank,
            input: Some(case.input.clone()),
            actual_output: Some(case.actual_output.clone()),
            expected_output: case.expected_output.clone(),
            context: case.context.clone(),
            retrieval_context: case.retrieval_context.clone(),
            tools_used: case.tools_used.clone(),
            expected_tools: case.expected_tools.clone(),
            additional_metadata: case.additional_metadata.clone(),
            comments: case.comments.clone(),
            messages: Vec::new(),
        }
    }

    /// Record for a message expanded out of a conversation. The parent's
    /// metadata and comments override the message's own.
    pub fn for_message(
        case: &TurnTestCase,
        message_index: usize,
        additional_metadata: Option<HashMap<String, serde_json::Value>>,
        comments: Option<String>,
    ) -> Self {
        Self {
            kind: RecordKind::Turn,
            name: format!("message_{message_index}"),
            success: true,
            metrics_data: Vec::new(),
            run_duration: 0.0,
            order: message_index,
            input: Some(case.input.clone()),
            actual_output: Some(case.actual_output.clone()),
            expected_output: case.expected_output.clone(),
            context: case.context.clone(),
            retrieval_context: case.retrieval_context.clone(),
            tools_used: case.tools_used.clone(),
            expected_tools: case.expected_tools.clone(),
            additional_metadata,
            comments,
            messages: Vec::new(),
        }
    }

    /// Record for a conversation-level unit
    pub fn for_conversation(case: &ConversationalTestCase, index: usize) -> Self {
        Self {
            kind: RecordKind::Conversation,
            name: format!("conversational_test_case_{index}"),
            success: true,
            metrics_data: Vec::new(),
            run_duration: 0.0,
            order: case.dataset_rank,
            input: None,
            actual_output: None,
            expected_output: None,
            context: None,
            retrieval_context: None,
            tools_used: None,
            expected_tools: None,
            additional_metadata: case.additional_metadata.clone(),
            comments: case.comments.clone(),
            messages: Vec::new(),
        }
    }

    /// Append or replace the outcome for a metric name. An unsuccessful
    /// outcome makes the whole record unsuccessful.
    pub fn update_metric_data(&mut self, data: MetricData) {
        if !data.success {
            self.success = false;
        }
        if let Some(existing) = self
            .metrics_data
            .iter_mut()
            .find(|existing| existing.name == data.name)
        {
            *existing = data;
        } else {
            self.metrics_data.push(data);
        }
    }

    pub fn update_run_duration(&mut self, seconds: f64) {
        self.run_duration = seconds;
    }

    pub fn last_message(&self) -> Option<&ResultRecord> {
        self.messages.last()
    }

    /// Per-unit view returned from the public API. Conversational records
    /// resolve to their last evaluated message; a conversation with no
    /// evaluated messages has no test result.
    pub fn to_test_result(&self) -> Option<TestResult> {
        match self.kind {
            RecordKind::Turn => Some(TestResult {
                success: self.success,
                metrics_data: self.metrics_data.clone(),
                input: self.input.clone().unwrap_or_default(),
                actual_output: self.actual_output.clone().unwrap_or_default(),
                expected_output: self.expected_output.clone(),
                context: self.context.clone(),
                retrieval_context: self.retrieval_context.clone(),
            }),
            RecordKind::Conversation => self.last_message().and_then(|m| m.to_test_result()),
        }
    }
}

/// Flattened outcome for one unit of work, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub metrics_data: Vec<MetricData>,
    pub input: String,
    pub actual_output: String,
    pub expected_output: Option<String>,
    pub context: Option<Vec<String>>,
    pub retrieval_context: Option<Vec<String>>,
}
