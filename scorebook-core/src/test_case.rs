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

//! Test case variants accepted by the orchestrator

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A single-turn exchange to be scored.
///
/// Immutable for the duration of a run. Cases that appear as messages inside
/// a conversation are shared via `Arc`; the pointer doubles as the case's
/// identity when the flattener deduplicates work within a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnTestCase {
    /// Input given to the system under evaluation
    pub input: String,

    /// Output the system actually produced
    pub actual_output: String,

    /// Reference output, when one exists
    pub expected_output: Option<String>,

    /// Ground-truth context the output should be faithful to
    pub context: Option<Vec<String>>,

    /// Retrieved context (for RAG-style evaluation)
    pub retrieval_context: Option<Vec<String>>,

    /// Tools the system invoked while producing the output
    pub tools_used: Option<Vec<String>>,

    /// Tools the system was expected to invoke
    pub expected_tools: Option<Vec<String>>,

    /// Caller-supplied metadata, propagated onto result records
    pub additional_metadata: Option<HashMap<String, serde_json::Value>>,

    /// Free-form annotation, propagated onto result records
    pub comments: Option<String>,

    /// Position of this case within its source dataset
    pub dataset_rank: usize,
}

impl TurnTestCase {
    pub fn new(input: impl Into<String>, actual_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            actual_output: actual_output.into(),
            ..Default::default()
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_retrieval_context(mut self, retrieval_context: Vec<String>) -> Self {
        self.retrieval_context = Some(retrieval_context);
        self
    }

    pub fn with_tools_used(mut self, tools: Vec<String>) -> Self {
        self.tools_used = Some(tools);
        self
    }

    pub fn with_expected_tools(mut self, tools: Vec<String>) -> Self {
        self.expected_tools = Some(tools);
        self
    }

    pub fn with_additional_metadata(
        mut self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.additional_metadata = Some(metadata);
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_dataset_rank(mut self, rank: usize) -> Self {
        self.dataset_rank = rank;
        self
    }
}

/// One message of a conversation, with an opt-out flag for evaluation.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// When false, the flattener does not expand this message into its own
    /// unit of work
    pub should_evaluate: bool,

    /// The underlying single-turn case
    pub case: Arc<TurnTestCase>,
}

impl ConversationTurn {
    pub fn new(case: Arc<TurnTestCase>) -> Self {
        Self {
            should_evaluate: true,
            case,
        }
    }

    pub fn skipped(case: Arc<TurnTestCase>) -> Self {
        Self {
            should_evaluate: false,
            case,
        }
    }
}

/// An ordered multi-turn conversation to be scored.
///
/// The conversation's `additional_metadata` and `comments` override those of
/// its individual messages when the flattener expands them.
#[derive(Debug, Clone, Default)]
pub struct ConversationalTestCase {
    /// Ordered messages; each may independently opt out of evaluation
    pub turns: Vec<ConversationTurn>,

    /// Metadata stamped onto every expanded message
    pub additional_metadata: Option<HashMap<String, serde_json::Value>>,

    /// Annotation stamped onto every expanded message
    pub comments: Option<String>,

    /// Position of this case within its source dataset
    pub dataset_rank: usize,
}

impl ConversationalTestCase {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self {
            turns,
            ..Default::default()
        }
    }

    pub fn with_additional_metadata(
        mut self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.additional_metadata = Some(metadata);
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_dataset_rank(mut self, rank: usize) -> Self {
        self.dataset_rank = rank;
        self
    }
}

/// Closed union over the two test case variants.
///
/// The orchestrator, flattener, and aggregator all match on this
/// exhaustively; there is no open-ended dynamic dispatch between variants.
#[derive(Debug, Clone)]
pub enum TestCase {
    Turn(Arc<TurnTestCase>),
    Conversation(Arc<ConversationalTestCase>),
}

impl TestCase {
    pub fn turn(case: TurnTestCase) -> Self {
        TestCase::Turn(Arc::new(case))
    }

    pub fn conversation(case: ConversationalTestCase) -> Self {
        TestCase::Conversation(Arc::new(case))
    }
}

impl From<TurnTestCase> for TestCase {
    fn from(case: TurnTestCase) -> Self {
        TestCase::turn(case)
    }
}

impl From<ConversationalTestCase> for TestCase {
    fn from(case: ConversationalTestCase) -> Self {
        TestCase::conversation(case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_round_trip() {
        let case = TurnTestCase::new("What is 2+2?", "4")
            .with_expected_output("4")
            .with_retrieval_context(vec!["arithmetic".to_string()])
            .with_dataset_rank(3);

        assert_eq!(case.input, "What is 2+2?");
        assert_eq!(case.expected_output.as_deref(), Some("4"));
        assert_eq!(case.dataset_rank, 3);
        assert!(case.context.is_none());
    }

    #[test]
    fn test_conversation_turn_flags() {
        let inner = Arc::new(TurnTestCase::new("hi", "hello"));
        assert!(ConversationTurn::new(inner.clone()).should_evaluate);
        assert!(!ConversationTurn::skipped(inner).should_evaluate);
    }

    #[test]
    fn test_tagged_union_from_impls() {
        let case: TestCase = TurnTestCase::new("a", "b").into();
        assert!(matches!(case, TestCase::Turn(_)));

        let conv: TestCase = ConversationalTestCase::new(vec![]).into();
        assert!(matches!(conv, TestCase::Conversation(_)));
    }
}
