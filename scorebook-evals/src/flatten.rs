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

//! Flattening of conversational test cases into uniform units of work

use std::collections::HashMap;
use std::sync::Arc;

use scorebook_core::{ConversationalTestCase, TestCase, TurnTestCase};

/// One entry in the flattened work stream.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    /// A standalone single-turn case
    Turn { case: Arc<TurnTestCase> },

    /// A conversation-level case; `unit_index` is its position in the work
    /// stream so message units can point back to it
    Conversation {
        case: Arc<ConversationalTestCase>,
        unit_index: usize,
    },

    /// A message expanded out of a conversation. Carries the parent's
    /// metadata and comments, which override the message's own.
    Message {
        case: Arc<TurnTestCase>,
        parent_unit: usize,
        message_index: usize,
        additional_metadata: Option<HashMap<String, serde_json::Value>>,
        comments: Option<String>,
    },
}

/// Expand conversational cases into their evaluable messages.
///
/// Original ordering is preserved for the supplied entries; message units are
/// appended after all of them, so a conversation's record always exists
/// before its messages are processed. Messages whose `should_evaluate` flag
/// is off are not expanded.
pub fn flatten_test_cases(test_cases: &[TestCase]) -> Vec<WorkUnit> {
    let mut units: Vec<WorkUnit> = test_cases
        .iter()
        .enumerate()
        .map(|(index, case)| match case {
            TestCase::Turn(turn) => WorkUnit::Turn { case: turn.clone() },
            TestCase::Conversation(conv) => WorkUnit::Conversation {
                case: conv.clone(),
                unit_index: index,
            },
        })
        .collect();

    for (index, case) in test_cases.iter().enumerate() {
        if let TestCase::Conversation(conv) = case {
            for (message_index, turn) in conv.turns.iter().enumerate() {
                if turn.should_evaluate {
                    units.push(WorkUnit::Message {
                        case: turn.case.clone(),
                        parent_unit: index,
                        message_index,
                        additional_metadata: conv.additional_metadata.clone(),
                        comments: conv.comments.clone(),
                    });
                }
            }
        }
    }

    units
}

/// Per-batch bookkeeping threaded through the orchestrator.
///
/// Replaces process-global lookup maps: identity of a message case is its
/// `Arc` pointer, and a message identity seen twice within one batch maps to
/// the record created for its first occurrence.
#[derive(Debug, Default)]
pub struct BatchContext {
    message_records: HashMap<usize, usize>,
    conversation_records: HashMap<usize, usize>,
    turn_count: usize,
    conversation_count: usize,
}

impl BatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for naming the next standalone turn record
    pub fn next_turn_index(&mut self) -> usize {
        let index = self.turn_count;
        self.turn_count += 1;
        index
    }

    /// Index for naming the next conversation record
    pub fn next_conversation_index(&mut self) -> usize {
        let index = self.conversation_count;
        self.conversation_count += 1;
        index
    }

    pub fn message_identity(case: &Arc<TurnTestCase>) -> usize {
        Arc::as_ptr(case) as usize
    }

    /// Record index previously created for this message identity, if any
    pub fn message_record(&self, case: &Arc<TurnTestCase>) -> Option<usize> {
        self.message_records
            .get(&Self::message_identity(case))
            .copied()
    }

    pub fn register_message_record(&mut self, case: &Arc<TurnTestCase>, record_index: usize) {
        self.message_records
            .insert(Self::message_identity(case), record_index);
    }

    pub fn conversation_record(&self, unit_index: usize) -> Option<usize> {
        self.conversation_records.get(&unit_index).copied()
    }

    pub fn register_conversation_record(&mut self, unit_index: usize, record_index: usize) {
        self.conversation_records.insert(unit_index, record_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_core::ConversationTurn;

    fn conversation(n: usize) -> ConversationalTestCase {
        let turns = (0..n)
            .map(|i| {
                ConversationTurn::new(Arc::new(TurnTestCase::new(
                    format!("q{i}"),
                    format!("a{i}"),
                )))
            })
            .collect();
        ConversationalTestCase::new(turns)
    }

    #[test]
    fn test_messages_appended_after_all_original_entries() {
        let cases = vec![
            TestCase::conversation(conversation(2)),
            TestCase::turn(TurnTestCase::new("solo", "answer")),
        ];
        let units = flatten_test_cases(&cases);

        assert_eq!(units.len(), 4);
        assert!(matches!(units[0], WorkUnit::Conversation { .. }));
        assert!(matches!(units[1], WorkUnit::Turn { .. }));
        assert!(matches!(units[2], WorkUnit::Message { .. }));
        assert!(matches!(units[3], WorkUnit::Message { .. }));
    }

    #[test]
    fn test_opted_out_messages_are_not_expanded() {
        let inner = Arc::new(TurnTestCase::new("q", "a"));
        let conv = ConversationalTestCase::new(vec![
            ConversationTurn::new(inner.clone()),
            ConversationTurn::skipped(inner),
        ]);
        let units = flatten_test_cases(&[TestCase::conversation(conv)]);
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_message_units_carry_parent_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("suite".to_string(), serde_json::json!("smoke"));
        let conv = conversation(1)
            .with_additional_metadata(metadata)
            .with_comments("from parent");

        let units = flatten_test_cases(&[TestCase::conversation(conv)]);
        match &units[1] {
            WorkUnit::Message {
                additional_metadata,
                comments,
                message_index,
                parent_unit,
                ..
            } => {
                assert_eq!(*parent_unit, 0);
                assert_eq!(*message_index, 0);
                assert!(additional_metadata.is_some());
                assert_eq!(comments.as_deref(), Some("from parent"));
            }
            other => panic!("expected message unit, got {other:?}"),
        }
    }

    #[test]
    fn test_identity_is_pointer_based() {
        let shared = Arc::new(TurnTestCase::new("q", "a"));
        let cloned_value = Arc::new(TurnTestCase::new("q", "a"));
        assert_eq!(
            BatchContext::message_identity(&shared),
            BatchContext::message_identity(&shared.clone())
        );
        assert_ne!(
            BatchContext::message_identity(&shared),
            BatchContext::message_identity(&cloned_value)
        );
    }
}
