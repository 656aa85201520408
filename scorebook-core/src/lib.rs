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

//! # Scorebook Core
//!
//! Data model and trait contracts shared by the Scorebook evaluation
//! orchestrator:
//!
//! - **Test cases**: single-turn and conversational variants modeled as a
//!   closed tagged union ([`TestCase`])
//! - **Metric contracts**: stateless [`Metric`] / [`ConversationalMetric`]
//!   traits whose `measure` returns an immutable [`Measurement`]
//! - **Result snapshots**: [`MetricData`], created once per (test case,
//!   metric) pair and never mutated afterwards
//! - **Hyperparameters**: the run-level settings that participate in cache
//!   fingerprints
//!
//! Metric implementations live with callers; this crate only defines the
//! seams the orchestrator drives them through.

pub mod error;
pub mod hyperparameters;
pub mod metric;
pub mod test_case;

pub use error::EvalError;
pub use hyperparameters::Hyperparameters;
pub use metric::{
    ConversationalMetric, EvalMetric, Measurement, Metric, MetricConfiguration, MetricData,
    MetricError, Verdict,
};
pub use test_case::{ConversationTurn, ConversationalTestCase, TestCase, TurnTestCase};
