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

//! Errors surfaced by the evaluation orchestrator

use thiserror::Error;

/// Errors that can abort an evaluation run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A metric's scoring logic raised and `ignore_errors` was off; the
    /// whole batch aborts with no partial results
    #[error("metric '{name}' failed: {message}")]
    MetricFailure { name: String, message: String },

    /// Hyperparameters were supplied without both mandatory keys
    #[error("a `model` and `prompt template` key must be provided when logging hyperparameters")]
    InvalidHyperparameters,

    /// Single-case assertion failed; the message enumerates every failing
    /// metric with its score, threshold, strict mode, and error
    #[error("metrics: {0} failed")]
    AssertionFailed(String),

    /// The async execution strategy could not obtain a runtime
    #[error("runtime error: {0}")]
    Runtime(String),
}
