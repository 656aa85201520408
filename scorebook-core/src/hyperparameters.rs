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

//! Run-level hyperparameters logged with a test run
//!
//! Hyperparameters participate in cache keys: two runs only share cached
//! results when their hyperparameters render to the same fingerprint. A
//! `BTreeMap` keeps the canonical JSON rendering order-stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EvalError;

pub const MODEL_KEY: &str = "model";
pub const PROMPT_TEMPLATE_KEY: &str = "prompt template";

/// String-keyed hyperparameter map.
///
/// When supplied at all, both [`MODEL_KEY`] and [`PROMPT_TEMPLATE_KEY`] are
/// mandatory; their absence is a caller configuration error raised before any
/// execution begins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters(BTreeMap<String, serde_json::Value>);

impl Hyperparameters {
    pub fn new(model: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(MODEL_KEY.to_string(), model.into().into());
        map.insert(PROMPT_TEMPLATE_KEY.to_string(), prompt_template.into().into());
        Self(map)
    }

    /// Build from raw key/value pairs; [`Hyperparameters::validate`] decides
    /// whether the result is usable.
    pub fn from_map(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self(map)
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical byte rendering for cache fingerprints; `BTreeMap` ordering
    /// makes it independent of insertion order
    pub fn fingerprint_material(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (key, value) in &self.0 {
            bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
            bytes.extend_from_slice(key.as_bytes());
            let rendered = value.to_string();
            bytes.extend_from_slice(&(rendered.len() as u64).to_le_bytes());
            bytes.extend_from_slice(rendered.as_bytes());
        }
        bytes
    }

    /// Enforce the mandatory keys
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.0.get(MODEL_KEY).is_none() || self.0.get(PROMPT_TEMPLATE_KEY).is_none() {
            return Err(EvalError::InvalidHyperparameters);
        }
        Ok(())
    }
}
