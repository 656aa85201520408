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

//! Content-addressed caching of metric results
//!
//! Cache entries are keyed by a fingerprint over a test case's evaluable
//! fields combined with a fingerprint over the run's hyperparameters. The
//! durable tier sits behind [`CacheBackend`] so persistence stays an external
//! concern; the transient tier is an in-process overlay that gives a run
//! visibility of its own writes without read-after-write guarantees from
//! durable storage.

use dashmap::DashMap;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use scorebook_core::{Hyperparameters, MetricConfiguration, MetricData, TurnTestCase};

const TRANSIENT_CAPACITY: u64 = 10_000;

/// One cached metric result together with the configuration that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMetricData {
    pub metric_data: MetricData,
    pub metric_configuration: MetricConfiguration,
}

/// Durable record of prior metric results for one (test case, hyperparameters)
/// key. Overwritten whole on write-back, never merged in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedTestCase {
    pub cached_metrics_data: Vec<CachedMetricData>,
}

impl CachedTestCase {
    /// Stored result for `name`, valid only when the stored configuration
    /// matches the metric's current one exactly.
    pub fn metric_data_for(
        &self,
        name: &str,
        configuration: &MetricConfiguration,
    ) -> Option<&MetricData> {
        self.cached_metrics_data
            .iter()
            .find(|entry| {
                entry.metric_data.name == name && entry.metric_configuration == *configuration
            })
            .map(|entry| &entry.metric_data)
    }
}

/// Cache key: test-case fingerprint plus hyperparameter fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub case_fingerprint: String,
    pub hyperparameters_fingerprint: String,
}

impl CacheKey {
    pub fn new(case: &TurnTestCase, hyperparameters: Option<&Hyperparameters>) -> Self {
        Self {
            case_fingerprint: fingerprint_case(case),
            hyperparameters_fingerprint: fingerprint_hyperparameters(hyperparameters),
        }
    }
}

/// Stable content hash over a case's evaluable fields.
///
/// Fields are hashed individually with presence tags so that, e.g., an absent
/// context and an empty context produce different fingerprints.
fn fingerprint_case(case: &TurnTestCase) -> String {
    let mut hasher = blake3::Hasher::new();
    hash_str(&mut hasher, &case.input);
    hash_str(&mut hasher, &case.actual_output);
    hash_opt_str(&mut hasher, case.expected_output.as_deref());
    hash_opt_list(&mut hasher, case.context.as_deref());
    hash_opt_list(&mut hasher, case.retrieval_context.as_deref());
    hash_opt_list(&mut hasher, case.tools_used.as_deref());
    hash_opt_list(&mut hasher, case.expected_tools.as_deref());
    hex::encode(hasher.finalize().as_bytes())
}

/// Stable hash over the hyperparameter map; `BTreeMap` iteration keeps the
/// rendering order-independent of insertion.
fn fingerprint_hyperparameters(hyperparameters: Option<&Hyperparameters>) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Some(hp) = hyperparameters {
        hasher.update(&hp.fingerprint_material());
    }
    hex::encode(hasher.finalize().as_bytes())
}

fn hash_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn hash_opt_str(hasher: &mut blake3::Hasher, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(&[1]);
            hash_str(hasher, v);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_opt_list(hasher: &mut blake3::Hasher, values: Option<&[String]>) {
    match values {
        Some(vs) => {
            hasher.update(&[1]);
            hasher.update(&(vs.len() as u64).to_le_bytes());
            for v in vs {
                hash_str(hasher, v);
            }
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Which tier a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Durable,
    Transient,
}

/// Durable cache persistence seam.
///
/// Implementations own serialization and storage; the orchestrator only sees
/// whole entries keyed by fingerprint pairs.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedTestCase>;
    fn put(&self, key: CacheKey, entry: CachedTestCase);
}

/// In-memory backend, the default and the one tests run against.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<CacheKey, CachedTestCase>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &CacheKey) -> Option<CachedTestCase> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    fn put(&self, key: CacheKey, entry: CachedTestCase) {
        self.entries.insert(key, entry);
    }
}

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Two-tier cache store.
///
/// Lookups consult the transient overlay first, then the durable backend.
/// Durable writes can be disabled for a run (`save_to_disk = false`); the
/// transient tier keeps recording regardless so within-process resume still
/// sees this run's results.
pub struct CacheManager {
    durable: Arc<dyn CacheBackend>,
    transient: Cache<CacheKey, CachedTestCase>,
    durable_writes: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new(durable: Arc<dyn CacheBackend>) -> Self {
        Self {
            durable,
            transient: Cache::builder().max_capacity(TRANSIENT_CAPACITY).build(),
            durable_writes: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()))
    }

    /// Toggle durable-tier writes for the current run
    pub fn set_durable_writes(&self, enabled: bool) {
        self.durable_writes.store(enabled, Ordering::Relaxed);
    }

    pub fn lookup(
        &self,
        case: &TurnTestCase,
        hyperparameters: Option<&Hyperparameters>,
    ) -> Option<CachedTestCase> {
        let key = CacheKey::new(case, hyperparameters);
        let entry = self
            .transient
            .get(&key)
            .or_else(|| self.durable.get(&key));
        match &entry {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(case = %key.case_fingerprint, "cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        entry
    }

    pub fn write(
        &self,
        case: &TurnTestCase,
        entry: &CachedTestCase,
        hyperparameters: Option<&Hyperparameters>,
        tier: CacheTier,
    ) {
        let key = CacheKey::new(case, hyperparameters);
        match tier {
            CacheTier::Durable => {
                if self.durable_writes.load(Ordering::Relaxed) {
                    self.durable.put(key, entry.clone());
                }
            }
            CacheTier::Transient => {
                self.transient.insert(key, entry.clone());
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_data(name: &str, score: f64) -> MetricData {
        MetricData {
            name: name.to_string(),
            threshold: 0.5,
            score: Some(score),
            reason: None,
            success: score >= 0.5,
            strict_mode: false,
            evaluation_model: None,
            error: None,
            evaluation_cost: Some(0.0),
            verbose_logs: None,
        }
    }

    fn sample_configuration(threshold: f64) -> MetricConfiguration {
        MetricConfiguration {
            threshold,
            strict_mode: false,
            evaluation_model: None,
            settings: BTreeMap::new(),
        }
    }

    fn sample_entry() -> CachedTestCase {
        CachedTestCase {
            cached_metrics_data: vec![CachedMetricData {
                metric_data: sample_data("relevance", 0.8),
                metric_configuration: sample_configuration(0.5),
            }],
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = TurnTestCase::new("q", "a");
        let b = TurnTestCase::new("q", "a");
        let c = TurnTestCase::new("q", "different");
        assert_eq!(fingerprint_case(&a), fingerprint_case(&b));
        assert_ne!(fingerprint_case(&a), fingerprint_case(&c));
    }

    #[test]
    fn test_fingerprint_distinguishes_absent_from_empty() {
        let absent = TurnTestCase::new("q", "a");
        let empty = TurnTestCase::new("q", "a").with_context(vec![]);
        assert_ne!(fingerprint_case(&absent), fingerprint_case(&empty));
    }

    #[test]
    fn test_hyperparameter_fingerprint_differs() {
        let a = Hyperparameters::new("gpt-4o-mini", "template");
        let b = Hyperparameters::new("gpt-4o", "template");
        assert_ne!(
            fingerprint_hyperparameters(Some(&a)),
            fingerprint_hyperparameters(Some(&b))
        );
        assert_eq!(
            fingerprint_hyperparameters(None),
            fingerprint_hyperparameters(None)
        );
    }

    #[test]
    fn test_configuration_mismatch_invalidates_entry() {
        let entry = sample_entry();
        assert!(entry
            .metric_data_for("relevance", &sample_configuration(0.5))
            .is_some());
        assert!(entry
            .metric_data_for("relevance", &sample_configuration(0.6))
            .is_none());
        assert!(entry
            .metric_data_for("faithfulness", &sample_configuration(0.5))
            .is_none());
    }

    #[test]
    fn test_transient_tier_visible_when_durable_writes_disabled() {
        let manager = CacheManager::in_memory();
        manager.set_durable_writes(false);

        let case = TurnTestCase::new("q", "a");
        let entry = sample_entry();
        manager.write(&case, &entry, None, CacheTier::Durable);
        manager.write(&case, &entry, None, CacheTier::Transient);

        // Transient write is observable within the process
        let found = manager.lookup(&case, None).unwrap();
        assert_eq!(found.cached_metrics_data.len(), 1);

        // The durable backend never saw the entry
        let fresh = CacheManager::new(Arc::new(MemoryCacheBackend::new()));
        assert!(fresh.lookup(&case, None).is_none());
    }

    #[test]
    fn test_durable_write_survives_to_new_manager() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let case = TurnTestCase::new("q", "a");
        let hp = Hyperparameters::new("m", "p");

        let first = CacheManager::new(backend.clone());
        first.write(&case, &sample_entry(), Some(&hp), CacheTier::Durable);

        // A second manager over the same backend sees the durable entry
        let second = CacheManager::new(backend);
        assert!(second.lookup(&case, Some(&hp)).is_some());

        // But not under different hyperparameters
        let other = Hyperparameters::new("m2", "p");
        assert!(second.lookup(&case, Some(&other)).is_none());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let manager = CacheManager::in_memory();
        let case = TurnTestCase::new("q", "a");

        assert!(manager.lookup(&case, None).is_none());
        manager.write(&case, &sample_entry(), None, CacheTier::Transient);
        assert!(manager.lookup(&case, None).is_some());

        let stats = manager.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }
}
