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

//! Run-record sink
//!
//! Durable storage of test-run artifacts is an external concern; the
//! orchestrator only hands finalized records (and the final summary) through
//! the [`RunRecorder`] seam. Conversation records are re-recorded whenever a
//! message finalizes, so implementations treat `record` as an upsert keyed by
//! record name.

use parking_lot::RwLock;

use crate::records::ResultRecord;
use crate::summary::RunSummary;

/// Sink for finalized result records.
pub trait RunRecorder: Send + Sync {
    /// Forwarded from the run's `save_to_disk` option before any unit runs
    fn set_save_to_disk(&self, save: bool) {
        let _ = save;
    }

    /// Upsert one record by name
    fn record(&self, record: &ResultRecord);

    /// Called once after the batch with the computed summary
    fn finalize(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// Recorder that drops everything.
pub struct NoopRunRecorder;

impl RunRecorder for NoopRunRecorder {
    fn record(&self, _record: &ResultRecord) {}
}

/// Default recorder: keeps the run in memory for inspection after the batch.
#[derive(Default)]
pub struct InMemoryRunRecorder {
    records: RwLock<Vec<ResultRecord>>,
    summary: RwLock<Option<RunSummary>>,
    save_to_disk: RwLock<bool>,
}

impl InMemoryRunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.read().clone()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary.read().clone()
    }

    pub fn save_to_disk(&self) -> bool {
        *self.save_to_disk.read()
    }

    pub fn reset(&self) {
        self.records.write().clear();
        *self.summary.write() = None;
    }
}

impl RunRecorder for InMemoryRunRecorder {
    fn set_save_to_disk(&self, save: bool) {
        *self.save_to_disk.write() = save;
    }

    fn record(&self, record: &ResultRecord) {
        let mut records = self.records.write();
        if let Some(existing) = records.iter_mut().find(|r| r.name == record.name) {
            *existing = record.clone();
        } else {
            records.push(record.clone());
        }
    }

    fn finalize(&self, summary: &RunSummary) {
        *self.summary.write() = Some(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorebook_core::TurnTestCase;

    #[test]
    fn test_record_upserts_by_name() {
        let recorder = InMemoryRunRecorder::new();
        let case = TurnTestCase::new("q", "a");

        let record = ResultRecord::for_turn(&case, 0);
        recorder.record(&record);

        let mut updated = record.clone();
        updated.success = false;
        recorder.record(&updated);

        let records = recorder.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
    }

    #[test]
    fn test_reset_clears_run() {
        let recorder = InMemoryRunRecorder::new();
        let case = TurnTestCase::new("q", "a");
        recorder.record(&ResultRecord::for_turn(&case, 0));
        recorder.finalize(&RunSummary::from_results(&[], 0.0));

        recorder.reset();
        assert!(recorder.records().is_empty());
        assert!(recorder.summary().is_none());
    }

    #[test]
    fn test_save_to_disk_flag_forwarded() {
        let recorder = InMemoryRunRecorder::new();
        assert!(!recorder.save_to_disk());
        recorder.set_save_to_disk(true);
        assert!(recorder.save_to_disk());
    }
}
