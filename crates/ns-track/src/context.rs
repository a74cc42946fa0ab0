use ns_core::{ProvenanceRecord, RunIdentity};
use std::sync::Mutex;

/// Ordered sequence of provenance records consumed by read-opens so far.
///
/// Append-only during normal operation; duplicates are allowed and
/// insertion order is significant, since a write-open snapshots the ledger
/// as the new record's dependency list.
#[derive(Debug, Default)]
pub struct DependencyLedger {
    records: Vec<ProvenanceRecord>,
}

impl DependencyLedger {
    pub fn push(&mut self, record: ProvenanceRecord) {
        self.records.push(record);
    }

    pub fn snapshot(&self) -> Vec<ProvenanceRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Process-level tracking context: the captured run identity plus the
/// dependency ledger, threaded explicitly into every store open instead of
/// living in module-level globals. The ledger sits behind a mutex so an
/// append and a snapshot cannot interleave across threads.
#[derive(Debug)]
pub struct RunContext {
    identity: RunIdentity,
    ledger: Mutex<DependencyLedger>,
}

impl RunContext {
    pub fn new(identity: RunIdentity) -> Self {
        Self {
            identity,
            ledger: Mutex::new(DependencyLedger::default()),
        }
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Appends a record consumed by a read-open.
    pub fn record_dependency(&self, record: ProvenanceRecord) {
        self.lock_ledger().push(record);
    }

    /// By-value snapshot of the ledger, taken at write-open time.
    pub fn dependency_snapshot(&self) -> Vec<ProvenanceRecord> {
        self.lock_ledger().snapshot()
    }

    pub fn dependency_count(&self) -> usize {
        self.lock_ledger().len()
    }

    /// Explicit process-level reset; not part of normal operation.
    pub fn clear_dependencies(&self) {
        self.lock_ledger().clear();
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, DependencyLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn identity() -> RunIdentity {
        RunIdentity {
            uuid: "test-run".to_string(),
            run_time: "2026-08-30T09:00:00Z".to_string(),
            entry_point: "/opt/analysis/run".to_string(),
            args: Vec::new(),
            repos: Vec::new(),
            config: Map::new(),
            venv: Map::new(),
            os: Map::new(),
            memory: Map::new(),
        }
    }

    #[test]
    fn snapshot_is_by_value() {
        let ctx = RunContext::new(identity());
        let record = ProvenanceRecord::new(identity(), Vec::new(), "a.h5", Map::new());
        ctx.record_dependency(record.clone());

        let snapshot = ctx.dependency_snapshot();
        ctx.record_dependency(record);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ctx.dependency_count(), 2);
    }

    #[test]
    fn clear_resets_the_ledger() {
        let ctx = RunContext::new(identity());
        ctx.record_dependency(ProvenanceRecord::new(identity(), Vec::new(), "a.h5", Map::new()));
        ctx.clear_dependencies();
        assert_eq!(ctx.dependency_count(), 0);
    }
}
