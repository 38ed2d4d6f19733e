//! Per-node status tracking: transition history (breadcrumbs), derived
//! execution order, durations, and summary counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use crate::types::{Phase, Status};

/// One entry in a node's transition history.
#[derive(Clone, Debug, Serialize)]
pub struct Breadcrumb {
    /// Milliseconds since the build started.
    pub t_offset_ms: u64,
    pub status: Status,
    pub phase: Phase,
    pub invocation: u32,
}

/// One entry in the derived execution order. Created when a node first
/// turns ready/running; completed in place when it reaches a terminal.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionRecord {
    pub key: String,
    pub name: String,
    pub t_ready_ms: u64,
    pub t_complete_ms: Option<u64>,
    pub status: Status,
    pub phase: Phase,
}

/// Counters and history for one completed engine run.
#[derive(Clone, Debug, Serialize)]
pub struct BuildSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub counters: BTreeMap<String, usize>,
    pub failed: Vec<String>,
    pub execution_order: Vec<ExecutionRecord>,
}

/// Tracks status, durations, and the breadcrumb trail for every node.
///
/// Statuses are kept per invocation so a validate pass and the real run
/// that follows it stay distinguishable in the history.
pub struct StatusManager {
    statuses: HashMap<String, BTreeMap<u32, Status>>,
    names: HashMap<String, String>,
    durations_ms: HashMap<String, u64>,
    breadcrumbs: HashMap<String, Vec<Breadcrumb>>,
    execution_order: Vec<ExecutionRecord>,
    ordered_keys: HashSet<String>,
    build_start: Instant,
    started_at: DateTime<Utc>,
    invocation: u32,
}

impl StatusManager {
    pub fn new() -> Self {
        Self {
            statuses: HashMap::new(),
            names: HashMap::new(),
            durations_ms: HashMap::new(),
            breadcrumbs: HashMap::new(),
            execution_order: Vec::new(),
            ordered_keys: HashSet::new(),
            build_start: Instant::now(),
            started_at: Utc::now(),
            invocation: 1,
        }
    }

    /// Start a new invocation. Prior statuses stay readable in history;
    /// the execution order and counters reset.
    pub fn begin_invocation(&mut self) -> u32 {
        self.invocation += 1;
        self.execution_order.clear();
        self.ordered_keys.clear();
        self.build_start = Instant::now();
        self.started_at = Utc::now();
        self.invocation
    }

    pub fn invocation(&self) -> u32 {
        self.invocation
    }

    fn offset_ms(&self) -> u64 {
        self.build_start.elapsed().as_millis() as u64
    }

    /// Record a status change: writes the per-invocation status, appends a
    /// breadcrumb, and maintains the execution-order ledger.
    pub fn set_status(&mut self, key: &str, name: &str, status: Status) {
        let offset = self.offset_ms();
        let invocation = self.invocation;

        self.names.insert(key.to_string(), name.to_string());
        self.statuses
            .entry(key.to_string())
            .or_default()
            .insert(invocation, status);
        self.breadcrumbs
            .entry(key.to_string())
            .or_default()
            .push(Breadcrumb {
                t_offset_ms: offset,
                status,
                phase: status.phase(),
                invocation,
            });

        match status {
            Status::Ready | Status::Running => {
                if self.ordered_keys.insert(key.to_string()) {
                    self.execution_order.push(ExecutionRecord {
                        key: key.to_string(),
                        name: name.to_string(),
                        t_ready_ms: offset,
                        t_complete_ms: None,
                        status,
                        phase: status.phase(),
                    });
                }
            }
            s if s.is_terminal() => {
                if let Some(record) = self
                    .execution_order
                    .iter_mut()
                    .find(|r| r.key == key && r.t_complete_ms.is_none())
                {
                    record.t_complete_ms = Some(offset);
                    record.status = status;
                    record.phase = status.phase();
                } else if self.ordered_keys.insert(key.to_string()) {
                    // Terminal without ever being seen ready (e.g. a node
                    // failed during coordination): record it once.
                    self.execution_order.push(ExecutionRecord {
                        key: key.to_string(),
                        name: name.to_string(),
                        t_ready_ms: offset,
                        t_complete_ms: Some(offset),
                        status,
                        phase: status.phase(),
                    });
                }
            }
            _ => {}
        }
    }

    /// Current status of a node. Every node is initialized to `pending`
    /// before the loop starts, so a miss here is a scheduler bug.
    pub fn get_status(&self, key: &str) -> Status {
        self.statuses
            .get(key)
            .and_then(|per_invocation| per_invocation.get(&self.invocation))
            .copied()
            .unwrap_or_else(|| panic!("status queried for uninitialized node: {key}"))
    }

    pub fn has_status(&self, key: &str) -> bool {
        self.statuses
            .get(key)
            .is_some_and(|m| m.contains_key(&self.invocation))
    }

    pub fn set_duration_ms(&mut self, key: &str, ms: u64) {
        self.durations_ms.insert(key.to_string(), ms);
    }

    pub fn duration_ms(&self, key: &str) -> Option<u64> {
        self.durations_ms.get(key).copied()
    }

    pub fn breadcrumbs(&self, key: &str) -> &[Breadcrumb] {
        self.breadcrumbs.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Transition history rendered for diagnostics.
    pub fn history_lines(&self, key: &str) -> Vec<String> {
        self.breadcrumbs(key)
            .iter()
            .map(|b| {
                format!(
                    "+{}ms {} ({:?}) [invocation {}]",
                    b.t_offset_ms, b.status, b.phase, b.invocation
                )
            })
            .collect()
    }

    pub fn execution_order(&self) -> &[ExecutionRecord] {
        &self.execution_order
    }

    /// Counters plus the ordered execution history for this invocation.
    pub fn build_summary(&self) -> BuildSummary {
        let mut counters: BTreeMap<String, usize> = BTreeMap::new();
        let mut failed = Vec::new();
        for (key, per_invocation) in &self.statuses {
            if let Some(status) = per_invocation.get(&self.invocation) {
                *counters.entry(status.to_string()).or_default() += 1;
                if *status == Status::Failed {
                    let name = self.names.get(key).cloned().unwrap_or_else(|| key.clone());
                    failed.push(name);
                }
            }
        }
        failed.sort();
        BuildSummary {
            started_at: self.started_at,
            elapsed_ms: self.offset_ms(),
            counters,
            failed,
            execution_order: self.execution_order.clone(),
        }
    }
}

impl Default for StatusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breadcrumbs_accumulate() {
        let mut manager = StatusManager::new();
        manager.set_status("t", "t", Status::Pending);
        manager.set_status("t", "t", Status::Ready);
        manager.set_status("t", "t", Status::Done);
        let crumbs = manager.breadcrumbs("t");
        assert_eq!(crumbs.len(), 3);
        assert_eq!(crumbs[0].phase, Phase::Initialization);
        assert_eq!(crumbs[1].phase, Phase::ExecutionPreparation);
        assert_eq!(crumbs[2].phase, Phase::Completion);
    }

    #[test]
    fn test_execution_order_single_entry_per_node() {
        let mut manager = StatusManager::new();
        manager.set_status("t", "t", Status::Pending);
        manager.set_status("t", "t", Status::Ready);
        manager.set_status("t", "t", Status::Running);
        manager.set_status("t", "t", Status::Done);
        let order = manager.execution_order();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].status, Status::Done);
        assert!(order[0].t_complete_ms.is_some());
    }

    #[test]
    fn test_terminal_without_ready_still_recorded() {
        let mut manager = StatusManager::new();
        manager.set_status("t", "t", Status::Pending);
        manager.set_status("t", "t", Status::Failed);
        let order = manager.execution_order();
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].status, Status::Failed);
    }

    #[test]
    #[should_panic(expected = "uninitialized node")]
    fn test_get_status_uninitialized_panics() {
        let manager = StatusManager::new();
        manager.get_status("ghost");
    }

    #[test]
    fn test_invocations_are_isolated() {
        let mut manager = StatusManager::new();
        manager.set_status("t", "t", Status::Done);
        manager.begin_invocation();
        assert!(!manager.has_status("t"));
        manager.set_status("t", "t", Status::Pending);
        assert_eq!(manager.get_status("t"), Status::Pending);
    }

    #[test]
    fn test_summary_counts() {
        let mut manager = StatusManager::new();
        manager.set_status("a", "a", Status::Done);
        manager.set_status("b", "b", Status::Done);
        manager.set_status("c", "c", Status::Failed);
        let summary = manager.build_summary();
        assert_eq!(summary.counters.get("done"), Some(&2));
        assert_eq!(summary.counters.get("failed"), Some(&1));
        assert_eq!(summary.failed, vec!["c"]);
    }
}
