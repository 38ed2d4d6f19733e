use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ─── Scalar aliases ───────────────────────────────────────────

/// Arena index of a node in the registry.
pub type NodeId = u32;

/// Position of a child under a parent. 0 is reserved for the
/// auto-generated dependency group; regular children are 1, 2, 3…
pub type ChildOrder = u32;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Default admission window for parallel groups that request
/// parallelism without a numeric cap.
pub const DEFAULT_PARALLEL_CAPACITY: u32 = 4;

/// Suffix appended to a parent's name to form its dependency group.
pub const DEP_GROUP_SUFFIX: &str = "_dependency_group";

// ─── Node kind ────────────────────────────────────────────────

/// What a node was declared as in the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Task,
    Platform,
    Group,
}

// ─── Status lattice ───────────────────────────────────────────

/// Node status. `pending → ready → {done, failed, skipped, validate, dry-run}`,
/// with `running` as a transient stop between `ready` and a terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
    Validate,
    DryRun,
}

impl Status {
    /// Success statuses: the node finished and downstream work may proceed.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Status::Done | Status::Skipped | Status::Validate | Status::DryRun
        )
    }

    /// Terminal statuses: success set plus `failed`.
    pub fn is_terminal(self) -> bool {
        self.is_success() || self == Status::Failed
    }

    /// Phase tag recorded alongside this status in breadcrumbs.
    pub fn phase(self) -> Phase {
        match self {
            Status::Pending => Phase::Initialization,
            Status::Ready => Phase::ExecutionPreparation,
            Status::Running => Phase::Execution,
            Status::Done | Status::Failed | Status::Skipped => Phase::Completion,
            Status::Validate | Status::DryRun => Phase::Validation,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Ready => "ready",
            Status::Running => "running",
            Status::Done => "done",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Validate => "validate",
            Status::DryRun => "dry-run",
        };
        f.write_str(s)
    }
}

/// Lifecycle phase derived from a status transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialization,
    ExecutionPreparation,
    Execution,
    Completion,
    Validation,
}

// ─── Conditional notification tri-state ───────────────────────

/// Per-notifier resolution state on a conditional target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyState {
    NotRun,
    Met,
    NotMet,
}

/// One entry in a target's `success_notify` / `failure_notify` array.
/// The set of entries is fixed at graph build; only `state` mutates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEntry {
    pub notifier: NodeId,
    pub state: NotifyState,
}

// ─── Parallelism policy ───────────────────────────────────────

/// Group scheduling policy: sequential, parallel with the project default
/// window, or parallel with an explicit cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parallelism {
    Sequential,
    Parallel,
    Limit(u32),
}

impl Parallelism {
    pub fn is_parallel(self) -> bool {
        !matches!(self, Parallelism::Sequential)
    }

    /// Admission window width. Sequential groups admit one child at a time.
    pub fn capacity(self) -> u32 {
        match self {
            Parallelism::Sequential => 1,
            Parallelism::Parallel => DEFAULT_PARALLEL_CAPACITY,
            Parallelism::Limit(n) => n.max(1),
        }
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Parallelism::Sequential
    }
}

// ─── Identity keys ────────────────────────────────────────────

/// `name | k=v,k=v` with args in sorted key order. Stable across runs and
/// independent of insertion order (args live in a BTreeMap).
pub fn identity_key(name: &str, args: &BTreeMap<String, String>) -> String {
    if args.is_empty() {
        return name.to_string();
    }
    let kv: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}|{}", name, kv.join(","))
}

/// Identity key plus an optional explicit-instance suffix and a `|dep`
/// marker for dependency-group children (keeps them distinct from ordinary
/// children that happen to share name and args).
pub fn canonical_key(
    name: &str,
    args: &BTreeMap<String, String>,
    instance: Option<&str>,
    dedupe: bool,
) -> String {
    let mut key = identity_key(name, args);
    if let Some(inst) = instance {
        key.push_str("|instance=");
        key.push_str(inst);
    }
    if dedupe {
        key.push_str("|dep");
    }
    key
}

// ─── Build node ───────────────────────────────────────────────

/// A single target in the build graph. Relationships are arena indices;
/// parents and children are two directional edge sets, neither owns the
/// other.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Identity args plus selectively-merged globals.
    pub args: BTreeMap<String, String>,
    /// Shell command template (`command` for tasks, `build_command` for
    /// platforms). Groups have none.
    pub command: Option<String>,
    /// Ordered children. Insertion order is meaningful.
    pub children: Vec<NodeId>,
    /// Position of this node under each of its parents.
    pub child_order_by_parent: BTreeMap<NodeId, ChildOrder>,
    /// Dependencies that are descendants of this node (they run as children
    /// of the dependency group; non-blocking for structural readiness).
    pub internal_dependencies: Vec<NodeId>,
    /// Dependencies outside this node's subtree. These block coordination.
    pub external_dependencies: Vec<NodeId>,
    /// External dependencies satisfied by any terminal status, not just
    /// success (cross-sibling links under a `continue_on_error` parent).
    pub tolerant_dependencies: BTreeSet<NodeId>,
    pub parents: BTreeSet<NodeId>,
    /// Unconditional notification targets (display list; the execution
    /// ordering lives in the target's dependency edges).
    pub notifies: Vec<NodeId>,
    pub notifies_on_success: Vec<NodeId>,
    pub notifies_on_failure: Vec<NodeId>,
    /// Conditional arrays on the target side. Fixed at graph build.
    pub success_notify: Vec<NotifyEntry>,
    pub failure_notify: Vec<NotifyEntry>,
    /// True iff `success_notify` or `failure_notify` is non-empty.
    pub conditional: bool,
    /// Runtime-only blocking sets, symmetric across the pair.
    pub blocked_by: BTreeSet<NodeId>,
    pub blocks: BTreeSet<NodeId>,
    /// Group policy: tolerate failed children for sibling progress.
    pub continue_on_error: bool,
    pub parallel: Parallelism,
    /// True for the auto-generated dependency group (child order 0 under
    /// its parent). Dependency groups never get one of their own.
    pub dep_group: bool,
    /// Input/output paths for the mtime freshness check.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Bypass the mtime check and always execute.
    pub always_run: bool,
    /// Unresolved `${x}` references are tolerated for this node.
    pub args_optional: bool,
    /// Args the command must resolve; missing ones fail graph build.
    pub required_args: Vec<String>,
    /// Platform-only artifact metadata.
    pub artifact_dir: Option<String>,
    pub artifact_patterns: Vec<String>,
    pub canonical_key: String,
    pub identity_key: String,
}

impl BuildNode {
    pub fn new(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        let name = name.into();
        let args = BTreeMap::new();
        let identity = identity_key(&name, &args);
        Self {
            id,
            canonical_key: identity.clone(),
            identity_key: identity,
            name,
            kind,
            args,
            command: None,
            children: Vec::new(),
            child_order_by_parent: BTreeMap::new(),
            internal_dependencies: Vec::new(),
            external_dependencies: Vec::new(),
            tolerant_dependencies: BTreeSet::new(),
            parents: BTreeSet::new(),
            notifies: Vec::new(),
            notifies_on_success: Vec::new(),
            notifies_on_failure: Vec::new(),
            success_notify: Vec::new(),
            failure_notify: Vec::new(),
            conditional: false,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            continue_on_error: false,
            parallel: Parallelism::Sequential,
            dep_group: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            always_run: false,
            args_optional: false,
            required_args: Vec::new(),
            artifact_dir: None,
            artifact_patterns: Vec::new(),
        }
    }

    /// Child order of this node under `parent`.
    pub fn child_order(&self, parent: NodeId) -> Option<ChildOrder> {
        self.child_order_by_parent.get(&parent).copied()
    }

    /// True if this node sits at order 0 under any parent.
    pub fn is_dependency_group(&self) -> bool {
        self.dep_group
    }

    /// Append an entry to `success_notify`, deduplicating by notifier.
    pub fn add_success_entry(&mut self, notifier: NodeId) {
        if !self.success_notify.iter().any(|e| e.notifier == notifier) {
            self.success_notify.push(NotifyEntry {
                notifier,
                state: NotifyState::NotRun,
            });
        }
        self.conditional = true;
    }

    /// Append an entry to `failure_notify`, deduplicating by notifier.
    pub fn add_failure_entry(&mut self, notifier: NodeId) {
        if !self.failure_notify.iter().any(|e| e.notifier == notifier) {
            self.failure_notify.push(NotifyEntry {
                notifier,
                state: NotifyState::NotRun,
            });
        }
        self.conditional = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(Status::Done.is_success());
        assert!(Status::Skipped.is_success());
        assert!(Status::Validate.is_success());
        assert!(Status::DryRun.is_success());
        assert!(!Status::Failed.is_success());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Ready.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(Status::Pending.phase(), Phase::Initialization);
        assert_eq!(Status::Ready.phase(), Phase::ExecutionPreparation);
        assert_eq!(Status::Running.phase(), Phase::Execution);
        assert_eq!(Status::Done.phase(), Phase::Completion);
        assert_eq!(Status::Failed.phase(), Phase::Completion);
        assert_eq!(Status::DryRun.phase(), Phase::Validation);
    }

    #[test]
    fn test_identity_key_sorted_and_stable() {
        let mut args = BTreeMap::new();
        args.insert("zeta".to_string(), "1".to_string());
        args.insert("alpha".to_string(), "2".to_string());
        assert_eq!(identity_key("build", &args), "build|alpha=2,zeta=1");
        assert_eq!(identity_key("build", &BTreeMap::new()), "build");
    }

    #[test]
    fn test_canonical_key_suffixes() {
        let args = BTreeMap::new();
        assert_eq!(canonical_key("t", &args, None, false), "t");
        assert_eq!(canonical_key("t", &args, Some("2"), false), "t|instance=2");
        assert_eq!(canonical_key("t", &args, None, true), "t|dep");
        assert_eq!(
            canonical_key("t", &args, Some("2"), true),
            "t|instance=2|dep"
        );
    }

    #[test]
    fn test_parallelism_capacity() {
        assert_eq!(Parallelism::Sequential.capacity(), 1);
        assert_eq!(Parallelism::Parallel.capacity(), DEFAULT_PARALLEL_CAPACITY);
        assert_eq!(Parallelism::Limit(2).capacity(), 2);
        assert_eq!(Parallelism::Limit(0).capacity(), 1);
    }

    #[test]
    fn test_notify_entry_dedup() {
        let mut node = BuildNode::new(0, "t", NodeKind::Task);
        node.add_success_entry(7);
        node.add_success_entry(7);
        assert_eq!(node.success_notify.len(), 1);
        assert!(node.conditional);
        assert_eq!(node.success_notify[0].state, NotifyState::NotRun);
    }
}
