//! The execution engine: a three-queue coordination loop that drives build
//! nodes from `pending` to a terminal status while honoring structural
//! ordering, dependency gates, admission windows, and conditional
//! notifications.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::expand::expand;
use crate::registry::NodeRegistry;
use crate::runner::{sanitize_node_name, CommandRecord, Runner, SessionLogs};
use crate::status::{BuildSummary, StatusManager};
use crate::types::{NodeId, NotifyState, Status};

// ─── Modes and options ────────────────────────────────────────

/// How Phase 3 treats a dequeued node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Record what would run; nodes finish as `validate`.
    Validate,
    /// Record what would run; nodes finish as `dry-run`.
    DryRun,
    /// Spawn commands for real.
    Real,
}

/// Engine configuration, fixed for the lifetime of a run.
pub struct EngineOptions {
    pub mode: ExecutionMode,
    /// Quiet runs capture output to log files only; otherwise output tees
    /// to the terminal as well.
    pub quiet: bool,
    pub build_root: PathBuf,
    /// Node names forced to fail without executing their command.
    pub simulate_failures: HashSet<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Real,
            quiet: false,
            build_root: PathBuf::from("."),
            simulate_failures: HashSet::new(),
        }
    }
}

/// Hooks invoked on engine events. The default implementation logs through
/// `tracing` and uses the standard log-name sanitizer.
pub trait EngineCallbacks: Send + Sync {
    fn on_transition(&self, node: &str, status: Status) {
        debug!(node, status = %status, "transition");
    }

    fn on_notify(&self, source: &str, target: &str, state: NotifyState) {
        debug!(source, target, state = ?state, "notification resolved");
    }

    fn sanitize(&self, name: &str) -> String {
        sanitize_node_name(name)
    }
}

/// Default callback set.
pub struct DefaultCallbacks;

impl EngineCallbacks for DefaultCallbacks {}

// ─── Run report ───────────────────────────────────────────────

/// Everything a caller needs to render results and pick an exit code.
#[derive(Debug)]
pub struct RunReport {
    pub build_id: Uuid,
    pub summary: BuildSummary,
    /// Nodes that could not make progress when the loop gave up.
    pub stalled: Vec<String>,
    /// Conditional targets whose notifiers all resolved without meeting
    /// the condition; they intentionally never ran.
    pub unmet: Vec<String>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.summary.failed.is_empty() && self.stalled.is_empty()
    }
}

/// Resolution of a conditional node's notification arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CondState {
    /// At least one notifier has not reached a terminal status.
    Unresolved,
    /// All resolved, at least one condition met.
    Met,
    /// All resolved, nothing met: the node will never run.
    Unmet,
}

// ─── Engine ───────────────────────────────────────────────────

/// Owns the three scheduling collections and drives the phase loop.
///
/// `pending` holds nodes awaiting coordination; `coordinated` holds nodes
/// whose parents have admitted them; `ready` is the execution queue.
pub struct Engine {
    registry: NodeRegistry,
    status: StatusManager,
    runner: Arc<dyn Runner>,
    callbacks: Arc<dyn EngineCallbacks>,
    options: EngineOptions,
    logs: SessionLogs,
    pending: Vec<NodeId>,
    coordinated: BTreeSet<NodeId>,
    ready: VecDeque<NodeId>,
    /// Conditional targets retired with their condition unmet.
    unmet: BTreeSet<NodeId>,
}

impl Engine {
    pub fn new(registry: NodeRegistry, runner: Arc<dyn Runner>, options: EngineOptions) -> Self {
        let logs = SessionLogs::new(&options.build_root);
        Self {
            registry,
            status: StatusManager::new(),
            runner,
            callbacks: Arc::new(DefaultCallbacks),
            options,
            logs,
            pending: Vec::new(),
            coordinated: BTreeSet::new(),
            ready: VecDeque::new(),
            unmet: BTreeSet::new(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn EngineCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Switch modes between invocations (pre-flight validate, then real).
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.options.mode = mode;
    }

    pub fn status_manager(&self) -> &StatusManager {
        &self.status
    }

    /// Drive the graph to quiescence starting from the named root.
    pub async fn run(
        &mut self,
        root_name: &str,
        root_args: &BTreeMap<String, String>,
    ) -> Result<RunReport> {
        let build_id = Uuid::now_v7();
        info!(%build_id, root = root_name, "starting build");

        self.initialize(root_name, root_args)?;

        let max_iterations = 2 * self.registry.len().max(1);
        let mut no_progress = 0usize;

        for iteration in 0..max_iterations {
            if self.pending.is_empty() && self.ready.is_empty() {
                break;
            }

            let mut progress = 0usize;
            self.coordinate(&mut progress);
            self.prepare(&mut progress);
            self.execute_ready(&mut progress).await?;

            if progress == 0 {
                no_progress += 1;
                if no_progress >= 3 {
                    warn!(iteration, "no progress in three consecutive iterations");
                    break;
                }
            } else {
                no_progress = 0;
            }
        }

        let stalled: Vec<String> = self
            .pending
            .iter()
            .map(|&id| self.registry.get(id).name.clone())
            .collect();
        if !stalled.is_empty() {
            let detail: Vec<String> = self
                .pending
                .iter()
                .map(|&id| {
                    let node = self.registry.get(id);
                    let blockers: Vec<&str> = node
                        .blocked_by
                        .iter()
                        .map(|&b| self.registry.get(b).name.as_str())
                        .collect();
                    format!("{} (blocked by: {})", node.name, blockers.join(", "))
                })
                .collect();
            error!(stalled = ?detail, "build did not reach quiescence");
        }

        let unmet = self
            .unmet
            .iter()
            .map(|&id| self.registry.get(id).name.clone())
            .collect();

        let summary = self.status.build_summary();
        Ok(RunReport {
            build_id,
            summary,
            stalled,
            unmet,
        })
    }

    // ── Initialization ──

    fn initialize(&mut self, root_name: &str, root_args: &BTreeMap<String, String>) -> Result<()> {
        self.pending.clear();
        self.coordinated.clear();
        self.ready.clear();
        self.unmet.clear();
        if self.status.invocation() > 1 || !self.status.execution_order().is_empty() {
            self.status.begin_invocation();
        }

        let ids: Vec<NodeId> = self.registry.all_ids().collect();
        for id in ids {
            let (key, name) = {
                let node = self.registry.get(id);
                (node.canonical_key.clone(), node.name.clone())
            };
            self.status.set_status(&key, &name, Status::Pending);
            self.pending.push(id);
        }

        let root = self
            .registry
            .get_by_name_and_args(root_name, root_args)
            .or_else(|| self.registry.find_by_name(root_name))
            .ok_or_else(|| anyhow!("root target not found: {root_name}"))?;

        if self.external_deps_satisfied(root) {
            self.coordinated.insert(root);
            if let Some(dep_group) = self.dep_group_child(root) {
                self.coordinated.insert(dep_group);
            }
        }
        Ok(())
    }

    // ── Phase 1: coordination ──

    /// Admit pending nodes whose external dependencies are satisfied and
    /// whose parents' ordering windows allow them.
    fn coordinate(&mut self, progress: &mut usize) {
        let candidates: Vec<NodeId> = self.pending.clone();
        for id in candidates {
            if self.coordinated.contains(&id) {
                continue;
            }
            if self.node_status(id) != Status::Pending {
                continue;
            }
            if !self.external_deps_satisfied(id) {
                continue;
            }
            if !self.should_coordinate_next(id) {
                continue;
            }
            self.coordinated.insert(id);
            *progress += 1;

            // A freshly admitted node brings its dependency group along.
            if let Some(dep_group) = self.dep_group_child(id) {
                if self.node_status(dep_group) == Status::Pending
                    && self.coordinated.insert(dep_group)
                {
                    *progress += 1;
                }
            }
        }
    }

    /// External dependencies must be terminal; tolerant edges accept any
    /// terminal status, the rest require success.
    fn external_deps_satisfied(&self, id: NodeId) -> bool {
        let node = self.registry.get(id);
        node.external_dependencies.iter().all(|&dep| {
            let status = self.node_status(dep);
            if node.tolerant_dependencies.contains(&dep) {
                status.is_terminal()
            } else {
                status.is_success()
            }
        })
    }

    /// The ordering-window check: may any parent admit this node now?
    fn should_coordinate_next(&self, id: NodeId) -> bool {
        let node = self.registry.get(id);
        if node.parents.is_empty() {
            return true;
        }

        for &parent_id in &node.parents {
            if !self.coordinated.contains(&parent_id) {
                continue;
            }
            let Some(order) = node.child_order(parent_id) else {
                continue;
            };
            // Dependency groups coordinate as soon as their parent has.
            if order == 0 {
                return true;
            }

            let parent = self.registry.get(parent_id);
            if !parent.dep_group {
                let Some(gate) = self.dep_group_child(parent_id) else {
                    continue;
                };
                if !self.node_status(gate).is_success() {
                    continue;
                }
            }

            let completed = self.completed_children(parent_id);
            let capacity = parent.parallel.capacity();
            let permitted = if parent.parallel.is_parallel() {
                order <= completed + capacity
            } else {
                order == completed + 1
            };
            if permitted {
                return true;
            }
        }
        false
    }

    /// Regular children of `parent` counted as consumed window positions:
    /// successful terminals always; failed or condition-unmet children only
    /// when the parent tolerates errors.
    fn completed_children(&self, parent_id: NodeId) -> u32 {
        let parent = self.registry.get(parent_id);
        parent
            .children
            .iter()
            .filter(|&&c| self.registry.get(c).child_order(parent_id) != Some(0))
            .filter(|&&c| {
                let status = self.node_status(c);
                status.is_success()
                    || (parent.continue_on_error
                        && (status.is_terminal() || self.unmet.contains(&c)))
            })
            .count() as u32
    }

    // ── Phase 2: execution preparation ──

    /// Move coordinated nodes whose gates have all cleared into the ready
    /// queue; retire conditional nodes that can never run.
    fn prepare(&mut self, progress: &mut usize) {
        let candidates: Vec<NodeId> = self.pending.clone();
        for id in candidates {
            if !self.coordinated.contains(&id) {
                continue;
            }
            if self.node_status(id) != Status::Pending {
                continue;
            }

            let node = self.registry.get(id);
            let is_ready;
            if node.conditional {
                match self.conditional_state(id) {
                    CondState::Unresolved => continue,
                    CondState::Unmet => {
                        debug!(node = %node.name, "condition unmet; target will not run");
                        self.pending.retain(|&p| p != id);
                        self.coordinated.remove(&id);
                        self.unmet.insert(id);
                        *progress += 1;
                        continue;
                    }
                    CondState::Met => {
                        // The met condition gates execution but never
                        // outruns structure: the parent's dependency gate
                        // and the node's own children still apply.
                        is_ready = self.parent_gate_open(id) && self.children_complete(id);
                    }
                }
            } else {
                is_ready = self.parent_gate_open(id) && self.children_complete(id);
            }

            if is_ready {
                self.pending.retain(|&p| p != id);
                self.ready.push_back(id);
                self.transition(id, Status::Ready);
                *progress += 1;
            }
        }
    }

    /// A node may execute when it has no parents, sits at order 0, or some
    /// coordinated parent's dependency group has succeeded.
    fn parent_gate_open(&self, id: NodeId) -> bool {
        let node = self.registry.get(id);
        if node.parents.is_empty() {
            return true;
        }
        for &parent_id in &node.parents {
            if !self.coordinated.contains(&parent_id) {
                continue;
            }
            if node.child_order(parent_id) == Some(0) {
                return true;
            }
            if let Some(gate) = self.dep_group_child(parent_id) {
                if self.node_status(gate).is_success() {
                    return true;
                }
            } else {
                // Parent without a dependency group (itself a dependency
                // group): nothing further to wait for.
                return true;
            }
        }
        false
    }

    /// All children terminal-successful. Groups tolerating errors accept
    /// failed or retired children; dependency groups never do, since their
    /// completion is the gate that declares dependencies satisfied.
    fn children_complete(&self, id: NodeId) -> bool {
        let node = self.registry.get(id);
        let tolerant = node.continue_on_error && !node.dep_group;
        node.children.iter().all(|&c| {
            let status = self.node_status(c);
            status.is_success()
                || (tolerant && (status.is_terminal() || self.unmet.contains(&c)))
        })
    }

    fn conditional_state(&self, id: NodeId) -> CondState {
        let node = self.registry.get(id);
        let entries = node.success_notify.iter().chain(node.failure_notify.iter());
        let mut met = false;
        for entry in entries {
            match entry.state {
                NotifyState::NotRun => return CondState::Unresolved,
                NotifyState::Met => met = true,
                NotifyState::NotMet => {}
            }
        }
        if met {
            CondState::Met
        } else {
            CondState::Unmet
        }
    }

    // ── Phase 3: execution ──

    /// Drain the ready queue, executing each node per the engine mode.
    async fn execute_ready(&mut self, progress: &mut usize) -> Result<()> {
        while let Some(id) = self.ready.pop_front() {
            let status = self.node_status(id);
            if status.is_success() {
                // A finished node in the execution queue means the queue
                // bookkeeping is broken. Dump state and bail out.
                let node = self.registry.get(id);
                let key = node.canonical_key.clone();
                return Err(anyhow!(EngineError::QueueInvariant {
                    node: node.name.clone(),
                    status: status.to_string(),
                    pending_len: self.pending.len(),
                    coordinated_len: self.coordinated.len(),
                    ready_len: self.ready.len() + 1,
                    history: self.status.history_lines(&key),
                }));
            }

            let outcome = self.execute_node(id).await?;
            self.transition(id, outcome);
            if outcome == Status::Failed {
                self.coordinated.remove(&id);
            }
            *progress += 1;
        }
        Ok(())
    }

    /// Run one node per the engine mode and report its terminal status.
    async fn execute_node(&mut self, id: NodeId) -> Result<Status> {
        let (name, key, command, args, always_run, inputs, outputs) = {
            let node = self.registry.get(id);
            (
                node.name.clone(),
                node.canonical_key.clone(),
                node.command.clone(),
                node.args.clone(),
                node.always_run,
                node.inputs.clone(),
                node.outputs.clone(),
            )
        };

        if self.options.simulate_failures.contains(&name) {
            warn!(node = %name, "simulated failure");
            self.record_command(&name, command.as_deref().unwrap_or(""), "", "failed (simulated)");
            return Ok(Status::Failed);
        }

        let expanded = command.as_deref().map(|c| expand(c, &args));

        match self.options.mode {
            ExecutionMode::Validate => {
                info!(node = %name, command = expanded.as_deref().unwrap_or(""), "validate: would execute");
                self.record_command(&name, expanded.as_deref().unwrap_or(""), "", "validate");
                Ok(Status::Validate)
            }
            ExecutionMode::DryRun => {
                info!(node = %name, command = expanded.as_deref().unwrap_or(""), "dry-run: would execute");
                self.record_command(&name, expanded.as_deref().unwrap_or(""), "", "dry-run");
                Ok(Status::DryRun)
            }
            ExecutionMode::Real => {
                let Some(cmd) = expanded.filter(|c| !c.trim().is_empty()) else {
                    return Ok(Status::Done);
                };

                if !always_run && outputs_fresh(&inputs, &outputs) {
                    info!(node = %name, "outputs up to date; skipping");
                    return Ok(Status::Skipped);
                }

                self.transition(id, Status::Running);

                let sanitized = self.callbacks.sanitize(&name);
                let log_path = self.logs.node_log_path(&sanitized)?;
                let started = Instant::now();
                let exit = self
                    .runner
                    .run(&cmd, &args, &log_path, !self.options.quiet)
                    .await?;
                let elapsed = started.elapsed().as_millis() as u64;
                self.status.set_duration_ms(&key, elapsed);

                let outcome = if exit == 0 {
                    Status::Done
                } else {
                    error!(node = %name, exit, "command failed");
                    Status::Failed
                };
                self.record_command(
                    &name,
                    &cmd,
                    &log_path.display().to_string(),
                    &format!("{outcome} (exit {exit})"),
                );
                Ok(outcome)
            }
        }
    }

    fn record_command(&mut self, node: &str, command: &str, log_file: &str, result: &str) {
        let record = CommandRecord {
            node: node.to_string(),
            command: command.to_string(),
            log_file: log_file.to_string(),
            result: result.to_string(),
        };
        if let Err(e) = self.logs.append_command_record(&record) {
            warn!(error = %e, "failed to append command record");
        }
    }

    // ── Transitions ──

    /// Write the status, clear outgoing blocks on terminals, and resolve
    /// conditional notification entries on targets.
    fn transition(&mut self, id: NodeId, new_status: Status) {
        let (key, name) = {
            let node = self.registry.get(id);
            (node.canonical_key.clone(), node.name.clone())
        };
        self.status.set_status(&key, &name, new_status);
        self.callbacks.on_transition(&name, new_status);

        if !new_status.is_terminal() {
            return;
        }

        let blocked: Vec<NodeId> = self.registry.get(id).blocks.iter().copied().collect();
        for b in blocked {
            self.registry.get_mut(b).blocked_by.remove(&id);
        }

        let on_success: Vec<NodeId> = self.registry.get(id).notifies_on_success.clone();
        for target in on_success {
            let state = if new_status.is_success() {
                NotifyState::Met
            } else {
                NotifyState::NotMet
            };
            self.resolve_entry(id, target, state, true);
        }

        let on_failure: Vec<NodeId> = self.registry.get(id).notifies_on_failure.clone();
        for target in on_failure {
            let state = if new_status == Status::Failed {
                NotifyState::Met
            } else {
                NotifyState::NotMet
            };
            self.resolve_entry(id, target, state, false);
        }
    }

    fn resolve_entry(&mut self, source: NodeId, target: NodeId, state: NotifyState, success: bool) {
        let source_name = self.registry.get(source).name.clone();
        let target_node = self.registry.get_mut(target);
        let entries = if success {
            &mut target_node.success_notify
        } else {
            &mut target_node.failure_notify
        };
        if let Some(entry) = entries.iter_mut().find(|e| e.notifier == source) {
            entry.state = state;
            let target_name = target_node.name.clone();
            self.callbacks.on_notify(&source_name, &target_name, state);
        }
    }

    // ── Helpers ──

    fn node_status(&self, id: NodeId) -> Status {
        self.status.get_status(&self.registry.get(id).canonical_key)
    }

    fn dep_group_child(&self, id: NodeId) -> Option<NodeId> {
        self.registry
            .get(id)
            .children
            .iter()
            .copied()
            .find(|&c| self.registry.get(c).child_order(id) == Some(0))
    }
}

/// True when every output exists and no input is newer than the oldest
/// output. Missing inputs force a run.
fn outputs_fresh(inputs: &[String], outputs: &[String]) -> bool {
    if inputs.is_empty() || outputs.is_empty() {
        return false;
    }
    let mtime = |path: &String| std::fs::metadata(path).and_then(|m| m.modified()).ok();

    let mut oldest_output = None;
    for out in outputs {
        match mtime(out) {
            None => return false,
            Some(t) => {
                oldest_output = Some(match oldest_output {
                    None => t,
                    Some(prev) if t < prev => t,
                    Some(prev) => prev,
                });
            }
        }
    }
    let Some(oldest) = oldest_output else {
        return false;
    };

    for input in inputs {
        match mtime(input) {
            None => return false,
            Some(t) if t > oldest => return false,
            Some(_) => {}
        }
    }
    true
}
