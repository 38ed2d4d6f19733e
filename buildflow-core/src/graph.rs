//! Graph construction: worklist-driven expansion of config entries into
//! registered build nodes with wired relationships.

use anyhow::{anyhow, Result};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::warn;

use crate::args::{merge_args, read_args};
use crate::config::{BuildConfig, NotifyRef, TargetRef};
use crate::error::GraphError;
use crate::expand::referenced_vars;
use crate::registry::{EdgeKind, NodeRegistry};
use crate::types::{
    canonical_key, BuildNode, ChildOrder, NodeId, NodeKind, Parallelism, DEP_GROUP_SUFFIX,
};

/// Relationship kinds processed during expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relationship {
    /// `dst` must complete before `src` is structurally ready.
    Dependency,
    /// `dst` runs after `src` reaches any terminal status.
    Notify,
    /// `dst` runs only if `src` succeeds (conditional array on `dst`).
    NotifyOnSuccess,
    /// `dst` runs only if `src` fails.
    NotifyOnFailure,
    /// `dst` is an ordered child of `src`.
    Child,
}

/// Call-site overrides attached to a node by the `targets` entry that
/// created it. Merged with the node's config-entry lists at expansion.
#[derive(Debug, Default, Clone)]
struct CallExtras {
    notifies: Vec<NotifyRef>,
    notifies_on_success: Vec<NotifyRef>,
    notifies_on_failure: Vec<NotifyRef>,
    requires_execution_of: Vec<String>,
}

/// Worklist-driven builder. Each node's relationships are attached exactly
/// once; every edge addition runs a cycle check first.
pub struct GraphBuilder<'a> {
    config: &'a BuildConfig,
    globals: BTreeMap<String, Value>,
    registry: &'a mut NodeRegistry,
    worklist: VecDeque<NodeId>,
    expanded: HashSet<NodeId>,
    call_extras: HashMap<NodeId, CallExtras>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a BuildConfig, registry: &'a mut NodeRegistry) -> Self {
        let globals = config.globals_pool();
        Self {
            config,
            globals,
            registry,
            worklist: VecDeque::new(),
            expanded: HashSet::new(),
            call_extras: HashMap::new(),
        }
    }

    /// Build the graph rooted at `root_name` and return the root id.
    pub fn build(&mut self, root_name: &str, root_args: Option<&Value>) -> Result<NodeId> {
        let root = self.get_or_create(
            root_name,
            root_args,
            None,
            &BTreeMap::new(),
            false,
        )?;

        while let Some(id) = self.worklist.pop_front() {
            if self.expanded.insert(id) {
                self.expand(id)?;
            }
        }

        self.ensure_sibling_orderings()?;
        Ok(root)
    }

    // ── Node materialization ──

    /// Resolve or create the node for a target reference.
    ///
    /// With `dedupe` (dependency and notification targets) an existing node
    /// with matching name and args is reused, producing fan-in; otherwise a
    /// fresh node is created, disambiguated by an instance suffix when the
    /// canonical key is already taken.
    fn get_or_create(
        &mut self,
        name: &str,
        call_args: Option<&Value>,
        instance: Option<&str>,
        parent_args: &BTreeMap<String, String>,
        dedupe: bool,
    ) -> Result<NodeId> {
        let (kind, command, entry_args) = self.resolve_entry(name)?;

        // Call-site args overlay the entry's own args.
        let mut local = read_args(&entry_args);
        if let Some(v) = call_args {
            for (k, val) in read_args(v) {
                local.insert(k, val);
            }
        }
        let merged = merge_args(command.as_deref(), &local, parent_args, &self.globals);

        if dedupe {
            if let Some(existing) = self.registry.get_by_name_and_args(name, &merged) {
                return Ok(existing);
            }
        }

        let mut key = canonical_key(name, &merged, instance, dedupe);
        if !dedupe && instance.is_none() && self.registry.get_by_key(&key).is_some() {
            // Regular children are never deduplicated: the same task may
            // appear under several parents with distinct execution
            // contexts. Disambiguate implicitly.
            let identity = crate::types::identity_key(name, &merged);
            let n = self.registry.ids_for_identity(&identity).len();
            key = canonical_key(name, &merged, Some(&n.to_string()), false);
        }
        if let Some(existing) = self.registry.get_by_key(&key) {
            return Ok(existing);
        }

        let mut node = BuildNode::new(0, name, kind);
        node.args = merged;
        node.command = command;
        node.identity_key = crate::types::identity_key(name, &node.args);
        node.canonical_key = key;
        self.populate_from_entry(&mut node)?;

        self.check_command_args(&node)?;

        let id = self
            .registry
            .add(node)
            .map_err(|e| anyhow!(e))?;
        self.worklist.push_back(id);
        Ok(id)
    }

    /// Kind, command template, and entry-level args for a declared target.
    fn resolve_entry(&self, name: &str) -> Result<(NodeKind, Option<String>, Value)> {
        if let Some(task) = self.config.task(name) {
            return Ok((
                NodeKind::Task,
                task.command.clone(),
                task.args.clone().unwrap_or(Value::Null),
            ));
        }
        if let Some(platform) = self.config.platform(name) {
            return Ok((NodeKind::Platform, platform.build_command.clone(), Value::Null));
        }
        if self.config.group(name).is_some() {
            return Ok((NodeKind::Group, None, Value::Null));
        }
        Err(anyhow!(GraphError::UnknownTarget(name.to_string())))
    }

    /// Copy the non-structural config fields onto a freshly created node.
    fn populate_from_entry(&self, node: &mut BuildNode) -> Result<()> {
        match node.kind {
            NodeKind::Task => {
                let task = self
                    .config
                    .task(&node.name)
                    .ok_or_else(|| anyhow!(GraphError::UnknownTarget(node.name.clone())))?;
                node.args_optional = task.args_optional;
                node.required_args = task.required_args.clone();
                node.inputs = task.inputs.clone();
                node.outputs = task.outputs.clone();
                node.always_run = task.always_run;
            }
            NodeKind::Platform => {
                let platform = self
                    .config
                    .platform(&node.name)
                    .ok_or_else(|| anyhow!(GraphError::UnknownTarget(node.name.clone())))?;
                node.artifact_dir = platform.artifact_dir.clone();
                node.artifact_patterns = platform.artifact_patterns.clone();
            }
            NodeKind::Group => {
                let group = self
                    .config
                    .group(&node.name)
                    .ok_or_else(|| anyhow!(GraphError::UnknownTarget(node.name.clone())))?;
                node.continue_on_error = group
                    .continue_on_error
                    .unwrap_or(self.config.continue_on_error);
                node.parallel = group
                    .parallel
                    .map(|p| p.to_parallelism())
                    .unwrap_or(Parallelism::Sequential);
            }
        }
        Ok(())
    }

    /// Warn on unresolved `${x}` references; fail when `x` is required.
    fn check_command_args(&self, node: &BuildNode) -> Result<()> {
        let Some(cmd) = node.command.as_deref() else {
            return Ok(());
        };
        for reference in referenced_vars(cmd) {
            let flat = reference.replace('.', "_");
            if node.args.contains_key(&reference) || node.args.contains_key(&flat) {
                continue;
            }
            if node.required_args.iter().any(|r| *r == reference || *r == flat) {
                return Err(anyhow!(GraphError::MissingRequiredArg {
                    target: node.name.clone(),
                    arg: reference,
                }));
            }
            if !node.args_optional {
                warn!(
                    target = %node.name,
                    argument = %reference,
                    "command references an unresolved argument"
                );
            }
        }
        Ok(())
    }

    // ── Expansion ──

    /// Attach a node's relationships: dependency group, regular children,
    /// and notifications. Runs exactly once per node.
    fn expand(&mut self, id: NodeId) -> Result<()> {
        let extras = self.call_extras.remove(&id).unwrap_or_default();

        if !self.registry.get(id).dep_group {
            self.attach_dependency_group(id, &extras.requires_execution_of)?;
        }

        if self.registry.get(id).kind == NodeKind::Group && !self.registry.get(id).dep_group {
            self.attach_children(id)?;
        }

        self.attach_notifications(id, &extras)?;
        Ok(())
    }

    /// Synthesize the order-0 dependency group child and populate it with
    /// the node's declared dependencies.
    fn attach_dependency_group(&mut self, id: NodeId, extra_requires: &[String]) -> Result<()> {
        let (parent_name, parent_key, parent_args) = {
            let node = self.registry.get(id);
            (node.name.clone(), node.canonical_key.clone(), node.args.clone())
        };

        let mut dep_group = BuildNode::new(0, format!("{parent_name}{DEP_GROUP_SUFFIX}"), NodeKind::Group);
        dep_group.dep_group = true;
        dep_group.parallel = Parallelism::Parallel;
        dep_group.continue_on_error = true;
        dep_group.args = parent_args.clone();
        dep_group.identity_key = crate::types::identity_key(&dep_group.name, &dep_group.args);
        dep_group.canonical_key = format!("{parent_key}{DEP_GROUP_SUFFIX}");
        let group_id = self.registry.add(dep_group).map_err(|e| anyhow!(e))?;

        self.attach_child(id, group_id, 0)?;
        // Completion surfaces to the parent through the order-0 gate; the
        // display list records the intent.
        self.registry.get_mut(group_id).notifies_on_success.push(id);

        let mut order: ChildOrder = 1;
        let declared = self.declared_dependencies(id);
        for target in &declared {
            let (name, args) = match target {
                TargetRef::Name(n) => (n.clone(), None),
                TargetRef::Spec(s) => (s.name.clone(), s.args.clone()),
            };
            let dep = self.get_or_create(&name, args.as_ref(), None, &parent_args, true)?;
            if self.registry.get(dep).child_order(group_id).is_none() {
                self.attach_child(group_id, dep, order)?;
                order += 1;
            }
            self.process_relationship(id, dep, Relationship::Dependency)?;
        }

        for name in extra_requires
            .iter()
            .chain(self.required_execution_names(id).iter())
        {
            let dep = self.get_or_create(name, None, None, &parent_args, true)?;
            self.registry.get_mut(dep).always_run = true;
            if self.registry.get(dep).child_order(group_id).is_none() {
                self.attach_child(group_id, dep, order)?;
                order += 1;
            }
            self.process_relationship(id, dep, Relationship::Dependency)?;
        }

        Ok(())
    }

    fn declared_dependencies(&self, id: NodeId) -> Vec<TargetRef> {
        let node = self.registry.get(id);
        let list = match node.kind {
            NodeKind::Task => self.config.task(&node.name).and_then(|t| t.dependencies.clone()),
            NodeKind::Platform => self
                .config
                .platform(&node.name)
                .and_then(|p| p.dependencies.clone()),
            NodeKind::Group => self.config.group(&node.name).and_then(|g| g.dependencies.clone()),
        };
        list.unwrap_or_default()
    }

    fn required_execution_names(&self, id: NodeId) -> Vec<String> {
        let node = self.registry.get(id);
        if node.kind == NodeKind::Task {
            self.config
                .task(&node.name)
                .and_then(|t| t.requires_execution_of.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    /// Wire a group's declared targets as ordered children, with
    /// cross-sibling ordering links under sequential parents.
    fn attach_children(&mut self, id: NodeId) -> Result<()> {
        let (group_cfg, parent_args, sequential, tolerant) = {
            let node = self.registry.get(id);
            let cfg = self
                .config
                .group(&node.name)
                .ok_or_else(|| anyhow!(GraphError::UnknownTarget(node.name.clone())))?
                .clone();
            (
                cfg,
                node.args.clone(),
                !node.parallel.is_parallel(),
                node.continue_on_error,
            )
        };

        let mut previous: Option<NodeId> = None;
        for (i, target) in group_cfg.targets.iter().enumerate() {
            let (name, args, instance) = match target {
                TargetRef::Name(n) => (n.as_str(), None, None),
                TargetRef::Spec(s) => (s.name.as_str(), s.args.as_ref(), s.instance.as_deref()),
            };
            let child = self.get_or_create(name, args, instance, &parent_args, false)?;
            if self.registry.get(child).child_order(id).is_some() {
                // The same resolved node listed twice under one parent
                // keeps its first position.
                previous = Some(child);
                continue;
            }
            self.attach_child(id, child, (i + 1) as ChildOrder)?;
            self.process_relationship(id, child, Relationship::Child)?;

            if let TargetRef::Spec(spec) = target {
                let extras = self.call_extras.entry(child).or_default();
                extras
                    .notifies
                    .extend(spec.notifies.clone().unwrap_or_default());
                extras
                    .notifies_on_success
                    .extend(spec.notify_on_success.clone().unwrap_or_default());
                extras
                    .notifies_on_failure
                    .extend(spec.notify_on_failure.clone().unwrap_or_default());
                extras
                    .requires_execution_of
                    .extend(spec.requires_execution_of.clone().unwrap_or_default());
            }

            if sequential {
                if let Some(prev) = previous {
                    let kind = if tolerant {
                        Relationship::Notify
                    } else {
                        Relationship::NotifyOnSuccess
                    };
                    self.process_relationship(prev, child, kind)?;
                }
            }
            previous = Some(child);
        }
        Ok(())
    }

    /// Resolve and register the node's notification targets.
    fn attach_notifications(&mut self, id: NodeId, extras: &CallExtras) -> Result<()> {
        let (source_args, notifies, on_success, on_failure) = {
            let node = self.registry.get(id);
            let (n, s, f) = match node.kind {
                NodeKind::Task => {
                    let t = self.config.task(&node.name);
                    (
                        t.and_then(|t| t.notifies.clone()),
                        t.and_then(|t| t.notifies_on_success.clone()),
                        t.and_then(|t| t.notifies_on_failure.clone()),
                    )
                }
                NodeKind::Platform => {
                    let p = self.config.platform(&node.name);
                    (
                        p.and_then(|p| p.notifies.clone()),
                        p.and_then(|p| p.notifies_on_success.clone()),
                        p.and_then(|p| p.notifies_on_failure.clone()),
                    )
                }
                NodeKind::Group => {
                    let g = self.config.group(&node.name);
                    (
                        g.and_then(|g| g.notifies.clone()),
                        g.and_then(|g| g.notifies_on_success.clone()),
                        g.and_then(|g| g.notifies_on_failure.clone()),
                    )
                }
            };
            (node.args.clone(), n, s, f)
        };

        let all = |config_list: Option<Vec<NotifyRef>>, extra: &[NotifyRef]| -> Vec<NotifyRef> {
            let mut v = config_list.unwrap_or_default();
            v.extend(extra.iter().cloned());
            v
        };

        for r in all(notifies, &extras.notifies) {
            let target = self.resolve_notify_target(&r, &source_args)?;
            self.process_relationship(id, target, Relationship::Notify)?;
        }
        for r in all(on_success, &extras.notifies_on_success) {
            let target = self.resolve_notify_target(&r, &source_args)?;
            self.process_relationship(id, target, Relationship::NotifyOnSuccess)?;
        }
        for r in all(on_failure, &extras.notifies_on_failure) {
            let target = self.resolve_notify_target(&r, &source_args)?;
            self.process_relationship(id, target, Relationship::NotifyOnFailure)?;
        }
        Ok(())
    }

    fn resolve_notify_target(
        &mut self,
        r: &NotifyRef,
        source_args: &BTreeMap<String, String>,
    ) -> Result<NodeId> {
        let target = self.get_or_create(r.name(), r.args(), None, &BTreeMap::new(), true)?;
        if r.args_from_self() {
            let node = self.registry.get_mut(target);
            for (k, v) in source_args {
                node.args.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(target)
    }

    // ── Relationship processing ──

    /// Attach one directed relationship, classifying dependencies and
    /// maintaining the blocking bookkeeping. Every structural edge runs a
    /// cycle check.
    fn process_relationship(&mut self, src: NodeId, dst: NodeId, kind: Relationship) -> Result<()> {
        match kind {
            Relationship::Dependency => {
                if self.is_descendant(src, dst) {
                    self.registry.get_mut(src).internal_dependencies.push(dst);
                } else {
                    self.registry
                        .add_edge(src, dst, EdgeKind::Dependency)
                        .map_err(|e| anyhow!(e))?;
                    self.registry.get_mut(src).external_dependencies.push(dst);
                }
                self.registry.get_mut(src).blocked_by.insert(dst);
                self.registry.get_mut(dst).blocks.insert(src);
            }
            Relationship::Notify => {
                // The target waits for the source to finish, in any state.
                if self.is_descendant(dst, src) {
                    self.registry.get_mut(dst).internal_dependencies.push(src);
                } else {
                    self.registry
                        .add_edge(dst, src, EdgeKind::Ordering)
                        .map_err(|e| anyhow!(e))?;
                    self.registry.get_mut(dst).external_dependencies.push(src);
                    self.registry.get_mut(dst).tolerant_dependencies.insert(src);
                }
                let inherited: Vec<NodeId> =
                    self.registry.get(src).blocked_by.iter().copied().collect();
                {
                    let target = self.registry.get_mut(dst);
                    target.blocked_by.insert(src);
                    for b in inherited {
                        target.blocked_by.insert(b);
                    }
                }
                self.registry.get_mut(src).blocks.insert(dst);
                self.registry.get_mut(src).notifies.push(dst);
            }
            Relationship::NotifyOnSuccess => {
                self.registry
                    .add_edge(dst, src, EdgeKind::Ordering)
                    .map_err(|e| anyhow!(e))?;
                if !self.registry.get(src).notifies_on_success.contains(&dst) {
                    self.registry.get_mut(src).notifies_on_success.push(dst);
                }
                self.registry.get_mut(dst).add_success_entry(src);
            }
            Relationship::NotifyOnFailure => {
                self.registry
                    .add_edge(dst, src, EdgeKind::Ordering)
                    .map_err(|e| anyhow!(e))?;
                if !self.registry.get(src).notifies_on_failure.contains(&dst) {
                    self.registry.get_mut(src).notifies_on_failure.push(dst);
                }
                self.registry.get_mut(dst).add_failure_entry(src);
            }
            Relationship::Child => {
                // Containment itself is wired by attach_child; this records
                // the completion expectation.
                self.registry.get_mut(src).blocked_by.insert(dst);
                self.registry.get_mut(dst).blocks.insert(src);
            }
        }
        Ok(())
    }

    /// Wire `child` under `parent` at the given order.
    fn attach_child(&mut self, parent: NodeId, child: NodeId, order: ChildOrder) -> Result<()> {
        self.registry
            .add_edge(parent, child, EdgeKind::Child)
            .map_err(|e| anyhow!(e))?;
        self.registry.get_mut(parent).children.push(child);
        {
            let c = self.registry.get_mut(child);
            c.parents.insert(parent);
            c.child_order_by_parent.insert(parent, order);
        }
        Ok(())
    }

    /// True when `maybe_descendant` is reachable from `ancestor` through
    /// containment edges.
    fn is_descendant(&self, ancestor: NodeId, maybe_descendant: NodeId) -> bool {
        let mut stack: Vec<NodeId> = self.registry.get(ancestor).children.clone();
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == maybe_descendant {
                return true;
            }
            if visited.insert(id) {
                stack.extend(self.registry.get(id).children.iter().copied());
            }
        }
        false
    }

    /// Post-traversal confirmation pass: every consecutive pair of regular
    /// children under a sequential parent must carry an ordering link.
    /// Links are added idempotently, so repairing is safe.
    fn ensure_sibling_orderings(&mut self) -> Result<()> {
        let group_ids: Vec<NodeId> = self
            .registry
            .all_nodes()
            .filter(|n| n.kind == NodeKind::Group && !n.parallel.is_parallel())
            .map(|n| n.id)
            .collect();

        for id in group_ids {
            let (children, tolerant) = {
                let node = self.registry.get(id);
                let regular: Vec<NodeId> = node
                    .children
                    .iter()
                    .copied()
                    .filter(|c| self.registry.get(*c).child_order(id) != Some(0))
                    .collect();
                (regular, node.continue_on_error)
            };
            for pair in children.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                let present = if tolerant {
                    self.registry.get(next).tolerant_dependencies.contains(&prev)
                } else {
                    self.registry
                        .get(next)
                        .success_notify
                        .iter()
                        .any(|e| e.notifier == prev)
                };
                if !present {
                    let kind = if tolerant {
                        Relationship::Notify
                    } else {
                        Relationship::NotifyOnSuccess
                    };
                    self.process_relationship(prev, next, kind)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config_yaml;

    fn build(yaml: &str, root: &str) -> (NodeRegistry, NodeId) {
        let config = parse_config_yaml(yaml).unwrap();
        let mut registry = NodeRegistry::new();
        let root_id = GraphBuilder::new(&config, &mut registry)
            .build(root, None)
            .unwrap();
        (registry, root_id)
    }

    fn node_by_name(registry: &NodeRegistry, name: &str) -> NodeId {
        registry
            .all_nodes()
            .find(|n| n.name == name)
            .map(|n| n.id)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    const SINGLE_TASK: &str = r#"
tasks:
  - name: T
    command: "true"
build_groups:
  root:
    targets: [T]
"#;

    #[test]
    fn test_dep_groups_synthesized_for_every_node() {
        let (registry, root) = build(SINGLE_TASK, "root");
        // root, root dep group, T, T dep group
        assert_eq!(registry.len(), 4);

        let root_node = registry.get(root);
        assert_eq!(root_node.children.len(), 2);
        let dep_group = registry.get(root_node.children[0]);
        assert!(dep_group.dep_group);
        assert_eq!(dep_group.name, "root_dependency_group");
        assert_eq!(dep_group.child_order(root), Some(0));
        assert!(dep_group.continue_on_error);
        assert!(dep_group.parallel.is_parallel());

        let t = registry.get(node_by_name(&registry, "T"));
        assert_eq!(t.child_order(root), Some(1));
        assert_eq!(t.children.len(), 1); // its own (empty) dependency group
        assert!(registry.get(t.children[0]).dep_group);
    }

    #[test]
    fn test_dependencies_become_dep_group_children() {
        let yaml = r#"
tasks:
  - name: prep
    command: "true"
  - name: main
    command: "true"
    dependencies: [prep]
build_groups:
  root:
    targets: [main]
"#;
        let (registry, _) = build(yaml, "root");
        let main = registry.get(node_by_name(&registry, "main"));
        let dep_group = registry.get(main.children[0]);
        assert_eq!(dep_group.children.len(), 1);
        let prep = registry.get(dep_group.children[0]);
        assert_eq!(prep.name, "prep");
        assert_eq!(prep.child_order(dep_group.id), Some(1));
        // Attached under main's own subtree, so the dependency is internal.
        assert!(main.internal_dependencies.contains(&prep.id));
        assert!(main.external_dependencies.is_empty());
    }

    #[test]
    fn test_notification_targets_fan_in() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
    notifies_on_success: [report]
  - name: b
    command: "true"
    notifies_on_success: [report]
  - name: report
    command: "true"
build_groups:
  root:
    targets: [a, b]
    parallel: true
"#;
        let (registry, _) = build(yaml, "root");
        let reports: Vec<&BuildNode> = registry
            .all_nodes()
            .filter(|n| n.name == "report")
            .collect();
        assert_eq!(reports.len(), 1, "notification targets deduplicate");
        let report = reports[0];
        assert!(report.conditional);
        assert_eq!(report.success_notify.len(), 2);
    }

    #[test]
    fn test_regular_children_not_deduplicated() {
        let yaml = r#"
tasks:
  - name: shared
    command: "true"
build_groups:
  g1:
    targets: [shared]
  g2:
    targets: [shared]
  root:
    targets: [g1, g2]
    parallel: true
"#;
        let (registry, _) = build(yaml, "root");
        let count = registry.all_nodes().filter(|n| n.name == "shared").count();
        assert_eq!(count, 2, "each parent gets its own child instance");
    }

    #[test]
    fn test_sequential_siblings_get_conditional_links() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
  - name: b
    command: "true"
  - name: c
    command: "true"
build_groups:
  g:
    targets: [a, b, c]
"#;
        let (registry, _) = build(yaml, "g");
        let a = node_by_name(&registry, "a");
        let b = registry.get(node_by_name(&registry, "b"));
        assert!(b.conditional);
        assert!(b.success_notify.iter().any(|e| e.notifier == a));
        let c = registry.get(node_by_name(&registry, "c"));
        assert!(c.success_notify.iter().any(|e| e.notifier == b.id));
    }

    #[test]
    fn test_tolerant_siblings_under_continue_on_error() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
  - name: b
    command: "true"
build_groups:
  g:
    targets: [a, b]
    continue_on_error: true
"#;
        let (registry, _) = build(yaml, "g");
        let a = node_by_name(&registry, "a");
        let b = registry.get(node_by_name(&registry, "b"));
        assert!(!b.conditional);
        assert!(b.tolerant_dependencies.contains(&a));
        assert!(b.external_dependencies.contains(&a));
    }

    #[test]
    fn test_parallel_group_has_no_sibling_links() {
        let yaml = r#"
tasks:
  - name: a
    command: "true"
  - name: b
    command: "true"
build_groups:
  g:
    targets: [a, b]
    parallel: 2
"#;
        let (registry, _) = build(yaml, "g");
        let b = registry.get(node_by_name(&registry, "b"));
        assert!(!b.conditional);
        assert!(b.external_dependencies.is_empty());
    }

    #[test]
    fn test_cycle_rejected_with_witness() {
        let yaml = r#"
tasks:
  - name: A
    command: "true"
    dependencies: [B]
  - name: B
    command: "true"
    dependencies: [A]
build_groups:
  root:
    targets: [A]
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let mut registry = NodeRegistry::new();
        let err = GraphBuilder::new(&config, &mut registry)
            .build("root", None)
            .unwrap_err();
        let graph_err = err.downcast::<GraphError>().unwrap();
        match graph_err {
            GraphError::CycleDetected { path } => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_unknown_target_fails() {
        let yaml = r#"
build_groups:
  root:
    targets: [ghost]
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let mut registry = NodeRegistry::new();
        let err = GraphBuilder::new(&config, &mut registry)
            .build("root", None)
            .unwrap_err();
        assert!(matches!(
            err.downcast::<GraphError>().unwrap(),
            GraphError::UnknownTarget(_)
        ));
    }

    #[test]
    fn test_selective_globals_enter_identity() {
        let yaml = r#"
tasks:
  - name: T
    command: "make -j${jobs}"
global_vars:
  - name: jobs
    value: 8
  - name: unrelated
    value: zzz
build_groups:
  root:
    targets: [T]
"#;
        let (registry, _) = build(yaml, "root");
        let t = registry.get(node_by_name(&registry, "T"));
        assert_eq!(t.args.get("jobs").map(String::as_str), Some("8"));
        assert!(!t.args.contains_key("unrelated"));
        assert_eq!(t.identity_key, "T|jobs=8");
    }

    #[test]
    fn test_missing_required_arg_fails_build() {
        let yaml = r#"
tasks:
  - name: T
    command: "deploy ${region}"
    required_args: [region]
build_groups:
  root:
    targets: [T]
"#;
        let config = parse_config_yaml(yaml).unwrap();
        let mut registry = NodeRegistry::new();
        let err = GraphBuilder::new(&config, &mut registry)
            .build("root", None)
            .unwrap_err();
        assert!(matches!(
            err.downcast::<GraphError>().unwrap(),
            GraphError::MissingRequiredArg { .. }
        ));
    }

    #[test]
    fn test_requires_execution_marks_always_run() {
        let yaml = r#"
tasks:
  - name: stamp
    command: "date > stamp"
    inputs: [in.txt]
    outputs: [stamp]
  - name: T
    command: "true"
    requires_execution_of: [stamp]
build_groups:
  root:
    targets: [T]
"#;
        let (registry, _) = build(yaml, "root");
        let stamp = registry.get(node_by_name(&registry, "stamp"));
        assert!(stamp.always_run);
        let t = registry.get(node_by_name(&registry, "T"));
        let dep_group = registry.get(t.children[0]);
        assert!(dep_group.children.contains(&stamp.id));
    }

    #[test]
    fn test_dep_group_notify_does_not_make_parent_conditional() {
        let (registry, root) = build(SINGLE_TASK, "root");
        let root_node = registry.get(root);
        assert!(!root_node.conditional);
        assert!(root_node.success_notify.is_empty());
        let dep_group = registry.get(root_node.children[0]);
        assert_eq!(dep_group.notifies_on_success, vec![root]);
    }

    #[test]
    fn test_explicit_instance_creates_distinct_node() {
        let yaml = r#"
tasks:
  - name: T
    command: "true"
build_groups:
  g:
    targets:
      - T
      - name: T
        instance: second
"#;
        let (registry, _) = build(yaml, "g");
        let count = registry.all_nodes().filter(|n| n.name == "T").count();
        assert_eq!(count, 2);
        assert!(registry.get_by_key("T|instance=second").is_some());
    }
}
