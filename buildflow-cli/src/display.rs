//! Presentation helpers: target tree, build order, and run summary.

use std::collections::HashSet;

use buildflow_core::registry::NodeRegistry;
use buildflow_core::types::{NodeId, NodeKind};
use buildflow_core::RunReport;

/// Print an indented tree of the graph under `root`. Nodes already shown
/// (fan-in) are marked instead of being expanded again.
pub fn print_tree(registry: &NodeRegistry, root: NodeId) {
    let mut seen = HashSet::new();
    print_subtree(registry, root, 0, &mut seen);
}

fn print_subtree(registry: &NodeRegistry, id: NodeId, depth: usize, seen: &mut HashSet<NodeId>) {
    let node = registry.get(id);
    let indent = "  ".repeat(depth);
    let kind = match node.kind {
        NodeKind::Task => "task",
        NodeKind::Platform => "platform",
        NodeKind::Group => {
            if node.dep_group {
                "deps"
            } else {
                "group"
            }
        }
    };

    let mut annotations = Vec::new();
    if node.parallel.is_parallel() {
        annotations.push(format!("parallel={}", node.parallel.capacity()));
    }
    if node.continue_on_error && !node.dep_group {
        annotations.push("continue_on_error".to_string());
    }
    if node.conditional {
        annotations.push("conditional".to_string());
    }
    let suffix = if annotations.is_empty() {
        String::new()
    } else {
        format!(" [{}]", annotations.join(", "))
    };

    if !seen.insert(id) {
        println!("{indent}{} ({kind}) *", node.name);
        return;
    }
    println!("{indent}{} ({kind}){suffix}", node.name);

    for &child in &node.children {
        print_subtree(registry, child, depth + 1, seen);
    }
}

/// One line per executed node, in ready order.
pub fn print_build_order(report: &RunReport) {
    for (i, record) in report.summary.execution_order.iter().enumerate() {
        let duration = match record.t_complete_ms {
            Some(done) => format!("{}ms", done.saturating_sub(record.t_ready_ms)),
            None => "-".to_string(),
        };
        println!("{:>3}. {} ({}, {})", i + 1, record.name, record.status, duration);
    }
}

/// The execution order as a JSON array.
pub fn build_order_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&report.summary.execution_order)
}

/// Counters, failures, and stall/unmet detail for one run.
pub fn print_summary(report: &RunReport) {
    println!();
    println!("build {}", report.build_id);
    println!("elapsed: {}ms", report.summary.elapsed_ms);
    for (status, count) in &report.summary.counters {
        println!("  {status:>10}: {count}");
    }
    if !report.summary.failed.is_empty() {
        println!("failed targets: {}", report.summary.failed.join(", "));
    }
    if !report.unmet.is_empty() {
        println!("condition unmet (not run): {}", report.unmet.join(", "));
    }
    if !report.stalled.is_empty() {
        println!("stalled: {}", report.stalled.join(", "));
    }
    println!(
        "result: {}",
        if report.success() { "SUCCESS" } else { "FAILURE" }
    );
}

/// List every conditional target with the notifiers that gate it.
pub fn print_notification_graph(registry: &NodeRegistry) {
    let mut any = false;
    for node in registry.all_nodes() {
        if !node.conditional {
            continue;
        }
        any = true;
        let describe = |ids: &[buildflow_core::types::NotifyEntry]| -> Vec<String> {
            ids.iter()
                .map(|e| registry.get(e.notifier).name.clone())
                .collect()
        };
        let on_success = describe(&node.success_notify);
        let on_failure = describe(&node.failure_notify);
        print!("{}:", node.name);
        if !on_success.is_empty() {
            print!(" on-success of [{}]", on_success.join(", "));
        }
        if !on_failure.is_empty() {
            print!(" on-failure of [{}]", on_failure.join(", "));
        }
        println!();
    }
    if !any {
        println!("no conditional notifications declared");
    }
}
