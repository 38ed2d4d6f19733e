use thiserror::Error;

/// Failures raised while constructing the build graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Adding the edge would close a cycle. `path` is a witness walk that
    /// starts and ends at the same node.
    #[error("cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("duplicate node key: {0}")]
    Duplicate(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// A command references `${name}` listed in `required_args` but no
    /// binding resolves it.
    #[error("target '{target}' requires argument '{arg}' which is unresolved")]
    MissingRequiredArg { target: String, arg: String },
}

/// Fatal engine conditions. These indicate scheduler bugs or a wedged
/// graph, not user errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node already in a terminal success state was dequeued for
    /// execution. The queue sizes and the node's transition history are
    /// carried for the diagnostic dump.
    #[error(
        "queue invariant violation: '{node}' dequeued for execution while already {status} \
         (pending={pending_len}, coordinated={coordinated_len}, ready={ready_len})"
    )]
    QueueInvariant {
        node: String,
        status: String,
        pending_len: usize,
        coordinated_len: usize,
        ready_len: usize,
        history: Vec<String>,
    },

    /// Three consecutive loop iterations produced no transition while work
    /// remained. The named nodes could not make progress.
    #[error("build stalled with {} node(s) unable to progress: {}", remaining.len(), remaining.join(", "))]
    Stalled { remaining: Vec<String> },
}
