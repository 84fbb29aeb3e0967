use thiserror::Error;

use crate::schedule::NodeId;

/// Errors raised while validating a job graph at build time.
///
/// Every variant represents a bug in how the schedule was authored rather
/// than a condition a live simulation should recover from; callers are
/// expected to surface these loudly during startup or in tests.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The dependency edges do not form a DAG.
    #[error("dependency cycle detected in job graph (involves node {node})")]
    Cycle { node: NodeId },

    /// A node lists a dependency id that was never registered with the
    /// builder.
    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: NodeId, dependency: NodeId },

    /// Two nodes with overlapping declared access are not connected by a
    /// strict transitive dependency path in either direction, so nothing
    /// stops them racing on the same slot.
    #[error(
        "nodes {a} and {b} both touch {kind} slot `{slot}` but have no \
         dependency path between them; add a depends_on edge in either \
         direction"
    )]
    UnorderedConflict {
        a: NodeId,
        b: NodeId,
        slot: &'static str,
        kind: ConflictKind,
    },
}

/// Which class of shared slot an unordered conflict was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A per-entity component slot.
    Component,
    /// A context singleton.
    Context,
    /// An event topic.
    Event,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Component => write!(f, "component"),
            ConflictKind::Context => write!(f, "context"),
            ConflictKind::Event => write!(f, "event"),
        }
    }
}

/// Result type alias for schedule construction.
pub type Result<T> = std::result::Result<T, ScheduleError>;
