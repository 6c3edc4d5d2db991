use crate::error::StateMachineError;
use crate::types::{NodeId, NodeState};

/// Validates a node state transition.
///
/// `PENDING -> FAILED` covers nodes that never execute: a producer failed or
/// the run was cancelled before dispatch.
pub fn validate_transition(node: NodeId, from: NodeState, to: NodeState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { node, from, to })
    }
}

pub fn allowed_transitions(from: NodeState) -> &'static [NodeState] {
    use NodeState::*;
    match from {
        Pending => &[Running, SkippedCached, Failed],
        Running => &[Done, Failed],
        Done | Failed | SkippedCached => &[],
    }
}

fn allowed(from: NodeState, to: NodeState) -> bool {
    allowed_transitions(from).contains(&to)
}
