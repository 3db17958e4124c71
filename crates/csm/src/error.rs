use crate::ids::{FlowId, MachineId, StateId};

/// A violated CSM invariant, reported by the validating constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    /// A flow must contain at least one state.
    #[error("flow '{flow}' has no states")]
    EmptyFlow { flow: FlowId },

    /// `Flow.start` must name one of the flow's own states.
    #[error("start state '{start}' of flow '{flow}' is not defined")]
    MissingStartState { flow: FlowId, start: StateId },

    /// State ids are unique within their flow.
    #[error("state '{state}' is defined more than once in flow '{flow}'")]
    DuplicateState { flow: FlowId, state: StateId },

    /// A `TransitionTarget::State` (or result route) must resolve inside the
    /// same flow; cross-flow jumps use `TransitionTarget::Flow`.
    #[error("state '{from}' in flow '{flow}' targets unknown state '{target}'")]
    UnresolvedState {
        flow: FlowId,
        from: StateId,
        target: StateId,
    },

    /// Flow ids are unique within their machine.
    #[error("flow '{flow}' is defined more than once in machine '{machine}'")]
    DuplicateFlow { machine: MachineId, flow: FlowId },

    /// A machine needs at least one flow.
    #[error("machine '{machine}' has no flows")]
    NoFlows { machine: MachineId },

    /// `Machine.initial_flow` must name one of the machine's flows.
    #[error("initial flow '{flow}' of machine '{machine}' is not defined")]
    MissingInitialFlow { machine: MachineId, flow: FlowId },

    /// A `TransitionTarget::Flow` must name a flow of the same machine.
    #[error("state '{from}' in flow '{flow}' invokes unknown flow '{target}'")]
    UnresolvedFlow {
        flow: FlowId,
        from: StateId,
        target: FlowId,
    },
}
