//! rcl-csm: the typed Conversation State Machine (CSM) model.
//!
//! A compiled agent is an [`Agent`] wrapping a [`Machine`], which owns a set
//! of [`Flow`]s, each a graph of [`State`]s connected by ordered
//! [`Transition`]s. Every entity is produced by a validating constructor:
//! there is no way to obtain a `Flow` whose start state is missing or a
//! `Machine` with a dangling flow reference. Editing means building a new
//! graph.
//!
//! The same invariants are re-checked when deserializing, so a machine read
//! back from interchange JSON is exactly as trustworthy as one built by the
//! compiler.

pub mod error;
pub mod ids;
pub mod model;

pub use error::ConstructionError;
pub use ids::{AgentId, FlowId, MachineId, StateId};
pub use model::{
    Agent, AgentMeta, Condition, ContextOperation, Flow, FlowResult, FlowResultHandler, Machine,
    OperationValue, ResultRoute, ResultTarget, State, StateMeta, Transition, TransitionTarget,
};
