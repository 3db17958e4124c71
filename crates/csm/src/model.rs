//! CSM entities and their validating constructors.

use crate::error::ConstructionError;
use crate::ids::{AgentId, FlowId, MachineId, StateId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// ──────────────────────────────────────────────
// Conditions and context operations
// ──────────────────────────────────────────────

/// A guard on a transition. All conditions of a transition must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// An embedded code expression evaluated by the runtime.
    Code { expression: String },
    /// A JSON-logic rule evaluated against the conversation context.
    #[serde(rename = "jsonlogic")]
    JsonLogic { rule: Value },
}

/// Value consumed by a context operation: either the result of the subflow
/// that just finished, or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "camelCase")]
pub enum OperationValue {
    Result,
    Literal(Value),
}

/// A write to the conversation context performed when a transition fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextOperation {
    Set {
        variable: String,
        value: OperationValue,
    },
    Append {
        target: String,
        value: OperationValue,
    },
    Merge {
        target: String,
        value: OperationValue,
    },
}

// ──────────────────────────────────────────────
// Transition targets
// ──────────────────────────────────────────────

/// How a flow finished. Also used as the reason of a terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowResult {
    End,
    Cancel,
    Error,
}

impl FlowResult {
    pub fn from_name(name: &str) -> Option<FlowResult> {
        match name {
            "end" => Some(FlowResult::End),
            "cancel" => Some(FlowResult::Cancel),
            "error" => Some(FlowResult::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowResult::End => "end",
            FlowResult::Cancel => "cancel",
            FlowResult::Error => "error",
        }
    }
}

/// Where control goes once an invoked subflow returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResultTarget {
    /// A state of the invoking flow.
    State { state: StateId },
    /// Terminate the invoking flow as well.
    Terminal { result: FlowResult },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRoute {
    pub target: ResultTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<ContextOperation>,
}

impl ResultRoute {
    /// Propagate the subflow's result unchanged.
    pub fn propagate(result: FlowResult) -> Self {
        ResultRoute {
            target: ResultTarget::Terminal { result },
            operations: Vec::new(),
        }
    }
}

/// Routes for each possible subflow result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResultHandler {
    pub end: ResultRoute,
    pub cancel: ResultRoute,
    pub error: ResultRoute,
}

impl Default for FlowResultHandler {
    fn default() -> Self {
        FlowResultHandler {
            end: ResultRoute::propagate(FlowResult::End),
            cancel: ResultRoute::propagate(FlowResult::Cancel),
            error: ResultRoute::propagate(FlowResult::Error),
        }
    }
}

impl FlowResultHandler {
    pub fn set_route(&mut self, result: FlowResult, route: ResultRoute) {
        match result {
            FlowResult::End => self.end = route,
            FlowResult::Cancel => self.cancel = route,
            FlowResult::Error => self.error = route,
        }
    }

    fn routes(&self) -> [&ResultRoute; 3] {
        [&self.end, &self.cancel, &self.error]
    }
}

/// Destination of a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransitionTarget {
    /// Another state of the same flow.
    State { state: StateId },
    /// Invoke another flow, continuing according to `on_result`.
    #[serde(rename_all = "camelCase")]
    Flow {
        flow: FlowId,
        on_result: FlowResultHandler,
    },
    /// End the current flow.
    Terminal { result: FlowResult },
}

impl TransitionTarget {
    pub fn state(id: impl Into<String>) -> Self {
        TransitionTarget::State {
            state: StateId::new(id),
        }
    }

    pub fn flow(id: impl Into<String>, on_result: FlowResultHandler) -> Self {
        TransitionTarget::Flow {
            flow: FlowId::new(id),
            on_result,
        }
    }

    pub fn terminal(result: FlowResult) -> Self {
        TransitionTarget::Terminal { result }
    }

    /// States of the owning flow this target can lead to.
    fn local_states(&self) -> Vec<&StateId> {
        match self {
            TransitionTarget::State { state } => vec![state],
            TransitionTarget::Flow { on_result, .. } => on_result
                .routes()
                .into_iter()
                .filter_map(|r| match &r.target {
                    ResultTarget::State { state } => Some(state),
                    ResultTarget::Terminal { .. } => None,
                })
                .collect(),
            TransitionTarget::Terminal { .. } => Vec::new(),
        }
    }
}

// ──────────────────────────────────────────────
// Transition / State
// ──────────────────────────────────────────────

/// One outgoing edge. Conditions are evaluated in order; an empty list makes
/// the transition unconditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    pub target: TransitionTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_ops: Vec<ContextOperation>,
}

impl Transition {
    pub fn new(
        conditions: Vec<Condition>,
        target: TransitionTarget,
        context_ops: Vec<ContextOperation>,
    ) -> Self {
        Transition {
            conditions,
            target,
            context_ops,
        }
    }

    pub fn unconditional(target: TransitionTarget) -> Self {
        Transition::new(Vec::new(), target, Vec::new())
    }

    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMeta {
    /// Message shown when the conversation enters the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// A transient state moves on without waiting for user input.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
}

/// A conversation state. Transition order is significant: the runtime takes
/// the first transition whose conditions all hold.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    id: StateId,
    meta: StateMeta,
    transitions: Vec<Transition>,
}

impl State {
    pub fn new(id: StateId, meta: StateMeta, transitions: Vec<Transition>) -> Self {
        State {
            id,
            meta,
            transitions,
        }
    }

    pub fn id(&self) -> &StateId {
        &self.id
    }

    pub fn meta(&self) -> &StateMeta {
        &self.meta
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}

// ──────────────────────────────────────────────
// Flow
// ──────────────────────────────────────────────

/// A named graph of states with a designated start state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FlowRepr", into = "FlowRepr")]
pub struct Flow {
    id: FlowId,
    start: StateId,
    states: BTreeMap<StateId, State>,
}

impl Flow {
    /// Build a flow, enforcing: at least one state, unique state ids, a
    /// start state that exists, and state targets that resolve locally.
    pub fn new(id: FlowId, start: StateId, states: Vec<State>) -> Result<Flow, ConstructionError> {
        if states.is_empty() {
            return Err(ConstructionError::EmptyFlow { flow: id });
        }
        let mut map = BTreeMap::new();
        for state in states {
            if map.contains_key(&state.id) {
                return Err(ConstructionError::DuplicateState {
                    flow: id,
                    state: state.id,
                });
            }
            map.insert(state.id.clone(), state);
        }
        if !map.contains_key(&start) {
            return Err(ConstructionError::MissingStartState { flow: id, start });
        }
        for state in map.values() {
            for transition in &state.transitions {
                for target in transition.target.local_states() {
                    if !map.contains_key(target) {
                        return Err(ConstructionError::UnresolvedState {
                            flow: id.clone(),
                            from: state.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        Ok(Flow {
            id,
            start,
            states: map,
        })
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn start(&self) -> &StateId {
        &self.start
    }

    pub fn states(&self) -> &BTreeMap<StateId, State> {
        &self.states
    }

    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.get(id)
    }

    /// Flows invoked from this flow, with the invoking state.
    pub fn flow_references(&self) -> impl Iterator<Item = (&StateId, &FlowId)> {
        self.states.values().flat_map(|s| {
            s.transitions.iter().filter_map(move |t| match &t.target {
                TransitionTarget::Flow { flow, .. } => Some((&s.id, flow)),
                _ => None,
            })
        })
    }

    /// States reachable from the start state, including the start state.
    pub fn reachable_states(&self) -> BTreeSet<StateId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(&self.start);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(state) = self.states.get(id) {
                for transition in &state.transitions {
                    for next in transition.target.local_states() {
                        if !seen.contains(next) {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }
        seen
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateRepr {
    #[serde(default)]
    meta: StateMeta,
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowRepr {
    id: FlowId,
    start: StateId,
    states: BTreeMap<StateId, StateRepr>,
}

impl TryFrom<FlowRepr> for Flow {
    type Error = ConstructionError;

    fn try_from(repr: FlowRepr) -> Result<Self, Self::Error> {
        let states = repr
            .states
            .into_iter()
            .map(|(id, s)| State::new(id, s.meta, s.transitions))
            .collect();
        Flow::new(repr.id, repr.start, states)
    }
}

impl From<Flow> for FlowRepr {
    fn from(flow: Flow) -> Self {
        FlowRepr {
            id: flow.id,
            start: flow.start,
            states: flow
                .states
                .into_iter()
                .map(|(id, s)| {
                    (
                        id,
                        StateRepr {
                            meta: s.meta,
                            transitions: s.transitions,
                        },
                    )
                })
                .collect(),
        }
    }
}

// ──────────────────────────────────────────────
// Machine / Agent
// ──────────────────────────────────────────────

/// All flows of an agent plus the flow a new conversation starts in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MachineRepr", into = "MachineRepr")]
pub struct Machine {
    id: MachineId,
    initial_flow: FlowId,
    flows: BTreeMap<FlowId, Flow>,
}

impl Machine {
    /// Build a machine, enforcing unique flow ids, an existing initial flow,
    /// and flow targets that resolve to flows of this machine.
    pub fn new(
        id: MachineId,
        initial_flow: FlowId,
        flows: Vec<Flow>,
    ) -> Result<Machine, ConstructionError> {
        if flows.is_empty() {
            return Err(ConstructionError::NoFlows { machine: id });
        }
        let mut map = BTreeMap::new();
        for flow in flows {
            if map.contains_key(&flow.id) {
                return Err(ConstructionError::DuplicateFlow {
                    machine: id,
                    flow: flow.id,
                });
            }
            map.insert(flow.id.clone(), flow);
        }
        if !map.contains_key(&initial_flow) {
            return Err(ConstructionError::MissingInitialFlow {
                machine: id,
                flow: initial_flow,
            });
        }
        for flow in map.values() {
            for (from, target) in flow.flow_references() {
                if !map.contains_key(target) {
                    return Err(ConstructionError::UnresolvedFlow {
                        flow: flow.id.clone(),
                        from: from.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(Machine {
            id,
            initial_flow,
            flows: map,
        })
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn initial_flow(&self) -> &FlowId {
        &self.initial_flow
    }

    pub fn flows(&self) -> &BTreeMap<FlowId, Flow> {
        &self.flows
    }

    pub fn flow(&self, id: &str) -> Option<&Flow> {
        self.flows.get(id)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineRepr {
    id: MachineId,
    initial_flow: FlowId,
    flows: BTreeMap<FlowId, Flow>,
}

impl TryFrom<MachineRepr> for Machine {
    type Error = ConstructionError;

    fn try_from(repr: MachineRepr) -> Result<Self, Self::Error> {
        Machine::new(repr.id, repr.initial_flow, repr.flows.into_values().collect())
    }
}

impl From<Machine> for MachineRepr {
    fn from(machine: Machine) -> Self {
        MachineRepr {
            id: machine.id,
            initial_flow: machine.initial_flow,
            flows: machine.flows,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A compiled agent: identity, descriptive metadata, and its machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: AgentId,
    #[serde(default)]
    meta: AgentMeta,
    machine: Machine,
}

impl Agent {
    pub fn new(id: AgentId, meta: AgentMeta, machine: Machine) -> Self {
        Agent { id, meta, machine }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn meta(&self) -> &AgentMeta {
        &self.meta
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }
}
