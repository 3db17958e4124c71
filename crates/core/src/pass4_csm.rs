//! Pass 4: lowering extracted flows into a typed [`Machine`].
//!
//! Each flow is built on its own. A flow with an unresolved state target,
//! a missing start state or no states at all is dropped with diagnostics
//! and its siblings carry on. Flows that invoke a dropped or unknown flow
//! are then removed until the set is closed, and the survivors form the
//! machine.

use crate::ast::{
    self, MatchBlock, MatchPattern, Operand, SimpleTransition, TargetReference, Value, ValueKind,
};
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{codes, Diagnostic, Outcome, Range};
use crate::pass2_validate::unresolved_flow;
use crate::pass3_extract::{ExtractedFlow, RuleStatement};
use rcl_csm::{
    Condition, ConstructionError, ContextOperation, Flow, FlowId, FlowResultHandler, Machine,
    MachineId, OperationValue, ResultRoute, ResultTarget, State, StateId, StateMeta, Transition,
    TransitionTarget,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub fn build_machine(
    flows: &[ExtractedFlow],
    initial: Option<&str>,
    machine_id: &str,
) -> Outcome<Option<Machine>> {
    build_machine_cancellable(flows, initial, machine_id, &CancellationToken::new())
        .unwrap_or_else(|Cancelled| Outcome::ok(None))
}

/// As [`build_machine`], checking `cancel` after each flow.
pub fn build_machine_cancellable(
    flows: &[ExtractedFlow],
    initial: Option<&str>,
    machine_id: &str,
    cancel: &CancellationToken,
) -> Result<Outcome<Option<Machine>>, Cancelled> {
    let mut diagnostics = Vec::new();
    let mut built: Vec<BuiltFlow> = Vec::new();
    for flow in flows {
        cancel.check()?;
        if let Some(b) = FlowBuilder::new(flow, &mut diagnostics).build() {
            built.push(b);
        }
    }

    // Drop flows invoking anything that did not build, until nothing changes.
    let declared: BTreeSet<&str> = flows.iter().map(|f| f.id.as_str()).collect();
    loop {
        let alive: BTreeSet<String> = built.iter().map(|b| b.flow.id().to_string()).collect();
        let before = built.len();
        built.retain(|b| {
            let broken: Vec<_> = b
                .invocations
                .iter()
                .filter(|(target, _)| !alive.contains(target))
                .collect();
            for (target, range) in &broken {
                diagnostics.push(if declared.contains(target.as_str()) {
                    Diagnostic::error(
                        codes::UNRESOLVED_TARGET,
                        format!(
                            "flow '{}' invokes flow '{}', which could not be built",
                            b.flow.id(),
                            target
                        ),
                        *range,
                    )
                } else {
                    unresolved_flow(target, *range)
                });
            }
            broken.is_empty()
        });
        if built.len() == before {
            break;
        }
    }

    let Some(initial) = initial.or_else(|| flows.first().map(|f| f.id.as_str())) else {
        return Ok(Outcome::new(None, diagnostics));
    };
    if !built.iter().any(|b| b.flow.id().as_str() == initial) {
        let range = flows
            .iter()
            .find(|f| f.id == initial)
            .map(|f| f.range)
            .unwrap_or_default();
        diagnostics.push(Diagnostic::error(
            codes::MISSING_INITIAL_FLOW,
            format!("initial flow '{}' could not be built", initial),
            range,
        ));
        return Ok(Outcome::new(None, diagnostics));
    }

    let count = built.len();
    let machine = Machine::new(
        MachineId::new(machine_id),
        FlowId::new(initial),
        built.into_iter().map(|b| b.flow).collect(),
    );
    match machine {
        Ok(machine) => {
            debug!(machine = machine_id, flows = count, "built machine");
            Ok(Outcome::new(Some(machine), diagnostics))
        }
        Err(e) => {
            diagnostics.push(construction_diagnostic(&e, Range::default()));
            Ok(Outcome::new(None, diagnostics))
        }
    }
}

struct BuiltFlow {
    flow: Flow,
    /// Flows invoked by this one, with the invoking statement's range.
    invocations: Vec<(String, Range)>,
}

struct StateDraft {
    range: Range,
    message: Option<String>,
    transitions: Vec<Transition>,
}

struct FlowBuilder<'a> {
    flow: &'a ExtractedFlow,
    diagnostics: &'a mut Vec<Diagnostic>,
    /// Every state name defined in the flow: declared or used as a source.
    known: BTreeSet<&'a str>,
    invocations: Vec<(String, Range)>,
    failed: bool,
}

impl<'a> FlowBuilder<'a> {
    fn new(flow: &'a ExtractedFlow, diagnostics: &'a mut Vec<Diagnostic>) -> Self {
        let known = flow
            .states
            .iter()
            .map(|s| s.name.as_str())
            .chain(flow.rules.iter().map(|r| r.source.as_str()))
            .collect();
        FlowBuilder {
            flow,
            diagnostics,
            known,
            invocations: Vec::new(),
            failed: false,
        }
    }

    fn build(mut self) -> Option<BuiltFlow> {
        let flow = self.flow;
        let Some(start) = flow.start.as_deref() else {
            self.diagnostics.push(Diagnostic::error(
                codes::MISSING_FLOW_START,
                format!("flow '{}' has no 'start' attribute", flow.id),
                flow.range,
            ));
            return None;
        };
        if self.known.is_empty() {
            self.diagnostics.push(Diagnostic::error(
                codes::EMPTY_FLOW,
                format!("flow '{}' has no states", flow.id),
                flow.range,
            ));
            return None;
        }

        // States in first-seen order; a repeated declaration adds to the
        // first one.
        let mut order: Vec<&str> = Vec::new();
        let mut drafts: BTreeMap<&str, StateDraft> = BTreeMap::new();
        for state in &flow.states {
            let draft = drafts.entry(state.name.as_str()).or_insert_with(|| {
                order.push(state.name.as_str());
                StateDraft {
                    range: state.range,
                    message: None,
                    transitions: Vec::new(),
                }
            });
            if draft.message.is_none() {
                draft.message = state.message.clone();
            }
        }
        for rule in &flow.rules {
            let lowered = match &rule.statement {
                RuleStatement::Transition(t) => self.transition(t, Vec::new()).into_iter().collect(),
                RuleStatement::Match(m) => self.match_block(m),
            };
            let draft = drafts.entry(rule.source.as_str()).or_insert_with(|| {
                order.push(rule.source.as_str());
                StateDraft {
                    range: rule.range,
                    message: None,
                    transitions: Vec::new(),
                }
            });
            draft.transitions.extend(lowered);
        }

        if !self.known.contains(start) {
            self.diagnostics.push(Diagnostic::error(
                codes::MISSING_START_STATE,
                format!(
                    "start state '{}' of flow '{}' is not defined by any state or transition",
                    start, flow.id
                ),
                flow.range,
            ));
            self.failed = true;
        }
        if self.failed {
            return None;
        }

        let mut ranges = BTreeMap::new();
        let states = order
            .iter()
            .filter_map(|name| drafts.remove(name).map(|d| (*name, d)))
            .map(|(name, d)| {
                ranges.insert(name, d.range);
                let transient =
                    !d.transitions.is_empty() && d.transitions.iter().all(Transition::is_unconditional);
                State::new(
                    StateId::new(name),
                    StateMeta {
                        message_id: d.message,
                        transient,
                    },
                    d.transitions,
                )
            })
            .collect();
        let built = match Flow::new(FlowId::new(&flow.id), StateId::new(start), states) {
            Ok(f) => f,
            Err(e) => {
                self.diagnostics.push(construction_diagnostic(&e, flow.range));
                return None;
            }
        };

        let targeted: BTreeSet<&str> = built
            .states()
            .values()
            .flat_map(|s| s.transitions())
            .flat_map(|t| local_targets(&t.target))
            .collect();
        // Untargeted `on` states already carry an unreferenced-state warning.
        let sections: BTreeSet<&str> = flow
            .states
            .iter()
            .filter(|s| s.section)
            .map(|s| s.name.as_str())
            .collect();
        let reachable = built.reachable_states();
        for (id, _) in built.states() {
            let name = id.as_str();
            if !reachable.contains(id) && (targeted.contains(name) || !sections.contains(name)) {
                self.diagnostics.push(Diagnostic::warning(
                    codes::UNREACHABLE_STATE,
                    format!(
                        "state '{}' of flow '{}' cannot be reached from start state '{}'",
                        id, flow.id, start
                    ),
                    ranges.get(id.as_str()).copied().unwrap_or(flow.range),
                ));
            }
        }

        debug!(flow = %flow.id, states = built.states().len(), "built flow");
        Some(BuiltFlow {
            flow: built,
            invocations: self.invocations,
        })
    }

    /// Cases in source order, the default case last.
    fn match_block(&mut self, block: &MatchBlock) -> Vec<Transition> {
        let mut out = Vec::new();
        for case in &block.cases {
            if let MatchPattern::Value(pattern) = &case.pattern {
                let condition = case_condition(&block.discriminant, pattern);
                out.extend(self.transition(&case.result, vec![condition]));
            }
        }
        if let Some(default) = block.default_case() {
            out.extend(self.transition(&default.result, Vec::new()));
        }
        out
    }

    fn transition(
        &mut self,
        t: &SimpleTransition,
        mut conditions: Vec<Condition>,
    ) -> Option<Transition> {
        conditions.extend(t.condition.as_ref().map(condition));
        let mut ops = operations(&t.operations, &t.parameters);
        let target = match &t.target {
            TargetReference::State(s) => {
                self.resolve_state(&s.name, t.range)?;
                TransitionTarget::state(&s.name)
            }
            TargetReference::Terminal(term) => TransitionTarget::terminal(term.result),
            TargetReference::Flow(invocation) => {
                ops.extend(operations(&Default::default(), &invocation.parameters));
                let mut handler = FlowResultHandler::default();
                for result in &invocation.results {
                    if let Some(route) = self.route(&result.body) {
                        handler.set_route(result.kind, route);
                    }
                }
                self.invocations
                    .push((invocation.flow.clone(), invocation.range));
                TransitionTarget::flow(&invocation.flow, handler)
            }
        };
        Some(Transition::new(conditions, target, ops))
    }

    /// Continuation after a subflow returns. Only states of this flow and
    /// terminals are allowed there.
    fn route(&mut self, body: &SimpleTransition) -> Option<ResultRoute> {
        let target = match &body.target {
            TargetReference::State(s) => {
                self.resolve_state(&s.name, body.range)?;
                ResultTarget::State {
                    state: StateId::new(&s.name),
                }
            }
            TargetReference::Terminal(term) => ResultTarget::Terminal {
                result: term.result,
            },
            TargetReference::Flow(invocation) => {
                self.fail(
                    format!(
                        "a result handler cannot start flow '{}'; route to a state that does",
                        invocation.flow
                    ),
                    body.range,
                );
                return None;
            }
        };
        Some(ResultRoute {
            target,
            operations: operations(&body.operations, &body.parameters),
        })
    }

    fn resolve_state(&mut self, name: &str, range: Range) -> Option<()> {
        if self.known.contains(name) {
            return Some(());
        }
        self.fail(
            format!(
                "unresolved target: state '{}' is not defined in flow '{}'",
                name, self.flow.id
            ),
            range,
        );
        None
    }

    fn fail(&mut self, message: String, range: Range) {
        self.diagnostics
            .push(Diagnostic::error(codes::UNRESOLVED_TARGET, message, range));
        self.failed = true;
    }
}

fn local_targets(target: &TransitionTarget) -> Vec<&str> {
    match target {
        TransitionTarget::State { state } => vec![state.as_str()],
        TransitionTarget::Flow { on_result, .. } => [&on_result.end, &on_result.cancel, &on_result.error]
            .into_iter()
            .filter_map(|r| match &r.target {
                ResultTarget::State { state } => Some(state.as_str()),
                ResultTarget::Terminal { .. } => None,
            })
            .collect(),
        TransitionTarget::Terminal { .. } => Vec::new(),
    }
}

/// `discriminant == pattern` as a runtime condition.
fn case_condition(discriminant: &Value, pattern: &Value) -> Condition {
    match &discriminant.kind {
        ValueKind::Code { code, .. } => Condition::Code {
            expression: format!("({}) === {}", code, pattern.to_json()),
        },
        _ => Condition::JsonLogic {
            rule: json!({"==": [discriminant.to_json(), pattern.to_json()]}),
        },
    }
}

fn condition(c: &ast::Condition) -> Condition {
    match c {
        ast::Condition::CodeExpression { code, .. } => Condition::Code {
            expression: code.clone(),
        },
        ast::Condition::JsonLogicRule { rule, .. } => Condition::JsonLogic {
            rule: rule.to_json(),
        },
    }
}

/// Authored operations, then one `set` per `with` parameter.
fn operations(
    sequence: &ast::ContextOperationSequence,
    parameters: &[(String, Value)],
) -> Vec<ContextOperation> {
    let value = |operand: &Operand| match operand {
        Operand::Result => OperationValue::Result,
        Operand::Value(v) => OperationValue::Literal(v.to_json()),
    };
    sequence
        .iter()
        .map(|op| match op {
            ast::ContextOperation::Set {
                variable, value: v, ..
            } => ContextOperation::Set {
                variable: variable.clone(),
                value: value(v),
            },
            ast::ContextOperation::Append { target, value: v, .. } => ContextOperation::Append {
                target: target.clone(),
                value: value(v),
            },
            ast::ContextOperation::Merge { target, value: v, .. } => ContextOperation::Merge {
                target: target.clone(),
                value: value(v),
            },
        })
        .chain(parameters.iter().map(|(k, v)| ContextOperation::Set {
            variable: k.clone(),
            value: OperationValue::Literal(v.to_json()),
        }))
        .collect()
}

fn construction_diagnostic(e: &ConstructionError, range: Range) -> Diagnostic {
    let code = match e {
        ConstructionError::EmptyFlow { .. } | ConstructionError::NoFlows { .. } => codes::EMPTY_FLOW,
        ConstructionError::MissingStartState { .. } => codes::MISSING_START_STATE,
        ConstructionError::MissingInitialFlow { .. } => codes::MISSING_INITIAL_FLOW,
        ConstructionError::UnresolvedFlow { .. } => codes::UNRESOLVED_FLOW,
        ConstructionError::DuplicateState { .. }
        | ConstructionError::DuplicateFlow { .. }
        | ConstructionError::UnresolvedState { .. } => codes::UNRESOLVED_TARGET,
    };
    Diagnostic::error(code, e.to_string(), range)
}
