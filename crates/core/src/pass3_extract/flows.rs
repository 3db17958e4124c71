//! Per-flow rule lists, the input of the CSM builder.

use super::Messages;
use crate::ast::{File, MatchBlock, Section, SimpleTransition, Statement};
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{Outcome, Range};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFlow {
    pub id: String,
    pub start: Option<String>,
    pub range: Range,
    /// States declared with `on Name` or a bare `Name` line, in source order.
    pub states: Vec<DeclaredState>,
    /// Transition statements in source order.
    pub rules: Vec<FlowRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredState {
    pub name: String,
    pub range: Range,
    /// Message sent on entering the state.
    pub message: Option<String>,
    /// Declared by an `on` section rather than a bare line.
    pub section: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowRule {
    pub source: String,
    pub statement: RuleStatement,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleStatement {
    Transition(SimpleTransition),
    Match(MatchBlock),
}

/// Local flows in source order, followed by imported flows whose ids are
/// not defined locally. A state's message is its `message:` attribute, or
/// the message sharing the state's name.
pub fn extract_flows(
    file: &File,
    imports: &[Arc<File>],
    messages: &Messages,
    cancel: &CancellationToken,
) -> Result<Outcome<Vec<ExtractedFlow>>, Cancelled> {
    let mut flows = Vec::new();
    let mut seen = BTreeSet::new();
    for source in std::iter::once(file).chain(imports.iter().map(|f| f.as_ref())) {
        for section in source.sections_of("flow") {
            cancel.check()?;
            let Some(id) = section.name.as_deref() else {
                continue;
            };
            if seen.insert(id.to_owned()) {
                flows.push(flow(id, section, messages));
            }
        }
    }
    debug!(flows = flows.len(), "extracted flows");
    Ok(Outcome::ok(flows))
}

fn flow(id: &str, section: &Section, messages: &Messages) -> ExtractedFlow {
    let mut out = ExtractedFlow {
        id: id.to_owned(),
        start: section
            .attribute("start")
            .and_then(|a| a.value.as_str())
            .map(str::to_owned),
        range: section.range,
        states: Vec::new(),
        rules: Vec::new(),
    };
    let declare = |name: &str, range: Range, explicit: Option<String>, section: bool| DeclaredState {
        name: name.to_owned(),
        range,
        message: explicit.or_else(|| messages.contains(name).then(|| name.to_owned())),
        section,
    };

    for statement in &section.statements {
        match statement {
            Statement::FlowRule(rule) => out.rules.push(FlowRule {
                source: rule.source.name.clone(),
                statement: RuleStatement::Transition(rule.body.clone()),
                range: rule.range,
            }),
            Statement::StateReference(state) => {
                out.states.push(declare(&state.name, state.range, None, false))
            }
            _ => {}
        }
    }

    for state in section.subsections_of("on") {
        let Some(name) = state.name.as_deref() else {
            continue;
        };
        let explicit = state
            .attribute("message")
            .and_then(|a| a.value.as_str())
            .map(str::to_owned);
        out.states.push(declare(name, state.name_or_header(), explicit, true));
        for statement in &state.statements {
            let (source, rule, range) = match statement {
                Statement::Transition(t) => (name, RuleStatement::Transition(t.clone()), t.range),
                Statement::Match(m) => (name, RuleStatement::Match(m.clone()), m.range),
                Statement::FlowRule(r) => (
                    r.source.name.as_str(),
                    RuleStatement::Transition(r.body.clone()),
                    r.range,
                ),
                _ => continue,
            };
            out.rules.push(FlowRule {
                source: source.to_owned(),
                statement: rule,
                range,
            });
        }
    }
    out
}
