//! Cross-reference checks: duplicate identifiers, unresolved references,
//! duplicate default cases and states nobody points at.
//!
//! Unresolved *state* targets and missing start states are left to the CSM
//! builder, which reports them against the statement that failed to lower.

use super::{find_spread_target, ValidationContext, ValidationReport, Validator};
use crate::ast::{self, File, MatchBlock, Section, SpreadDirective, TargetReference, Visitor};
use crate::cancel::Cancelled;
use crate::diagnostic::{codes, Diagnostic, Range};
use std::collections::{BTreeSet, HashMap};

/// Section keywords that define a message inside `messages`.
pub(crate) const MESSAGE_KINDS: [&str; 5] = ["text", "richCard", "carousel", "file", "message"];

pub struct SemanticValidator;

impl Validator for SemanticValidator {
    fn name(&self) -> &str {
        "semantic"
    }

    fn validate(&self, file: &File, ctx: &ValidationContext) -> Result<ValidationReport, Cancelled> {
        let mut diagnostics = Vec::new();

        let flows: Vec<&Section> = file.sections_of("flow").collect();
        duplicates(
            flows.iter().copied(),
            codes::DUPLICATE_FLOW,
            "flow",
            &mut diagnostics,
        );
        for flow in &flows {
            ctx.cancel.check()?;
            duplicates(
                flow.subsections_of("on"),
                codes::DUPLICATE_STATE,
                "state",
                &mut diagnostics,
            );
            unreferenced_states(flow, &mut diagnostics);
        }
        duplicates(
            file.sections_of("messages")
                .flat_map(|m| m.subsections.iter())
                .filter(|s| MESSAGE_KINDS.contains(&s.kind.as_str())),
            codes::DUPLICATE_MESSAGE,
            "message",
            &mut diagnostics,
        );

        let known_flows: BTreeSet<&str> = flows.iter().filter_map(|f| f.name.as_deref()).collect();
        let mut refs = References {
            file,
            ctx,
            known_flows: &known_flows,
            diagnostics: &mut diagnostics,
        };
        ast::walk_file(&mut refs, file);

        Ok(ValidationReport::from_diagnostics(diagnostics))
    }
}

/// One error per repeated name, pointing back at the first definition.
fn duplicates<'a>(
    sections: impl Iterator<Item = &'a Section>,
    code: &str,
    what: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut seen: HashMap<&str, Range> = HashMap::new();
    for section in sections {
        let Some(name) = section.name.as_deref() else {
            continue;
        };
        match seen.get(name) {
            Some(first) => diagnostics.push(
                Diagnostic::error(
                    code,
                    format!("{} '{}' is defined more than once", what, name),
                    section.name_or_header(),
                )
                .with_related("first defined here", *first),
            ),
            None => {
                seen.insert(name, section.name_or_header());
            }
        }
    }
}

/// `on` states that are neither the flow's start nor the target of any
/// transition in the flow.
fn unreferenced_states(flow: &Section, diagnostics: &mut Vec<Diagnostic>) {
    let mut targets = StateTargets(BTreeSet::new());
    ast::walk_section(&mut targets, flow);
    if let Some(start) = flow.attribute("start").and_then(|a| a.value.as_str()) {
        targets.0.insert(start.to_owned());
    }
    for state in flow.subsections_of("on") {
        let Some(name) = state.name.as_deref() else {
            continue;
        };
        if !targets.0.contains(name) {
            diagnostics.push(Diagnostic::warning(
                codes::UNREFERENCED_STATE,
                format!(
                    "state '{}' is never referenced by a transition or the flow start",
                    name
                ),
                state.name_or_header(),
            ));
        }
    }
}

struct StateTargets(BTreeSet<String>);

impl Visitor for StateTargets {
    fn visit_target(&mut self, target: &TargetReference) {
        if let TargetReference::State(state) = target {
            self.0.insert(state.name.clone());
        }
        ast::walk_target(self, target);
    }
}

struct References<'a> {
    file: &'a File,
    ctx: &'a ValidationContext,
    known_flows: &'a BTreeSet<&'a str>,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl Visitor for References<'_> {
    fn visit_match(&mut self, block: &MatchBlock) {
        for extra in block.defaults().skip(1) {
            self.diagnostics.push(Diagnostic::error(
                codes::DUPLICATE_DEFAULT,
                "match block has more than one :default case",
                extra.range,
            ));
        }
        ast::walk_match(self, block);
    }

    fn visit_target(&mut self, target: &TargetReference) {
        if let TargetReference::Flow(invocation) = target {
            let name = invocation.flow.as_str();
            if !self.known_flows.contains(name) && !self.ctx.imported_flow(name) {
                self.diagnostics.push(unresolved_flow(name, invocation.range));
            }
        }
        ast::walk_target(self, target);
    }

    fn visit_spread(&mut self, spread: &SpreadDirective) {
        if find_spread_target(self.file, &self.ctx.imports, &spread.name).is_none() {
            self.diagnostics.push(Diagnostic::error(
                codes::UNRESOLVED_SPREAD,
                format!("spread refers to unknown section '{}'", spread.name),
                spread.range,
            ));
        }
    }
}

/// Also raised by the CSM builder for the same invocation; the two collapse
/// into one diagnostic.
pub(crate) fn unresolved_flow(name: &str, range: Range) -> Diagnostic {
    Diagnostic::error(
        codes::UNRESOLVED_FLOW,
        format!("unknown flow '{}'", name),
        range,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass1_canonicalize::{parse_document, parse_ok};
    use crate::cancel::CancellationToken;
    use crate::options::CompileOptions;

    fn run(src: &str) -> Vec<Diagnostic> {
        SemanticValidator
            .validate(&parse_ok(src), &ValidationContext::default())
            .unwrap()
            .diagnostics
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().filter_map(|d| d.code()).collect()
    }

    #[test]
    fn two_defaults_give_exactly_one_error() {
        let src = "flow F\n  start: A\n  on A\n    match @x\n      \"a\" -> A\n      :default -> A\n      :default -> A\n";
        let parsed = parse_document(src, &CompileOptions::default(), &CancellationToken::new()).unwrap();
        assert!(parsed.diagnostics.is_empty());
        let diags = run(src);
        assert_eq!(codes_of(&diags), vec![codes::DUPLICATE_DEFAULT]);
    }

    #[test]
    fn duplicate_identifiers() {
        let diags = run(
            "agent A\n  flow F\n    start: S\n    on S\n      -> S\n    on S\n      -> :end\n  flow F\n    start: T\n    T\n  messages M\n    text Hi \"a\"\n    text Hi \"b\"\n",
        );
        let codes = codes_of(&diags);
        assert!(codes.contains(&codes::DUPLICATE_FLOW));
        assert!(codes.contains(&codes::DUPLICATE_STATE));
        assert!(codes.contains(&codes::DUPLICATE_MESSAGE));
        assert!(diags.iter().all(|d| d.related.len() == 1));
    }

    #[test]
    fn unresolved_references() {
        let diags = run(
            "agent A\n  ...Missing\n  flow F\n    start: S\n    on S\n      -> start Ghost\n        on :end -> start Phantom\n",
        );
        assert_eq!(
            codes_of(&diags),
            vec![codes::UNRESOLVED_SPREAD, codes::UNRESOLVED_FLOW, codes::UNRESOLVED_FLOW]
        );
    }

    #[test]
    fn unreferenced_state_is_a_warning() {
        let diags = run("flow F\n  start: A\n  on A\n    -> B\n  on B\n    -> :end\n  on Lonely\n    -> A\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code(), Some(codes::UNREFERENCED_STATE));
        assert!(diags[0].message.contains("Lonely"));
        assert!(!diags[0].is_error());
    }

    #[test]
    fn handler_targets_count_as_references() {
        let diags = run(
            "flow F\n  start: A\n  on A\n    -> start G\n      on :end -> Back\n  on Back\n    -> :end\nflow G\n  start: X\n  X -> :end\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }
}
