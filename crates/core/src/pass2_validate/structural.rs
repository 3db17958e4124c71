//! Well-formedness: required sections and attributes are present and the
//! document parsed cleanly.

use super::{find_spread_target, ValidationContext, ValidationReport, Validator};
use crate::ast::{self, ErrorNode, File, Section, Statement, Visitor};
use crate::cancel::Cancelled;
use crate::diagnostic::{codes, Diagnostic, Range};

pub const DISPLAY_NAME: &str = "displayName";

pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn name(&self) -> &str {
        "structural"
    }

    fn validate(&self, file: &File, ctx: &ValidationContext) -> Result<ValidationReport, Cancelled> {
        let mut diagnostics = Vec::new();

        let agents: Vec<&Section> = file.sections.iter().filter(|s| s.kind == "agent").collect();
        match agents.split_first() {
            None => diagnostics.push(Diagnostic::error(
                codes::MISSING_AGENT,
                "document has no agent section",
                Range::point(file.range.start),
            )),
            Some((first, rest)) => {
                if !has_display_name(first, file, ctx) {
                    diagnostics.push(missing_display_name(first));
                }
                for extra in rest {
                    diagnostics.push(
                        Diagnostic::error(
                            codes::DUPLICATE_AGENT,
                            "a document defines exactly one agent",
                            extra.name_or_header(),
                        )
                        .with_related("first agent defined here", first.name_or_header()),
                    );
                }
            }
        }

        let mut flows = 0;
        for flow in file.sections_of("flow") {
            ctx.cancel.check()?;
            flows += 1;
            let name = flow.name.as_deref().unwrap_or("<unnamed>");
            if flow.attribute("start").is_none() {
                diagnostics.push(Diagnostic::error(
                    codes::MISSING_FLOW_START,
                    format!("flow '{}' has no 'start' attribute", name),
                    flow.range,
                ));
            }
            if !declares_states(flow) {
                diagnostics.push(Diagnostic::error(
                    codes::EMPTY_FLOW,
                    format!("flow '{}' has no states", name),
                    flow.range,
                ));
            }
        }
        if flows == 0 {
            if let Some(agent) = agents.first() {
                diagnostics.push(Diagnostic::warning(
                    codes::MISSING_FLOWS,
                    "agent has no flows",
                    agent.name_or_header(),
                ));
            }
        }

        let mut errors = ErrorCollector(Vec::new());
        ast::walk_file(&mut errors, file);
        diagnostics.extend(errors.0.into_iter().map(|e| {
            Diagnostic::error(
                codes::SYNTAX_ERROR_NODE,
                format!("unparsed input: {}", e.message),
                e.range,
            )
        }));

        Ok(ValidationReport::from_diagnostics(diagnostics))
    }
}

/// Shared with agent extraction so both report the same problem the same
/// way (and the duplicate is dropped).
pub(crate) fn missing_display_name(agent: &Section) -> Diagnostic {
    Diagnostic::error(
        codes::MISSING_DISPLAY_NAME,
        format!(
            "agent '{}' is missing required attribute '{}'",
            agent.name.as_deref().unwrap_or("<unnamed>"),
            DISPLAY_NAME
        ),
        agent.range,
    )
}

fn has_display_name(agent: &Section, file: &File, ctx: &ValidationContext) -> bool {
    agent.attribute(DISPLAY_NAME).is_some()
        || agent.statements.iter().any(|s| match s {
            Statement::Spread(spread) => find_spread_target(file, &ctx.imports, &spread.name)
                .is_some_and(|target| target.attribute(DISPLAY_NAME).is_some()),
            _ => false,
        })
}

fn declares_states(flow: &Section) -> bool {
    flow.subsections_of("on").next().is_some()
        || flow
            .statements
            .iter()
            .any(|s| matches!(s, Statement::FlowRule(_) | Statement::StateReference(_)))
}

struct ErrorCollector(Vec<ErrorNode>);

impl Visitor for ErrorCollector {
    fn visit_error(&mut self, error: &ErrorNode) {
        self.0.push(error.clone());
    }
}
