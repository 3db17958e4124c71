//! Pass 3: extraction.
//!
//! Three independent walks over the validated AST produce the inputs of
//! the later passes: the agent configuration record, the message catalogue
//! and the per-flow rule lists. Each walk is idempotent and best-effort:
//! a malformed unit is skipped with a diagnostic and the rest is kept.

mod agent;
mod flows;
mod messages;

pub use agent::{extract_agent, AgentConfig};
pub use flows::{extract_flows, DeclaredState, ExtractedFlow, FlowRule, RuleStatement};
pub use messages::{
    extract_messages, Carousel, MessageContent, MessageKind, Messages, RichCard, Suggestion,
};

use crate::ast::{Attribute, File, Section, Statement, Value, ValueKind};
use crate::pass2_validate::find_spread_target;
use std::sync::Arc;

/// Attributes of `section` with `...Name` spreads inlined in front of the
/// local ones. Later entries override earlier ones when applied in order.
fn effective_attributes<'a>(
    section: &'a Section,
    file: &'a File,
    imports: &'a [Arc<File>],
) -> Vec<&'a Attribute> {
    let mut out = Vec::new();
    for statement in &section.statements {
        if let Statement::Spread(spread) = statement {
            if let Some(target) = find_spread_target(file, imports, &spread.name) {
                out.extend(target.attributes.iter());
            }
        }
    }
    out.extend(section.attributes.iter());
    out
}

/// Textual form of a scalar value: strings, identifiers, atoms and type tag
/// values as-is, numbers as written.
fn scalar_text(value: &Value) -> Option<String> {
    match &value.kind {
        ValueKind::Number(n) => Some(n.clone()),
        ValueKind::Boolean(b) => Some(b.to_string()),
        _ => value.as_str().map(str::to_owned),
    }
}
