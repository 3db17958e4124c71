//! ES module / TypeScript module emission.
//!
//! The generated module exports the agent config, the message map and the
//! machine as literals, plus a `bundle` object in the runtime
//! `{ agent, messages: { messages } }` shape. The TypeScript form adds
//! string-literal unions for flow, state and message ids.

use crate::bundle::{CodegenBundle, CodegenError};
use serde_json::Value;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModuleFormat {
    #[default]
    Esm,
    TypeScript,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    pub format: ModuleFormat,
}

pub fn generate_module(bundle: &Value, config: &ModuleConfig) -> Result<String, CodegenError> {
    let parsed = CodegenBundle::from_interchange(bundle)?;
    emit(&parsed, config.format)
}

pub(crate) fn emit(bundle: &CodegenBundle, format: ModuleFormat) -> Result<String, CodegenError> {
    let ts = format == ModuleFormat::TypeScript;
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "// Generated by rcl from agent {}. Do not edit.\n",
        quote(&bundle.id)?
    );

    if ts {
        emit_types(&mut out, bundle)?;
    }

    let konst = |name: &str, ty: &str| {
        if ts {
            format!("export const {}: {} = ", name, ty)
        } else {
            format!("export const {} = ", name)
        }
    };
    let _ = writeln!(out, "{}{};", konst("version", "string"), quote(&bundle.version)?);
    let _ = writeln!(out, "{}{};", konst("initialFlow", "FlowId"), quote(&bundle.initial_flow)?);
    let _ = writeln!(
        out,
        "\n{}{};",
        konst("agent", "Record<string, unknown>"),
        serde_json::to_string_pretty(&bundle.agent)?
    );
    let _ = writeln!(
        out,
        "\n{}{};",
        konst("messages", "Record<MessageId, unknown>"),
        serde_json::to_string_pretty(&bundle.messages)?
    );
    let _ = writeln!(
        out,
        "\n{}{};",
        konst("machine", "Record<string, unknown>"),
        serde_json::to_string_pretty(&bundle.machine)?
    );
    let _ = writeln!(out, "\nexport const bundle = {{ agent, messages: {{ messages }} }};");
    let _ = writeln!(out, "\nexport default {{ agent, messages, machine }};");
    Ok(out)
}

fn emit_types(out: &mut String, bundle: &CodegenBundle) -> Result<(), CodegenError> {
    let flows: Vec<&str> = bundle.flows.iter().map(|f| f.id.as_str()).collect();
    let _ = writeln!(out, "export type FlowId = {};", union(&flows)?);
    let _ = writeln!(out, "export type MessageId = {};", union(&bundle.message_ids())?);
    let _ = writeln!(out, "\nexport interface FlowStates {{");
    for flow in &bundle.flows {
        let states: Vec<&str> = flow.states.iter().map(String::as_str).collect();
        let _ = writeln!(out, "  {}: {};", quote(&flow.id)?, union(&states)?);
    }
    let _ = writeln!(out, "}}\n");
    Ok(())
}

fn quote(s: &str) -> Result<String, CodegenError> {
    Ok(serde_json::to_string(s)?)
}

fn union(ids: &[&str]) -> Result<String, CodegenError> {
    if ids.is_empty() {
        return Ok("never".to_owned());
    }
    let quoted = ids.iter().map(|id| quote(id)).collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": "1.0.0",
            "bundle": {
                "agent": {"name": "Coffee"},
                "messages": {"messages": {"Welcome": {"kind": "text", "text": "Hi"}, "Bye": {"kind": "text", "text": "Ciao"}}}
            },
            "csm": {"id": "Coffee", "machine": {
                "id": "Coffee",
                "initialFlow": "Order",
                "flows": {"Order": {"id": "Order", "start": "A", "states": {
                    "A": {"transitions": [{"target": {"type": "terminal", "result": "end"}}]}
                }}}
            }}
        })
    }

    #[test]
    fn esm_exports_literals() {
        let src = generate_module(&sample(), &ModuleConfig::default()).unwrap();
        assert!(src.starts_with("// Generated by rcl from agent \"Coffee\"."));
        assert!(src.contains("export const version = \"1.0.0\";"));
        assert!(src.contains("export const initialFlow = \"Order\";"));
        assert!(src.contains("export const agent = {\n  \"name\": \"Coffee\"\n};"));
        assert!(src.contains("export default { agent, messages, machine };"));
        assert!(!src.contains("export type"));
    }

    #[test]
    fn typescript_adds_id_unions() {
        let config = ModuleConfig {
            format: ModuleFormat::TypeScript,
        };
        let src = generate_module(&sample(), &config).unwrap();
        assert!(src.contains("export type FlowId = \"Order\";"));
        assert!(src.contains("export type MessageId = \"Bye\" | \"Welcome\";"));
        assert!(src.contains("  \"Order\": \"A\";"));
        assert!(src.contains("export const initialFlow: FlowId = \"Order\";"));
        assert!(src.contains("export const messages: Record<MessageId, unknown> = {"));
    }

    #[test]
    fn empty_catalogue_is_never() {
        let mut value = sample();
        value["bundle"]["messages"]["messages"] = json!({});
        let config = ModuleConfig {
            format: ModuleFormat::TypeScript,
        };
        let src = generate_module(&value, &config).unwrap();
        assert!(src.contains("export type MessageId = never;"));
    }
}
