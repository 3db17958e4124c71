//! Interchange JSON into the pieces code generation needs.
//!
//! Codegen reads the interchange document, not the compiler's internal
//! types. The machine is deserialized through `rcl-csm`, so a document with
//! dangling references is rejected before anything is emitted.

use rcl_csm::Machine;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// The bundle JSON is missing fields or fails machine validation.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize bundle: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CodegenFlow {
    pub id: String,
    pub states: Vec<String>,
}

/// The parts of an interchange bundle, ready for emission.
#[derive(Debug, Clone)]
pub struct CodegenBundle {
    /// Agent name; also the machine id.
    pub id: String,
    pub version: String,
    pub agent: Value,
    /// The message map (`bundle.messages.messages`).
    pub messages: serde_json::Map<String, Value>,
    pub machine: Value,
    pub initial_flow: String,
    pub flows: Vec<CodegenFlow>,
}

impl CodegenBundle {
    pub fn from_interchange(bundle: &Value) -> Result<Self, CodegenError> {
        let version = field(bundle, &["version"])?
            .as_str()
            .ok_or_else(|| CodegenError::InvalidBundle("'version' must be a string".into()))?
            .to_owned();
        let id = field(bundle, &["csm", "id"])?
            .as_str()
            .ok_or_else(|| CodegenError::InvalidBundle("'csm.id' must be a string".into()))?
            .to_owned();
        let agent = field(bundle, &["bundle", "agent"])?.clone();
        let messages = field(bundle, &["bundle", "messages", "messages"])?
            .as_object()
            .cloned()
            .ok_or_else(|| {
                CodegenError::InvalidBundle("'bundle.messages.messages' must be an object".into())
            })?;

        let machine_json = field(bundle, &["csm", "machine"])?.clone();
        let machine: Machine = serde_json::from_value(machine_json.clone())
            .map_err(|e| CodegenError::InvalidBundle(format!("csm.machine: {}", e)))?;
        let flows = machine
            .flows()
            .values()
            .map(|f| CodegenFlow {
                id: f.id().to_string(),
                states: f.states().keys().map(|s| s.to_string()).collect(),
            })
            .collect();

        Ok(CodegenBundle {
            id,
            version,
            agent,
            messages,
            initial_flow: machine.initial_flow().to_string(),
            machine: machine_json,
            flows,
        })
    }

    /// Message ids in sorted order.
    pub fn message_ids(&self) -> Vec<&str> {
        self.messages.keys().map(String::as_str).collect()
    }
}

fn field<'a>(bundle: &'a Value, path: &[&str]) -> Result<&'a Value, CodegenError> {
    path.iter()
        .try_fold(bundle, |v, key| v.get(key))
        .ok_or_else(|| CodegenError::InvalidBundle(format!("missing '{}'", path.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": "1.0.0",
            "bundle": {
                "agent": {"name": "Coffee", "displayName": "Quick Coffee"},
                "messages": {"messages": {
                    "Welcome": {"kind": "text", "text": "Hello!"}
                }}
            },
            "csm": {
                "id": "Coffee",
                "machine": {
                    "id": "Coffee",
                    "initialFlow": "Order",
                    "flows": {
                        "Order": {
                            "id": "Order",
                            "start": "Welcome",
                            "states": {
                                "Welcome": {"transitions": [{"target": {"type": "state", "state": "Done"}}]},
                                "Done": {"transitions": [{"target": {"type": "terminal", "result": "end"}}]}
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn parses_sample_bundle() {
        let bundle = CodegenBundle::from_interchange(&sample()).unwrap();
        assert_eq!(bundle.id, "Coffee");
        assert_eq!(bundle.initial_flow, "Order");
        assert_eq!(bundle.message_ids(), vec!["Welcome"]);
        assert_eq!(bundle.flows.len(), 1);
        assert_eq!(bundle.flows[0].states, vec!["Done", "Welcome"]);
    }

    #[test]
    fn missing_fields_are_named() {
        let mut value = sample();
        value["bundle"].as_object_mut().unwrap().remove("messages");
        let err = CodegenBundle::from_interchange(&value).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid bundle: missing 'bundle.messages.messages'"
        );
    }

    #[test]
    fn dangling_machine_is_rejected() {
        let mut value = sample();
        value["csm"]["machine"]["flows"]["Order"]["start"] = json!("Nowhere");
        assert!(matches!(
            CodegenBundle::from_interchange(&value),
            Err(CodegenError::InvalidBundle(_))
        ));
    }
}
