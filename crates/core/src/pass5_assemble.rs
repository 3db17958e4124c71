//! Pass 5: bundle assembly and interchange JSON.
//!
//! Assembly combines the outputs of extraction and lowering without
//! checking them again. The interchange form is
//!
//! ```json
//! { "version": "1.0.0",
//!   "bundle": { "agent": {..}, "messages": { "messages": {..} } },
//!   "csm": { "id": "<agent name>", "meta": {..}, "machine": {..} } }
//! ```

use crate::pass3_extract::{AgentConfig, Messages};
use crate::RCL_BUNDLE_VERSION;
use rcl_csm::{Agent, AgentId, AgentMeta, Machine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The runtime half of a bundle: configuration plus message catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBundle {
    pub agent: AgentConfig,
    pub messages: Messages,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    bundle: AgentBundle,
    csm: Agent,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleInput {
    pub agent: Option<AgentConfig>,
    pub messages: Option<Messages>,
    pub machine: Option<Machine>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("cannot assemble a bundle without an agent configuration")]
    MissingAgent,
    #[error("cannot assemble a bundle without a state machine")]
    MissingMachine,
    #[error("unsupported bundle version '{0}' (expected {expected})", expected = RCL_BUNDLE_VERSION)]
    UnsupportedVersion(String),
    #[error("invalid interchange document: {0}")]
    InvalidInterchange(String),
}

/// Missing messages assemble as an empty catalogue; a missing agent or
/// machine is fatal.
pub fn assemble(input: AssembleInput) -> Result<Bundle, AssembleError> {
    let agent = input.agent.ok_or(AssembleError::MissingAgent)?;
    let machine = input.machine.ok_or(AssembleError::MissingMachine)?;
    let meta = AgentMeta {
        name: Some(agent.name.clone()),
        display_name: agent.display_name.clone(),
        description: agent.description.clone(),
    };
    Ok(Bundle {
        csm: Agent::new(AgentId::new(agent.name.as_str()), meta, machine),
        bundle: AgentBundle {
            agent,
            messages: input.messages.unwrap_or_default(),
        },
    })
}

impl Bundle {
    pub fn agent(&self) -> &AgentConfig {
        &self.bundle.agent
    }

    pub fn messages(&self) -> &Messages {
        &self.bundle.messages
    }

    pub fn machine(&self) -> &Machine {
        self.csm.machine()
    }

    /// The compiled agent: identity, metadata and machine.
    pub fn csm(&self) -> &Agent {
        &self.csm
    }

    pub fn agent_bundle(&self) -> &AgentBundle {
        &self.bundle
    }

    pub fn into_parts(self) -> (AgentConfig, Messages, Machine) {
        (self.bundle.agent, self.bundle.messages, self.csm.into_machine())
    }

    pub fn to_interchange(&self) -> Value {
        json!({
            "version": RCL_BUNDLE_VERSION,
            "bundle": self.bundle,
            "csm": self.csm,
        })
    }

    /// Parse an interchange document. The machine is re-validated on the
    /// way in, so a dangling reference is rejected here.
    pub fn from_interchange(value: &Value) -> Result<Bundle, AssembleError> {
        #[derive(Deserialize)]
        struct Interchange {
            bundle: AgentBundle,
            csm: Agent,
        }

        let version = value
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| AssembleError::InvalidInterchange("missing 'version'".into()))?;
        if major(version) != major(RCL_BUNDLE_VERSION) {
            return Err(AssembleError::UnsupportedVersion(version.to_owned()));
        }
        let doc: Interchange = serde_json::from_value(value.clone())
            .map_err(|e| AssembleError::InvalidInterchange(e.to_string()))?;
        Ok(Bundle {
            bundle: doc.bundle,
            csm: doc.csm,
        })
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rcl_csm::{Flow, FlowId, FlowResult, MachineId, State, StateId, StateMeta, Transition, TransitionTarget};

    fn machine() -> Machine {
        let state = State::new(
            StateId::new("A"),
            StateMeta::default(),
            vec![Transition::unconditional(TransitionTarget::terminal(FlowResult::End))],
        );
        let flow = Flow::new(FlowId::new("F"), StateId::new("A"), vec![state]).unwrap();
        Machine::new(MachineId::new("m"), FlowId::new("F"), vec![flow]).unwrap()
    }

    fn agent() -> AgentConfig {
        AgentConfig {
            name: "Coffee".into(),
            display_name: Some("Coffee".into()),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn missing_agent_is_fatal() {
        let err = assemble(AssembleInput {
            machine: Some(machine()),
            ..AssembleInput::default()
        })
        .unwrap_err();
        assert_eq!(err, AssembleError::MissingAgent);
    }

    #[test]
    fn missing_machine_is_fatal() {
        let err = assemble(AssembleInput {
            agent: Some(agent()),
            ..AssembleInput::default()
        })
        .unwrap_err();
        assert_eq!(err, AssembleError::MissingMachine);
    }

    #[test]
    fn interchange_shape() {
        let bundle = assemble(AssembleInput {
            agent: Some(agent()),
            messages: None,
            machine: Some(machine()),
        })
        .unwrap();
        let value = bundle.to_interchange();
        assert_eq!(value["version"], json!(RCL_BUNDLE_VERSION));
        assert_eq!(value["bundle"]["agent"]["displayName"], json!("Coffee"));
        assert_eq!(value["bundle"]["messages"], json!({"messages": {}}));
        assert_eq!(value["csm"]["id"], json!("Coffee"));
        assert_eq!(value["csm"]["meta"]["displayName"], json!("Coffee"));
        assert_eq!(bundle.csm().id().as_str(), "Coffee");
        assert_eq!(value["csm"]["machine"]["initialFlow"], json!("F"));
    }

    #[test]
    fn parts_survive_the_interchange_form() {
        let bundle = assemble(AssembleInput {
            agent: Some(agent()),
            messages: Some(Messages::default()),
            machine: Some(machine()),
        })
        .unwrap();
        let back = Bundle::from_interchange(&bundle.to_interchange()).unwrap();
        assert_eq!(back.into_parts(), (agent(), Messages::default(), machine()));
    }

    #[test]
    fn version_error_names_both_versions() {
        let err = AssembleError::UnsupportedVersion("0.9.0".into());
        assert_eq!(
            err.to_string(),
            format!("unsupported bundle version '0.9.0' (expected {})", RCL_BUNDLE_VERSION)
        );
    }

    #[test]
    fn rejects_other_major_versions_and_dangling_machines() {
        let mut value = assemble(AssembleInput {
            agent: Some(agent()),
            messages: None,
            machine: Some(machine()),
        })
        .unwrap()
        .to_interchange();

        let mut old = value.clone();
        old["version"] = json!("0.9.0");
        assert_eq!(
            Bundle::from_interchange(&old),
            Err(AssembleError::UnsupportedVersion("0.9.0".into()))
        );

        value["csm"]["machine"]["initialFlow"] = json!("Nope");
        assert!(matches!(
            Bundle::from_interchange(&value),
            Err(AssembleError::InvalidInterchange(_))
        ));
    }
}
