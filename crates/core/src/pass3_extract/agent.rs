//! Agent configuration record.

use super::{effective_attributes, scalar_text};
use crate::ast::{Attribute, File};
use crate::diagnostic::{Diagnostic, Outcome};
use crate::pass2_validate::missing_display_name;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    /// Flow the conversation starts in; the first flow when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hero_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    /// Everything else from the agent and its `config` section.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Json>,
    /// The `defaults` section, verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, Json>,
}

impl AgentConfig {
    fn apply(&mut self, attribute: &Attribute) {
        let slot = match attribute.key.as_str() {
            "displayName" => &mut self.display_name,
            "description" => &mut self.description,
            "brandName" => &mut self.brand_name,
            "start" => &mut self.start_flow,
            "phoneNumber" | "phone" => &mut self.phone_number,
            "email" => &mut self.email,
            "website" => &mut self.website,
            "color" => &mut self.color,
            "logoUri" => &mut self.logo_uri,
            "heroUri" => &mut self.hero_uri,
            "privacy" => &mut self.privacy,
            "terms" | "termsConditions" => &mut self.terms,
            _ => {
                self.config
                    .insert(attribute.key.clone(), attribute.value.to_json());
                return;
            }
        };
        match scalar_text(&attribute.value) {
            Some(text) => *slot = Some(text),
            None => {
                self.config
                    .insert(attribute.key.clone(), attribute.value.to_json());
            }
        }
    }
}

/// The first top-level agent section as a configuration record. A missing
/// `displayName` is reported but the partial record is still returned.
pub fn extract_agent(file: &File, imports: &[Arc<File>]) -> Outcome<Option<AgentConfig>> {
    let Some(agent) = file.sections.iter().find(|s| s.kind == "agent") else {
        return Outcome::ok(None);
    };
    let mut config = AgentConfig {
        name: agent.name.clone().unwrap_or_default(),
        ..AgentConfig::default()
    };
    for attribute in effective_attributes(agent, file, imports) {
        config.apply(attribute);
    }
    for section in agent.subsections_of("config") {
        for attribute in effective_attributes(section, file, imports) {
            config.apply(attribute);
        }
    }
    for section in agent.subsections_of("defaults") {
        for attribute in effective_attributes(section, file, imports) {
            config
                .defaults
                .insert(attribute.key.clone(), attribute.value.to_json());
        }
    }

    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    if config.display_name.is_none() {
        diagnostics.push(missing_display_name(agent));
    }
    Outcome::new(Some(config), diagnostics)
}
