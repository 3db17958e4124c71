//! Message catalogue.
//!
//! Shorthand forms (`text Id "…"`, `richCard Id "Title" :size`,
//! `carousel Id`, `file Id <url …>`) and the full `message Id` block all
//! normalize to one [`MessageContent`] keyed by message id.

use super::{effective_attributes, scalar_text};
use crate::ast::{File, Section, ValueKind};
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{codes, Diagnostic, Outcome};
use crate::pass2_validate::MESSAGE_KINDS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Messages {
    pub messages: BTreeMap<String, MessageContent>,
}

impl Messages {
    pub fn get(&self, id: &str) -> Option<&MessageContent> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Text,
    RichCard,
    Carousel,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_card: Option<RichCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carousel: Option<Carousel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
}

impl RichCard {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.media_url.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Carousel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub cards: Vec<RichCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Suggestion {
    #[serde(rename_all = "camelCase")]
    Reply { text: String, postback_data: String },
    #[serde(rename_all = "camelCase")]
    Action {
        text: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        postback_data: String,
    },
}

/// Postback data derived from a suggestion's label: lowercase, with every
/// run of other characters turned into `_`.
pub fn postback_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_owned()
}

/// Messages of every `messages` section. Imported catalogues come first so
/// local definitions replace them; within one document the first
/// definition of an id wins. Only the local document's problems are
/// reported.
pub fn extract_messages(
    file: &File,
    imports: &[Arc<File>],
    cancel: &CancellationToken,
) -> Result<Outcome<Messages>, Cancelled> {
    let mut messages = Messages::default();
    for import in imports {
        let (imported, _) = collect(import, imports, cancel)?.into_parts();
        messages.messages.extend(imported.messages);
    }
    let (local, diagnostics) = collect(file, imports, cancel)?.into_parts();
    messages.messages.extend(local.messages);
    debug!(messages = messages.len(), "extracted messages");
    Ok(Outcome::new(messages, diagnostics))
}

fn collect(
    file: &File,
    imports: &[Arc<File>],
    cancel: &CancellationToken,
) -> Result<Outcome<Messages>, Cancelled> {
    let mut messages = Messages::default();
    let mut diagnostics = Vec::new();
    let definitions = file
        .sections_of("messages")
        .flat_map(|m| m.subsections.iter())
        .filter(|s| MESSAGE_KINDS.contains(&s.kind.as_str()));
    for section in definitions {
        cancel.check()?;
        let Some(id) = section.name.clone() else {
            diagnostics.push(Diagnostic::error(
                codes::INVALID_MESSAGE,
                format!("{} message has no identifier", section.kind),
                section.range,
            ));
            continue;
        };
        match message(section, file, imports) {
            Some(content) => {
                messages.messages.entry(id).or_insert(content);
            }
            None => diagnostics.push(Diagnostic::error(
                codes::INVALID_MESSAGE,
                format!("message '{}' has no content", id),
                section.name_or_header(),
            )),
        }
    }
    Ok(Outcome::new(messages, diagnostics))
}

fn message(section: &Section, file: &File, imports: &[Arc<File>]) -> Option<MessageContent> {
    let mut content = MessageContent {
        kind: MessageKind::Text,
        text: None,
        rich_card: None,
        carousel: None,
        file_url: None,
        suggestions: suggestions(section),
        traffic_type: None,
    };
    let attributes = effective_attributes(section, file, imports);
    let attr = |key: &str| {
        attributes
            .iter()
            .rev()
            .find(|a| a.key == key)
            .and_then(|a| scalar_text(&a.value))
    };
    content.traffic_type = attr("trafficType").or_else(|| attr("messageTrafficType"));

    match section.kind.as_str() {
        "text" => {
            content.text = first_text(section).or_else(|| attr("text"));
            if content.traffic_type.is_none() {
                content.traffic_type = first_atom(section);
            }
        }
        "richCard" => {
            content.kind = MessageKind::RichCard;
            content.rich_card = Some(rich_card(section, file, imports)).filter(|c| !c.is_empty());
        }
        "carousel" => {
            content.kind = MessageKind::Carousel;
            let cards: Vec<RichCard> = section
                .subsections_of("richCard")
                .map(|c| rich_card(c, file, imports))
                .filter(|c| !c.is_empty())
                .collect();
            if !cards.is_empty() {
                content.carousel = Some(Carousel {
                    size: first_atom(section).or_else(|| attr("size")),
                    cards,
                });
            }
        }
        "file" => {
            content.kind = MessageKind::File;
            content.file_url = first_text(section).or_else(|| attr("fileUrl"));
        }
        _ => {
            content.text = attr("text");
            content.file_url = attr("fileUrl");
            let card = section
                .subsections_of("richCard")
                .next()
                .map(|c| rich_card(c, file, imports))
                .filter(|c| !c.is_empty());
            if card.is_some() {
                content.kind = MessageKind::RichCard;
                content.rich_card = card;
            } else if content.text.is_none() && content.file_url.is_some() {
                content.kind = MessageKind::File;
            }
        }
    }

    let has_content = content.text.is_some()
        || content.rich_card.is_some()
        || content.carousel.is_some()
        || content.file_url.is_some();
    has_content.then_some(content)
}

fn rich_card(section: &Section, file: &File, imports: &[Arc<File>]) -> RichCard {
    let attributes = effective_attributes(section, file, imports);
    let attr = |key: &str| {
        attributes
            .iter()
            .rev()
            .find(|a| a.key == key)
            .and_then(|a| scalar_text(&a.value))
    };
    RichCard {
        title: first_text(section).or_else(|| attr("title")),
        description: attr("description"),
        media_url: attr("media").or_else(|| attr("mediaUrl")),
        size: first_atom(section).or_else(|| attr("size")),
        suggestions: suggestions(section),
    }
}

/// First string or type-tag header parameter.
fn first_text(section: &Section) -> Option<String> {
    section.parameters.iter().find_map(|p| match &p.kind {
        ValueKind::String(s) => Some(s.clone()),
        ValueKind::TypeTag { value, .. } => Some(value.clone()),
        _ => None,
    })
}

fn first_atom(section: &Section) -> Option<String> {
    section.parameters.iter().find_map(|p| match &p.kind {
        ValueKind::Atom(a) => Some(a.clone()),
        _ => None,
    })
}

/// `reply "Label"` and `action "Label" <kind value>` entries of a
/// `suggestions` block.
fn suggestions(section: &Section) -> Vec<Suggestion> {
    section
        .subsections_of("suggestions")
        .flat_map(|s| s.subsections.iter())
        .filter_map(suggestion)
        .collect()
}

fn suggestion(section: &Section) -> Option<Suggestion> {
    let text = first_text(section)?;
    let postback = section
        .attribute("postbackData")
        .and_then(|a| scalar_text(&a.value))
        .unwrap_or_else(|| postback_slug(&text));
    match section.kind.as_str() {
        "reply" => Some(Suggestion::Reply {
            text,
            postback_data: postback,
        }),
        "action" => {
            let (action, value) = section
                .parameters
                .iter()
                .find_map(|p| match &p.kind {
                    ValueKind::TypeTag { name, value, .. } => Some((name.clone(), Some(value.clone()))),
                    ValueKind::Atom(a) | ValueKind::Identifier(a) => Some((a.clone(), None)),
                    _ => None,
                })
                .unwrap_or_else(|| ("open".to_owned(), None));
            Some(Suggestion::Action {
                text,
                action,
                value,
                postback_data: postback,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass1_canonicalize::parse_ok;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn extract(src: &str) -> Outcome<Messages> {
        extract_messages(&parse_ok(src), &[], &CancellationToken::new()).unwrap()
    }

    #[test]
    fn shorthand_and_full_forms_normalize() {
        let out = extract(
            "messages Messages\n  text Welcome \"Hello!\"\n    suggestions\n      reply \"Order Now\"\n      action \"Visit\" <url \"https://example.com\">\n  richCard Promo \"Title\" :medium\n    description: \"Big savings\"\n  message Receipt\n    text: \"Thanks!\"\n",
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let messages = out.value;
        assert_eq!(messages.len(), 3);

        let welcome = messages.get("Welcome").unwrap();
        assert_eq!(welcome.kind, MessageKind::Text);
        assert_eq!(welcome.text.as_deref(), Some("Hello!"));
        assert_eq!(
            welcome.suggestions,
            vec![
                Suggestion::Reply {
                    text: "Order Now".into(),
                    postback_data: "order_now".into()
                },
                Suggestion::Action {
                    text: "Visit".into(),
                    action: "url".into(),
                    value: Some("https://example.com".into()),
                    postback_data: "visit".into()
                },
            ]
        );

        let promo = messages.get("Promo").unwrap();
        let card = promo.rich_card.as_ref().unwrap();
        assert_eq!(card.title.as_deref(), Some("Title"));
        assert_eq!(card.size.as_deref(), Some("medium"));
        assert_eq!(card.description.as_deref(), Some("Big savings"));

        assert_eq!(messages.get("Receipt").unwrap().text.as_deref(), Some("Thanks!"));
    }

    #[test]
    fn empty_message_is_skipped_with_diagnostic() {
        let out = extract("messages M\n  text Empty\n  text Ok \"fine\"\n");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code(), Some(codes::INVALID_MESSAGE));
        assert!(!out.value.contains("Empty"));
        assert!(out.value.contains("Ok"));
    }

    #[test]
    fn carousel_collects_cards() {
        let out = extract(
            "messages M\n  carousel Deals :small\n    richCard \"One\"\n    richCard \"Two\"\n      description: \"second\"\n",
        );
        let carousel = out.value.get("Deals").unwrap().carousel.clone().unwrap();
        assert_eq!(carousel.size.as_deref(), Some("small"));
        assert_eq!(carousel.cards.len(), 2);
    }

    #[test]
    fn local_messages_override_imported_ones() {
        let lib = Arc::new(parse_ok("messages Lib\n  text Hi \"imported\"\n  text Bye \"ciao\"\n"));
        let file = parse_ok("messages M\n  text Hi \"local\"\n");
        let messages = extract_messages(&file, &[lib], &CancellationToken::new())
            .unwrap()
            .value;
        assert_eq!(messages.get("Hi").unwrap().text.as_deref(), Some("local"));
        assert!(messages.contains("Bye"));
    }

    #[test]
    fn serialized_shape() {
        let content = MessageContent {
            kind: MessageKind::Text,
            text: Some("Hi".into()),
            rich_card: None,
            carousel: None,
            file_url: None,
            suggestions: vec![Suggestion::Reply {
                text: "Yes".into(),
                postback_data: "yes".into(),
            }],
            traffic_type: None,
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({
                "kind": "text",
                "text": "Hi",
                "suggestions": [{"type": "reply", "text": "Yes", "postbackData": "yes"}]
            })
        );
    }

    #[test]
    fn slug() {
        assert_eq!(postback_slug("  Order Now! "), "order_now");
        assert_eq!(postback_slug("Café au lait"), "café_au_lait");
    }
}
