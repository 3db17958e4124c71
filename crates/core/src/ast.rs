//! Canonical, parser-independent AST.
//!
//! Produced by [`crate::pass1_canonicalize`] and read by every later stage.
//! Every node carries the source [`Range`] it was built from. ERROR nodes of
//! the syntax tree survive as explicit [`ErrorNode`]s so later stages can
//! decide for themselves whether to continue.

use crate::diagnostic::Range;
use serde_json::{Map, Number, Value as Json};

pub use rcl_csm::FlowResult as ResultKind;

// ──────────────────────────────────────────────
// File, imports, sections
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub imports: Vec<ImportStatement>,
    pub sections: Vec<Section>,
    /// ERROR nodes found at the top level.
    pub errors: Vec<ErrorNode>,
    pub range: Range,
}

impl File {
    /// Top-level and nested sections of the given keyword, in source order.
    pub fn sections_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections
            .iter()
            .flat_map(|s| std::iter::once(s).chain(s.subsections.iter()))
            .filter(move |s| s.kind == kind)
    }
}

/// `import A/B as c`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportStatement {
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub range: Range,
}

impl ImportStatement {
    /// `A/B`, the form used in messages and as the provider key.
    pub fn joined(&self) -> String {
        self.path.join("/")
    }
}

/// A keyword-introduced block: `agent`, `flow`, `on`, `messages`, `text`, …
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub kind: String,
    pub name: Option<String>,
    pub name_range: Option<Range>,
    /// Values following the name on the header line.
    pub parameters: Vec<Value>,
    pub attributes: Vec<Attribute>,
    pub subsections: Vec<Section>,
    pub statements: Vec<Statement>,
    pub range: Range,
}

impl Section {
    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn subsections_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.subsections.iter().filter(move |s| s.kind == kind)
    }

    /// Range used to point at the section: its name when it has one.
    pub fn name_or_header(&self) -> Range {
        self.name_range.unwrap_or(self.range)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: Value,
    pub range: Range,
}

// ──────────────────────────────────────────────
// Values
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub kind: ValueKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    String(String),
    /// As written; converted on demand so no precision is lost.
    Number(String),
    Boolean(bool),
    Null,
    Atom(String),
    Identifier(String),
    /// `@reply.text`, without the `@`.
    Variable(String),
    Code {
        language: Option<String>,
        code: String,
    },
    List(Vec<Value>),
    Dict(Vec<(String, Value)>),
    TypeTag {
        name: String,
        value: String,
        qualifier: Option<String>,
    },
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) | ValueKind::Identifier(s) | ValueKind::Atom(s) => Some(s),
            ValueKind::TypeTag { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_default_pattern(&self) -> bool {
        matches!(&self.kind, ValueKind::Atom(a) if a == "default")
    }

    /// JSON form used in configuration, messages and JSON-logic rules.
    /// Variables become `{"var": path}`; atoms, identifiers and type tags
    /// become plain strings.
    pub fn to_json(&self) -> Json {
        match &self.kind {
            ValueKind::String(s) | ValueKind::Atom(s) | ValueKind::Identifier(s) => {
                Json::String(s.clone())
            }
            ValueKind::Number(n) => number(n),
            ValueKind::Boolean(b) => Json::Bool(*b),
            ValueKind::Null => Json::Null,
            ValueKind::Variable(path) => {
                let mut m = Map::new();
                m.insert("var".into(), Json::String(path.clone()));
                Json::Object(m)
            }
            ValueKind::Code { code, .. } => Json::String(code.clone()),
            ValueKind::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            ValueKind::Dict(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ValueKind::TypeTag { value, .. } => Json::String(value.clone()),
        }
    }
}

fn number(text: &str) -> Json {
    if let Ok(i) = text.parse::<i64>() {
        return Json::Number(i.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Json::Number)
        .unwrap_or_else(|| Json::String(text.to_owned()))
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Match(MatchBlock),
    Transition(SimpleTransition),
    FlowRule(FlowRule),
    Spread(SpreadDirective),
    StateReference(StateReference),
    Value(Value),
    Error(ErrorNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpreadDirective {
    pub name: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateReference {
    pub name: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorNode {
    pub message: String,
    pub range: Range,
}

/// `match <discriminant>` with its cases in source order. Default cases
/// stay where they were written; a second default is a validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchBlock {
    pub discriminant: Value,
    pub cases: Vec<MatchCase>,
    pub errors: Vec<ErrorNode>,
    pub range: Range,
}

impl MatchBlock {
    pub fn default_case(&self) -> Option<&MatchCase> {
        self.cases.iter().find(|c| c.pattern == MatchPattern::Default)
    }

    pub fn defaults(&self) -> impl Iterator<Item = &MatchCase> {
        self.cases.iter().filter(|c| c.pattern == MatchPattern::Default)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: MatchPattern,
    pub result: SimpleTransition,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchPattern {
    Value(Value),
    Default,
}

/// `Source -> …`
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRule {
    pub source: StateReference,
    pub body: SimpleTransition,
    pub range: Range,
}

/// Context operations, a target, optional parameters and an optional guard.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleTransition {
    pub operations: ContextOperationSequence,
    pub target: TargetReference,
    /// `with` parameters of a plain transition; an invocation keeps its own.
    pub parameters: Vec<(String, Value)>,
    pub condition: Option<Condition>,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetReference {
    State(StateReference),
    Flow(FlowInvocation),
    Terminal(FlowTermination),
}

impl TargetReference {
    pub fn range(&self) -> Range {
        match self {
            TargetReference::State(s) => s.range,
            TargetReference::Flow(f) => f.range,
            TargetReference::Terminal(t) => t.range,
        }
    }
}

/// `start Flow [with …]` plus its `on :result -> …` handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowInvocation {
    pub flow: String,
    pub parameters: Vec<(String, Value)>,
    pub results: Vec<FlowResult>,
    pub errors: Vec<ErrorNode>,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub kind: ResultKind,
    pub body: SimpleTransition,
    pub range: Range,
}

/// `:end`, `:cancel` or `:error`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTermination {
    pub result: ResultKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    CodeExpression {
        language: Option<String>,
        code: String,
        range: Range,
    },
    JsonLogicRule {
        rule: Value,
        range: Range,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The result value of the subflow that just returned.
    Result,
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextOperation {
    Set {
        variable: String,
        value: Operand,
        range: Range,
    },
    Append {
        target: String,
        value: Operand,
        range: Range,
    },
    Merge {
        target: String,
        value: Operand,
        range: Range,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextOperationSequence {
    pub operations: Vec<ContextOperation>,
}

impl ContextOperationSequence {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContextOperation> {
        self.operations.iter()
    }
}

// ──────────────────────────────────────────────
// Visitor
// ──────────────────────────────────────────────

/// AST traversal. Override the nodes you care about; the defaults walk into
/// children. Depth is bounded by the parser's nesting limit.
pub trait Visitor {
    fn visit_import(&mut self, _import: &ImportStatement) {}

    fn visit_section(&mut self, section: &Section) {
        walk_section(self, section);
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) {}

    fn visit_statement(&mut self, statement: &Statement) {
        walk_statement(self, statement);
    }

    fn visit_match(&mut self, block: &MatchBlock) {
        walk_match(self, block);
    }

    fn visit_transition(&mut self, transition: &SimpleTransition) {
        walk_transition(self, transition);
    }

    fn visit_target(&mut self, target: &TargetReference) {
        walk_target(self, target);
    }

    fn visit_spread(&mut self, _spread: &SpreadDirective) {}

    fn visit_error(&mut self, _error: &ErrorNode) {}
}

pub fn walk_file<V: Visitor + ?Sized>(v: &mut V, file: &File) {
    for import in &file.imports {
        v.visit_import(import);
    }
    for section in &file.sections {
        v.visit_section(section);
    }
    for error in &file.errors {
        v.visit_error(error);
    }
}

pub fn walk_section<V: Visitor + ?Sized>(v: &mut V, section: &Section) {
    for attribute in &section.attributes {
        v.visit_attribute(attribute);
    }
    for statement in &section.statements {
        v.visit_statement(statement);
    }
    for sub in &section.subsections {
        v.visit_section(sub);
    }
}

pub fn walk_statement<V: Visitor + ?Sized>(v: &mut V, statement: &Statement) {
    match statement {
        Statement::Match(block) => v.visit_match(block),
        Statement::Transition(t) => v.visit_transition(t),
        Statement::FlowRule(rule) => v.visit_transition(&rule.body),
        Statement::Spread(s) => v.visit_spread(s),
        Statement::Error(e) => v.visit_error(e),
        Statement::StateReference(_) | Statement::Value(_) => {}
    }
}

pub fn walk_match<V: Visitor + ?Sized>(v: &mut V, block: &MatchBlock) {
    for case in &block.cases {
        v.visit_transition(&case.result);
    }
    for error in &block.errors {
        v.visit_error(error);
    }
}

pub fn walk_transition<V: Visitor + ?Sized>(v: &mut V, transition: &SimpleTransition) {
    v.visit_target(&transition.target);
}

pub fn walk_target<V: Visitor + ?Sized>(v: &mut V, target: &TargetReference) {
    if let TargetReference::Flow(invocation) = target {
        for result in &invocation.results {
            v.visit_transition(&result.body);
        }
        for error in &invocation.errors {
            v.visit_error(error);
        }
    }
}
