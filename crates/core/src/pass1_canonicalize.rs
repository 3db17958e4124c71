//! Pass 1: source text to canonical AST.
//!
//! [`to_ast`] is a deterministic structural mapping of the syntax tree.
//! Nothing is dropped: ERROR nodes become [`ErrorNode`]s at the position
//! they occupied.

use crate::ast::*;
use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{Outcome, Range};
use crate::lexer::{scan, Token};
use crate::options::CompileOptions;
use crate::parser::Parser;
use crate::syntax::{NodeId, SyntaxKind, SyntaxNode, SyntaxTree};
use tracing::debug;

/// Scan, parse and canonicalize one document.
pub fn parse_document(
    source: &str,
    options: &CompileOptions,
    cancel: &CancellationToken,
) -> Result<Outcome<File>, Cancelled> {
    let (tokens, mut diagnostics) = scan(source, &options.scan_options()).into_parts();
    cancel.check()?;
    let parser = Parser::new(options.parse_options());
    let (tree, syntax) = parser.parse_cancellable(&tokens, cancel)?.into_parts();
    diagnostics.extend(syntax);
    let (file, canonical) = to_ast(&tree).into_parts();
    diagnostics.extend(canonical);
    Ok(Outcome::new(file, diagnostics))
}

pub fn to_ast(tree: &SyntaxTree) -> Outcome<File> {
    let Some(root) = tree.root() else {
        return Outcome::ok(File {
            imports: Vec::new(),
            sections: Vec::new(),
            errors: Vec::new(),
            range: Range::default(),
        });
    };
    let c = Canonicalizer { tree };
    let mut file = File {
        imports: Vec::new(),
        sections: Vec::new(),
        errors: Vec::new(),
        range: tree.node(root).range,
    };
    for (id, node) in tree.children(root) {
        match node.kind {
            SyntaxKind::Import => file.imports.push(c.import(id)),
            SyntaxKind::Section => match c.section(id) {
                Ok(section) => file.sections.push(section),
                Err(e) => file.errors.push(e),
            },
            _ => file.errors.push(c.error(node)),
        }
    }
    debug!(
        imports = file.imports.len(),
        sections = file.sections.len(),
        "canonicalized AST"
    );
    Outcome::ok(file)
}

struct Canonicalizer<'t> {
    tree: &'t SyntaxTree,
}

type Canon<T> = Result<T, ErrorNode>;

impl<'t> Canonicalizer<'t> {
    fn error(&self, node: &SyntaxNode) -> ErrorNode {
        ErrorNode {
            message: node
                .error
                .clone()
                .unwrap_or_else(|| format!("unexpected {:?} node", node.kind)),
            range: node.range,
        }
    }

    fn child(&self, id: NodeId, index: usize) -> Canon<(NodeId, &'t SyntaxNode)> {
        let node = self.tree.node(id);
        match node.children.get(index) {
            Some(&c) => Ok((c, self.tree.node(c))),
            None => Err(self.error(node)),
        }
    }

    fn text(&self, node: &SyntaxNode) -> Canon<String> {
        node.text().map(str::to_owned).ok_or_else(|| self.error(node))
    }

    fn import(&self, id: NodeId) -> ImportStatement {
        let mut import = ImportStatement {
            path: Vec::new(),
            alias: None,
            range: self.tree.node(id).range,
        };
        for (alias_id, node) in self.tree.children(id) {
            match node.kind {
                SyntaxKind::Identifier => import.path.extend(node.text().map(str::to_owned)),
                SyntaxKind::ImportAlias => {
                    import.alias = self
                        .tree
                        .children(alias_id)
                        .next()
                        .and_then(|(_, n)| n.text())
                        .map(str::to_owned);
                }
                _ => {}
            }
        }
        import
    }

    fn section(&self, id: NodeId) -> Canon<Section> {
        let node = self.tree.node(id);
        let (header_id, header) = self.child(id, 0)?;
        if header.kind != SyntaxKind::SectionHeader {
            return Err(self.error(header));
        }
        let mut section = Section {
            kind: String::new(),
            name: None,
            name_range: None,
            parameters: Vec::new(),
            attributes: Vec::new(),
            subsections: Vec::new(),
            statements: Vec::new(),
            range: node.range,
        };
        for (part_id, part) in self.tree.children(header_id) {
            match part.kind {
                SyntaxKind::SectionKeyword => section.kind = self.text(part)?,
                SyntaxKind::SectionName => {
                    section.name = Some(self.text(part)?);
                    section.name_range = Some(part.range);
                }
                _ => section.parameters.push(self.value(part_id)?),
            }
        }
        for (child_id, child) in self.tree.children(id).skip(1) {
            match child.kind {
                SyntaxKind::Attribute => match self.attribute(child_id) {
                    Ok(a) => section.attributes.push(a),
                    Err(e) => section.statements.push(Statement::Error(e)),
                },
                SyntaxKind::Section => match self.section(child_id) {
                    Ok(s) => section.subsections.push(s),
                    Err(e) => section.statements.push(Statement::Error(e)),
                },
                _ => section.statements.push(
                    self.statement(child_id)
                        .unwrap_or_else(Statement::Error),
                ),
            }
        }
        Ok(section)
    }

    fn attribute(&self, id: NodeId) -> Canon<Attribute> {
        let (_, key) = self.child(id, 0)?;
        let (value_id, _) = self.child(id, 1)?;
        Ok(Attribute {
            key: self.text(key)?,
            value: self.value(value_id)?,
            range: self.tree.node(id).range,
        })
    }

    fn value(&self, id: NodeId) -> Canon<Value> {
        let node = self.tree.node(id);
        let kind = match (node.kind, node.token.as_ref()) {
            (SyntaxKind::StringLiteral, Some(Token::Str(s))) => ValueKind::String(s.clone()),
            (SyntaxKind::StringLiteral, Some(Token::BlockStr { text, .. })) => {
                ValueKind::String(text.clone())
            }
            (SyntaxKind::NumberLiteral, Some(Token::Number(n))) => ValueKind::Number(n.clone()),
            (SyntaxKind::BooleanLiteral, Some(Token::Bool(b))) => ValueKind::Boolean(*b),
            (SyntaxKind::NullLiteral, _) => ValueKind::Null,
            (SyntaxKind::AtomLiteral, Some(Token::Atom(a))) => ValueKind::Atom(a.clone()),
            (SyntaxKind::Identifier, Some(Token::Word(w))) => ValueKind::Identifier(w.clone()),
            (SyntaxKind::Variable, Some(Token::Variable(v))) => ValueKind::Variable(v.clone()),
            (SyntaxKind::CodeLiteral, Some(Token::Code { lang, code })) => ValueKind::Code {
                language: lang.clone(),
                code: code.clone(),
            },
            (
                SyntaxKind::TypeTag,
                Some(Token::TypeTag {
                    name,
                    value,
                    qualifier,
                }),
            ) => ValueKind::TypeTag {
                name: name.clone(),
                value: value.clone(),
                qualifier: qualifier.clone(),
            },
            (SyntaxKind::List, _) => ValueKind::List(
                node.children
                    .iter()
                    .map(|&c| self.value(c))
                    .collect::<Canon<_>>()?,
            ),
            (SyntaxKind::Dict, _) => ValueKind::Dict(self.entries(id)?),
            _ => return Err(self.error(node)),
        };
        Ok(Value {
            kind,
            range: node.range,
        })
    }

    /// DictEntry children of a Dict or WithClause.
    fn entries(&self, id: NodeId) -> Canon<Vec<(String, Value)>> {
        self.tree
            .children(id)
            .map(|(entry_id, _)| {
                let (_, key) = self.child(entry_id, 0)?;
                let (value_id, _) = self.child(entry_id, 1)?;
                Ok((self.text(key)?, self.value(value_id)?))
            })
            .collect()
    }

    fn statement(&self, id: NodeId) -> Canon<Statement> {
        let node = self.tree.node(id);
        Ok(match node.kind {
            SyntaxKind::MatchBlock => Statement::Match(self.match_block(id)?),
            SyntaxKind::Transition => Statement::Transition(self.transition(id)?),
            SyntaxKind::FlowRule => {
                let (_, source) = self.child(id, 0)?;
                let (body_id, _) = self.child(id, 1)?;
                Statement::FlowRule(FlowRule {
                    source: StateReference {
                        name: self.text(source)?,
                        range: source.range,
                    },
                    body: self.transition(body_id)?,
                    range: node.range,
                })
            }
            SyntaxKind::Spread => {
                let (_, name) = self.child(id, 0)?;
                Statement::Spread(SpreadDirective {
                    name: self.text(name)?,
                    range: node.range,
                })
            }
            SyntaxKind::StateReference => Statement::StateReference(StateReference {
                name: self.text(node)?,
                range: node.range,
            }),
            SyntaxKind::Error => Statement::Error(self.error(node)),
            kind if kind.is_value() => Statement::Value(self.value(id)?),
            _ => return Err(self.error(node)),
        })
    }

    fn match_block(&self, id: NodeId) -> Canon<MatchBlock> {
        let (discriminant_id, _) = self.child(id, 0)?;
        let mut block = MatchBlock {
            discriminant: self.value(discriminant_id)?,
            cases: Vec::new(),
            errors: Vec::new(),
            range: self.tree.node(id).range,
        };
        for (case_id, case) in self.tree.children(id).skip(1) {
            match self.match_case(case_id) {
                Ok(c) => block.cases.push(c),
                Err(_) if case.kind == SyntaxKind::Error => block.errors.push(self.error(case)),
                Err(e) => block.errors.push(e),
            }
        }
        Ok(block)
    }

    fn match_case(&self, id: NodeId) -> Canon<MatchCase> {
        let node = self.tree.node(id);
        if node.kind != SyntaxKind::MatchCase {
            return Err(self.error(node));
        }
        let (pattern_id, _) = self.child(id, 0)?;
        let (body_id, _) = self.child(id, 1)?;
        let pattern = self.value(pattern_id)?;
        Ok(MatchCase {
            pattern: if pattern.is_default_pattern() {
                MatchPattern::Default
            } else {
                MatchPattern::Value(pattern)
            },
            result: self.transition(body_id)?,
            range: node.range,
        })
    }

    fn transition(&self, id: NodeId) -> Canon<SimpleTransition> {
        let node = self.tree.node(id);
        if node.kind != SyntaxKind::Transition {
            return Err(self.error(node));
        }
        let mut operations = ContextOperationSequence::default();
        let mut target = None;
        let mut parameters = Vec::new();
        let mut condition = None;
        for (child_id, child) in self.tree.children(id) {
            match child.kind {
                SyntaxKind::ContextOperation => {
                    operations.operations.push(self.context_operation(child_id)?)
                }
                SyntaxKind::StateTarget => {
                    target = Some(TargetReference::State(StateReference {
                        name: self.text(child)?,
                        range: child.range,
                    }))
                }
                SyntaxKind::TerminalTarget => {
                    let result = child
                        .text()
                        .and_then(ResultKind::from_name)
                        .ok_or_else(|| self.error(child))?;
                    target = Some(TargetReference::Terminal(FlowTermination {
                        result,
                        range: child.range,
                    }))
                }
                SyntaxKind::FlowInvocation => {
                    target = Some(TargetReference::Flow(self.invocation(child_id)?))
                }
                SyntaxKind::WithClause => parameters = self.entries(child_id)?,
                SyntaxKind::WhenClause => {
                    let (value_id, _) = self.child(child_id, 0)?;
                    let value = self.value(value_id)?;
                    condition = Some(match value.kind {
                        ValueKind::Code { language, code } => Condition::CodeExpression {
                            language,
                            code,
                            range: value.range,
                        },
                        _ => Condition::JsonLogicRule {
                            range: value.range,
                            rule: value,
                        },
                    });
                }
                _ => return Err(self.error(child)),
            }
        }
        let mut target = target.ok_or_else(|| self.error(node))?;
        if let TargetReference::Flow(invocation) = &mut target {
            invocation.parameters = std::mem::take(&mut parameters);
        }
        Ok(SimpleTransition {
            operations,
            target,
            parameters,
            condition,
            range: node.range,
        })
    }

    fn invocation(&self, id: NodeId) -> Canon<FlowInvocation> {
        let (_, name) = self.child(id, 0)?;
        let mut invocation = FlowInvocation {
            flow: self.text(name)?,
            parameters: Vec::new(),
            results: Vec::new(),
            errors: Vec::new(),
            range: self.tree.node(id).range,
        };
        for (handler_id, handler) in self.tree.children(id).skip(1) {
            let parsed = if handler.kind == SyntaxKind::ResultHandler {
                self.result_handler(handler_id)
            } else {
                Err(self.error(handler))
            };
            match parsed {
                Ok(r) => invocation.results.push(r),
                Err(e) => invocation.errors.push(e),
            }
        }
        Ok(invocation)
    }

    fn result_handler(&self, id: NodeId) -> Canon<FlowResult> {
        let (_, atom) = self.child(id, 0)?;
        let (body_id, _) = self.child(id, 1)?;
        let kind = atom
            .text()
            .and_then(ResultKind::from_name)
            .ok_or_else(|| self.error(atom))?;
        Ok(FlowResult {
            kind,
            body: self.transition(body_id)?,
            range: self.tree.node(id).range,
        })
    }

    fn context_operation(&self, id: NodeId) -> Canon<ContextOperation> {
        let node = self.tree.node(id);
        let (_, variable) = self.child(id, 0)?;
        let (operand_id, operand) = self.child(id, 1)?;
        let variable = self.text(variable)?;
        let value = if operand.kind == SyntaxKind::ResultOperand {
            Operand::Result
        } else {
            Operand::Value(self.value(operand_id)?)
        };
        let range = node.range;
        Ok(match node.text() {
            Some("set") => ContextOperation::Set {
                variable,
                value,
                range,
            },
            Some("append") => ContextOperation::Append {
                target: variable,
                value,
                range,
            },
            Some("merge") => ContextOperation::Merge {
                target: variable,
                value,
                range,
            },
            _ => return Err(self.error(node)),
        })
    }
}

#[cfg(test)]
pub(crate) fn parse_ok(source: &str) -> File {
    let out = parse_document(source, &CompileOptions::default(), &CancellationToken::new())
        .expect("not cancelled");
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    out.value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sections_attributes_and_subsections() {
        let file = parse_ok(
            "import Shared/Common as common\nagent Coffee\n  displayName: \"Quick\"\n  flow Main\n    start: Welcome\n",
        );
        assert_eq!(file.imports[0].path, vec!["Shared", "Common"]);
        assert_eq!(file.imports[0].alias.as_deref(), Some("common"));
        let agent = &file.sections[0];
        assert_eq!(agent.kind, "agent");
        assert_eq!(agent.name.as_deref(), Some("Coffee"));
        assert_eq!(
            agent.attribute("displayName").and_then(|a| a.value.as_str()),
            Some("Quick")
        );
        let flows: Vec<_> = file.sections_of("flow").collect();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].attribute("start").and_then(|a| a.value.as_str()), Some("Welcome"));
    }

    #[test]
    fn match_block_lowers_patterns_and_targets() {
        let file = parse_ok(
            "flow F\n  on A\n    match @reply.text\n      \"x\" -> B with n: 1\n      :default -> start G\n        on :end -> :cancel\n",
        );
        let state = &file.sections[0].subsections[0];
        let Statement::Match(block) = &state.statements[0] else {
            panic!("expected match, got {:?}", state.statements[0]);
        };
        assert_eq!(block.discriminant.kind, ValueKind::Variable("reply.text".into()));
        assert_eq!(block.cases.len(), 2);
        assert_eq!(block.cases[0].result.parameters.len(), 1);
        assert_eq!(block.cases[1].pattern, MatchPattern::Default);
        let TargetReference::Flow(invocation) = &block.cases[1].result.target else {
            panic!("expected flow target");
        };
        assert_eq!(invocation.flow, "G");
        assert_eq!(invocation.results[0].kind, ResultKind::End);
        assert!(matches!(
            invocation.results[0].body.target,
            TargetReference::Terminal(FlowTermination {
                result: ResultKind::Cancel,
                ..
            })
        ));
    }

    #[test]
    fn invocation_keeps_its_with_parameters() {
        let file = parse_ok("flow F\n  on A\n    -> start G with origin: \"a\"\n");
        let Statement::Transition(t) = &file.sections[0].subsections[0].statements[0] else {
            panic!("expected transition");
        };
        assert!(t.parameters.is_empty());
        let TargetReference::Flow(invocation) = &t.target else {
            panic!("expected flow target");
        };
        assert_eq!(invocation.parameters[0].0, "origin");
    }

    #[test]
    fn when_clause_becomes_condition() {
        let file = parse_ok(
            "flow F\n  on A\n    -> B when $js> context.n > 1\n    -> C when {\"==\": [@n, 2]}\n",
        );
        let statements = &file.sections[0].subsections[0].statements;
        let conditions: Vec<_> = statements
            .iter()
            .filter_map(|s| match s {
                Statement::Transition(t) => t.condition.clone(),
                _ => None,
            })
            .collect();
        assert!(matches!(
            &conditions[0],
            Condition::CodeExpression { language: Some(l), code, .. } if l == "js" && code == "context.n > 1"
        ));
        assert!(matches!(&conditions[1], Condition::JsonLogicRule { .. }));
    }

    #[test]
    fn context_operations_keep_order() {
        let file = parse_ok("flow F\n  Retry -> set @n to 1 -> append result to @log -> :end\n");
        let Statement::FlowRule(rule) = &file.sections[0].statements[0] else {
            panic!("expected flow rule");
        };
        assert_eq!(rule.source.name, "Retry");
        let ops = &rule.body.operations.operations;
        assert!(matches!(&ops[0], ContextOperation::Set { variable, .. } if variable == "n"));
        assert!(matches!(
            &ops[1],
            ContextOperation::Append { target, value: Operand::Result, .. } if target == "log"
        ));
    }

    #[test]
    fn error_nodes_are_preserved() {
        let out = parse_document(
            "agent A\n  displayName: \"A\"\n  Welcome \"x\" ->\n",
            &CompileOptions::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        let agent = &out.value.sections[0];
        assert!(matches!(agent.statements[0], Statement::Error(_)));
        assert_eq!(agent.attributes.len(), 1);
    }
}
