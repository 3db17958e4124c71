//! Literal values and inline collections.

use super::{PResult, ParseState};
use crate::lexer::Token;
use crate::syntax::{NodeId, SyntaxKind};

impl<'a> ParseState<'a> {
    pub(super) fn starts_value(t: &Token) -> bool {
        matches!(
            t,
            Token::Str(_)
                | Token::BlockStr { .. }
                | Token::Number(_)
                | Token::Bool(_)
                | Token::Null
                | Token::Atom(_)
                | Token::Word(_)
                | Token::Variable(_)
                | Token::Code { .. }
                | Token::TypeTag { .. }
                | Token::LParen
                | Token::LBracket
                | Token::LBrace
        )
    }

    pub(super) fn value(&mut self) -> PResult<NodeId> {
        let kind = match self.peek() {
            Token::Str(_) | Token::BlockStr { .. } => SyntaxKind::StringLiteral,
            Token::Number(_) => SyntaxKind::NumberLiteral,
            Token::Bool(_) => SyntaxKind::BooleanLiteral,
            Token::Null => SyntaxKind::NullLiteral,
            Token::Atom(_) => SyntaxKind::AtomLiteral,
            Token::Word(_) => SyntaxKind::Identifier,
            Token::Variable(_) => SyntaxKind::Variable,
            Token::Code { .. } => SyntaxKind::CodeLiteral,
            Token::TypeTag { .. } => SyntaxKind::TypeTag,
            Token::LParen => return self.list(Token::RParen, "')'"),
            Token::LBracket => return self.list(Token::RBracket, "']'"),
            Token::LBrace => return self.dict(),
            _ => return Err(self.unexpected("a value")),
        };
        Ok(self.leaf(kind))
    }

    /// `(a, b)` or `[a, b]`; a trailing comma is allowed.
    fn list(&mut self, close: Token, what: &str) -> PResult<NodeId> {
        self.nested(|p| {
            let start = p.start();
            p.advance();
            let mut items = Vec::new();
            while *p.peek() != close {
                items.push(p.value()?);
                if *p.peek() == Token::Comma {
                    p.advance();
                } else if *p.peek() != close {
                    return Err(p.unexpected(&format!("',' or {}", what)));
                }
            }
            p.advance();
            Ok(p.node(SyntaxKind::List, items, start))
        })
    }

    /// `{key: value, ...}`; keys are identifiers or strings.
    fn dict(&mut self) -> PResult<NodeId> {
        self.nested(|p| {
            let start = p.start();
            p.advance();
            let mut entries = Vec::new();
            while *p.peek() != Token::RBrace {
                let entry_start = p.start();
                let key = match p.peek() {
                    Token::Word(_) | Token::Str(_) => p.leaf(SyntaxKind::DictKey),
                    _ => return Err(p.unexpected("a dictionary key")),
                };
                p.expect(Token::Colon, "':'")?;
                let value = p.value()?;
                entries.push(p.node(SyntaxKind::DictEntry, vec![key, value], entry_start));
                if *p.peek() == Token::Comma {
                    p.advance();
                } else if *p.peek() != Token::RBrace {
                    return Err(p.unexpected("',' or '}'"));
                }
            }
            p.advance();
            Ok(p.node(SyntaxKind::Dict, entries, start))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::{scan, Token};
    use crate::options::ScanOptions;
    use crate::parser::Parser;
    use crate::syntax::SyntaxKind;

    #[test]
    fn nested_inline_collections() {
        let tokens = scan(
            "config C\n  rule: {\"==\": [@a, 1], note: (\"x\", :y,)}\n",
            &ScanOptions::default(),
        );
        let out = Parser::default().parse(&tokens.value);
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let tree = out.value;
        let kinds: Vec<_> = tree
            .descendants(tree.root().unwrap())
            .into_iter()
            .map(|id| tree.node(id).kind)
            .filter(|k| k.is_value())
            .collect();
        assert_eq!(
            kinds,
            vec![
                SyntaxKind::Dict,
                SyntaxKind::List,
                SyntaxKind::Variable,
                SyntaxKind::NumberLiteral,
                SyntaxKind::List,
                SyntaxKind::StringLiteral,
                SyntaxKind::AtomLiteral,
            ]
        );
    }

    #[test]
    fn unclosed_list_is_a_syntax_error() {
        let tokens = scan("config C\n  tags: (\"a\" \"b\")\n", &ScanOptions::default());
        let out = Parser::default().parse(&tokens.value);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].message.contains("','"));
    }

    #[test]
    fn error_tokens_are_not_reported_twice() {
        let tokens = scan("config C\n  tag: ^\n", &ScanOptions::default());
        assert_eq!(tokens.diagnostics.len(), 1);
        assert!(tokens.value.iter().any(|t| t.token == Token::Error("^".into())));
        let out = Parser::default().parse(&tokens.value);
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.value.errors().len(), 1);
    }
}
