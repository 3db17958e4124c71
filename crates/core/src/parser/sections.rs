//! Sections, bodies and attributes.

use super::{PResult, ParseState};
use crate::diagnostic::codes;
use crate::lexer::Token;
use crate::syntax::{NodeId, SyntaxKind};

fn is_lowercase_word(w: &str) -> bool {
    w.starts_with(|c: char| c.is_lowercase())
}

impl<'a> ParseState<'a> {
    /// `keyword [Name] [params...]` followed by an optional indented body.
    pub(super) fn section(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let header = self.section_header()?;
        self.expect_line_end()?;
        let mut children = vec![header];
        if *self.peek() == Token::Indent && !self.cur().recovered {
            self.block(&mut children)?;
        }
        Ok(self.node(SyntaxKind::Section, children, start))
    }

    fn section_header(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let mut children = vec![self.leaf(SyntaxKind::SectionKeyword)];
        if matches!(self.peek(), Token::Word(_)) {
            children.push(self.leaf(SyntaxKind::SectionName));
        }
        while !self.at_line_end() {
            children.push(self.value()?);
        }
        Ok(self.node(SyntaxKind::SectionHeader, children, start))
    }

    /// INDENT, body items, DEDENT.
    fn block(&mut self, children: &mut Vec<NodeId>) -> PResult<()> {
        self.nested(|p| {
            p.advance();
            p.body_items(children);
            Ok(())
        })
    }

    /// Statements up to and including the DEDENT closing the current block.
    pub(super) fn body_items(&mut self, children: &mut Vec<NodeId>) {
        loop {
            self.poll_cancel();
            if self.halted {
                return;
            }
            match self.peek() {
                Token::Eof => return,
                Token::Dedent => {
                    self.advance();
                    // A forced level from an inconsistent dedent continues
                    // the block it interrupted.
                    if *self.peek() == Token::Indent && self.cur().recovered {
                        self.advance();
                        continue;
                    }
                    return;
                }
                Token::Newline => {
                    self.advance();
                }
                Token::Indent => self.stray_indent(children),
                _ => {
                    let id = self.recovering(|p| p.statement());
                    children.push(id);
                }
            }
        }
    }

    /// An indented run nobody asked for: report it (unless the scanner
    /// already did) and keep its statements in the current body.
    fn stray_indent(&mut self, children: &mut Vec<NodeId>) {
        let t = self.cur();
        let start_pos = self.pos;
        let base = self.layout;
        let result = self.nested(|p| {
            p.advance();
            if !t.recovered {
                p.report(
                    codes::UNEXPECTED_INDENT,
                    "unexpected indentation",
                    t.range,
                );
            }
            p.body_items(children);
            Ok(())
        });
        if let Err(err) = result {
            let id = self.recover(start_pos, base, err);
            children.push(id);
        }
    }

    pub(super) fn statement(&mut self) -> PResult<NodeId> {
        match (self.peek(), self.peek_at(1)) {
            (Token::Word(_), Token::Colon) => self.attribute(),
            (Token::Word(w), _) if w == "match" => self.match_block(),
            (Token::Word(_), Token::Arrow) => self.flow_rule(),
            (Token::Word(w), _) if is_lowercase_word(w) => self.section(),
            (Token::Word(_), Token::Newline | Token::Dedent | Token::Eof) => {
                let id = self.leaf(SyntaxKind::StateReference);
                self.expect_line_end()?;
                Ok(id)
            }
            (Token::Arrow, _) => {
                let start = self.start();
                self.advance();
                self.consequence(start)
            }
            (Token::Spread, _) => self.spread(),
            (Token::Hyphen, _) => {
                self.advance();
                let value = self.value()?;
                self.expect_line_end()?;
                Ok(value)
            }
            (t, _) if Self::starts_value(t) => {
                let value = self.value()?;
                self.expect_line_end()?;
                Ok(value)
            }
            _ => Err(self.unexpected("a statement")),
        }
    }

    /// `key: value`, or `key:` followed by an indented list or dictionary.
    fn attribute(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let key = self.leaf(SyntaxKind::AttributeKey);
        self.advance();
        let value = if *self.peek() == Token::Newline && *self.peek_at(1) == Token::Indent {
            self.advance();
            self.block_collection()?
        } else {
            let v = self.value()?;
            self.expect_line_end()?;
            v
        };
        Ok(self.node(SyntaxKind::Attribute, vec![key, value], start))
    }

    /// Indented collection: `- item` lines make a list, `key: value` lines a
    /// dictionary.
    fn block_collection(&mut self) -> PResult<NodeId> {
        self.nested(|p| {
            let start = p.start();
            p.advance();
            let is_list = *p.peek() == Token::Hyphen;
            let mut items = Vec::new();
            loop {
                match p.peek() {
                    Token::Dedent => {
                        p.advance();
                        break;
                    }
                    Token::Eof => break,
                    Token::Newline => {
                        p.advance();
                    }
                    Token::Hyphen if is_list => {
                        p.advance();
                        let item = if *p.peek() == Token::Newline
                            && *p.peek_at(1) == Token::Indent
                        {
                            p.advance();
                            p.block_collection()?
                        } else {
                            let v = p.value()?;
                            p.expect_line_end()?;
                            v
                        };
                        items.push(item);
                    }
                    Token::Word(_) | Token::Str(_) if !is_list => {
                        let entry_start = p.start();
                        let key = p.leaf(SyntaxKind::DictKey);
                        p.expect(Token::Colon, "':'")?;
                        let value = if *p.peek() == Token::Newline
                            && *p.peek_at(1) == Token::Indent
                        {
                            p.advance();
                            p.block_collection()?
                        } else {
                            let v = p.value()?;
                            p.expect_line_end()?;
                            v
                        };
                        items.push(p.node(SyntaxKind::DictEntry, vec![key, value], entry_start));
                    }
                    _ if is_list => return Err(p.unexpected("'-' list item")),
                    _ => return Err(p.unexpected("'key: value' entry")),
                }
            }
            let kind = if is_list {
                SyntaxKind::List
            } else {
                SyntaxKind::Dict
            };
            Ok(p.node(kind, items, start))
        })
    }

    /// `...Name`
    fn spread(&mut self) -> PResult<NodeId> {
        let start = self.start();
        self.advance();
        let name = match self.peek() {
            Token::Word(_) => self.leaf(SyntaxKind::Identifier),
            _ => return Err(self.unexpected("a section name after '...'")),
        };
        let id = self.node(SyntaxKind::Spread, vec![name], start);
        self.expect_line_end()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::scan;
    use crate::options::ScanOptions;
    use crate::parser::Parser;
    use crate::syntax::{SyntaxKind, SyntaxTree};

    fn parse(src: &str) -> SyntaxTree {
        let tokens = scan(src, &ScanOptions::default());
        let out = Parser::default().parse(&tokens.value);
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        out.value
    }

    fn first_section_items(tree: &SyntaxTree) -> Vec<SyntaxKind> {
        let (section, _) = tree.children(tree.root().unwrap()).next().unwrap();
        tree.children(section).map(|(_, n)| n.kind).collect()
    }

    #[test]
    fn header_carries_name_and_parameters() {
        let tree = parse("messages Messages\n  richCard Promo \"Title\" :medium\n");
        let section = tree
            .descendants(tree.root().unwrap())
            .into_iter()
            .filter(|id| tree.node(*id).kind == SyntaxKind::SectionHeader)
            .nth(1)
            .unwrap();
        let kinds: Vec<_> = tree.children(section).map(|(_, n)| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SyntaxKind::SectionKeyword,
                SyntaxKind::SectionName,
                SyntaxKind::StringLiteral,
                SyntaxKind::AtomLiteral
            ]
        );
    }

    #[test]
    fn body_statement_kinds() {
        let tree = parse(
            "flow Main\n  start: Welcome\n  ...Shared\n  Welcome\n  Retry -> Welcome\n  -> :end\n  on Welcome\n    -> :end\n",
        );
        assert_eq!(
            first_section_items(&tree),
            vec![
                SyntaxKind::SectionHeader,
                SyntaxKind::Attribute,
                SyntaxKind::Spread,
                SyntaxKind::StateReference,
                SyntaxKind::FlowRule,
                SyntaxKind::Transition,
                SyntaxKind::Section,
            ]
        );
    }

    #[test]
    fn block_collections() {
        let tree = parse("config C\n  tags:\n    - \"a\"\n    - \"b\"\n  meta:\n    owner: \"ops\"\n    level: 2\n");
        let attrs: Vec<_> = tree
            .descendants(tree.root().unwrap())
            .into_iter()
            .map(|id| tree.node(id))
            .filter(|n| n.kind == SyntaxKind::List || n.kind == SyntaxKind::Dict)
            .map(|n| (n.kind, n.children.len()))
            .collect();
        assert_eq!(attrs, vec![(SyntaxKind::List, 2), (SyntaxKind::Dict, 2)]);
    }
}
