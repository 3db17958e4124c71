//! Flow statements: match blocks, transitions and flow invocations.
//!
//! ```text
//! match @reply.text
//!   "Order" -> ChooseSize
//!   "Menu" -> start MenuFlow with origin: "welcome"
//!     on :end -> Welcome
//!     on :cancel -> set @cancelled to True -> Welcome
//!   :default -> Welcome when $js> context.retries < 3
//! ```

use super::{PResult, ParseState};
use crate::diagnostic::{Position, Range};
use crate::lexer::Token;
use crate::syntax::{NodeId, SyntaxKind};

const TERMINALS: [&str; 3] = ["end", "cancel", "error"];

impl<'a> ParseState<'a> {
    pub(super) fn match_block(&mut self) -> PResult<NodeId> {
        let start = self.start();
        self.advance();
        let discriminant = self.value()?;
        self.expect_line_end()?;
        if *self.peek() != Token::Indent {
            return Err(self.unexpected("indented match cases"));
        }
        let mut children = vec![discriminant];
        self.nested(|p| {
            p.advance();
            loop {
                p.poll_cancel();
                if p.halted {
                    break;
                }
                match p.peek() {
                    Token::Dedent => {
                        p.advance();
                        break;
                    }
                    Token::Eof => break,
                    Token::Newline => {
                        p.advance();
                    }
                    _ => {
                        let id = p.recovering(|p| p.match_case());
                        children.push(id);
                    }
                }
            }
            Ok(())
        })?;
        Ok(self.node(SyntaxKind::MatchBlock, children, start))
    }

    /// `pattern -> consequence`; `:default` is an ordinary atom pattern here.
    fn match_case(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let pattern = self.value()?;
        let arrow = self.start();
        self.expect(Token::Arrow, "'->'")?;
        let body = self.consequence(arrow)?;
        Ok(self.node(SyntaxKind::MatchCase, vec![pattern, body], start))
    }

    /// `Source -> consequence`
    pub(super) fn flow_rule(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let source = self.leaf(SyntaxKind::Identifier);
        let arrow = self.start();
        self.advance();
        let body = self.consequence(arrow)?;
        Ok(self.node(SyntaxKind::FlowRule, vec![source, body], start))
    }

    /// Everything after `->` up to the end of the line, plus the result
    /// handler block of a flow invocation. Produces a Transition node.
    pub(super) fn consequence(&mut self, start: Position) -> PResult<NodeId> {
        let mut children = Vec::new();
        while let Token::Word(w) = self.peek() {
            let op = match w.as_str() {
                "set" | "append" | "merge" => self.context_operation()?,
                _ => break,
            };
            children.push(op);
            self.expect(Token::Arrow, "'->' after a context operation")?;
        }

        let target_start = self.start();
        let mut invocation: Option<NodeId> = None;
        let target = match (self.peek(), self.peek_at(1)) {
            (Token::Word(w), Token::Word(_)) if w == "start" => {
                self.advance();
                let name = self.leaf(SyntaxKind::Identifier);
                invocation = Some(name);
                None
            }
            (Token::Word(_), _) => Some(self.leaf(SyntaxKind::StateTarget)),
            (Token::Atom(a), _) if TERMINALS.contains(&a.as_str()) => {
                Some(self.leaf(SyntaxKind::TerminalTarget))
            }
            (Token::Atom(a), _) => {
                let mut err = self.unexpected("':end', ':cancel' or ':error'");
                err.message = format!("unknown terminal ':{}'; expected :end, :cancel or :error", a);
                return Err(err);
            }
            _ => return Err(self.unexpected("a transition target")),
        };
        let target_end = self.prev_end();

        let mut tail = Vec::new();
        if self.is_word("with") {
            tail.push(self.with_clause()?);
        }
        if self.is_word("when") {
            let when_start = self.start();
            self.advance();
            let condition = self.value()?;
            tail.push(self.node(SyntaxKind::WhenClause, vec![condition], when_start));
        }
        let end = self.prev_end();
        self.expect_line_end()?;

        let target = match (target, invocation) {
            (Some(t), _) => t,
            (None, Some(name)) => {
                let mut inv_children = vec![name];
                if *self.peek() == Token::Indent && !self.cur().recovered {
                    self.result_handlers(&mut inv_children)?;
                }
                let range = Range::new(target_start, target_end);
                self.node_at(SyntaxKind::FlowInvocation, inv_children, range)
            }
            (None, None) => return Err(self.unexpected("a transition target")),
        };
        children.push(target);
        children.extend(tail);
        let range = Range::new(start, end.max(start));
        Ok(self.node_at(SyntaxKind::Transition, children, range))
    }

    /// `set @v to x`, `append x to @v`, `merge x into @v`. `result` names the
    /// value returned by the subflow that just finished.
    fn context_operation(&mut self) -> PResult<NodeId> {
        let start = self.start();
        let op = self.advance();
        let (variable, operand) = match &op.token {
            Token::Word(w) if w == "set" => {
                let variable = self.variable()?;
                self.keyword("to")?;
                (variable, self.operand()?)
            }
            Token::Word(w) => {
                let operand = self.operand()?;
                self.keyword(if w == "merge" { "into" } else { "to" })?;
                (self.variable()?, operand)
            }
            _ => return Err(self.unexpected("a context operation")),
        };
        let id = self.node(SyntaxKind::ContextOperation, vec![variable, operand], start);
        self.tree.node_mut(id).token = Some(op.token.clone());
        Ok(id)
    }

    fn variable(&mut self) -> PResult<NodeId> {
        match self.peek() {
            Token::Variable(_) => Ok(self.leaf(SyntaxKind::Variable)),
            _ => Err(self.unexpected("a context variable such as '@name'")),
        }
    }

    fn operand(&mut self) -> PResult<NodeId> {
        if self.is_word("result") {
            Ok(self.leaf(SyntaxKind::ResultOperand))
        } else {
            self.value()
        }
    }

    fn keyword(&mut self, kw: &str) -> PResult<()> {
        if self.is_word(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kw)))
        }
    }

    /// `with key: value, key: value`
    fn with_clause(&mut self) -> PResult<NodeId> {
        let start = self.start();
        self.advance();
        let mut entries = Vec::new();
        loop {
            let entry_start = self.start();
            let key = match self.peek() {
                Token::Word(_) | Token::Str(_) => self.leaf(SyntaxKind::DictKey),
                _ => return Err(self.unexpected("a parameter name")),
            };
            self.expect(Token::Colon, "':'")?;
            let value = self.value()?;
            entries.push(self.node(SyntaxKind::DictEntry, vec![key, value], entry_start));
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        Ok(self.node(SyntaxKind::WithClause, entries, start))
    }

    /// Indented `on :result -> consequence` lines under a flow invocation.
    fn result_handlers(&mut self, children: &mut Vec<NodeId>) -> PResult<()> {
        self.nested(|p| {
            p.advance();
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
                    _ if p.halted => break,
                    _ => {
                        let id = p.recovering(|p| p.result_handler());
                        children.push(id);
                    }
                }
            }
            Ok(())
        })
    }

    fn result_handler(&mut self) -> PResult<NodeId> {
        let start = self.start();
        self.keyword("on")?;
        let result = match self.peek() {
            Token::Atom(a) if TERMINALS.contains(&a.as_str()) => {
                self.leaf(SyntaxKind::AtomLiteral)
            }
            _ => return Err(self.unexpected("':end', ':cancel' or ':error'")),
        };
        let arrow = self.start();
        self.expect(Token::Arrow, "'->'")?;
        let body = self.consequence(arrow)?;
        Ok(self.node(SyntaxKind::ResultHandler, vec![result, body], start))
    }
}
