//! Error-tolerant recursive-descent parser producing a [`SyntaxTree`].
//!
//! Every statement is parsed in isolation: when one fails, the tokens up to
//! the next statement boundary are wrapped in an ERROR node, a diagnostic is
//! recorded and parsing resumes. The tree is therefore always complete
//! enough for editor tooling, even on badly broken input.

use crate::cancel::{CancellationToken, Cancelled};
use crate::diagnostic::{codes, Diagnostic, Outcome, Position, Range};
use crate::lexer::{Spanned, Token};
use crate::options::ParseOptions;
use crate::syntax::{NodeId, SyntaxKind, SyntaxNode, SyntaxTree};
use tracing::debug;

mod flow;
mod sections;
mod values;

/// A reusable parser. Holds configuration only; every call to
/// [`Parser::parse`] starts from a clean state.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    options: ParseOptions,
}

impl Parser {
    pub fn new(options: ParseOptions) -> Self {
        Parser { options }
    }

    pub fn parse(&self, tokens: &[Spanned]) -> Outcome<SyntaxTree> {
        let never = CancellationToken::new();
        match self.parse_cancellable(tokens, &never) {
            Ok(outcome) => outcome,
            Err(Cancelled) => Outcome::ok(SyntaxTree::new()),
        }
    }

    /// Parse, checking `cancel` between statements.
    pub fn parse_cancellable(
        &self,
        tokens: &[Spanned],
        cancel: &CancellationToken,
    ) -> Result<Outcome<SyntaxTree>, Cancelled> {
        let eof;
        let tokens = if tokens.is_empty() {
            eof = vec![Spanned {
                token: Token::Eof,
                range: Range::default(),
                trivia: Vec::new(),
                recovered: false,
            }];
            &eof[..]
        } else {
            tokens
        };
        let mut state = ParseState::new(tokens, self.options, cancel);
        let root = state.file();
        if state.cancelled {
            return Err(Cancelled);
        }
        state.tree.set_root(root);
        debug!(
            nodes = state.tree.len(),
            errors = state.errors,
            "parsed syntax tree"
        );
        Ok(Outcome::new(state.tree, state.diagnostics))
    }
}

/// A syntax error on its way to becoming an ERROR node.
#[derive(Debug, Clone)]
struct SyntaxError {
    code: &'static str,
    message: String,
    range: Range,
    /// Already reported by the scanner (error tokens).
    reported: bool,
}

type PResult<T> = Result<T, SyntaxError>;

struct ParseState<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// Net INDENT/DEDENT consumed so far.
    layout: usize,
    depth: usize,
    errors: usize,
    halted: bool,
    cancelled: bool,
    options: ParseOptions,
    cancel: &'a CancellationToken,
    tree: SyntaxTree,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ParseState<'a> {
    fn new(tokens: &'a [Spanned], options: ParseOptions, cancel: &'a CancellationToken) -> Self {
        ParseState {
            tokens,
            pos: 0,
            layout: 0,
            depth: 0,
            errors: 0,
            halted: false,
            cancelled: false,
            options,
            cancel,
            tree: SyntaxTree::new(),
            diagnostics: Vec::new(),
        }
    }

    // ── Cursor ───────────────────────────────────────────────────────

    fn cur(&self) -> &'a Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &'a Token {
        &self.cur().token
    }

    fn peek_at(&self, n: usize) -> &'a Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn start(&self) -> Position {
        self.cur().range.start
    }

    fn prev_end(&self) -> Position {
        match self.pos.checked_sub(1) {
            Some(p) => self.tokens[p.min(self.tokens.len() - 1)].range.end,
            None => self.start(),
        }
    }

    fn advance(&mut self) -> &'a Spanned {
        let t = self.cur();
        match t.token {
            Token::Indent => self.layout += 1,
            Token::Dedent => self.layout = self.layout.saturating_sub(1),
            _ => {}
        }
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn at_line_end(&self) -> bool {
        matches!(
            self.peek(),
            Token::Newline | Token::Dedent | Token::Eof | Token::Indent
        )
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<&'a Spanned> {
        if *self.peek() == token {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// A statement ends at NEWLINE; an enclosing DEDENT or EOF also closes
    /// it.
    fn expect_line_end(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Dedent | Token::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let t = self.cur();
        SyntaxError {
            code: codes::UNEXPECTED_TOKEN,
            message: format!("expected {}, found {}", expected, t.token),
            range: t.range,
            reported: matches!(t.token, Token::Error(_)),
        }
    }

    // ── Tree building ────────────────────────────────────────────────

    fn leaf(&mut self, kind: SyntaxKind) -> NodeId {
        let t = self.advance();
        self.tree.alloc(SyntaxNode {
            kind,
            children: Vec::new(),
            token: Some(t.token.clone()),
            range: t.range,
            error: None,
        })
    }

    fn node(&mut self, kind: SyntaxKind, children: Vec<NodeId>, start: Position) -> NodeId {
        let range = Range::new(start, self.prev_end().max(start));
        self.node_at(kind, children, range)
    }

    fn node_at(&mut self, kind: SyntaxKind, children: Vec<NodeId>, range: Range) -> NodeId {
        self.tree.alloc(SyntaxNode {
            kind,
            children,
            token: None,
            range,
            error: None,
        })
    }

    // ── Errors and recovery ──────────────────────────────────────────

    fn report(&mut self, code: &str, message: impl Into<String>, range: Range) {
        if self.halted {
            return;
        }
        self.diagnostics.push(Diagnostic::error(code, message, range));
        self.errors += 1;
        if self.errors >= self.options.max_errors {
            self.halted = true;
        }
    }

    /// Stop parsing at the next statement boundary when cancelled.
    fn poll_cancel(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancelled = true;
            self.halted = true;
        }
    }

    /// Run `f` one nesting level deeper, failing once `max_depth` is reached.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= self.options.max_depth {
            return Err(SyntaxError {
                code: codes::NESTING_TOO_DEEP,
                message: format!("nesting exceeds the limit of {}", self.options.max_depth),
                range: self.cur().range,
                reported: false,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Report `err` and wrap everything from `start_pos` to the next
    /// statement boundary at layout level `base` into an ERROR node. An
    /// indented block directly under the broken line belongs to it.
    fn recover(&mut self, start_pos: usize, base: usize, err: SyntaxError) -> NodeId {
        if !err.reported {
            self.report(err.code, err.message.clone(), err.range);
        }
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Dedent if self.layout <= base => break,
                Token::Dedent => {
                    self.advance();
                    if self.layout == base {
                        break;
                    }
                }
                Token::Newline if self.layout <= base => {
                    self.advance();
                    if *self.peek() != Token::Indent {
                        break;
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
        let start = self.tokens[start_pos.min(self.tokens.len() - 1)].range.start;
        let range = Range::new(start, self.prev_end().max(start));
        self.tree.alloc(SyntaxNode {
            kind: SyntaxKind::Error,
            children: Vec::new(),
            token: None,
            range,
            error: Some(err.message),
        })
    }

    /// Parse one item with `f`, turning a failure into an ERROR node.
    fn recovering(&mut self, f: impl FnOnce(&mut Self) -> PResult<NodeId>) -> NodeId {
        let start_pos = self.pos;
        let base = self.layout;
        match f(self) {
            Ok(id) => id,
            Err(err) => self.recover(start_pos, base, err),
        }
    }

    /// Everything left once the error budget is spent.
    fn rest_as_error(&mut self) -> Option<NodeId> {
        if *self.peek() == Token::Eof {
            return None;
        }
        let start = self.start();
        while *self.peek() != Token::Eof {
            self.advance();
        }
        let range = Range::new(start, self.prev_end().max(start));
        let message = if self.cancelled {
            "parsing cancelled"
        } else {
            "too many syntax errors; the rest of the document was not parsed"
        };
        Some(self.tree.alloc(SyntaxNode {
            kind: SyntaxKind::Error,
            children: Vec::new(),
            token: None,
            range,
            error: Some(message.to_owned()),
        }))
    }

    // ── File level ───────────────────────────────────────────────────

    fn file(&mut self) -> NodeId {
        let start = self.start();
        let mut children = Vec::new();
        loop {
            self.poll_cancel();
            if self.halted {
                children.extend(self.rest_as_error());
                break;
            }
            match self.peek() {
                Token::Eof => break,
                Token::Newline | Token::Dedent => {
                    self.advance();
                }
                Token::Indent => {
                    let t = self.advance();
                    if !t.recovered {
                        self.report(
                            codes::UNEXPECTED_INDENT,
                            "unexpected indentation at top level",
                            t.range,
                        );
                    }
                }
                Token::Word(w) if w == "import" => {
                    let id = self.recovering(|p| p.import());
                    children.push(id);
                }
                _ => {
                    let id = self.recovering(|p| p.top_level_section());
                    children.push(id);
                }
            }
        }
        let end = self.cur().range.end;
        self.node_at(SyntaxKind::File, children, Range::new(start, end.max(start)))
    }

    fn import(&mut self) -> PResult<NodeId> {
        let start = self.start();
        self.advance();
        let mut children = Vec::new();
        loop {
            match self.peek() {
                Token::Word(_) => children.push(self.leaf(SyntaxKind::Identifier)),
                _ => return Err(self.unexpected("an import path segment")),
            }
            if *self.peek() == Token::Slash {
                self.advance();
            } else {
                break;
            }
        }
        if self.is_word("as") {
            let alias_start = self.start();
            self.advance();
            match self.peek() {
                Token::Word(_) => {
                    let name = self.leaf(SyntaxKind::Identifier);
                    children.push(self.node(SyntaxKind::ImportAlias, vec![name], alias_start));
                }
                _ => return Err(self.unexpected("an import alias")),
            }
        }
        let id = self.node(SyntaxKind::Import, children, start);
        self.expect_line_end()?;
        Ok(id)
    }

    fn top_level_section(&mut self) -> PResult<NodeId> {
        match (self.peek(), self.peek_at(1)) {
            (Token::Word(w), next)
                if w.starts_with(|c: char| c.is_lowercase())
                    && !matches!(next, Token::Colon | Token::Arrow) =>
            {
                self.section()
            }
            _ => Err(self.unexpected("'import' or a section")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::scan;
    use crate::options::ScanOptions;

    fn parse_src(src: &str) -> Outcome<SyntaxTree> {
        let tokens = scan(src, &ScanOptions::default());
        assert!(
            tokens.diagnostics.is_empty(),
            "lexical errors: {:?}",
            tokens.diagnostics
        );
        Parser::default().parse(&tokens.value)
    }

    fn kinds_under(tree: &SyntaxTree, id: NodeId) -> Vec<SyntaxKind> {
        tree.children(id).map(|(_, n)| n.kind).collect()
    }

    #[test]
    fn parses_imports_and_sections() {
        let out = parse_src("import Shared/Common as common\nagent Coffee\n  displayName: \"Quick\"\n");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let tree = &out.value;
        let root = tree.root().unwrap();
        assert_eq!(
            kinds_under(tree, root),
            vec![SyntaxKind::Import, SyntaxKind::Section]
        );
        let (import, _) = tree.children(root).next().unwrap();
        assert_eq!(
            kinds_under(tree, import),
            vec![
                SyntaxKind::Identifier,
                SyntaxKind::Identifier,
                SyntaxKind::ImportAlias
            ]
        );
    }

    #[test]
    fn broken_statement_becomes_error_node_and_parsing_resumes() {
        let src = "agent A\n  displayName: \"A\"\n  Welcome \"x\" ->\n  description: \"d\"\n";
        let out = parse_src(src);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code.as_deref(), Some(codes::UNEXPECTED_TOKEN));
        let tree = &out.value;
        let (section, _) = tree.children(tree.root().unwrap()).next().unwrap();
        assert_eq!(
            kinds_under(tree, section),
            vec![
                SyntaxKind::SectionHeader,
                SyntaxKind::Attribute,
                SyntaxKind::Error,
                SyntaxKind::Attribute
            ]
        );
        assert_eq!(tree.errors().len(), 1);
    }

    #[test]
    fn broken_header_swallows_its_block() {
        let src = "agent A\n  flow F ->\n    start: X\n  description: \"d\"\n";
        let out = parse_src(src);
        let tree = &out.value;
        let (section, _) = tree.children(tree.root().unwrap()).next().unwrap();
        assert_eq!(
            kinds_under(tree, section),
            vec![
                SyntaxKind::SectionHeader,
                SyntaxKind::Error,
                SyntaxKind::Attribute
            ]
        );
    }

    #[test]
    fn unexpected_indent_is_reported_but_absorbed() {
        let out = parse_src("agent A\n  displayName: \"A\"\n      description: \"d\"\n");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code.as_deref(), Some(codes::UNEXPECTED_INDENT));
        let tree = &out.value;
        let (section, _) = tree.children(tree.root().unwrap()).next().unwrap();
        assert_eq!(
            kinds_under(tree, section),
            vec![
                SyntaxKind::SectionHeader,
                SyntaxKind::Attribute,
                SyntaxKind::Attribute
            ]
        );
    }

    #[test]
    fn recovered_indent_is_absorbed_silently() {
        let tokens = scan("agent A\n    flow F\n  on X\n", &ScanOptions::default());
        assert_eq!(tokens.diagnostics.len(), 1);
        let out = Parser::default().parse(&tokens.value);
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        let tree = &out.value;
        let (section, _) = tree.children(tree.root().unwrap()).next().unwrap();
        assert_eq!(
            kinds_under(tree, section),
            vec![
                SyntaxKind::SectionHeader,
                SyntaxKind::Section,
                SyntaxKind::Section
            ]
        );
    }

    #[test]
    fn error_cap_stops_parsing() {
        let mut src = String::from("agent A\n");
        for _ in 0..10 {
            src.push_str("  Bad \"x\" y\n");
        }
        let tokens = scan(&src, &ScanOptions::default());
        let parser = Parser::new(ParseOptions {
            max_errors: 3,
            max_depth: 64,
        });
        let out = parser.parse(&tokens.value);
        assert_eq!(out.diagnostics.len(), 3);
        let tree = &out.value;
        let last = tree
            .children(tree.root().unwrap())
            .last()
            .map(|(_, n)| n.kind);
        assert_eq!(last, Some(SyntaxKind::Error));
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let src = "agent A\n  meta: ((((((((1))))))))\n";
        let tokens = scan(src, &ScanOptions::default());
        let parser = Parser::new(ParseOptions {
            max_errors: 100,
            max_depth: 4,
        });
        let out = parser.parse(&tokens.value);
        assert_eq!(
            out.diagnostics[0].code.as_deref(),
            Some(codes::NESTING_TOO_DEEP)
        );
    }

    #[test]
    fn cancelled_parse_returns_cancelled() {
        let tokens = scan("agent A\n", &ScanOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = Parser::default().parse_cancellable(&tokens.value, &cancel);
        assert!(matches!(res, Err(Cancelled)));
    }

    #[test]
    fn empty_input_yields_empty_file() {
        let out = Parser::default().parse(&[]);
        let tree = &out.value;
        assert_eq!(tree.node(tree.root().unwrap()).kind, SyntaxKind::File);
        assert!(out.diagnostics.is_empty());
    }
}
