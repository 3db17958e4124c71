//! Indentation-aware scanner.
//!
//! Produces a flat token stream in which block structure is explicit:
//! every logical line that carries tokens ends in [`Token::Newline`], and a
//! change of leading-whitespace width is reported as [`Token::Indent`] or
//! [`Token::Dedent`] in front of the next line's first token. Inside
//! brackets line breaks are plain whitespace, as long as the following lines
//! are indented past the line that opened the bracket.
//!
//! Scanning never fails. Lexical problems become diagnostics and the stream
//! is patched (error tokens, forced indentation levels) so the parser always
//! sees a balanced, EOF-terminated sequence.

use crate::diagnostic::{codes, Diagnostic, Outcome, Position, Range};
use crate::options::{ScanOptions, TabPolicy};
use std::fmt;
use tracing::debug;

/// Trailing-whitespace handling of a `|` block string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    /// `|`: lines trimmed, exactly one trailing newline.
    Clean,
    /// `|-`: lines trimmed, no trailing newline.
    Trim,
    /// `+|`: trailing blank lines kept.
    Preserve,
    /// `+|+`: trailing blank lines and relative indentation kept.
    PreserveAll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords, distinguished in the parser.
    Word(String),
    /// Quoted or triple-quoted string, escapes resolved.
    Str(String),
    BlockStr {
        mode: BlockMode,
        text: String,
    },
    /// Kept as written so the exact representation survives.
    Number(String),
    /// `:name`, without the colon.
    Atom(String),
    Bool(bool),
    Null,
    /// `@a.b.c`, without the `@`.
    Variable(String),
    /// `$js> ...`, `$ts> ...` or `$> ...` up to the end of the line.
    Code {
        lang: Option<String>,
        code: String,
    },
    /// `<name value | qualifier>`.
    TypeTag {
        name: String,
        value: String,
        qualifier: Option<String>,
    },
    // Punctuation
    Arrow,
    Colon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Hyphen,
    Spread,
    Slash,
    // Layout
    Newline,
    Indent,
    Dedent,
    /// Placeholder for input the scanner could not make sense of.
    Error(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "'{}'", w),
            Token::Str(_) | Token::BlockStr { .. } => f.write_str("string"),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Atom(a) => write!(f, "':{}'", a),
            Token::Bool(b) => write!(f, "boolean {}", b),
            Token::Null => f.write_str("null"),
            Token::Variable(v) => write!(f, "'@{}'", v),
            Token::Code { .. } => f.write_str("code expression"),
            Token::TypeTag { name, .. } => write!(f, "type tag <{}>", name),
            Token::Arrow => f.write_str("'->'"),
            Token::Colon => f.write_str("':'"),
            Token::Comma => f.write_str("','"),
            Token::Dot => f.write_str("'.'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::LBrace => f.write_str("'{'"),
            Token::RBrace => f.write_str("'}'"),
            Token::Hyphen => f.write_str("'-'"),
            Token::Spread => f.write_str("'...'"),
            Token::Slash => f.write_str("'/'"),
            Token::Newline => f.write_str("end of line"),
            Token::Indent => f.write_str("indentation"),
            Token::Dedent => f.write_str("end of block"),
            Token::Error(s) => write!(f, "invalid input '{}'", s),
            Token::Eof => f.write_str("end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub range: Range,
    /// Comments preceding the token, without the `#`.
    pub trivia: Vec<String>,
    /// Set on the INDENT synthesized to recover from an inconsistent dedent.
    pub recovered: bool,
}

/// Scan `source` into tokens. The stream always ends with [`Token::Eof`] and
/// carries as many DEDENTs as INDENTs.
pub fn scan(source: &str, options: &ScanOptions) -> Outcome<Vec<Spanned>> {
    let mut scanner = Scanner::new(source, options);
    while scanner.start_line() {
        scanner.scan_line();
    }
    scanner.finish();
    debug!(
        tokens = scanner.tokens.len(),
        diagnostics = scanner.diagnostics.len(),
        "scanned source"
    );
    Outcome::new(scanner.tokens, scanner.diagnostics)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: u32,
    column: u32,
    offset: usize,
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    offset: usize,
    options: &'a ScanOptions,
    indents: Vec<usize>,
    line_indent: usize,
    /// Open brackets, innermost last.
    open: Vec<(char, Range)>,
    line_has_tokens: bool,
    trivia: Vec<String>,
    tokens: Vec<Spanned>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Scanner<'a> {
    fn new(source: &str, options: &'a ScanOptions) -> Self {
        Scanner {
            chars: source.chars().collect(),
            pos: 0,
            line: 0,
            column: 0,
            offset: 0,
            options,
            indents: vec![0],
            line_indent: 0,
            open: Vec::new(),
            line_has_tokens: false,
            trivia: Vec::new(),
            tokens: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
            offset: self.offset,
        }
    }

    fn reset(&mut self, mark: Mark) {
        self.pos = mark.pos;
        self.line = mark.line;
        self.column = mark.column;
        self.offset = mark.offset;
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn current_indent(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    fn push(&mut self, token: Token, start: Position) {
        let range = Range::new(start, self.here());
        self.push_at(token, range);
    }

    fn push_at(&mut self, token: Token, range: Range) {
        let trivia = std::mem::take(&mut self.trivia);
        self.tokens.push(Spanned {
            token,
            range,
            trivia,
            recovered: false,
        });
        self.line_has_tokens = true;
    }

    fn push_layout(&mut self, token: Token, at: Position, recovered: bool) {
        self.tokens.push(Spanned {
            token,
            range: Range::point(at),
            trivia: Vec::new(),
            recovered,
        });
    }

    fn error(&mut self, code: &str, message: impl Into<String>, range: Range) {
        self.diagnostics.push(Diagnostic::error(code, message, range));
    }

    // ── Lines and indentation ────────────────────────────────────────

    /// Skip blank and comment-only lines, then settle the indentation of the
    /// next line that carries tokens. Returns false at end of input.
    fn start_line(&mut self) -> bool {
        loop {
            let line_start = self.here();
            let (width, tabs, spaces) = self.measure_indent();
            match self.peek() {
                None => return false,
                Some('\n') => {
                    self.bump();
                }
                Some('\r') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                Some('#') => self.comment(),
                Some(_) => {
                    self.check_tabs(tabs, spaces, Range::new(line_start, self.here()));
                    self.line_indent = width;
                    self.apply_indent(width, line_start);
                    return true;
                }
            }
        }
    }

    fn measure_indent(&mut self) -> (usize, usize, usize) {
        let (mut width, mut tabs, mut spaces) = (0, 0, 0);
        while let Some(c) = self.peek() {
            match c {
                ' ' => {
                    width += 1;
                    spaces += 1;
                }
                '\t' => {
                    width += self.options.tab_width;
                    tabs += 1;
                }
                _ => break,
            }
            self.bump();
        }
        (width, tabs, spaces)
    }

    fn check_tabs(&mut self, tabs: usize, spaces: usize, range: Range) {
        if tabs == 0 {
            return;
        }
        match self.options.tabs {
            TabPolicy::Reject => self.error(
                codes::TAB_INDENTATION,
                "tab character in indentation; indent with spaces",
                range,
            ),
            TabPolicy::Normalize if spaces > 0 => self.error(
                codes::MIXED_INDENTATION,
                "indentation mixes tabs and spaces",
                range,
            ),
            TabPolicy::Normalize => {}
        }
    }

    fn apply_indent(&mut self, width: usize, line_start: Position) {
        let at = self.here();
        let top = self.current_indent();
        if width > top {
            self.indents.push(width);
            self.push_layout(Token::Indent, at, false);
        } else if width < top {
            while width < self.current_indent() {
                self.indents.pop();
                self.push_layout(Token::Dedent, at, false);
            }
            if width != self.current_indent() {
                let levels: Vec<String> = self.indents.iter().map(|w| w.to_string()).collect();
                self.error(
                    codes::INCONSISTENT_INDENTATION,
                    format!(
                        "inconsistent indentation: width {} matches no enclosing level ({})",
                        width,
                        levels.join(", ")
                    ),
                    Range::new(line_start, at),
                );
                self.indents.push(width);
                self.push_layout(Token::Indent, at, true);
            }
        }
    }

    fn end_line(&mut self) {
        if self.line_has_tokens {
            let at = self.here();
            self.push_layout(Token::Newline, at, false);
            self.line_has_tokens = false;
        }
    }

    fn scan_line(&mut self) {
        loop {
            match self.peek() {
                None => {
                    self.close_unbalanced();
                    self.end_line();
                    return;
                }
                Some('\n') => {
                    if !self.open.is_empty() {
                        if self.bracket_continues() {
                            self.bump();
                            continue;
                        }
                        self.close_unbalanced();
                    }
                    self.end_line();
                    self.bump();
                    return;
                }
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('#') => self.comment(),
                Some(_) => {
                    if self.scan_token() {
                        return;
                    }
                }
            }
        }
    }

    /// Whether the next line carrying tokens is indented past the line that
    /// opened the pending brackets. Blank and comment lines are skipped.
    fn bracket_continues(&self) -> bool {
        let mut i = self.pos + 1;
        loop {
            let mut width = 0;
            while let Some(c) = self.chars.get(i) {
                match c {
                    ' ' => width += 1,
                    '\t' => width += self.options.tab_width,
                    _ => break,
                }
                i += 1;
            }
            match self.chars.get(i) {
                None => return false,
                Some('\n') | Some('\r') | Some('#') => {
                    while self.chars.get(i).is_some_and(|c| *c != '\n') {
                        i += 1;
                    }
                    i += 1;
                }
                // A closer may sit at the opener's indentation.
                Some(c) => {
                    return width > self.line_indent
                        || (width == self.line_indent && matches!(c, ')' | ']' | '}'))
                }
            }
        }
    }

    /// Report brackets left open at the end of their logical line and
    /// resume indentation tracking.
    fn close_unbalanced(&mut self) {
        for (c, range) in std::mem::take(&mut self.open) {
            self.error(codes::UNEXPECTED_TOKEN, format!("unclosed '{}'", c), range);
        }
    }

    fn finish(&mut self) {
        let at = self.here();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push_layout(Token::Dedent, at, false);
        }
        let trivia = std::mem::take(&mut self.trivia);
        self.tokens.push(Spanned {
            token: Token::Eof,
            range: Range::point(at),
            trivia,
            recovered: false,
        });
    }

    fn comment(&mut self) {
        self.bump();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.bump();
        }
        self.trivia.push(text.trim().to_owned());
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Scan one token. Returns true when the token consumed the rest of the
    /// logical line (block strings).
    fn scan_token(&mut self) -> bool {
        let start = self.here();
        let Some(c) = self.peek() else {
            return false;
        };
        let next = self.peek_at(1);
        match c {
            '"' => {
                if next == Some('"') && self.peek_at(2) == Some('"') {
                    self.triple_string(start);
                } else {
                    self.string(start);
                }
            }
            '-' if next == Some('>') => {
                self.bump();
                self.bump();
                self.push(Token::Arrow, start);
            }
            '-' if next.is_some_and(|n| n.is_ascii_digit()) => self.number(start),
            '-' => self.single(Token::Hyphen, start),
            '0'..='9' => self.number(start),
            ':' if next.is_some_and(is_ident_start) && self.atom_allowed() => {
                self.bump();
                let name = self.ident();
                self.push(Token::Atom(name), start);
            }
            ':' => self.single(Token::Colon, start),
            '@' => self.variable(start),
            '<' => self.type_tag(start),
            '$' => self.code(start),
            '.' if next == Some('.') && self.peek_at(2) == Some('.') => {
                self.bump();
                self.bump();
                self.bump();
                self.push(Token::Spread, start);
            }
            '.' => self.single(Token::Dot, start),
            ',' => self.single(Token::Comma, start),
            '/' => self.single(Token::Slash, start),
            '(' | '[' | '{' => {
                let token = match c {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                };
                self.single(token, start);
                self.open.push((c, Range::new(start, self.here())));
            }
            ')' | ']' | '}' => {
                self.open.pop();
                let token = match c {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                };
                self.single(token, start);
            }
            '|' | '+' => return self.block_string(start),
            c if is_ident_start(c) => {
                let word = self.ident();
                let token = match word.as_str() {
                    "True" | "true" | "Yes" => Token::Bool(true),
                    "False" | "false" | "No" => Token::Bool(false),
                    "Null" | "None" | "null" => Token::Null,
                    _ => Token::Word(word),
                };
                self.push(token, start);
            }
            other => {
                self.bump();
                self.error(
                    codes::UNEXPECTED_CHARACTER,
                    format!("unexpected character '{}'", other),
                    Range::new(start, self.here()),
                );
                self.push(Token::Error(other.to_string()), start);
            }
        }
        false
    }

    fn single(&mut self, token: Token, start: Position) {
        self.bump();
        self.push(token, start);
    }

    fn ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            s.push(c);
            self.bump();
        }
        s
    }

    /// `:name` is an atom only when it does not directly follow a word or a
    /// closing delimiter (`key:value` stays an attribute).
    fn atom_allowed(&self) -> bool {
        match self.pos.checked_sub(1).and_then(|p| self.chars.get(p)) {
            None => true,
            Some(&p) => !(is_ident_char(p) || matches!(p, ')' | ']' | '}' | '"')),
        }
    }

    fn number(&mut self, start: Position) {
        let mut s = String::new();
        if self.peek() == Some('-') {
            s.push('-');
            self.bump();
        }
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            s.push(c);
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            s.push('.');
            self.bump();
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                s.push(c);
                self.bump();
            }
        }
        self.push(Token::Number(s), start);
    }

    fn string(&mut self, start: Position) {
        self.bump();
        let mut s = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.error(
                        codes::UNTERMINATED_STRING,
                        "unterminated string literal",
                        Range::new(start, self.here()),
                    );
                    break;
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(other) => {
                            s.push('\\');
                            s.push(other);
                        }
                        None => {}
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.bump();
                }
            }
        }
        self.push(Token::Str(s), start);
    }

    fn triple_string(&mut self, start: Position) {
        for _ in 0..3 {
            self.bump();
        }
        let mut raw = String::new();
        let mut closed = false;
        while let Some(c) = self.peek() {
            if c == '"' && self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') {
                for _ in 0..3 {
                    self.bump();
                }
                closed = true;
                break;
            }
            raw.push(c);
            self.bump();
        }
        if !closed {
            self.error(
                codes::UNTERMINATED_STRING,
                "unterminated triple-quoted string",
                Range::new(start, self.here()),
            );
        }
        self.push(Token::Str(dedent_triple(&raw)), start);
    }

    fn variable(&mut self, start: Position) {
        self.bump();
        let mut path = self.ident();
        while self.peek() == Some('.') && self.peek_at(1).is_some_and(is_ident_start) {
            self.bump();
            path.push('.');
            path.push_str(&self.ident());
        }
        if path.is_empty() {
            self.error(
                codes::UNEXPECTED_CHARACTER,
                "expected a variable name after '@'",
                Range::new(start, self.here()),
            );
            self.push(Token::Error("@".into()), start);
        } else {
            self.push(Token::Variable(path), start);
        }
    }

    fn type_tag(&mut self, start: Position) {
        self.bump();
        let mut inner = String::new();
        let mut closed = false;
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
            if c == '>' {
                closed = true;
                break;
            }
            inner.push(c);
        }
        if !closed {
            self.error(
                codes::UNTERMINATED_STRING,
                "unterminated type tag; expected '>'",
                Range::new(start, self.here()),
            );
            self.push(Token::Error(format!("<{}", inner)), start);
            return;
        }
        let inner = inner.trim();
        let (name, rest) = match inner.split_once(char::is_whitespace) {
            Some((n, r)) => (n, r.trim()),
            None => (inner, ""),
        };
        let (value, qualifier) = match rest.split_once('|') {
            Some((v, q)) => (v.trim(), Some(q.trim().to_owned())),
            None => (rest, None),
        };
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        self.push(
            Token::TypeTag {
                name: name.to_owned(),
                value: value.to_owned(),
                qualifier,
            },
            start,
        );
    }

    fn code(&mut self, start: Position) {
        self.bump();
        let lang = self.ident();
        if self.peek() != Some('>') {
            self.error(
                codes::UNEXPECTED_CHARACTER,
                "expected '$js>', '$ts>' or '$>' to start embedded code",
                Range::new(start, self.here()),
            );
            self.push(Token::Error(format!("${}", lang)), start);
            return;
        }
        self.bump();
        let mut code = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            code.push(c);
            self.bump();
        }
        let lang = if lang.is_empty() { None } else { Some(lang) };
        self.push(
            Token::Code {
                lang,
                code: code.trim().to_owned(),
            },
            start,
        );
    }

    /// `|`, `|-`, `+|` or `+|+` ending a line, followed by the more-indented
    /// lines forming the string body.
    fn block_string(&mut self, start: Position) -> bool {
        let mode = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some('|'), Some('-'), _) => Some((BlockMode::Trim, 2)),
            (Some('|'), _, _) => Some((BlockMode::Clean, 1)),
            (Some('+'), Some('|'), Some('+')) => Some((BlockMode::PreserveAll, 3)),
            (Some('+'), Some('|'), _) => Some((BlockMode::Preserve, 2)),
            _ => None,
        };
        let Some((mode, len)) = mode else {
            self.bump();
            self.error(
                codes::UNEXPECTED_CHARACTER,
                "unexpected character '+'",
                Range::new(start, self.here()),
            );
            self.push(Token::Error("+".into()), start);
            return false;
        };
        for _ in 0..len {
            self.bump();
        }
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.bump();
        }
        if self.peek() == Some('#') {
            self.comment();
        }
        if !self.open.is_empty() || !matches!(self.peek(), None | Some('\n')) {
            self.error(
                codes::UNEXPECTED_CHARACTER,
                "a block string marker must end its line",
                Range::new(start, self.here()),
            );
            self.push(Token::Error("|".into()), start);
            return false;
        }

        let line_end = self.here();
        self.bump();
        let mut lines: Vec<Option<(usize, String)>> = Vec::new();
        loop {
            let mark = self.mark();
            if self.peek().is_none() {
                break;
            }
            let (width, _, _) = self.measure_indent();
            match self.peek() {
                None => {
                    self.reset(mark);
                    break;
                }
                Some('\n') => {
                    self.bump();
                    lines.push(None);
                }
                Some('\r') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                    lines.push(None);
                }
                Some(_) if width > self.line_indent => {
                    let mut content = String::new();
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        content.push(c);
                        self.bump();
                    }
                    self.bump();
                    lines.push(Some((width, content.trim_end().to_owned())));
                }
                Some(_) => {
                    self.reset(mark);
                    break;
                }
            }
        }

        let text = render_block(mode, &lines);
        self.push_at(
            Token::BlockStr { mode, text },
            Range::new(start, line_end),
        );
        self.push_layout(Token::Newline, line_end, false);
        self.line_has_tokens = false;
        true
    }
}

fn render_block(mode: BlockMode, lines: &[Option<(usize, String)>]) -> String {
    let base = lines
        .iter()
        .flatten()
        .map(|(w, _)| *w)
        .min()
        .unwrap_or(0);
    let mut rendered: Vec<String> = lines
        .iter()
        .map(|line| match line {
            None => String::new(),
            Some((width, content)) if mode == BlockMode::PreserveAll => {
                format!("{}{}", " ".repeat(width - base), content)
            }
            Some((_, content)) => content.clone(),
        })
        .collect();
    match mode {
        BlockMode::Clean | BlockMode::Trim => {
            while rendered.last().is_some_and(|l| l.is_empty()) {
                rendered.pop();
            }
            let mut text = rendered.join("\n");
            if mode == BlockMode::Clean && !text.is_empty() {
                text.push('\n');
            }
            text
        }
        BlockMode::Preserve | BlockMode::PreserveAll => {
            let mut text = rendered.join("\n");
            text.push('\n');
            text
        }
    }
}

/// Drop the line break after the opening quotes, the whitespace-only line
/// before the closing quotes and the indentation common to all lines.
fn dedent_triple(raw: &str) -> String {
    let body = raw.strip_prefix('\n').unwrap_or(raw);
    let body = match body.rfind('\n') {
        Some(i) if body[i + 1..].trim().is_empty() => &body[..i],
        _ => body,
    };
    let common = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    body.lines()
        .map(|l| l.get(common..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<Token> {
        scan(src, &ScanOptions::default())
            .value
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    fn word(w: &str) -> Token {
        Token::Word(w.to_owned())
    }

    #[test]
    fn nested_blocks_produce_layout_tokens() {
        let toks = kinds("agent A\n  displayName: \"Hi\"\n  flow F\n    start: X\n");
        assert_eq!(
            toks,
            vec![
                word("agent"),
                word("A"),
                Token::Newline,
                Token::Indent,
                word("displayName"),
                Token::Colon,
                Token::Str("Hi".into()),
                Token::Newline,
                word("flow"),
                word("F"),
                Token::Newline,
                Token::Indent,
                word("start"),
                Token::Colon,
                word("X"),
                Token::Newline,
                Token::Dedent,
                Token::Dedent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_do_not_affect_indentation() {
        let out = scan(
            "agent A\n\n      # stray comment\n  flow F\n",
            &ScanOptions::default(),
        );
        assert!(out.diagnostics.is_empty());
        let flow = out
            .value
            .iter()
            .find(|s| s.token == word("flow"))
            .unwrap();
        assert_eq!(flow.trivia, vec!["stray comment".to_string()]);
        let indents = out.value.iter().filter(|s| s.token == Token::Indent).count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn inconsistent_dedent_forces_a_new_level() {
        let out = scan("agent A\n    flow F\n  on X\n", &ScanOptions::default());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(
            out.diagnostics[0].code.as_deref(),
            Some(codes::INCONSISTENT_INDENTATION)
        );
        assert_eq!(out.diagnostics[0].range.start.line, 2);

        let tokens: Vec<&Spanned> = out.value.iter().collect();
        let recovered: Vec<_> = tokens.iter().filter(|s| s.recovered).collect();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].token, Token::Indent);

        let indents = tokens.iter().filter(|s| s.token == Token::Indent).count();
        let dedents = tokens.iter().filter(|s| s.token == Token::Dedent).count();
        assert_eq!(indents, dedents);
    }

    #[test]
    fn tabs_are_rejected_by_default() {
        let out = scan("agent A\n\tflow F\n", &ScanOptions::default());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code.as_deref(), Some(codes::TAB_INDENTATION));
    }

    #[test]
    fn normalized_tabs_must_not_mix_with_spaces() {
        let opts = ScanOptions {
            tabs: TabPolicy::Normalize,
            tab_width: 2,
        };
        let clean = scan("agent A\n\tflow F\n  on X\n", &opts);
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
        let mixed = scan("agent A\n \tflow F\n", &opts);
        assert_eq!(
            mixed.diagnostics[0].code.as_deref(),
            Some(codes::MIXED_INDENTATION)
        );
    }

    #[test]
    fn literals() {
        let toks = kinds("x: :end @reply.text -1.5 <phone \"+1-555\" | mobile> ...Base True None\n");
        assert_eq!(
            toks[2..10].to_vec(),
            vec![
                Token::Atom("end".into()),
                Token::Variable("reply.text".into()),
                Token::Number("-1.5".into()),
                Token::TypeTag {
                    name: "phone".into(),
                    value: "+1-555".into(),
                    qualifier: Some("mobile".into()),
                },
                Token::Spread,
                word("Base"),
                Token::Bool(true),
                Token::Null,
            ]
        );
    }

    #[test]
    fn embedded_code_runs_to_end_of_line() {
        let toks = kinds("-> Done when $js> context.count > 2\n");
        assert_eq!(
            toks[3],
            Token::Code {
                lang: Some("js".into()),
                code: "context.count > 2".into()
            }
        );
        assert_eq!(toks[4], Token::Newline);
    }

    #[test]
    fn newlines_inside_brackets_are_whitespace() {
        let toks = kinds("tags: (\n  \"a\",\n  \"b\"\n)\nnext: 1\n");
        let newlines = toks.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newlines, 2);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn unclosed_bracket_ends_at_the_next_shallower_line() {
        let out = scan(
            "agent A\n  tags: (\n  flow F\n    start: X\n    X -> :end\n",
            &ScanOptions::default(),
        );
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].code(), Some(codes::UNEXPECTED_TOKEN));
        assert_eq!(out.diagnostics[0].message, "unclosed '('");
        assert_eq!(out.diagnostics[0].range.start, Position::new(1, 8, 16));

        let toks: Vec<Token> = out.value.into_iter().map(|s| s.token).collect();
        let paren = toks.iter().position(|t| *t == Token::LParen).unwrap();
        assert_eq!(toks[paren + 1], Token::Newline);
        assert_eq!(toks[paren + 2], word("flow"));
        assert_eq!(toks.iter().filter(|t| **t == Token::Indent).count(), 2);
        assert_eq!(toks.iter().filter(|t| **t == Token::Dedent).count(), 2);
    }

    #[test]
    fn unclosed_bracket_at_end_of_input_is_reported() {
        let out = scan("tags: [\"a\",\n  \"b\"\n", &ScanOptions::default());
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].message, "unclosed '['");
    }

    #[test]
    fn crlf_blank_lines_stay_inside_block_strings() {
        let toks = kinds("d: +|\r\n  a\r\n\r\n  b\r\nnext: 1\r\n");
        assert_eq!(
            toks[2],
            Token::BlockStr {
                mode: BlockMode::Preserve,
                text: "a\n\nb\n".into()
            }
        );
        assert_eq!(toks[4], word("next"));
    }

    #[test]
    fn block_string_modes() {
        let src = "description: |\n  Hello\n    world\n\nnext: 1\n";
        let out = scan(src, &ScanOptions::default());
        assert!(out.diagnostics.is_empty());
        assert_eq!(
            out.value[2].token,
            Token::BlockStr {
                mode: BlockMode::Clean,
                text: "Hello\nworld\n".into()
            }
        );
        assert_eq!(out.value[3].token, Token::Newline);
        assert_eq!(out.value[4].token, word("next"));

        let trimmed = kinds("d: |-\n  a\n  b\n");
        assert_eq!(
            trimmed[2],
            Token::BlockStr {
                mode: BlockMode::Trim,
                text: "a\nb".into()
            }
        );

        let all = kinds("d: +|+\n  a\n    b\n\n");
        assert_eq!(
            all[2],
            Token::BlockStr {
                mode: BlockMode::PreserveAll,
                text: "a\n  b\n\n".into()
            }
        );
    }

    #[test]
    fn triple_quoted_strings_are_dedented() {
        let toks = kinds("text: \"\"\"\n    line one\n      line two\n    \"\"\"\n");
        assert_eq!(toks[2], Token::Str("line one\n  line two".into()));
        assert_eq!(toks[3], Token::Newline);
    }

    #[test]
    fn unterminated_string_is_recovered() {
        let out = scan("text Welcome \"Hello\nnext: 1\n", &ScanOptions::default());
        assert_eq!(
            out.diagnostics[0].code.as_deref(),
            Some(codes::UNTERMINATED_STRING)
        );
        assert_eq!(out.value[2].token, Token::Str("Hello".into()));
        assert_eq!(out.value[3].token, Token::Newline);
    }

    #[test]
    fn unknown_character_becomes_error_token() {
        let out = scan("a ^ b\n", &ScanOptions::default());
        assert_eq!(out.value[1].token, Token::Error("^".into()));
        assert_eq!(
            out.diagnostics[0].code.as_deref(),
            Some(codes::UNEXPECTED_CHARACTER)
        );
    }

    #[test]
    fn attribute_colon_is_not_an_atom() {
        let toks = kinds("start:Welcome\n");
        assert_eq!(toks[..3].to_vec(), vec![word("start"), Token::Colon, word("Welcome")]);
    }

    #[test]
    fn positions_are_zero_based() {
        let out = scan("agent A\n  flow F\n", &ScanOptions::default());
        let flow = out.value.iter().find(|s| s.token == word("flow")).unwrap();
        assert_eq!(flow.range.start, Position::new(1, 2, 10));
        assert_eq!(flow.range.end, Position::new(1, 6, 14));
    }
}
