//! Concrete syntax tree, stored in an index-based arena.
//!
//! Nodes refer to their children by [`NodeId`]. Children are always
//! allocated before their parent, so the tree can be walked with a plain
//! worklist and never needs recursion.

use crate::diagnostic::Range;
use crate::lexer::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    File,
    /// `import A/B as c`: Identifier segments, then an optional ImportAlias.
    Import,
    ImportAlias,
    /// SectionHeader followed by body items.
    Section,
    /// SectionKeyword, optional SectionName, then parameter values.
    SectionHeader,
    SectionKeyword,
    SectionName,
    /// AttributeKey and a value.
    Attribute,
    AttributeKey,
    // Values
    StringLiteral,
    NumberLiteral,
    BooleanLiteral,
    NullLiteral,
    AtomLiteral,
    Identifier,
    Variable,
    CodeLiteral,
    TypeTag,
    List,
    /// DictEntry children.
    Dict,
    /// DictKey and a value.
    DictEntry,
    DictKey,
    // Flow statements
    /// Discriminant value, then MatchCase (or Error) children.
    MatchBlock,
    /// Pattern value and a Transition.
    MatchCase,
    /// ContextOperation*, one target, optional WithClause and WhenClause.
    Transition,
    /// Identifier source and a Transition.
    FlowRule,
    StateReference,
    Spread,
    /// Token holds the operation word; children are the variable and the
    /// operand.
    ContextOperation,
    ResultOperand,
    StateTarget,
    TerminalTarget,
    /// Identifier flow name, then ResultHandler (or Error) children.
    FlowInvocation,
    /// AtomLiteral result and a Transition.
    ResultHandler,
    /// DictEntry children.
    WithClause,
    /// A single value.
    WhenClause,
    /// Input that could not be parsed; `error` holds the reason.
    Error,
}

impl SyntaxKind {
    pub fn is_value(self) -> bool {
        matches!(
            self,
            SyntaxKind::StringLiteral
                | SyntaxKind::NumberLiteral
                | SyntaxKind::BooleanLiteral
                | SyntaxKind::NullLiteral
                | SyntaxKind::AtomLiteral
                | SyntaxKind::Identifier
                | SyntaxKind::Variable
                | SyntaxKind::CodeLiteral
                | SyntaxKind::TypeTag
                | SyntaxKind::List
                | SyntaxKind::Dict
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    pub children: Vec<NodeId>,
    /// Literal payload of leaf nodes.
    pub token: Option<Token>,
    pub range: Range,
    pub error: Option<String>,
}

impl SyntaxNode {
    /// Text of a leaf: identifier, string content, atom or variable name,
    /// number as written, or code body.
    pub fn text(&self) -> Option<&str> {
        match self.token.as_ref()? {
            Token::Word(s)
            | Token::Str(s)
            | Token::Atom(s)
            | Token::Variable(s)
            | Token::Number(s) => Some(s),
            Token::BlockStr { text, .. } => Some(text),
            Token::Code { code, .. } => Some(code),
            Token::TypeTag { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == SyntaxKind::Error
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    root: Option<NodeId>,
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc(&mut self, node: SyntaxNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SyntaxNode {
        &mut self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &SyntaxNode)> {
        self.node(id)
            .children
            .iter()
            .map(move |&child| (child, self.node(child)))
    }

    /// Pre-order walk from `id`, including `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev().copied());
        }
        out
    }

    /// ERROR nodes reachable from the root, in source order.
    pub fn errors(&self) -> Vec<&SyntaxNode> {
        match self.root {
            Some(root) => self
                .descendants(root)
                .into_iter()
                .map(|id| self.node(id))
                .filter(|n| n.is_error())
                .collect(),
            None => Vec::new(),
        }
    }
}
