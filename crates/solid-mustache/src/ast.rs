/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template AST types.
//!
//! The shape mirrors the Handlebars AST: a [`Program`] is an ordered list of
//! [`Statement`]s, blocks own nested programs, and paths keep their original
//! text alongside the split parts and relative depth.

/// One-based line and column where a node starts in its template source.
/// Zero when the position is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A sequence of statements, plus the block parameters declared by the
/// enclosing block (`as |item index|`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub body: Vec<Statement>,
    pub block_params: Vec<String>,
}

impl Program {
    pub fn new(body: Vec<Statement>) -> Self {
        Self {
            body,
            block_params: Vec::new(),
        }
    }
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Literal text.
    Content(ContentStatement),

    /// Interpolation: `{{path}}` or `{{helper path key=value}}`.
    Mustache(MustacheStatement),

    /// Block: `{{#head params}}...{{else}}...{{/head}}`.
    Block(BlockStatement),

    /// Partial reference: `{{> name context key=value}}`.
    Partial(PartialStatement),

    /// Comment (not rendered): `{{! ... }}`.
    Comment(CommentStatement),

    /// Reference to a factored literal constant. Produced by the content
    /// optimizer, never by the parser.
    Constant(ConstantRef),
}

/// Literal text node.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStatement {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MustacheStatement {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    /// `false` for `{{{...}}}`. Output is never HTML-escaped,
    /// the flag is kept for fidelity only.
    pub escaped: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub path: PathExpression,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub program: Program,
    pub inverse: Option<Program>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialStatement {
    pub name: String,
    pub params: Vec<Expression>,
    pub hash: Hash,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentStatement {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantRef {
    pub name: String,
    pub span: Span,
}

/// A path such as `person.name`, `../title`, `this` or `@index`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    /// The path as written in the template.
    pub original: String,
    /// Name segments, with `this`, `.` and `..` removed.
    pub parts: Vec<String>,
    /// Number of leading `../` segments.
    pub depth: usize,
    /// `true` for data variables (`@index`).
    pub data: bool,
    /// `true` when the path was explicitly scoped with `this.` or `./`,
    /// which bypasses alias lookup.
    pub explicit_this: bool,
    pub span: Span,
}

impl PathExpression {
    /// The first name segment, if any.
    pub fn head(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }

    /// This path with its relative depth removed, as resolved in an ancestor
    /// scope.
    pub fn without_depth(&self) -> PathExpression {
        let mut original = self.original.as_str();
        while let Some(rest) = original.strip_prefix("../") {
            original = rest;
        }
        PathExpression {
            original: original.to_string(),
            depth: 0,
            ..self.clone()
        }
    }
}

/// A parameter or hash value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(PathExpression),
    String(String),
    /// Number literal, kept as written.
    Number(String),
    Boolean(bool),
    Null,
    SubExpression(Box<SubExpression>),
}

impl Expression {
    /// Node type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Expression::Path(_) => "PathExpression",
            Expression::String(_) => "StringLiteral",
            Expression::Number(_) => "NumberLiteral",
            Expression::Boolean(_) => "BooleanLiteral",
            Expression::Null => "NullLiteral",
            Expression::SubExpression(_) => "SubExpression",
        }
    }

    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// A parenthesized helper call: `(helper param key=value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubExpression {
    pub path: Expression,
    pub params: Vec<Expression>,
    pub hash: Hash,
}

/// Keyword arguments: `key=value` pairs, sorted by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hash {
    pub pairs: Vec<HashPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: String,
    pub value: Expression,
}

impl Hash {
    pub fn get(&self, key: &str) -> Option<&Expression> {
        self.pairs
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| &pair.value)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
