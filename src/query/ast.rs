//! Predicate tree
//!
//! Leaves are names and string literals; interior nodes are comparisons
//! and boolean combinators:
//!
//! ```text
//! metric.name == "disk.dev.read" && (instance.name == "sda" || hostname =~ "web.*")
//! ```

use std::fmt;

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator between a name and a literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Leq,
    /// `>`
    Gt,
    /// `>=`
    Geq,
    /// `=~`
    Match,
    /// `!~`
    NotMatch,
}

impl CompareOp {
    /// Operator text
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Leq => "<=",
            CompareOp::Gt => ">",
            CompareOp::Geq => ">=",
            CompareOp::Match => "=~",
            CompareOp::NotMatch => "!~",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Name Classification
// ============================================================================

/// Which family of maps a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// `metric.` or `m.`
    Metric,
    /// `instance.`, `inst.` or `i.`
    Instance,
    /// `label.` or `l.`, and any unprefixed name
    Label,
    /// `note.` or `n.`
    Note,
}

const PREFIXES: &[(&str, NameScope)] = &[
    ("metric.", NameScope::Metric),
    ("m.", NameScope::Metric),
    ("instance.", NameScope::Instance),
    ("inst.", NameScope::Instance),
    ("i.", NameScope::Instance),
    ("label.", NameScope::Label),
    ("l.", NameScope::Label),
    ("note.", NameScope::Note),
    ("n.", NameScope::Note),
];

/// Split a name into its scope and the field within that scope
///
/// `metric.name` is `(Metric, "name")`; `hostname` is `(Label, "hostname")`.
pub fn classify(name: &str) -> (NameScope, &str) {
    for (prefix, scope) in PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            if !rest.is_empty() {
                return (*scope, rest);
            }
        }
    }
    (NameScope::Label, name)
}

// ============================================================================
// Nodes
// ============================================================================

/// A node of the predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Bare identifier
    Name(String),
    /// String literal
    String(String),
    /// Comparison of a name with a literal
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand, normally a name
        left: Box<Node>,
        /// Right operand, normally a literal
        right: Box<Node>,
    },
    /// Both sides hold
    And(Box<Node>, Box<Node>),
    /// Either side holds
    Or(Box<Node>, Box<Node>),
    /// Negation
    Neg(Box<Node>),
}

impl Node {
    /// `name <op> "value"`
    pub fn compare(op: CompareOp, name: impl Into<String>, value: impl Into<String>) -> Self {
        Node::Compare {
            op,
            left: Box::new(Node::Name(name.into())),
            right: Box::new(Node::String(value.into())),
        }
    }

    /// `name == "value"`
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(CompareOp::Eq, name, value)
    }

    /// `self && other`
    pub fn and(self, other: Node) -> Self {
        Node::And(Box::new(self), Box::new(other))
    }

    /// `self || other`
    pub fn or(self, other: Node) -> Self {
        Node::Or(Box::new(self), Box::new(other))
    }

    /// Name and literal of a comparison, if both operands have that shape
    pub fn comparison(&self) -> Option<(CompareOp, &str, &str)> {
        match self {
            Node::Compare { op, left, right } => match (left.as_ref(), right.as_ref()) {
                (Node::Name(name), Node::String(value)) => Some((*op, name, value)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Visit every comparison in the tree, left to right
    pub fn comparisons(&self) -> Vec<(CompareOp, &str, &str)> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<(CompareOp, &'a str, &'a str)>) {
        match self {
            Node::And(l, r) | Node::Or(l, r) => {
                l.collect_comparisons(out);
                r.collect_comparisons(out);
            },
            Node::Neg(inner) => inner.collect_comparisons(out),
            other => out.extend(other.comparison()),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Name(name) => f.write_str(name),
            Node::String(value) => write!(f, "{:?}", value),
            Node::Compare { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Node::And(l, r) => write!(f, "({} && {})", l, r),
            Node::Or(l, r) => write!(f, "({} || {})", l, r),
            Node::Neg(inner) => write!(f, "!{}", inner),
        }
    }
}
