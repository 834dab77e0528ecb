//! ACL data model (§3 "ACL tree", §4.11): clauses, boolean expression
//! trees, and the compiled, rights-indexed decision structure.

use std::collections::HashMap;

use crate::common::Plist;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseType {
    Allow,
    Deny,
    Auth,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// One node of a flattened boolean expression tree (§3: "decision array
/// indexed by term number"). `Term` nodes are the leaves a LAS evaluator
/// resolves; `And`/`Or`/`Not` combine child node indices within the same
/// arena.
#[derive(Debug, Clone)]
pub enum ExprNode {
    Term { attr: String, comparator: Comparator, value: String },
    Not(usize),
    And(usize, usize),
    Or(usize, usize),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub nodes: Vec<ExprNode>,
    pub root: usize,
}

impl Expr {
    pub fn term(attr: impl Into<String>, comparator: Comparator, value: impl Into<String>) -> Expr {
        Expr { nodes: vec![ExprNode::Term { attr: attr.into(), comparator, value: value.into() }], root: 0 }
    }

    fn push(&mut self, node: ExprNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn and(mut self, mut other: Expr) -> Expr {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.drain(..));
        let root = self.push(ExprNode::And(self.root, other.root + offset));
        self.root = root;
        self
    }

    pub fn or(mut self, mut other: Expr) -> Expr {
        let offset = self.nodes.len();
        self.nodes.extend(other.nodes.drain(..));
        let root = self.push(ExprNode::Or(self.root, other.root + offset));
        self.root = root;
        self
    }

    pub fn not(mut self) -> Expr {
        let root = self.push(ExprNode::Not(self.root));
        self.root = root;
        self
    }
}

/// One compiled ACL clause (§3, §6 "ACL file format").
#[derive(Debug, Clone)]
pub struct Clause {
    pub clause_type: ClauseType,
    pub tag: String,
    pub sequence: usize,
    pub absolute: bool,
    pub rights: Vec<String>,
    pub expr: Expr,
    /// AUTH clauses: required `{attr = "value"; ...}` parameters, snapshot
    /// at compile time so later mutation of the running auth plist cannot
    /// retroactively change what this clause demanded.
    pub auth_requirements: Option<Plist>,
    /// RESPONSE clauses: the deny type/message to surface when a DENY is
    /// ultimately attributed to (or near) this clause.
    pub deny_type: Option<String>,
    pub deny_message: Option<String>,
}

impl Clause {
    pub fn new(clause_type: ClauseType, tag: impl Into<String>, sequence: usize, rights: Vec<String>, expr: Expr) -> Clause {
        Clause {
            clause_type,
            tag: tag.into(),
            sequence,
            absolute: false,
            rights,
            expr,
            auth_requirements: None,
            deny_type: None,
            deny_message: None,
        }
    }
}

/// The outcome of compiling a clause list: per-right clause sequence
/// indices in ascending order, ready for the evaluator to walk.
#[derive(Debug, Clone)]
pub struct CompiledAclList {
    pub clauses: Vec<Clause>,
    pub by_right: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclResult {
    Allow,
    Deny,
    Invalid,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cachability {
    NotCachable,
    SessionCachable,
    IndefCachable,
}

#[derive(Debug, Clone)]
pub struct CheckRightsOutcome {
    pub result: AclResult,
    pub deny_type: Option<String>,
    pub deny_msg: Option<String>,
    pub clause_tag: Option<String>,
    pub clause_index: Option<usize>,
    pub cachability: Cachability,
}
