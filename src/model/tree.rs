//! Compact immutable decision tree.
//!
//! Nodes live in a flat array indexed by [`NodeId`]; children are indices
//! into the same array. Commit guarantees the structure is a proper tree
//! (single root at index 0, acyclic, fully reachable), so traversal needs
//! no cycle guards.

use std::fmt;
use std::str::FromStr;

use crate::value::TypedValue;

/// Index of a node within its tree.
pub type NodeId = u32;

/// Comparison operator of a numerical test.
///
/// The test reads `feature OP threshold`; `true` routes left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Gt,
    Ge,
    Ne,
}

/// An operator string outside the recognized set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized comparison operator `{0}`")]
pub struct UnknownOperator(pub String);

impl Operator {
    /// Evaluate `lhs OP rhs`. Both sides are widened to `f64` before the
    /// comparison; the caller has already routed missing values away.
    #[inline]
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
        };
        f.write_str(symbol)
    }
}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, UnknownOperator> {
        match s {
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            "==" => Ok(Operator::Eq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "!=" => Ok(Operator::Ne),
            _ => Err(UnknownOperator(s.to_string())),
        }
    }
}

/// A category id above [`CategorySet::MAX_CATEGORY`] was supplied.
///
/// Wide categorical domains are rejected loudly rather than truncated;
/// silent truncation would corrupt routing for every affected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("category id {0} exceeds the supported maximum of 63")]
pub struct CategoryOutOfRange(pub u32);

/// Fixed-width bitset over category ids `0..=63`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CategorySet(u64);

impl CategorySet {
    /// Largest representable category id.
    pub const MAX_CATEGORY: u32 = 63;

    /// Build a set from explicit category ids.
    pub fn from_categories(categories: &[u32]) -> Result<Self, CategoryOutOfRange> {
        let mut bits = 0u64;
        for &category in categories {
            if category > Self::MAX_CATEGORY {
                return Err(CategoryOutOfRange(category));
            }
            bits |= 1u64 << category;
        }
        Ok(CategorySet(bits))
    }

    /// Membership test. Ids above the representable range are never
    /// members.
    #[inline]
    pub fn contains(self, category: u32) -> bool {
        category <= Self::MAX_CATEGORY && self.0 & (1u64 << category) != 0
    }

    /// Number of member categories.
    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over member categories in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..=Self::MAX_CATEGORY).filter(move |&category| self.contains(category))
    }
}

/// One tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Terminal node with a single output.
    Leaf { value: TypedValue },
    /// Terminal node with one output per class.
    LeafVector { values: Vec<TypedValue> },
    /// `feature OP threshold`; `true` routes left, missing routes by
    /// `default_left`.
    NumericalTest {
        feature_id: u32,
        op: Operator,
        threshold: TypedValue,
        default_left: bool,
        left: NodeId,
        right: NodeId,
    },
    /// Membership in `left_categories` routes left, missing routes by
    /// `default_left`.
    CategoricalTest {
        feature_id: u32,
        left_categories: CategorySet,
        default_left: bool,
        left: NodeId,
        right: NodeId,
    },
}

impl Node {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. } | Node::LeafVector { .. })
    }

    /// `(left, right)` for test nodes, `None` for leaves.
    #[inline]
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match *self {
            Node::NumericalTest { left, right, .. }
            | Node::CategoricalTest { left, right, .. } => Some((left, right)),
            _ => None,
        }
    }
}

/// Immutable tree in compact form.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Commit is the only producer; structural invariants hold by then.
    pub(crate) fn new(nodes: Vec<Node>, root: NodeId) -> Self {
        debug_assert!((root as usize) < nodes.len());
        Tree { nodes, root }
    }

    /// Number of nodes.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Root node id (always 0 for committed trees).
    #[inline]
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Access a node by id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Whether any leaf carries a per-class output vector.
    pub fn has_vector_leaves(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node, Node::LeafVector { .. }))
    }
}
