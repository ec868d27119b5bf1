//! Incremental ensemble construction.
//!
//! [`TreeBuilder`] assembles one tree as a keyed graph of node drafts;
//! [`ModelBuilder`] owns an ordered collection of tree builders plus the
//! ensemble-wide metadata and freezes everything into an immutable
//! [`Model`] on [`commit`](ModelBuilder::commit).
//!
//! Node keys are arbitrary caller-chosen integers while building; commit
//! renumbers them into the compact 0-based index space of
//! [`Tree`](crate::model::Tree), with the root at index 0.
//!
//! # Contract errors vs. commit errors
//!
//! Violations that are detectable at the offending call (duplicate key,
//! unknown child, re-assigning a typed node) fail synchronously with
//! [`BuildError`]. Properties that depend on the whole graph (dangling
//! children after deletions, cycles, unreachable nodes, leaf-vector
//! lengths) are checked at commit and fail with [`CommitError`]; a failed
//! commit produces no model.

use std::collections::BTreeMap;

use log::debug;

use crate::model::tree::{CategoryOutOfRange, CategorySet, Node, NodeId, Operator, Tree};
use crate::model::Model;
use crate::value::{ElementType, TypedValue};

/// Contract violations reported at the offending builder call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("node key {0} already exists")]
    DuplicateNodeKey(i32),
    #[error("node key {0} does not exist")]
    UnknownNodeKey(i32),
    #[error("child key {0} does not exist")]
    UnknownChildKey(i32),
    #[error("node {0} cannot be its own child")]
    SelfReferentialChild(i32),
    #[error("node {0} has already been assigned a kind")]
    NodeAlreadySet(i32),
    #[error("{what} must have element type {expected}, got {actual}")]
    TypeMismatch {
        what: &'static str,
        expected: ElementType,
        actual: ElementType,
    },
    #[error(transparent)]
    CategoryOutOfRange(#[from] CategoryOutOfRange),
    #[error("leaf vector must not be empty")]
    EmptyLeafVector,
    #[error("tree index {index} out of range (ensemble holds {n_trees} trees)")]
    TreeIndexOutOfRange { index: usize, n_trees: usize },
    #[error("num_feature must be positive")]
    InvalidNumFeature,
    #[error("num_class must be at least 1")]
    InvalidNumClass,
    #[error(
        "tree value types (threshold {threshold}, leaf output {leaf_output}) \
         do not match ensemble types (threshold {expected_threshold}, leaf output {expected_leaf_output})"
    )]
    EnsembleTypeMismatch {
        threshold: ElementType,
        leaf_output: ElementType,
        expected_threshold: ElementType,
        expected_leaf_output: ElementType,
    },
}

/// Structural validation failures reported at [`ModelBuilder::commit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("tree {tree_index}: no root node declared")]
    MissingRoot { tree_index: usize },
    #[error("tree {tree_index}: node {node_key} was never assigned a kind")]
    UnsetNode { tree_index: usize, node_key: i32 },
    #[error("tree {tree_index}: node {node_key} references child {child_key}, which no longer exists")]
    DanglingChild {
        tree_index: usize,
        node_key: i32,
        child_key: i32,
    },
    #[error("tree {tree_index}: cycle detected at node {node_key}")]
    CycleDetected { tree_index: usize, node_key: i32 },
    #[error("tree {tree_index}: node {node_key} is reachable by more than one path")]
    MultipleParents { tree_index: usize, node_key: i32 },
    #[error("tree {tree_index}: node {node_key} is unreachable from the root")]
    UnreachableNode { tree_index: usize, node_key: i32 },
    #[error(
        "tree {tree_index}: node {node_key} tests feature {feature_id}, \
         outside the valid range 0..{num_feature}"
    )]
    FeatureIdOutOfRange {
        tree_index: usize,
        node_key: i32,
        feature_id: u32,
        num_feature: u32,
    },
    #[error(
        "tree {tree_index}: leaf vector at node {node_key} has length {len}, \
         expected num_class = {num_class}"
    )]
    LeafVectorLengthMismatch {
        tree_index: usize,
        node_key: i32,
        len: usize,
        num_class: u32,
    },
}

/// Per-key node state during construction.
///
/// The state machine is `Unset -> {Leaf, LeafVector, NumericalTest,
/// CategoricalTest}`, each transition taken at most once.
#[derive(Debug, Clone, PartialEq)]
enum NodeDraft {
    Unset,
    Leaf {
        value: TypedValue,
    },
    LeafVector {
        values: Vec<TypedValue>,
    },
    NumericalTest {
        feature_id: u32,
        op: Operator,
        threshold: TypedValue,
        default_left: bool,
        left_key: i32,
        right_key: i32,
    },
    CategoricalTest {
        feature_id: u32,
        left_categories: CategorySet,
        default_left: bool,
        left_key: i32,
        right_key: i32,
    },
}

impl NodeDraft {
    fn children(&self) -> Option<(i32, i32)> {
        match *self {
            NodeDraft::NumericalTest {
                left_key, right_key, ..
            }
            | NodeDraft::CategoricalTest {
                left_key, right_key, ..
            } => Some((left_key, right_key)),
            _ => None,
        }
    }
}

/// Mutable builder for a single tree.
///
/// Not reentrant; a builder is edited from one thread at a time, which the
/// `&mut self` API enforces. Inserting the builder into a [`ModelBuilder`]
/// moves it; to keep editing the tree afterwards, re-acquire a handle via
/// [`ModelBuilder::get_tree_mut`].
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    threshold_type: ElementType,
    leaf_output_type: ElementType,
    nodes: BTreeMap<i32, NodeDraft>,
    root: Option<i32>,
}

impl TreeBuilder {
    /// Create an empty tree builder.
    ///
    /// `threshold_type` and `leaf_output_type` must match the ensemble the
    /// tree will be inserted into; all thresholds and leaf outputs in one
    /// model share these types.
    pub fn new(threshold_type: ElementType, leaf_output_type: ElementType) -> Self {
        TreeBuilder {
            threshold_type,
            leaf_output_type,
            nodes: BTreeMap::new(),
            root: None,
        }
    }

    /// Threshold element type of this tree.
    pub fn threshold_type(&self) -> ElementType {
        self.threshold_type
    }

    /// Leaf output element type of this tree.
    pub fn leaf_output_type(&self) -> ElementType {
        self.leaf_output_type
    }

    /// Number of declared nodes.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Declare an empty node under `key`.
    pub fn create_node(&mut self, key: i32) -> Result<(), BuildError> {
        if self.nodes.contains_key(&key) {
            return Err(BuildError::DuplicateNodeKey(key));
        }
        self.nodes.insert(key, NodeDraft::Unset);
        Ok(())
    }

    /// Remove the node under `key`.
    ///
    /// Other nodes may still reference `key` as a child at this point;
    /// dangling references are diagnosed at commit, since the referencing
    /// node may legitimately be deleted or re-created later.
    pub fn delete_node(&mut self, key: i32) -> Result<(), BuildError> {
        if self.nodes.remove(&key).is_none() {
            return Err(BuildError::UnknownNodeKey(key));
        }
        if self.root == Some(key) {
            self.root = None;
        }
        Ok(())
    }

    /// Declare `key` as the root. May be reassigned any number of times
    /// before commit; exactly one root must be in place at commit.
    pub fn set_root_node(&mut self, key: i32) -> Result<(), BuildError> {
        if !self.nodes.contains_key(&key) {
            return Err(BuildError::UnknownNodeKey(key));
        }
        self.root = Some(key);
        Ok(())
    }

    /// Turn the empty node `key` into a numerical test
    /// `feature OP threshold` with the given children.
    pub fn set_numerical_test_node(
        &mut self,
        key: i32,
        feature_id: u32,
        op: Operator,
        threshold: TypedValue,
        default_left: bool,
        left_key: i32,
        right_key: i32,
    ) -> Result<(), BuildError> {
        if threshold.element_type() != self.threshold_type {
            return Err(BuildError::TypeMismatch {
                what: "threshold",
                expected: self.threshold_type,
                actual: threshold.element_type(),
            });
        }
        self.check_children(key, left_key, right_key)?;
        self.assign(
            key,
            NodeDraft::NumericalTest {
                feature_id,
                op,
                threshold,
                default_left,
                left_key,
                right_key,
            },
        )
    }

    /// Turn the empty node `key` into a categorical test routing
    /// `left_categories` to the left child.
    pub fn set_categorical_test_node(
        &mut self,
        key: i32,
        feature_id: u32,
        left_categories: &[u32],
        default_left: bool,
        left_key: i32,
        right_key: i32,
    ) -> Result<(), BuildError> {
        let left_categories = CategorySet::from_categories(left_categories)?;
        self.check_children(key, left_key, right_key)?;
        self.assign(
            key,
            NodeDraft::CategoricalTest {
                feature_id,
                left_categories,
                default_left,
                left_key,
                right_key,
            },
        )
    }

    /// Turn the empty node `key` into a scalar leaf.
    pub fn set_leaf_node(&mut self, key: i32, value: TypedValue) -> Result<(), BuildError> {
        if value.element_type() != self.leaf_output_type {
            return Err(BuildError::TypeMismatch {
                what: "leaf output",
                expected: self.leaf_output_type,
                actual: value.element_type(),
            });
        }
        self.assign(key, NodeDraft::Leaf { value })
    }

    /// Turn the empty node `key` into a vector leaf (one output per class).
    ///
    /// The vector length is validated against the ensemble's `num_class`
    /// at commit, since a standalone tree builder does not know it.
    pub fn set_leaf_vector_node(
        &mut self,
        key: i32,
        values: Vec<TypedValue>,
    ) -> Result<(), BuildError> {
        if values.is_empty() {
            return Err(BuildError::EmptyLeafVector);
        }
        for value in &values {
            if value.element_type() != self.leaf_output_type {
                return Err(BuildError::TypeMismatch {
                    what: "leaf output",
                    expected: self.leaf_output_type,
                    actual: value.element_type(),
                });
            }
        }
        self.assign(key, NodeDraft::LeafVector { values })
    }

    /// Children must pre-exist and must not be the node itself; this is
    /// the incremental half of acyclicity enforcement.
    fn check_children(&self, key: i32, left_key: i32, right_key: i32) -> Result<(), BuildError> {
        for child in [left_key, right_key] {
            if child == key {
                return Err(BuildError::SelfReferentialChild(key));
            }
            if !self.nodes.contains_key(&child) {
                return Err(BuildError::UnknownChildKey(child));
            }
        }
        Ok(())
    }

    fn assign(&mut self, key: i32, draft: NodeDraft) -> Result<(), BuildError> {
        match self.nodes.get_mut(&key) {
            None => Err(BuildError::UnknownNodeKey(key)),
            Some(slot @ NodeDraft::Unset) => {
                *slot = draft;
                Ok(())
            }
            Some(_) => Err(BuildError::NodeAlreadySet(key)),
        }
    }
}

/// Mutable builder for a whole ensemble.
///
/// The ensemble-wide metadata (`num_feature`, `num_class`, aggregation
/// mode, value types) is fixed at construction. [`commit`](Self::commit)
/// consumes the builder, so reuse after commit is impossible by
/// construction.
#[derive(Debug)]
pub struct ModelBuilder {
    num_feature: u32,
    num_class: u32,
    average_tree_output: bool,
    threshold_type: ElementType,
    leaf_output_type: ElementType,
    params: BTreeMap<String, String>,
    trees: Vec<TreeBuilder>,
}

impl ModelBuilder {
    /// Create a builder for an ensemble over `num_feature` features and
    /// `num_class` output groups.
    ///
    /// `average_tree_output` selects random-forest-style averaging (`true`)
    /// versus boosting-style summation (`false`).
    pub fn new(
        num_feature: u32,
        num_class: u32,
        average_tree_output: bool,
        threshold_type: ElementType,
        leaf_output_type: ElementType,
    ) -> Result<Self, BuildError> {
        if num_feature == 0 {
            return Err(BuildError::InvalidNumFeature);
        }
        if num_class == 0 {
            return Err(BuildError::InvalidNumClass);
        }
        Ok(ModelBuilder {
            num_feature,
            num_class,
            average_tree_output,
            threshold_type,
            leaf_output_type,
            params: BTreeMap::new(),
            trees: Vec::new(),
        })
    }

    /// Number of trees currently staged.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Store an opaque model parameter; last write wins. No key validation
    /// happens here — recognized keys are a consumer concern.
    pub fn set_model_param(&mut self, name: &str, value: &str) {
        self.params.insert(name.to_string(), value.to_string());
    }

    /// Insert a tree at `index` (`None` appends).
    ///
    /// Takes the tree builder by move: the caller's handle is gone after
    /// insertion, exactly one mutable owner of the staged tree remains.
    /// Re-acquire access with [`get_tree_mut`](Self::get_tree_mut).
    /// Returns the inserted tree's position.
    pub fn insert_tree(
        &mut self,
        tree: TreeBuilder,
        index: Option<usize>,
    ) -> Result<usize, BuildError> {
        if tree.threshold_type != self.threshold_type
            || tree.leaf_output_type != self.leaf_output_type
        {
            return Err(BuildError::EnsembleTypeMismatch {
                threshold: tree.threshold_type,
                leaf_output: tree.leaf_output_type,
                expected_threshold: self.threshold_type,
                expected_leaf_output: self.leaf_output_type,
            });
        }
        let index = index.unwrap_or(self.trees.len());
        if index > self.trees.len() {
            return Err(BuildError::TreeIndexOutOfRange {
                index,
                n_trees: self.trees.len(),
            });
        }
        self.trees.insert(index, tree);
        Ok(index)
    }

    /// Read access to the staged tree at `index`.
    pub fn get_tree(&self, index: usize) -> Result<&TreeBuilder, BuildError> {
        self.trees.get(index).ok_or(BuildError::TreeIndexOutOfRange {
            index,
            n_trees: self.trees.len(),
        })
    }

    /// Mutable access to the staged tree at `index`.
    pub fn get_tree_mut(&mut self, index: usize) -> Result<&mut TreeBuilder, BuildError> {
        let n_trees = self.trees.len();
        self.trees
            .get_mut(index)
            .ok_or(BuildError::TreeIndexOutOfRange { index, n_trees })
    }

    /// Remove the staged tree at `index`.
    pub fn delete_tree(&mut self, index: usize) -> Result<(), BuildError> {
        if index >= self.trees.len() {
            return Err(BuildError::TreeIndexOutOfRange {
                index,
                n_trees: self.trees.len(),
            });
        }
        self.trees.remove(index);
        Ok(())
    }

    /// Validate every staged tree, renumber node keys into compact
    /// per-tree index spaces, and freeze the result into an immutable
    /// [`Model`].
    ///
    /// Consumes the builder. On failure the error names the offending
    /// tree and no model is produced.
    pub fn commit(self) -> Result<Model, CommitError> {
        let mut trees = Vec::with_capacity(self.trees.len());
        for (tree_index, tree) in self.trees.iter().enumerate() {
            trees.push(freeze_tree(
                tree_index,
                tree,
                self.num_feature,
                self.num_class,
            )?);
        }
        debug!(
            "committed model: {} trees, {} features, {} classes",
            trees.len(),
            self.num_feature,
            self.num_class
        );
        Ok(Model::new(
            trees,
            self.num_feature,
            self.num_class,
            self.average_tree_output,
            self.threshold_type,
            self.leaf_output_type,
            self.params,
        ))
    }
}

/// Validate one staged tree and produce its compact form.
///
/// A depth-first walk from the root with color marking (unvisited /
/// visiting / done) detects cycles and nodes shared between branches in a
/// single pass; keys are assigned compact preorder ids as they are first
/// visited, so the root always lands at index 0.
fn freeze_tree(
    tree_index: usize,
    builder: &TreeBuilder,
    num_feature: u32,
    num_class: u32,
) -> Result<Tree, CommitError> {
    // delete_node clears the root when it goes, so a declared root key
    // always exists in the map.
    let root_key = builder.root.ok_or(CommitError::MissingRoot { tree_index })?;

    const UNVISITED: u8 = 0;
    const VISITING: u8 = 1;
    const DONE: u8 = 2;

    let mut ids: BTreeMap<i32, NodeId> = BTreeMap::new();
    let mut color: BTreeMap<i32, u8> = BTreeMap::new();
    let mut stack: Vec<(i32, bool)> = vec![(root_key, false)];

    while let Some((key, exiting)) = stack.pop() {
        if exiting {
            color.insert(key, DONE);
            continue;
        }
        match color.get(&key).copied().unwrap_or(UNVISITED) {
            UNVISITED => {}
            VISITING => {
                return Err(CommitError::CycleDetected {
                    tree_index,
                    node_key: key,
                })
            }
            _ => {
                return Err(CommitError::MultipleParents {
                    tree_index,
                    node_key: key,
                })
            }
        }
        color.insert(key, VISITING);
        stack.push((key, true));
        ids.insert(key, ids.len() as NodeId);

        let draft = &builder.nodes[&key];
        if matches!(draft, NodeDraft::Unset) {
            return Err(CommitError::UnsetNode {
                tree_index,
                node_key: key,
            });
        }
        if let Some((left_key, right_key)) = draft.children() {
            // Push right first so the left subtree is numbered first.
            for child_key in [right_key, left_key] {
                if !builder.nodes.contains_key(&child_key) {
                    return Err(CommitError::DanglingChild {
                        tree_index,
                        node_key: key,
                        child_key,
                    });
                }
                stack.push((child_key, false));
            }
        }
    }

    if ids.len() != builder.nodes.len() {
        let node_key = builder
            .nodes
            .keys()
            .find(|key| !ids.contains_key(key))
            .copied()
            .expect("count mismatch implies an unvisited key");
        return Err(CommitError::UnreachableNode {
            tree_index,
            node_key,
        });
    }

    let mut nodes: Vec<Option<Node>> = vec![None; ids.len()];
    for (&key, draft) in &builder.nodes {
        let node = match draft {
            NodeDraft::Unset => unreachable!("unset nodes rejected during the walk"),
            NodeDraft::Leaf { value } => Node::Leaf { value: *value },
            NodeDraft::LeafVector { values } => {
                if values.len() != num_class as usize {
                    return Err(CommitError::LeafVectorLengthMismatch {
                        tree_index,
                        node_key: key,
                        len: values.len(),
                        num_class,
                    });
                }
                Node::LeafVector {
                    values: values.clone(),
                }
            }
            NodeDraft::NumericalTest {
                feature_id,
                op,
                threshold,
                default_left,
                left_key,
                right_key,
            } => {
                check_feature_id(tree_index, key, *feature_id, num_feature)?;
                Node::NumericalTest {
                    feature_id: *feature_id,
                    op: *op,
                    threshold: *threshold,
                    default_left: *default_left,
                    left: ids[left_key],
                    right: ids[right_key],
                }
            }
            NodeDraft::CategoricalTest {
                feature_id,
                left_categories,
                default_left,
                left_key,
                right_key,
            } => {
                check_feature_id(tree_index, key, *feature_id, num_feature)?;
                Node::CategoricalTest {
                    feature_id: *feature_id,
                    left_categories: *left_categories,
                    default_left: *default_left,
                    left: ids[left_key],
                    right: ids[right_key],
                }
            }
        };
        nodes[ids[&key] as usize] = Some(node);
    }

    let nodes = nodes
        .into_iter()
        .map(|node| node.expect("every compact id is assigned exactly once"))
        .collect();
    Ok(Tree::new(nodes, 0))
}

fn check_feature_id(
    tree_index: usize,
    node_key: i32,
    feature_id: u32,
    num_feature: u32,
) -> Result<(), CommitError> {
    if feature_id >= num_feature {
        return Err(CommitError::FeatureIdOutOfRange {
            tree_index,
            node_key,
            feature_id,
            num_feature,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    fn leaf(value: f32) -> TypedValue {
        TypedValue::new(value)
    }

    fn stump(left_val: f32, right_val: f32, threshold: f32) -> TreeBuilder {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.create_node(1).unwrap();
        tree.create_node(2).unwrap();
        tree.set_leaf_node(1, leaf(left_val)).unwrap();
        tree.set_leaf_node(2, leaf(right_val)).unwrap();
        tree.set_numerical_test_node(
            0,
            0,
            Operator::Lt,
            TypedValue::new(threshold),
            true,
            1,
            2,
        )
        .unwrap();
        tree.set_root_node(0).unwrap();
        tree
    }

    #[test]
    fn duplicate_node_key_rejected() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(5).unwrap();
        assert_eq!(tree.create_node(5), Err(BuildError::DuplicateNodeKey(5)));
    }

    #[test]
    fn reassigning_typed_node_rejected() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.set_leaf_node(0, leaf(1.0)).unwrap();
        assert_eq!(
            tree.set_leaf_node(0, leaf(2.0)),
            Err(BuildError::NodeAlreadySet(0))
        );
    }

    #[test]
    fn children_must_exist_at_call_time() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        let err = tree.set_numerical_test_node(
            0,
            0,
            Operator::Lt,
            TypedValue::new(0.5f32),
            true,
            1,
            2,
        );
        assert_eq!(err, Err(BuildError::UnknownChildKey(1)));
    }

    #[test]
    fn node_cannot_be_its_own_child() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.create_node(1).unwrap();
        let err = tree.set_numerical_test_node(
            0,
            0,
            Operator::Lt,
            TypedValue::new(0.5f32),
            true,
            0,
            1,
        );
        assert_eq!(err, Err(BuildError::SelfReferentialChild(0)));
    }

    #[test]
    fn threshold_type_enforced() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.create_node(1).unwrap();
        tree.create_node(2).unwrap();
        let err = tree.set_numerical_test_node(
            0,
            0,
            Operator::Lt,
            TypedValue::new(0.5f64),
            true,
            1,
            2,
        );
        assert_eq!(
            err,
            Err(BuildError::TypeMismatch {
                what: "threshold",
                expected: ElementType::Float32,
                actual: ElementType::Float64,
            })
        );
    }

    #[test]
    fn wide_category_domain_fails_loudly() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.create_node(1).unwrap();
        tree.create_node(2).unwrap();
        let err = tree.set_categorical_test_node(0, 0, &[2, 70], false, 1, 2);
        assert_eq!(err, Err(BuildError::CategoryOutOfRange(CategoryOutOfRange(70))));
    }

    #[test]
    fn commit_renumbers_to_compact_preorder() {
        // Keys deliberately sparse and out of order.
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(100).unwrap();
        tree.create_node(-7).unwrap();
        tree.create_node(42).unwrap();
        tree.set_leaf_node(-7, leaf(1.0)).unwrap();
        tree.set_leaf_node(42, leaf(2.0)).unwrap();
        tree.set_numerical_test_node(
            100,
            3,
            Operator::Le,
            TypedValue::new(0.5f32),
            false,
            -7,
            42,
        )
        .unwrap();
        tree.set_root_node(100).unwrap();

        let mut builder =
            ModelBuilder::new(4, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        let model = builder.commit().unwrap();

        let tree = model.tree(0);
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.root_id(), 0);
        match tree.node(0) {
            Node::NumericalTest {
                feature_id,
                op,
                default_left,
                left,
                right,
                ..
            } => {
                assert_eq!(*feature_id, 3);
                assert_eq!(*op, Operator::Le);
                assert!(!default_left);
                assert_eq!((*left, *right), (1, 2));
            }
            other => panic!("expected numerical test at root, got {other:?}"),
        }
        assert_eq!(
            tree.node(1),
            &Node::Leaf {
                value: TypedValue::new(1.0f32)
            }
        );
        assert_eq!(
            tree.node(2),
            &Node::Leaf {
                value: TypedValue::new(2.0f32)
            }
        );
    }

    #[test]
    fn commit_rejects_cycles() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        for key in 0..4 {
            tree.create_node(key).unwrap();
        }
        tree.set_leaf_node(2, leaf(1.0)).unwrap();
        tree.set_leaf_node(3, leaf(2.0)).unwrap();
        // 0 -> (1, 2); 1 -> (0, 3): node 0 is its own descendant.
        tree.set_numerical_test_node(1, 0, Operator::Lt, TypedValue::new(0.5f32), true, 0, 3)
            .unwrap();
        tree.set_numerical_test_node(0, 0, Operator::Lt, TypedValue::new(0.5f32), true, 1, 2)
            .unwrap();
        tree.set_root_node(0).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::CycleDetected {
                tree_index: 0,
                node_key: 0
            })
        );
    }

    #[test]
    fn commit_rejects_shared_children() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        for key in 0..2 {
            tree.create_node(key).unwrap();
        }
        tree.set_leaf_node(1, leaf(1.0)).unwrap();
        // Both branches point at the same leaf: a DAG, not a tree.
        tree.set_numerical_test_node(0, 0, Operator::Lt, TypedValue::new(0.5f32), true, 1, 1)
            .unwrap();
        tree.set_root_node(0).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::MultipleParents {
                tree_index: 0,
                node_key: 1
            })
        );
    }

    #[test]
    fn commit_rejects_dangling_child_after_delete() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        for key in 0..3 {
            tree.create_node(key).unwrap();
        }
        tree.set_leaf_node(1, leaf(1.0)).unwrap();
        tree.set_leaf_node(2, leaf(2.0)).unwrap();
        tree.set_numerical_test_node(0, 0, Operator::Lt, TypedValue::new(0.5f32), true, 1, 2)
            .unwrap();
        tree.set_root_node(0).unwrap();
        // Deleting after the referencing node was set is legal at call
        // time; the dangling reference surfaces at commit.
        tree.delete_node(2).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::DanglingChild {
                tree_index: 0,
                node_key: 0,
                child_key: 2
            })
        );
    }

    #[test]
    fn commit_rejects_unreachable_nodes() {
        let mut tree = stump(1.0, 2.0, 0.5);
        tree.create_node(9).unwrap();
        tree.set_leaf_node(9, leaf(3.0)).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::UnreachableNode {
                tree_index: 0,
                node_key: 9
            })
        );
    }

    #[test]
    fn commit_rejects_unset_nodes() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.set_root_node(0).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::UnsetNode {
                tree_index: 0,
                node_key: 0
            })
        );
    }

    #[test]
    fn commit_rejects_missing_root() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.set_leaf_node(0, leaf(1.0)).unwrap();

        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::MissingRoot { tree_index: 0 })
        );
    }

    #[test]
    fn commit_rejects_feature_id_out_of_range() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        for key in 0..3 {
            tree.create_node(key).unwrap();
        }
        tree.set_leaf_node(1, leaf(1.0)).unwrap();
        tree.set_leaf_node(2, leaf(2.0)).unwrap();
        tree.set_numerical_test_node(0, 7, Operator::Lt, TypedValue::new(0.5f32), true, 1, 2)
            .unwrap();
        tree.set_root_node(0).unwrap();

        let mut builder =
            ModelBuilder::new(4, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::FeatureIdOutOfRange {
                tree_index: 0,
                node_key: 0,
                feature_id: 7,
                num_feature: 4
            })
        );
    }

    #[test]
    fn commit_rejects_leaf_vector_length_mismatch() {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.set_leaf_vector_node(0, vec![leaf(0.1), leaf(0.9)]).unwrap();
        tree.set_root_node(0).unwrap();

        let mut builder =
            ModelBuilder::new(1, 3, true, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        assert_eq!(
            builder.commit(),
            Err(CommitError::LeafVectorLengthMismatch {
                tree_index: 0,
                node_key: 0,
                len: 2,
                num_class: 3
            })
        );
    }

    #[test]
    fn tree_index_bounds() {
        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        assert!(matches!(
            builder.get_tree(0),
            Err(BuildError::TreeIndexOutOfRange { index: 0, n_trees: 0 })
        ));
        assert!(matches!(
            builder.delete_tree(0),
            Err(BuildError::TreeIndexOutOfRange { index: 0, n_trees: 0 })
        ));
        assert!(matches!(
            builder.insert_tree(stump(1.0, 2.0, 0.5), Some(1)),
            Err(BuildError::TreeIndexOutOfRange { index: 1, n_trees: 0 })
        ));
    }

    #[test]
    fn insert_positions_trees() {
        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        assert_eq!(builder.insert_tree(stump(1.0, 2.0, 0.5), None).unwrap(), 0);
        assert_eq!(builder.insert_tree(stump(3.0, 4.0, 0.5), None).unwrap(), 1);
        // Insert at the front; the previous trees shift back.
        assert_eq!(
            builder.insert_tree(stump(5.0, 6.0, 0.5), Some(0)).unwrap(),
            0
        );
        assert_eq!(builder.n_trees(), 3);

        // Continue editing through a fresh handle.
        let tree = builder.get_tree_mut(0).unwrap();
        tree.create_node(99).unwrap();
        tree.set_leaf_node(99, leaf(9.0)).unwrap();
        tree.set_root_node(99).unwrap();
        tree.delete_node(0).unwrap();
        tree.delete_node(1).unwrap();
        tree.delete_node(2).unwrap();

        let model = builder.commit().unwrap();
        assert_eq!(model.n_trees(), 3);
        assert_eq!(model.tree(0).n_nodes(), 1);
    }

    #[test]
    fn insert_rejects_mismatched_value_types() {
        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float64, ElementType::Float64).unwrap();
        let err = builder.insert_tree(stump(1.0, 2.0, 0.5), None);
        assert!(matches!(err, Err(BuildError::EnsembleTypeMismatch { .. })));
    }

    #[test]
    fn builder_constructor_bounds() {
        assert_eq!(
            ModelBuilder::new(0, 1, false, ElementType::Float32, ElementType::Float32)
                .err()
                .unwrap(),
            BuildError::InvalidNumFeature
        );
        assert_eq!(
            ModelBuilder::new(1, 0, false, ElementType::Float32, ElementType::Float32)
                .err()
                .unwrap(),
            BuildError::InvalidNumClass
        );
    }

    #[test]
    fn model_params_last_write_wins() {
        let mut builder =
            ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.set_model_param("pred_transform", "sigmoid");
        builder.set_model_param("pred_transform", "identity");
        let model = builder.commit().unwrap();
        assert_eq!(model.param("pred_transform"), Some("identity"));
        assert_eq!(model.param("unset_key"), None);
    }
}
