//! Frozen ensemble model.
//!
//! [`Model`] is the sole artifact consumed by the GTIL prediction engine
//! and the only thing format loaders are expected to hand out. It is
//! created exclusively by [`ModelBuilder::commit`](crate::builder::ModelBuilder::commit)
//! and immutable afterwards, so any number of threads may predict against
//! one instance concurrently.

pub mod transform;
pub mod tree;

use std::collections::BTreeMap;

use crate::value::ElementType;

pub use transform::{OutputTransform, UnknownTransform};
pub use tree::{CategorySet, Node, NodeId, Operator, Tree};

/// Immutable decision-tree ensemble.
///
/// Tree insertion order is prediction order: per-tree outputs accumulate
/// in this order, which keeps floating-point aggregation reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    trees: Vec<Tree>,
    num_feature: u32,
    num_class: u32,
    average_tree_output: bool,
    threshold_type: ElementType,
    leaf_output_type: ElementType,
    params: BTreeMap<String, String>,
}

impl Model {
    pub(crate) fn new(
        trees: Vec<Tree>,
        num_feature: u32,
        num_class: u32,
        average_tree_output: bool,
        threshold_type: ElementType,
        leaf_output_type: ElementType,
        params: BTreeMap<String, String>,
    ) -> Self {
        Model {
            trees,
            num_feature,
            num_class,
            average_tree_output,
            threshold_type,
            leaf_output_type,
            params,
        }
    }

    /// Number of trees.
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Access a tree by position.
    #[inline]
    pub fn tree(&self, index: usize) -> &Tree {
        &self.trees[index]
    }

    /// Iterate over trees in prediction order.
    pub fn trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.iter()
    }

    /// Number of input features; valid feature ids are `0..num_feature`.
    #[inline]
    pub fn num_feature(&self) -> u32 {
        self.num_feature
    }

    /// Number of output groups (1 for regression and binary tasks).
    #[inline]
    pub fn num_class(&self) -> u32 {
        self.num_class
    }

    /// `true` for random-forest-style ensembles (outputs averaged over
    /// trees); `false` for boosting-style ensembles (outputs summed).
    #[inline]
    pub fn average_tree_output(&self) -> bool {
        self.average_tree_output
    }

    /// Element type shared by all numerical-test thresholds.
    #[inline]
    pub fn threshold_type(&self) -> ElementType {
        self.threshold_type
    }

    /// Element type shared by all leaf outputs.
    #[inline]
    pub fn leaf_output_type(&self) -> ElementType {
        self.leaf_output_type
    }

    /// Look up a free-form model parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All model parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// The output transform named by the `pred_transform` parameter.
    ///
    /// Absent parameter means identity. An unrecognized value is a
    /// consumer-side error, surfaced here rather than at build time since
    /// the parameter map is free-form by contract.
    pub fn output_transform(&self) -> Result<OutputTransform, UnknownTransform> {
        match self.param("pred_transform") {
            None => Ok(OutputTransform::Identity),
            Some(name) => {
                OutputTransform::from_name(name).ok_or_else(|| UnknownTransform(name.to_string()))
            }
        }
    }
}
