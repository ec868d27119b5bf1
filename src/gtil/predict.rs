//! The prediction engine.
//!
//! All entry points validate their inputs fully before writing a single
//! output element. Rows are independent; the engine parallelizes over
//! rows with each worker writing only its own output chunk, so results
//! are bit-identical for any thread count.

use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::gtil::config::{Configuration, PredictKind};
use crate::model::transform::{OutputTransform, UnknownTransform};
use crate::model::tree::{CategorySet, Node, NodeId, Tree};
use crate::model::Model;
use crate::utils::run_with_threads;

use super::shape::get_output_shape;

/// Errors raised at the prediction boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PredictError {
    #[error("predict kind `{0}` is not supported by this engine")]
    UnsupportedPredictKind(PredictKind),
    #[error(transparent)]
    UnknownTransform(#[from] UnknownTransform),
    #[error("input holds {actual} values, expected num_row * num_feature = {expected}")]
    InputSizeMismatch { expected: usize, actual: usize },
    #[error("output holds {actual} values, expected {expected} per the output shape")]
    OutputSizeMismatch { expected: usize, actual: usize },
    #[error("row_ptr holds {actual} entries, expected num_row + 1 = {expected}")]
    RowPtrLength { expected: usize, actual: usize },
    #[error("row_ptr is not monotone non-decreasing at row {row}")]
    RowPtrNotMonotone { row: usize },
    #[error(
        "CSR arrays disagree: {values} values, {col_ind} column indices, \
         row_ptr ends at {row_ptr_end}"
    )]
    CsrLengthMismatch {
        values: usize,
        col_ind: usize,
        row_ptr_end: u64,
    },
    #[error("column index {column} out of range (model has {num_feature} features)")]
    ColumnOutOfRange { column: u64, num_feature: u32 },
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Floating-point element types accepted as prediction input and output.
///
/// NaN is the missing-value marker. Values are widened to `f64` before
/// comparison against thresholds, so an `f32` input against `f64`
/// thresholds (or the reverse) is a precision question, never a type
/// error.
pub trait InputElement: Copy + Send + Sync + sealed::Sealed {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl InputElement for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl InputElement for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Walk one tree from the root to a leaf.
///
/// `fvalue` returns the row's value for a feature id, NaN meaning
/// missing. Committed trees are acyclic, so the walk terminates.
fn traverse_to_leaf<F: Fn(u32) -> f64>(tree: &Tree, fvalue: &F) -> NodeId {
    let mut node_id = tree.root_id();
    loop {
        match tree.node(node_id) {
            Node::Leaf { .. } | Node::LeafVector { .. } => return node_id,
            Node::NumericalTest {
                feature_id,
                op,
                threshold,
                default_left,
                left,
                right,
            } => {
                let value = fvalue(*feature_id);
                node_id = if value.is_nan() {
                    if *default_left {
                        *left
                    } else {
                        *right
                    }
                } else if op.evaluate(value, threshold.to_f64()) {
                    *left
                } else {
                    *right
                };
            }
            Node::CategoricalTest {
                feature_id,
                left_categories,
                default_left,
                left,
                right,
            } => {
                let value = fvalue(*feature_id);
                node_id = if value.is_nan() {
                    if *default_left {
                        *left
                    } else {
                        *right
                    }
                } else if matches_category(value, *left_categories) {
                    *left
                } else {
                    *right
                };
            }
        }
    }
}

/// Truncate a feature value to a category id and test membership.
///
/// Negative, non-finite, and out-of-range values are never members and
/// route right.
#[inline]
fn matches_category(value: f64, left_categories: CategorySet) -> bool {
    if !value.is_finite() || value < 0.0 {
        return false;
    }
    let category = value.trunc();
    if category > CategorySet::MAX_CATEGORY as f64 {
        return false;
    }
    left_categories.contains(category as u32)
}

/// Validated, shape-checked state shared by every row of one call.
struct Engine<'m> {
    model: &'m Model,
    transform: OutputTransform,
    pred_transform: bool,
    pred_kind: PredictKind,
    /// Per class, how many trees contribute to it. Used for averaging.
    class_counts: Vec<u32>,
    n_cols: usize,
}

impl<'m> Engine<'m> {
    fn new(model: &'m Model, config: &Configuration, num_row: usize) -> Result<Self, PredictError> {
        let shape = get_output_shape(model, num_row as u64, config)?;
        let transform = match config.pred_kind {
            // Resolved up front even when disabled so a bad model param
            // surfaces before any output is written.
            PredictKind::Default => model.output_transform()?,
            _ => OutputTransform::Identity,
        };
        Ok(Engine {
            model,
            transform,
            pred_transform: config.pred_transform,
            pred_kind: config.pred_kind,
            class_counts: class_counts(model),
            n_cols: shape[1] as usize,
        })
    }

    fn expected_output_len(&self, num_row: usize) -> usize {
        num_row * self.n_cols
    }

    /// Predict one row into its output chunk.
    fn predict_row_into<T, F>(&self, fvalue: &F, margins: &mut [f64], out: &mut [T])
    where
        T: InputElement,
        F: Fn(u32) -> f64,
    {
        match self.pred_kind {
            PredictKind::Default => {
                margins.fill(0.0);
                for (tree_index, tree) in self.model.trees().enumerate() {
                    let leaf_id = traverse_to_leaf(tree, fvalue);
                    match tree.node(leaf_id) {
                        Node::Leaf { value } => {
                            margins[tree_index % self.n_cols] += value.to_f64();
                        }
                        Node::LeafVector { values } => {
                            for (margin, value) in margins.iter_mut().zip(values) {
                                *margin += value.to_f64();
                            }
                        }
                        _ => unreachable!("traversal stops at leaves"),
                    }
                }
                if self.model.average_tree_output() {
                    for (margin, &count) in margins.iter_mut().zip(&self.class_counts) {
                        if count > 0 {
                            *margin /= count as f64;
                        }
                    }
                }
                if self.pred_transform {
                    self.transform.apply(margins);
                }
                for (slot, &margin) in out.iter_mut().zip(margins.iter()) {
                    *slot = T::from_f64(margin);
                }
            }
            PredictKind::LeafIndex => {
                for (slot, tree) in out.iter_mut().zip(self.model.trees()) {
                    let leaf_id = traverse_to_leaf(tree, fvalue);
                    *slot = T::from_f64(leaf_id as f64);
                }
            }
            PredictKind::ShapContribution => {
                unreachable!("rejected during output-shape derivation")
            }
        }
    }
}

/// Trees contributing to each class: vector-leaf trees contribute to all
/// classes, scalar trees only to `tree_index % num_class`.
fn class_counts(model: &Model) -> Vec<u32> {
    let num_class = model.num_class() as usize;
    let mut counts = vec![0u32; num_class];
    for (tree_index, tree) in model.trees().enumerate() {
        if tree.has_vector_leaves() {
            for count in counts.iter_mut() {
                *count += 1;
            }
        } else {
            counts[tree_index % num_class] += 1;
        }
    }
    counts
}

/// Predict over dense row-major input.
///
/// `input` holds `num_row * num_feature` values, NaN marking missing
/// entries. `output` must hold exactly the number of values implied by
/// [`get_output_shape`] for this configuration; nothing is written on
/// error.
pub fn predict<T: InputElement>(
    model: &Model,
    input: &[T],
    num_row: usize,
    output: &mut [T],
    config: &Configuration,
) -> Result<(), PredictError> {
    let num_feature = model.num_feature() as usize;
    let expected = num_row
        .checked_mul(num_feature)
        .ok_or(PredictError::InputSizeMismatch {
            expected: usize::MAX,
            actual: input.len(),
        })?;
    if input.len() != expected {
        return Err(PredictError::InputSizeMismatch {
            expected,
            actual: input.len(),
        });
    }

    let engine = Engine::new(model, config, num_row)?;
    let expected_out = engine.expected_output_len(num_row);
    if output.len() != expected_out {
        return Err(PredictError::OutputSizeMismatch {
            expected: expected_out,
            actual: output.len(),
        });
    }
    if output.is_empty() {
        return Ok(());
    }

    debug!(
        "predict: {} rows, {} trees, kind {}",
        num_row,
        model.n_trees(),
        config.pred_kind
    );

    let num_class = model.num_class() as usize;
    run_with_threads(config.n_threads(), |parallelism| {
        let rows = input.chunks(num_feature).zip(output.chunks_mut(engine.n_cols));
        parallelism.maybe_par_bridge_for_each_init(
            rows,
            || vec![0.0f64; num_class],
            |margins, (row, out)| {
                let fvalue = |feature_id: u32| row[feature_id as usize].to_f64();
                engine.predict_row_into(&fvalue, margins, out);
            },
        );
    });
    Ok(())
}

/// Predict over CSR input.
///
/// `values`/`col_ind`/`row_ptr` form a standard CSR triple; entries
/// absent from a row are missing. All arrays are validated before any
/// output is written.
pub fn predict_sparse<T: InputElement>(
    model: &Model,
    values: &[T],
    col_ind: &[u64],
    row_ptr: &[u64],
    num_row: usize,
    output: &mut [T],
    config: &Configuration,
) -> Result<(), PredictError> {
    let num_feature = model.num_feature();
    if row_ptr.len() != num_row + 1 {
        return Err(PredictError::RowPtrLength {
            expected: num_row + 1,
            actual: row_ptr.len(),
        });
    }
    if row_ptr[0] != 0 {
        return Err(PredictError::RowPtrNotMonotone { row: 0 });
    }
    for (row, window) in row_ptr.windows(2).enumerate() {
        if window[1] < window[0] {
            return Err(PredictError::RowPtrNotMonotone { row: row + 1 });
        }
    }
    let nnz = row_ptr[num_row];
    if values.len() as u64 != nnz || col_ind.len() as u64 != nnz {
        return Err(PredictError::CsrLengthMismatch {
            values: values.len(),
            col_ind: col_ind.len(),
            row_ptr_end: nnz,
        });
    }
    for &column in col_ind {
        if column >= num_feature as u64 {
            return Err(PredictError::ColumnOutOfRange {
                column,
                num_feature,
            });
        }
    }

    let engine = Engine::new(model, config, num_row)?;
    let expected_out = engine.expected_output_len(num_row);
    if output.len() != expected_out {
        return Err(PredictError::OutputSizeMismatch {
            expected: expected_out,
            actual: output.len(),
        });
    }
    if output.is_empty() {
        return Ok(());
    }

    debug!(
        "predict_sparse: {} rows, {} nonzeros, {} trees, kind {}",
        num_row,
        nnz,
        model.n_trees(),
        config.pred_kind
    );

    let num_class = model.num_class() as usize;
    run_with_threads(config.n_threads(), |parallelism| {
        let rows = row_ptr.windows(2).zip(output.chunks_mut(engine.n_cols));
        parallelism.maybe_par_bridge_for_each_init(
            rows,
            // Per-thread scratch: a NaN-filled dense row plus the margin
            // accumulator. Gathered entries are reset after each row so
            // the scratch stays all-NaN between rows.
            || (vec![f64::NAN; num_feature as usize], vec![0.0f64; num_class]),
            |(scratch, margins), (window, out)| {
                let (start, end) = (window[0] as usize, window[1] as usize);
                for i in start..end {
                    scratch[col_ind[i] as usize] = values[i].to_f64();
                }
                let fvalue = |feature_id: u32| scratch[feature_id as usize];
                engine.predict_row_into(&fvalue, margins, out);
                for i in start..end {
                    scratch[col_ind[i] as usize] = f64::NAN;
                }
            },
        );
    });
    Ok(())
}

/// Predict over an ndarray batch; rows are samples, columns features.
///
/// Convenience wrapper over [`predict`] returning a freshly allocated
/// `[num_row, n_cols]` array.
pub fn predict_batch<T: InputElement>(
    model: &Model,
    features: ArrayView2<'_, T>,
    config: &Configuration,
) -> Result<Array2<T>, PredictError> {
    let num_row = features.nrows();
    let num_feature = model.num_feature() as usize;
    if features.ncols() != num_feature {
        return Err(PredictError::InputSizeMismatch {
            expected: num_row * num_feature,
            actual: num_row * features.ncols(),
        });
    }

    let shape = get_output_shape(model, num_row as u64, config)?;
    let n_cols = shape[1] as usize;
    let mut output = vec![T::from_f64(0.0); num_row * n_cols];

    match features.as_slice() {
        Some(input) => predict(model, input, num_row, &mut output, config)?,
        None => {
            let input: Vec<T> = features.iter().copied().collect();
            predict(model, &input, num_row, &mut output, config)?;
        }
    }

    Ok(Array2::from_shape_vec((num_row, n_cols), output)
        .expect("output length matches the derived shape"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ModelBuilder, TreeBuilder};
    use crate::model::Operator;
    use crate::value::{ElementType, TypedValue};
    use approx::assert_abs_diff_eq;

    fn single_split_model(threshold: f32, left_val: f32, right_val: f32) -> Model {
        let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
        tree.create_node(0).unwrap();
        tree.create_node(1).unwrap();
        tree.create_node(2).unwrap();
        tree.set_leaf_node(1, TypedValue::new(left_val)).unwrap();
        tree.set_leaf_node(2, TypedValue::new(right_val)).unwrap();
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

        let mut builder =
            ModelBuilder::new(2, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
        builder.insert_tree(tree, None).unwrap();
        builder.commit().unwrap()
    }

    fn config_raw() -> Configuration {
        Configuration::parse(r#"{"nthread": 1, "pred_transform": false}"#).unwrap()
    }

    #[test]
    fn numeric_split_routes_both_ways() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [0.0f32; 2];
        let input = [0.2f32, 9.0, 0.9, 9.0];
        predict(&model, &input, 2, &mut output, &config_raw()).unwrap();
        assert_abs_diff_eq!(output[0], -1.0);
        assert_abs_diff_eq!(output[1], 1.0);
    }

    #[test]
    fn missing_value_takes_default_direction() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [0.0f32; 1];
        let input = [f32::NAN, 9.0];
        predict(&model, &input, 1, &mut output, &config_raw()).unwrap();
        // default_left = true in the fixture
        assert_abs_diff_eq!(output[0], -1.0);
    }

    #[test]
    fn category_truncation_and_range_policy() {
        let set = CategorySet::from_categories(&[1, 3]).unwrap();
        assert!(matches_category(1.0, set));
        assert!(matches_category(3.7, set)); // truncates to 3
        assert!(!matches_category(2.0, set));
        assert!(!matches_category(-1.0, set));
        assert!(!matches_category(64.0, set));
        assert!(!matches_category(f64::INFINITY, set));
        assert!(!matches_category(1e300, set));
    }

    #[test]
    fn input_size_validated() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [0.0f32; 2];
        let err = predict(&model, &[0.0f32; 3], 2, &mut output, &config_raw());
        assert_eq!(
            err,
            Err(PredictError::InputSizeMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn output_size_validated_before_any_write() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [7.0f32; 3];
        let err = predict(&model, &[0.0f32; 4], 2, &mut output, &config_raw());
        assert_eq!(
            err,
            Err(PredictError::OutputSizeMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(output, [7.0; 3]);
    }

    #[test]
    fn csr_validation() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [0.0f32; 1];
        let config = config_raw();

        let err = predict_sparse(&model, &[1.0f32], &[0], &[0], 1, &mut output, &config);
        assert_eq!(
            err,
            Err(PredictError::RowPtrLength {
                expected: 2,
                actual: 1
            })
        );

        let err = predict_sparse(&model, &[1.0f32], &[0], &[1, 0], 1, &mut output, &config);
        assert!(matches!(err, Err(PredictError::RowPtrNotMonotone { .. })));

        let err = predict_sparse(&model, &[1.0f32], &[0, 1], &[0, 1], 1, &mut output, &config);
        assert!(matches!(err, Err(PredictError::CsrLengthMismatch { .. })));

        let err = predict_sparse(&model, &[1.0f32], &[5], &[0, 1], 1, &mut output, &config);
        assert_eq!(
            err,
            Err(PredictError::ColumnOutOfRange {
                column: 5,
                num_feature: 2
            })
        );
    }

    #[test]
    fn zero_rows_is_a_noop() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output: [f32; 0] = [];
        predict(&model, &[], 0, &mut output, &config_raw()).unwrap();
        predict_sparse(&model, &[], &[], &[0], 0, &mut output, &config_raw()).unwrap();
    }

    #[test]
    fn f64_input_against_f32_thresholds() {
        let model = single_split_model(0.5, -1.0, 1.0);
        let mut output = [0.0f64; 2];
        let input = [0.2f64, 9.0, 0.9, 9.0];
        predict(&model, &input, 2, &mut output, &config_raw()).unwrap();
        assert_abs_diff_eq!(output[0], -1.0);
        assert_abs_diff_eq!(output[1], 1.0);
    }
}
