//! Output shape derivation.

use crate::gtil::config::{Configuration, PredictKind};
use crate::gtil::predict::PredictError;
use crate::model::Model;

/// Shape of the output a predict call will produce, as `[rows, cols]`.
///
/// Callers size their output buffer from this before predicting; the
/// predict entry points enforce the same contract. Only model metadata
/// and `num_row` are consulted.
pub fn get_output_shape(
    model: &Model,
    num_row: u64,
    config: &Configuration,
) -> Result<Vec<u64>, PredictError> {
    match config.pred_kind {
        PredictKind::Default => Ok(vec![num_row, model.num_class() as u64]),
        PredictKind::LeafIndex => Ok(vec![num_row, model.n_trees() as u64]),
        PredictKind::ShapContribution => Err(PredictError::UnsupportedPredictKind(
            PredictKind::ShapContribution,
        )),
    }
}
