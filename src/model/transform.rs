//! Output transformation applied after tree aggregation.
//!
//! A model names its transform in the `pred_transform` model parameter so
//! that inference needs no knowledge of the training objective. The GTIL
//! engine applies it per output row when the configuration asks for
//! transformed output; raw margins are returned otherwise.

/// Inference-time output transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputTransform {
    /// No transformation; output = margin.
    #[default]
    Identity,

    /// Logistic sigmoid: `1 / (1 + exp(-margin))`, for binary margins.
    Sigmoid,

    /// Softmax over the row, for multiclass margins.
    Softmax,
}

/// A `pred_transform` model parameter named an unknown transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized pred_transform `{0}`")]
pub struct UnknownTransform(pub String);

impl OutputTransform {
    /// Look up by the model-parameter name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(OutputTransform::Identity),
            "sigmoid" => Some(OutputTransform::Sigmoid),
            "softmax" => Some(OutputTransform::Softmax),
            _ => None,
        }
    }

    /// Apply the transformation in place to one output row.
    ///
    /// Sigmoid maps every element independently; softmax normalizes the
    /// whole row. NaN and infinities propagate without panicking.
    #[inline]
    pub fn apply(self, row: &mut [f64]) {
        match self {
            OutputTransform::Identity => {}
            OutputTransform::Sigmoid => {
                for x in row.iter_mut() {
                    *x = sigmoid(*x);
                }
            }
            OutputTransform::Softmax => softmax_inplace(row),
        }
    }
}

/// Numerically stable sigmoid; clamps input to [-500, 500].
#[inline]
fn sigmoid(x: f64) -> f64 {
    let clamped = x.clamp(-500.0, 500.0);
    if clamped >= 0.0 {
        1.0 / (1.0 + (-clamped).exp())
    } else {
        let e = clamped.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax; subtracts the row maximum before
/// exponentiating.
#[inline]
fn softmax_inplace(row: &mut [f64]) {
    if row.is_empty() {
        return;
    }

    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut sum = 0.0f64;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }

    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identity_is_noop() {
        let mut row = vec![1.0, -2.0, 3.5, 0.0];
        let original = row.clone();
        OutputTransform::Identity.apply(&mut row);
        assert_eq!(row, original);
    }

    #[test]
    fn sigmoid_zero_is_half() {
        let mut row = vec![0.0];
        OutputTransform::Sigmoid.apply(&mut row);
        assert_abs_diff_eq!(row[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn sigmoid_saturates_stably() {
        let mut row = vec![-1000.0, 1000.0, f64::NEG_INFINITY, f64::INFINITY];
        OutputTransform::Sigmoid.apply(&mut row);
        assert!(row[0] < 1e-6);
        assert!(row[1] > 1.0 - 1e-6);
        assert!(row[2] < 1e-6);
        assert!(row[3] > 1.0 - 1e-6);
    }

    #[test]
    fn sigmoid_nan_propagates() {
        let mut row = vec![f64::NAN];
        OutputTransform::Sigmoid.apply(&mut row);
        assert!(row[0].is_nan());
    }

    #[test]
    fn softmax_sums_to_one_and_preserves_order() {
        let mut row = vec![1.0, 2.0, 3.0];
        OutputTransform::Softmax.apply(&mut row);

        let sum: f64 = row.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
        assert!(row[0] < row[1] && row[1] < row[2]);
    }

    #[test]
    fn softmax_large_margins_stable() {
        let mut row = vec![1000.0, 2000.0, 3000.0];
        OutputTransform::Softmax.apply(&mut row);

        let sum: f64 = row.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
        assert!(row[2] > 0.99);
    }

    #[test]
    fn transform_lookup() {
        assert_eq!(
            OutputTransform::from_name("identity"),
            Some(OutputTransform::Identity)
        );
        assert_eq!(
            OutputTransform::from_name("sigmoid"),
            Some(OutputTransform::Sigmoid)
        );
        assert_eq!(
            OutputTransform::from_name("softmax"),
            Some(OutputTransform::Softmax)
        );
        assert_eq!(OutputTransform::from_name("logit"), None);
    }
}
