//! Prediction run configuration.
//!
//! Callers hand the engine a JSON document; [`Configuration::parse`]
//! validates it once and the resulting object is immutable and reusable
//! across any number of predict calls. Unknown keys fail the parse so a
//! typo never silently falls back to a default.

use std::fmt;

use serde::Deserialize;

/// What a predict call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictKind {
    /// Aggregated (and optionally transformed) ensemble output.
    #[default]
    Default,
    /// Per-tree id of the leaf each row lands in; no aggregation.
    LeafIndex,
    /// Per-feature SHAP contributions. Recognized but not executable;
    /// see [`PredictError::UnsupportedPredictKind`](super::PredictError).
    ShapContribution,
}

impl fmt::Display for PredictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PredictKind::Default => "default",
            PredictKind::LeafIndex => "leaf_index",
            PredictKind::ShapContribution => "shap_contribution",
        };
        f.write_str(name)
    }
}

/// The configuration document failed to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid prediction configuration: {0}")]
pub struct ConfigError(#[from] serde_json::Error);

/// Validated execution options for a predict call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Worker threads; any value `<= 0` means all available cores.
    pub nthread: i32,
    /// Apply the model's output transform to aggregated margins.
    pub pred_transform: bool,
    /// Output kind.
    pub pred_kind: PredictKind,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            nthread: 0,
            pred_transform: true,
            pred_kind: PredictKind::Default,
        }
    }
}

impl Configuration {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing keys take their defaults; unknown keys and mistyped values
    /// are errors.
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Thread count in [`run_with_threads`](crate::utils::run_with_threads)
    /// semantics (0 = all cores).
    pub(crate) fn n_threads(&self) -> usize {
        if self.nthread <= 0 {
            0
        } else {
            self.nthread as usize
        }
    }
}
