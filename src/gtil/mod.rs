//! General Tree Inference Library: prediction over a frozen [`Model`].
//!
//! The surface is three functions plus a configuration object:
//! [`Configuration::parse`] validates execution options from JSON,
//! [`get_output_shape`] tells the caller how big the output buffer must
//! be, and [`predict`] / [`predict_sparse`] fill it from dense or CSR
//! input. [`predict_batch`] is an ndarray convenience over [`predict`].
//!
//! [`Model`]: crate::model::Model

pub mod config;
pub mod predict;
pub mod shape;

pub use config::{ConfigError, Configuration, PredictKind};
pub use predict::{predict, predict_batch, predict_sparse, InputElement, PredictError};
pub use shape::get_output_shape;
