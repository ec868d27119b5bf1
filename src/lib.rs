//! Interchange and inference layer for decision-tree ensemble models.
//!
//! Format-specific loaders assemble a model node by node through
//! [`builder::ModelBuilder`]; committing freezes it into an immutable
//! [`Model`] that any number of threads can predict against through the
//! [`gtil`] engine.
//!
//! ```
//! use canopy::builder::{ModelBuilder, TreeBuilder};
//! use canopy::gtil::{self, Configuration};
//! use canopy::model::Operator;
//! use canopy::value::{ElementType, TypedValue};
//!
//! let mut tree = TreeBuilder::new(ElementType::Float32, ElementType::Float32);
//! tree.create_node(0).unwrap();
//! tree.create_node(1).unwrap();
//! tree.create_node(2).unwrap();
//! tree.set_leaf_node(1, TypedValue::new(-1.0f32)).unwrap();
//! tree.set_leaf_node(2, TypedValue::new(1.0f32)).unwrap();
//! tree.set_numerical_test_node(0, 0, Operator::Lt, TypedValue::new(0.5f32), true, 1, 2)
//!     .unwrap();
//! tree.set_root_node(0).unwrap();
//!
//! let mut builder =
//!     ModelBuilder::new(1, 1, false, ElementType::Float32, ElementType::Float32).unwrap();
//! builder.insert_tree(tree, None).unwrap();
//! let model = builder.commit().unwrap();
//!
//! let config = Configuration::parse(r#"{"pred_transform": false}"#).unwrap();
//! let mut output = [0.0f32; 2];
//! gtil::predict(&model, &[0.0f32, 1.0], 2, &mut output, &config).unwrap();
//! assert_eq!(output, [-1.0, 1.0]);
//! ```

pub mod builder;
pub mod gtil;
pub mod model;
pub mod utils;
pub mod value;

pub use model::Model;
pub use value::{ElementType, TypedValue};

// Re-export for downstream float assertions.
pub use approx;
