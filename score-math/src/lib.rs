//! score-math - numeric kernels for anomaly score evaluation
//!
//! This crate holds the scalar math used when turning anomaly scores into
//! detection metrics:
//!
//! - **ROC** - receiver operating characteristic curve and its area
//! - **Integration** - trapezoid rule with an optional upper integration limit
//! - **Interpolation** - 1D linear interpolation over sorted samples
//! - **Statistics** - mean and range normalization
//!
//! # Example
//!
//! ```
//! use score_math::roc_auc;
//!
//! let labels = [false, false, true, true];
//! let scores = [0.1, 0.4, 0.35, 0.8];
//! let auc = roc_auc(&labels, &scores).unwrap();
//! assert!((auc - 0.75).abs() < 1e-12);
//! ```

pub mod integrate;
pub mod interp;
pub mod roc;
pub mod stats;

pub use integrate::{trapezoid, trapezoid_until, IntegrateError};
pub use interp::{interp, InterpError};
pub use roc::{roc_auc, roc_curve, RocCurve, RocError};
pub use stats::{mean, min_max_normalize};
