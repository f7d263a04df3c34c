//! Smooth and sparse dictionary learning over time-varying covariance.
//!
//! A batch of multivariate time-series observations is summarized as one
//! empirical covariance matrix per time point; that series is factored into a
//! shared spatial dictionary with unit-norm (optionally hard-sparsified) rows
//! and a matrix of bounded, optionally temporally-smooth activation
//! coefficients. Fitting alternates a natural-gradient coefficient step with
//! a projected dictionary step; the smoothness constraint is enforced per
//! coefficient column by a secular-equation projection onto the quadratic
//! region of a fixed temporal kernel.
//!
//! Everything is synchronous dense linear algebra on `f64`; the only
//! extension points are the [`AlignmentMetric`] oracle used for
//! ground-truth evaluation and the [`ProgressSink`] iteration observer.

pub mod coefficients;
pub mod config;
pub mod covariance;
pub mod dictionary;
pub mod error;
pub mod evaluate;
pub mod model;
pub mod projection;

pub use config::{CoeffPenalty, DictPenalty, InitMethod, ModelConfig};
pub use error::{CovDlError, CovResult};
pub use evaluate::{AlignmentMetric, PermutationAlignment, ProgressSink};
pub use model::{FitOptions, FitReport, FitState, FitStatus, GroundTruth, SnsCovModel};
pub use projection::KernelProjector;
