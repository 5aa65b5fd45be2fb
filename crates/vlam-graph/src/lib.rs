//! Factor-graph solver backend on `tiny-solver`.
//!
//! Builds nonlinear least-squares graphs from corner observations,
//! known-marker priors, and between-factors; optimizes them with
//! Levenberg-Marquardt; and extracts poses with marginal covariances.
//!
//! Pose variables are SE(3) blocks stored as 7-vectors
//! `[qx, qy, qz, qw, tx, ty, tz]`. Factor noise is handled by whitening
//! residuals with the square-root information of the measurement
//! covariance; exactly-known marker poses are pinned by fixing their
//! variables instead.

/// Generic quaternion/SE(3) helpers usable inside autodiff residuals.
pub(crate) mod se3;
/// Covariance ordering conversion between graph and transform conventions.
pub mod cov_order;
/// Resectioning, prior, and between factors.
pub mod factors;
/// Factor records and problem compilation.
pub mod graph;
/// Marginal covariances at the optimum.
pub(crate) mod marginals;
/// The factor-graph solver backend.
pub mod solver;

pub use graph::{PoseGraph, SolveOptions};
pub use solver::{GraphSolver, GraphSolverOptions};
