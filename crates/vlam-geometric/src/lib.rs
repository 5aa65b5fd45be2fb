//! Geometric (closed-form plus iterative refinement) solver backend.
//!
//! Produces camera poses from marker corner observations without an
//! optimization graph: corners are undistorted into normalized coordinates,
//! an initial pose comes from homography decomposition (planar point sets)
//! or a normalized DLT (general sets), and a damped Gauss-Newton pass
//! polishes the reprojection error.
//!
//! The multi-marker localization entry point carries a mirror-solution
//! guard: in the ambiguity-prone regime a RANSAC solve is run alongside the
//! plain iterative solve and replaces it when the two disagree.

/// Iterative perspective-n-point on normalized coordinates.
pub mod pnp;
/// PnP wrapped in the generic RANSAC engine.
pub mod ransac_pnp;
/// The geometric solver backend.
pub mod solver;

pub use pnp::{solve_pnp, PnpError};
pub use ransac_pnp::solve_pnp_ransac;
pub use solver::GeometricSolver;
