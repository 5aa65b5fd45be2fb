//! Core types for fiducial-marker visual localization and mapping.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the camera model (`Intrinsics`, `Distortion5`, `CameraInfo`),
//! - rigid transforms with covariance (`TransformWithCovariance`),
//! - marker observations and canonical corner geometry,
//! - the marker map store (`Marker`, `Map`),
//! - a generic RANSAC engine (`ransac`, [`Estimator`]).
//!
//! The solver backends live in `vlam-geometric` and `vlam-graph`, and are
//! re-exported together with the driver via the top-level `vlam` crate.

/// Linear algebra type aliases and angle helpers.
pub mod math;
/// Camera intrinsics and distortion model.
pub mod camera;
/// Rigid transforms in SE(3) with a 6x6 covariance.
pub mod transform;
/// Marker observations and canonical corner geometry.
pub mod observation;
/// Marker and map store.
pub mod map;
/// Generic RANSAC engine and traits.
pub mod ransac;

pub use camera::*;
pub use map::*;
pub use math::*;
pub use observation::*;
pub use ransac::*;
pub use transform::*;
