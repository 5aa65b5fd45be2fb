//! Mathematical type definitions and small angle utilities.

use nalgebra::{Isometry3, Matrix3, Matrix6, Point2, Point3, Vector2, Vector3, Vector6};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 6D vector with [`Real`] components.
pub type Vec6 = Vector6<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;
/// 6×6 covariance matrix over `(x, y, z, roll, pitch, yaw)`.
pub type Cov6 = Matrix6<Real>;

/// Wrap an angle into `(-pi, pi]`.
pub fn normalize_angle(a: Real) -> Real {
    let mut a = a % std::f64::consts::TAU;
    if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    } else if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    }
    a
}
