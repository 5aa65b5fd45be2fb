//! SE(3) parameter conversions and generic quaternion algebra.
//!
//! Pose variables are 7-vectors `[qx, qy, qz, qw, tx, ty, tz]`. The generic
//! helpers are written over `nalgebra::RealField` in clone style so that
//! `tiny-solver`'s dual numbers flow through residual evaluation.

use anyhow::{ensure, Result};
use nalgebra::{DVector, Quaternion, RealField, Translation3, UnitQuaternion, Vector3};
use vlam_core::Iso3;

/// Quaternion coefficients in `[x, y, z, w]` order.
pub(crate) type Quat<T> = [T; 4];

/// Convert an isometry into a 7D SE(3) parameter vector.
pub fn iso_to_pose7(pose: &Iso3) -> DVector<f64> {
    let q = pose.rotation.into_inner();
    let t = pose.translation.vector;
    nalgebra::dvector![q.coords[0], q.coords[1], q.coords[2], q.coords[3], t.x, t.y, t.z]
}

/// Convert a 7D SE(3) parameter vector into an isometry.
pub fn pose7_to_iso(v: &DVector<f64>) -> Result<Iso3> {
    ensure!(v.len() == 7, "expected se3 vector of length 7, got {}", v.len());
    let quat = Quaternion::new(v[3], v[0], v[1], v[2]);
    let rot = UnitQuaternion::from_quaternion(quat);
    Ok(Iso3::from_parts(Translation3::new(v[4], v[5], v[6]), rot))
}

/// Split a 7-vector pose into a normalized quaternion and a translation.
pub(crate) fn pose_split<T: RealField>(p: &DVector<T>) -> (Quat<T>, Vector3<T>) {
    let norm = (p[0].clone() * p[0].clone()
        + p[1].clone() * p[1].clone()
        + p[2].clone() * p[2].clone()
        + p[3].clone() * p[3].clone())
    .sqrt();
    let q = [
        p[0].clone() / norm.clone(),
        p[1].clone() / norm.clone(),
        p[2].clone() / norm.clone(),
        p[3].clone() / norm,
    ];
    let t = Vector3::new(p[4].clone(), p[5].clone(), p[6].clone());
    (q, t)
}

/// Lift f64 quaternion coefficients into the residual scalar type.
pub(crate) fn quat_from_f64<T: RealField>(q: &[f64; 4]) -> Quat<T> {
    [
        T::from_f64(q[0]).unwrap(),
        T::from_f64(q[1]).unwrap(),
        T::from_f64(q[2]).unwrap(),
        T::from_f64(q[3]).unwrap(),
    ]
}

pub(crate) fn quat_conj<T: RealField>(q: &Quat<T>) -> Quat<T> {
    [
        -q[0].clone(),
        -q[1].clone(),
        -q[2].clone(),
        q[3].clone(),
    ]
}

/// Hamilton product `a * b`.
pub(crate) fn quat_mul<T: RealField>(a: &Quat<T>, b: &Quat<T>) -> Quat<T> {
    let (ax, ay, az, aw) = (a[0].clone(), a[1].clone(), a[2].clone(), a[3].clone());
    let (bx, by, bz, bw) = (b[0].clone(), b[1].clone(), b[2].clone(), b[3].clone());
    [
        aw.clone() * bx.clone() + ax.clone() * bw.clone() + ay.clone() * bz.clone()
            - az.clone() * by.clone(),
        aw.clone() * by.clone() - ax.clone() * bz.clone()
            + ay.clone() * bw.clone()
            + az.clone() * bx.clone(),
        aw.clone() * bz.clone() + ax.clone() * by.clone() - ay.clone() * bx.clone() + az.clone() * bw.clone(),
        aw * bw - ax * bx - ay * by - az * bz,
    ]
}

/// Rotate a vector by a unit quaternion:
/// `v + 2w (q_v x v) + 2 q_v x (q_v x v)`.
pub(crate) fn quat_rotate<T: RealField>(q: &Quat<T>, v: &Vector3<T>) -> Vector3<T> {
    let qv = Vector3::new(q[0].clone(), q[1].clone(), q[2].clone());
    let w = q[3].clone();
    let two = T::from_f64(2.0).unwrap();
    let c1 = qv.cross(v);
    let c2 = qv.cross(&c1);
    v.clone() + c1 * (w * two.clone()) + c2 * two
}

/// Rotation-vector logarithm of a unit quaternion, shortest arc.
pub(crate) fn quat_log<T: RealField>(q: &Quat<T>) -> Vector3<T> {
    // Flip to the w >= 0 hemisphere so the arc is shortest.
    let q = if q[3] < T::zero() {
        [
            -q[0].clone(),
            -q[1].clone(),
            -q[2].clone(),
            -q[3].clone(),
        ]
    } else {
        q.clone()
    };

    let v = Vector3::new(q[0].clone(), q[1].clone(), q[2].clone());
    let vn = v.norm();
    let eps = T::from_f64(1.0e-12).unwrap();
    if vn < eps {
        // Small angle: log(q) ~ 2 v / w.
        v * (T::from_f64(2.0).unwrap() / q[3].clone())
    } else {
        let angle = vn.clone().atan2(q[3].clone()) * T::from_f64(2.0).unwrap();
        v * (angle / vn)
    }
}

/// Relative pose `a^{-1} * b` from quaternion/translation pairs.
pub(crate) fn relative_pose<T: RealField>(
    qa: &Quat<T>,
    ta: &Vector3<T>,
    qb: &Quat<T>,
    tb: &Vector3<T>,
) -> (Quat<T>, Vector3<T>) {
    let qa_inv = quat_conj(qa);
    let q_rel = quat_mul(&qa_inv, qb);
    let t_rel = quat_rotate(&qa_inv, &(tb - ta));
    (q_rel, t_rel)
}
