//! Residual factors for the pose graph.
//!
//! Each factor is a plain struct implementing
//! `tiny_solver::factors::Factor<T>` with a residual generic over
//! `RealField`, so the optimizer's dual numbers differentiate through it.
//! Measurement noise is folded in here: resection residuals are scaled by
//! the inverse corner sigma, prior/between residuals are whitened by the
//! square-root information of their covariance.

use nalgebra::{DVector, Matrix6, RealField, Vector2, Vector3, Vector6};
use tiny_solver::factors::Factor;
use vlam_core::{CameraInfo, Cov6};

use crate::se3::{pose_split, quat_conj, quat_from_f64, quat_log, quat_mul, quat_rotate, Quat};

/// Depth guard added before the perspective divide.
const PROJECTION_EPS: f64 = 1.0e-9;

/// Square-root information (upper-triangular whitener) of a covariance.
///
/// `None` when the covariance is not positive-definite; callers substitute
/// a default.
pub fn sqrt_information(cov: &Cov6) -> Option<Matrix6<f64>> {
    cov.cholesky().map(|chol| {
        chol.inverse()
            .cholesky()
            .map(|c| c.l().transpose())
            // The inverse of an SPD matrix is SPD.
            .unwrap_or_else(Matrix6::identity)
    })
}

/// Isotropic diagonal square-root information from a scalar sigma.
pub fn isotropic_sqrt_information(sigma: f64) -> Matrix6<f64> {
    Matrix6::identity() / sigma
}

fn whiten<T: RealField>(sqrt_info: &Matrix6<f64>, r: &Vector6<T>) -> Vector6<T> {
    let mut out = Vector6::from_element(T::zero());
    for i in 0..6 {
        let mut acc = T::zero();
        for j in 0..6 {
            let w = sqrt_info[(i, j)];
            if w != 0.0 {
                acc += r[j].clone() * T::from_f64(w).unwrap();
            }
        }
        out[i] = acc;
    }
    out
}

/// Project a camera-frame point through pinhole intrinsics and the
/// 5-parameter distortion, generically over the scalar type.
fn project_dist5<T: RealField>(camera: &CameraInfo, pc: &Vector3<T>) -> Vector2<T> {
    let z = pc.z.clone() + T::from_f64(PROJECTION_EPS).unwrap();
    let x = pc.x.clone() / z.clone();
    let y = pc.y.clone() / z;

    let k1 = T::from_f64(camera.d.k1).unwrap();
    let k2 = T::from_f64(camera.d.k2).unwrap();
    let p1 = T::from_f64(camera.d.p1).unwrap();
    let p2 = T::from_f64(camera.d.p2).unwrap();
    let k3 = T::from_f64(camera.d.k3).unwrap();
    let two = T::from_f64(2.0).unwrap();

    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
    let r4 = r2.clone() * r2.clone();
    let r6 = r4.clone() * r2.clone();
    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;

    let x_tan = two.clone() * p1.clone() * x.clone() * y.clone()
        + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
    let y_tan =
        p1 * (r2 + two.clone() * y.clone() * y.clone()) + two * p2 * x.clone() * y.clone();

    let xd = x * radial.clone() + x_tan;
    let yd = y * radial + y_tan;

    let fx = T::from_f64(camera.k.fx).unwrap();
    let fy = T::from_f64(camera.k.fy).unwrap();
    let cx = T::from_f64(camera.k.cx).unwrap();
    let cy = T::from_f64(camera.k.cy).unwrap();
    Vector2::new(fx * xd + cx, fy * yd + cy)
}

/// Local coordinates `[log(R_err), t_err]` of `measured^{-1} * observed`,
/// rotation first.
fn pose_local_coordinates<T: RealField>(
    q_meas: &Quat<T>,
    t_meas: &Vector3<T>,
    q: &Quat<T>,
    t: &Vector3<T>,
) -> Vector6<T> {
    let q_meas_inv = quat_conj(q_meas);
    let q_err = quat_mul(&q_meas_inv, q);
    let t_err = quat_rotate(&q_meas_inv, &(t - t_meas));
    let w = quat_log(&q_err);
    Vector6::new(
        w.x.clone(),
        w.y.clone(),
        w.z.clone(),
        t_err.x.clone(),
        t_err.y.clone(),
        t_err.z.clone(),
    )
}

/// Unary resectioning factor: one known 3D point observed at one pixel.
///
/// The variable is the camera pose in the point's frame (`T_world_camera`);
/// the residual is `project(P) - p`, scaled by the inverse corner sigma.
#[derive(Debug, Clone)]
pub struct ResectionFactor {
    pub p_world: [f64; 3],
    pub uv: [f64; 2],
    pub camera: CameraInfo,
    pub inv_sigma: f64,
}

impl<T: RealField> Factor<T> for ResectionFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [camera pose] parameter block");
        let (q, t) = pose_split(&params[0]);

        // World point into the camera frame: R^T (P - t).
        let p = Vector3::new(
            T::from_f64(self.p_world[0]).unwrap(),
            T::from_f64(self.p_world[1]).unwrap(),
            T::from_f64(self.p_world[2]).unwrap(),
        );
        let pc = quat_rotate(&quat_conj(&q), &(p - t));

        let proj = project_dist5(&self.camera, &pc);
        let s = T::from_f64(self.inv_sigma).unwrap();
        let ru = (proj.x.clone() - T::from_f64(self.uv[0]).unwrap()) * s.clone();
        let rv = (proj.y.clone() - T::from_f64(self.uv[1]).unwrap()) * s;
        nalgebra::dvector![ru, rv]
    }
}

/// Unary SE(3) prior, whitened by square-root information in
/// `(rx, ry, rz, tx, ty, tz)` order.
#[derive(Debug, Clone)]
pub struct PriorFactor {
    /// Mean pose as `[qx, qy, qz, qw, tx, ty, tz]`.
    pub mean: [f64; 7],
    pub sqrt_info: Matrix6<f64>,
}

impl<T: RealField> Factor<T> for PriorFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [pose] parameter block");
        let (q, t) = pose_split(&params[0]);

        let q_mean = quat_from_f64(&[self.mean[0], self.mean[1], self.mean[2], self.mean[3]]);
        let t_mean = Vector3::new(
            T::from_f64(self.mean[4]).unwrap(),
            T::from_f64(self.mean[5]).unwrap(),
            T::from_f64(self.mean[6]).unwrap(),
        );

        let r = pose_local_coordinates(&q_mean, &t_mean, &q, &t);
        let r = whiten(&self.sqrt_info, &r);
        DVector::from_iterator(6, r.iter().cloned())
    }
}

/// Binary between-factor on `(marker, camera)` variables.
///
/// Measures the camera pose in the marker frame; the residual is the local
/// coordinates of `measured^{-1} * (T_map_marker^{-1} * T_map_camera)`,
/// whitened by square-root information.
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    /// Measured `T_marker_camera` as `[qx, qy, qz, qw, tx, ty, tz]`.
    pub measured: [f64; 7],
    pub sqrt_info: Matrix6<f64>,
}

impl<T: RealField> Factor<T> for BetweenFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 2, "expected [marker, camera] parameter blocks");
        let (q_m, t_m) = pose_split(&params[0]);
        let (q_c, t_c) = pose_split(&params[1]);

        let (q_rel, t_rel) = crate::se3::relative_pose(&q_m, &t_m, &q_c, &t_c);

        let q_meas = quat_from_f64(&[
            self.measured[0],
            self.measured[1],
            self.measured[2],
            self.measured[3],
        ]);
        let t_meas = Vector3::new(
            T::from_f64(self.measured[4]).unwrap(),
            T::from_f64(self.measured[5]).unwrap(),
            T::from_f64(self.measured[6]).unwrap(),
        );

        let r = pose_local_coordinates(&q_meas, &t_meas, &q_rel, &t_rel);
        let r = whiten(&self.sqrt_info, &r);
        DVector::from_iterator(6, r.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use vlam_core::{Distortion5, Intrinsics, Iso3, Pt3};

    use crate::se3::iso_to_pose7;

    fn camera() -> CameraInfo {
        CameraInfo::new(
            Intrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: 320.0,
                cy: 240.0,
            },
            Distortion5 {
                k1: -0.2,
                k2: 0.05,
                p1: 0.001,
                p2: -0.001,
                k3: 0.0,
            },
        )
    }

    #[test]
    fn resection_residual_vanishes_at_truth() {
        let cam = camera();
        // Camera 0.8 m in front of the point, looking back along -Z.
        let t_world_camera = Iso3::from_parts(
            Translation3::new(0.0, 0.0, 0.8),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        );
        let p_world = Pt3::new(0.03, -0.02, 0.0);
        let p_cam = t_world_camera.inverse().transform_point(&p_world);
        let uv = cam.project(&p_cam).unwrap();

        let factor = ResectionFactor {
            p_world: [p_world.x, p_world.y, p_world.z],
            uv: [uv.x, uv.y],
            camera: cam,
            inv_sigma: 1.0,
        };
        let r = Factor::<f64>::residual_func(&factor, &[iso_to_pose7(&t_world_camera)]);
        assert!(r[0].abs() < 1e-9, "u residual {}", r[0]);
        assert!(r[1].abs() < 1e-9, "v residual {}", r[1]);
    }

    #[test]
    fn resection_residual_scales_with_sigma() {
        let cam = camera();
        let t_world_camera = Iso3::from_parts(
            Translation3::new(0.0, 0.0, 0.8),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        );
        let factor = ResectionFactor {
            p_world: [0.0, 0.0, 0.0],
            uv: [330.0, 240.0],
            camera: cam,
            inv_sigma: 0.5,
        };
        let r = Factor::<f64>::residual_func(&factor, &[iso_to_pose7(&t_world_camera)]);
        let factor_unit = ResectionFactor {
            inv_sigma: 1.0,
            ..factor
        };
        let r_unit = Factor::<f64>::residual_func(&factor_unit, &[iso_to_pose7(&t_world_camera)]);
        assert!((r[0] - 0.5 * r_unit[0]).abs() < 1e-12);
        assert!((r[1] - 0.5 * r_unit[1]).abs() < 1e-12);
    }

    #[test]
    fn prior_residual_vanishes_at_mean() {
        let pose = Iso3::from_parts(
            Translation3::new(0.4, -0.1, 2.0),
            UnitQuaternion::from_euler_angles(0.2, 0.1, -0.3),
        );
        let p7 = iso_to_pose7(&pose);
        let factor = PriorFactor {
            mean: [p7[0], p7[1], p7[2], p7[3], p7[4], p7[5], p7[6]],
            sqrt_info: Matrix6::identity(),
        };
        let r = Factor::<f64>::residual_func(&factor, &[p7]);
        assert!(r.norm() < 1e-12, "residual {}", r.norm());
    }

    #[test]
    fn between_residual_vanishes_at_consistent_poses() {
        let t_map_marker = Iso3::from_parts(
            Translation3::new(0.5, 0.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.4),
        );
        let t_map_camera = Iso3::from_parts(
            Translation3::new(0.1, 0.2, 1.0),
            UnitQuaternion::from_euler_angles(3.0, 0.05, 0.0),
        );
        let measured = t_map_marker.inverse() * t_map_camera;

        let m7 = iso_to_pose7(&measured);
        let factor = BetweenFactor {
            measured: [m7[0], m7[1], m7[2], m7[3], m7[4], m7[5], m7[6]],
            sqrt_info: Matrix6::identity(),
        };
        let r = Factor::<f64>::residual_func(
            &factor,
            &[iso_to_pose7(&t_map_marker), iso_to_pose7(&t_map_camera)],
        );
        assert!(r.norm() < 1e-12, "residual {}", r.norm());
    }

    #[test]
    fn sqrt_information_whitens_to_unit_cost() {
        let cov = Cov6::from_diagonal(&nalgebra::Vector6::new(
            0.04, 0.04, 0.04, 0.01, 0.01, 0.01,
        ));
        let w = sqrt_information(&cov).unwrap();
        // Whitened quadratic form of a one-sigma offset must be 1.
        let r = nalgebra::Vector6::new(0.2, 0.0, 0.0, 0.0, 0.0, 0.0);
        let white = w * r;
        assert!((white.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sqrt_information_rejects_degenerate_covariance() {
        assert!(sqrt_information(&Cov6::zeros()).is_none());
    }
}
