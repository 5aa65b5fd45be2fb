//! Iterative perspective-n-point on undistorted normalized coordinates.
//!
//! [`solve_pnp`] estimates `T_C_W` (world to camera) from 3D points and
//! their normalized image projections. Initialization is planarity-aware:
//! marker corners are coplanar within a marker and frequently across
//! markers, where a plain DLT degenerates. Near-planar sets are initialized
//! by homography decomposition, general sets by a normalized DLT; both are
//! refined by a damped Gauss-Newton pass on the reprojection residual.

use anyhow::{anyhow, ensure, Result};
use nalgebra::{DMatrix, DVector, Matrix3x4, Rotation3, Translation3, UnitQuaternion, Vector6};
use thiserror::Error;
use vlam_core::{Iso3, Mat3, Pt3, Real, Vec2, Vec3};

/// Depth guard added to Z before the perspective divide.
const PROJECTION_EPS: Real = 1.0e-9;

/// Ratio of spatial extents below which a point set is treated as planar.
const PLANARITY_RATIO: Real = 0.05;

/// Maximum damped Gauss-Newton iterations.
const MAX_REFINE_ITERS: usize = 30;

/// Errors from the PnP machinery.
///
/// These stay internal to the geometric backend; the solver entry points
/// convert them into the invalid transform variant.
#[derive(Debug, Error)]
pub enum PnpError {
    #[error("need at least 4 point correspondences, got {0}")]
    NotEnoughPoints(usize),
    #[error("world/image correspondence counts differ: {0} vs {1}")]
    CountMismatch(usize, usize),
    #[error("degenerate point configuration")]
    Degenerate,
    #[error("linear solve failed")]
    LinearSolveFailed,
    #[error("refinement diverged")]
    RefinementDiverged,
}

/// Estimate `T_C_W` from world points and normalized image points.
pub fn solve_pnp(world: &[Pt3], image: &[Vec2]) -> Result<Iso3> {
    ensure!(world.len() >= 4, PnpError::NotEnoughPoints(world.len()));
    ensure!(
        world.len() == image.len(),
        PnpError::CountMismatch(world.len(), image.len())
    );

    let initial = initial_pose(world, image)?;
    refine_pose(initial, world, image)
}

/// The axis-angle rotation vector of a pose.
pub fn rotation_vector(pose: &Iso3) -> Vec3 {
    pose.rotation.scaled_axis()
}

/// Reprojection residuals `(x/z - u, y/z - v)` stacked into `out`; returns
/// the total squared error.
fn reprojection_residuals(
    pose: &Iso3,
    world: &[Pt3],
    image: &[Vec2],
    out: &mut DVector<Real>,
) -> Real {
    for (i, (pw, uv)) in world.iter().zip(image.iter()).enumerate() {
        let pc = pose.transform_point(pw);
        let z = pc.z + PROJECTION_EPS;
        out[2 * i] = pc.x / z - uv.x;
        out[2 * i + 1] = pc.y / z - uv.y;
    }
    out.norm_squared()
}

/// Right-multiplicative retraction `pose * Exp([w, t])`.
fn retract(pose: &Iso3, delta: &Vector6<Real>) -> Iso3 {
    let dq = UnitQuaternion::from_scaled_axis(Vec3::new(delta[0], delta[1], delta[2]));
    let dt = Translation3::new(delta[3], delta[4], delta[5]);
    pose * Iso3::from_parts(dt, dq)
}

/// Damped Gauss-Newton refinement of the reprojection error.
fn refine_pose(initial: Iso3, world: &[Pt3], image: &[Vec2]) -> Result<Iso3> {
    let m = 2 * world.len();
    let mut pose = initial;
    let mut residuals = DVector::<Real>::zeros(m);
    let mut perturbed = DVector::<Real>::zeros(m);
    let mut jacobian = DMatrix::<Real>::zeros(m, 6);

    let mut cost = reprojection_residuals(&pose, world, image, &mut residuals);
    let mut lambda = 1.0e-3;
    const STEP: Real = 1.0e-6;

    for _ in 0..MAX_REFINE_ITERS {
        // Central-difference Jacobian in the SE(3) tangent.
        for col in 0..6 {
            let mut delta = Vector6::zeros();
            delta[col] = STEP;
            reprojection_residuals(&retract(&pose, &delta), world, image, &mut perturbed);
            let forward = perturbed.clone();
            delta[col] = -STEP;
            reprojection_residuals(&retract(&pose, &delta), world, image, &mut perturbed);
            for row in 0..m {
                jacobian[(row, col)] = (forward[row] - perturbed[row]) / (2.0 * STEP);
            }
        }

        let jtj = jacobian.transpose() * &jacobian;
        let jtr = jacobian.transpose() * &residuals;

        let mut stepped = false;
        for _ in 0..6 {
            let mut damped = jtj.clone();
            for i in 0..6 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1.0e-12);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = -(chol.solve(&jtr));
            let candidate = retract(&pose, &Vector6::from_iterator(delta.iter().copied()));
            let candidate_cost =
                reprojection_residuals(&candidate, world, image, &mut perturbed);
            if candidate_cost < cost {
                pose = candidate;
                cost = candidate_cost;
                residuals.copy_from(&perturbed);
                lambda = (lambda / 3.0).max(1.0e-12);
                stepped = true;
                if delta.norm() < 1.0e-12 {
                    return Ok(pose);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !stepped {
            break;
        }
        if cost < 1.0e-24 {
            break;
        }
    }

    ensure!(cost.is_finite(), PnpError::RefinementDiverged);
    Ok(pose)
}

/// Choose and run an initializer according to the spatial shape of the
/// point set.
fn initial_pose(world: &[Pt3], image: &[Vec2]) -> Result<Iso3> {
    let (centroid, axes, extents) = principal_axes(world)?;

    let spread = extents[0].max(1.0e-12);
    if extents[2] / spread < PLANARITY_RATIO {
        return planar_pose(world, image, &centroid, &axes);
    }

    ensure!(world.len() >= 6, PnpError::Degenerate);
    dlt(world, image)
}

/// Centroid, principal axes (columns, descending extent), and per-axis
/// RMS extents of a 3D point set.
fn principal_axes(world: &[Pt3]) -> Result<(Pt3, Mat3, Vec3)> {
    let n = world.len() as Real;
    let centroid = Pt3::from(
        world
            .iter()
            .fold(Vec3::zeros(), |acc, p| acc + p.coords)
            / n,
    );

    let mut scatter = Mat3::zeros();
    for p in world {
        let d = p - centroid;
        scatter += d * d.transpose();
    }
    scatter /= n;

    let eig = scatter.symmetric_eigen();
    // Sort axes by descending eigenvalue.
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut axes = Mat3::zeros();
    let mut extents = Vec3::zeros();
    for (col, &idx) in order.iter().enumerate() {
        axes.set_column(col, &eig.eigenvectors.column(idx).into_owned());
        extents[col] = eig.eigenvalues[idx].max(0.0).sqrt();
    }
    if axes.determinant() < 0.0 {
        let flipped = -axes.column(2).into_owned();
        axes.set_column(2, &flipped);
    }

    Ok((centroid, axes, extents))
}

/// Pose initialization for a planar point set via homography decomposition.
///
/// The points are expressed in a plane frame derived from their principal
/// axes; the homography maps plane coordinates to normalized image
/// coordinates, and its decomposition gives `T_C_plane` which is chained
/// back into `T_C_W`.
fn planar_pose(world: &[Pt3], image: &[Vec2], centroid: &Pt3, axes: &Mat3) -> Result<Iso3> {
    let t_world_plane = Iso3::from_parts(
        Translation3::from(centroid.coords),
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*axes)),
    );
    let t_plane_world = t_world_plane.inverse();

    let plane_pts: Vec<Vec2> = world
        .iter()
        .map(|p| {
            let q = t_plane_world.transform_point(p);
            Vec2::new(q.x, q.y)
        })
        .collect();

    let h = homography(&plane_pts, image)?;
    let mut t_cam_plane = decompose_planar_homography(&h);

    // The homography sign is arbitrary; pick the solution that puts the
    // points in front of the camera.
    let mean_depth: Real = plane_pts
        .iter()
        .map(|p| {
            t_cam_plane
                .transform_point(&Pt3::new(p.x, p.y, 0.0))
                .z
        })
        .sum::<Real>()
        / plane_pts.len() as Real;
    if mean_depth < 0.0 {
        let h_neg = -h;
        t_cam_plane = decompose_planar_homography(&h_neg);
    }

    Ok(t_cam_plane * t_plane_world)
}

/// DLT homography `image ~ H * plane` from 2D correspondences.
fn homography(plane: &[Vec2], image: &[Vec2]) -> Result<Mat3> {
    let n = plane.len();
    ensure!(n >= 4, PnpError::NotEnoughPoints(n));

    let mut a = DMatrix::<Real>::zeros(2 * n, 9);
    for (i, (pw, pi)) in plane.iter().zip(image.iter()).enumerate() {
        let (x, y) = (pw.x, pw.y);
        let (u, v) = (pi.x, pi.y);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| anyhow!(PnpError::LinearSolveFailed))?;
    let h = v_t.row(v_t.nrows() - 1);

    let mut h_mat = Mat3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            h_mat[(r, c)] = h[3 * r + c];
        }
    }
    Ok(h_mat)
}

/// Decompose a plane-to-normalized-image homography into `T_C_plane`,
/// assuming the plane is `Z = 0` in its own frame.
fn decompose_planar_homography(h: &Mat3) -> Iso3 {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let lambda = 2.0 / (h1.norm() + h2.norm()).max(1.0e-12);
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);

    let mut r_mat = Mat3::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    let rot = orthogonalize(&r_mat);
    let t = Translation3::from(h3 * lambda);
    Iso3::from_parts(t, UnitQuaternion::from_rotation_matrix(&rot))
}

/// Project a near-rotation onto SO(3) via SVD.
fn orthogonalize(m: &Mat3) -> Rotation3<Real> {
    let svd = m.svd(true, true);
    let u = svd.u.expect("3x3 svd");
    let v_t = svd.v_t.expect("3x3 svd");
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }
    Rotation3::from_matrix_unchecked(r)
}

/// Normalized DLT for a general (non-planar) point set, >= 6 points.
fn dlt(world: &[Pt3], image: &[Vec2]) -> Result<Iso3> {
    let n = world.len();
    ensure!(n >= 6, PnpError::NotEnoughPoints(n));

    // Normalize the 3D points: zero centroid, sqrt(3) mean distance.
    let n_real = n as Real;
    let centroid = world
        .iter()
        .fold(Vec3::zeros(), |acc, p| acc + p.coords)
        / n_real;
    let mean_dist = world
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<Real>()
        / n_real;
    ensure!(mean_dist > Real::EPSILON, PnpError::Degenerate);
    let scale = (3.0_f64).sqrt() / mean_dist;

    let mut a = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
        let x = (pw.x - centroid.x) * scale;
        let y = (pw.y - centroid.y) * scale;
        let z = (pw.z - centroid.z) * scale;
        let (u, v) = (pi.x, pi.y);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| anyhow!(PnpError::LinearSolveFailed))?;
    let p_row = v_t.row(v_t.nrows() - 1);

    let mut p_mtx = Matrix3x4::<Real>::zeros();
    for r in 0..3 {
        for c in 0..4 {
            p_mtx[(r, c)] = p_row[4 * r + c];
        }
    }

    // Undo the 3D normalization: P <- P_norm * T_world.
    let mut t_world = nalgebra::Matrix4::<Real>::identity() * scale;
    t_world[(0, 3)] = -scale * centroid.x;
    t_world[(1, 3)] = -scale * centroid.y;
    t_world[(2, 3)] = -scale * centroid.z;
    t_world[(3, 3)] = 1.0;
    let p_mtx = p_mtx * t_world;

    let m = p_mtx.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if m.determinant() < 0.0 {
        s = -s;
    }
    ensure!(s.abs() > Real::EPSILON, PnpError::Degenerate);

    let rot = orthogonalize(&(m / s));
    let t = Translation3::from(p_mtx.column(3).into_owned() / s);
    Ok(Iso3::from_parts(t, rot.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Translation3;

    fn project(pose: &Iso3, world: &[Pt3]) -> Vec<Vec2> {
        world
            .iter()
            .map(|p| {
                let pc = pose.transform_point(p);
                Vec2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect()
    }

    fn pose_error(a: &Iso3, b: &Iso3) -> (Real, Real) {
        let dt = (a.translation.vector - b.translation.vector).norm();
        let ang = a.rotation.angle_to(&b.rotation);
        (dt, ang)
    }

    fn marker_square(side: Real) -> Vec<Pt3> {
        let h = side / 2.0;
        vec![
            Pt3::new(-h, h, 0.0),
            Pt3::new(h, h, 0.0),
            Pt3::new(h, -h, 0.0),
            Pt3::new(-h, -h, 0.0),
        ]
    }

    #[test]
    fn planar_four_point_roundtrip() {
        let world = marker_square(0.1);
        let gt = Iso3::from_parts(
            Translation3::new(0.02, -0.01, 0.9),
            UnitQuaternion::from_euler_angles(3.05, 0.1, -0.05),
        );
        let image = project(&gt, &world);

        let est = solve_pnp(&world, &image).unwrap();
        let (dt, ang) = pose_error(&est, &gt);
        assert!(dt < 1e-6, "translation error {}", dt);
        assert!(ang < 1e-6, "rotation error {}", ang);
    }

    #[test]
    fn general_point_set_roundtrip() {
        let mut world = Vec::new();
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..3 {
                    world.push(Pt3::new(
                        x as Real * 0.1,
                        y as Real * 0.1,
                        z as Real * 0.15,
                    ));
                }
            }
        }
        let gt = Iso3::from_parts(
            Translation3::new(0.1, -0.05, 1.2),
            UnitQuaternion::from_euler_angles(0.1, -0.08, 0.2),
        );
        let image = project(&gt, &world);

        let est = solve_pnp(&world, &image).unwrap();
        let (dt, ang) = pose_error(&est, &gt);
        assert!(dt < 1e-6, "translation error {}", dt);
        assert!(ang < 1e-6, "rotation error {}", ang);
    }

    #[test]
    fn coplanar_multi_marker_roundtrip() {
        // Two markers on the same plane: DLT would degenerate, the planar
        // path must take over.
        let mut world = marker_square(0.1);
        world.extend(marker_square(0.1).iter().map(|p| Pt3::new(p.x + 0.3, p.y, p.z)));

        let gt = Iso3::from_parts(
            Translation3::new(-0.1, 0.05, 1.5),
            UnitQuaternion::from_euler_angles(3.1, -0.04, 0.12),
        );
        let image = project(&gt, &world);

        let est = solve_pnp(&world, &image).unwrap();
        let (dt, ang) = pose_error(&est, &gt);
        assert!(dt < 1e-6, "translation error {}", dt);
        assert!(ang < 1e-6, "rotation error {}", ang);
    }

    #[test]
    fn rejects_count_mismatch() {
        let world = marker_square(0.1);
        let image = vec![Vec2::zeros(); 3];
        assert!(solve_pnp(&world, &image).is_err());
    }

    #[test]
    fn rejects_too_few_points() {
        let world = vec![Pt3::origin(); 3];
        let image = vec![Vec2::zeros(); 3];
        assert!(solve_pnp(&world, &image).is_err());
    }
}
