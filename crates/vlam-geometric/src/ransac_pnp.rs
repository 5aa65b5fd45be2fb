//! PnP wrapped in the generic RANSAC engine.
//!
//! Used by the geometric backend's mirror-solution guard: the consensus
//! scoring rejects mirror poses that the plain iterative solve can fall
//! into when only a couple of markers are visible.

use anyhow::{anyhow, Result};
use vlam_core::{ransac, Estimator, Iso3, Pt3, RansacOptions, Real, Vec2};

use crate::pnp::solve_pnp;

/// One world/normalized-image correspondence.
type Correspondence = (Pt3, Vec2);

struct PnpEstimator;

impl Estimator for PnpEstimator {
    type Datum = Correspondence;
    type Model = Iso3;

    // Six samples let the planarity-aware initializer work on both coplanar
    // and general subsets.
    const MIN_SAMPLES: usize = 6;

    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model> {
        let world: Vec<Pt3> = sample.iter().map(|&i| data[i].0).collect();
        let image: Vec<Vec2> = sample.iter().map(|&i| data[i].1).collect();
        solve_pnp(&world, &image).ok()
    }

    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64 {
        let (pw, uv) = datum;
        let pc = model.transform_point(pw);
        if pc.z <= 0.0 {
            return f64::INFINITY;
        }
        let du = pc.x / pc.z - uv.x;
        let dv = pc.y / pc.z - uv.y;
        (du * du + dv * dv).sqrt()
    }

    fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<Self::Model> {
        Self::fit(data, inliers)
    }
}

/// Default options for the robust solve: the threshold is in normalized
/// coordinates (about 3 px at a 600 px focal length).
pub fn default_ransac_options() -> RansacOptions {
    RansacOptions {
        max_iters: 100,
        thresh: 5.0e-3,
        min_inliers: PnpEstimator::MIN_SAMPLES,
        confidence: 0.99,
        seed: 709,
        refit_on_inliers: true,
    }
}

/// Robust `T_C_W` estimate from world points and normalized image points.
pub fn solve_pnp_ransac(world: &[Pt3], image: &[Vec2], opts: &RansacOptions) -> Result<Iso3> {
    let data: Vec<Correspondence> = world
        .iter()
        .copied()
        .zip(image.iter().copied())
        .collect();
    ransac::<PnpEstimator>(&data, opts)
        .model
        .ok_or_else(|| anyhow!("ransac found no consensus pose"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn consensus_matches_clean_data() {
        let mut world = Vec::new();
        for my in 0..2 {
            for (x, y) in [(-0.05, 0.05), (0.05, 0.05), (0.05, -0.05), (-0.05, -0.05)] {
                world.push(Pt3::new(x + 0.3 * my as Real, y, 0.1 * my as Real));
            }
        }
        let gt = Iso3::from_parts(
            Translation3::new(0.05, 0.0, 1.0),
            UnitQuaternion::from_euler_angles(3.1, 0.02, 0.05),
        );
        let image: Vec<Vec2> = world
            .iter()
            .map(|p| {
                let pc = gt.transform_point(p);
                Vec2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();

        let est = solve_pnp_ransac(&world, &image, &default_ransac_options()).unwrap();
        assert!((est.translation.vector - gt.translation.vector).norm() < 1e-6);
        assert!(est.rotation.angle_to(&gt.rotation) < 1e-6);
    }
}
