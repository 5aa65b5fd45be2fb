//! The geometric solver backend.
//!
//! Pairs marker corner geometry with undistorted image corners and hands
//! the correspondences to the iterative PnP machinery. Failures never
//! surface as errors: entry points return the invalid transform variant.

use log::debug;
use vlam_core::{
    corners_f_map, corners_f_marker, CameraInfo, Map, Observation, Observations, Pt3, Real,
    TransformWithCovariance, Vec2, Vec3,
};

use crate::pnp::{rotation_vector, solve_pnp};
use crate::ransac_pnp::{default_ransac_options, solve_pnp_ransac};

/// Rotation-vector disagreement (radians, per component) above which the
/// RANSAC solution replaces the iterative one.
const MIRROR_ROTATION_TOL: Real = 0.5;

/// The ambiguity-prone corner-count band: two or three known markers.
/// With one marker the planar solve is already as good as it gets, and
/// with four or more the iterative solve is well conditioned.
pub(crate) fn mirror_guard_band(n_corners: usize) -> bool {
    n_corners > 4 && n_corners < 16
}

/// Whether two solutions disagree strongly enough to indicate a mirror
/// pose: any rotation-vector component differing by more than 0.5 rad.
pub(crate) fn rotation_vectors_disagree(a: &Vec3, b: &Vec3) -> bool {
    (a.x - b.x).abs() > MIRROR_ROTATION_TOL
        || (a.y - b.y).abs() > MIRROR_ROTATION_TOL
        || (a.z - b.z).abs() > MIRROR_ROTATION_TOL
}

/// Closed-form pose estimation from marker observations.
#[derive(Clone, Debug)]
pub struct GeometricSolver {
    camera: CameraInfo,
}

impl GeometricSolver {
    pub fn new(camera: CameraInfo) -> Self {
        Self { camera }
    }

    pub fn camera(&self) -> &CameraInfo {
        &self.camera
    }

    /// Undistorted normalized coordinates of an observation's corners.
    fn corners_f_image_normalized(&self, observation: &Observation) -> Vec<Vec2> {
        observation
            .corners_f_image()
            .iter()
            .map(|p| self.camera.undistort_corner(*p))
            .collect()
    }

    /// The transform mapping marker-frame points into the camera frame,
    /// from a single observation. Covariance is zero; the factor-graph
    /// backend supplies uncertainty when it is needed.
    pub fn solve_t_camera_marker(
        &self,
        observation: &Observation,
        marker_length: Real,
    ) -> TransformWithCovariance {
        let world = corners_f_marker(marker_length);
        let image = self.corners_f_image_normalized(observation);

        match solve_pnp(&world, &image) {
            Ok(t) => TransformWithCovariance::from_iso(t),
            Err(err) => {
                debug!("t_camera_marker solve failed for id {}: {err}", observation.id());
                TransformWithCovariance::Invalid
            }
        }
    }

    /// The camera pose in the map frame from every observation whose marker
    /// is known. Invalid when no visible marker is in the map.
    pub fn solve_t_map_camera(
        &self,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        let t_map_markers = map.find_t_map_markers(observations);

        let mut all_corners_f_map: Vec<Pt3> = Vec::new();
        let mut all_corners_f_image: Vec<Vec2> = Vec::new();
        for (observation, t_map_marker) in observations.iter().zip(t_map_markers.iter()) {
            if let Some(t) = t_map_marker.transform() {
                all_corners_f_map.extend(corners_f_map(t, map.marker_length()));
                all_corners_f_image.extend(self.corners_f_image_normalized(observation));
            }
        }

        // No known markers in this batch: nothing to localize against.
        if all_corners_f_map.is_empty() {
            return TransformWithCovariance::Invalid;
        }

        let mut t_camera_map = match solve_pnp(&all_corners_f_map, &all_corners_f_image) {
            Ok(t) => t,
            Err(err) => {
                debug!("t_map_camera solve failed: {err}");
                return TransformWithCovariance::Invalid;
            }
        };

        // With two or three markers the iterative solve can return the
        // mirror of the correct pose. A RANSAC solve disambiguates better
        // (though it smooths noise worse, so it only replaces the primary
        // solution when the two disagree).
        if mirror_guard_band(all_corners_f_image.len()) {
            if let Ok(t_ransac) = solve_pnp_ransac(
                &all_corners_f_map,
                &all_corners_f_image,
                &default_ransac_options(),
            ) {
                let rv = rotation_vector(&t_camera_map);
                let rv_ransac = rotation_vector(&t_ransac);
                if rotation_vectors_disagree(&rv, &rv_ransac) {
                    debug!(
                        "mirror guard replaced iterative solution (rvec {:?} vs {:?})",
                        rv, rv_ransac
                    );
                    t_camera_map = t_ransac;
                }
            }
        }

        TransformWithCovariance::from_iso(t_camera_map.inverse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use vlam_core::{Intrinsics, Distortion5, Iso3, Map, MapStyle, Marker, Pt2};

    fn camera() -> CameraInfo {
        CameraInfo::new(
            Intrinsics {
                fx: 600.0,
                fy: 600.0,
                cx: 320.0,
                cy: 240.0,
            },
            Distortion5::default(),
        )
    }

    /// Camera at `position` looking along map -Z (markers face +Z).
    fn downward_camera(position: Vec3) -> Iso3 {
        Iso3::from_parts(
            Translation3::from(position),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        )
    }

    fn observe(cam: &CameraInfo, t_camera_map: &Iso3, t_map_marker: &Iso3, id: i32) -> Observation {
        let corners = corners_f_map(t_map_marker, 0.1);
        let mut pixels = [Pt2::origin(); 4];
        for (i, c) in corners.iter().enumerate() {
            pixels[i] = cam.project(&t_camera_map.transform_point(c)).unwrap();
        }
        Observation::new(id, pixels)
    }

    #[test]
    fn single_marker_camera_pose_roundtrip() {
        let cam = camera();
        let t_map_camera = downward_camera(Vec3::new(0.0, 0.0, 1.0));
        let t_camera_map = t_map_camera.inverse();

        let obs = observe(&cam, &t_camera_map, &Iso3::identity(), 0);
        let solver = GeometricSolver::new(cam);
        let solved = solver.solve_t_camera_marker(&obs, 0.1);

        // Marker frame == map frame here, so this is t_camera_map.
        let t = solved.transform().unwrap();
        assert!((t.translation.vector - t_camera_map.translation.vector).norm() < 1e-4);
        assert!(t.rotation.angle_to(&t_camera_map.rotation) < 1e-4);
        assert_eq!(solved.covariance().unwrap(), &vlam_core::Cov6::zeros());
    }

    #[test]
    fn two_marker_localization() {
        let cam = camera();
        let t_map_camera = downward_camera(Vec3::new(0.1, 0.0, 1.0));
        let t_camera_map = t_map_camera.inverse();

        let marker0 = Iso3::identity();
        let marker1 = Iso3::from_parts(
            Translation3::new(0.2, 0.0, 0.0),
            UnitQuaternion::identity(),
        );

        let mut map = Map::new(MapStyle::Pose, 0.1);
        map.add_marker(Marker::new_fixed(0, TransformWithCovariance::from_iso(marker0)))
            .unwrap();
        map.add_marker(Marker::new_fixed(1, TransformWithCovariance::from_iso(marker1)))
            .unwrap();

        let observations = Observations::from(vec![
            observe(&cam, &t_camera_map, &marker0, 0),
            observe(&cam, &t_camera_map, &marker1, 1),
        ]);

        let solver = GeometricSolver::new(cam);
        let solved = solver.solve_t_map_camera(&observations, &map);

        let mu = solved.mu().unwrap();
        assert!((mu[0] - 0.1).abs() < 1e-3, "x = {}", mu[0]);
        assert!(mu[1].abs() < 1e-3, "y = {}", mu[1]);
        assert!((mu[2] - 1.0).abs() < 1e-3, "z = {}", mu[2]);
        assert!(mu[5].abs() < 1e-3, "yaw = {}", mu[5]);
    }

    #[test]
    fn unknown_markers_short_circuit() {
        let cam = camera();
        let map = Map::new(MapStyle::Pose, 0.1);
        let t_camera_map = downward_camera(Vec3::new(0.0, 0.0, 1.0)).inverse();
        let observations =
            Observations::from(vec![observe(&cam, &t_camera_map, &Iso3::identity(), 42)]);

        let solver = GeometricSolver::new(cam);
        assert!(!solver.solve_t_map_camera(&observations, &map).is_valid());
    }

    #[test]
    fn mirror_band_covers_two_and_three_markers() {
        assert!(!mirror_guard_band(4));
        assert!(mirror_guard_band(8));
        assert!(mirror_guard_band(12));
        assert!(!mirror_guard_band(16));
    }

    #[test]
    fn rotation_disagreement_threshold() {
        let a = Vec3::new(0.1, 0.0, 0.0);
        assert!(!rotation_vectors_disagree(&a, &Vec3::new(0.5, 0.0, 0.0)));
        assert!(rotation_vectors_disagree(&a, &Vec3::new(0.75, 0.0, 0.0)));
        assert!(rotation_vectors_disagree(&a, &Vec3::new(0.1, 0.0, -0.6)));
    }
}
