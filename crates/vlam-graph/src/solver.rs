//! The factor-graph solver backend.
//!
//! Mirrors the geometric backend's interface but produces
//! maximum-a-posteriori estimates with marginal covariances, exploiting
//! several simultaneous observations and known-marker priors. The
//! geometric backend supplies initial estimates throughout.

use anyhow::Result;
use log::{debug, warn};
use nalgebra::Matrix6;
use vlam_core::{
    corners_f_map, corners_f_marker, CameraInfo, Cov6, Iso3, Map, MapStyle, Marker, Observation,
    Observations, Pt2, Pt3, Real, TransformWithCovariance,
};
use vlam_geometric::GeometricSolver;

use crate::cov_order::{cov_external_to_internal, cov_internal_to_external};
use crate::factors::{
    isotropic_sqrt_information, sqrt_information, BetweenFactor, PriorFactor, ResectionFactor,
};
use crate::graph::{PoseGraph, SolveOptions};
use crate::se3::iso_to_pose7;

/// The single camera variable.
const CAMERA_KEY: &str = "c0";

/// Marker variables carry the marker id.
fn marker_key(id: i32) -> String {
    format!("m{id}")
}

/// Tuning knobs for the factor-graph backend.
#[derive(Clone, Debug)]
pub struct GraphSolverOptions {
    /// Per-corner measurement standard deviation in pixels.
    pub corner_measurement_sigma: Real,
    /// Isotropic sigma substituted when a between measurement carries a
    /// degenerate (non-positive-definite) covariance.
    pub default_between_sigma: Real,
    pub solve: SolveOptions,
}

impl Default for GraphSolverOptions {
    fn default() -> Self {
        Self {
            corner_measurement_sigma: 1.0,
            default_between_sigma: 1.0e-3,
            solve: SolveOptions::default(),
        }
    }
}

/// Factor-graph pose estimation from marker observations.
#[derive(Clone, Debug)]
pub struct GraphSolver {
    camera: CameraInfo,
    geometric: GeometricSolver,
    options: GraphSolverOptions,
}

impl GraphSolver {
    pub fn new(camera: CameraInfo, corner_measurement_sigma: Real) -> Self {
        Self::with_options(
            camera,
            GraphSolverOptions {
                corner_measurement_sigma,
                ..GraphSolverOptions::default()
            },
        )
    }

    pub fn with_options(camera: CameraInfo, options: GraphSolverOptions) -> Self {
        Self {
            camera,
            geometric: GeometricSolver::new(camera),
            options,
        }
    }

    fn resection_factor(&self, p_world: &Pt3, uv: &Pt2) -> ResectionFactor {
        ResectionFactor {
            p_world: [p_world.x, p_world.y, p_world.z],
            uv: [uv.x, uv.y],
            camera: self.camera,
            inv_sigma: 1.0 / self.options.corner_measurement_sigma,
        }
    }

    /// Four resectioning factors on `key`, one per canonical corner.
    fn add_corner_resections(
        &self,
        graph: &mut PoseGraph,
        key: &str,
        corners_f_world: &[Pt3; 4],
        observation: &Observation,
    ) {
        for (p, uv) in corners_f_world
            .iter()
            .zip(observation.corners_f_image().iter())
        {
            graph.add_resection_factor(key, self.resection_factor(p, uv));
        }
    }

    /// Whitener for a between measurement with external-order covariance.
    fn between_sqrt_info(&self, cov_external: &Cov6) -> Matrix6<f64> {
        let internal = cov_external_to_internal(cov_external);
        sqrt_information(&internal).unwrap_or_else(|| {
            isotropic_sqrt_information(self.options.default_between_sigma)
        })
    }

    fn pose7(iso: &Iso3) -> [f64; 7] {
        let v = iso_to_pose7(iso);
        [v[0], v[1], v[2], v[3], v[4], v[5], v[6]]
    }

    /// The camera pose in a single marker's frame, with marginal
    /// covariance.
    pub fn solve_camera_f_marker(
        &self,
        observation: &Observation,
        marker_length: Real,
    ) -> TransformWithCovariance {
        match self.try_solve_camera_f_marker(observation, marker_length) {
            Ok(twc) => twc,
            Err(err) => {
                debug!(
                    "camera_f_marker solve failed for id {}: {err:#}",
                    observation.id()
                );
                TransformWithCovariance::Invalid
            }
        }
    }

    fn try_solve_camera_f_marker(
        &self,
        observation: &Observation,
        marker_length: Real,
    ) -> Result<TransformWithCovariance> {
        let t_camera_marker = self
            .geometric
            .solve_t_camera_marker(observation, marker_length);
        let Some(t_camera_marker) = t_camera_marker.transform() else {
            return Ok(TransformWithCovariance::Invalid);
        };

        let mut graph = PoseGraph::new();
        self.add_corner_resections(
            &mut graph,
            CAMERA_KEY,
            &corners_f_marker(marker_length),
            observation,
        );
        graph.set_initial(CAMERA_KEY, &t_camera_marker.inverse());

        let solution = graph.optimize(&self.options.solve)?;
        self.extract(&solution, CAMERA_KEY)
    }

    /// The camera pose in the map frame with marginal covariance; invalid
    /// when no visible marker is known.
    pub fn solve_t_map_camera(
        &self,
        observations: &Observations,
        map: &Map,
    ) -> TransformWithCovariance {
        let initial = self.geometric.solve_t_map_camera(observations, map);
        let Some(t_map_camera) = initial.transform() else {
            return TransformWithCovariance::Invalid;
        };

        match self.try_solve_t_map_camera(t_map_camera, observations, map) {
            Ok(twc) => twc,
            Err(err) => {
                warn!("map camera solve failed: {err:#}");
                TransformWithCovariance::Invalid
            }
        }
    }

    fn try_solve_t_map_camera(
        &self,
        t_map_camera: &Iso3,
        observations: &Observations,
        map: &Map,
    ) -> Result<TransformWithCovariance> {
        let t_map_markers = map.find_t_map_markers(observations);

        let mut graph = PoseGraph::new();
        for (observation, t_map_marker) in observations.iter().zip(t_map_markers.iter()) {
            if let Some(t) = t_map_marker.transform() {
                self.add_corner_resections(
                    &mut graph,
                    CAMERA_KEY,
                    &corners_f_map(t, map.marker_length()),
                    observation,
                );
            }
        }
        graph.set_initial(CAMERA_KEY, t_map_camera);

        let solution = graph.optimize(&self.options.solve)?;
        self.extract(&solution, CAMERA_KEY)
    }

    /// Jointly refine all observed marker poses against the map.
    ///
    /// No-op unless the camera pose is valid, at least two markers are
    /// observed, and at least one of them is already known (a graph with
    /// no known marker has no anchor). Map writes happen only after the
    /// whole batch optimized.
    pub fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        observations: &Observations,
        map: &mut Map,
    ) {
        let Some(t_map_camera) = t_map_camera.transform() else {
            return;
        };
        if observations.len() < 2 {
            return;
        }
        if !observations
            .iter()
            .any(|obs| map.find_marker(obs.id()).is_some())
        {
            debug!("update_map skipped: no known marker in sight");
            return;
        }

        if let Err(err) = self.try_update_map(t_map_camera, observations, map) {
            warn!("map update failed: {err:#}");
        }
    }

    fn try_update_map(
        &self,
        t_map_camera: &Iso3,
        observations: &Observations,
        map: &mut Map,
    ) -> Result<()> {
        let mut graph = PoseGraph::new();
        let solved_markers = self.load_update_graph(t_map_camera, observations, map, &mut graph);

        let solution = graph.optimize(&self.options.solve)?;

        let keys: Vec<&str> = solved_markers.iter().map(|(_, k)| k.as_str()).collect();
        let covariances = solution.marginal_covariances(&keys)?;

        for (id, key) in &solved_markers {
            let pose = solution.pose(key)?;
            let cov_internal = covariances
                .get(key)
                .copied()
                .unwrap_or_else(Cov6::zeros);
            let t_map_marker =
                TransformWithCovariance::from_iso_cov(pose, cov_internal_to_external(&cov_internal));

            match map.find_marker_mut(*id) {
                None => {
                    // A new marker observed alongside a known one.
                    map.add_marker(Marker::new(*id, t_map_marker))?;
                }
                Some(marker) => marker.apply_update(t_map_marker),
            }
        }
        Ok(())
    }

    /// Build the joint graph: a between measurement per observation, a
    /// prior (or pinned variable) per known marker, seeded initial values
    /// for unknown ones. Returns the `(id, key)` pairs that entered the
    /// graph.
    fn load_update_graph(
        &self,
        t_map_camera: &Iso3,
        observations: &Observations,
        map: &Map,
        graph: &mut PoseGraph,
    ) -> Vec<(i32, String)> {
        let mut solved = Vec::new();

        for observation in observations {
            let key = marker_key(observation.id());

            let known = map.find_marker(observation.id());
            if let Some(marker) = known {
                if !marker.t_map_marker().is_valid() {
                    continue;
                }
            }

            let camera_f_marker =
                self.solve_camera_f_marker(observation, map.marker_length());
            let (Some(t_marker_camera), Some(cov)) = (
                camera_f_marker.transform(),
                camera_f_marker.covariance(),
            ) else {
                debug!(
                    "skipping observation of id {}: no between measurement",
                    observation.id()
                );
                continue;
            };

            graph.add_between_factor(
                &key,
                CAMERA_KEY,
                BetweenFactor {
                    measured: Self::pose7(t_marker_camera),
                    sqrt_info: self.between_sqrt_info(cov),
                },
            );

            match known {
                Some(marker) => {
                    let Some(t_map_marker) = marker.t_map_marker().transform() else {
                        continue;
                    };
                    graph.set_initial(&key, t_map_marker);

                    let stored_cov = marker
                        .t_map_marker()
                        .covariance()
                        .copied()
                        .unwrap_or_else(Cov6::zeros);

                    // The marker pose is exact when it is fixed, when the
                    // map carries no covariances, or when the stored
                    // variance uses the zero sentinel.
                    let exactly_known = marker.is_fixed()
                        || map.map_style() == MapStyle::Pose
                        || stored_cov[(0, 0)] == 0.0;
                    if exactly_known {
                        graph.fix_variable(&key);
                    } else {
                        let internal = cov_external_to_internal(&stored_cov);
                        let sqrt_info = sqrt_information(&internal).unwrap_or_else(|| {
                            isotropic_sqrt_information(self.options.default_between_sigma)
                        });
                        graph.add_prior_factor(
                            &key,
                            PriorFactor {
                                mean: Self::pose7(t_map_marker),
                                sqrt_info,
                            },
                        );
                    }
                }
                None => {
                    // Seed an unknown marker from the camera pose and the
                    // between measurement.
                    let t_map_marker = t_map_camera * t_marker_camera.inverse();
                    graph.set_initial(&key, &t_map_marker);
                }
            }

            solved.push((observation.id(), key));
        }

        graph.set_initial(CAMERA_KEY, t_map_camera);
        solved
    }

    fn extract(
        &self,
        solution: &crate::graph::GraphSolution<'_>,
        key: &str,
    ) -> Result<TransformWithCovariance> {
        let pose = solution.pose(key)?;
        let cov_internal = solution
            .marginal_covariances(&[key])?
            .remove(key)
            .unwrap_or_else(Cov6::zeros);
        Ok(TransformWithCovariance::from_iso_cov(
            pose,
            cov_internal_to_external(&cov_internal),
        ))
    }
}
