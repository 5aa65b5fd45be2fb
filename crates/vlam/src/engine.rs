//! Capability traits and the core driver.
//!
//! Both backends expose the same two capabilities: [`Localize`] (camera
//! pose from one observation batch) and [`UpdateMap`] (fold the batch back
//! into the map). The [`Engine`] holds one of each and dispatches on a
//! configuration flag, and owns the per-batch policy: deferred map
//! initialization, the two-observation minimum, and the valid-pose gate
//! ahead of map updates.

use log::warn;
use vlam_core::{
    CameraInfo, Map, Marker, Observations, Real, TransformWithCovariance,
};
use vlam_geometric::GeometricSolver;
use vlam_graph::GraphSolver;

use crate::config::EngineConfig;
use crate::map_init;

/// Estimate the camera pose in the map frame from one observation batch.
pub trait Localize {
    fn localize(&self, observations: &Observations, map: &Map) -> TransformWithCovariance;
}

/// Fold one observation batch into the map at a known camera pose.
///
/// Implementations never mutate fixed markers and never insert a marker
/// from a batch with no known anchor; an invalid camera pose is a no-op.
pub trait UpdateMap {
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        observations: &Observations,
        map: &mut Map,
    );
}

impl Localize for GeometricSolver {
    fn localize(&self, observations: &Observations, map: &Map) -> TransformWithCovariance {
        self.solve_t_map_camera(observations, map)
    }
}

impl UpdateMap for GeometricSolver {
    /// Per observation: `t_map_marker = t_map_camera * t_camera_marker`,
    /// folded into an existing marker by simple averaging or inserted as a
    /// new one.
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        observations: &Observations,
        map: &mut Map,
    ) {
        let Some(t_map_camera) = t_map_camera.transform() else {
            return;
        };

        for observation in observations {
            let t_camera_marker = self.solve_t_camera_marker(observation, map.marker_length());
            let Some(t_camera_marker) = t_camera_marker.transform() else {
                continue;
            };
            let t_map_marker =
                TransformWithCovariance::from_iso(t_map_camera * t_camera_marker);

            match map.find_marker_mut(observation.id()) {
                Some(marker) => marker.update_simple_average(&t_map_marker),
                None => {
                    if let Err(err) = map.add_marker(Marker::new(observation.id(), t_map_marker)) {
                        warn!("failed to insert marker {}: {err}", observation.id());
                    }
                }
            }
        }
    }
}

impl Localize for GraphSolver {
    fn localize(&self, observations: &Observations, map: &Map) -> TransformWithCovariance {
        self.solve_t_map_camera(observations, map)
    }
}

impl UpdateMap for GraphSolver {
    fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        observations: &Observations,
        map: &mut Map,
    ) {
        GraphSolver::update_map(self, t_map_camera, observations, map);
    }
}

/// The core driver: one backend of each kind, dispatched by configuration.
pub struct Engine {
    geometric: GeometricSolver,
    graph: GraphSolver,
    config: EngineConfig,
}

impl Engine {
    pub fn new(camera: CameraInfo, config: EngineConfig) -> Self {
        Self {
            geometric: GeometricSolver::new(camera),
            graph: GraphSolver::new(camera, config.corner_measurement_sigma),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn marker_length(&self) -> Real {
        self.config.marker_length
    }

    /// Build the startup map, or `None` when initialization defers to the
    /// first observation batch.
    pub fn initialize_map(&self) -> Option<Map> {
        map_init::initialize_map(
            &self.config.map_init,
            self.config.marker_length,
            self.config.use_graph_solver,
        )
    }

    fn localizer(&self) -> &dyn Localize {
        if self.config.use_graph_solver {
            &self.graph
        } else {
            &self.geometric
        }
    }

    fn updater(&self) -> &dyn UpdateMap {
        if self.config.use_graph_solver {
            &self.graph
        } else {
            &self.geometric
        }
    }

    /// Camera pose in the map frame; invalid when no visible marker is
    /// known.
    pub fn localize(&self, observations: &Observations, map: &Map) -> TransformWithCovariance {
        self.localizer().localize(observations, map)
    }

    /// Fold a batch into the map at the given camera pose.
    pub fn update_map(
        &self,
        t_map_camera: &TransformWithCovariance,
        observations: &Observations,
        map: &mut Map,
    ) {
        self.updater().update_map(t_map_camera, observations, map);
    }

    /// One full observation-batch cycle: initialize the map if it is still
    /// deferred, localize, and update. Returns the camera pose estimate
    /// (invalid when localization was not possible).
    pub fn process_observations(
        &self,
        observations: &Observations,
        map: &mut Option<Map>,
    ) -> TransformWithCovariance {
        if map.is_none() && !observations.is_empty() {
            *map = map_init::initialize_map_from_observations(
                &self.config.map_init,
                &self.geometric,
                observations,
                self.config.marker_length,
                self.config.use_graph_solver,
            );
        }
        let Some(map) = map.as_mut() else {
            return TransformWithCovariance::Invalid;
        };

        // A single observation cannot improve the map.
        if observations.len() < 2 {
            return TransformWithCovariance::Invalid;
        }

        let t_map_camera = self.localize(observations, map);
        if t_map_camera.is_valid() {
            self.update_map(&t_map_camera, observations, map);
        }
        t_map_camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};
    use vlam_core::{
        corners_f_map, Distortion5, Intrinsics, Iso3, MapStyle, Observation, Pt2, Vec3,
    };

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

    fn downward_camera(position: Vec3) -> Iso3 {
        Iso3::from_parts(
            Translation3::from(position),
            UnitQuaternion::from_euler_angles(std::f64::consts::PI, 0.0, 0.0),
        )
    }

    fn observe(cam: &CameraInfo, t_map_camera: &Iso3, t_map_marker: &Iso3, id: i32) -> Observation {
        let t_camera_map = t_map_camera.inverse();
        let corners = corners_f_map(t_map_marker, 0.1);
        let mut pixels = [Pt2::origin(); 4];
        for (i, c) in corners.iter().enumerate() {
            pixels[i] = cam.project(&t_camera_map.transform_point(c)).unwrap();
        }
        Observation::new(id, pixels)
    }

    fn geometric_config() -> EngineConfig {
        EngineConfig {
            use_graph_solver: false,
            marker_length: 0.1,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn empty_update_leaves_map_unchanged() {
        let engine = Engine::new(camera(), geometric_config());
        let mut map = engine.initialize_map().unwrap();
        let snapshot = format!("{map:?}");

        engine.update_map(
            &TransformWithCovariance::identity(),
            &Observations::new(),
            &mut map,
        );
        assert_eq!(format!("{map:?}"), snapshot);
    }

    #[test]
    fn invalid_pose_update_is_a_no_op() {
        let engine = Engine::new(camera(), geometric_config());
        let mut map = engine.initialize_map().unwrap();
        let t_map_camera = downward_camera(Vec3::new(0.0, 0.0, 1.0));
        let observations = Observations::from(vec![observe(
            &camera(),
            &t_map_camera,
            &Iso3::identity(),
            5,
        )]);
        let snapshot = format!("{map:?}");

        engine.update_map(&TransformWithCovariance::Invalid, &observations, &mut map);
        assert_eq!(format!("{map:?}"), snapshot);
    }

    #[test]
    fn geometric_update_inserts_and_averages() {
        let engine = Engine::new(camera(), geometric_config());
        let mut map = engine.initialize_map().unwrap(); // fixed marker 0 at identity

        let marker5 = Iso3::from_parts(
            Translation3::new(0.3, 0.1, 0.0),
            UnitQuaternion::identity(),
        );

        for step in 0..2 {
            let t_map_camera = downward_camera(Vec3::new(0.05 * step as f64, 0.0, 1.0));
            let observations = Observations::from(vec![
                observe(&camera(), &t_map_camera, &Iso3::identity(), 0),
                observe(&camera(), &t_map_camera, &marker5, 5),
            ]);
            let pose = engine.localize(&observations, &map);
            assert!(pose.is_valid());
            engine.update_map(&pose, &observations, &mut map);
        }

        let marker = map.find_marker(5).expect("marker 5 present");
        assert_eq!(marker.update_count(), 2);
        assert!(!marker.is_fixed());

        let mu = marker.t_map_marker().mu().unwrap();
        assert!((mu[0] - 0.3).abs() < 1e-3, "x = {}", mu[0]);
        assert!((mu[1] - 0.1).abs() < 1e-3, "y = {}", mu[1]);
        assert!(mu[2].abs() < 1e-3, "z = {}", mu[2]);

        // The anchor stays byte-identical.
        let anchor = map.find_marker(0).unwrap();
        assert!(anchor.is_fixed());
        assert_eq!(anchor.update_count(), 1);
        assert_eq!(
            anchor.t_map_marker().mu().unwrap(),
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn unknown_batch_localization_fails_and_update_noops() {
        let engine = Engine::new(camera(), geometric_config());
        let mut map = engine.initialize_map().unwrap();
        let t_map_camera = downward_camera(Vec3::new(0.0, 0.0, 1.0));
        let observations = Observations::from(vec![
            observe(&camera(), &t_map_camera, &Iso3::identity(), 40),
            observe(
                &camera(),
                &t_map_camera,
                &Iso3::from_parts(Translation3::new(0.2, 0.0, 0.0), UnitQuaternion::identity()),
                41,
            ),
        ]);

        let pose = engine.localize(&observations, &map);
        assert!(!pose.is_valid());

        let snapshot = format!("{map:?}");
        engine.update_map(&pose, &observations, &mut map);
        assert_eq!(format!("{map:?}"), snapshot);
    }

    #[test]
    fn process_observations_initializes_deferred_map() {
        let mut config = geometric_config();
        config.map_init.style = crate::config::MapInitStyle::FirstObservation;
        config.map_init.t_map_camera = [0.0, 0.0, 1.0, std::f64::consts::PI, 0.0, 0.0];
        let engine = Engine::new(camera(), config);

        let mut map = engine.initialize_map();
        assert!(map.is_none());

        let t_map_camera = downward_camera(Vec3::new(0.0, 0.0, 1.0));
        let marker7 = Iso3::from_parts(
            Translation3::new(0.25, 0.0, 0.0),
            UnitQuaternion::identity(),
        );
        let observations = Observations::from(vec![
            observe(&camera(), &t_map_camera, &Iso3::identity(), 3),
            observe(&camera(), &t_map_camera, &marker7, 7),
        ]);

        let pose = engine.process_observations(&observations, &mut map);
        assert!(pose.is_valid());

        let map = map.expect("map initialized from first batch");
        assert_eq!(map.map_style(), MapStyle::Pose);

        // The lowest observed id became the fixed anchor at the configured
        // camera pose, which here matches the true geometry.
        let anchor = map.find_marker(3).expect("anchor present");
        assert!(anchor.is_fixed());
        let mu = anchor.t_map_marker().mu().unwrap();
        assert!(mu[0].abs() < 1e-3, "x = {}", mu[0]);
        assert!(mu[2].abs() < 1e-3, "z = {}", mu[2]);

        // And the second marker was folded in by the update pass.
        assert!(map.find_marker(7).is_some());
    }

    #[test]
    fn process_observations_needs_two_markers() {
        let engine = Engine::new(camera(), geometric_config());
        let mut map = Some(engine.initialize_map().unwrap());
        let t_map_camera = downward_camera(Vec3::new(0.0, 0.0, 1.0));
        let observations = Observations::from(vec![observe(
            &camera(),
            &t_map_camera,
            &Iso3::identity(),
            0,
        )]);

        let pose = engine.process_observations(&observations, &mut map);
        assert!(!pose.is_valid());
    }
}
