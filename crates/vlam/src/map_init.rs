//! Map initialization modes.
//!
//! A map is born one of three ways: loaded from the YAML file, seeded with
//! a single fixed marker from configuration, or deferred until the first
//! observation batch and anchored to whatever marker is seen first.
//! Failures fall through to the next simpler mode and are logged.

use log::{error, info, warn};
use vlam_core::{
    iso_from_mu, Map, MapStyle, Marker, Observations, TransformWithCovariance,
};
use vlam_geometric::GeometricSolver;

use crate::config::{MapInitConfig, MapInitStyle};

/// Style for a freshly constructed map: only the factor-graph backend
/// produces covariances worth persisting.
fn fresh_map_style(use_graph_solver: bool) -> MapStyle {
    if use_graph_solver {
        MapStyle::Covariance
    } else {
        MapStyle::Pose
    }
}

/// Build the startup map, or `None` when initialization defers to the
/// first observation batch.
pub fn initialize_map(
    config: &MapInitConfig,
    marker_length: f64,
    use_graph_solver: bool,
) -> Option<Map> {
    match config.style {
        MapInitStyle::FirstObservation => None,
        MapInitStyle::LoadFile => {
            if let Some(path) = &config.load_path {
                match vlam_io::load_map(path) {
                    Ok(map) => {
                        info!("loaded map with {} markers from {}", map.len(), path.display());
                        return Some(map);
                    }
                    Err(err) => {
                        error!("failed to load map from {}: {err}", path.display());
                        warn!("falling through to single-marker initialization");
                    }
                }
            } else {
                warn!("no map file configured; falling through to single-marker initialization");
            }
            Some(single_marker_map(config, marker_length, use_graph_solver))
        }
        MapInitStyle::SingleMarker => {
            Some(single_marker_map(config, marker_length, use_graph_solver))
        }
    }
}

fn single_marker_map(config: &MapInitConfig, marker_length: f64, use_graph_solver: bool) -> Map {
    let mut map = Map::new(fresh_map_style(use_graph_solver), marker_length);
    let pose = TransformWithCovariance::from_mu(&config.marker_pose);
    map.add_marker(Marker::new_fixed(config.marker_id, pose))
        .expect("single marker into an empty map");
    map
}

/// Seat the lowest observed marker id as the map's fixed anchor, placing
/// it consistently with the configured camera pose.
pub fn initialize_map_from_observations(
    config: &MapInitConfig,
    solver: &GeometricSolver,
    observations: &Observations,
    marker_length: f64,
    use_graph_solver: bool,
) -> Option<Map> {
    let anchor = observations.iter().min_by_key(|obs| obs.id())?;

    let t_camera_marker = solver.solve_t_camera_marker(anchor, marker_length);
    let t_map_camera = TransformWithCovariance::from_iso(iso_from_mu(&config.t_map_camera));
    let t_map_marker = t_map_camera.compose(&t_camera_marker);
    if !t_map_marker.is_valid() {
        warn!("anchor marker {} pose could not be solved; map not initialized", anchor.id());
        return None;
    }

    let mut map = Map::new(fresh_map_style(use_graph_solver), marker_length);
    map.add_marker(Marker::new_fixed(anchor.id(), t_map_marker))
        .expect("anchor marker into an empty map");
    info!("map initialized from observation of marker {}", anchor.id());
    Some(map)
}
