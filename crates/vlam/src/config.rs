//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vlam_core::Real;

/// How the map comes to exist at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MapInitStyle {
    /// Load the map file; on failure fall through to [`SingleMarker`].
    ///
    /// [`SingleMarker`]: MapInitStyle::SingleMarker
    LoadFile,
    /// Start from an empty map seeded with one fixed marker from
    /// configuration.
    SingleMarker,
    /// Defer until the first observation batch, then seat the lowest
    /// observed marker id at the configured camera pose.
    FirstObservation,
}

impl From<MapInitStyle> for i32 {
    fn from(style: MapInitStyle) -> i32 {
        match style {
            MapInitStyle::LoadFile => 0,
            MapInitStyle::SingleMarker => 1,
            MapInitStyle::FirstObservation => 2,
        }
    }
}

impl TryFrom<i32> for MapInitStyle {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MapInitStyle::LoadFile),
            1 => Ok(MapInitStyle::SingleMarker),
            2 => Ok(MapInitStyle::FirstObservation),
            other => Err(format!("unknown map init style {other}")),
        }
    }
}

/// Map initialization settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MapInitConfig {
    pub style: MapInitStyle,
    /// Marker id seeded in [`MapInitStyle::SingleMarker`] mode.
    pub marker_id: i32,
    /// Fixed marker pose `(x, y, z, roll, pitch, yaw)` for
    /// [`MapInitStyle::SingleMarker`] mode.
    pub marker_pose: [Real; 6],
    /// Camera pose `(x, y, z, roll, pitch, yaw)` the first-seen marker is
    /// seated against in [`MapInitStyle::FirstObservation`] mode.
    pub t_map_camera: [Real; 6],
    /// Map file consumed by [`MapInitStyle::LoadFile`] mode.
    pub load_path: Option<PathBuf>,
}

impl Default for MapInitConfig {
    fn default() -> Self {
        Self {
            style: MapInitStyle::SingleMarker,
            marker_id: 0,
            marker_pose: [0.0; 6],
            t_map_camera: [0.0; 6],
            load_path: None,
        }
    }
}

/// Driver configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatch to the factor-graph backend instead of the geometric one.
    pub use_graph_solver: bool,
    /// Per-corner measurement standard deviation in pixels, consumed by
    /// the factor-graph backend.
    pub corner_measurement_sigma: Real,
    /// Physical marker side length in meters.
    pub marker_length: Real,
    pub map_init: MapInitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_graph_solver: true,
            corner_measurement_sigma: 1.0,
            marker_length: 0.1,
            map_init: MapInitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_style_codes_roundtrip() {
        for style in [
            MapInitStyle::LoadFile,
            MapInitStyle::SingleMarker,
            MapInitStyle::FirstObservation,
        ] {
            let code: i32 = style.into();
            assert_eq!(MapInitStyle::try_from(code).unwrap(), style);
        }
        assert!(MapInitStyle::try_from(9).is_err());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: EngineConfig = serde_yaml::from_str("marker_length: 0.2").unwrap();
        assert!((config.marker_length - 0.2).abs() < 1e-15);
        assert!(config.use_graph_solver);
        assert_eq!(config.map_init.style, MapInitStyle::SingleMarker);
    }
}
