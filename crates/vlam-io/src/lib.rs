//! Persistence and boundary messages for fiducial-marker VLAM.
//!
//! The map travels two ways: as a YAML file (the persisted state written
//! between sessions) and as a plain message struct (the publisher-facing
//! snapshot). Observations arrive as a message carrying camera calibration
//! and per-marker corner pixels. This crate owns those boundary formats
//! and their conversions to the core types; transport stays outside.

/// Boundary message types.
pub mod msg;
/// YAML map file reading and writing.
pub mod yaml;

pub use msg::{CameraInfoMsg, Header, MapMsg, ObservationMsg, ObservationsMsg, PoseWithCovarianceMsg};
pub use yaml::{load_map, map_from_yaml_str, map_to_yaml_string, save_map, MapFileError};
