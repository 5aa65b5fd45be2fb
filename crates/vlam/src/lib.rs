//! High-level entry crate for fiducial-marker visual localization and
//! mapping.
//!
//! Given corner observations of square fiducial markers of known size from
//! a calibrated monocular camera, this crate estimates the 6-DOF camera
//! pose in a shared map frame and concurrently builds and refines the map
//! of marker poses. Two interchangeable backends implement the work:
//!
//! - the **geometric** backend ([`vlam_geometric`]): iterative
//!   perspective-n-point with a mirror-solution guard, no covariances;
//! - the **factor-graph** backend ([`vlam_graph`]): Levenberg-Marquardt
//!   over resectioning, prior, and between factors, with marginal
//!   covariances.
//!
//! The [`Engine`] dispatches between them and drives the per-batch cycle:
//!
//! ```ignore
//! use vlam::{Engine, EngineConfig};
//!
//! let camera = /* CameraInfo from the detector's calibration */;
//! let engine = Engine::new(camera, EngineConfig::default());
//! let mut map = engine.initialize_map();
//!
//! loop {
//!     let observations = /* one frame's detections */;
//!     let t_map_camera = engine.process_observations(&observations, &mut map);
//!     if let Some(map) = &map {
//!         /* publish t_map_camera and a MapMsg snapshot, save YAML */
//!     }
//! }
//! ```

/// Engine configuration.
pub mod config;
/// Capability traits and the core driver.
pub mod engine;
/// Map initialization modes.
pub mod map_init;

/// Core math types, camera model, transforms, and the map store.
pub mod core {
    pub use vlam_core::*;
}

/// The closed-form PnP backend.
pub mod geometric {
    pub use vlam_geometric::*;
}

/// The factor-graph backend.
pub mod graph {
    pub use vlam_graph::*;
}

/// YAML persistence and boundary messages.
pub mod io {
    pub use vlam_io::*;
}

pub use config::{EngineConfig, MapInitConfig, MapInitStyle};
pub use engine::{Engine, Localize, UpdateMap};

/// Convenient re-exports for common use cases.
pub mod prelude {
    pub use crate::config::{EngineConfig, MapInitConfig, MapInitStyle};
    pub use crate::core::{
        CameraInfo, Distortion5, Intrinsics, Iso3, Map, MapStyle, Marker, Observation,
        Observations, TransformWithCovariance,
    };
    pub use crate::engine::{Engine, Localize, UpdateMap};
    pub use crate::geometric::GeometricSolver;
    pub use crate::graph::GraphSolver;
    pub use crate::io::{load_map, map_to_yaml_string, save_map, MapMsg, ObservationsMsg};
}
