//! Boundary message types.
//!
//! Plain serde structs mirroring the wire layout of the detector's
//! observations message (in) and the published map snapshot (out). No
//! transport lives here; collaborators serialize these however they move
//! them.

use serde::{Deserialize, Serialize};
use vlam_core::{CameraInfo, Map, Observation, Observations, Real};

/// Message header: timestamp in seconds plus the reference frame id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Real,
    pub frame_id: String,
}

/// Camera calibration as carried by the observations message: a row-major
/// 3x3 intrinsics matrix and the `(k1, k2, p1, p2, k3)` distortion vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfoMsg {
    pub k: [Real; 9],
    pub d: [Real; 5],
}

impl From<&CameraInfoMsg> for CameraInfo {
    fn from(msg: &CameraInfoMsg) -> Self {
        CameraInfo::from_k_d(&msg.k, &msg.d)
    }
}

/// One detected marker: id plus corner pixels in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationMsg {
    pub id: i32,
    pub x0: Real,
    pub y0: Real,
    pub x1: Real,
    pub y1: Real,
    pub x2: Real,
    pub y2: Real,
    pub x3: Real,
    pub y3: Real,
}

impl From<&ObservationMsg> for Observation {
    fn from(msg: &ObservationMsg) -> Self {
        Observation::from_flat(
            msg.id, msg.x0, msg.y0, msg.x1, msg.y1, msg.x2, msg.y2, msg.x3, msg.y3,
        )
    }
}

/// One frame's worth of detections with the calibration that produced them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationsMsg {
    pub header: Header,
    pub camera_info: CameraInfoMsg,
    pub observations: Vec<ObservationMsg>,
}

impl ObservationsMsg {
    pub fn camera_info(&self) -> CameraInfo {
        CameraInfo::from(&self.camera_info)
    }

    pub fn observations(&self) -> Observations {
        Observations::from(
            self.observations
                .iter()
                .map(Observation::from)
                .collect::<Vec<_>>(),
        )
    }
}

/// A pose in the map frame with its row-major 36-entry covariance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovarianceMsg {
    pub xyz: [Real; 3],
    pub rpy: [Real; 3],
    pub cov: Vec<Real>,
}

/// The published map snapshot: parallel arrays over markers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapMsg {
    pub header: Header,
    pub marker_length: Real,
    pub map_style: i32,
    pub ids: Vec<i32>,
    pub fixed_flags: Vec<bool>,
    pub poses: Vec<PoseWithCovarianceMsg>,
}

impl MapMsg {
    /// Snapshot a map for publishing.
    pub fn from_map(map: &Map, header: Header) -> Self {
        let mut ids = Vec::with_capacity(map.len());
        let mut fixed_flags = Vec::with_capacity(map.len());
        let mut poses = Vec::with_capacity(map.len());

        for marker in map.markers() {
            let Some(mu) = marker.t_map_marker().mu() else {
                continue;
            };
            let cov = marker
                .t_map_marker()
                .covariance()
                .map(|c| c.transpose().as_slice().to_vec())
                .unwrap_or_else(|| vec![0.0; 36]);

            ids.push(marker.id());
            fixed_flags.push(marker.is_fixed());
            poses.push(PoseWithCovarianceMsg {
                xyz: [mu[0], mu[1], mu[2]],
                rpy: [mu[3], mu[4], mu[5]],
                cov,
            });
        }

        Self {
            header,
            marker_length: map.marker_length(),
            map_style: map.map_style().as_code(),
            ids,
            fixed_flags,
            poses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlam_core::{Map, MapStyle, Marker, Pt2, TransformWithCovariance};

    #[test]
    fn observations_msg_converts_to_core_types() {
        let msg = ObservationsMsg {
            header: Header {
                stamp: 12.5,
                frame_id: "camera".to_string(),
            },
            camera_info: CameraInfoMsg {
                k: [600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0],
                d: [0.0; 5],
            },
            observations: vec![ObservationMsg {
                id: 3,
                x0: 10.0,
                y0: 20.0,
                x1: 30.0,
                y1: 20.0,
                x2: 30.0,
                y2: 40.0,
                x3: 10.0,
                y3: 40.0,
            }],
        };

        let cam = msg.camera_info();
        assert_eq!(cam.k.fx, 600.0);

        let observations = msg.observations();
        assert_eq!(observations.len(), 1);
        let obs = &observations.as_slice()[0];
        assert_eq!(obs.id(), 3);
        assert_eq!(obs.corners_f_image()[2], Pt2::new(30.0, 40.0));
    }

    #[test]
    fn map_msg_carries_parallel_arrays() {
        let mut map = Map::new(MapStyle::Covariance, 0.1);
        map.add_marker(Marker::new_fixed(0, TransformWithCovariance::identity()))
            .unwrap();
        map.add_marker(Marker::new(
            2,
            TransformWithCovariance::from_mu(&[0.3, 0.0, 0.0, 0.0, 0.0, 0.2]),
        ))
        .unwrap();

        let msg = MapMsg::from_map(
            &map,
            Header {
                stamp: 1.0,
                frame_id: "map".to_string(),
            },
        );

        assert_eq!(msg.map_style, 1);
        assert_eq!(msg.ids, vec![0, 2]);
        assert_eq!(msg.fixed_flags, vec![true, false]);
        assert_eq!(msg.poses.len(), 2);
        assert_eq!(msg.poses[1].xyz[0], 0.3);
        assert_eq!(msg.poses[0].cov.len(), 36);
    }
}
