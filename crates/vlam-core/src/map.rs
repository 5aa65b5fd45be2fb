//! Marker and map store.
//!
//! A [`Map`] owns all [`Marker`]s keyed by id, together with the physical
//! marker side length (identical for every marker, immutable after
//! construction) and the [`MapStyle`] declaring which covariance fidelity
//! is persisted. Markers are referenced by id only; solvers receive the
//! map by borrow and hand back poses that the driver writes through.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::math::Real;
use crate::observation::Observations;
use crate::transform::TransformWithCovariance;

/// Errors from map mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    /// A marker with this id already exists in the map.
    #[error("marker id {0} already present in map")]
    DuplicateMarkerId(i32),
}

/// Which covariance fidelity the map persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MapStyle {
    /// Poses only; covariances are neither stored nor trusted.
    #[default]
    Pose,
    /// Poses with full 6x6 covariances.
    Covariance,
    /// Poses with per-corner covariances.
    Corners,
}

impl MapStyle {
    /// The persisted integer code.
    pub fn as_code(self) -> i32 {
        match self {
            MapStyle::Pose => 0,
            MapStyle::Covariance => 1,
            MapStyle::Corners => 2,
        }
    }

    /// Parse the persisted integer code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MapStyle::Pose),
            1 => Some(MapStyle::Covariance),
            2 => Some(MapStyle::Corners),
            _ => None,
        }
    }
}

/// One mapped marker: pose in the map frame plus bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    id: i32,
    t_map_marker: TransformWithCovariance,
    update_count: u32,
    is_fixed: bool,
}

impl Marker {
    /// A freshly observed marker; the originating observation counts as the
    /// first update.
    pub fn new(id: i32, t_map_marker: TransformWithCovariance) -> Self {
        Self {
            id,
            t_map_marker,
            update_count: 1,
            is_fixed: false,
        }
    }

    /// A marker whose pose is ground truth and never updated.
    pub fn new_fixed(id: i32, t_map_marker: TransformWithCovariance) -> Self {
        Self {
            is_fixed: true,
            ..Self::new(id, t_map_marker)
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn t_map_marker(&self) -> &TransformWithCovariance {
        &self.t_map_marker
    }

    pub fn update_count(&self) -> u32 {
        self.update_count
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub fn set_is_fixed(&mut self, is_fixed: bool) {
        self.is_fixed = is_fixed;
    }

    pub fn set_update_count(&mut self, update_count: u32) {
        self.update_count = update_count;
    }

    /// Overwrite the pose from a re-optimization and count the update.
    /// Fixed markers are never touched.
    pub fn apply_update(&mut self, t_map_marker: TransformWithCovariance) {
        if !self.is_fixed {
            self.t_map_marker = t_map_marker;
            self.update_count += 1;
        }
    }

    /// Fold another pose estimate into the running mean. Fixed markers are
    /// never touched.
    pub fn update_simple_average(&mut self, other: &TransformWithCovariance) {
        if !self.is_fixed {
            self.t_map_marker
                .update_simple_average(other, self.update_count);
            self.update_count += 1;
        }
    }
}

/// The map: markers by id, marker side length, persistence style.
#[derive(Clone, Debug)]
pub struct Map {
    markers: BTreeMap<i32, Marker>,
    marker_length: Real,
    map_style: MapStyle,
}

impl Map {
    pub fn new(map_style: MapStyle, marker_length: Real) -> Self {
        Self {
            markers: BTreeMap::new(),
            marker_length,
            map_style,
        }
    }

    /// Physical marker side length in meters.
    pub fn marker_length(&self) -> Real {
        self.marker_length
    }

    pub fn map_style(&self) -> MapStyle {
        self.map_style
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers in ascending id order.
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn find_marker(&self, id: i32) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub fn find_marker_mut(&mut self, id: i32) -> Option<&mut Marker> {
        self.markers.get_mut(&id)
    }

    /// Insert a new marker; duplicate ids are rejected.
    pub fn add_marker(&mut self, marker: Marker) -> Result<(), MapError> {
        let id = marker.id();
        if self.markers.contains_key(&id) {
            return Err(MapError::DuplicateMarkerId(id));
        }
        self.markers.insert(id, marker);
        Ok(())
    }

    /// The map pose of each observed marker, invalid where unknown.
    /// Preserves observation order.
    pub fn find_t_map_markers(&self, observations: &Observations) -> Vec<TransformWithCovariance> {
        observations
            .iter()
            .map(|obs| {
                self.find_marker(obs.id())
                    .map(|m| m.t_map_marker().clone())
                    .unwrap_or_default()
            })
            .collect()
    }
}
