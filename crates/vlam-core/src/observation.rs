//! Marker observations and canonical corner geometry.
//!
//! An [`Observation`] is pure transport: one detected marker id plus its
//! four image-plane corners in canonical order (top-left, top-right,
//! bottom-right, bottom-left as seen in the image). The corner-geometry
//! helpers here are shared by both solver backends.

use crate::math::{Iso3, Pt2, Pt3, Real};

/// One detected marker in one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    id: i32,
    corners: [Pt2; 4],
}

impl Observation {
    /// Construct from a marker id and four corners in canonical order.
    pub fn new(id: i32, corners: [Pt2; 4]) -> Self {
        Self { id, corners }
    }

    /// Construct from the flat detector layout `x0, y0, ..., x3, y3`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_flat(
        id: i32,
        x0: Real,
        y0: Real,
        x1: Real,
        y1: Real,
        x2: Real,
        y2: Real,
        x3: Real,
        y3: Real,
    ) -> Self {
        Self::new(
            id,
            [
                Pt2::new(x0, y0),
                Pt2::new(x1, y1),
                Pt2::new(x2, y2),
                Pt2::new(x3, y3),
            ],
        )
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// The four image-plane corners in canonical order.
    pub fn corners_f_image(&self) -> &[Pt2; 4] {
        &self.corners
    }
}

/// An ordered batch of observations from one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observations {
    observations: Vec<Observation>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }
}

impl From<Vec<Observation>> for Observations {
    fn from(observations: Vec<Observation>) -> Self {
        Self { observations }
    }
}

impl<'a> IntoIterator for &'a Observations {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// The four corners of a marker of side `marker_length` in its own frame.
///
/// The marker lies in its XY-plane, centered at the origin; the order
/// matches the canonical image order.
pub fn corners_f_marker(marker_length: Real) -> [Pt3; 4] {
    let h = marker_length / 2.0;
    [
        Pt3::new(-h, h, 0.0),
        Pt3::new(h, h, 0.0),
        Pt3::new(h, -h, 0.0),
        Pt3::new(-h, -h, 0.0),
    ]
}

/// The four corners of a marker transformed into the map frame.
pub fn corners_f_map(t_map_marker: &Iso3, marker_length: Real) -> [Pt3; 4] {
    corners_f_marker(marker_length).map(|c| t_map_marker.transform_point(&c))
}
