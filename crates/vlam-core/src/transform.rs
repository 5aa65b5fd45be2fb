//! Rigid transforms with covariance.
//!
//! A [`TransformWithCovariance`] is either `Invalid` ("no solution") or a
//! rigid transform in SE(3) with a 6x6 covariance over
//! `(x, y, z, roll, pitch, yaw)`, row-major. Solvers signal failure by
//! returning the invalid variant; consumers must check [`is_valid`] before
//! composing or writing through a value.
//!
//! [`is_valid`]: TransformWithCovariance::is_valid

use nalgebra::{Translation3, UnitQuaternion};

use crate::math::{normalize_angle, Cov6, Iso3, Pt3, Real};

/// Build an isometry from a `(x, y, z, roll, pitch, yaw)` mean vector.
pub fn iso_from_mu(mu: &[Real; 6]) -> Iso3 {
    Iso3::from_parts(
        Translation3::new(mu[0], mu[1], mu[2]),
        UnitQuaternion::from_euler_angles(mu[3], mu[4], mu[5]),
    )
}

/// Extract the `(x, y, z, roll, pitch, yaw)` mean vector of an isometry.
pub fn mu_from_iso(t: &Iso3) -> [Real; 6] {
    let (roll, pitch, yaw) = t.rotation.euler_angles();
    let c = t.translation.vector;
    [c.x, c.y, c.z, roll, pitch, yaw]
}

/// A rigid transform plus covariance, or the absence of a solution.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformWithCovariance {
    /// No solution; propagates through composition and map updates.
    Invalid,
    /// A transform with its covariance over `(x, y, z, roll, pitch, yaw)`.
    Valid {
        t: Iso3,
        cov: Cov6,
    },
}

impl Default for TransformWithCovariance {
    fn default() -> Self {
        Self::Invalid
    }
}

impl TransformWithCovariance {
    /// The identity transform with zero covariance.
    pub fn identity() -> Self {
        Self::from_iso(Iso3::identity())
    }

    /// A valid transform with zero covariance.
    pub fn from_iso(t: Iso3) -> Self {
        Self::Valid {
            t,
            cov: Cov6::zeros(),
        }
    }

    /// A valid transform with the given covariance.
    pub fn from_iso_cov(t: Iso3, cov: Cov6) -> Self {
        Self::Valid { t, cov }
    }

    /// A valid transform from a mean vector, zero covariance.
    pub fn from_mu(mu: &[Real; 6]) -> Self {
        Self::from_iso(iso_from_mu(mu))
    }

    /// A valid transform from a mean vector and a row-major 36-entry
    /// covariance.
    pub fn from_mu_cov(mu: &[Real; 6], cov: &[Real; 36]) -> Self {
        Self::Valid {
            t: iso_from_mu(mu),
            cov: Cov6::from_row_slice(cov),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// The SE(3) part, if any.
    pub fn transform(&self) -> Option<&Iso3> {
        match self {
            Self::Invalid => None,
            Self::Valid { t, .. } => Some(t),
        }
    }

    /// The covariance, if any.
    pub fn covariance(&self) -> Option<&Cov6> {
        match self {
            Self::Invalid => None,
            Self::Valid { cov, .. } => Some(cov),
        }
    }

    /// The `(x, y, z, roll, pitch, yaw)` mean vector, if any.
    pub fn mu(&self) -> Option<[Real; 6]> {
        self.transform().map(mu_from_iso)
    }

    /// Rigid composition `self * other`.
    ///
    /// Covariance is not propagated through composition; the result carries
    /// a zero covariance. Callers that need composed uncertainty take it
    /// from the factor-graph marginals instead.
    pub fn compose(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Valid { t: a, .. }, Self::Valid { t: b, .. }) => Self::from_iso(a * b),
            _ => Self::Invalid,
        }
    }

    /// Invert the SE(3) part; the covariance is carried through unchanged
    /// (the inverse is only ever used as an initial estimate).
    pub fn inverse(&self) -> Self {
        match self {
            Self::Invalid => Self::Invalid,
            Self::Valid { t, cov } => Self::Valid {
                t: t.inverse(),
                cov: *cov,
            },
        }
    }

    /// Apply the transform to a point.
    pub fn apply(&self, p: &Pt3) -> Option<Pt3> {
        self.transform().map(|t| t.transform_point(p))
    }

    /// Fold another estimate into a running mean of `count` samples:
    /// `mean <- (count * mean + other) / (count + 1)`, component-wise over
    /// `(x, y, z, roll, pitch, yaw)`, with the yaw difference taken along
    /// the shortest arc. The covariance is left unchanged.
    ///
    /// No-op unless both sides are valid.
    pub fn update_simple_average(&mut self, other: &Self, count: u32) {
        let Some(o_mu) = other.mu() else {
            return;
        };
        let Self::Valid { t, .. } = self else {
            return;
        };

        let mut mu = mu_from_iso(t);
        let w = 1.0 / (count as Real + 1.0);
        for i in 0..5 {
            mu[i] += (o_mu[i] - mu[i]) * w;
        }
        mu[5] = normalize_angle(mu[5] + normalize_angle(o_mu[5] - mu[5]) * w);

        *t = iso_from_mu(&mu);
    }
}
