//! Camera model: pinhole intrinsics with Brown-Conrady distortion.
//!
//! Both solver backends consume the same [`CameraInfo`]: the geometric
//! backend undistorts corner pixels into normalized coordinates before
//! solving, while the factor-graph backend projects forward through the
//! full model inside its residuals.

use serde::{Deserialize, Serialize};

use crate::math::{Mat3, Pt2, Pt3, Real, Vec2, Vec3};

/// Pinhole intrinsics `(fx, fy, cx, cy)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Focal length in pixels along X.
    pub fx: Real,
    /// Focal length in pixels along Y.
    pub fy: Real,
    /// Principal point X coordinate in pixels.
    pub cx: Real,
    /// Principal point Y coordinate in pixels.
    pub cy: Real,
}

impl Intrinsics {
    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0,
        )
    }

    /// Convert a pixel into normalized coordinates on the Z=1 plane.
    pub fn pixel_to_normalized(&self, pixel: Pt2) -> Vec2 {
        Vec2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    /// Convert normalized coordinates on the Z=1 plane into a pixel.
    pub fn normalized_to_pixel(&self, n: Vec2) -> Pt2 {
        Pt2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Brown-Conrady 5-parameter radial-tangential distortion.
///
/// Coefficient order matches the observations message wire format:
/// `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Distortion5 {
    /// Radial coefficient k1.
    pub k1: Real,
    /// Radial coefficient k2.
    pub k2: Real,
    /// Tangential coefficient p1.
    pub p1: Real,
    /// Tangential coefficient p2.
    pub p2: Real,
    /// Radial coefficient k3.
    pub k3: Real,
}

impl Distortion5 {
    fn distort_impl(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n_undist: Vec2) -> Vec2 {
        let (xd, yd) = self.distort_impl(n_undist.x, n_undist.y);
        Vec2::new(xd, yd)
    }

    /// Remove distortion by fixed-point iteration.
    pub fn undistort(&self, n_dist: Vec2) -> Vec2 {
        let mut x = n_dist.x;
        let mut y = n_dist.y;
        for _ in 0..8 {
            let (xd, yd) = self.distort_impl(x, y);
            x -= xd - n_dist.x;
            y -= yd - n_dist.y;
        }
        Vec2::new(x, y)
    }
}

/// Calibrated monocular camera: intrinsics plus distortion.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraInfo {
    pub k: Intrinsics,
    pub d: Distortion5,
}

impl CameraInfo {
    pub fn new(k: Intrinsics, d: Distortion5) -> Self {
        Self { k, d }
    }

    /// Build from the raw message layout: a row-major 3x3 `k` matrix and the
    /// 5-element distortion vector `(k1, k2, p1, p2, k3)`.
    pub fn from_k_d(k: &[Real; 9], d: &[Real; 5]) -> Self {
        Self {
            k: Intrinsics {
                fx: k[0],
                fy: k[4],
                cx: k[2],
                cy: k[5],
            },
            d: Distortion5 {
                k1: d[0],
                k2: d[1],
                p1: d[2],
                p2: d[3],
                k3: d[4],
            },
        }
    }

    /// Project a camera-frame point to a distorted pixel.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p_c: &Pt3) -> Option<Pt2> {
        if p_c.z <= 0.0 {
            return None;
        }
        let n = Vec2::new(p_c.x / p_c.z, p_c.y / p_c.z);
        Some(self.k.normalized_to_pixel(self.d.distort(n)))
    }

    /// Undistort a corner pixel into ideal normalized coordinates.
    pub fn undistort_corner(&self, pixel: Pt2) -> Vec2 {
        self.d.undistort(self.k.pixel_to_normalized(pixel))
    }

    /// Backproject a pixel to a unit ray in the camera frame.
    pub fn backproject(&self, pixel: Pt2) -> Vec3 {
        let n = self.undistort_corner(pixel);
        let dir = Vec3::new(n.x, n.y, 1.0);
        dir / dir.norm()
    }
}
