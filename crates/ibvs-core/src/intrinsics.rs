use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::{CalibrationError, CameraCalibration};

/// Pinhole camera intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length along x.
    #[serde(with = "crate::io::json_f64")]
    pub fx: f64,
    /// Focal length along y.
    #[serde(with = "crate::io::json_f64")]
    pub fy: f64,
    /// Principal point x.
    #[serde(with = "crate::io::json_f64")]
    pub cx: f64,
    /// Principal point y.
    #[serde(with = "crate::io::json_f64")]
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create intrinsics, rejecting zero or non-finite focal lengths and a
    /// non-finite principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, CalibrationError> {
        let k = Self { fx, fy, cx, cy };
        if !k.has_valid_focal_lengths() {
            return Err(CalibrationError::InvalidIntrinsics { fx, fy });
        }
        if !cx.is_finite() || !cy.is_finite() {
            return Err(CalibrationError::NonFinite {
                name: "principal_point",
            });
        }
        Ok(k)
    }

    /// `fx` and `fy` are finite and non-zero.
    #[inline]
    pub fn has_valid_focal_lengths(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.fx != 0.0 && self.fy != 0.0
    }

    /// All four parameters are finite and the focal lengths non-zero.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.has_valid_focal_lengths() && self.cx.is_finite() && self.cy.is_finite()
    }
}

static DEFAULT_INTRINSICS: OnceLock<CameraIntrinsics> = OnceLock::new();

/// Process-wide intrinsics of [`CameraCalibration::default`].
///
/// Derived on first access and read-only afterwards.
pub fn default_intrinsics() -> &'static CameraIntrinsics {
    DEFAULT_INTRINSICS.get_or_init(|| CameraCalibration::default().product_intrinsics())
}
