//! Calibration sources and intrinsics derivation.
//!
//! Pixel intrinsics are the product of a pixel-scaling matrix
//! `diag(width, height)` (2x2) and a normalized-intrinsics matrix
//! `[[fx_n, 0, cx_n], [0, fy_n, cy_n]]` (2x3). The product is a 2x3 matrix
//! whose `[0][0]`, `[1][1]`, `[0][2]` and `[1][2]` entries are `fx`, `fy`,
//! `cx` and `cy` in pixels.

use log::debug;
use nalgebra::{DMatrix, Matrix2, Matrix2x3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::CameraIntrinsics;

/// Errors raised while building intrinsics from calibration data.
///
/// These are configuration errors: they surface once at startup and are
/// not recoverable by retrying with the same input.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("{name} matrix must be {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    Shape {
        name: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("{name} matrix has rows of different lengths")]
    RaggedRows { name: &'static str },
    #[error("resolution must be non-zero (width={width}, height={height})")]
    InvalidResolution { width: u32, height: u32 },
    #[error("{name} must be finite")]
    NonFinite { name: &'static str },
    #[error("sensor size must be finite and > 0")]
    InvalidSensorSize,
    #[error("focal lengths must be finite and non-zero (fx={fx}, fy={fy})")]
    InvalidIntrinsics { fx: f64, fy: f64 },
}

/// Physical lens description, as reported by a simulated camera.
///
/// All lengths share one unit (typically millimetres).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalLens {
    pub focal_length: f64,
    pub sensor_width: f64,
    pub sensor_height: f64,
    #[serde(default)]
    pub lens_shift_x: f64,
    #[serde(default)]
    pub lens_shift_y: f64,
}

/// Camera calibration: image resolution plus normalized intrinsics.
///
/// Normalized values are fractions of the image size, so the principal point
/// of a centred lens is `(0.5, 0.5)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub resolution_width: u32,
    pub resolution_height: u32,
    pub normalized_fx: f64,
    pub normalized_fy: f64,
    #[serde(default = "default_normalized_center")]
    pub normalized_cx: f64,
    #[serde(default = "default_normalized_center")]
    pub normalized_cy: f64,
}

fn default_normalized_center() -> f64 {
    0.5
}

impl Default for CameraCalibration {
    fn default() -> Self {
        Self::preset_2064x2096()
    }
}

impl CameraCalibration {
    /// 640x480 simulated camera.
    pub fn preset_640x480() -> Self {
        Self {
            resolution_width: 640,
            resolution_height: 480,
            normalized_fx: 1.11111,
            normalized_fy: 1.48148,
            normalized_cx: 0.5,
            normalized_cy: 0.5,
        }
    }

    /// 2064x2096 visual-servo camera. This is the default calibration.
    pub fn preset_2064x2096() -> Self {
        Self {
            resolution_width: 2064,
            resolution_height: 2096,
            normalized_fx: 1.0941 / 2.0,
            normalized_fy: 1.1111 / 2.0,
            normalized_cx: 0.5,
            normalized_cy: 0.5,
        }
    }

    /// Build a calibration from a physical lens description.
    ///
    /// `fx_n = focal / sensor_w`, `cx_n = 0.5 + shift_x / sensor_w`, and the
    /// same along y.
    pub fn from_physical_lens(
        width: u32,
        height: u32,
        lens: &PhysicalLens,
    ) -> Result<Self, CalibrationError> {
        let sensor_ok = |s: f64| s.is_finite() && s > 0.0;
        if !sensor_ok(lens.sensor_width) || !sensor_ok(lens.sensor_height) {
            return Err(CalibrationError::InvalidSensorSize);
        }
        if !lens.focal_length.is_finite() {
            return Err(CalibrationError::NonFinite {
                name: "focal_length",
            });
        }
        if !lens.lens_shift_x.is_finite() || !lens.lens_shift_y.is_finite() {
            return Err(CalibrationError::NonFinite { name: "lens_shift" });
        }

        let calib = Self {
            resolution_width: width,
            resolution_height: height,
            normalized_fx: lens.focal_length / lens.sensor_width,
            normalized_fy: lens.focal_length / lens.sensor_height,
            normalized_cx: 0.5 + lens.lens_shift_x / lens.sensor_width,
            normalized_cy: 0.5 + lens.lens_shift_y / lens.sensor_height,
        };
        calib.validate()?;
        Ok(calib)
    }

    /// Check resolution and normalized values.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.resolution_width == 0 || self.resolution_height == 0 {
            return Err(CalibrationError::InvalidResolution {
                width: self.resolution_width,
                height: self.resolution_height,
            });
        }
        let normalized = [
            ("normalized_fx", self.normalized_fx),
            ("normalized_fy", self.normalized_fy),
            ("normalized_cx", self.normalized_cx),
            ("normalized_cy", self.normalized_cy),
        ];
        for (name, value) in normalized {
            if !value.is_finite() {
                return Err(CalibrationError::NonFinite { name });
            }
        }
        Ok(())
    }

    /// Pixel-scaling matrix `diag(width, height)`.
    pub fn pixel_scale_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.resolution_width as f64,
            0.0,
            0.0,
            self.resolution_height as f64,
        )
    }

    /// Normalized-intrinsics matrix `[[fx_n, 0, cx_n], [0, fy_n, cy_n]]`.
    pub fn normalized_matrix(&self) -> Matrix2x3<f64> {
        Matrix2x3::new(
            self.normalized_fx,
            0.0,
            self.normalized_cx,
            0.0,
            self.normalized_fy,
            self.normalized_cy,
        )
    }

    /// Derive pixel intrinsics.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn intrinsics(&self) -> Result<CameraIntrinsics, CalibrationError> {
        self.validate()?;
        let k = self.product_intrinsics();
        debug!(
            "intrinsics from {}x{} calibration: fx={:.4} fy={:.4} cx={:.4} cy={:.4}",
            self.resolution_width, self.resolution_height, k.fx, k.fy, k.cx, k.cy
        );
        CameraIntrinsics::new(k.fx, k.fy, k.cx, k.cy)
    }

    /// Unchecked product; callers validate.
    pub(crate) fn product_intrinsics(&self) -> CameraIntrinsics {
        let product = self.pixel_scale_matrix() * self.normalized_matrix();
        CameraIntrinsics {
            fx: product[(0, 0)],
            fy: product[(1, 1)],
            cx: product[(0, 2)],
            cy: product[(1, 2)],
        }
    }
}

/// Row-major calibration matrices as they appear in a config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMatrices {
    /// Expected 2x2.
    pub pixel_scale: Vec<Vec<f64>>,
    /// Expected 2x3.
    pub normalized: Vec<Vec<f64>>,
}

impl From<&CameraCalibration> for CalibrationMatrices {
    fn from(calib: &CameraCalibration) -> Self {
        let s = calib.pixel_scale_matrix();
        let n = calib.normalized_matrix();
        Self {
            pixel_scale: (0..2).map(|r| (0..2).map(|c| s[(r, c)]).collect()).collect(),
            normalized: (0..2).map(|r| (0..3).map(|c| n[(r, c)]).collect()).collect(),
        }
    }
}

impl CalibrationMatrices {
    /// Validate shapes and derive pixel intrinsics.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn intrinsics(&self) -> Result<CameraIntrinsics, CalibrationError> {
        let pixel_scale = rows_to_matrix("pixel_scale", &self.pixel_scale)?;
        let normalized = rows_to_matrix("normalized", &self.normalized)?;
        derive_intrinsics(&pixel_scale, &normalized)
    }
}

fn rows_to_matrix(
    name: &'static str,
    rows: &[Vec<f64>],
) -> Result<DMatrix<f64>, CalibrationError> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(CalibrationError::RaggedRows { name });
    }
    Ok(DMatrix::from_fn(nrows, ncols, |r, c| rows[r][c]))
}

fn check_shape(
    name: &'static str,
    m: &DMatrix<f64>,
    expected_rows: usize,
    expected_cols: usize,
) -> Result<(), CalibrationError> {
    if m.nrows() != expected_rows || m.ncols() != expected_cols {
        return Err(CalibrationError::Shape {
            name,
            expected_rows,
            expected_cols,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(CalibrationError::NonFinite { name });
    }
    Ok(())
}

/// Multiply a 2x2 pixel-scaling matrix by a 2x3 normalized-intrinsics
/// matrix and extract `fx`, `fy`, `cx`, `cy` from the product.
pub fn derive_intrinsics(
    pixel_scale: &DMatrix<f64>,
    normalized: &DMatrix<f64>,
) -> Result<CameraIntrinsics, CalibrationError> {
    check_shape("pixel_scale", pixel_scale, 2, 2)?;
    check_shape("normalized", normalized, 2, 3)?;

    let product = pixel_scale * normalized;
    CameraIntrinsics::new(
        product[(0, 0)],
        product[(1, 1)],
        product[(0, 2)],
        product[(1, 2)],
    )
}
