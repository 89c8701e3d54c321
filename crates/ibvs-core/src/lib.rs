//! Image Jacobian (interaction matrix) for image-based visual servoing.
//!
//! Given camera intrinsics and a tracked point `(x, y)` at depth `z`, this
//! crate computes the 2x6 matrix mapping the camera twist
//! `[wx, wy, wz, vx, vy, vz]` to the point's velocity in pixels. Control
//! laws built on top of it (pseudo-inverse, gains) live elsewhere.
//!
//! ## Quickstart
//!
//! ```
//! use ibvs_core::{CameraCalibration, InteractionMatrixCalculator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let intrinsics = CameraCalibration::preset_2064x2096().intrinsics()?;
//! let calc = InteractionMatrixCalculator::new(intrinsics);
//!
//! let l = calc.compute(1100.0, 980.0, 0.8)?;
//! assert!(l.is_finite());
//! # Ok(())
//! # }
//! ```
//!
//! Intrinsics are passed in explicitly; [`default_intrinsics`] exposes the
//! default camera as a process-wide value for callers that only have one.

mod calibration;
mod interaction;
mod intrinsics;
mod io;
mod logger;

pub use calibration::{
    derive_intrinsics, CalibrationError, CalibrationMatrices, CameraCalibration, PhysicalLens,
};
pub use interaction::{
    interaction_matrix, FeatureObservation, InteractionError, InteractionMatrix,
    InteractionMatrixCalculator,
};
pub use intrinsics::{default_intrinsics, CameraIntrinsics};
pub use io::{IbvsConfig, IbvsConfigError, IbvsIoError, InteractionReport};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
