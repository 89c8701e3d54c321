//! JSON configuration and report helpers.

use std::{fs, path::Path, str::FromStr};

use log::{debug, warn, LevelFilter};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CalibrationError, CalibrationMatrices, CameraCalibration, CameraIntrinsics,
    FeatureObservation, InteractionMatrix, InteractionMatrixCalculator,
};

#[derive(thiserror::Error, Debug)]
pub enum IbvsIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum IbvsConfigError {
    #[error(transparent)]
    Io(#[from] IbvsIoError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Camera configuration.
///
/// `matrices` takes precedence over `calibration`; with neither set the
/// default calibration is used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IbvsConfig {
    #[serde(default)]
    pub calibration: Option<CameraCalibration>,
    #[serde(default)]
    pub matrices: Option<CalibrationMatrices>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl IbvsConfig {
    /// Load a JSON config from disk.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(path)))]
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IbvsIoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let cfg = serde_json::from_str(&raw)?;
        debug!("loaded config from {}", path.display());
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IbvsIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Requested log level, `Info` when absent or unparsable.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
            .as_deref()
            .and_then(|s| LevelFilter::from_str(s).ok())
            .unwrap_or(LevelFilter::Info)
    }

    /// Derive camera intrinsics from whichever calibration source is set.
    pub fn intrinsics(&self) -> Result<CameraIntrinsics, CalibrationError> {
        match (&self.matrices, &self.calibration) {
            (Some(matrices), calibration) => {
                if calibration.is_some() {
                    warn!("both `matrices` and `calibration` are set, using `matrices`");
                }
                matrices.intrinsics()
            }
            (None, Some(calibration)) => calibration.intrinsics(),
            (None, None) => CameraCalibration::default().intrinsics(),
        }
    }

    pub fn build_calculator(&self) -> Result<InteractionMatrixCalculator, CalibrationError> {
        Ok(InteractionMatrixCalculator::new(self.intrinsics()?))
    }

    /// Load a config and build its calculator in one step.
    pub fn load_calculator(
        path: impl AsRef<Path>,
    ) -> Result<InteractionMatrixCalculator, IbvsConfigError> {
        let cfg = Self::load_json(path)?;
        Ok(cfg.build_calculator()?)
    }
}

/// `serde(with)` codec for `f64` fields that may hold rejected input.
///
/// JSON has no NaN or infinity; `serde_json` would write `null` and then
/// refuse to read it back. Non-finite values are written as `"NaN"`, `"inf"`
/// or `"-inf"`. Reading accepts numbers, those strings and `null` (as NaN).
pub(crate) mod json_f64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if v.is_nan() {
            s.serialize_str("NaN")
        } else if v.is_sign_positive() {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            None => Ok(f64::NAN),
            Some(Repr::Number(v)) => Ok(v),
            Some(Repr::Text(text)) => match text.parse::<f64>() {
                Ok(v) if !v.is_finite() => Ok(v),
                _ => Err(de::Error::invalid_value(
                    de::Unexpected::Str(&text),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

/// One computed interaction matrix with its inputs.
///
/// The feature and intrinsics are stored as received, so a report for a
/// rejected NaN or infinite input loads back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionReport {
    pub intrinsics: CameraIntrinsics,
    pub feature: FeatureObservation,
    /// Row-major, columns `[wx, wy, wz, vx, vy, vz]`.
    #[serde(default)]
    pub matrix: Option<[[f64; 6]; 2]>,
    #[serde(default)]
    pub error: Option<String>,
}

impl InteractionReport {
    pub fn new(intrinsics: CameraIntrinsics, feature: FeatureObservation) -> Self {
        Self {
            intrinsics,
            feature,
            matrix: None,
            error: None,
        }
    }

    pub fn set_matrix(&mut self, matrix: &InteractionMatrix) {
        self.matrix = Some(matrix.to_rows());
        self.error = None;
    }

    pub fn set_error(&mut self, err: impl std::fmt::Display) {
        self.matrix = None;
        self.error = Some(err.to_string());
    }

    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IbvsIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IbvsIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
