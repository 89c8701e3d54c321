//! Interaction matrix (image Jacobian) of a point feature.
//!
//! For a feature at pixel `(x, y)` with depth `z`, the interaction matrix
//! `L` maps the camera twist to the feature velocity in the image:
//! `[x', y']^T = L * [wx, wy, wz, vx, vy, vz]^T`.
//!
//! Columns are ordered angular velocity first, then linear velocity. Use
//! [`InteractionMatrix::to_linear_first`] when a consumer expects the
//! `[v, w]` convention; never reorder columns by hand.

use std::ops::Index;

use nalgebra::{DMatrix, Matrix2x3, Matrix2x6};
use serde::{Deserialize, Serialize};

use crate::{default_intrinsics, CameraIntrinsics};

/// Failures of the interaction matrix computation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InteractionError {
    #[error("feature coordinates must be finite (x={x}, y={y})")]
    NonFiniteCoordinate { x: f64, y: f64 },
    #[error("depth must be finite (z={z})")]
    NonFiniteDepth { z: f64 },
    #[error("depth must be non-zero")]
    ZeroDepth,
    #[error("depth must be positive, feature is behind the camera (z={z})")]
    DepthBehindCamera { z: f64 },
    #[error("intrinsics must be finite with non-zero focal lengths (fx={fx}, fy={fy}, cx={cx}, cy={cy})")]
    InvalidIntrinsics { fx: f64, fy: f64, cx: f64, cy: f64 },
    #[error("interaction matrix is not finite for x={x}, y={y}, z={z}")]
    NonFiniteResult { x: f64, y: f64, z: f64 },
    #[error("no features to stack")]
    NoFeatures,
    #[error("feature {index}: {source}")]
    Feature {
        index: usize,
        #[source]
        source: Box<InteractionError>,
    },
}

/// Tracked image point with its estimated depth.
///
/// Non-finite components serialize as `"NaN"`, `"inf"` or `"-inf"` so that
/// rejected observations still round-trip through JSON.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureObservation {
    /// Pixel x.
    #[serde(with = "crate::io::json_f64")]
    pub x: f64,
    /// Pixel y.
    #[serde(with = "crate::io::json_f64")]
    pub y: f64,
    /// Depth along the optical axis, in front of the camera.
    #[serde(with = "crate::io::json_f64")]
    pub z: f64,
}

impl FeatureObservation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Check the observation can be fed to the interaction matrix.
    pub fn validate(&self) -> Result<(), InteractionError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(InteractionError::NonFiniteCoordinate {
                x: self.x,
                y: self.y,
            });
        }
        if !self.z.is_finite() {
            return Err(InteractionError::NonFiniteDepth { z: self.z });
        }
        if self.z == 0.0 {
            return Err(InteractionError::ZeroDepth);
        }
        if self.z < 0.0 {
            return Err(InteractionError::DepthBehindCamera { z: self.z });
        }
        Ok(())
    }
}

/// 2x6 interaction matrix, columns `[wx, wy, wz, vx, vy, vz]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InteractionMatrix(Matrix2x6<f64>);

impl InteractionMatrix {
    #[inline]
    pub fn as_matrix(&self) -> &Matrix2x6<f64> {
        &self.0
    }

    /// Columns 0..3, response to angular velocity.
    pub fn angular(&self) -> Matrix2x3<f64> {
        self.0.fixed_view::<2, 3>(0, 0).into_owned()
    }

    /// Columns 3..6, response to linear velocity.
    pub fn linear(&self) -> Matrix2x3<f64> {
        self.0.fixed_view::<2, 3>(0, 3).into_owned()
    }

    /// Same matrix with columns reordered to `[vx, vy, vz, wx, wy, wz]`.
    pub fn to_linear_first(&self) -> Matrix2x6<f64> {
        let mut out = Matrix2x6::zeros();
        out.fixed_view_mut::<2, 3>(0, 0).copy_from(&self.linear());
        out.fixed_view_mut::<2, 3>(0, 3).copy_from(&self.angular());
        out
    }

    pub fn to_rows(&self) -> [[f64; 6]; 2] {
        let mut rows = [[0.0; 6]; 2];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.0[(r, c)];
            }
        }
        rows
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Index<(usize, usize)> for InteractionMatrix {
    type Output = f64;

    #[inline]
    fn index(&self, idx: (usize, usize)) -> &f64 {
        &self.0[idx]
    }
}

/// Compute the interaction matrix of `obs` for a camera with intrinsics `k`.
///
/// With `dx = x - cx` and `dy = y - cy`:
///
/// ```text
/// [ dx*dy/fy        -(fx^2+dx^2)/fx  dy*fx/fy   -fx/z  0      dx/z ]
/// [ (fy^2+dy^2)/fy  -dx*dy/fx        -dx*fy/fx  0      -fy/z  dy/z ]
/// ```
///
/// Finite inputs can still overflow (a subnormal `z`, a pixel far outside
/// the image); those return [`InteractionError::NonFiniteResult`].
pub fn interaction_matrix(
    obs: &FeatureObservation,
    k: &CameraIntrinsics,
) -> Result<InteractionMatrix, InteractionError> {
    if !k.is_valid() {
        let CameraIntrinsics { fx, fy, cx, cy } = *k;
        return Err(InteractionError::InvalidIntrinsics { fx, fy, cx, cy });
    }
    obs.validate()?;

    let CameraIntrinsics { fx, fy, cx, cy } = *k;
    let z = obs.z;
    let dx = obs.x - cx;
    let dy = obs.y - cy;

    let m = Matrix2x6::from_row_slice(&[
        dx * dy / fy, -(fx * fx + dx * dx) / fx, dy * fx / fy, -fx / z, 0.0, dx / z, //
        (fy * fy + dy * dy) / fy, -dx * dy / fx, -dx * fy / fx, 0.0, -fy / z, dy / z,
    ]);

    let l = InteractionMatrix(m);
    if !l.is_finite() {
        return Err(InteractionError::NonFiniteResult {
            x: obs.x,
            y: obs.y,
            z,
        });
    }
    Ok(l)
}

/// Interaction matrix calculator bound to one camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InteractionMatrixCalculator {
    intrinsics: CameraIntrinsics,
}

impl Default for InteractionMatrixCalculator {
    /// Calculator for the process-wide default camera.
    fn default() -> Self {
        Self::new(*default_intrinsics())
    }
}

impl InteractionMatrixCalculator {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self { intrinsics }
    }

    #[inline]
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// Interaction matrix for a feature at pixel `(x, y)` and depth `z`.
    pub fn compute(&self, x: f64, y: f64, z: f64) -> Result<InteractionMatrix, InteractionError> {
        self.compute_observation(&FeatureObservation::new(x, y, z))
    }

    pub fn compute_observation(
        &self,
        obs: &FeatureObservation,
    ) -> Result<InteractionMatrix, InteractionError> {
        interaction_matrix(obs, &self.intrinsics)
    }

    /// Stack per-feature matrices into a `2N x 6` matrix.
    ///
    /// Rows `2k` and `2k + 1` belong to `features[k]`. Fails on the first
    /// invalid feature.
    pub fn compute_stacked(
        &self,
        features: &[FeatureObservation],
    ) -> Result<DMatrix<f64>, InteractionError> {
        if features.is_empty() {
            return Err(InteractionError::NoFeatures);
        }

        let mut out = DMatrix::<f64>::zeros(2 * features.len(), 6);
        for (index, obs) in features.iter().enumerate() {
            let l = self
                .compute_observation(obs)
                .map_err(|err| InteractionError::Feature {
                    index,
                    source: Box::new(err),
                })?;
            out.fixed_view_mut::<2, 6>(2 * index, 0)
                .copy_from(l.as_matrix());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_camera(f: f64) -> CameraIntrinsics {
        CameraIntrinsics {
            fx: f,
            fy: f,
            cx: 0.0,
            cy: 0.0,
        }
    }

    #[test]
    fn formula_entries_off_center() {
        let k = CameraIntrinsics {
            fx: 800.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
        };
        let l = interaction_matrix(&FeatureObservation::new(420.0, 190.0, 4.0), &k).unwrap();
        // dx = 100, dy = -50
        let expected = [
            [
                100.0 * -50.0 / 600.0,
                -(800.0 * 800.0 + 100.0 * 100.0) / 800.0,
                -50.0 * 800.0 / 600.0,
                -800.0 / 4.0,
                0.0,
                100.0 / 4.0,
            ],
            [
                (600.0 * 600.0 + 50.0 * 50.0) / 600.0,
                -(100.0 * -50.0) / 800.0,
                -100.0 * 600.0 / 800.0,
                0.0,
                -600.0 / 4.0,
                -50.0 / 4.0,
            ],
        ];
        let rows = l.to_rows();
        for r in 0..2 {
            for c in 0..6 {
                assert_relative_eq!(rows[r][c], expected[r][c], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn angular_and_linear_blocks() {
        let obs = FeatureObservation::new(15.0, -7.0, 3.0);
        let l = interaction_matrix(&obs, &square_camera(500.0)).unwrap();
        let angular = l.angular();
        let linear = l.linear();
        let reordered = l.to_linear_first();
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(angular[(r, c)], l[(r, c)]);
                assert_eq!(linear[(r, c)], l[(r, c + 3)]);
                assert_eq!(reordered[(r, c)], l[(r, c + 3)]);
                assert_eq!(reordered[(r, c + 3)], l[(r, c)]);
            }
        }
    }

    #[test]
    fn rejects_invalid_depths() {
        let calc = InteractionMatrixCalculator::new(square_camera(500.0));
        assert_eq!(
            calc.compute(1.0, 2.0, 0.0).unwrap_err(),
            InteractionError::ZeroDepth
        );
        assert_eq!(
            calc.compute(1.0, 2.0, -0.0).unwrap_err(),
            InteractionError::ZeroDepth
        );
        assert_eq!(
            calc.compute(1.0, 2.0, -1.5).unwrap_err(),
            InteractionError::DepthBehindCamera { z: -1.5 }
        );
        assert!(matches!(
            calc.compute(1.0, 2.0, f64::INFINITY),
            Err(InteractionError::NonFiniteDepth { .. })
        ));
        assert!(matches!(
            calc.compute(1.0, 2.0, f64::NAN),
            Err(InteractionError::NonFiniteDepth { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let calc = InteractionMatrixCalculator::new(square_camera(500.0));
        assert!(matches!(
            calc.compute(f64::NAN, 2.0, 1.0),
            Err(InteractionError::NonFiniteCoordinate { .. })
        ));
        assert!(matches!(
            calc.compute(0.0, f64::NEG_INFINITY, 1.0),
            Err(InteractionError::NonFiniteCoordinate { .. })
        ));
    }

    #[test]
    fn rejects_zero_focal_length() {
        let k = CameraIntrinsics {
            fx: 0.0,
            fy: 500.0,
            cx: 0.0,
            cy: 0.0,
        };
        assert_eq!(
            interaction_matrix(&FeatureObservation::new(1.0, 1.0, 1.0), &k).unwrap_err(),
            InteractionError::InvalidIntrinsics {
                fx: 0.0,
                fy: 500.0,
                cx: 0.0,
                cy: 0.0,
            }
        );
    }

    #[test]
    fn rejects_non_finite_principal_point() {
        // Public fields bypass `CameraIntrinsics::new`.
        let k = CameraIntrinsics {
            cx: f64::NAN,
            ..square_camera(500.0)
        };
        let obs = FeatureObservation::new(1.0, 1.0, 1.0);
        let err = interaction_matrix(&obs, &k).unwrap_err();
        assert!(matches!(err, InteractionError::InvalidIntrinsics { cx, .. } if cx.is_nan()));

        let calc = InteractionMatrixCalculator::new(CameraIntrinsics {
            cy: f64::NEG_INFINITY,
            ..square_camera(500.0)
        });
        assert!(calc.compute(1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn overflowing_entries_are_rejected() {
        let calc = InteractionMatrixCalculator::default();

        // fx / z overflows for a subnormal depth.
        assert_eq!(
            calc.compute(1100.0, 980.0, 1e-310).unwrap_err(),
            InteractionError::NonFiniteResult {
                x: 1100.0,
                y: 980.0,
                z: 1e-310,
            }
        );
        // dx * dx overflows far outside the image.
        assert!(matches!(
            calc.compute(1e200, 980.0, 1.0),
            Err(InteractionError::NonFiniteResult { .. })
        ));
        assert!(matches!(
            calc.compute(1100.0, -1e200, 1.0),
            Err(InteractionError::NonFiniteResult { .. })
        ));
        // Small but normal depths are fine.
        assert!(calc.compute(1100.0, 980.0, 1e-6).unwrap().is_finite());
    }

    #[test]
    fn stacked_wraps_overflow_with_index() {
        let calc = InteractionMatrixCalculator::new(square_camera(700.0));
        let features = [
            FeatureObservation::new(10.0, 20.0, 1.0),
            FeatureObservation::new(10.0, 20.0, 1.0),
            FeatureObservation::new(1e200, 20.0, 1.0),
        ];
        let err = calc.compute_stacked(&features).unwrap_err();
        assert!(matches!(
            err,
            InteractionError::Feature { index: 2, ref source }
                if matches!(**source, InteractionError::NonFiniteResult { .. })
        ));
    }

    #[test]
    fn stacked_rows_follow_feature_order() {
        let calc = InteractionMatrixCalculator::new(square_camera(700.0));
        let features = [
            FeatureObservation::new(10.0, 20.0, 1.0),
            FeatureObservation::new(-30.0, 5.0, 2.5),
            FeatureObservation::new(0.0, 0.0, 0.5),
        ];
        let stacked = calc.compute_stacked(&features).unwrap();
        assert_eq!(stacked.nrows(), 6);
        assert_eq!(stacked.ncols(), 6);

        for (k, obs) in features.iter().enumerate() {
            let l = calc.compute_observation(obs).unwrap();
            for r in 0..2 {
                for c in 0..6 {
                    assert_eq!(stacked[(2 * k + r, c)], l[(r, c)]);
                }
            }
        }
    }

    #[test]
    fn stacked_reports_failing_feature() {
        let calc = InteractionMatrixCalculator::new(square_camera(700.0));
        assert_eq!(
            calc.compute_stacked(&[]).unwrap_err(),
            InteractionError::NoFeatures
        );

        let features = [
            FeatureObservation::new(10.0, 20.0, 1.0),
            FeatureObservation::new(10.0, 20.0, 0.0),
        ];
        let err = calc.compute_stacked(&features).unwrap_err();
        assert_eq!(
            err,
            InteractionError::Feature {
                index: 1,
                source: Box::new(InteractionError::ZeroDepth),
            }
        );
        assert_eq!(err.to_string(), "feature 1: depth must be non-zero");
    }

    #[test]
    fn default_calculator_uses_default_intrinsics() {
        let calc = InteractionMatrixCalculator::default();
        assert_eq!(calc.intrinsics(), default_intrinsics());
    }
}
