//! Dataset samples and the anomaly maps derived from them.

use crate::error::{EvalError, Result};
use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

/// Number of fixed lighting directions each object is photographed under.
pub const NUM_VIEWS: usize = 6;

/// Ground-truth class of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Anomalous,
}

impl Label {
    pub fn is_anomalous(self) -> bool {
        self == Label::Anomalous
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Label::Normal => 0,
            Label::Anomalous => 1,
        }
    }
}

impl TryFrom<u8> for Label {
    type Error = EvalError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Label::Normal),
            1 => Ok(Label::Anomalous),
            other => Err(EvalError::InvalidLabel(other)),
        }
    }
}

/// Which part of a sample a reconstruction method consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputModality {
    /// The six RGB lighting views
    Lightings,
    /// The derived surface normal map, as a single view
    NormalMap,
}

/// One object instance: six lighting views, a normal map, its defect mask and label.
#[derive(Debug, Clone)]
pub struct Sample {
    views: Array4<f64>,
    normal_map: Array3<f64>,
    ground_truth: Array2<f64>,
    label: Label,
}

impl Sample {
    /// Build a sample, checking that all parts share one resolution.
    ///
    /// * `views` - `(NUM_VIEWS, 3, H, W)` RGB intensities in `[0, 1]`
    /// * `normal_map` - `(3, H, W)`
    /// * `ground_truth` - `(H, W)` binary defect mask
    pub fn new(
        views: Array4<f64>,
        normal_map: Array3<f64>,
        ground_truth: Array2<f64>,
        label: Label,
    ) -> Result<Self> {
        let (v, c, h, w) = views.dim();
        if v != NUM_VIEWS || c != 3 {
            return Err(EvalError::shape(
                "lighting views",
                views.shape(),
                &[NUM_VIEWS, 3, h, w],
            ));
        }
        if normal_map.dim() != (3, h, w) {
            return Err(EvalError::shape(
                "normal map",
                normal_map.shape(),
                &[3, h, w],
            ));
        }
        if ground_truth.dim() != (h, w) {
            return Err(EvalError::shape(
                "ground truth mask",
                ground_truth.shape(),
                &[h, w],
            ));
        }

        Ok(Self {
            views,
            normal_map,
            ground_truth,
            label,
        })
    }

    pub fn views(&self) -> ArrayView4<'_, f64> {
        self.views.view()
    }

    pub fn normal_map(&self) -> ArrayView3<'_, f64> {
        self.normal_map.view()
    }

    pub fn ground_truth(&self) -> ArrayView2<'_, f64> {
        self.ground_truth.view()
    }

    pub fn label(&self) -> Label {
        self.label
    }

    /// `(height, width)` shared by every part of the sample.
    pub fn resolution(&self) -> (usize, usize) {
        self.ground_truth.dim()
    }

    /// Stack of `(N, 3, H, W)` images for the given modality.
    pub fn input(&self, modality: InputModality) -> ArrayView4<'_, f64> {
        match modality {
            InputModality::Lightings => self.views.view(),
            InputModality::NormalMap => self.normal_map.view().insert_axis(Axis(0)),
        }
    }
}

/// Per-pixel anomaly scores at image resolution. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyMap(Array2<f64>);

impl AnomalyMap {
    /// Wrap `map`, which must have exactly `resolution`.
    pub fn new(map: Array2<f64>, resolution: (usize, usize)) -> Result<Self> {
        if map.dim() != resolution {
            return Err(EvalError::Resolution {
                found: map.dim(),
                expected: resolution,
            });
        }
        Ok(Self(map))
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// Largest score in the map (NaN values are skipped).
    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(h: usize, w: usize) -> Sample {
        Sample::new(
            Array4::zeros((NUM_VIEWS, 3, h, w)),
            Array3::zeros((3, h, w)),
            Array2::zeros((h, w)),
            Label::Normal,
        )
        .unwrap()
    }

    #[test]
    fn test_label_from_u8() {
        assert_eq!(Label::try_from(0).unwrap(), Label::Normal);
        assert_eq!(Label::try_from(1).unwrap(), Label::Anomalous);
        assert!(matches!(Label::try_from(2), Err(EvalError::InvalidLabel(2))));
        assert_eq!(Label::Anomalous.as_u8(), 1);
    }

    #[test]
    fn test_sample_rejects_mismatched_parts() {
        let err = Sample::new(
            Array4::zeros((NUM_VIEWS, 3, 8, 8)),
            Array3::zeros((3, 8, 8)),
            Array2::zeros((4, 4)),
            Label::Normal,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));

        let err = Sample::new(
            Array4::zeros((2, 3, 8, 8)),
            Array3::zeros((3, 8, 8)),
            Array2::zeros((8, 8)),
            Label::Normal,
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_input_modalities() {
        let sample = blank(4, 5);
        assert_eq!(sample.input(InputModality::Lightings).dim(), (NUM_VIEWS, 3, 4, 5));
        assert_eq!(sample.input(InputModality::NormalMap).dim(), (1, 3, 4, 5));
        assert_eq!(sample.resolution(), (4, 5));
    }

    #[test]
    fn test_anomaly_map_enforces_resolution() {
        assert!(AnomalyMap::new(Array2::zeros((4, 4)), (4, 4)).is_ok());
        assert!(matches!(
            AnomalyMap::new(Array2::zeros((4, 3)), (4, 4)),
            Err(EvalError::Resolution { .. })
        ));
        let map = AnomalyMap::new(ndarray::array![[0.1, 0.9], [0.3, 0.2]], (2, 2)).unwrap();
        assert_eq!(map.max(), 0.9);
    }
}
