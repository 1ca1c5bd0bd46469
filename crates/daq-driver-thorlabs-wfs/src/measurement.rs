//! Measurement records produced by the acquisition loop.
//!
//! Every pipeline stage is stored as a [`Step`], so a stage that failed is
//! distinguishable from one that legitimately measured zero.

use crate::sdk::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row-major `rows x cols` grid of per-spot values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map2 {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Map2 {
    /// Returns `None` if `data` does not hold exactly `rows * cols` values.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (rows.checked_mul(cols)? == data.len()).then_some(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Copy the leading `rows x cols` block out of a wider row-major buffer.
    pub fn from_strided(rows: usize, cols: usize, stride: usize, buffer: &[f32]) -> Option<Self> {
        if cols > stride || rows.checked_mul(stride)? > buffer.len() {
            return None;
        }
        let data = buffer
            .chunks(stride)
            .take(rows)
            .flat_map(|row| row[..cols].iter().copied())
            .collect();
        Some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    /// Mean over finite cells; NaN when there are none.
    pub fn finite_mean(&self) -> f64 {
        let (sum, n) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0_f64, 0usize), |(s, n), v| (s + f64::from(*v), n + 1));
        if n == 0 {
            f64::NAN
        } else {
            sum / n as f64
        }
    }
}

/// Lenslet grid reported by `WFS_ConfigureCam`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpotGrid {
    pub spots_x: usize,
    pub spots_y: usize,
}

/// Result of an auto-exposed capture.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub exposure_ms: f64,
    pub master_gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotSummary {
    /// Lenslets with a finite centroid.
    pub detected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamGeometry {
    pub centroid_x_mm: f64,
    pub centroid_y_mm: f64,
    pub diameter_x_mm: f64,
    pub diameter_y_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotMaps {
    pub deviation_x: Map2,
    pub deviation_y: Map2,
    pub intensity: Map2,
}

impl SpotMaps {
    /// Mean spot deviation in pixels (x, y).
    pub fn mean_deviation(&self) -> (f64, f64) {
        (self.deviation_x.finite_mean(), self.deviation_y.finite_mean())
    }
}

/// Output of `WFS_CalcWavefrontStatistics`, in µm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavefrontStats {
    pub min: f64,
    pub max: f64,
    pub peak_valley: f64,
    pub mean: f64,
    pub rms: f64,
    pub weighted_rms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourierOptometric {
    pub m: f64,
    pub j0: f64,
    pub j45: f64,
    pub sphere: f64,
    pub cylinder: f64,
    pub axis_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZernikeFit {
    /// Order actually fitted (the vendor may lower it).
    pub order: i32,
    /// One coefficient per mode, mode 1 first.
    pub coefficients_um: Vec<f32>,
    /// RMS per order, order 1 first.
    pub order_rms_um: Vec<f32>,
    pub radius_of_curvature_mm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitError {
    pub mean: f64,
    pub stdev: f64,
}

/// Post-processing stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStep {
    Spots,
    BeamCentroid,
    ReferenceDeviations,
    SpotMaps,
    Wavefront,
    Statistics,
    FourierOptometric,
    ZernikeFit,
    FitError,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 9] = [
        PipelineStep::Spots,
        PipelineStep::BeamCentroid,
        PipelineStep::ReferenceDeviations,
        PipelineStep::SpotMaps,
        PipelineStep::Wavefront,
        PipelineStep::Statistics,
        PipelineStep::FourierOptometric,
        PipelineStep::ZernikeFit,
        PipelineStep::FitError,
    ];

    /// Bit position in the persisted failure mask.
    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Spots => "spots",
            PipelineStep::BeamCentroid => "beam_centroid",
            PipelineStep::ReferenceDeviations => "reference_deviations",
            PipelineStep::SpotMaps => "spot_maps",
            PipelineStep::Wavefront => "wavefront",
            PipelineStep::Statistics => "statistics",
            PipelineStep::FourierOptometric => "fourier_optometric",
            PipelineStep::ZernikeFit => "zernike_fit",
            PipelineStep::FitError => "fit_error",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: PipelineStep,
    /// Vendor call that returned the error.
    pub operation: String,
    pub status: Status,
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step<T> {
    Ok(T),
    Failed(StepFailure),
}

impl<T> Step<T> {
    pub fn from_result(
        step: PipelineStep,
        operation: &str,
        result: std::result::Result<T, Status>,
    ) -> Self {
        match result {
            Ok(value) => Step::Ok(value),
            Err(status) => Step::Failed(StepFailure {
                step,
                operation: operation.to_string(),
                status,
            }),
        }
    }

    pub fn ok(&self) -> Option<&T> {
        match self {
            Step::Ok(value) => Some(value),
            Step::Failed(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Step::Ok(_))
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Step::Ok(_) => None,
            Step::Failed(failure) => Some(failure),
        }
    }

    /// Project a scalar out of a successful step, NaN otherwise.
    pub fn value_or_nan(&self, f: impl FnOnce(&T) -> f64) -> f64 {
        self.ok().map_or(f64::NAN, f)
    }
}

/// One captured frame's results. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Position in capture order within the run, from 0.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub capture: CaptureInfo,
    pub spots: Step<SpotSummary>,
    pub beam: Step<BeamGeometry>,
    pub deviations: Step<()>,
    pub spot_maps: Step<SpotMaps>,
    pub wavefront: Step<Map2>,
    pub statistics: Step<WavefrontStats>,
    pub fourier: Step<FourierOptometric>,
    pub zernike: Step<ZernikeFit>,
    pub fit_error: Step<FitError>,
}

impl MeasurementRecord {
    pub fn failures(&self) -> Vec<&StepFailure> {
        [
            self.spots.failure(),
            self.beam.failure(),
            self.deviations.failure(),
            self.spot_maps.failure(),
            self.wavefront.failure(),
            self.statistics.failure(),
            self.fourier.failure(),
            self.zernike.failure(),
            self.fit_error.failure(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Bitmask of failed steps, see [`PipelineStep::bit`].
    pub fn failure_mask(&self) -> u32 {
        self.failures().iter().fold(0, |mask, f| mask | f.step.bit())
    }

    /// Mean spot deviation (x, y); NaN when the maps are unavailable.
    pub fn beam_deviation(&self) -> (f64, f64) {
        self.spot_maps
            .ok()
            .map_or((f64::NAN, f64::NAN), SpotMaps::mean_deviation)
    }
}

/// Append-only, capture-ordered records of one run.
///
/// Owned by the acquisition thread while the run is active and moved to the
/// controller when it ends.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    records: Vec<MeasurementRecord>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next record must carry.
    pub fn next_index(&self) -> usize {
        self.records.len()
    }

    pub fn push(&mut self, record: MeasurementRecord) {
        debug_assert_eq!(record.index, self.records.len());
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<MeasurementRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_copy_takes_leading_block() {
        // 3x4 buffer, take 2x3
        let buffer: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let map = Map2::from_strided(2, 3, 4, &buffer).unwrap();
        assert_eq!(map.as_slice(), &[0.0, 1.0, 2.0, 4.0, 5.0, 6.0]);
        assert_eq!(map.get(1, 2), Some(6.0));
        assert_eq!(map.get(2, 0), None);
        assert!(Map2::from_strided(4, 3, 4, &buffer).is_none());
        assert!(Map2::from_strided(1, 5, 4, &buffer).is_none());
    }

    #[test]
    fn finite_mean_skips_nan() {
        let map = Map2::new(1, 3, vec![1.0, f32::NAN, 3.0]).unwrap();
        assert_eq!(map.finite_mean(), 2.0);
        assert!(Map2::new(1, 1, vec![f32::NAN]).unwrap().finite_mean().is_nan());
        assert!(Map2::new(2, 2, vec![0.0; 3]).is_none());
    }

    #[test]
    fn step_bits_follow_pipeline_order() {
        let mask: u32 = PipelineStep::ALL.iter().fold(0, |m, s| m | s.bit());
        assert_eq!(mask, 0b1_1111_1111);
        assert_eq!(PipelineStep::FourierOptometric.bit(), 1 << 6);
    }

    #[test]
    fn failed_step_is_nan_not_zero() {
        let failed: Step<FitError> = Step::from_result(
            PipelineStep::FitError,
            "WFS_CalcReconstrDeviations",
            Err(Status::new(-1, "fit failed")),
        );
        assert!(failed.value_or_nan(|f| f.mean).is_nan());
        assert_eq!(failed.failure().unwrap().step, PipelineStep::FitError);

        let ok = Step::from_result(
            PipelineStep::FitError,
            "WFS_CalcReconstrDeviations",
            Ok(FitError {
                mean: 0.0,
                stdev: 0.0,
            }),
        );
        assert_eq!(ok.value_or_nan(|f| f.mean), 0.0);
    }
}
