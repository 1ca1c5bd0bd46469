//! In-memory wavefront sensor.
//!
//! `MockWfs` implements [`WfsSdk`] without hardware. It simulates an
//! externally triggered sensor: each capture either reports the idle
//! "awaiting trigger" status or produces a frame with deterministic synthetic
//! results. Faults (failing steps, hung calls, bad image quality, capture
//! errors) are scripted through the builder so tests can exercise every
//! error path, and [`MockProbe`] records which vendor calls were made.
//!
//! ```rust,ignore
//! let mock = MockWfs::new()
//!     .trigger_pattern([3, 0])          // frame 0 after 3 idle polls, frame 1 at once
//!     .max_frames(2)                    // then never triggered again
//!     .fail_step(ops::FOURIER_OPTOMETRIC, codes::FIT_FAILED);
//! let probe = mock.probe();
//! ```

use crate::camera::CameraModel;
use crate::config::PupilConfig;
use crate::measurement::{
    BeamGeometry, CaptureInfo, FitError, FourierOptometric, Map2, SpotGrid, WavefrontStats,
    ZernikeFit,
};
use crate::sdk::{
    ops, DeviceStatus, InstrumentInfo, InstrumentListEntry, MlaInfo, SdkResult, Status, WfsSdk,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Status codes returned by the mock, with the texts it reports for them.
pub mod codes {
    pub const INVALID_PARAMETER: i32 = 0xBFFC_0900_u32 as i32;
    pub const NOT_CONFIGURED: i32 = 0xBFFC_0904_u32 as i32;
    pub const NO_SPOTS: i32 = 0xBFFC_0910_u32 as i32;
    pub const FIT_FAILED: i32 = 0xBFFC_0912_u32 as i32;
    pub const CAPTURE_FAILED: i32 = 0xBFFC_0920_u32 as i32;
    pub const NOT_OPEN: i32 = 0xBFFF_000E_u32 as i32;
    pub const RESOURCE_BUSY: i32 = 0xBFFF_0072_u32 as i32;

    pub(super) fn describe(code: i32) -> &'static str {
        match code {
            INVALID_PARAMETER => "Parameter out of range",
            NOT_CONFIGURED => "Camera not configured",
            NO_SPOTS => "Not enough spots detected",
            FIT_FAILED => "Zernike fit failed",
            CAPTURE_FAILED => "Image capture failed",
            NOT_OPEN => "Invalid session handle",
            RESOURCE_BUSY => "Resource is locked by another session",
            _ => "Unknown error",
        }
    }
}

/// Shared view of what a mock was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    inner: Arc<Mutex<ProbeState>>,
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<&'static str>,
    frames: usize,
    closed: usize,
    pupil: Option<PupilConfig>,
    resolution_index: Option<i32>,
}

impl MockProbe {
    /// Every vendor call in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| **c == operation)
            .count()
    }

    /// Frames actually produced (triggered captures).
    pub fn frames(&self) -> usize {
        self.inner.lock().frames
    }

    /// Successful `WFS_close` calls.
    pub fn closed(&self) -> usize {
        self.inner.lock().closed
    }

    /// Last pupil accepted by `WFS_SetPupil`.
    pub fn pupil(&self) -> Option<PupilConfig> {
        self.inner.lock().pupil.clone()
    }

    /// Last resolution accepted by `WFS_ConfigureCam`.
    pub fn resolution_index(&self) -> Option<i32> {
        self.inner.lock().resolution_index
    }

    pub fn clear(&self) {
        self.inner.lock().calls.clear();
    }
}

pub struct MockWfs {
    instruments: Vec<InstrumentListEntry>,
    mlas: Vec<MlaInfo>,
    opened: Option<InstrumentListEntry>,
    grid: SpotGrid,
    status: DeviceStatus,
    /// Idle polls before each frame, front first.
    trigger_waits: VecDeque<u32>,
    current_wait: Option<u32>,
    max_frames: Option<usize>,
    failing: HashMap<&'static str, i32>,
    hangs: HashMap<&'static str, Duration>,
    quality_fault_on: Option<usize>,
    capture_error_on: Option<(usize, i32)>,
    probe: MockProbe,
}

impl Default for MockWfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWfs {
    /// One free WFS20 that triggers on every capture.
    pub fn new() -> Self {
        Self {
            instruments: vec![InstrumentListEntry {
                index: 0,
                device_id: wfs_sys::DEVICE_OFFSET_WFS20 | 0x01,
                in_use: false,
                name: "WFS20-5C".into(),
                serial: "M00412345".into(),
                resource: "USB::0x1313::0x0000::1".into(),
            }],
            mlas: vec![
                MlaInfo {
                    index: 0,
                    name: "MLA150-5C".into(),
                    cam_pitch_um: 5.0,
                    lenslet_pitch_um: 150.0,
                    spot_offset_x: 0.0,
                    spot_offset_y: 0.0,
                    lenslet_f_um: 5200.0,
                    grd_corr_0: 1.0,
                    grd_corr_45: 1.0,
                },
                MlaInfo {
                    index: 1,
                    name: "MLA300-14AR".into(),
                    cam_pitch_um: 5.0,
                    lenslet_pitch_um: 300.0,
                    spot_offset_x: 0.0,
                    spot_offset_y: 0.0,
                    lenslet_f_um: 14200.0,
                    grd_corr_0: 1.0,
                    grd_corr_45: 1.0,
                },
            ],
            opened: None,
            grid: SpotGrid::default(),
            status: DeviceStatus::empty(),
            trigger_waits: VecDeque::new(),
            current_wait: None,
            max_frames: None,
            failing: HashMap::new(),
            hangs: HashMap::new(),
            quality_fault_on: None,
            capture_error_on: None,
            probe: MockProbe::default(),
        }
    }

    pub fn with_instruments(mut self, instruments: Vec<InstrumentListEntry>) -> Self {
        self.instruments = instruments;
        self
    }

    /// Idle polls before each successive frame; frames beyond the pattern trigger at once.
    pub fn trigger_pattern(mut self, waits: impl IntoIterator<Item = u32>) -> Self {
        self.trigger_waits = waits.into_iter().collect();
        self
    }

    /// Stop triggering after `frames` frames.
    pub fn max_frames(mut self, frames: usize) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn never_triggered(self) -> Self {
        self.max_frames(0)
    }

    /// Make every call of `operation` fail with `code`.
    pub fn fail_step(mut self, operation: &'static str, code: i32) -> Self {
        self.failing.insert(operation, code);
        self
    }

    /// Make every call of `operation` block for `duration` first.
    pub fn hang_on(mut self, operation: &'static str, duration: Duration) -> Self {
        self.hangs.insert(operation, duration);
        self
    }

    /// Report power-too-high on frame `frame` (0-based).
    pub fn image_quality_fault_on(mut self, frame: usize) -> Self {
        self.quality_fault_on = Some(frame);
        self
    }

    /// Fail the capture of frame `frame` with `code` without the trigger bit.
    pub fn capture_error_on(mut self, frame: usize, code: i32) -> Self {
        self.capture_error_on = Some((frame, code));
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn enter(&mut self, operation: &'static str) -> SdkResult<()> {
        self.probe.inner.lock().calls.push(operation);
        if let Some(duration) = self.hangs.get(operation) {
            std::thread::sleep(*duration);
        }
        match self.failing.get(operation) {
            Some(code) => Err(status(*code)),
            None => Ok(()),
        }
    }

    fn enter_open(&mut self, operation: &'static str) -> SdkResult<()> {
        self.enter(operation)?;
        if self.opened.is_none() {
            return Err(status(codes::NOT_OPEN));
        }
        Ok(())
    }

    fn frame(&self) -> usize {
        self.probe.inner.lock().frames
    }

    /// Deterministic per-frame value.
    fn wobble(&self, scale: f64) -> f64 {
        let frame = self.frame() as f64;
        scale * (1.0 + 0.1 * (frame * 0.7).sin())
    }

    fn map(&self, f: impl Fn(usize, usize) -> f32) -> Map2 {
        let SpotGrid { spots_x, spots_y } = self.grid;
        let data = (0..spots_y)
            .flat_map(|r| (0..spots_x).map(move |c| (r, c)))
            .map(|(r, c)| f(r, c))
            .collect();
        Map2::new(spots_y, spots_x, data).unwrap_or_else(|| Map2::zeros(spots_y, spots_x))
    }
}

fn status(code: i32) -> Status {
    Status::new(code, codes::describe(code))
}

impl WfsSdk for MockWfs {
    fn instrument_count(&mut self) -> SdkResult<i32> {
        self.enter(ops::INSTRUMENT_LIST_LEN)?;
        Ok(self.instruments.len() as i32)
    }

    fn instrument_list_info(&mut self, index: i32) -> SdkResult<InstrumentListEntry> {
        self.enter(ops::INSTRUMENT_LIST_INFO)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.instruments.get(i))
            .cloned()
            .ok_or_else(|| status(codes::INVALID_PARAMETER))
    }

    fn init(&mut self, resource: &str, _id_query: bool, _reset: bool) -> SdkResult<()> {
        self.enter(ops::INIT)?;
        let entry = self
            .instruments
            .iter()
            .find(|e| e.resource == resource)
            .cloned()
            .ok_or_else(|| status(codes::INVALID_PARAMETER))?;
        if entry.in_use {
            return Err(status(codes::RESOURCE_BUSY));
        }
        self.opened = Some(entry);
        self.status = DeviceStatus::empty();
        Ok(())
    }

    fn close(&mut self) -> SdkResult<()> {
        self.enter(ops::CLOSE)?;
        if self.opened.take().is_some() {
            self.probe.inner.lock().closed += 1;
        }
        Ok(())
    }

    fn revision(&mut self) -> SdkResult<(String, String)> {
        self.enter_open(ops::REVISION_QUERY)?;
        Ok(("5.4".into(), "1.12".into()))
    }

    fn instrument_info(&mut self) -> SdkResult<InstrumentInfo> {
        self.enter_open(ops::INSTRUMENT_INFO)?;
        let entry = self.opened.clone().ok_or_else(|| status(codes::NOT_OPEN))?;
        Ok(InstrumentInfo {
            manufacturer: "Thorlabs GmbH".into(),
            name: entry.name,
            serial_wfs: entry.serial,
            serial_camera: "CAM000001".into(),
            driver_revision: String::new(),
            firmware_revision: String::new(),
        })
    }

    fn mla_count(&mut self) -> SdkResult<i32> {
        self.enter_open(ops::MLA_COUNT)?;
        Ok(self.mlas.len() as i32)
    }

    fn mla_data(&mut self, index: i32) -> SdkResult<MlaInfo> {
        self.enter_open(ops::MLA_DATA)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| self.mlas.get(i))
            .cloned()
            .ok_or_else(|| status(codes::INVALID_PARAMETER))
    }

    fn select_mla(&mut self, index: i32) -> SdkResult<()> {
        self.enter_open(ops::SELECT_MLA)?;
        if usize::try_from(index).map_or(true, |i| i >= self.mlas.len()) {
            return Err(status(codes::INVALID_PARAMETER));
        }
        Ok(())
    }

    fn configure_cam(&mut self, pixel_format: i32, resolution_index: i32) -> SdkResult<SpotGrid> {
        self.enter_open(ops::CONFIGURE_CAM)?;
        if pixel_format != wfs_sys::PIXEL_FORMAT_MONO8 && pixel_format != wfs_sys::PIXEL_FORMAT_MONO16 {
            return Err(status(codes::INVALID_PARAMETER));
        }
        let device_id = self.opened.as_ref().map_or(0, |e| e.device_id);
        let resolution = CameraModel::from_device_id(device_id)
            .resolution(resolution_index)
            .ok_or_else(|| status(codes::INVALID_PARAMETER))?;
        // roughly one lenslet per 27 pixels at 5 µm pitch
        self.grid = SpotGrid {
            spots_x: (resolution.width as usize / 27).min(wfs_sys::MAX_SPOTS_X),
            spots_y: (resolution.height as usize / 27).min(wfs_sys::MAX_SPOTS_Y),
        };
        self.status = DeviceStatus::CONFIGURED;
        self.probe.inner.lock().resolution_index = Some(resolution_index);
        Ok(self.grid)
    }

    fn set_trigger_mode(&mut self, mode: i32) -> SdkResult<()> {
        self.enter_open(ops::SET_TRIGGER_MODE)?;
        if !(wfs_sys::WFS_HW_TRIGGER_OFF..=wfs_sys::WFS_SW_TRIGGER).contains(&mode) {
            return Err(status(codes::INVALID_PARAMETER));
        }
        Ok(())
    }

    fn set_reference_plane(&mut self, plane: i32) -> SdkResult<()> {
        self.enter_open(ops::SET_REFERENCE_PLANE)?;
        if plane != wfs_sys::WFS_REF_INTERNAL && plane != wfs_sys::WFS_REF_USER {
            return Err(status(codes::INVALID_PARAMETER));
        }
        Ok(())
    }

    fn set_pupil(&mut self, pupil: &PupilConfig) -> SdkResult<()> {
        self.enter_open(ops::SET_PUPIL)?;
        self.status |= DeviceStatus::PUPIL_DEFINED;
        self.probe.inner.lock().pupil = Some(pupil.clone());
        Ok(())
    }

    fn take_spotfield_image_auto_expos(&mut self) -> SdkResult<CaptureInfo> {
        self.enter_open(ops::TAKE_SPOTFIELD_IMAGE)?;
        if !self.status.contains(DeviceStatus::CONFIGURED) {
            return Err(status(codes::NOT_CONFIGURED));
        }

        let frame = self.frame();
        let exhausted = self.max_frames.is_some_and(|max| frame >= max);
        let wait = match self.current_wait {
            Some(wait) => wait,
            None => self.trigger_waits.pop_front().unwrap_or(0),
        };
        if exhausted || wait > 0 {
            self.current_wait = Some(wait.saturating_sub(1));
            self.status = DeviceStatus::IDLE_UNTRIGGERED;
            return Ok(CaptureInfo::default());
        }
        self.current_wait = None;

        if let Some((on, code)) = self.capture_error_on {
            if on == frame {
                self.status = DeviceStatus::CONFIGURED | DeviceStatus::PUPIL_DEFINED;
                return Err(status(code));
            }
        }

        self.status = DeviceStatus::CONFIGURED | DeviceStatus::PUPIL_DEFINED;
        if self.quality_fault_on == Some(frame) {
            self.status |= DeviceStatus::POWER_TOO_HIGH;
        }
        let info = CaptureInfo {
            exposure_ms: self.wobble(0.5),
            master_gain: 1.0,
        };
        self.probe.inner.lock().frames += 1;
        Ok(info)
    }

    fn status(&mut self) -> SdkResult<DeviceStatus> {
        self.enter_open(ops::GET_STATUS)?;
        Ok(self.status)
    }

    fn calc_spots_centr_dia_intens(
        &mut self,
        _dynamic_noise_cut: i32,
        _calculate_diameters: i32,
    ) -> SdkResult<()> {
        self.enter_open(ops::CALC_SPOTS)
    }

    fn spot_centroids(&mut self) -> SdkResult<(Map2, Map2)> {
        self.enter_open(ops::SPOT_CENTROIDS)?;
        let x = self.map(|_, c| (c as f32 + 0.5) * 27.0);
        let y = self.map(|r, _| (r as f32 + 0.5) * 27.0);
        Ok((x, y))
    }

    fn calc_beam_centroid_dia(&mut self) -> SdkResult<BeamGeometry> {
        self.enter_open(ops::BEAM_CENTROID)?;
        Ok(BeamGeometry {
            centroid_x_mm: self.wobble(0.12),
            centroid_y_mm: self.wobble(-0.08),
            diameter_x_mm: self.wobble(4.1),
            diameter_y_mm: self.wobble(4.0),
        })
    }

    fn calc_spot_to_reference_deviations(&mut self, _cancel_tilt: i32) -> SdkResult<()> {
        self.enter_open(ops::REFERENCE_DEVIATIONS)
    }

    fn spot_deviations(&mut self) -> SdkResult<(Map2, Map2)> {
        self.enter_open(ops::SPOT_DEVIATIONS)?;
        let scale = self.wobble(0.02) as f32;
        let x = self.map(|r, c| scale * (c as f32 - r as f32));
        let y = self.map(|r, c| scale * (r as f32 + c as f32) * 0.5);
        Ok((x, y))
    }

    fn spot_intensities(&mut self) -> SdkResult<Map2> {
        self.enter_open(ops::SPOT_INTENSITIES)?;
        Ok(self.map(|r, c| 200.0 - (r + c) as f32))
    }

    fn calc_wavefront(&mut self, _wavefront_type: i32, _limit_to_pupil: bool) -> SdkResult<Map2> {
        self.enter_open(ops::CALC_WAVEFRONT)?;
        let scale = self.wobble(0.001) as f32;
        let (cx, cy) = (self.grid.spots_x as f32 / 2.0, self.grid.spots_y as f32 / 2.0);
        Ok(self.map(|r, c| {
            let (dx, dy) = (c as f32 - cx, r as f32 - cy);
            scale * (dx * dx + dy * dy)
        }))
    }

    fn calc_wavefront_statistics(&mut self) -> SdkResult<WavefrontStats> {
        self.enter_open(ops::WAVEFRONT_STATISTICS)?;
        let max = self.wobble(0.4);
        Ok(WavefrontStats {
            min: -max / 2.0,
            max,
            peak_valley: max * 1.5,
            mean: 0.0,
            rms: max / 4.0,
            weighted_rms: max / 5.0,
        })
    }

    fn calc_fourier_optometric(
        &mut self,
        _zernike_order: i32,
        _fourier_order: i32,
    ) -> SdkResult<FourierOptometric> {
        self.enter_open(ops::FOURIER_OPTOMETRIC)?;
        Ok(FourierOptometric {
            m: self.wobble(0.05),
            j0: 0.01,
            j45: -0.01,
            sphere: self.wobble(0.05),
            cylinder: -0.02,
            axis_deg: 45.0,
        })
    }

    fn zernike_lsf(&mut self, zernike_order: i32) -> SdkResult<ZernikeFit> {
        self.enter_open(ops::ZERNIKE_LSF)?;
        let order = usize::try_from(zernike_order)
            .ok()
            .filter(|o| (1..wfs_sys::ZERNIKE_MODES_PER_ORDER.len()).contains(o))
            .ok_or_else(|| status(codes::INVALID_PARAMETER))?;
        let modes = wfs_sys::ZERNIKE_MODES_PER_ORDER[order];
        let scale = self.wobble(0.01) as f32;
        Ok(ZernikeFit {
            order: zernike_order,
            coefficients_um: (0..modes).map(|j| scale / (j as f32 + 1.0)).collect(),
            order_rms_um: (0..order).map(|o| scale * (o as f32 + 1.0)).collect(),
            radius_of_curvature_mm: self.wobble(1500.0),
        })
    }

    fn calc_reconstr_deviations(
        &mut self,
        _zernike_order: i32,
        _spherical_reference: i32,
    ) -> SdkResult<FitError> {
        self.enter_open(ops::RECONSTR_DEVIATIONS)?;
        Ok(FitError {
            mean: self.wobble(0.003),
            stdev: 0.001,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> MockWfs {
        let mut mock = MockWfs::new();
        mock.init("USB::0x1313::0x0000::1", false, false).unwrap();
        mock.configure_cam(wfs_sys::PIXEL_FORMAT_MONO8, 1).unwrap();
        mock
    }

    #[test]
    fn trigger_pattern_then_exhaustion() {
        let mut mock = opened().trigger_pattern([2]).max_frames(1);
        for _ in 0..2 {
            mock.take_spotfield_image_auto_expos().unwrap();
            assert!(mock.status().unwrap().awaiting_trigger());
        }
        mock.take_spotfield_image_auto_expos().unwrap();
        assert!(!mock.status().unwrap().awaiting_trigger());
        assert_eq!(mock.probe().frames(), 1);
        mock.take_spotfield_image_auto_expos().unwrap();
        assert!(mock.status().unwrap().awaiting_trigger());
    }

    #[test]
    fn grid_follows_resolution() {
        let mut mock = opened();
        let grid = mock.configure_cam(wfs_sys::PIXEL_FORMAT_MONO8, 0).unwrap();
        // WFS20 1440x1080
        assert_eq!(grid, SpotGrid { spots_x: 50, spots_y: 40 });
        assert!(mock.configure_cam(wfs_sys::PIXEL_FORMAT_MONO8, 10).is_err());
        let fit = mock.zernike_lsf(4).unwrap();
        assert_eq!(fit.coefficients_um.len(), 15);
        assert_eq!(fit.order_rms_um.len(), 4);
    }

    #[test]
    fn scripted_failures_carry_text() {
        let mut mock = opened().fail_step(ops::FOURIER_OPTOMETRIC, codes::FIT_FAILED);
        let err = mock.calc_fourier_optometric(4, 2).unwrap_err();
        assert_eq!(err.code, codes::FIT_FAILED);
        assert_eq!(err.message, "Zernike fit failed");
        assert!(mock.zernike_lsf(4).is_ok());
    }

    #[test]
    fn calls_need_open_session() {
        let mut mock = MockWfs::new();
        assert_eq!(mock.status().unwrap_err().code, codes::NOT_OPEN);
        mock.close().unwrap();
        assert_eq!(mock.probe().closed(), 0);
    }
}
