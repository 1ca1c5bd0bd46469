//! The vendor call surface as a trait.
//!
//! [`WfsSdk`] mirrors the `WFS_*` functions this driver uses, one method per
//! call, with output parameters turned into return values. Every method
//! returns `Err(Status)` for a non-zero vendor status, with the message
//! already looked up through `WFS_error_message`.
//!
//! Implementations:
//! - `FfiSdk` (feature `hardware`): the real driver library
//! - `MockWfs` (feature `mock`): in-memory instrument for tests and demos
//!
//! Implementations are driven from a single worker thread (see
//! [`crate::executor::SdkExecutor`]) and only need to be `Send`.

use crate::config::PupilConfig;
use crate::measurement::{
    BeamGeometry, CaptureInfo, FitError, FourierOptometric, Map2, SpotGrid, WavefrontStats,
    ZernikeFit,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor function names, used as operation labels in errors and logs.
pub mod ops {
    pub const INSTRUMENT_LIST_LEN: &str = "WFS_GetInstrumentListLen";
    pub const INSTRUMENT_LIST_INFO: &str = "WFS_GetInstrumentListInfo";
    pub const INIT: &str = "WFS_init";
    pub const CLOSE: &str = "WFS_close";
    pub const REVISION_QUERY: &str = "WFS_revision_query";
    pub const INSTRUMENT_INFO: &str = "WFS_GetInstrumentInfo";
    pub const MLA_COUNT: &str = "WFS_GetMlaCount";
    pub const MLA_DATA: &str = "WFS_GetMlaData";
    pub const SELECT_MLA: &str = "WFS_SelectMla";
    pub const CONFIGURE_CAM: &str = "WFS_ConfigureCam";
    pub const SET_TRIGGER_MODE: &str = "WFS_SetTriggerMode";
    pub const SET_REFERENCE_PLANE: &str = "WFS_SetReferencePlane";
    pub const SET_PUPIL: &str = "WFS_SetPupil";
    pub const TAKE_SPOTFIELD_IMAGE: &str = "WFS_TakeSpotfieldImageAutoExpos";
    pub const GET_STATUS: &str = "WFS_GetStatus";
    pub const CALC_SPOTS: &str = "WFS_CalcSpotsCentrDiaIntens";
    pub const SPOT_CENTROIDS: &str = "WFS_GetSpotCentroids";
    pub const BEAM_CENTROID: &str = "WFS_CalcBeamCentroidDia";
    pub const REFERENCE_DEVIATIONS: &str = "WFS_CalcSpotToReferenceDeviations";
    pub const SPOT_DEVIATIONS: &str = "WFS_GetSpotDeviations";
    pub const SPOT_INTENSITIES: &str = "WFS_GetSpotIntensities";
    pub const CALC_WAVEFRONT: &str = "WFS_CalcWavefront";
    pub const WAVEFRONT_STATISTICS: &str = "WFS_CalcWavefrontStatistics";
    pub const FOURIER_OPTOMETRIC: &str = "WFS_CalcFourierOptometric";
    pub const ZERNIKE_LSF: &str = "WFS_ZernikeLsf";
    pub const RECONSTR_DEVIATIONS: &str = "WFS_CalcReconstrDeviations";
}

/// Result of a single vendor call.
pub type SdkResult<T> = std::result::Result<T, Status>;

/// A non-zero vendor status code with its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.message, self.code)
    }
}

bitflags! {
    /// Device status word from `WFS_GetStatus`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceStatus: u32 {
        const CONNECTION_LOST = wfs_sys::WFS_STATBIT_CON;
        const POWER_TOO_HIGH = wfs_sys::WFS_STATBIT_PTH;
        const POWER_TOO_LOW = wfs_sys::WFS_STATBIT_PTL;
        const HIGH_AMBIENT_LIGHT = wfs_sys::WFS_STATBIT_HAL;
        const SPOT_CONTRAST_LOW = wfs_sys::WFS_STATBIT_SCL;
        const ZERNIKE_FIT_LOW = wfs_sys::WFS_STATBIT_ZFL;
        const ZERNIKE_FIT_HIGH = wfs_sys::WFS_STATBIT_ZFH;
        const AWAITING_TRIGGER = wfs_sys::WFS_STATBIT_ATR;
        const CONFIGURED = wfs_sys::WFS_STATBIT_CFG;
        const PUPIL_DEFINED = wfs_sys::WFS_STATBIT_PUD;
        const SPOTS_CHANGED = wfs_sys::WFS_STATBIT_SPC;
        const RECONSTRUCTED_AVAILABLE = wfs_sys::WFS_STATBIT_RDA;
        const USER_REFERENCE = wfs_sys::WFS_STATBIT_URF;
        const HIGHSPEED = wfs_sys::WFS_STATBIT_HSP;
        const MISMATCHED_CENTROIDS = wfs_sys::WFS_STATBIT_MIS;
        const LOW_SPOT_COUNT = wfs_sys::WFS_STATBIT_LOS;
        const PUPIL_BADLY_FILLED = wfs_sys::WFS_STATBIT_FIL;
    }
}

impl DeviceStatus {
    /// Status word the sensor reports while armed and idle without a trigger:
    /// configured, pupil defined, spots changed, no contrast.
    pub const IDLE_UNTRIGGERED: DeviceStatus = DeviceStatus::CONFIGURED
        .union(DeviceStatus::PUPIL_DEFINED)
        .union(DeviceStatus::SPOTS_CHANGED)
        .union(DeviceStatus::SPOT_CONTRAST_LOW);

    /// Bits that make a captured image unusable.
    pub const IMAGE_QUALITY: DeviceStatus = DeviceStatus::POWER_TOO_HIGH
        .union(DeviceStatus::POWER_TOO_LOW)
        .union(DeviceStatus::HIGH_AMBIENT_LIGHT);

    /// No frame has been triggered yet.
    pub fn awaiting_trigger(self) -> bool {
        self.contains(DeviceStatus::AWAITING_TRIGGER) || self == DeviceStatus::IDLE_UNTRIGGERED
    }

    pub fn image_unusable(self) -> bool {
        self.intersects(DeviceStatus::IMAGE_QUALITY)
    }
}

/// One row of the instrument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentListEntry {
    pub index: i32,
    pub device_id: i32,
    pub in_use: bool,
    pub name: String,
    pub serial: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub manufacturer: String,
    pub name: String,
    pub serial_wfs: String,
    pub serial_camera: String,
    pub driver_revision: String,
    pub firmware_revision: String,
}

/// Micro-lens array calibration data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlaInfo {
    pub index: i32,
    pub name: String,
    pub cam_pitch_um: f64,
    pub lenslet_pitch_um: f64,
    pub spot_offset_x: f64,
    pub spot_offset_y: f64,
    pub lenslet_f_um: f64,
    pub grd_corr_0: f64,
    pub grd_corr_45: f64,
}

/// The vendor functions used by this driver.
pub trait WfsSdk: Send {
    // --- discovery and lifecycle -------------------------------------------
    fn instrument_count(&mut self) -> SdkResult<i32>;
    fn instrument_list_info(&mut self, index: i32) -> SdkResult<InstrumentListEntry>;
    /// `WFS_init`; the backend keeps the handle.
    fn init(&mut self, resource: &str, id_query: bool, reset: bool) -> SdkResult<()>;
    /// `WFS_close`; closing an unopened backend is a no-op.
    fn close(&mut self) -> SdkResult<()>;
    fn revision(&mut self) -> SdkResult<(String, String)>;
    fn instrument_info(&mut self) -> SdkResult<InstrumentInfo>;

    // --- micro-lens arrays -------------------------------------------------
    fn mla_count(&mut self) -> SdkResult<i32>;
    fn mla_data(&mut self, index: i32) -> SdkResult<MlaInfo>;
    fn select_mla(&mut self, index: i32) -> SdkResult<()>;

    // --- configuration -----------------------------------------------------
    fn configure_cam(&mut self, pixel_format: i32, resolution_index: i32) -> SdkResult<SpotGrid>;
    fn set_trigger_mode(&mut self, mode: i32) -> SdkResult<()>;
    fn set_reference_plane(&mut self, plane: i32) -> SdkResult<()>;
    fn set_pupil(&mut self, pupil: &PupilConfig) -> SdkResult<()>;

    // --- capture -----------------------------------------------------------
    fn take_spotfield_image_auto_expos(&mut self) -> SdkResult<CaptureInfo>;
    fn status(&mut self) -> SdkResult<DeviceStatus>;

    // --- processing --------------------------------------------------------
    fn calc_spots_centr_dia_intens(
        &mut self,
        dynamic_noise_cut: i32,
        calculate_diameters: i32,
    ) -> SdkResult<()>;
    fn spot_centroids(&mut self) -> SdkResult<(Map2, Map2)>;
    fn calc_beam_centroid_dia(&mut self) -> SdkResult<BeamGeometry>;
    fn calc_spot_to_reference_deviations(&mut self, cancel_tilt: i32) -> SdkResult<()>;
    fn spot_deviations(&mut self) -> SdkResult<(Map2, Map2)>;
    fn spot_intensities(&mut self) -> SdkResult<Map2>;
    fn calc_wavefront(&mut self, wavefront_type: i32, limit_to_pupil: bool) -> SdkResult<Map2>;
    fn calc_wavefront_statistics(&mut self) -> SdkResult<WavefrontStats>;
    fn calc_fourier_optometric(
        &mut self,
        zernike_order: i32,
        fourier_order: i32,
    ) -> SdkResult<FourierOptometric>;
    fn zernike_lsf(&mut self, zernike_order: i32) -> SdkResult<ZernikeFit>;
    fn calc_reconstr_deviations(
        &mut self,
        zernike_order: i32,
        spherical_reference: i32,
    ) -> SdkResult<FitError>;
}
