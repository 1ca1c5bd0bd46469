//! Low-level FFI declarations for the Thorlabs Wavefront Sensor driver.
//!
//! This crate provides raw, unsafe bindings to `WFS_64.dll` / `WFS_32.dll`,
//! the VISA-style instrument driver shipped with Thorlabs WFS10/20/30/40 and
//! WFS150/300 Shack-Hartmann sensors.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `daq-driver-thorlabs-wfs` crate instead.
//!
//! # Features
//!
//! - `wfs-sdk`: declare and link the vendor functions. Without this feature
//!   only the constants below are available, so dependent crates build on
//!   machines without the driver installed.
//!
//! # Array layout
//!
//! Spot arrays are `float[MAX_SPOTS_Y][MAX_SPOTS_X]` row-major. Zernike arrays
//! are indexed from 1, so buffers are `MAX_ZERNIKE_MODES + 1` long and index 0
//! is unused.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::all)]

pub type ViStatus = libc::c_long;
pub type ViSession = libc::c_ulong;
pub type ViBoolean = libc::c_ushort;
pub type ViInt32 = libc::c_long;
pub type ViReal32 = libc::c_float;
pub type ViReal64 = libc::c_double;
pub type ViChar = libc::c_char;

pub const VI_SUCCESS: ViStatus = 0;
pub const VI_NULL: ViSession = 0;
pub const VI_TRUE: ViBoolean = 1;
pub const VI_FALSE: ViBoolean = 0;

// =============================================================================
// Buffer sizes
// =============================================================================

/// General string buffer size for names, serials and resource strings.
pub const WFS_BUFFER_SIZE: usize = 256;
/// Size of the buffer filled by `WFS_error_message`.
pub const WFS_ERR_DESCR_BUFFER_SIZE: usize = 512;

pub const MAX_SPOTS_X: usize = 50;
pub const MAX_SPOTS_Y: usize = 40;

pub const MIN_ZERNIKE_ORDERS: i32 = 2;
pub const MAX_ZERNIKE_ORDERS: i32 = 10;
pub const MAX_ZERNIKE_MODES: usize = 66;

/// Number of Zernike modes fitted up to and including each order (index = order).
pub const ZERNIKE_MODES_PER_ORDER: [usize; 11] = [1, 3, 6, 10, 15, 21, 28, 36, 45, 55, 66];

// =============================================================================
// Device identification
// =============================================================================

pub const DEVICE_OFFSET_WFS10: i32 = 0x00100;
pub const DEVICE_OFFSET_WFS20: i32 = 0x00200;
pub const DEVICE_OFFSET_WFS30: i32 = 0x00400;
pub const DEVICE_OFFSET_WFS40: i32 = 0x00800;

// =============================================================================
// Camera and measurement settings
// =============================================================================

pub const PIXEL_FORMAT_MONO8: i32 = 0;
pub const PIXEL_FORMAT_MONO16: i32 = 1;

pub const WFS_HW_TRIGGER_OFF: i32 = 0;
pub const WFS_HW_TRIGGER_HL: i32 = 1;
pub const WFS_HW_TRIGGER_LH: i32 = 2;
pub const WFS_SW_TRIGGER: i32 = 3;

pub const WFS_REF_INTERNAL: i32 = 0;
pub const WFS_REF_USER: i32 = 1;

pub const WAVEFRONT_MEAS: i32 = 0;
pub const WAVEFRONT_REC: i32 = 1;
pub const WAVEFRONT_DIFF: i32 = 2;

// =============================================================================
// Device status bits (WFS_GetStatus)
// =============================================================================

/// USB connection lost.
pub const WFS_STATBIT_CON: u32 = 0x0000_0001;
/// Power too high (camera saturated).
pub const WFS_STATBIT_PTH: u32 = 0x0000_0002;
/// Power too low.
pub const WFS_STATBIT_PTL: u32 = 0x0000_0004;
/// High ambient light.
pub const WFS_STATBIT_HAL: u32 = 0x0000_0008;
/// Spot contrast too low.
pub const WFS_STATBIT_SCL: u32 = 0x0000_0010;
/// Zernike fit failed, too few spots.
pub const WFS_STATBIT_ZFL: u32 = 0x0000_0020;
/// Zernike fit failed, too many spots.
pub const WFS_STATBIT_ZFH: u32 = 0x0000_0040;
/// Camera is still awaiting a trigger.
pub const WFS_STATBIT_ATR: u32 = 0x0000_0080;
/// Camera is configured.
pub const WFS_STATBIT_CFG: u32 = 0x0000_0100;
/// Pupil is defined.
pub const WFS_STATBIT_PUD: u32 = 0x0000_0200;
/// Number of spots, pupil or AOI changed.
pub const WFS_STATBIT_SPC: u32 = 0x0000_0400;
/// Reconstructed spot deviations available.
pub const WFS_STATBIT_RDA: u32 = 0x0000_0800;
/// User reference data available.
pub const WFS_STATBIT_URF: u32 = 0x0000_1000;
/// Camera is in highspeed mode.
pub const WFS_STATBIT_HSP: u32 = 0x0000_2000;
/// Mismatched centroids in highspeed mode.
pub const WFS_STATBIT_MIS: u32 = 0x0000_4000;
/// Low number of detected spots.
pub const WFS_STATBIT_LOS: u32 = 0x0000_8000;
/// Pupil badly filled with spots.
pub const WFS_STATBIT_FIL: u32 = 0x0001_0000;

// =============================================================================
// Vendor functions
// =============================================================================

#[cfg(feature = "wfs-sdk")]
#[cfg_attr(target_pointer_width = "64", link(name = "WFS_64"))]
#[cfg_attr(not(target_pointer_width = "64"), link(name = "WFS_32"))]
extern "system" {
    pub fn WFS_GetInstrumentListLen(handle: ViSession, instrument_count: *mut ViInt32) -> ViStatus;

    pub fn WFS_GetInstrumentListInfo(
        handle: ViSession,
        instrument_list_index: ViInt32,
        device_id: *mut ViInt32,
        in_use: *mut ViInt32,
        instrument_name: *mut ViChar,
        instrument_sn: *mut ViChar,
        resource_name: *mut ViChar,
    ) -> ViStatus;

    pub fn WFS_init(
        resource_name: *const ViChar,
        id_query: ViBoolean,
        reset_device: ViBoolean,
        handle: *mut ViSession,
    ) -> ViStatus;

    pub fn WFS_close(handle: ViSession) -> ViStatus;

    pub fn WFS_error_message(handle: ViSession, error_code: ViStatus, message: *mut ViChar) -> ViStatus;

    pub fn WFS_revision_query(
        handle: ViSession,
        driver_revision: *mut ViChar,
        firmware_revision: *mut ViChar,
    ) -> ViStatus;

    pub fn WFS_GetInstrumentInfo(
        handle: ViSession,
        manufacturer_name: *mut ViChar,
        instrument_name: *mut ViChar,
        serial_number_wfs: *mut ViChar,
        serial_number_camera: *mut ViChar,
    ) -> ViStatus;

    pub fn WFS_GetMlaCount(handle: ViSession, mla_count: *mut ViInt32) -> ViStatus;

    pub fn WFS_GetMlaData(
        handle: ViSession,
        mla_index: ViInt32,
        mla_name: *mut ViChar,
        cam_pitch_um: *mut ViReal64,
        lenslet_pitch_um: *mut ViReal64,
        spot_offset_x: *mut ViReal64,
        spot_offset_y: *mut ViReal64,
        lenslet_f_um: *mut ViReal64,
        grd_corr_0: *mut ViReal64,
        grd_corr_45: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_SelectMla(handle: ViSession, mla_index: ViInt32) -> ViStatus;

    pub fn WFS_ConfigureCam(
        handle: ViSession,
        pixel_format: ViInt32,
        cam_resol_index: ViInt32,
        spots_x: *mut ViInt32,
        spots_y: *mut ViInt32,
    ) -> ViStatus;

    pub fn WFS_SetTriggerMode(handle: ViSession, trigger_mode: ViInt32) -> ViStatus;

    pub fn WFS_SetReferencePlane(handle: ViSession, reference_index: ViInt32) -> ViStatus;

    pub fn WFS_SetPupil(
        handle: ViSession,
        pupil_center_x_mm: ViReal64,
        pupil_center_y_mm: ViReal64,
        pupil_diameter_x_mm: ViReal64,
        pupil_diameter_y_mm: ViReal64,
    ) -> ViStatus;

    pub fn WFS_TakeSpotfieldImageAutoExpos(
        handle: ViSession,
        exposure_time_act: *mut ViReal64,
        master_gain_act: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_GetStatus(handle: ViSession, device_status: *mut ViInt32) -> ViStatus;

    pub fn WFS_CalcSpotsCentrDiaIntens(
        handle: ViSession,
        dynamic_noise_cut: ViInt32,
        calculate_diameters: ViInt32,
    ) -> ViStatus;

    pub fn WFS_GetSpotCentroids(
        handle: ViSession,
        centroid_x: *mut ViReal32,
        centroid_y: *mut ViReal32,
    ) -> ViStatus;

    pub fn WFS_CalcBeamCentroidDia(
        handle: ViSession,
        beam_centroid_x_mm: *mut ViReal64,
        beam_centroid_y_mm: *mut ViReal64,
        beam_diameter_x_mm: *mut ViReal64,
        beam_diameter_y_mm: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_CalcSpotToReferenceDeviations(handle: ViSession, cancel_wavefront_tilt: ViInt32) -> ViStatus;

    pub fn WFS_GetSpotDeviations(
        handle: ViSession,
        deviation_x: *mut ViReal32,
        deviation_y: *mut ViReal32,
    ) -> ViStatus;

    pub fn WFS_GetSpotIntensities(handle: ViSession, intensity: *mut ViReal32) -> ViStatus;

    pub fn WFS_CalcWavefront(
        handle: ViSession,
        wavefront_type: ViInt32,
        limit_to_pupil: ViInt32,
        wavefront: *mut ViReal32,
    ) -> ViStatus;

    pub fn WFS_CalcWavefrontStatistics(
        handle: ViSession,
        minimum: *mut ViReal64,
        maximum: *mut ViReal64,
        diff: *mut ViReal64,
        mean: *mut ViReal64,
        rms: *mut ViReal64,
        weighted_rms: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_CalcFourierOptometric(
        handle: ViSession,
        zernike_orders: ViInt32,
        fourier_orders: ViInt32,
        fourier_m: *mut ViReal64,
        fourier_j0: *mut ViReal64,
        fourier_j45: *mut ViReal64,
        opto_sphere: *mut ViReal64,
        opto_cylinder: *mut ViReal64,
        opto_axis_deg: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_ZernikeLsf(
        handle: ViSession,
        zernike_orders: *mut ViInt32,
        zernike_um: *mut ViReal32,
        zernike_orders_rms_um: *mut ViReal32,
        roc_mm: *mut ViReal64,
    ) -> ViStatus;

    pub fn WFS_CalcReconstrDeviations(
        handle: ViSession,
        zernike_orders: ViInt32,
        zernike_reconstruct: *mut ViInt32,
        do_spherical_reference: ViInt32,
        fit_err_mean: *mut ViReal64,
        fit_err_stdev: *mut ViReal64,
    ) -> ViStatus;
}
