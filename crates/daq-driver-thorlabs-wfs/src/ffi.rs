//! [`WfsSdk`] over the vendor driver library.
//!
//! All output parameters are local buffers sized to the vendor maxima; spot
//! arrays are fixed `MAX_SPOTS_Y x MAX_SPOTS_X` blocks of which only the
//! leading `spots_y x spots_x` part is valid, and Zernike arrays are indexed
//! from 1.

#![allow(unsafe_code)]

use crate::config::PupilConfig;
use crate::measurement::{
    BeamGeometry, CaptureInfo, FitError, FourierOptometric, Map2, SpotGrid, WavefrontStats,
    ZernikeFit,
};
use crate::sdk::{DeviceStatus, InstrumentInfo, InstrumentListEntry, MlaInfo, SdkResult, Status, WfsSdk};
use std::ffi::CString;
use tracing::{debug, warn};
use wfs_sys::*;

/// VISA "invalid resource name", used when the name cannot be passed to C.
const VI_ERROR_INV_RSRC_NAME: i32 = 0xBFFF_0012_u32 as i32;

const SPOT_CELLS: usize = MAX_SPOTS_X * MAX_SPOTS_Y;

fn text(buffer: &[ViChar]) -> String {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

fn flag(value: bool) -> ViBoolean {
    if value {
        VI_TRUE
    } else {
        VI_FALSE
    }
}

#[derive(Debug)]
pub struct FfiSdk {
    handle: ViSession,
    grid: SpotGrid,
}

impl Default for FfiSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl FfiSdk {
    pub fn new() -> Self {
        Self {
            handle: VI_NULL,
            grid: SpotGrid::default(),
        }
    }

    fn error_text(&self, code: ViStatus) -> String {
        let mut buffer = [0 as ViChar; WFS_ERR_DESCR_BUFFER_SIZE];
        // SAFETY: buffer holds WFS_ERR_DESCR_BUFFER_SIZE chars, the size the
        // vendor documents for error descriptions. A null handle is accepted.
        let status = unsafe { WFS_error_message(self.handle, code, buffer.as_mut_ptr()) };
        if status != VI_SUCCESS {
            return format!("Unknown error {}", code);
        }
        text(&buffer)
    }

    fn check(&self, code: ViStatus) -> SdkResult<()> {
        if code == VI_SUCCESS {
            Ok(())
        } else {
            Err(Status::new(code as i32, self.error_text(code)))
        }
    }

    fn spot_map(&self, buffer: &[f32]) -> Map2 {
        Map2::from_strided(self.grid.spots_y, self.grid.spots_x, MAX_SPOTS_X, buffer)
            .unwrap_or_else(|| Map2::zeros(self.grid.spots_y, self.grid.spots_x))
    }
}

impl Drop for FfiSdk {
    fn drop(&mut self) {
        if self.handle != VI_NULL {
            warn!("Wavefront sensor dropped while open, closing handle");
            if let Err(status) = self.close() {
                warn!(code = status.code, message = %status.message, "WFS_close failed during drop");
            }
        }
    }
}

impl WfsSdk for FfiSdk {
    fn instrument_count(&mut self) -> SdkResult<i32> {
        let mut count: ViInt32 = 0;
        // SAFETY: count is a valid out pointer; the list call takes a null handle.
        let status = unsafe { WFS_GetInstrumentListLen(VI_NULL, &mut count) };
        self.check(status)?;
        Ok(count as i32)
    }

    fn instrument_list_info(&mut self, index: i32) -> SdkResult<InstrumentListEntry> {
        let mut device_id: ViInt32 = 0;
        let mut in_use: ViInt32 = 0;
        let mut name = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut serial = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut resource = [0 as ViChar; WFS_BUFFER_SIZE];
        // SAFETY: scalar out pointers are valid; string buffers are
        // WFS_BUFFER_SIZE long as the vendor requires.
        let status = unsafe {
            WFS_GetInstrumentListInfo(
                VI_NULL,
                index as ViInt32,
                &mut device_id,
                &mut in_use,
                name.as_mut_ptr(),
                serial.as_mut_ptr(),
                resource.as_mut_ptr(),
            )
        };
        self.check(status)?;
        Ok(InstrumentListEntry {
            index,
            device_id: device_id as i32,
            in_use: in_use != 0,
            name: text(&name),
            serial: text(&serial),
            resource: text(&resource),
        })
    }

    fn init(&mut self, resource: &str, id_query: bool, reset: bool) -> SdkResult<()> {
        let resource_c = CString::new(resource).map_err(|_| {
            Status::new(VI_ERROR_INV_RSRC_NAME, format!("resource name '{resource}' contains NUL"))
        })?;
        let mut handle: ViSession = VI_NULL;
        // SAFETY: resource_c is NUL-terminated and outlives the call; handle
        // is a valid out pointer.
        let status = unsafe { WFS_init(resource_c.as_ptr(), flag(id_query), flag(reset), &mut handle) };
        self.check(status)?;
        self.handle = handle;
        debug!(handle, resource, "WFS_init succeeded");
        Ok(())
    }

    fn close(&mut self) -> SdkResult<()> {
        if self.handle == VI_NULL {
            return Ok(());
        }
        // SAFETY: handle came from WFS_init and is cleared below so it is
        // closed exactly once.
        let status = unsafe { WFS_close(self.handle) };
        let result = self.check(status);
        self.handle = VI_NULL;
        result
    }

    fn revision(&mut self) -> SdkResult<(String, String)> {
        let mut driver = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut firmware = [0 as ViChar; WFS_BUFFER_SIZE];
        // SAFETY: both buffers are WFS_BUFFER_SIZE long.
        let status = unsafe { WFS_revision_query(self.handle, driver.as_mut_ptr(), firmware.as_mut_ptr()) };
        self.check(status)?;
        Ok((text(&driver), text(&firmware)))
    }

    fn instrument_info(&mut self) -> SdkResult<InstrumentInfo> {
        let mut manufacturer = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut name = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut serial_wfs = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut serial_camera = [0 as ViChar; WFS_BUFFER_SIZE];
        // SAFETY: all buffers are WFS_BUFFER_SIZE long.
        let status = unsafe {
            WFS_GetInstrumentInfo(
                self.handle,
                manufacturer.as_mut_ptr(),
                name.as_mut_ptr(),
                serial_wfs.as_mut_ptr(),
                serial_camera.as_mut_ptr(),
            )
        };
        self.check(status)?;
        Ok(InstrumentInfo {
            manufacturer: text(&manufacturer),
            name: text(&name),
            serial_wfs: text(&serial_wfs),
            serial_camera: text(&serial_camera),
            driver_revision: String::new(),
            firmware_revision: String::new(),
        })
    }

    fn mla_count(&mut self) -> SdkResult<i32> {
        let mut count: ViInt32 = 0;
        // SAFETY: count is a valid out pointer.
        let status = unsafe { WFS_GetMlaCount(self.handle, &mut count) };
        self.check(status)?;
        Ok(count as i32)
    }

    fn mla_data(&mut self, index: i32) -> SdkResult<MlaInfo> {
        let mut name = [0 as ViChar; WFS_BUFFER_SIZE];
        let mut v = [0.0 as ViReal64; 7];
        let [cam_pitch, lenslet_pitch, offset_x, offset_y, focal, corr_0, corr_45] = &mut v;
        // SAFETY: name is WFS_BUFFER_SIZE long; each f64 out pointer is a
        // distinct element of v.
        let status = unsafe {
            WFS_GetMlaData(
                self.handle,
                index as ViInt32,
                name.as_mut_ptr(),
                cam_pitch,
                lenslet_pitch,
                offset_x,
                offset_y,
                focal,
                corr_0,
                corr_45,
            )
        };
        self.check(status)?;
        Ok(MlaInfo {
            index,
            name: text(&name),
            cam_pitch_um: v[0],
            lenslet_pitch_um: v[1],
            spot_offset_x: v[2],
            spot_offset_y: v[3],
            lenslet_f_um: v[4],
            grd_corr_0: v[5],
            grd_corr_45: v[6],
        })
    }

    fn select_mla(&mut self, index: i32) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { WFS_SelectMla(self.handle, index as ViInt32) };
        self.check(status)
    }

    fn configure_cam(&mut self, pixel_format: i32, resolution_index: i32) -> SdkResult<SpotGrid> {
        let mut spots_x: ViInt32 = 0;
        let mut spots_y: ViInt32 = 0;
        // SAFETY: spots_x/spots_y are valid out pointers.
        let status = unsafe {
            WFS_ConfigureCam(
                self.handle,
                pixel_format as ViInt32,
                resolution_index as ViInt32,
                &mut spots_x,
                &mut spots_y,
            )
        };
        self.check(status)?;
        self.grid = SpotGrid {
            spots_x: usize::try_from(spots_x).unwrap_or(0).min(MAX_SPOTS_X),
            spots_y: usize::try_from(spots_y).unwrap_or(0).min(MAX_SPOTS_Y),
        };
        Ok(self.grid)
    }

    fn set_trigger_mode(&mut self, mode: i32) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { WFS_SetTriggerMode(self.handle, mode as ViInt32) };
        self.check(status)
    }

    fn set_reference_plane(&mut self, plane: i32) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { WFS_SetReferencePlane(self.handle, plane as ViInt32) };
        self.check(status)
    }

    fn set_pupil(&mut self, pupil: &PupilConfig) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe {
            WFS_SetPupil(
                self.handle,
                pupil.center_x_mm,
                pupil.center_y_mm,
                pupil.diameter_x_mm,
                pupil.diameter_y_mm,
            )
        };
        self.check(status)
    }

    fn take_spotfield_image_auto_expos(&mut self) -> SdkResult<CaptureInfo> {
        let mut exposure_ms: ViReal64 = 0.0;
        let mut master_gain: ViReal64 = 0.0;
        // SAFETY: both out pointers are valid locals.
        let status = unsafe { WFS_TakeSpotfieldImageAutoExpos(self.handle, &mut exposure_ms, &mut master_gain) };
        self.check(status)?;
        Ok(CaptureInfo {
            exposure_ms,
            master_gain,
        })
    }

    fn status(&mut self) -> SdkResult<DeviceStatus> {
        let mut bits: ViInt32 = 0;
        // SAFETY: bits is a valid out pointer.
        let status = unsafe { WFS_GetStatus(self.handle, &mut bits) };
        self.check(status)?;
        Ok(DeviceStatus::from_bits_retain(bits as u32))
    }

    fn calc_spots_centr_dia_intens(
        &mut self,
        dynamic_noise_cut: i32,
        calculate_diameters: i32,
    ) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe {
            WFS_CalcSpotsCentrDiaIntens(
                self.handle,
                dynamic_noise_cut as ViInt32,
                calculate_diameters as ViInt32,
            )
        };
        self.check(status)
    }

    fn spot_centroids(&mut self) -> SdkResult<(Map2, Map2)> {
        let mut x = vec![0.0f32; SPOT_CELLS];
        let mut y = vec![0.0f32; SPOT_CELLS];
        // SAFETY: both buffers hold MAX_SPOTS_Y * MAX_SPOTS_X floats.
        let status = unsafe { WFS_GetSpotCentroids(self.handle, x.as_mut_ptr(), y.as_mut_ptr()) };
        self.check(status)?;
        Ok((self.spot_map(&x), self.spot_map(&y)))
    }

    fn calc_beam_centroid_dia(&mut self) -> SdkResult<BeamGeometry> {
        let mut g = BeamGeometry {
            centroid_x_mm: 0.0,
            centroid_y_mm: 0.0,
            diameter_x_mm: 0.0,
            diameter_y_mm: 0.0,
        };
        // SAFETY: each out pointer is a distinct field of g.
        let status = unsafe {
            WFS_CalcBeamCentroidDia(
                self.handle,
                &mut g.centroid_x_mm,
                &mut g.centroid_y_mm,
                &mut g.diameter_x_mm,
                &mut g.diameter_y_mm,
            )
        };
        self.check(status)?;
        Ok(g)
    }

    fn calc_spot_to_reference_deviations(&mut self, cancel_tilt: i32) -> SdkResult<()> {
        // SAFETY: plain value arguments.
        let status = unsafe { WFS_CalcSpotToReferenceDeviations(self.handle, cancel_tilt as ViInt32) };
        self.check(status)
    }

    fn spot_deviations(&mut self) -> SdkResult<(Map2, Map2)> {
        let mut x = vec![0.0f32; SPOT_CELLS];
        let mut y = vec![0.0f32; SPOT_CELLS];
        // SAFETY: both buffers hold MAX_SPOTS_Y * MAX_SPOTS_X floats.
        let status = unsafe { WFS_GetSpotDeviations(self.handle, x.as_mut_ptr(), y.as_mut_ptr()) };
        self.check(status)?;
        Ok((self.spot_map(&x), self.spot_map(&y)))
    }

    fn spot_intensities(&mut self) -> SdkResult<Map2> {
        let mut intensity = vec![0.0f32; SPOT_CELLS];
        // SAFETY: buffer holds MAX_SPOTS_Y * MAX_SPOTS_X floats.
        let status = unsafe { WFS_GetSpotIntensities(self.handle, intensity.as_mut_ptr()) };
        self.check(status)?;
        Ok(self.spot_map(&intensity))
    }

    fn calc_wavefront(&mut self, wavefront_type: i32, limit_to_pupil: bool) -> SdkResult<Map2> {
        let mut wavefront = vec![0.0f32; SPOT_CELLS];
        // SAFETY: buffer holds MAX_SPOTS_Y * MAX_SPOTS_X floats.
        let status = unsafe {
            WFS_CalcWavefront(
                self.handle,
                wavefront_type as ViInt32,
                ViInt32::from(limit_to_pupil),
                wavefront.as_mut_ptr(),
            )
        };
        self.check(status)?;
        Ok(self.spot_map(&wavefront))
    }

    fn calc_wavefront_statistics(&mut self) -> SdkResult<WavefrontStats> {
        let mut s = WavefrontStats {
            min: 0.0,
            max: 0.0,
            peak_valley: 0.0,
            mean: 0.0,
            rms: 0.0,
            weighted_rms: 0.0,
        };
        // SAFETY: each out pointer is a distinct field of s.
        let status = unsafe {
            WFS_CalcWavefrontStatistics(
                self.handle,
                &mut s.min,
                &mut s.max,
                &mut s.peak_valley,
                &mut s.mean,
                &mut s.rms,
                &mut s.weighted_rms,
            )
        };
        self.check(status)?;
        Ok(s)
    }

    fn calc_fourier_optometric(
        &mut self,
        zernike_order: i32,
        fourier_order: i32,
    ) -> SdkResult<FourierOptometric> {
        let mut o = FourierOptometric {
            m: 0.0,
            j0: 0.0,
            j45: 0.0,
            sphere: 0.0,
            cylinder: 0.0,
            axis_deg: 0.0,
        };
        // SAFETY: each out pointer is a distinct field of o.
        let status = unsafe {
            WFS_CalcFourierOptometric(
                self.handle,
                zernike_order as ViInt32,
                fourier_order as ViInt32,
                &mut o.m,
                &mut o.j0,
                &mut o.j45,
                &mut o.sphere,
                &mut o.cylinder,
                &mut o.axis_deg,
            )
        };
        self.check(status)?;
        Ok(o)
    }

    fn zernike_lsf(&mut self, zernike_order: i32) -> SdkResult<ZernikeFit> {
        let mut order: ViInt32 = zernike_order as ViInt32;
        let mut coefficients = vec![0.0f32; MAX_ZERNIKE_MODES + 1];
        let mut order_rms = vec![0.0f32; MAX_ZERNIKE_ORDERS as usize + 1];
        let mut roc_mm: ViReal64 = 0.0;
        // SAFETY: order is in/out; coefficient and RMS buffers are sized to
        // the vendor maxima plus the unused index 0.
        let status = unsafe {
            WFS_ZernikeLsf(
                self.handle,
                &mut order,
                coefficients.as_mut_ptr(),
                order_rms.as_mut_ptr(),
                &mut roc_mm,
            )
        };
        self.check(status)?;

        let fitted = usize::try_from(order)
            .unwrap_or(0)
            .min(MAX_ZERNIKE_ORDERS as usize);
        let modes = ZERNIKE_MODES_PER_ORDER[fitted];
        Ok(ZernikeFit {
            order: fitted as i32,
            coefficients_um: coefficients[1..=modes].to_vec(),
            order_rms_um: order_rms[1..=fitted].to_vec(),
            radius_of_curvature_mm: roc_mm,
        })
    }

    fn calc_reconstr_deviations(
        &mut self,
        zernike_order: i32,
        spherical_reference: i32,
    ) -> SdkResult<FitError> {
        // reconstruct with every mode
        let mut modes: Vec<ViInt32> = vec![1; MAX_ZERNIKE_MODES + 1];
        let mut fit = FitError { mean: 0.0, stdev: 0.0 };
        // SAFETY: modes is sized to the vendor maximum plus index 0; the two
        // f64 out pointers are distinct fields of fit.
        let status = unsafe {
            WFS_CalcReconstrDeviations(
                self.handle,
                zernike_order as ViInt32,
                modes.as_mut_ptr(),
                spherical_reference as ViInt32,
                &mut fit.mean,
                &mut fit.stdev,
            )
        };
        self.check(status)?;
        Ok(fit)
    }
}
