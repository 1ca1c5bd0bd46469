//! Mapping of a finished run onto a column table.
//!
//! One column per measured quantity, K entries each in capture order. A step
//! that failed for a record contributes NaN, never zero; the "Step Failures"
//! column says which steps failed. The configuration the run used is
//! attached as group attributes.

use crate::camera::CameraModel;
use crate::config::WfsConfig;
use crate::measurement::{Map2, MeasurementRecord, SpotGrid, Step};
use crate::sdk::InstrumentInfo;
use daq_core::data::ColumnTable;
use daq_core::error::DaqError;

/// Instrument facts recorded next to the data.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a WfsConfig,
    pub instrument: Option<&'a InstrumentInfo>,
    pub model: Option<CameraModel>,
    pub grid: SpotGrid,
}

const UM: Option<&str> = Some("um");
const MM: Option<&str> = Some("mm");

fn scalar<T>(records: &[MeasurementRecord], step: impl Fn(&MeasurementRecord) -> &Step<T>, f: impl Fn(&T) -> f64) -> Vec<f64> {
    records.iter().map(|r| step(r).value_or_nan(&f)).collect()
}

/// Fixed-width rows; short rows are padded with NaN.
fn padded(rows: impl Iterator<Item = Option<Vec<f64>>>, width: usize) -> Vec<f64> {
    rows.flat_map(|row| {
        let row = row.unwrap_or_default();
        (0..width).map(move |i| row.get(i).copied().unwrap_or(f64::NAN))
    })
    .collect()
}

fn map_values(map: Option<&Map2>, grid: SpotGrid) -> Option<Vec<f64>> {
    map.filter(|m| m.rows() == grid.spots_y && m.cols() == grid.spots_x)
        .map(|m| m.as_slice().iter().map(|v| f64::from(*v)).collect())
}

/// Build the table for `records` under `group`.
pub fn records_to_table(
    group: &str,
    context: RunContext<'_>,
    records: &[MeasurementRecord],
) -> Result<ColumnTable, DaqError> {
    let config = context.config;
    let mut table = ColumnTable::new(group, records.len());

    table.push_f64("Beam Center X", MM, scalar(records, |r| &r.beam, |b| b.centroid_x_mm))?;
    table.push_f64("Beam Center Y", MM, scalar(records, |r| &r.beam, |b| b.centroid_y_mm))?;
    table.push_f64("Beam Diameter X", MM, scalar(records, |r| &r.beam, |b| b.diameter_x_mm))?;
    table.push_f64("Beam Diameter Y", MM, scalar(records, |r| &r.beam, |b| b.diameter_y_mm))?;
    table.push_f64(
        "Beam Deviation X",
        Some("px"),
        records.iter().map(|r| r.beam_deviation().0).collect(),
    )?;
    table.push_f64(
        "Beam Deviation Y",
        Some("px"),
        records.iter().map(|r| r.beam_deviation().1).collect(),
    )?;

    table.push_f64("Wavefront Min", UM, scalar(records, |r| &r.statistics, |s| s.min))?;
    table.push_f64("Wavefront Max", UM, scalar(records, |r| &r.statistics, |s| s.max))?;
    table.push_f64("Wavefront Peak-Valley", UM, scalar(records, |r| &r.statistics, |s| s.peak_valley))?;
    table.push_f64("Wavefront Mean", UM, scalar(records, |r| &r.statistics, |s| s.mean))?;
    table.push_f64("Wavefront RMS", UM, scalar(records, |r| &r.statistics, |s| s.rms))?;
    table.push_f64(
        "Wavefront Weighted RMS",
        UM,
        scalar(records, |r| &r.statistics, |s| s.weighted_rms),
    )?;

    table.push_f64("Fourier M", None, scalar(records, |r| &r.fourier, |o| o.m))?;
    table.push_f64("Fourier J0", None, scalar(records, |r| &r.fourier, |o| o.j0))?;
    table.push_f64("Fourier J45", None, scalar(records, |r| &r.fourier, |o| o.j45))?;
    table.push_f64("Optometric Sphere", Some("D"), scalar(records, |r| &r.fourier, |o| o.sphere))?;
    table.push_f64("Optometric Cylinder", Some("D"), scalar(records, |r| &r.fourier, |o| o.cylinder))?;
    table.push_f64("Optometric Axis Angle", Some("deg"), scalar(records, |r| &r.fourier, |o| o.axis_deg))?;

    table.push_f64(
        "Radius of Curvature",
        MM,
        scalar(records, |r| &r.zernike, |z| z.radius_of_curvature_mm),
    )?;
    table.push_f64("Fit Error Mean", UM, scalar(records, |r| &r.fit_error, |f| f.mean))?;
    table.push_f64("Fit Error Std", UM, scalar(records, |r| &r.fit_error, |f| f.stdev))?;

    let modes = config.zernike_modes();
    let orders = usize::try_from(config.zernike_order).unwrap_or(0);
    let as_f64 = |values: &[f32]| values.iter().map(|v| f64::from(*v)).collect::<Vec<_>>();
    table.push_f64_array(
        "Zernike Coefficients",
        UM,
        &[modes],
        padded(
            records.iter().map(|r| r.zernike.ok().map(|z| as_f64(&z.coefficients_um))),
            modes,
        ),
    )?;
    table.push_f64_array(
        "Zernike RMS",
        UM,
        &[orders],
        padded(
            records.iter().map(|r| r.zernike.ok().map(|z| as_f64(&z.order_rms_um))),
            orders,
        ),
    )?;

    table.push_f64("Exposure Time", Some("ms"), records.iter().map(|r| r.capture.exposure_ms).collect())?;
    table.push_f64("Master Gain", None, records.iter().map(|r| r.capture.master_gain).collect())?;
    table.push_text("Timestamp", records.iter().map(|r| r.timestamp.to_rfc3339()).collect())?;
    table.push_u32("Step Failures", records.iter().map(MeasurementRecord::failure_mask).collect())?;

    if config.store_maps {
        let grid = context.grid;
        let cells = daq_core::limits::validate_map_shape(grid.spots_y, grid.spots_x)?;
        let inner = [grid.spots_y, grid.spots_x];
        let maps: [(&str, Option<&str>, fn(&MeasurementRecord) -> Option<&Map2>); 4] = [
            ("Wavefront", UM, |r| r.wavefront.ok()),
            ("Spot Deviation X", Some("px"), |r| r.spot_maps.ok().map(|m| &m.deviation_x)),
            ("Spot Deviation Y", Some("px"), |r| r.spot_maps.ok().map(|m| &m.deviation_y)),
            ("Spot Intensity", None, |r| r.spot_maps.ok().map(|m| &m.intensity)),
        ];
        for (name, units, get) in maps {
            let values = padded(records.iter().map(|r| map_values(get(r), grid)), cells);
            table.push_f64_array(name, units, &inner, values)?;
        }
    }

    set_attrs(&mut table, context);
    Ok(table)
}

fn set_attrs(table: &mut ColumnTable, context: RunContext<'_>) {
    let config = context.config;
    let pass = &config.passthrough;
    table.set_attr("instrument_index", config.instrument_index);
    table.set_attr("resolution_index", config.resolution_index);
    table.set_attr("pupil_center_x_mm", config.pupil.center_x_mm);
    table.set_attr("pupil_center_y_mm", config.pupil.center_y_mm);
    table.set_attr("pupil_diameter_x_mm", config.pupil.diameter_x_mm);
    table.set_attr("pupil_diameter_y_mm", config.pupil.diameter_y_mm);
    table.set_attr("zernike_order", config.zernike_order);
    table.set_attr("fourier_order", config.fourier_order);
    table.set_attr("limit_to_pupil", config.limit_to_pupil);
    table.set_attr("spherical_reference", pass.spherical_reference);
    table.set_attr("dynamic_noise_cut", pass.dynamic_noise_cut);
    table.set_attr("calculate_diameters", pass.calculate_diameters);
    table.set_attr("cancel_tilt", pass.cancel_tilt);
    table.set_attr("wavefront_type", pass.wavefront_type);
    table.set_attr("pixel_format", pass.pixel_format);
    table.set_attr("reference_plane", pass.reference_plane);
    table.set_attr("trigger_mode", pass.trigger_mode);
    table.set_attr("mla_index", pass.mla_index);
    table.set_attr("spots_x", context.grid.spots_x as i64);
    table.set_attr("spots_y", context.grid.spots_y as i64);

    if let Some(model) = context.model {
        table.set_attr("camera_model", model.label());
        if let Some(resolution) = model.resolution(config.resolution_index) {
            table.set_attr("resolution", resolution.to_string());
        }
    }
    if let Some(info) = context.instrument {
        table.set_attr("instrument_name", info.name.as_str());
        table.set_attr("serial_wfs", info.serial_wfs.as_str());
        table.set_attr("serial_camera", info.serial_camera.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{
        BeamGeometry, CaptureInfo, FitError, FourierOptometric, PipelineStep, SpotMaps,
        SpotSummary, StepFailure, WavefrontStats, ZernikeFit,
    };
    use crate::sdk::Status;
    use chrono::{TimeZone, Utc};
    use daq_core::data::AttrValue;

    fn record(index: usize, fourier_ok: bool) -> MeasurementRecord {
        let v = index as f64;
        let map = || Map2::new(2, 3, vec![index as f32; 6]).unwrap();
        MeasurementRecord {
            index,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, index as u32).unwrap(),
            capture: CaptureInfo {
                exposure_ms: 0.5 + v,
                master_gain: 1.0,
            },
            spots: Step::Ok(SpotSummary { detected: 6 }),
            beam: Step::Ok(BeamGeometry {
                centroid_x_mm: v,
                centroid_y_mm: -v,
                diameter_x_mm: 4.0,
                diameter_y_mm: 4.1,
            }),
            deviations: Step::Ok(()),
            spot_maps: Step::Ok(SpotMaps {
                deviation_x: map(),
                deviation_y: map(),
                intensity: map(),
            }),
            wavefront: Step::Ok(map()),
            statistics: Step::Ok(WavefrontStats {
                min: -v,
                max: v,
                peak_valley: 2.0 * v,
                mean: 0.0,
                rms: v / 2.0,
                weighted_rms: v / 3.0,
            }),
            fourier: if fourier_ok {
                Step::Ok(FourierOptometric {
                    m: v,
                    j0: 0.0,
                    j45: 0.0,
                    sphere: 0.1,
                    cylinder: 0.2,
                    axis_deg: 90.0,
                })
            } else {
                Step::Failed(StepFailure {
                    step: PipelineStep::FourierOptometric,
                    operation: "WFS_CalcFourierOptometric".into(),
                    status: Status::new(-1, "fit failed"),
                })
            },
            zernike: Step::Ok(ZernikeFit {
                order: 4,
                coefficients_um: (0..15).map(|j| j as f32).collect(),
                order_rms_um: vec![0.5; 4],
                radius_of_curvature_mm: 1000.0 + v,
            }),
            fit_error: Step::Ok(FitError {
                mean: 0.01,
                stdev: 0.002,
            }),
        }
    }

    fn context(config: &WfsConfig) -> RunContext<'_> {
        RunContext {
            config,
            instrument: None,
            model: Some(CameraModel::Wfs20),
            grid: SpotGrid {
                spots_x: 3,
                spots_y: 2,
            },
        }
    }

    #[test]
    fn every_column_has_k_values_in_capture_order() {
        let config = WfsConfig::default();
        let records: Vec<_> = (0..3).map(|i| record(i, i != 1)).collect();
        let table = records_to_table("wfs", context(&config), &records).unwrap();

        assert_eq!(table.rows(), 3);
        for column in table.columns() {
            assert_eq!(column.data.rows(), 3, "column {}", column.name);
        }
        let center = table.column("Beam Center X").unwrap().data.as_f64().unwrap();
        assert_eq!(center, &[0.0, 1.0, 2.0]);
        let timestamps = table.column("Timestamp").unwrap().data.as_text().unwrap();
        assert!(timestamps[0] < timestamps[2]);
        assert_eq!(
            table.column("Zernike Coefficients").unwrap().data.shape(),
            vec![3, 15]
        );
        assert_eq!(table.column("Zernike RMS").unwrap().data.shape(), vec![3, 4]);
        assert!(table.column("Wavefront").is_none());
    }

    #[test]
    fn failed_step_is_nan_and_flagged() {
        let config = WfsConfig::default();
        let records: Vec<_> = (0..3).map(|i| record(i, i != 1)).collect();
        let table = records_to_table("wfs", context(&config), &records).unwrap();

        let m = table.column("Fourier M").unwrap().data.as_f64().unwrap();
        assert_eq!(m[0], 0.0);
        assert!(m[1].is_nan());
        assert_eq!(m[2], 2.0);
        let failures = table.column("Step Failures").unwrap().data.as_u32().unwrap();
        assert_eq!(failures, &[0, PipelineStep::FourierOptometric.bit(), 0]);
    }

    #[test]
    fn attributes_match_run_config() {
        let mut config = WfsConfig::default();
        config.zernike_order = 6;
        config.fourier_order = 4;
        config.pupil.diameter_x_mm = 3.25;
        let table = records_to_table("wfs", context(&config), &[]).unwrap();

        assert_eq!(table.rows(), 0);
        assert_eq!(table.attrs()["zernike_order"], AttrValue::I64(6));
        assert_eq!(table.attrs()["fourier_order"], AttrValue::I64(4));
        assert_eq!(table.attrs()["pupil_diameter_x_mm"], AttrValue::F64(3.25));
        assert_eq!(table.attrs()["limit_to_pupil"], AttrValue::Bool(true));
        assert_eq!(table.attrs()["resolution"], AttrValue::Text("1080x1080".into()));
        // 28 modes at order 6
        assert_eq!(
            table.column("Zernike Coefficients").unwrap().data.shape(),
            vec![0, 28]
        );
    }

    #[test]
    fn maps_are_stored_when_enabled() {
        let config = WfsConfig {
            store_maps: true,
            ..WfsConfig::default()
        };
        let mut records: Vec<_> = (0..2).map(|i| record(i, true)).collect();
        records[1].wavefront = Step::Failed(StepFailure {
            step: PipelineStep::Wavefront,
            operation: "WFS_CalcWavefront".into(),
            status: Status::new(-1, "no spots"),
        });
        let table = records_to_table("wfs", context(&config), &records).unwrap();

        let wavefront = &table.column("Wavefront").unwrap().data;
        assert_eq!(wavefront.shape(), vec![2, 2, 3]);
        let values = wavefront.as_f64().unwrap();
        assert!(values[..6].iter().all(|v| *v == 0.0));
        assert!(values[6..].iter().all(|v| v.is_nan()));
        assert!(table.column("Spot Intensity").is_some());
    }
}
