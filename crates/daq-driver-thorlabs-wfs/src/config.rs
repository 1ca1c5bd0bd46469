//! Sensor configuration and the operator front panel.
//!
//! [`WfsConfig`] holds everything sent to the instrument. Operator controls
//! carry declared ranges and steps and are exposed as observables
//! ([`WfsConfig::controls`]); the remaining vendor settings are opaque
//! pass-throughs that are sent unchanged and never interpreted here.
//!
//! Pupil bounds are provisional placeholders, not verified hardware limits.

use crate::error::{Result, WfsError};
use daq_core::capabilities::FrontPanelValues;
use daq_core::observable::{Observable, ParameterSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use wfs_sys::{MAX_ZERNIKE_ORDERS, MIN_ZERNIKE_ORDERS};

/// Front-panel control names.
pub mod controls {
    pub const RESOLUTION_INDEX: &str = "Resolution Index";
    pub const PUPIL_CENTER_X: &str = "Pupil Center X";
    pub const PUPIL_CENTER_Y: &str = "Pupil Center Y";
    pub const PUPIL_DIAMETER_X: &str = "Pupil Diameter X";
    pub const PUPIL_DIAMETER_Y: &str = "Pupil Diameter Y";
    pub const ZERNIKE_ORDER: &str = "Highest Zernike Order";
    pub const FOURIER_ORDER: &str = "Fourier Order";
    pub const LIMIT_TO_PUPIL: &str = "Limited to Pupil?";

    pub const ALL: [&str; 8] = [
        RESOLUTION_INDEX,
        PUPIL_CENTER_X,
        PUPIL_CENTER_Y,
        PUPIL_DIAMETER_X,
        PUPIL_DIAMETER_Y,
        ZERNIKE_ORDER,
        FOURIER_ORDER,
        LIMIT_TO_PUPIL,
    ];
}

pub const RESOLUTION_INDEX_RANGE: (i64, i64) = (0, 11);
pub const PUPIL_CENTER_RANGE_MM: (f64, f64) = (-5.0, 5.0);
pub const PUPIL_DIAMETER_RANGE_MM: (f64, f64) = (0.1, 10.0);
pub const PUPIL_STEP_MM: f64 = 0.01;
pub const ZERNIKE_ORDER_RANGE: (i64, i64) = (MIN_ZERNIKE_ORDERS as i64, MAX_ZERNIKE_ORDERS as i64);
pub const FOURIER_ORDERS: [i64; 3] = [2, 4, 6];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PupilConfig {
    pub center_x_mm: f64,
    pub center_y_mm: f64,
    pub diameter_x_mm: f64,
    pub diameter_y_mm: f64,
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self {
            center_x_mm: 0.0,
            center_y_mm: 0.0,
            diameter_x_mm: 4.5,
            diameter_y_mm: 4.5,
        }
    }
}

/// Vendor settings sent as-is.
///
/// `spherical_reference` in particular has no documented meaning here; it is
/// forwarded to `WFS_CalcReconstrDeviations` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassThrough {
    pub spherical_reference: i32,
    pub dynamic_noise_cut: i32,
    pub calculate_diameters: i32,
    pub cancel_tilt: i32,
    pub wavefront_type: i32,
    pub pixel_format: i32,
    pub reference_plane: i32,
    pub trigger_mode: i32,
    pub mla_index: i32,
    pub id_query: bool,
    pub reset_device: bool,
}

impl Default for PassThrough {
    fn default() -> Self {
        Self {
            spherical_reference: 0,
            dynamic_noise_cut: 1,
            calculate_diameters: 0,
            cancel_tilt: 1,
            wavefront_type: wfs_sys::WAVEFRONT_MEAS,
            pixel_format: wfs_sys::PIXEL_FORMAT_MONO8,
            reference_plane: wfs_sys::WFS_REF_INTERNAL,
            trigger_mode: wfs_sys::WFS_HW_TRIGGER_LH,
            mla_index: 0,
            id_query: false,
            reset_device: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound for any single vendor call.
    pub call_timeout_ms: u64,
    /// Sleep between capture attempts while waiting for a trigger.
    pub trigger_poll_interval_ms: u64,
    /// How long a stop waits for the run to end on its own before cancelling.
    pub stop_wait_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: daq_core::limits::VENDOR_CALL_TIMEOUT.as_millis() as u64,
            trigger_poll_interval_ms: daq_core::limits::TRIGGER_POLL_INTERVAL.as_millis() as u64,
            stop_wait_ms: daq_core::limits::SHUTDOWN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn trigger_poll_interval(&self) -> Duration {
        Duration::from_millis(self.trigger_poll_interval_ms)
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_millis(self.stop_wait_ms)
    }
}

/// Complete sensor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WfsConfig {
    /// Position in the vendor instrument list.
    pub instrument_index: i32,
    pub resolution_index: i32,
    pub pupil: PupilConfig,
    pub zernike_order: i32,
    pub fourier_order: i32,
    pub limit_to_pupil: bool,
    /// Persist per-record wavefront, deviation and intensity maps.
    pub store_maps: bool,
    pub passthrough: PassThrough,
    pub timing: TimingConfig,
}

impl Default for WfsConfig {
    fn default() -> Self {
        Self {
            instrument_index: 0,
            resolution_index: 1,
            pupil: PupilConfig::default(),
            zernike_order: 4,
            fourier_order: 2,
            limit_to_pupil: true,
            store_maps: false,
            passthrough: PassThrough::default(),
            timing: TimingConfig::default(),
        }
    }
}

fn out_of_range(control: &str, message: impl Into<String>) -> WfsError {
    WfsError::OutOfRange {
        control: control.to_string(),
        message: message.into(),
    }
}

fn check_int(control: &str, value: i64, (min, max): (i64, i64)) -> Result<()> {
    if value < min || value > max {
        return Err(out_of_range(control, format!("{value} not in [{min}, {max}]")));
    }
    Ok(())
}

fn check_float(control: &str, value: f64, (min, max): (f64, f64)) -> Result<()> {
    if !value.is_finite() {
        return Err(out_of_range(control, format!("{value} is not finite")));
    }
    if value < min || value > max {
        return Err(out_of_range(control, format!("{value} not in [{min}, {max}]")));
    }
    Ok(())
}

/// Accept integral floats (GUIs send spin box values as numbers).
fn integral(control: &str, value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.is_finite() => Ok(serde_json::json!(f as i64)),
            _ => Err(out_of_range(control, format!("{value} is not an integer"))),
        },
        other => Err(out_of_range(control, format!("{other} is not an integer"))),
    }
}

/// Accept booleans and 0/1 for checkboxes.
fn flag(control: &str, value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Bool(_) => Ok(value.clone()),
        serde_json::Value::Number(n) if n.as_f64() == Some(0.0) => Ok(serde_json::json!(false)),
        serde_json::Value::Number(n) if n.as_f64() == Some(1.0) => Ok(serde_json::json!(true)),
        other => Err(out_of_range(control, format!("{other} is not a flag"))),
    }
}

impl WfsConfig {
    /// Check every control and the cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        check_int(
            controls::RESOLUTION_INDEX,
            i64::from(self.resolution_index),
            RESOLUTION_INDEX_RANGE,
        )?;
        check_float(controls::PUPIL_CENTER_X, self.pupil.center_x_mm, PUPIL_CENTER_RANGE_MM)?;
        check_float(controls::PUPIL_CENTER_Y, self.pupil.center_y_mm, PUPIL_CENTER_RANGE_MM)?;
        check_float(
            controls::PUPIL_DIAMETER_X,
            self.pupil.diameter_x_mm,
            PUPIL_DIAMETER_RANGE_MM,
        )?;
        check_float(
            controls::PUPIL_DIAMETER_Y,
            self.pupil.diameter_y_mm,
            PUPIL_DIAMETER_RANGE_MM,
        )?;
        check_int(
            controls::ZERNIKE_ORDER,
            i64::from(self.zernike_order),
            ZERNIKE_ORDER_RANGE,
        )?;
        if !FOURIER_ORDERS.contains(&i64::from(self.fourier_order)) {
            return Err(out_of_range(
                controls::FOURIER_ORDER,
                format!("{} is not one of {:?}", self.fourier_order, FOURIER_ORDERS),
            ));
        }
        if self.fourier_order > self.zernike_order {
            return Err(out_of_range(
                controls::FOURIER_ORDER,
                format!(
                    "{} exceeds highest Zernike order {}",
                    self.fourier_order, self.zernike_order
                ),
            ));
        }
        if self.instrument_index < 0 {
            return Err(out_of_range("instrument_index", "must not be negative"));
        }
        if self.timing.call_timeout_ms == 0 {
            return Err(out_of_range("call_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Number of Zernike modes fitted at the configured order.
    pub fn zernike_modes(&self) -> usize {
        usize::try_from(self.zernike_order)
            .ok()
            .and_then(|o| wfs_sys::ZERNIKE_MODES_PER_ORDER.get(o).copied())
            .unwrap_or(0)
    }

    /// Operator controls with current values, ranges and steps.
    pub fn controls(&self) -> ParameterSet {
        let mut set = ParameterSet::new();
        set.register(
            Observable::new(controls::RESOLUTION_INDEX, i64::from(self.resolution_index))
                .with_description("Camera resolution table index (depends on sensor model)")
                .with_range_introspectable(RESOLUTION_INDEX_RANGE.0, RESOLUTION_INDEX_RANGE.1)
                .with_step(1.0),
        );
        for (name, value) in [
            (controls::PUPIL_CENTER_X, self.pupil.center_x_mm),
            (controls::PUPIL_CENTER_Y, self.pupil.center_y_mm),
        ] {
            set.register(
                Observable::new(name, value)
                    .with_units("mm")
                    .with_range_introspectable(PUPIL_CENTER_RANGE_MM.0, PUPIL_CENTER_RANGE_MM.1)
                    .with_step(PUPIL_STEP_MM),
            );
        }
        for (name, value) in [
            (controls::PUPIL_DIAMETER_X, self.pupil.diameter_x_mm),
            (controls::PUPIL_DIAMETER_Y, self.pupil.diameter_y_mm),
        ] {
            set.register(
                Observable::new(name, value)
                    .with_units("mm")
                    .with_range_introspectable(
                        PUPIL_DIAMETER_RANGE_MM.0,
                        PUPIL_DIAMETER_RANGE_MM.1,
                    )
                    .with_step(PUPIL_STEP_MM),
            );
        }
        set.register(
            Observable::new(controls::ZERNIKE_ORDER, i64::from(self.zernike_order))
                .with_description("Highest Zernike order fitted")
                .with_range_introspectable(ZERNIKE_ORDER_RANGE.0, ZERNIKE_ORDER_RANGE.1)
                .with_step(1.0),
        );
        set.register(
            Observable::new(controls::FOURIER_ORDER, i64::from(self.fourier_order))
                .with_description("Order used for Fourier/optometric values, at most the Zernike order")
                .with_choices_introspectable(FOURIER_ORDERS.to_vec()),
        );
        set.register(
            Observable::new(controls::LIMIT_TO_PUPIL, self.limit_to_pupil)
                .with_description("Calculate the wavefront inside the pupil only")
                .as_checkbox(),
        );
        set
    }

    /// Current control values keyed by front-panel name.
    pub fn front_panel(&self) -> FrontPanelValues {
        let mut values = FrontPanelValues::new();
        values.insert(
            controls::RESOLUTION_INDEX.into(),
            serde_json::json!(self.resolution_index),
        );
        values.insert(controls::PUPIL_CENTER_X.into(), serde_json::json!(self.pupil.center_x_mm));
        values.insert(controls::PUPIL_CENTER_Y.into(), serde_json::json!(self.pupil.center_y_mm));
        values.insert(
            controls::PUPIL_DIAMETER_X.into(),
            serde_json::json!(self.pupil.diameter_x_mm),
        );
        values.insert(
            controls::PUPIL_DIAMETER_Y.into(),
            serde_json::json!(self.pupil.diameter_y_mm),
        );
        values.insert(controls::ZERNIKE_ORDER.into(), serde_json::json!(self.zernike_order));
        values.insert(controls::FOURIER_ORDER.into(), serde_json::json!(self.fourier_order));
        values.insert(controls::LIMIT_TO_PUPIL.into(), serde_json::json!(self.limit_to_pupil));
        values
    }

    /// Apply a (possibly partial) front-panel snapshot.
    ///
    /// Returns the new configuration; `self` is untouched. Every value is
    /// validated before the result is returned, so nothing invalid can reach
    /// the instrument.
    pub fn apply_front_panel(&self, values: &FrontPanelValues) -> Result<WfsConfig> {
        let params = self.controls();
        for (key, raw) in values {
            let param = params
                .get(key)
                .ok_or_else(|| WfsError::UnknownControl(key.clone()))?;
            let value = match key.as_str() {
                controls::RESOLUTION_INDEX | controls::ZERNIKE_ORDER | controls::FOURIER_ORDER => {
                    integral(key, raw)?
                }
                controls::LIMIT_TO_PUPIL => flag(key, raw)?,
                _ => raw.clone(),
            };
            param
                .set_json(value)
                .map_err(|e| out_of_range(key, e.to_string()))?;
        }

        let snapshot = params
            .snapshot()
            .map_err(|e| out_of_range("front panel", e.to_string()))?;
        let int = |name: &str| -> Result<i32> {
            snapshot
                .get(name)
                .and_then(serde_json::Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| out_of_range(name, "missing integer value"))
        };
        let float = |name: &str| -> Result<f64> {
            snapshot
                .get(name)
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| out_of_range(name, "missing numeric value"))
        };

        let next = WfsConfig {
            resolution_index: int(controls::RESOLUTION_INDEX)?,
            pupil: PupilConfig {
                center_x_mm: float(controls::PUPIL_CENTER_X)?,
                center_y_mm: float(controls::PUPIL_CENTER_Y)?,
                diameter_x_mm: float(controls::PUPIL_DIAMETER_X)?,
                diameter_y_mm: float(controls::PUPIL_DIAMETER_Y)?,
            },
            zernike_order: int(controls::ZERNIKE_ORDER)?,
            fourier_order: int(controls::FOURIER_ORDER)?,
            limit_to_pupil: snapshot
                .get(controls::LIMIT_TO_PUPIL)
                .and_then(serde_json::Value::as_bool)
                .ok_or_else(|| out_of_range(controls::LIMIT_TO_PUPIL, "missing flag"))?,
            ..self.clone()
        };
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn panel(pairs: &[(&str, serde_json::Value)]) -> FrontPanelValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = WfsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.resolution_index, 1);
        assert_eq!(config.pupil.diameter_x_mm, 4.5);
        assert_eq!(config.zernike_modes(), 15);
        assert_eq!(config.passthrough.trigger_mode, wfs_sys::WFS_HW_TRIGGER_LH);
    }

    #[test]
    fn zernike_order_zero_is_rejected() {
        let config = WfsConfig::default();
        let err = config
            .apply_front_panel(&panel(&[(controls::ZERNIKE_ORDER, json!(0))]))
            .unwrap_err();
        match err {
            WfsError::OutOfRange { control, .. } => assert_eq!(control, controls::ZERNIKE_ORDER),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fourier_order_must_not_exceed_zernike_order() {
        let config = WfsConfig::default();
        let err = config
            .apply_front_panel(&panel(&[
                (controls::ZERNIKE_ORDER, json!(4)),
                (controls::FOURIER_ORDER, json!(6)),
            ]))
            .unwrap_err();
        assert!(err.is_validation());

        let err = config
            .apply_front_panel(&panel(&[(controls::FOURIER_ORDER, json!(3))]))
            .unwrap_err();
        assert!(err.to_string().contains("Fourier Order"));
    }

    #[test]
    fn gui_style_values_are_normalized() {
        let config = WfsConfig::default();
        let next = config
            .apply_front_panel(&panel(&[
                (controls::RESOLUTION_INDEX, json!(3.0)),
                (controls::LIMIT_TO_PUPIL, json!(0)),
                (controls::PUPIL_CENTER_X, json!(-1.25)),
                (controls::ZERNIKE_ORDER, json!(6)),
                (controls::FOURIER_ORDER, json!(6)),
            ]))
            .unwrap();
        assert_eq!(next.resolution_index, 3);
        assert!(!next.limit_to_pupil);
        assert_eq!(next.pupil.center_x_mm, -1.25);
        assert_eq!(next.fourier_order, 6);
        // untouched values carry over
        assert_eq!(next.pupil.diameter_y_mm, 4.5);
        assert_eq!(next.passthrough, config.passthrough);

        assert!(config
            .apply_front_panel(&panel(&[(controls::RESOLUTION_INDEX, json!(2.5))]))
            .is_err());
        assert!(config
            .apply_front_panel(&panel(&[(controls::LIMIT_TO_PUPIL, json!(2))]))
            .is_err());
    }

    #[test]
    fn unknown_and_non_finite_values() {
        let config = WfsConfig::default();
        assert!(matches!(
            config.apply_front_panel(&panel(&[("Exposure", json!(1.0))])),
            Err(WfsError::UnknownControl(_))
        ));
        let mut bad = config.clone();
        bad.pupil.diameter_x_mm = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn front_panel_round_trips_through_apply() {
        let mut config = WfsConfig::default();
        config.pupil.center_y_mm = 0.5;
        config.zernike_order = 8;
        let values = config.front_panel();
        assert_eq!(values.len(), controls::ALL.len());
        let applied = WfsConfig::default().apply_front_panel(&values).unwrap();
        assert_eq!(applied, config);
    }

    #[test]
    fn controls_expose_ranges_and_steps() {
        let params = WfsConfig::default().controls();
        let names = params.names();
        assert_eq!(names, controls::ALL.to_vec());
        let diameter = params.get(controls::PUPIL_DIAMETER_X).unwrap().metadata();
        assert_eq!(diameter.min_value, Some(0.1));
        assert_eq!(diameter.max_value, Some(10.0));
        assert_eq!(diameter.step, Some(PUPIL_STEP_MM));
        assert_eq!(diameter.units.as_deref(), Some("mm"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: WfsConfig = toml::from_str(
            r#"
            zernike_order = 6
            [pupil]
            diameter_x_mm = 3.0
            [passthrough]
            spherical_reference = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.zernike_order, 6);
        assert_eq!(config.pupil.diameter_x_mm, 3.0);
        assert_eq!(config.pupil.diameter_y_mm, 4.5);
        assert_eq!(config.passthrough.spherical_reference, 1);
        assert_eq!(config.passthrough.cancel_tilt, 1);
    }
}
