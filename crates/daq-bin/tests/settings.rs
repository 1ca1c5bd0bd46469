//! Settings layering: defaults, TOML file, environment.

use daq_bin::{OutputFormat, Settings};
use serial_test::serial;
use std::io::Write;

#[test]
#[serial]
fn defaults_without_file_or_env() {
    let settings = Settings::load(None).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.output.format, OutputFormat::Jsonl);
    assert_eq!(settings.sensor.zernike_order, 4);
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[sensor]
zernike_order = 6
fourier_order = 4

[sensor.pupil]
diameter_x_mm = 3.0

[output]
format = "hdf5"
group = "shot_17"
"#
    )
    .unwrap();

    let settings = Settings::load(Some(file.path())).unwrap();
    assert_eq!(settings.sensor.zernike_order, 6);
    assert_eq!(settings.sensor.fourier_order, 4);
    assert_eq!(settings.sensor.pupil.diameter_x_mm, 3.0);
    assert_eq!(settings.sensor.resolution_index, 1);
    assert_eq!(settings.output.format, OutputFormat::Hdf5);
    assert_eq!(settings.output.group, "shot_17");
}

#[test]
#[serial]
fn environment_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[sensor]\nzernike_order = 6").unwrap();

    std::env::set_var("WFS_DAQ_SENSOR__ZERNIKE_ORDER", "8");
    let settings = Settings::load(Some(file.path()));
    std::env::remove_var("WFS_DAQ_SENSOR__ZERNIKE_ORDER");

    assert_eq!(settings.unwrap().sensor.zernike_order, 8);
}

#[test]
#[serial]
fn invalid_sensor_values_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[sensor]\nzernike_order = 0").unwrap();
    let err = Settings::load(Some(file.path())).unwrap_err();
    assert!(format!("{err:#}").contains("invalid sensor configuration"));
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    assert!(Settings::load(Some(std::path::Path::new("/nonexistent/wfs.toml"))).is_err());
}

#[test]
#[serial]
fn jsonl_sink_opens_without_features() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.output.path = dir.path().join("WFSdata.txt");
    let sink = settings.output.open_sink().unwrap();
    assert!(sink.describe().starts_with("jsonl:"));
}
