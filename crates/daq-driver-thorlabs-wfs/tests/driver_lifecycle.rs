//! Host lifecycle against the mock sensor: init, manual programming, runs and
//! shutdown, with what ends up in the sink.

#![cfg(feature = "mock")]

use daq_core::capabilities::{BufferedDevice, FrontPanelValues, Parameterized, RunOutcome, TableSink};
use daq_core::data::ColumnTable;
use daq_core::error::{AppResult, DaqError, DriverErrorKind};
use daq_driver_thorlabs_wfs::config::controls;
use daq_driver_thorlabs_wfs::mock::{codes, MockWfs};
use daq_driver_thorlabs_wfs::sdk::{ops, InstrumentListEntry};
use daq_driver_thorlabs_wfs::{WfsConfig, WfsDriver};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    tables: Mutex<Vec<ColumnTable>>,
}

impl RecordingSink {
    fn tables(&self) -> Vec<ColumnTable> {
        self.tables.lock().clone()
    }
}

impl TableSink for RecordingSink {
    fn write_table(&self, table: &ColumnTable) -> AppResult<()> {
        let mut tables = self.tables.lock();
        if tables.iter().any(|t| t.group() == table.group()) {
            return Err(DaqError::Storage(format!("group '{}' exists", table.group())));
        }
        tables.push(table.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

fn fast_config() -> WfsConfig {
    let mut config = WfsConfig::default();
    config.timing.trigger_poll_interval_ms = 0;
    config.timing.stop_wait_ms = 20;
    config
}

async fn ready(mock: MockWfs) -> WfsDriver {
    let driver = WfsDriver::mock(mock, fast_config()).unwrap();
    driver.init().await.unwrap();
    driver
}

fn sink() -> (Arc<RecordingSink>, Arc<dyn TableSink>) {
    let sink = Arc::new(RecordingSink::default());
    let dyn_sink: Arc<dyn TableSink> = sink.clone();
    (sink, dyn_sink)
}

#[tokio::test]
async fn init_applies_defaults_and_is_idempotent() {
    let mock = MockWfs::new();
    let probe = mock.probe();
    let driver = ready(mock).await;
    driver.init().await.unwrap();

    assert_eq!(probe.count(ops::INIT), 1);
    assert_eq!(probe.resolution_index(), Some(1));
    assert_eq!(driver.applied_config().await, Some(fast_config()));
    assert_eq!(driver.instrument_info().await.unwrap().serial_wfs, "M00412345");
    assert_eq!(driver.mla_list().await.unwrap().len(), 2);
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn init_fails_when_instrument_is_in_use() {
    let mock = MockWfs::new().with_instruments(vec![InstrumentListEntry {
        index: 0,
        device_id: wfs_sys::DEVICE_OFFSET_WFS20 | 0x01,
        in_use: true,
        name: "WFS20-5C".into(),
        serial: "M00412345".into(),
        resource: "USB::0x1313::0x0000::1".into(),
    }]);
    let driver = WfsDriver::mock(mock, fast_config()).unwrap();
    let err = driver.init().await.unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Busy));
}

#[tokio::test]
async fn init_closes_session_when_defaults_are_refused() {
    let mock = MockWfs::new().fail_step(ops::SET_PUPIL, codes::INVALID_PARAMETER);
    let probe = mock.probe();
    let driver = WfsDriver::mock(mock, fast_config()).unwrap();

    let err = driver.init().await.unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Configuration));
    assert_eq!(probe.closed(), 1);
    assert!(driver.applied_config().await.is_none());
}

#[tokio::test]
async fn program_manual_requires_init() {
    let driver = WfsDriver::mock(MockWfs::new(), fast_config()).unwrap();
    let err = driver.program_manual(FrontPanelValues::new()).await.unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Initialization));
}

#[tokio::test]
async fn program_manual_returns_applied_values() {
    let mock = MockWfs::new();
    let probe = mock.probe();
    let driver = ready(mock).await;

    let mut values = FrontPanelValues::new();
    values.insert(controls::PUPIL_DIAMETER_X.into(), json!(3.5));
    values.insert(controls::ZERNIKE_ORDER.into(), json!(6.0));
    let applied = driver.program_manual(values).await.unwrap();

    assert_eq!(applied[controls::ZERNIKE_ORDER], json!(6));
    assert_eq!(applied[controls::PUPIL_DIAMETER_X], json!(3.5));
    assert_eq!(probe.pupil().unwrap().diameter_x_mm, 3.5);
    let order = driver.parameters().get(controls::ZERNIKE_ORDER).unwrap();
    assert_eq!(order.get_json().unwrap(), json!(6));
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn program_manual_rejects_without_touching_hardware() {
    let mock = MockWfs::new();
    let probe = mock.probe();
    let driver = ready(mock).await;
    probe.clear();

    let mut values = FrontPanelValues::new();
    values.insert(controls::FOURIER_ORDER.into(), json!(6));
    values.insert(controls::ZERNIKE_ORDER.into(), json!(4));
    let err = driver.program_manual(values).await.unwrap_err();

    assert_eq!(err.driver_kind(), Some(DriverErrorKind::InvalidParameter));
    assert!(probe.calls().is_empty());
    assert_eq!(driver.applied_config().await.unwrap().fourier_order, 2);
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_control_is_rejected() {
    let driver = ready(MockWfs::new()).await;
    let mut values = FrontPanelValues::new();
    values.insert("Exposure".into(), json!(1.0));
    let err = driver.program_manual(values).await.unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::InvalidParameter));
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn triggered_run_persists_one_row_per_record() {
    let driver = ready(MockWfs::new().trigger_pattern([0, 3, 1]).max_frames(3)).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let outcome = driver.transition_to_manual(false).await.unwrap();

    assert_eq!(outcome, RunOutcome::Records(3));
    let tables = recorded.tables();
    assert_eq!(tables.len(), 1);
    let table = &tables[0];
    assert_eq!(table.group(), "wavefront_sensor");
    assert_eq!(table.rows(), 3);
    let zernike = table.column("Zernike Coefficients").unwrap();
    assert_eq!(zernike.data.shape(), vec![3, 15]);
    assert!(table.attrs().contains_key("zernike_order"));
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn never_triggered_run_writes_nothing() {
    let driver = ready(MockWfs::new().never_triggered()).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let outcome = driver.transition_to_manual(false).await.unwrap();

    assert_eq!(outcome, RunOutcome::NoRecords);
    assert!(recorded.tables().is_empty());
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn abort_discards_records() {
    let driver = ready(MockWfs::new().max_frames(2)).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.transition_to_manual(true).await.unwrap(), RunOutcome::Aborted);
    assert!(recorded.tables().is_empty());
    assert!(!driver.is_running().await);
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_stop_is_a_no_op() {
    let driver = ready(MockWfs::new().max_frames(1)).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.transition_to_manual(false).await.unwrap(), RunOutcome::Records(1));
    assert_eq!(driver.transition_to_manual(false).await.unwrap(), RunOutcome::NoRecords);
    assert_eq!(recorded.tables().len(), 1);
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn program_manual_is_refused_during_a_run() {
    let driver = ready(MockWfs::new().never_triggered()).await;
    let (_, sink) = sink();
    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();

    let err = driver.program_manual(FrontPanelValues::new()).await.unwrap_err();
    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Busy));
    driver.transition_to_manual(true).await.unwrap();
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_run_persists_collected_records_then_reports() {
    let driver = ready(MockWfs::new().image_quality_fault_on(2)).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = driver.transition_to_manual(false).await.unwrap_err();

    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Hardware));
    let tables = recorded.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].rows(), 2);
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn hung_vendor_call_is_reported_as_timeout() {
    let mock = MockWfs::new().hang_on(ops::CALC_WAVEFRONT, Duration::from_secs(1));
    let mut config = fast_config();
    config.timing.call_timeout_ms = 30;
    let driver = WfsDriver::mock(mock, config).unwrap();
    driver.init().await.unwrap();
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    let err = driver.transition_to_manual(false).await.unwrap_err();

    assert_eq!(err.driver_kind(), Some(DriverErrorKind::Timeout));
    assert!(recorded.tables().is_empty());
}

#[tokio::test]
async fn step_failures_are_recorded_as_nan() {
    let mock = MockWfs::new()
        .max_frames(2)
        .fail_step(ops::FOURIER_OPTOMETRIC, codes::FIT_FAILED);
    let driver = ready(mock).await;
    let (recorded, sink) = sink();

    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.transition_to_manual(false).await.unwrap(), RunOutcome::Records(2));

    let table = &recorded.tables()[0];
    let sphere = table.column("Optometric Sphere").unwrap().data.as_f64().unwrap();
    assert!(sphere.iter().all(|v| v.is_nan()));
    let rms = table.column("Wavefront RMS").unwrap().data.as_f64().unwrap();
    assert!(rms.iter().all(|v| v.is_finite()));
    driver.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_during_run_closes_instrument() {
    let mock = MockWfs::new().never_triggered();
    let probe = mock.probe();
    let driver = ready(mock).await;
    let (recorded, sink) = sink();
    driver.transition_to_buffered(sink, "wavefront_sensor").await.unwrap();

    driver.shutdown().await.unwrap();
    assert_eq!(probe.closed(), 1);
    assert!(recorded.tables().is_empty());
    assert!(driver.instrument_info().await.is_none());

    driver.shutdown().await.unwrap();
}
