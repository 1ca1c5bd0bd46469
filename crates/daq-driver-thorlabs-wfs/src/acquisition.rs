//! Triggered acquisition loop.
//!
//! Runs on the acquisition thread: capture, and when the sensor reports that
//! no trigger arrived, sleep briefly and try again; when a frame arrived, run
//! the pipeline and append the record. Cancellation is checked before every
//! capture, between not-triggered polls and before the pipeline starts, so
//! a cancelled run never begins processing a new frame.

use crate::config::WfsConfig;
use crate::error::WfsError;
use crate::executor::SdkExecutor;
use crate::measurement::{CaptureInfo, ResultBuffer};
use crate::pipeline;
use crate::sdk::{ops, DeviceStatus, Status};
use daq_core::limits::{MAX_RECORDS_PER_RUN, TRIGGER_LOG_EVERY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Per-run stop request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why the loop ended.
#[derive(Debug)]
pub enum Termination {
    /// Stop was requested.
    Cancelled,
    /// The record limit was reached.
    Completed,
    /// Capture or the SDK failed; records collected so far are kept.
    Failed(WfsError),
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed(_))
    }
}

enum Capture {
    NotTriggered,
    Frame(CaptureInfo),
}

/// Capture one image and classify it by the device status.
fn capture(executor: &SdkExecutor) -> Result<Capture, WfsError> {
    let (taken, status) = executor.call(ops::TAKE_SPOTFIELD_IMAGE, |sdk| {
        let taken = sdk.take_spotfield_image_auto_expos();
        (taken, sdk.status())
    })?;
    let status: Option<DeviceStatus> = status.ok();
    let awaiting = status.is_some_and(DeviceStatus::awaiting_trigger);

    match taken {
        Ok(_) | Err(_) if awaiting => Ok(Capture::NotTriggered),
        Err(status) => Err(WfsError::CaptureFailed { status }),
        Ok(info) => match status {
            Some(bits) if bits.image_unusable() => Err(WfsError::ImageQuality {
                device_status: bits.bits(),
            }),
            Some(_) => Ok(Capture::Frame(info)),
            None => Err(WfsError::CaptureFailed {
                status: Status::new(0, "device status unavailable after capture"),
            }),
        },
    }
}

/// Collect records into `buffer` until cancelled, failed or `max_records` reached.
pub fn run(
    executor: &SdkExecutor,
    config: &WfsConfig,
    token: &CancelToken,
    buffer: &mut ResultBuffer,
    max_records: Option<usize>,
) -> Termination {
    let limit = max_records.unwrap_or(MAX_RECORDS_PER_RUN).min(MAX_RECORDS_PER_RUN);
    let poll_interval = config.timing.trigger_poll_interval();
    let mut polls: u64 = 0;

    loop {
        if token.is_cancelled() {
            return Termination::Cancelled;
        }
        if buffer.len() >= limit {
            return Termination::Completed;
        }

        let info = match capture(executor) {
            Ok(Capture::NotTriggered) => {
                polls += 1;
                if polls % TRIGGER_LOG_EVERY == 0 {
                    debug!(polls, records = buffer.len(), "Waiting for trigger");
                }
                std::thread::sleep(poll_interval);
                continue;
            }
            Ok(Capture::Frame(info)) => info,
            Err(err) => {
                error!(error = %err, records = buffer.len(), "Acquisition stopped");
                return Termination::Failed(err);
            }
        };
        polls = 0;

        if token.is_cancelled() {
            debug!("Stop requested before processing; frame discarded");
            return Termination::Cancelled;
        }

        let index = buffer.next_index();
        match pipeline::process(executor, config, index, info) {
            Ok(record) => {
                info!(
                    index,
                    exposure_ms = info.exposure_ms,
                    failed_steps = record.failures().len(),
                    "Wavefront recorded"
                );
                buffer.push(record);
            }
            Err(err) => {
                error!(error = %err, index, "Processing aborted");
                return Termination::Failed(err);
            }
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::measurement::PipelineStep;
    use crate::mock::{codes, MockProbe, MockWfs};
    use std::time::Duration;

    fn armed(mock: MockWfs) -> (SdkExecutor, MockProbe) {
        let probe = mock.probe();
        let executor = SdkExecutor::spawn(Box::new(mock), Duration::from_secs(1)).unwrap();
        executor
            .call("setup", |sdk| {
                sdk.init("USB::0x1313::0x0000::1", false, false)?;
                sdk.configure_cam(wfs_sys::PIXEL_FORMAT_MONO8, 1).map(|_| ())
            })
            .unwrap()
            .unwrap();
        probe.clear();
        (executor, probe)
    }

    fn fast_config() -> WfsConfig {
        let mut config = WfsConfig::default();
        config.timing.trigger_poll_interval_ms = 0;
        config
    }

    #[test]
    fn retries_until_triggered_then_records_once() {
        let (executor, probe) = armed(MockWfs::new().trigger_pattern([5]));
        let mut buffer = ResultBuffer::new();
        let termination = run(&executor, &fast_config(), &CancelToken::new(), &mut buffer, Some(1));

        assert!(matches!(termination, Termination::Completed));
        assert_eq!(buffer.len(), 1);
        assert_eq!(probe.count(ops::TAKE_SPOTFIELD_IMAGE), 6);
        assert_eq!(probe.count(ops::CALC_SPOTS), 1);
    }

    #[test]
    fn records_arrive_in_capture_order() {
        let (executor, _) = armed(MockWfs::new().trigger_pattern([0, 2, 1, 0]));
        let mut buffer = ResultBuffer::new();
        run(&executor, &fast_config(), &CancelToken::new(), &mut buffer, Some(4));

        let indices: Vec<usize> = buffer.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let times: Vec<_> = buffer.iter().map(|r| r.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn cancelled_before_capture_yields_empty_buffer() {
        let (executor, probe) = armed(MockWfs::new());
        let token = CancelToken::new();
        token.cancel();
        let mut buffer = ResultBuffer::new();
        let termination = run(&executor, &fast_config(), &token, &mut buffer, None);

        assert!(matches!(termination, Termination::Cancelled));
        assert!(buffer.is_empty());
        assert_eq!(probe.count(ops::TAKE_SPOTFIELD_IMAGE), 0);
    }

    #[test]
    fn cancel_while_waiting_for_trigger() {
        let (executor, _) = armed(MockWfs::new().never_triggered());
        let token = CancelToken::new();
        let stopper = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                token.cancel();
            })
        };
        let mut buffer = ResultBuffer::new();
        let termination = run(&executor, &WfsConfig::default(), &token, &mut buffer, None);
        stopper.join().unwrap();

        assert!(matches!(termination, Termination::Cancelled));
        assert!(buffer.is_empty());
    }

    #[test]
    fn image_quality_fault_ends_run() {
        let (executor, _) = armed(MockWfs::new().image_quality_fault_on(1));
        let mut buffer = ResultBuffer::new();
        let termination = run(&executor, &fast_config(), &CancelToken::new(), &mut buffer, None);

        match termination {
            Termination::Failed(WfsError::ImageQuality { device_status }) => {
                assert_ne!(device_status & wfs_sys::WFS_STATBIT_PTH, 0);
            }
            other => panic!("unexpected termination: {other:?}"),
        }
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn capture_error_is_not_a_missing_trigger() {
        let (executor, _) = armed(MockWfs::new().capture_error_on(0, codes::CAPTURE_FAILED));
        let mut buffer = ResultBuffer::new();
        let termination = run(&executor, &fast_config(), &CancelToken::new(), &mut buffer, None);
        assert!(matches!(
            termination,
            Termination::Failed(WfsError::CaptureFailed { .. })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn step_failures_still_produce_records() {
        let mock = MockWfs::new().fail_step(ops::FOURIER_OPTOMETRIC, codes::FIT_FAILED);
        let (executor, _) = armed(mock);
        let mut buffer = ResultBuffer::new();
        run(&executor, &fast_config(), &CancelToken::new(), &mut buffer, Some(2));
        assert_eq!(buffer.len(), 2);
        assert!(buffer
            .iter()
            .all(|r| r.failure_mask() == PipelineStep::FourierOptometric.bit()));
    }
}
