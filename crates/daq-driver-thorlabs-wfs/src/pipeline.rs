//! Post-processing of one captured frame.
//!
//! The nine steps always run in the same order and each is recorded on its
//! own: a failing step is logged and stored as [`Step::Failed`], and the next
//! step still runs. Only executor failures (timeout, wedged session) abort,
//! because they mean the instrument can no longer be used at all.

use crate::config::WfsConfig;
use crate::error::Result;
use crate::executor::SdkExecutor;
use crate::measurement::{
    CaptureInfo, MeasurementRecord, PipelineStep, SpotMaps, SpotSummary, Step,
};
use crate::sdk::{ops, Status, WfsSdk};
use chrono::Utc;
use tracing::warn;

/// Vendor error tagged with the call that returned it.
type Tagged<T> = std::result::Result<T, (&'static str, Status)>;

fn at(operation: &'static str) -> impl FnOnce(Status) -> (&'static str, Status) {
    move |status| (operation, status)
}

/// Run one step on the SDK thread and record its outcome.
///
/// `operation` names the step's first vendor call for the executor's timeout
/// report; a failure records the call that actually failed.
fn step<T, F>(executor: &SdkExecutor, step: PipelineStep, operation: &'static str, f: F) -> Result<Step<T>>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn WfsSdk) -> Tagged<T> + Send + 'static,
{
    let outcome = match executor.call(operation, f)? {
        Ok(value) => Step::Ok(value),
        Err((failed, status)) => Step::from_result(step, failed, Err(status)),
    };
    if let Some(failure) = outcome.failure() {
        warn!(
            step = %failure.step,
            operation = %failure.operation,
            code = failure.status.code,
            message = %failure.status.message,
            "Pipeline step failed"
        );
    }
    Ok(outcome)
}

/// Process the frame just captured into a record with the given index.
pub fn process(
    executor: &SdkExecutor,
    config: &WfsConfig,
    index: usize,
    capture: CaptureInfo,
) -> Result<MeasurementRecord> {
    let timestamp = Utc::now();
    let pass = config.passthrough.clone();

    let (noise_cut, calc_dia) = (pass.dynamic_noise_cut, pass.calculate_diameters);
    let spots = step(executor, PipelineStep::Spots, ops::CALC_SPOTS, move |sdk| {
        sdk.calc_spots_centr_dia_intens(noise_cut, calc_dia)
            .map_err(at(ops::CALC_SPOTS))?;
        let (x, _) = sdk.spot_centroids().map_err(at(ops::SPOT_CENTROIDS))?;
        Ok(SpotSummary {
            detected: x.as_slice().iter().filter(|v| v.is_finite()).count(),
        })
    })?;

    let beam = step(executor, PipelineStep::BeamCentroid, ops::BEAM_CENTROID, |sdk| {
        sdk.calc_beam_centroid_dia().map_err(at(ops::BEAM_CENTROID))
    })?;

    let cancel_tilt = pass.cancel_tilt;
    let deviations = step(
        executor,
        PipelineStep::ReferenceDeviations,
        ops::REFERENCE_DEVIATIONS,
        move |sdk| {
            sdk.calc_spot_to_reference_deviations(cancel_tilt)
                .map_err(at(ops::REFERENCE_DEVIATIONS))
        },
    )?;

    let spot_maps = step(executor, PipelineStep::SpotMaps, ops::SPOT_DEVIATIONS, |sdk| {
        let (deviation_x, deviation_y) = sdk.spot_deviations().map_err(at(ops::SPOT_DEVIATIONS))?;
        let intensity = sdk.spot_intensities().map_err(at(ops::SPOT_INTENSITIES))?;
        Ok(SpotMaps {
            deviation_x,
            deviation_y,
            intensity,
        })
    })?;

    let (wavefront_type, limit) = (pass.wavefront_type, config.limit_to_pupil);
    let wavefront = step(executor, PipelineStep::Wavefront, ops::CALC_WAVEFRONT, move |sdk| {
        sdk.calc_wavefront(wavefront_type, limit)
            .map_err(at(ops::CALC_WAVEFRONT))
    })?;

    let statistics = step(
        executor,
        PipelineStep::Statistics,
        ops::WAVEFRONT_STATISTICS,
        |sdk| {
            sdk.calc_wavefront_statistics()
                .map_err(at(ops::WAVEFRONT_STATISTICS))
        },
    )?;

    let (zernike_order, fourier_order) = (config.zernike_order, config.fourier_order);
    let fourier = step(
        executor,
        PipelineStep::FourierOptometric,
        ops::FOURIER_OPTOMETRIC,
        move |sdk| {
            sdk.calc_fourier_optometric(zernike_order, fourier_order)
                .map_err(at(ops::FOURIER_OPTOMETRIC))
        },
    )?;

    let zernike = step(executor, PipelineStep::ZernikeFit, ops::ZERNIKE_LSF, move |sdk| {
        sdk.zernike_lsf(zernike_order).map_err(at(ops::ZERNIKE_LSF))
    })?;

    // Reconstruct at the order actually fitted when the vendor lowered it.
    let fit_order = zernike.ok().map_or(zernike_order, |z| z.order);
    let spherical_reference = pass.spherical_reference;
    let fit_error = step(
        executor,
        PipelineStep::FitError,
        ops::RECONSTR_DEVIATIONS,
        move |sdk| {
            sdk.calc_reconstr_deviations(fit_order, spherical_reference)
                .map_err(at(ops::RECONSTR_DEVIATIONS))
        },
    )?;

    Ok(MeasurementRecord {
        index,
        timestamp,
        capture,
        spots,
        beam,
        deviations,
        spot_maps,
        wavefront,
        statistics,
        fourier,
        zernike,
        fit_error,
    })
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::error::WfsError;
    use crate::mock::{codes, MockProbe, MockWfs};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn configured(mock: MockWfs, timeout: Duration) -> (SdkExecutor, MockProbe) {
        let probe = mock.probe();
        let executor = SdkExecutor::spawn(Box::new(mock), timeout).unwrap();
        executor
            .call("setup", |sdk| {
                sdk.init("USB::0x1313::0x0000::1", false, false)?;
                sdk.configure_cam(wfs_sys::PIXEL_FORMAT_MONO8, 1)?;
                sdk.take_spotfield_image_auto_expos()
            })
            .unwrap()
            .unwrap();
        probe.clear();
        (executor, probe)
    }

    #[test]
    fn runs_every_step_in_order() {
        let (executor, probe) = configured(MockWfs::new(), Duration::from_secs(1));
        let record = process(&executor, &WfsConfig::default(), 0, CaptureInfo::default()).unwrap();

        assert!(record.failures().is_empty());
        assert_eq!(record.spots.ok().unwrap().detected, 40 * 40);
        assert_eq!(record.zernike.ok().unwrap().coefficients_um.len(), 15);
        assert_eq!(record.wavefront.ok().unwrap().rows(), 40);
        assert_eq!(
            probe.calls(),
            vec![
                ops::CALC_SPOTS,
                ops::SPOT_CENTROIDS,
                ops::BEAM_CENTROID,
                ops::REFERENCE_DEVIATIONS,
                ops::SPOT_DEVIATIONS,
                ops::SPOT_INTENSITIES,
                ops::CALC_WAVEFRONT,
                ops::WAVEFRONT_STATISTICS,
                ops::FOURIER_OPTOMETRIC,
                ops::ZERNIKE_LSF,
                ops::RECONSTR_DEVIATIONS,
            ]
        );
    }

    #[test]
    #[traced_test]
    fn fourier_failure_does_not_stop_zernike() {
        let mock = MockWfs::new().fail_step(ops::FOURIER_OPTOMETRIC, codes::FIT_FAILED);
        let (executor, _) = configured(mock, Duration::from_secs(1));
        let record = process(&executor, &WfsConfig::default(), 3, CaptureInfo::default()).unwrap();

        assert_eq!(record.index, 3);
        let failure = record.fourier.failure().unwrap();
        assert_eq!(failure.step, PipelineStep::FourierOptometric);
        assert_eq!(failure.operation, ops::FOURIER_OPTOMETRIC);
        assert_eq!(failure.status.code, codes::FIT_FAILED);
        assert!(record.zernike.is_ok());
        assert!(record.fit_error.is_ok());
        assert_eq!(record.failure_mask(), PipelineStep::FourierOptometric.bit());
        assert!(logs_contain("Pipeline step failed"));
    }

    #[test]
    fn every_step_can_fail_independently() {
        let mock = MockWfs::new()
            .fail_step(ops::CALC_SPOTS, codes::NO_SPOTS)
            .fail_step(ops::CALC_WAVEFRONT, codes::NO_SPOTS);
        let (executor, _) = configured(mock, Duration::from_secs(1));
        let record = process(&executor, &WfsConfig::default(), 0, CaptureInfo::default()).unwrap();
        assert!(!record.spots.is_ok());
        assert!(!record.wavefront.is_ok());
        assert!(record.statistics.is_ok());
        assert_eq!(record.failures().len(), 2);
    }

    #[test]
    fn spot_map_failure_names_the_failing_call() {
        let mock = MockWfs::new().fail_step(ops::SPOT_INTENSITIES, codes::NO_SPOTS);
        let (executor, _) = configured(mock, Duration::from_secs(1));
        let record = process(&executor, &WfsConfig::default(), 0, CaptureInfo::default()).unwrap();

        let failure = record.spot_maps.failure().unwrap();
        assert_eq!(failure.step, PipelineStep::SpotMaps);
        assert_eq!(failure.operation, ops::SPOT_INTENSITIES);
        assert_eq!(record.failure_mask(), PipelineStep::SpotMaps.bit());
    }

    #[test]
    fn hung_step_aborts_processing() {
        let mock = MockWfs::new().hang_on(ops::CALC_WAVEFRONT, Duration::from_millis(300));
        let (executor, _) = configured(mock, Duration::from_millis(30));
        let err = process(&executor, &WfsConfig::default(), 0, CaptureInfo::default()).unwrap_err();
        assert!(matches!(
            err,
            WfsError::Timeout {
                operation: ops::CALC_WAVEFRONT,
                ..
            }
        ));
    }
}
