//! Exclusive binding to one opened sensor.
//!
//! A [`Session`] is created by [`Session::open`] and owns the instrument
//! until [`Session::close`]. Configuration changes go through
//! [`Session::apply`], which records a configuration only after the
//! instrument accepted all of it.

use crate::camera::{CameraModel, Resolution};
use crate::config::{controls, WfsConfig};
use crate::error::{Result, WfsError};
use crate::executor::SdkExecutor;
use crate::measurement::SpotGrid;
use crate::sdk::{ops, InstrumentInfo, InstrumentListEntry, MlaInfo, Status};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn sdk_error(operation: &'static str) -> impl FnOnce(Status) -> WfsError {
    move |status| WfsError::Sdk { operation, status }
}

fn rejected(operation: &'static str) -> impl FnOnce(Status) -> WfsError {
    move |status| WfsError::ConfigurationRejected { operation, status }
}

#[derive(Debug)]
pub struct Session {
    executor: Arc<SdkExecutor>,
    entry: InstrumentListEntry,
    info: InstrumentInfo,
    model: CameraModel,
    config: Option<WfsConfig>,
    grid: SpotGrid,
    open: bool,
}

impl Session {
    /// All sensors visible to the driver library.
    pub async fn list_instruments(executor: &Arc<SdkExecutor>) -> Result<Vec<InstrumentListEntry>> {
        executor
            .call_async(ops::INSTRUMENT_LIST_LEN, |sdk| {
                let count = sdk.instrument_count().map_err(sdk_error(ops::INSTRUMENT_LIST_LEN))?;
                (0..count)
                    .map(|i| {
                        sdk.instrument_list_info(i)
                            .map_err(sdk_error(ops::INSTRUMENT_LIST_INFO))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?
    }

    /// Open the sensor at `config.instrument_index` and select its lenslet array.
    ///
    /// The camera is not configured yet; call [`apply`](Self::apply).
    pub async fn open(executor: Arc<SdkExecutor>, config: &WfsConfig) -> Result<Self> {
        let index = config.instrument_index;
        let instruments = Self::list_instruments(&executor).await?;
        let count = instruments.len() as i32;
        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| instruments.get(i))
            .cloned()
            .ok_or(WfsError::InstrumentNotFound { index, count })?;
        if entry.in_use {
            return Err(WfsError::InstrumentInUse {
                name: entry.name,
                serial: entry.serial,
            });
        }

        let resource = entry.resource.clone();
        let id_query = config.passthrough.id_query;
        let reset = config.passthrough.reset_device;
        let init_resource = resource.clone();
        executor
            .call_async(ops::INIT, move |sdk| sdk.init(&init_resource, id_query, reset))
            .await?
            .map_err(|status| WfsError::OpenFailed {
                resource: resource.clone(),
                status,
            })?;

        let mla_index = config.passthrough.mla_index;
        let opened = executor
            .call_async(ops::INSTRUMENT_INFO, move |sdk| -> Result<InstrumentInfo> {
                sdk.select_mla(mla_index).map_err(rejected(ops::SELECT_MLA))?;
                let mut info = sdk.instrument_info().map_err(sdk_error(ops::INSTRUMENT_INFO))?;
                // Revisions are informational only.
                if let Ok((driver, firmware)) = sdk.revision() {
                    info.driver_revision = driver;
                    info.firmware_revision = firmware;
                }
                Ok(info)
            })
            .await?;
        let info = match opened {
            Ok(info) => info,
            Err(err) => {
                // Release the handle we just acquired.
                let _ = executor.call_async(ops::CLOSE, |sdk| sdk.close()).await;
                return Err(err);
            }
        };

        let model = CameraModel::from_device_id(entry.device_id);
        info!(
            instrument = %info.name,
            serial = %info.serial_wfs,
            model = %model,
            resource = %resource,
            driver = %info.driver_revision,
            "Wavefront sensor opened"
        );
        Ok(Self {
            executor,
            entry,
            info,
            model,
            config: None,
            grid: SpotGrid::default(),
            open: true,
        })
    }

    /// Send `config` to the instrument.
    ///
    /// Everything is validated first. The calls then go out in vendor order;
    /// the first refusal aborts the apply and the previously applied
    /// configuration stays recorded.
    pub async fn apply(&mut self, config: WfsConfig) -> Result<()> {
        self.ensure_open()?;
        config.validate()?;
        if self.model.resolution(config.resolution_index).is_none() {
            return Err(WfsError::OutOfRange {
                control: controls::RESOLUTION_INDEX.to_string(),
                message: format!(
                    "{} not in [0, {}] for {}",
                    config.resolution_index,
                    self.model.max_resolution_index(),
                    self.model
                ),
            });
        }

        // The new bound covers the apply itself; a refusal puts the old one back.
        let previous_timeout = self.executor.call_timeout();
        self.executor.set_call_timeout(config.timing.call_timeout());
        let staged = config.clone();
        let applied = self
            .executor
            .call_async(ops::CONFIGURE_CAM, move |sdk| -> Result<SpotGrid> {
                let pass = &staged.passthrough;
                let grid = sdk
                    .configure_cam(pass.pixel_format, staged.resolution_index)
                    .map_err(rejected(ops::CONFIGURE_CAM))?;
                sdk.set_trigger_mode(pass.trigger_mode)
                    .map_err(rejected(ops::SET_TRIGGER_MODE))?;
                sdk.set_reference_plane(pass.reference_plane)
                    .map_err(rejected(ops::SET_REFERENCE_PLANE))?;
                sdk.set_pupil(&staged.pupil).map_err(rejected(ops::SET_PUPIL))?;
                Ok(grid)
            })
            .await
            .and_then(|reply| reply);
        let grid = match applied {
            Ok(grid) => grid,
            Err(err) => {
                self.executor.set_call_timeout(previous_timeout);
                warn!(error = %err, "Configuration not applied");
                return Err(err);
            }
        };

        debug!(
            resolution_index = config.resolution_index,
            spots_x = grid.spots_x,
            spots_y = grid.spots_y,
            zernike_order = config.zernike_order,
            fourier_order = config.fourier_order,
            "Configuration applied"
        );
        self.grid = grid;
        self.config = Some(config);
        Ok(())
    }

    pub async fn mla_list(&self) -> Result<Vec<MlaInfo>> {
        self.ensure_open()?;
        self.executor
            .call_async(ops::MLA_COUNT, |sdk| {
                let count = sdk.mla_count().map_err(sdk_error(ops::MLA_COUNT))?;
                (0..count)
                    .map(|i| sdk.mla_data(i).map_err(sdk_error(ops::MLA_DATA)))
                    .collect::<Result<Vec<_>>>()
            })
            .await?
    }

    /// Release the instrument. Later calls return [`WfsError::NotInitialized`].
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.executor
            .call_async(ops::CLOSE, |sdk| sdk.close())
            .await?
            .map_err(sdk_error(ops::CLOSE))?;
        info!(serial = %self.info.serial_wfs, "Wavefront sensor closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(WfsError::NotInitialized)
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn executor(&self) -> &Arc<SdkExecutor> {
        &self.executor
    }

    pub fn entry(&self) -> &InstrumentListEntry {
        &self.entry
    }

    pub fn info(&self) -> &InstrumentInfo {
        &self.info
    }

    pub fn model(&self) -> CameraModel {
        self.model
    }

    /// Last configuration the instrument accepted.
    pub fn config(&self) -> Option<&WfsConfig> {
        self.config.as_ref()
    }

    pub fn grid(&self) -> SpotGrid {
        self.grid
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.config
            .as_ref()
            .and_then(|c| self.model.resolution(c.resolution_index))
    }
}
