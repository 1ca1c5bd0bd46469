//! Thorlabs Shack-Hartmann wavefront sensor driver.
//!
//! Drives WFS10/WFS20/WFS30/WFS40 sensors through the vendor `WFS_*` library
//! for hardware-timed runs: the sensor waits for an external trigger, every
//! triggered frame is reduced to spots, wavefront, statistics, Fourier
//! optometrics and a Zernike fit, and the records of a run are written as one
//! column table when the run ends.
//!
//! # Layout
//!
//! - [`sdk`]: the vendor call surface as a trait, with [`mock`] and `ffi` backends
//! - [`executor`]: one thread owns the SDK; every call is bounded by a timeout
//! - [`session`]: open, configure and close one instrument
//! - [`pipeline`] / [`acquisition`]: per-frame processing and the trigger loop
//! - [`controller`]: start and stop of runs
//! - [`persist`]: records to [`daq_core::ColumnTable`]
//! - [`driver`]: [`WfsDriver`], the [`daq_core::BufferedDevice`] implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::BufferedDevice;
//! use daq_driver_thorlabs_wfs::{MockWfs, WfsConfig, WfsDriver};
//!
//! let driver = WfsDriver::mock(MockWfs::new(), WfsConfig::default())?;
//! driver.init().await?;
//! driver.transition_to_buffered(sink, "wavefront_sensor").await?;
//! // ... external triggers arrive ...
//! let outcome = driver.transition_to_manual(false).await?;
//! driver.shutdown().await?;
//! ```

pub mod acquisition;
pub mod camera;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod executor;
#[cfg(feature = "hardware")]
pub mod ffi;
pub mod measurement;
#[cfg(feature = "mock")]
pub mod mock;
pub mod persist;
pub mod pipeline;
pub mod sdk;
pub mod session;

pub use camera::{CameraModel, Resolution};
pub use config::{PassThrough, PupilConfig, TimingConfig, WfsConfig};
pub use controller::RunReport;
pub use driver::WfsDriver;
pub use error::{Result, WfsError};
pub use measurement::{MeasurementRecord, PipelineStep};
#[cfg(feature = "mock")]
pub use mock::MockWfs;
pub use sdk::{InstrumentInfo, InstrumentListEntry, MlaInfo, WfsSdk};
