//! `daq-core`
//!
//! Core types shared by the wavefront sensor driver, the storage backends and
//! the command line tool.
//!
//! ## Key Types
//!
//! - [`error::DaqError`]: workspace error type with categorized driver errors
//! - [`observable::Observable`]: validated operator controls with GUI metadata
//! - [`data::ColumnTable`]: per-run table handed to storage
//! - [`capabilities::BufferedDevice`]: host lifecycle contract

pub mod capabilities;
pub mod data;
pub mod error;
pub mod limits;
pub mod observable;

pub use capabilities::{BufferedDevice, FrontPanelValues, Parameterized, RunOutcome, TableSink};
pub use data::{AttrValue, Column, ColumnData, ColumnTable};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};
pub use observable::{Observable, ObservableMetadata, ParameterBase, ParameterSet};
