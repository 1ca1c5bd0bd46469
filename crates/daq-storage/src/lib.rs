//! Storage backends for finished acquisition runs.
//!
//! Every backend implements [`daq_core::TableSink`]: one call persists one
//! [`daq_core::ColumnTable`] as a named group. Writes are synchronous and
//! meant to run under `tokio::task::spawn_blocking`.
//!
//! - [`Hdf5TableSink`]: one HDF5 group per run, one dataset per column
//!   (feature `storage_hdf5`)
//! - [`JsonLinesSink`]: plain-text dump, one JSON object per record
//! - [`MemorySink`]: keeps tables in memory for tests and inspection

pub mod hdf5_sink;
pub mod jsonl_sink;
pub mod memory_sink;

pub use hdf5_sink::Hdf5TableSink;
pub use jsonl_sink::JsonLinesSink;
pub use memory_sink::MemorySink;

use daq_core::error::DaqError;

/// Flatten an internal storage failure into the workspace error type.
pub(crate) fn storage_error(err: anyhow::Error) -> DaqError {
    DaqError::Storage(format!("{err:#}"))
}
