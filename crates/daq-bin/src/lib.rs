//! Support code for the `wfs-daq` binary.

pub mod settings;

pub use settings::{OutputFormat, OutputSettings, Settings};
