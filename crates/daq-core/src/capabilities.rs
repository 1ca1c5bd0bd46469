//! Device Capabilities
//!
//! Small traits that describe what a device can do for its host:
//!
//! - [`BufferedDevice`]: the manual/buffered lifecycle a sequencing host drives
//! - [`Parameterized`]: enumerate operator controls for GUI rendering
//! - [`TableSink`]: where a finished run's records go
//!
//! # Lifecycle
//!
//! ```text
//! init ──► program_manual* ──► transition_to_buffered ──► transition_to_manual ──► ... ──► shutdown
//! ```
//!
//! `program_manual` may be called any number of times while no run is active.
//! `transition_to_manual` always ends the run, whether or not it produced data.

use crate::data::ColumnTable;
use crate::error::AppResult;
use crate::observable::ParameterSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Front-panel values keyed by control name, as a host GUI sends them.
pub type FrontPanelValues = BTreeMap<String, serde_json::Value>;

/// What a finished buffered run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// K records were collected and persisted.
    Records(usize),
    /// The run ended without a single record (e.g. never triggered).
    ///
    /// Not an error: the operator is told, nothing is written.
    NoRecords,
    /// The run was aborted; collected records were discarded.
    Aborted,
}

/// Capability: Table Persistence
///
/// Synchronous by contract: async callers wrap it in `spawn_blocking`.
pub trait TableSink: Send + Sync {
    /// Write one table as a group. Writing the same group twice is an error.
    fn write_table(&self, table: &ColumnTable) -> AppResult<()>;

    /// Short backend label for logs.
    fn describe(&self) -> String;
}

/// Capability: Buffered Lifecycle
///
/// # Contract
/// - `init()` opens the instrument and applies default configuration
/// - `program_manual()` validates every value before touching hardware and
///   returns the values actually applied
/// - `transition_to_buffered()` starts a run whose records go to `sink` under `group`
/// - `transition_to_manual(abort)` ends the run; with `abort` nothing is persisted
/// - `shutdown()` ends any run and releases the instrument
#[async_trait]
pub trait BufferedDevice: Send + Sync {
    async fn init(&self) -> AppResult<()>;

    async fn program_manual(&self, values: FrontPanelValues) -> AppResult<FrontPanelValues>;

    async fn transition_to_buffered(&self, sink: Arc<dyn TableSink>, group: &str) -> AppResult<()>;

    async fn transition_to_manual(&self, abort: bool) -> AppResult<RunOutcome>;

    async fn shutdown(&self) -> AppResult<()>;
}

/// Capability: Parameterized
///
/// Devices expose their operator controls as observables so generic code can
/// enumerate names, ranges and steps.
pub trait Parameterized: Send + Sync {
    fn parameters(&self) -> &ParameterSet;
}
