//! Shared hard limits and timeouts.
//!
//! This module centralizes:
//! - Timeout durations for blocking vendor calls and run shutdown
//! - Poll intervals for trigger waits
//! - Size limits that bound per-record allocations

use crate::error::DaqError;
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default timeout for a single blocking vendor call (10 seconds).
///
/// Auto-exposure captures can take several exposures to converge, so this is
/// generous. A call that exceeds it is treated as a fatal run error.
pub const VENDOR_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for graceful shutdown operations (2 seconds).
///
/// Used when stopping an acquisition run: the run gets this long to finish
/// on its own before it is cancelled.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between capture attempts while waiting for a hardware trigger.
pub const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Number of not-triggered polls between "waiting for trigger" log lines.
pub const TRIGGER_LOG_EVERY: u64 = 100;

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum number of records kept in one run's result buffer.
pub const MAX_RECORDS_PER_RUN: usize = 1_000_000;

/// Maximum cells in one 2-D map (spot grid) accepted from a driver.
pub const MAX_MAP_CELLS: usize = 1024 * 1024;

/// Validate a map shape against [`MAX_MAP_CELLS`].
pub fn validate_map_shape(rows: usize, cols: usize) -> Result<usize, DaqError> {
    let cells = rows
        .checked_mul(cols)
        .ok_or_else(|| DaqError::Configuration(format!("map shape {rows}x{cols} overflows")))?;
    if cells > MAX_MAP_CELLS {
        return Err(DaqError::Configuration(format!(
            "map shape {rows}x{cols} exceeds maximum {MAX_MAP_CELLS} cells"
        )));
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_shape_limits() {
        assert_eq!(validate_map_shape(40, 50).unwrap(), 2000);
        assert!(validate_map_shape(usize::MAX, 2).is_err());
        assert!(validate_map_shape(2048, 2048).is_err());
    }
}
