//! Start and stop of acquisition runs.
//!
//! The loop runs on its own OS thread and hands its buffer back exactly once
//! through a oneshot channel. The controller keeps at most one active run;
//! stopping takes it out of the controller, so the same records can never be
//! handed out twice.

use crate::acquisition::{self, CancelToken, Termination};
use crate::config::WfsConfig;
use crate::error::{Result, WfsError};
use crate::executor::SdkExecutor;
use crate::measurement::{MeasurementRecord, ResultBuffer};
use chrono::{DateTime, Utc};
use daq_core::capabilities::RunOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub records: Vec<MeasurementRecord>,
    pub termination: Termination,
    /// Configuration in effect for the whole run.
    pub config: WfsConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.records.is_empty() {
            RunOutcome::NoRecords
        } else {
            RunOutcome::Records(self.records.len())
        }
    }
}

struct ActiveRun {
    run_id: Uuid,
    token: CancelToken,
    done: oneshot::Receiver<RunReport>,
}

#[derive(Default)]
pub struct RunController {
    active: Option<ActiveRun>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("active", &self.active.as_ref().map(|run| run.run_id))
            .finish()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Spawn the acquisition thread for a new run.
    pub fn start(
        &mut self,
        executor: Arc<SdkExecutor>,
        config: WfsConfig,
        max_records: Option<usize>,
    ) -> Result<Uuid> {
        if self.active.is_some() {
            return Err(WfsError::RunInProgress);
        }

        let run_id = Uuid::new_v4();
        let token = CancelToken::new();
        let (tx, rx) = oneshot::channel();
        let loop_token = token.clone();

        std::thread::Builder::new()
            .name("wfs-acquisition".into())
            .spawn(move || {
                let started_at = Utc::now();
                let mut buffer = ResultBuffer::new();
                let termination =
                    acquisition::run(&executor, &config, &loop_token, &mut buffer, max_records);
                let report = RunReport {
                    run_id,
                    records: buffer.into_records(),
                    termination,
                    config,
                    started_at,
                    finished_at: Utc::now(),
                };
                debug!(%run_id, records = report.records.len(), "Acquisition thread finished");
                if tx.send(report).is_err() {
                    warn!(%run_id, "Run report dropped: controller went away");
                }
            })?;

        info!(%run_id, max_records, "Acquisition run started");
        self.active = Some(ActiveRun {
            run_id,
            token,
            done: rx,
        });
        Ok(run_id)
    }

    /// End the active run.
    ///
    /// Waits up to `bound` for the run to end on its own, then cancels it and
    /// waits for the thread to hand back its records. Returns `None` when no
    /// run is active.
    pub async fn stop(&mut self, bound: Duration) -> Result<Option<RunReport>> {
        let Some(mut run) = self.active.take() else {
            return Ok(None);
        };

        let waited = tokio::time::timeout(bound, &mut run.done).await;
        let received = match waited {
            Ok(received) => received,
            Err(_) => {
                debug!(run_id = %run.run_id, "Run still active, cancelling");
                run.token.cancel();
                run.done.await
            }
        };
        let report = received.map_err(|_| WfsError::RunLost)?;

        info!(
            run_id = %report.run_id,
            records = report.records.len(),
            termination = ?report.termination,
            "Acquisition run stopped"
        );
        Ok(Some(report))
    }

    /// Cancel at once and discard the records.
    pub async fn abort(&mut self) -> Result<()> {
        let Some(run) = self.active.take() else {
            return Ok(());
        };
        run.token.cancel();
        let report = run.done.await.map_err(|_| WfsError::RunLost)?;
        info!(run_id = %report.run_id, discarded = report.records.len(), "Acquisition run aborted");
        Ok(())
    }
}
