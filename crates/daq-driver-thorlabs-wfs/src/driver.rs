//! Host-facing wavefront sensor device.
//!
//! [`WfsDriver`] ties a session, the run controller and the operator controls
//! together behind [`BufferedDevice`]. All state sits behind one async mutex,
//! so lifecycle calls from the host are strictly serialized.

use crate::camera::CameraModel;
use crate::config::WfsConfig;
use crate::controller::{RunController, RunReport};
use crate::acquisition::Termination;
use crate::error::{Result, WfsError};
use crate::executor::SdkExecutor;
use crate::persist::{records_to_table, RunContext};
use crate::sdk::{InstrumentInfo, InstrumentListEntry, MlaInfo, WfsSdk};
use crate::session::Session;
use async_trait::async_trait;
use daq_core::capabilities::{BufferedDevice, FrontPanelValues, Parameterized, RunOutcome, TableSink};
use daq_core::error::{AppResult, DaqError};
use daq_core::observable::ParameterSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

struct PendingRun {
    sink: Arc<dyn TableSink>,
    group: String,
}

#[derive(Default)]
struct DriverState {
    session: Option<Session>,
    controller: RunController,
    pending: Option<PendingRun>,
}

pub struct WfsDriver {
    executor: Arc<SdkExecutor>,
    defaults: WfsConfig,
    state: Mutex<DriverState>,
    params: ParameterSet,
}

impl std::fmt::Debug for WfsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WfsDriver")
            .field("executor", &self.executor)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl WfsDriver {
    /// Driver over any backend; `defaults` is applied by `init`.
    pub fn with_sdk(sdk: Box<dyn WfsSdk>, defaults: WfsConfig) -> Result<Self> {
        defaults.validate()?;
        let executor = SdkExecutor::spawn(sdk, defaults.timing.call_timeout())?;
        let params = defaults.controls();
        Ok(Self {
            executor: Arc::new(executor),
            defaults,
            state: Mutex::new(DriverState::default()),
            params,
        })
    }

    #[cfg(feature = "mock")]
    pub fn mock(mock: crate::mock::MockWfs, defaults: WfsConfig) -> Result<Self> {
        Self::with_sdk(Box::new(mock), defaults)
    }

    #[cfg(feature = "hardware")]
    pub fn hardware(defaults: WfsConfig) -> Result<Self> {
        Self::with_sdk(Box::new(crate::ffi::FfiSdk::new()), defaults)
    }

    pub async fn list_instruments(&self) -> Result<Vec<InstrumentListEntry>> {
        Session::list_instruments(&self.executor).await
    }

    pub async fn instrument_info(&self) -> Option<InstrumentInfo> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|s| s.info().clone())
    }

    pub async fn camera_model(&self) -> Option<CameraModel> {
        let state = self.state.lock().await;
        state.session.as_ref().map(Session::model)
    }

    pub async fn mla_list(&self) -> Result<Vec<MlaInfo>> {
        let state = self.state.lock().await;
        let session = state.session.as_ref().ok_or(WfsError::NotInitialized)?;
        session.mla_list().await
    }

    /// Configuration the instrument currently runs with.
    pub async fn applied_config(&self) -> Option<WfsConfig> {
        let state = self.state.lock().await;
        state.session.as_ref().and_then(|s| s.config().cloned())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.controller.is_running()
    }

    /// Start a run that ends by itself after `max_records` records.
    pub async fn start_run(
        &self,
        sink: Arc<dyn TableSink>,
        group: &str,
        max_records: Option<usize>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let session = state.session.as_ref().ok_or(WfsError::NotInitialized)?;
        let config = session.config().cloned().ok_or(WfsError::NotInitialized)?;
        let executor = Arc::clone(session.executor());
        state.controller.start(executor, config, max_records)?;
        info!(group, sink = %sink.describe(), "Buffered run armed");
        state.pending = Some(PendingRun {
            sink,
            group: group.to_string(),
        });
        Ok(())
    }

    fn sync_params(&self, config: &WfsConfig) {
        for (name, value) in config.front_panel() {
            if let Some(param) = self.params.get(&name) {
                if let Err(err) = param.set_json(value) {
                    warn!(control = %name, error = %err, "Control not updated");
                }
            }
        }
    }

    async fn persist(&self, state: &DriverState, report: &RunReport, pending: PendingRun) -> AppResult<()> {
        let session = state.session.as_ref();
        let context = RunContext {
            config: &report.config,
            instrument: session.map(Session::info),
            model: session.map(Session::model),
            grid: session.map(Session::grid).unwrap_or_default(),
        };
        let table = records_to_table(&pending.group, context, &report.records)?;
        let sink = pending.sink;
        let described = sink.describe();
        tokio::task::spawn_blocking(move || sink.write_table(&table))
            .await
            .map_err(|e| DaqError::Storage(format!("storage task failed: {e}")))??;
        info!(
            group = %pending.group,
            sink = %described,
            records = report.records.len(),
            "Run persisted"
        );
        Ok(())
    }
}

impl Parameterized for WfsDriver {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

#[async_trait]
impl BufferedDevice for WfsDriver {
    async fn init(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.session.as_ref().is_some_and(Session::is_open) {
            return Ok(());
        }
        let mut session = Session::open(Arc::clone(&self.executor), &self.defaults).await?;
        if let Err(err) = session.apply(self.defaults.clone()).await {
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "Close after failed init also failed");
            }
            return Err(err.into());
        }
        self.sync_params(&self.defaults);
        state.session = Some(session);
        Ok(())
    }

    async fn program_manual(&self, values: FrontPanelValues) -> AppResult<FrontPanelValues> {
        let mut state = self.state.lock().await;
        if state.controller.is_running() {
            return Err(WfsError::RunInProgress.into());
        }
        let session = state.session.as_mut().ok_or(WfsError::NotInitialized)?;
        let current = session.config().cloned().unwrap_or_else(|| self.defaults.clone());
        let next = current.apply_front_panel(&values)?;
        session.apply(next.clone()).await?;
        self.sync_params(&next);
        Ok(next.front_panel())
    }

    async fn transition_to_buffered(&self, sink: Arc<dyn TableSink>, group: &str) -> AppResult<()> {
        Ok(self.start_run(sink, group, None).await?)
    }

    async fn transition_to_manual(&self, abort: bool) -> AppResult<RunOutcome> {
        let mut state = self.state.lock().await;
        let pending = state.pending.take();

        if abort {
            state.controller.abort().await?;
            return Ok(RunOutcome::Aborted);
        }

        let stop_wait = state
            .session
            .as_ref()
            .and_then(Session::config)
            .unwrap_or(&self.defaults)
            .timing
            .stop_wait();
        let Some(report) = state.controller.stop(stop_wait).await? else {
            warn!("transition_to_manual without an active run");
            return Ok(RunOutcome::NoRecords);
        };

        let outcome = report.outcome();
        match (&outcome, pending) {
            (RunOutcome::NoRecords, _) => {
                warn!(run_id = %report.run_id, "Run ended without records; nothing written");
            }
            (_, Some(pending)) => self.persist(&state, &report, pending).await?,
            (_, None) => {
                error!(run_id = %report.run_id, "Run has no sink; records dropped");
            }
        }

        match report.termination {
            Termination::Failed(err) => Err(err.into()),
            Termination::Cancelled | Termination::Completed => Ok(outcome),
        }
    }

    async fn shutdown(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let mut errors: Vec<DaqError> = Vec::new();

        if state.controller.is_running() {
            warn!("Shutdown during an active run; records discarded");
            if let Err(err) = state.controller.abort().await {
                errors.push(err.into());
            }
        }
        state.pending = None;
        if let Some(mut session) = state.session.take() {
            if let Err(err) = session.close().await {
                errors.push(err.into());
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(DaqError::ShutdownFailed(errors)),
        }
    }
}
