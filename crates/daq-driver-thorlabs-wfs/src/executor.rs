//! Dedicated SDK thread with bounded calls.
//!
//! The vendor library is not documented as thread-safe and its calls block,
//! some for several exposures. [`SdkExecutor`] owns the backend on one OS
//! thread and runs closures against it in submission order, so configuration
//! and acquisition can never touch the handle at the same time.
//!
//! Every call waits at most the configured timeout. A call that overruns
//! marks the executor as wedged: the worker is still stuck inside the vendor
//! library, so every later call fails fast with
//! [`WfsError::SessionWedged`] instead of queueing behind it.

use crate::error::{Result, WfsError};
use crate::sdk::WfsSdk;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce(&mut dyn WfsSdk) + Send>;

pub struct SdkExecutor {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    wedged: Arc<AtomicBool>,
    call_timeout_ms: AtomicU64,
}

impl std::fmt::Debug for SdkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkExecutor")
            .field("wedged", &self.is_wedged())
            .field("call_timeout", &self.call_timeout())
            .finish_non_exhaustive()
    }
}

impl SdkExecutor {
    /// Move `sdk` onto a new worker thread.
    pub fn spawn(mut sdk: Box<dyn WfsSdk>, call_timeout: Duration) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name("wfs-sdk".into())
            .spawn(move || {
                debug!("SDK worker started");
                for job in rx {
                    job(sdk.as_mut());
                }
                // Dropping the backend releases the handle if still open.
                drop(sdk);
                debug!("SDK worker stopped");
            })?;

        Ok(Self {
            jobs: Some(tx),
            worker: Some(worker),
            wedged: Arc::new(AtomicBool::new(false)),
            call_timeout_ms: AtomicU64::new(duration_ms(call_timeout)),
        })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_call_timeout(&self, timeout: Duration) {
        self.call_timeout_ms
            .store(duration_ms(timeout), Ordering::Relaxed);
    }

    /// True once a call has overrun its timeout.
    pub fn is_wedged(&self) -> bool {
        self.wedged.load(Ordering::Acquire)
    }

    /// Run `f` on the SDK thread, waiting at most the configured timeout.
    pub fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WfsSdk) -> T + Send + 'static,
    {
        self.call_with_timeout(operation, self.call_timeout(), f)
    }

    pub fn call_with_timeout<T, F>(&self, operation: &'static str, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WfsSdk) -> T + Send + 'static,
    {
        if self.is_wedged() {
            return Err(WfsError::SessionWedged { operation });
        }
        let jobs = self.jobs.as_ref().ok_or(WfsError::ExecutorGone)?;

        let (reply_tx, reply_rx) = bounded::<T>(1);
        let job: Job = Box::new(move |sdk: &mut dyn WfsSdk| {
            // The caller may have given up already; nothing to report then.
            let _ = reply_tx.send(f(sdk));
        });
        jobs.send(job).map_err(|_| WfsError::ExecutorGone)?;
        trace!(operation, "SDK call submitted");

        match reply_rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                self.wedged.store(true, Ordering::Release);
                error!(operation, timeout_ms = duration_ms(timeout), "SDK call timed out; session is now unusable");
                Err(WfsError::Timeout {
                    operation,
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(WfsError::ExecutorGone),
        }
    }

    /// [`call`](Self::call) from async code without blocking the runtime.
    pub async fn call_async<T, F>(self: &Arc<Self>, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WfsSdk) -> T + Send + 'static,
    {
        let executor = Arc::clone(self);
        tokio::task::spawn_blocking(move || executor.call(operation, f))
            .await
            .map_err(|_| WfsError::ExecutorGone)?
    }
}

impl Drop for SdkExecutor {
    fn drop(&mut self) {
        // Closing the queue lets the worker finish and drop the backend.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if self.is_wedged() {
                // Joining would block on the hung vendor call.
                debug!("Detaching wedged SDK worker");
            } else if worker.join().is_err() {
                error!("SDK worker panicked");
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
