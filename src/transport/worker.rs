use crate::error::Error;
use crate::transport::client::{DapTcpClient, Endpoints};
use log::{debug, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Supervised transport worker thread.
///
/// The worker reports its result through a completion channel, so the owner can wait for
/// termination with a deadline instead of assuming the thread exits on its own.
pub struct WorkerHandle {
    handle: Option<JoinHandle<()>>,
    done: Receiver<Result<(), String>>,
}

impl WorkerHandle {
    pub fn spawn(client: DapTcpClient, endpoints: Endpoints) -> Result<Self, Error> {
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("nbdap-client".to_string())
            .spawn(move || {
                let result = client.start_debugger(&endpoints);
                if let Err(e) = &result {
                    warn!(target: "nbdap", "transport worker failed: {e:#}");
                }
                let _ = done_tx.send(result.map_err(|e| e.to_string()));
            })?;

        Ok(Self {
            handle: Some(handle),
            done: done_rx,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Wait for the worker to finish and return its result.
    ///
    /// On timeout the thread is left running and [`Error::Timeout`] is returned.
    pub fn wait(mut self, timeout: Duration) -> Result<(), Error> {
        let result = match self.done.recv_timeout(timeout) {
            Ok(result) => result.map_err(Error::Worker),
            Err(RecvTimeoutError::Timeout) => {
                warn!(target: "nbdap", "transport worker is still running after {timeout:?}");
                return Err(Error::Timeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Worker("worker thread panicked".to_string()))
            }
        };

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!(target: "nbdap", "transport worker panicked after completion");
            }
        }
        result
    }
}
