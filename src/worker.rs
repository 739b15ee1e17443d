//! Runs a [`TaskManager`] on its own thread.
//!
//! The engine is single-threaded; other threads talk to it only by sending
//! whole commands through an [`EngineHandle`]. Commands run one at a time in
//! the order they were sent.

use std::thread::{self, JoinHandle};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::manager::TaskManager;

type Command = Box<dyn FnOnce(&mut TaskManager) + Send>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine worker has stopped")]
    Stopped,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Moves `manager` onto a dedicated thread.
///
/// The thread exits once every handle has been dropped.
pub fn spawn(manager: TaskManager) -> Result<(EngineHandle, JoinHandle<TaskManager>), WorkerError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let thread = thread::Builder::new()
        .name("task-engine".to_string())
        .spawn(move || {
            let mut manager = manager;
            while let Some(command) = rx.blocking_recv() {
                command(&mut manager);
            }
            debug!("engine worker stopped");
            manager
        })?;
    Ok((EngineHandle { tx }, thread))
}

impl EngineHandle {
    fn send<F, R>(&self, f: F) -> Result<oneshot::Receiver<R>, WorkerError>
    where
        F: FnOnce(&mut TaskManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |manager| {
                let _ = reply_tx.send(f(manager));
            }))
            .map_err(|_| WorkerError::Stopped)?;
        Ok(reply_rx)
    }

    /// Runs `f` against the engine and awaits its result.
    pub async fn call<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&mut TaskManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.send(f)?.await.map_err(|_| WorkerError::Stopped)
    }

    /// Like [`call`](Self::call) for callers outside an async runtime.
    pub fn call_blocking<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&mut TaskManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.send(f)?.blocking_recv().map_err(|_| WorkerError::Stopped)
    }
}
