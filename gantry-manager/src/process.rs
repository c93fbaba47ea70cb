//! Worker process plumbing
//!
//! Workers are separate OS processes talking newline-delimited JSON over
//! their stdio. The manager re-executes its own binary with a marker
//! environment variable set; the user's `main` checks
//! [`is_worker_process`] and hands control to the worker runtime instead of
//! constructing a manager.

use async_trait::async_trait;
use gantry_ipc::{ClusterMessage, IpcReceiver, IpcSender, MasterMessage};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::error::ManagerError;
use crate::manager::ManagerEvent;
use crate::sharding::ShardRange;

/// Environment variable marking a process as a forked worker. Its value is
/// the cluster id the process was forked for.
pub const WORKER_ENV: &str = "GANTRY_WORKER";

/// Whether the current process was forked as a worker
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// A freshly spawned worker process, not yet wired into the manager
pub struct SpawnedWorker {
    pub pid: u32,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves with the process exit code once the worker terminates
    pub exit: oneshot::Receiver<Option<i32>>,
}

/// Forks worker processes. Abstracted so tests can stand in an in-memory
/// transport for real child processes.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, cluster_id: u32) -> Result<SpawnedWorker, ManagerError>;
}

/// Default spawner: re-executes the current binary with [`WORKER_ENV`] set
pub struct ExeSpawner;

#[async_trait]
impl WorkerSpawner for ExeSpawner {
    async fn spawn(&self, cluster_id: u32) -> Result<SpawnedWorker, ManagerError> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .env(WORKER_ENV, cluster_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::other("worker process has no stdin handle")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::other("worker process has no stdout handle")
        })?;
        let pid = child.id().unwrap_or_default();

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedWorker {
            pid,
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            exit: exit_rx,
        })
    }
}

/// Manager-side record of one live worker process
pub struct ClusterProcess {
    pub cluster_id: u32,
    pub pid: u32,
    pub range: ShardRange,
    outbound: mpsc::UnboundedSender<MasterMessage>,
}

impl ClusterProcess {
    /// Wire a spawned worker into the manager's event channel: a writer task
    /// draining the outbound queue, a reader task forwarding every inbound
    /// message, and an exit watcher reporting the final status.
    pub fn start(
        cluster_id: u32,
        range: ShardRange,
        spawned: SpawnedWorker,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<MasterMessage>();

        let writer = spawned.writer;
        tokio::spawn(async move {
            let mut sender = IpcSender::new(writer);
            while let Some(message) = outbound_rx.recv().await {
                if sender.send(&message).await.is_err() {
                    break;
                }
            }
        });

        let reader = spawned.reader;
        let reader_events = events.clone();
        tokio::spawn(async move {
            let mut receiver = IpcReceiver::new(reader);
            loop {
                match receiver.recv::<ClusterMessage>().await {
                    Ok(Some(message)) => {
                        if reader_events
                            .send(ManagerEvent::Worker {
                                cluster_id,
                                message,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        tracing::warn!(cluster = cluster_id, "Worker channel failed: {}", e);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(cluster = cluster_id, "Dropping malformed message: {}", e);
                    }
                }
            }
        });

        let pid = spawned.pid;
        let exit = spawned.exit;
        tokio::spawn(async move {
            let code = exit.await.unwrap_or(None);
            let _ = events.send(ManagerEvent::Exited { pid, code });
        });

        Self {
            cluster_id,
            pid,
            range,
            outbound,
        }
    }

    /// Queue a message for this worker. A closed channel means the process
    /// is already gone; the exit watcher handles the rest.
    pub fn send(&self, message: MasterMessage) {
        let _ = self.outbound.send(message);
    }

    /// Clone of the outbound queue, for tasks that answer this worker later
    pub fn sender(&self) -> mpsc::UnboundedSender<MasterMessage> {
        self.outbound.clone()
    }
}
