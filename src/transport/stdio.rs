//! A child-process stdio transport: newline-delimited JSON over the
//! child's stdin/stdout pipes, with stderr relayed as diagnostics only.
//!
//! Active-once flow control is implemented with a [`tokio::sync::Semaphore`]
//! holding zero permits at construction. The reader task acquires one
//! permit before reading (and delivering) each line, so no frame is
//! read off the pipe, let alone delivered, until the Connection calls
//! [`Transport::set_active`] with [`ActiveMode::Once`]. This differs
//! from a `Stream`-based design: the producer cannot race ahead of the
//! consumer's re-arm.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio as StdStdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::error::ConnectionError;
use crate::transport::{ActiveMode, SendOutcome, Transport, TransportEvent};

/// Transport over a child process's stdin/stdout, one JSON-RPC frame per line.
pub struct StdioTransport {
    stdin_tx: mpsc::UnboundedSender<String>,
    active: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    child: Arc<Mutex<Child>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Spawn `executable` with `args`/`env`/`working_dir` and wire its
    /// stdio. Pushes [`TransportEvent::Up`] once the process is spawned,
    /// then one [`TransportEvent::Frame`] per line read, gated by
    /// re-arm, then [`TransportEvent::Down`] when the child's stdout
    /// closes or the process exits.
    pub async fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, ConnectionError> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .env_clear()
            .envs(&env)
            .stdin(StdStdio::piped())
            .stdout(StdStdio::piped())
            .stderr(StdStdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ConnectionError::TransportStart(e.to_string()))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let active = Arc::new(Semaphore::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_active = Arc::clone(&active);
        let reader_events = events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                // Block until the Connection re-arms us for exactly one frame.
                let permit = reader_active.acquire().await;
                let Ok(permit) = permit else { break };
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        permit.forget();
                        if reader_events
                            .send(TransportEvent::Frame(line))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = reader_events
                            .send(TransportEvent::Down("stdout closed".to_string()));
                        break;
                    }
                    Err(e) => {
                        let _ = reader_events.send(TransportEvent::Down(e.to_string()));
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "mcp_connect::transport::stdio", stderr = %line, "child stderr");
            }
        });

        let _ = events.send(TransportEvent::Up);

        Ok(Self {
            stdin_tx,
            active,
            closed,
            child: Arc::new(Mutex::new(child)),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, frame: String) -> SendOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return SendOutcome::Error("transport closed".to_string());
        }
        match self.stdin_tx.send(frame) {
            Ok(()) => SendOutcome::Ok,
            Err(_) => SendOutcome::Error("child stdin closed".to_string()),
        }
    }

    fn set_active(&self, mode: ActiveMode) {
        match mode {
            ActiveMode::Once => {
                self.active.add_permits(1);
            }
            ActiveMode::Off => {
                // No permits are ever handed out speculatively, so there is
                // nothing to revoke; a future `Once` simply will not have
                // been requested yet.
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.active.close();
        if let Ok(mut child) = self.child.try_lock() {
            terminate(&mut child);
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` was obtained from this still-live `Child`; sending
        // SIGTERM to it is the documented graceful-shutdown mechanism.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_nonexistent_executable_returns_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = StdioTransport::spawn(
            PathBuf::from("/no/such/executable-xyz"),
            vec![],
            HashMap::new(),
            None,
            tx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawn_cat_echoes_frame_once_armed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(
            PathBuf::from("cat"),
            vec![],
            HashMap::new(),
            None,
            tx,
        )
        .await
        .expect("cat should be available in test environments");

        assert!(matches!(rx.recv().await, Some(TransportEvent::Up)));

        assert_eq!(
            transport.send("hello".to_string()).await,
            SendOutcome::Ok
        );

        // No frame should arrive until armed.
        let not_yet = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(not_yet.is_err(), "frame delivered before re-arm");

        transport.set_active(ActiveMode::Once);
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for echoed frame")
            .expect("channel closed");
        match event {
            TransportEvent::Frame(line) => assert_eq!(line, "hello"),
            other => panic!("expected Frame, got {other:?}"),
        }

        transport.close().await;
    }

    #[tokio::test]
    async fn send_after_close_returns_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = StdioTransport::spawn(
            PathBuf::from("cat"),
            vec![],
            HashMap::new(),
            None,
            tx,
        )
        .await
        .unwrap();
        assert!(matches!(rx.recv().await, Some(TransportEvent::Up)));

        transport.close().await;
        let outcome = transport.send("too late".to_string()).await;
        assert!(matches!(outcome, SendOutcome::Error(_)));
    }
}
