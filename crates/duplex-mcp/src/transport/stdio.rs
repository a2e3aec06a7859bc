//! Multi-server stdio client transport.
//!
//! Servers are registered with a spawn recipe and launched lazily on the
//! first send. Each child speaks line-delimited JSON on stdin/stdout with
//! stderr passed through. A reader task per child parses lines and feeds a
//! single multiplexed queue tagged with the server id.
//!
//! When a reader finishes (EOF, read failure, process exit) the server is
//! marked dead but stays registered: the next send respawns it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::stdio::{KILL_TIMEOUT, STDIN_CLOSE_TIMEOUT, TERMINATE_TIMEOUT};
use crate::error::{TransportError, TransportResult};
use crate::peers::PeerId;
use crate::transport::{PeerMessage, Transport, TransportContext};

/// One registered server and, when spawned, its live process handles.
struct ServerProcess {
    command: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    /// Bumped on every spawn so a finishing reader from an earlier life
    /// cannot clobber a respawned process.
    generation: u64,
}

impl ServerProcess {
    fn new(command: Vec<String>) -> Self {
        Self { command, child: None, stdin: None, reader: None, generation: 0 }
    }

    fn is_live(&self) -> bool {
        self.child.is_some() && self.stdin.is_some()
    }
}

struct StdioInner {
    servers: Mutex<HashMap<PeerId, ServerProcess>>,
    queue_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    closed: AtomicBool,
}

/// Client-side stdio transport managing any number of server subprocesses.
pub struct StdioClientTransport {
    inner: Arc<StdioInner>,
}

impl Default for StdioClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioClientTransport {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(StdioInner {
                servers: Mutex::new(HashMap::new()),
                queue_tx: std::sync::Mutex::new(Some(tx)),
                queue_rx: Mutex::new(rx),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register how to spawn a server. Does not launch the process.
    ///
    /// # Errors
    ///
    /// Fails if the id is already registered or the command is empty.
    pub async fn add_server(
        &self,
        server_id: impl Into<PeerId>,
        command: Vec<String>,
    ) -> TransportResult<()> {
        let server_id = server_id.into();
        if command.is_empty() {
            return Err(TransportError::InvalidConnectionInfo(
                "command must be a non-empty list".to_string(),
            ));
        }

        let mut servers = self.inner.servers.lock().await;
        if servers.contains_key(&server_id) {
            return Err(TransportError::already_registered(server_id.to_string()));
        }

        tracing::debug!(server = %server_id, command = ?command, "Registered server");
        servers.insert(server_id, ServerProcess::new(command));
        Ok(())
    }

    /// Registered server ids, spawned or not.
    pub async fn server_ids(&self) -> Vec<PeerId> {
        self.inner.servers.lock().await.keys().cloned().collect()
    }
}

impl StdioInner {
    /// Spawn the child and its reader task. Caller holds the servers lock.
    fn spawn_server(self: &Arc<Self>, server_id: &PeerId, process: &mut ServerProcess) -> TransportResult<()> {
        tracing::debug!(server = %server_id, command = ?process.command, "Spawning server subprocess");

        let mut child = Command::new(&process.command[0])
            .args(&process.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn { peer: server_id.to_string(), source: e })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::InvalidConnectionInfo("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::InvalidConnectionInfo("child stdout unavailable".to_string()))?;

        process.generation += 1;
        let generation = process.generation;

        let tx = self
            .queue_tx
            .lock()
            .expect("queue sender lock poisoned")
            .clone()
            .ok_or(TransportError::Closed)?;

        let reader = tokio::spawn(Self::read_from_server(
            Arc::clone(self),
            server_id.clone(),
            generation,
            stdout,
            tx,
        ));

        tracing::debug!(server = %server_id, pid = ?child.id(), "Server subprocess started");
        process.child = Some(child);
        process.stdin = Some(stdin);
        process.reader = Some(reader);
        Ok(())
    }

    /// Read lines from one child's stdout until EOF or failure, then mark
    /// the server dead.
    async fn read_from_server(
        inner: Arc<Self>,
        server_id: PeerId,
        generation: u64,
        stdout: ChildStdout,
        tx: mpsc::UnboundedSender<PeerMessage>,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(payload) => {
                            tracing::debug!(server = %server_id, "Received message");
                            let _ = tx.send(PeerMessage::new(server_id.clone(), payload));
                        }
                        Err(e) => {
                            tracing::warn!(server = %server_id, error = %e, "Invalid JSON line from server");
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(server = %server_id, "Server closed stdout");
                    break;
                }
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "Failed to read from server stdout");
                    break;
                }
            }
        }

        inner.mark_server_dead(&server_id, generation).await;
    }

    /// Drop the process handles but keep the registration so a later send
    /// can respawn. Only the reader generation that owns the process may
    /// clear it.
    async fn mark_server_dead(&self, server_id: &PeerId, generation: u64) {
        let mut servers = self.servers.lock().await;
        if let Some(process) = servers.get_mut(server_id) {
            if process.generation == generation {
                process.child = None;
                process.stdin = None;
                process.reader = None;
                tracing::debug!(server = %server_id, "Marked server dead; registration kept");
            }
        }
    }
}

/// Execute the graceful shutdown ladder for one child process.
///
/// Close stdin and wait, terminate and wait, kill and wait. Steps are
/// skipped once the process has exited.
#[allow(unsafe_code)] // SIGTERM delivery goes through libc::kill on Unix
async fn shutdown_process(server_id: &PeerId, mut child: Child, stdin: Option<ChildStdin>) {
    async fn wait_for_exit(child: &mut Child, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, child.wait()).await.is_ok()
    }

    tracing::debug!(server = %server_id, "Starting graceful shutdown");

    // Step 1: closing stdin signals shutdown to a well-behaved server.
    drop(stdin);
    if wait_for_exit(&mut child, STDIN_CLOSE_TIMEOUT).await {
        tracing::debug!(server = %server_id, "Server exited after stdin close");
        return;
    }

    // Step 2: terminate signal.
    if child.try_wait().ok().flatten().is_some() {
        return;
    }
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a live tokio child handle.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if wait_for_exit(&mut child, TERMINATE_TIMEOUT).await {
        tracing::debug!(server = %server_id, "Server exited after terminate");
        return;
    }

    // Step 3: kill signal.
    if child.try_wait().ok().flatten().is_some() {
        return;
    }
    let _ = child.start_kill();
    if wait_for_exit(&mut child, KILL_TIMEOUT).await {
        tracing::debug!(server = %server_id, "Server killed");
    } else {
        tracing::error!(server = %server_id, "Server did not exit after kill signal");
    }
}

#[async_trait]
impl Transport for StdioClientTransport {
    fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, peer: &PeerId, frame: Value, _ctx: TransportContext) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        // Serialize before touching the child so encoding failures never
        // disturb a healthy process.
        let json = serde_json::to_string(&frame)?;

        let mut servers = self.inner.servers.lock().await;
        let process =
            servers.get_mut(peer).ok_or_else(|| TransportError::unknown_peer(peer.to_string()))?;

        if !process.is_live() {
            self.inner.spawn_server(peer, process)?;
        }

        let stdin = process.stdin.as_mut().ok_or(TransportError::Closed)?;
        let write = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        if let Err(e) = write.await {
            tracing::warn!(server = %peer, error = %e, "Write to server stdin failed; marking dead");
            if let Some(reader) = process.reader.take() {
                reader.abort();
            }
            process.child = None;
            process.stdin = None;
            return Err(e.into());
        }

        tracing::debug!(server = %peer, "Sent message");
        Ok(())
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.inner.queue_rx.lock().await.recv().await
    }

    async fn disconnect(&self, peer: &PeerId) -> TransportResult<()> {
        let process = self.inner.servers.lock().await.remove(peer);
        let Some(mut process) = process else {
            return Ok(());
        };

        if let Some(reader) = process.reader.take() {
            reader.abort();
        }
        if let Some(child) = process.child.take() {
            shutdown_process(peer, child, process.stdin.take()).await;
        }

        tracing::debug!(server = %peer, "Disconnected from server");
        Ok(())
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let server_ids: Vec<PeerId> =
            self.inner.servers.lock().await.keys().cloned().collect();
        for server_id in server_ids {
            let _ = self.disconnect(&server_id).await;
        }

        // Dropping the queue sender ends the coordinator's receive loop.
        self.inner.queue_tx.lock().expect("queue sender lock poisoned").take();
    }
}

impl std::fmt::Debug for StdioClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioClientTransport").field("open", &self.is_open()).finish()
    }
}
