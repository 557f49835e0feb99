//! MCP transport implementations.
//!
//! The primary transport is stdio: it spawns a child process and talks to it
//! over stdin/stdout using newline-delimited JSON. A background reader task
//! owns stdout and routes each response to the caller waiting on its id, so
//! any number of requests can be outstanding at once and answers may arrive
//! in any order. Writes go through a separate lock and never wait on reads.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpilot_core::config::ServerConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::TransportError;
use crate::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Number of stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 64;

/// Server-initiated messages held for `receive()`; newer ones are dropped
/// while the queue is full.
pub const INCOMING_QUEUE_CAPACITY: usize = 256;

/// Default grace period between SIGTERM and SIGKILL.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one message to the server.
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Send a request and wait for the response carrying the same id.
    async fn call(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Receive the next server-initiated request or notification.
    async fn receive(&self) -> Result<JsonRpcMessage, TransportError>;

    /// Close the transport connection. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

type Reply = Result<JsonRpcResponse, TransportError>;
type Waiter = oneshot::Sender<Reply>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Why the reader stopped. Kept so later callers see the original cause.
#[derive(Debug, Clone)]
enum Failure {
    EndOfStream,
    Protocol(String),
    Read(String),
    Closed,
}

impl Failure {
    fn to_error(&self) -> TransportError {
        match self {
            Self::EndOfStream => TransportError::EndOfStream,
            Self::Protocol(msg) => TransportError::Protocol(msg.clone()),
            Self::Read(msg) => TransportError::Read(msg.clone()),
            Self::Closed => TransportError::Closed,
        }
    }
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<RequestId, Waiter>,
    failure: Option<Failure>,
}

/// State shared between the transport handle and its reader task.
#[derive(Default)]
struct Shared {
    pending: parking_lot::Mutex<Pending>,
    closed: AtomicBool,
}

impl Shared {
    fn register(&self, id: RequestId) -> Result<oneshot::Receiver<Reply>, TransportError> {
        let mut pending = self.pending.lock();
        if let Some(failure) = &pending.failure {
            return Err(failure.to_error());
        }
        if pending.waiters.contains_key(&id) {
            return Err(TransportError::DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }

    fn forget(&self, id: &RequestId) {
        self.pending.lock().waiters.remove(id);
    }

    /// Hand a response to its waiter. Returns it back if nobody is waiting.
    fn resolve(&self, response: JsonRpcResponse) -> Option<JsonRpcResponse> {
        let waiter = self.pending.lock().waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                // The caller may have given up in the meantime.
                let _ = tx.send(Ok(response));
                None
            }
            None => Some(response),
        }
    }

    /// Record the first failure and fail every outstanding call with it.
    fn fail(&self, failure: Failure) {
        let (failure, waiters) = {
            let mut pending = self.pending.lock();
            let failure = pending.failure.get_or_insert(failure).clone();
            (failure, std::mem::take(&mut pending.waiters))
        };
        for (_, tx) in waiters {
            let _ = tx.send(Err(failure.to_error()));
        }
    }

    fn failure(&self) -> Option<Failure> {
        self.pending.lock().failure.clone()
    }
}

/// Removes a pending entry when its call finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(&self.id);
    }
}

/// Standard I/O transport for MCP servers.
pub struct StdioTransport {
    shared: Arc<Shared>,
    writer: Mutex<Option<BoxedWriter>>,
    incoming: Mutex<mpsc::Receiver<JsonRpcMessage>>,
    child: Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
    stderr_tail: Arc<parking_lot::Mutex<VecDeque<String>>>,
    pid: Option<u32>,
    request_timeout: Option<Duration>,
    shutdown_grace: Duration,
}

impl StdioTransport {
    /// Spawn the server described by `config`.
    pub async fn spawn(config: &ServerConfig) -> Result<Self, TransportError> {
        debug!(
            server = %config.name,
            command = %config.command,
            args = ?config.args,
            "Spawning MCP server process"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn(std::io::Error::other("Failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn(std::io::Error::other("Failed to capture stdout")))?;

        let stderr_tail = Arc::new(parking_lot::Mutex::new(VecDeque::with_capacity(
            STDERR_TAIL_LINES,
        )));
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_stderr(
                stderr,
                config.name.clone(),
                Arc::clone(&stderr_tail),
            ))
        });

        let pid = child.id();
        debug!(pid = ?pid, "MCP server process spawned successfully");

        let mut transport = Self::assemble(stdout, Box::new(stdin), Some(child), stderr_task);
        transport.stderr_tail = stderr_tail;
        transport.pid = pid;
        transport.request_timeout = config.request_timeout();
        transport.shutdown_grace = config.shutdown_grace();
        Ok(transport)
    }

    /// Spawn `command` with `args` and default settings.
    pub async fn start(command: &str, args: &[String]) -> Result<Self, TransportError> {
        let config = ServerConfig::new(command, command).with_args(args.to_vec());
        let transport = Self::spawn(&config).await?;
        Ok(transport.with_request_timeout(None))
    }

    /// Run the protocol over an arbitrary pair of streams.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::assemble(reader, Box::new(writer), None, None)
    }

    fn assemble<R>(
        reader: R,
        writer: BoxedWriter,
        child: Option<Child>,
        stderr_task: Option<JoinHandle<()>>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared::default());
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_QUEUE_CAPACITY);
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared), incoming_tx));

        Self {
            shared,
            writer: Mutex::new(Some(writer)),
            incoming: Mutex::new(incoming_rx),
            child: Mutex::new(child),
            reader_task,
            stderr_task,
            stderr_tail: Arc::default(),
            pid: None,
            request_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Fail calls that wait longer than `timeout`. `None` waits forever.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Time the server gets to exit after SIGTERM before it is killed.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the process ID of the child process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The most recent lines the server wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().waiters.len()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(broken_pipe());
        }

        let mut line = message.to_line()?;
        trace!(message = %line, "Sending message to MCP server");
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(broken_pipe)?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::Write)?;
        writer.flush().await.map_err(TransportError::Write)?;

        Ok(())
    }

    async fn call(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let id = request.id.clone();
        let rx = self.shared.register(id.clone())?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id: id.clone(),
        };

        debug!(id = %id, method = %request.method, "Calling MCP server");
        self.send(&JsonRpcMessage::Request(request)).await?;

        let outcome = match self.request_timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(id = %id, ?after, "MCP request timed out");
                    return Err(TransportError::Timeout { id, after });
                }
            },
            None => rx.await,
        };

        // A dropped sender means the reader went away without recording why.
        outcome.unwrap_or(Err(TransportError::Closed))
    }

    async fn receive(&self) -> Result<JsonRpcMessage, TransportError> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(message) => Ok(message),
            None => Err(self
                .shared
                .failure()
                .map(|f| f.to_error())
                .unwrap_or(TransportError::EndOfStream)),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(pid = ?self.pid, "Closing MCP server transport");
        self.shared.fail(Failure::Closed);
        self.reader_task.abort();

        // Terminate before taking the writer so a blocked write gets EPIPE.
        let child = self.child.lock().await.take();
        let result = match child {
            Some(child) => terminate(child, self.shutdown_grace).await,
            None => Ok(()),
        };

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = &self.stderr_task {
            task.abort();
        }

        result
    }

    fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst) && self.shared.failure().is_none()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop(true) takes care of the child itself.
        self.reader_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
    }
}

fn broken_pipe() -> TransportError {
    TransportError::Write(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "transport closed",
    ))
}

/// Read newline-delimited JSON until the stream ends or turns invalid.
async fn read_loop<R>(
    reader: R,
    shared: Arc<Shared>,
    incoming: mpsc::Sender<JsonRpcMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    let failure = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Failure::EndOfStream,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                break Failure::Protocol(format!("line is not valid UTF-8: {}", e))
            }
            Err(e) => break Failure::Read(e.to_string()),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(message = %line, "Received message from MCP server");

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => break Failure::Protocol(format!("invalid JSON from server: {}", e)),
        };

        match JsonRpcMessage::from_value(value) {
            Ok(JsonRpcMessage::Response(response)) => {
                if let Some(orphan) = shared.resolve(response) {
                    warn!(id = %orphan.id, "Dropping response for unknown request id");
                }
            }
            Ok(message) => {
                debug!(method = ?message.method(), "Server-initiated message");
                match incoming.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(message)) => {
                        warn!(
                            method = ?message.method(),
                            "Server message queue full, dropping message"
                        );
                    }
                    // Nobody listening; the message is simply dropped.
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping line that is not a JSON-RPC message");
            }
        }
    };

    match &failure {
        Failure::Protocol(msg) | Failure::Read(msg) => error!(error = %msg, "MCP reader failed"),
        _ => debug!(?failure, "MCP reader stopped"),
    }
    shared.fail(failure);
}

/// Log server stderr and keep a bounded tail of it.
async fn forward_stderr<R>(
    stderr: R,
    server: String,
    tail: Arc<parking_lot::Mutex<VecDeque<String>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "mcpilot_mcp::server_stderr", server = %server, "{}", line);
        let mut buffer = tail.lock();
        if buffer.len() == STDERR_TAIL_LINES {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }
}

/// Ask the child to exit, then kill it once the grace period runs out.
#[cfg_attr(not(unix), allow(unused_variables))]
async fn terminate(mut child: Child, grace: Duration) -> Result<(), TransportError> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!(pid = pid, "Sending SIGTERM to MCP server");
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "MCP server exited gracefully");
                    return Ok(());
                }
                Ok(Err(e)) => return Err(TransportError::TerminateFailed(e)),
                Err(_) => warn!(pid = pid, "MCP server did not exit gracefully, killing"),
            }
        }
    }

    child.kill().await.map_err(TransportError::TerminateFailed)
}
