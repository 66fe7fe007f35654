//! Request/response channel to the peer process
//!
//! One task owns the peer's stdout and routes every reply to whoever waits on
//! its correlation id. Writers share stdin behind a mutex so a line is always
//! written whole. Ids come from the pending table itself and are never reused,
//! so a reply that shows up after its caller gave up finds no slot and is
//! dropped instead of reaching an unrelated call.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::message::{self, OutgoingMessage};
use crate::config::PeerConfig;
use crate::error::{DaemonError, Result};

type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Waiting callers keyed by correlation id
#[derive(Default)]
struct PendingTable {
    next_id: u64,
    slots: HashMap<u64, oneshot::Sender<Value>>,
    closed: bool,
}

impl PendingTable {
    /// Allocate the next id and a slot for its reply
    fn register(&mut self) -> Option<(u64, oneshot::Receiver<Value>)> {
        if self.closed {
            return None;
        }
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.slots.insert(self.next_id, tx);
        Some((self.next_id, rx))
    }

    /// Hand a reply to its waiter. False when nobody waits on `id`.
    fn resolve(&mut self, id: u64, msg: Value) -> bool {
        match self.slots.remove(&id) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    fn cancel(&mut self, id: u64) {
        self.slots.remove(&id);
    }

    /// Fail every waiter and refuse new registrations
    fn close(&mut self) {
        self.closed = true;
        self.slots.clear();
    }
}

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a slot when its request finishes, times out or is cancelled
struct SlotGuard<'a> {
    table: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        lock(self.table).cancel(self.id);
    }
}

/// The child process behind the channel
struct PeerProcess {
    child: Child,
}

impl PeerProcess {
    /// SIGTERM, wait up to `grace`, then SIGKILL
    async fn terminate(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!("Peer already exited: {}", status);
            return;
        }

        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!("Peer exited: {}", status),
            Ok(Err(e)) => tracing::warn!("Error waiting for peer: {}", e),
            Err(_) => {
                tracing::warn!("Peer ignored SIGTERM for {:?}, killing", grace);
                if let Err(e) = self.child.kill().await {
                    tracing::warn!("Failed to kill peer: {}", e);
                }
            }
        }
    }
}

/// Line-delimited JSON-RPC channel to one peer
pub struct PeerChannel {
    writer: tokio::sync::Mutex<PeerWriter>,
    pending: Arc<Mutex<PendingTable>>,
    ready: AtomicBool,
    closed: watch::Receiver<bool>,
    process: tokio::sync::Mutex<Option<PeerProcess>>,
    pid: Option<u32>,
    reader: JoinHandle<()>,
    call_timeout: Duration,
}

impl PeerChannel {
    /// Spawn the peer for a project and start reading its output
    pub fn spawn(peer: &PeerConfig, project_root: &Path, call_timeout: Duration) -> Result<Self> {
        tracing::info!("Starting peer: {} {:?}", peer.command, peer.args);

        let mut child = Command::new(&peer.command)
            .args(peer.expanded_args(project_root))
            .envs(&peer.env)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DaemonError::PeerSpawn {
                command: peer.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(DaemonError::PeerClosed)?;
        let stdout = child.stdout.take().ok_or(DaemonError::PeerClosed)?;

        // Drain stderr so the peer never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("peer stderr: {}", line);
                }
            });
        }

        let pid = child.id();
        let mut channel = Self::from_streams(stdout, stdin, call_timeout);
        channel.pid = pid;
        channel.process = tokio::sync::Mutex::new(Some(PeerProcess { child }));
        tracing::info!("Peer started (PID {:?})", pid);
        Ok(channel)
    }

    /// Build a channel over arbitrary streams, without a child process
    pub fn from_streams<R, W>(reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let (closed_tx, closed_rx) = watch::channel(false);
        let reader = tokio::spawn(read_loop(reader, pending.clone(), closed_tx));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            ready: AtomicBool::new(false),
            closed: closed_rx,
            process: tokio::sync::Mutex::new(None),
            pid: None,
            reader,
            call_timeout,
        }
    }

    /// Write one message as a single line
    pub async fn send(&self, msg: &OutgoingMessage<'_>) -> Result<()> {
        let line = msg.to_line()?;
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => DaemonError::PeerClosed,
            _ => DaemonError::Io(e),
        })
    }

    /// Send a request and wait for its reply.
    ///
    /// The reply is returned verbatim; a JSON-RPC `error` in it is for the
    /// caller to interpret.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (id, rx) = lock(&self.pending)
            .register()
            .ok_or(DaemonError::PeerClosed)?;
        let _slot = SlotGuard {
            table: &self.pending,
            id,
        };

        tracing::trace!("-> peer request {} {}", id, method);
        self.send(&OutgoingMessage::request(id, method, params))
            .await?;

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(DaemonError::PeerClosed),
            Err(_) => Err(DaemonError::Timeout {
                method: method.to_string(),
                timeout: self.call_timeout,
            }),
        }
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        tracing::trace!("-> peer notification {}", method);
        self.send(&OutgoingMessage::notification(method, params))
            .await
    }

    /// Run the two-step MCP handshake. Returns the peer's `initialize` result.
    pub async fn initialize(&self) -> Result<Value> {
        let reply = self
            .request(message::METHOD_INITIALIZE, Some(message::initialize_params()))
            .await?;

        if let Some(error) = reply.get("error") {
            let msg = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(DaemonError::Handshake(msg));
        }

        self.notify(message::METHOD_INITIALIZED, None).await?;
        self.ready.store(true, Ordering::SeqCst);

        let result = reply.get("result").cloned().unwrap_or(Value::Null);
        let server_info = result.get("serverInfo").cloned().unwrap_or_default();
        tracing::info!("Peer initialized: {}", server_info);
        Ok(result)
    }

    /// True once the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// True once the peer's output stream has ended
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves when the peer's output stream ends
    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Process id of the spawned peer
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Number of requests still waiting for a reply
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).slots.len()
    }

    /// Stop the peer process and fail any waiters. Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) {
        lock(&self.pending).close();
        if let Some(process) = self.process.lock().await.take() {
            process.terminate(grace).await;
        }
        self.reader.abort();
    }
}

impl Drop for PeerChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Route peer output to waiting requests until end-of-stream
async fn read_loop<R>(reader: R, pending: Arc<Mutex<PendingTable>>, closed: watch::Sender<bool>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                tracing::info!("Peer output closed");
                break;
            }
            Ok(_) => dispatch_line(&pending, &line),
            Err(e) => {
                tracing::warn!("Peer read error: {}", e);
                break;
            }
        }
    }

    lock(&pending).close();
    let _ = closed.send(true);
}

fn dispatch_line(pending: &Mutex<PendingTable>, line: &[u8]) {
    let line = line.trim_ascii();
    if line.is_empty() {
        return;
    }

    let msg: Value = match serde_json::from_slice(line) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::trace!("Dropping unparsable peer line: {}", e);
            return;
        }
    };

    match message::reply_id(&msg) {
        Some(id) => {
            if !lock(pending).resolve(id, msg) {
                tracing::debug!("Discarding orphaned reply {}", id);
            }
        }
        None => {
            let method = msg.get("method").and_then(Value::as_str).unwrap_or("?");
            tracing::trace!("Ignoring peer message: {}", method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::{fake_peer, FakePeer};
    use serde_json::json;

    async fn reply_to_next(peer: &mut FakePeer, result: Value) -> Value {
        let req = peer.recv().await;
        peer.send(&json!({"jsonrpc": "2.0", "id": req["id"], "result": result}))
            .await;
        req
    }

    fn peer_config(command: &str, args: &[&str]) -> PeerConfig {
        PeerConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_terminates_spawned_peer() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PeerChannel::spawn(
            &peer_config("sleep", &["30"]),
            dir.path(),
            Duration::from_secs(5),
        )
        .unwrap();
        let pid = channel.pid().unwrap() as i32;
        assert!(crate::daemon::liveness::process_alive(pid));

        channel.shutdown(Duration::from_secs(5)).await;
        assert!(!crate::daemon::liveness::process_alive(pid));
        assert!(channel.request("tools/call", None).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_kills_peer_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PeerChannel::spawn(
            &peer_config("sh", &["-c", "trap '' TERM; exec sleep 30"]),
            dir.path(),
            Duration::from_secs(5),
        )
        .unwrap();
        let pid = channel.pid().unwrap() as i32;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        channel.shutdown(Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!crate::daemon::liveness::process_alive(pid));
    }

    #[tokio::test]
    async fn test_request_response() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));

        let server = tokio::spawn(async move {
            let req = reply_to_next(&mut peer, json!({"ok": true})).await;
            assert_eq!(req["method"], "ping");
            peer
        });

        let reply = channel.request("ping", None).await.unwrap();
        assert_eq!(reply["result"]["ok"], true);
        assert_eq!(channel.pending_len(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_replies_reach_their_callers() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));
        let channel = Arc::new(channel);

        let callers: Vec<_> = (0..4)
            .map(|i| {
                let channel = channel.clone();
                tokio::spawn(async move {
                    let method = format!("method-{}", i);
                    let reply = channel.request(&method, None).await.unwrap();
                    assert_eq!(reply["result"]["echo"], method.as_str());
                })
            })
            .collect();

        let mut requests = Vec::new();
        for _ in 0..4 {
            requests.push(peer.recv().await);
        }
        for req in requests.iter().rev() {
            peer.send(&json!({"id": req["id"], "result": {"echo": req["method"]}}))
                .await;
        }

        for caller in callers {
            caller.await.unwrap();
        }
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_slot_and_late_reply_is_orphaned() {
        let (channel, mut peer) = fake_peer(Duration::from_millis(100));

        let err = tokio::join!(channel.request("slow", None), peer.recv())
            .0
            .unwrap_err();
        assert!(matches!(err, DaemonError::Timeout { .. }));
        assert_eq!(channel.pending_len(), 0);

        // The late reply for id 1 must not satisfy the next request (id 2)
        let (reply, _) = tokio::join!(channel.request("fast", None), async {
            peer.send(&json!({"id": 1, "result": "late"})).await;
            let req = peer.recv().await;
            assert_eq!(req["id"], 2);
            peer.send(&json!({"id": 2, "result": "fresh"})).await;
        });
        assert_eq!(reply.unwrap()["result"], "fresh");
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_noise_and_notifications_are_dropped() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));

        let (reply, _) = tokio::join!(channel.request("work", None), async {
            let req = peer.recv().await;
            peer.send_raw("this is not json\n").await;
            peer.send_raw("\n").await;
            peer.send(&json!({"method": "notifications/progress", "params": {}}))
                .await;
            peer.send(&json!({"id": req["id"], "method": "roots/list"}))
                .await;
            peer.send(&json!({"id": req["id"], "result": "done"})).await;
        });
        assert_eq!(reply.unwrap()["result"], "done");
    }

    #[tokio::test]
    async fn test_notify_carries_no_id() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));
        channel.notify("notifications/initialized", None).await.unwrap();
        let msg = peer.recv().await;
        assert_eq!(msg["method"], "notifications/initialized");
        assert!(msg.get("id").is_none());
        assert_eq!(channel.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_handshake_marks_ready() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));
        assert!(!channel.is_ready());

        let (result, _) = tokio::join!(channel.initialize(), async {
            let req = peer.recv().await;
            assert_eq!(req["method"], "initialize");
            assert_eq!(req["params"]["protocolVersion"], message::PROTOCOL_VERSION);
            peer.send(&json!({"id": req["id"], "result": {"serverInfo": {"name": "fake"}}}))
                .await;
            let ack = peer.recv().await;
            assert_eq!(ack["method"], "notifications/initialized");
            assert!(ack.get("id").is_none());
        });

        assert_eq!(result.unwrap()["serverInfo"]["name"], "fake");
        assert!(channel.is_ready());
    }

    #[tokio::test]
    async fn test_handshake_error_is_reported() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));

        let (result, _) = tokio::join!(channel.initialize(), async {
            let req = peer.recv().await;
            let error = json!({"code": -32600, "message": "bad version"});
            peer.send(&json!({"id": req["id"], "error": error})).await;
        });

        match result {
            Err(DaemonError::Handshake(msg)) => assert_eq!(msg, "bad version"),
            other => panic!("expected handshake error, got {:?}", other.map(|_| ())),
        }
        assert!(!channel.is_ready());
    }

    #[tokio::test]
    async fn test_peer_exit_fails_waiters() {
        let (channel, mut peer) = fake_peer(Duration::from_secs(5));

        let (result, _) = tokio::join!(channel.request("doomed", None), async move {
            peer.recv().await;
            drop(peer);
        });
        assert!(matches!(result, Err(DaemonError::PeerClosed)));

        channel.closed().await;
        assert!(channel.is_closed());
        assert!(matches!(
            channel.request("after", None).await,
            Err(DaemonError::PeerClosed)
        ));
    }
}
