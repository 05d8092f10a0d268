use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::activity::ActivityTracker;
use crate::pty::{self, Pty, PtyError, SpawnParams};
use crate::screen::state::Format;
use crate::screen::Screen;

/// Capacity of the channel between the PTY reader thread and the screen
/// actor. The reader uses `blocking_send`, so a stalled actor propagates
/// backpressure through the kernel PTY buffer to the child process instead
/// of dropping bytes or growing without bound.
const SCREEN_CHANNEL_CAPACITY: usize = 256;

/// Grace period between SIGHUP and SIGKILL during teardown.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid dimensions: {cols}x{rows}")]
    InvalidDimensions { cols: u16, rows: u16 },

    #[error("failed to spawn session: {0}")]
    Spawn(#[from] PtyError),

    #[error("write to session {0} failed: process has exited")]
    Write(String),

    #[error("resize of session {0} failed: handle is closed")]
    Resize(String),

    #[error("maximum number of sessions reached")]
    MaxSessionsReached,
}

/// Lifecycle states. Transitions only move forward; a Terminated session is
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

/// Current terminal dimensions, shared between the session and its PTY
/// plumbing. Mutated only under the session's own lock.
#[derive(Clone)]
pub struct Dimensions {
    inner: Arc<RwLock<(u16, u16)>>,
}

impl Dimensions {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            inner: Arc::new(RwLock::new((cols, rows))),
        }
    }

    pub fn get(&self) -> (u16, u16) {
        *self.inner.read()
    }

    pub fn set(&self, cols: u16, rows: u16) {
        *self.inner.write() = (cols, rows);
    }
}

/// Summary of a session, serialized for list/get responses.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub id: String,
    pub shell: String,
    pub cwd: Option<String>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub created_at: u64,
    pub last_active_at: u64,
    pub active: bool,
    pub subscribers: usize,
    pub state: SessionState,
}

/// Out-of-band notifications fanned out to every subscriber of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    Resized { cols: u16, rows: u16 },
}

/// RAII guard that removes a subscriber from the session's set on drop.
pub struct SubscriberGuard {
    set: Arc<RwLock<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.set.write().remove(&self.id);
    }
}

/// A single terminal session: one PTY-backed subprocess, one screen
/// emulator, and zero or more subscribers.
///
/// The session exclusively owns its `Pty` and `Screen`; callers hold only
/// the id. Cloning a `Session` clones shared handles, not the resources.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub shell: String,
    pub cwd: Option<String>,
    pub env: Arc<HashMap<String, String>>,
    pub pid: Option<u32>,
    pub created_at: u64,
    pub size: Dimensions,
    pub subscribers: Arc<RwLock<HashSet<Uuid>>>,
    pub input_tx: mpsc::Sender<Bytes>,
    pub screen: Screen,
    pub activity: ActivityTracker,
    pub notices: tokio::sync::broadcast::Sender<SessionNotice>,
    pub pty: Arc<parking_lot::Mutex<Pty>>,
    /// Fires when the session is torn down; subscriber loops select on this
    /// to detect death immediately instead of operating on ghost state.
    pub cancelled: tokio_util::sync::CancellationToken,
    /// Set by the child-exit monitor; checked before signalling to avoid
    /// hitting a recycled PID.
    pub child_exited: Arc<AtomicBool>,
    pub exit_status: Arc<RwLock<Option<u32>>>,
    state: Arc<RwLock<SessionState>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("shell", &self.shell)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// SIGKILL the child after the grace period. `kill_child` is a no-op when
/// the child already exited, so a clean SIGHUP death needs no bookkeeping.
fn schedule_kill_escalation(session: &Session) {
    let escalate = session.clone();
    tokio::spawn(async move {
        tokio::time::sleep(KILL_GRACE_PERIOD).await;
        escalate.kill_child();
    });
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Session {
    /// Spawn a new session: PTY, screen actor, reader/writer tasks, and a
    /// child-exit monitor.
    ///
    /// Returns the session (already in `Running` state) and a oneshot that
    /// resolves with the child's exit code when the subprocess ends. If the
    /// child handle is unavailable the receiver resolves immediately.
    pub fn spawn(params: SpawnParams) -> Result<(Self, oneshot::Receiver<Option<u32>>), PtyError> {
        let mut pty = Pty::spawn(&params)?;
        let pty_reader = pty.take_reader()?;
        let pty_writer = pty.take_writer()?;
        let pty_child = pty.take_child();
        let pid = pty_child.as_ref().and_then(|c| c.process_id());

        // Wait on the child from a blocking thread; the exit code flows to
        // the registry's monitor through the oneshot.
        let (child_exit_tx, child_exit_rx) = oneshot::channel::<Option<u32>>();
        if let Some(mut child) = pty_child {
            tokio::task::spawn_blocking(move || {
                let status = match child.wait() {
                    Ok(status) => {
                        tracing::debug!(?status, "session child exited");
                        Some(status.exit_code())
                    }
                    Err(e) => {
                        tracing::error!(?e, "error waiting for session child");
                        None
                    }
                };
                let _ = child_exit_tx.send(status);
            });
        } else {
            let _ = child_exit_tx.send(None);
        }

        let (screen_tx, screen_rx) = mpsc::channel::<Bytes>(SCREEN_CHANNEL_CAPACITY);
        let screen = Screen::spawn(
            screen_rx,
            params.cols as usize,
            params.rows as usize,
            params.scrollback_limit,
        );

        let activity = ActivityTracker::new();

        // PTY reader: the one OS-blocking drain per session. Every byte goes
        // to the screen actor, which re-broadcasts to subscribers. A full
        // channel blocks the reader, throttling the child via the kernel
        // PTY buffer rather than losing output.
        let reader_activity = activity.clone();
        tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut reader = pty_reader;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if screen_tx.blocking_send(data).is_err() {
                            // Screen actor gone; session is shutting down.
                            break;
                        }
                        reader_activity.touch();
                    }
                    Err(_) => break,
                }
            }
        });

        // PTY writer: consumes the input channel until it closes or the
        // write side fails (child exited, fd closed).
        let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(64);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut writer = pty_writer;
            while let Some(data) = input_rx.blocking_recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        let session = Session {
            id: Uuid::new_v4().to_string(),
            shell: params.shell.clone(),
            cwd: params.cwd.clone(),
            env: Arc::new(params.env),
            pid,
            created_at: unix_ms_now(),
            size: Dimensions::new(params.cols, params.rows),
            subscribers: Arc::new(RwLock::new(HashSet::new())),
            input_tx,
            screen,
            activity,
            notices: tokio::sync::broadcast::channel(16).0,
            pty: Arc::new(parking_lot::Mutex::new(pty)),
            cancelled: tokio_util::sync::CancellationToken::new(),
            child_exited: Arc::new(AtomicBool::new(false)),
            exit_status: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(SessionState::Running)),
        };

        Ok((session, child_exit_rx))
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Enter `Terminating` if the session is still live. Returns false when
    /// teardown already started, making terminate idempotent internally.
    pub fn begin_terminate(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            SessionState::Starting | SessionState::Running => {
                *state = SessionState::Terminating;
                true
            }
            SessionState::Terminating | SessionState::Terminated => false,
        }
    }

    pub fn mark_terminated(&self) {
        *self.state.write() = SessionState::Terminated;
    }

    /// Register a subscriber and atomically obtain a screen snapshot plus
    /// the output stream starting right after it.
    ///
    /// Joining is allowed while `Terminating` so pending output still gets
    /// flushed; only `Terminated` sessions reject joins (the registry entry
    /// is gone by then anyway).
    pub async fn join(
        &self,
        conn_id: Uuid,
        format: Format,
    ) -> Result<
        (
            crate::screen::state::SnapshotResponse,
            tokio::sync::broadcast::Receiver<Bytes>,
            SubscriberGuard,
        ),
        SessionError,
    > {
        if self.state() == SessionState::Terminated {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        let (snapshot, rx) = self
            .screen
            .join(format)
            .await
            .map_err(|_| SessionError::NotFound(self.id.clone()))?;
        self.subscribers.write().insert(conn_id);
        self.activity.touch();
        Ok((
            snapshot,
            rx,
            SubscriberGuard {
                set: Arc::clone(&self.subscribers),
                id: conn_id,
            },
        ))
    }

    /// Write input bytes to the subprocess.
    pub async fn write(&self, data: Bytes) -> Result<(), SessionError> {
        if self.state() != SessionState::Running || self.child_exited.load(Ordering::Acquire) {
            return Err(SessionError::Write(self.id.clone()));
        }
        self.input_tx
            .send(data)
            .await
            .map_err(|_| SessionError::Write(self.id.clone()))?;
        self.activity.touch();
        Ok(())
    }

    /// Resize the PTY and the screen emulator together, keeping the grid
    /// dimensions matched to the session's.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::InvalidDimensions { cols, rows });
        }
        if self.state() != SessionState::Running {
            return Err(SessionError::Resize(self.id.clone()));
        }
        self.pty
            .lock()
            .resize(cols, rows)
            .map_err(|_| SessionError::Resize(self.id.clone()))?;
        self.screen
            .resize(cols, rows)
            .await
            .map_err(|_| SessionError::Resize(self.id.clone()))?;
        self.size.set(cols, rows);
        let _ = self.notices.send(SessionNotice::Resized { cols, rows });
        self.activity.touch();
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn descriptor(&self) -> SessionDescriptor {
        let (cols, rows) = self.size.get();
        let state = self.state();
        SessionDescriptor {
            id: self.id.clone(),
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            cols,
            rows,
            created_at: self.created_at,
            last_active_at: self.activity.last_active_ms(),
            active: state == SessionState::Running,
            subscribers: self.subscriber_count(),
            state,
        }
    }

    /// Ask the child's process group to exit.
    pub fn send_sighup(&self) {
        if let Some(pid) = self.pid {
            if self.child_exited.load(Ordering::Acquire) {
                tracing::debug!(pid, "child already exited, skipping SIGHUP");
                return;
            }
            pty::signal_process_group(pid, libc::SIGHUP);
        }
    }

    /// Forcefully kill the child's process group. Escalation path when the
    /// child ignores SIGHUP within the grace period.
    pub fn kill_child(&self) {
        if let Some(pid) = self.pid {
            if self.child_exited.load(Ordering::Acquire) {
                tracing::debug!(pid, "child already exited, skipping SIGKILL");
                return;
            }
            pty::signal_process_group(pid, libc::SIGKILL);
        }
    }
}

struct RegistryInner {
    sessions: HashMap<String, Session>,
    max_sessions: Option<usize>,
}

/// Process-wide table of live sessions, keyed by id.
///
/// The registry lock protects table membership only; a session's own state
/// (subscriber set, dimensions, lifecycle) is guarded by the session's
/// locks, so operations on different sessions never contend here beyond the
/// brief map access.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Default cap on concurrent sessions. Each session costs a PTY fd pair
    /// plus three blocking threads; 256 leaves headroom in tokio's default
    /// 512-thread blocking pool.
    const DEFAULT_MAX_SESSIONS: usize = 256;

    pub fn new() -> Self {
        Self::with_max_sessions(Some(Self::DEFAULT_MAX_SESSIONS))
    }

    pub fn with_max_sessions(max_sessions: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                max_sessions,
            })),
        }
    }

    /// Create a session: spawn the PTY on the blocking pool, insert the
    /// session, and start the child-exit monitor.
    ///
    /// The fork/exec happens outside any lock; only the insert is serialized.
    pub async fn create(&self, params: SpawnParams) -> Result<Session, SessionError> {
        if params.cols == 0 || params.rows == 0 {
            return Err(SessionError::InvalidDimensions {
                cols: params.cols,
                rows: params.rows,
            });
        }
        {
            let inner = self.inner.read();
            if let Some(max) = inner.max_sessions {
                if inner.sessions.len() >= max {
                    return Err(SessionError::MaxSessionsReached);
                }
            }
        }

        let (session, child_exit_rx) = tokio::task::spawn_blocking(move || Session::spawn(params))
            .await
            .map_err(|e| {
                SessionError::Spawn(PtyError::SpawnCommand(anyhow::anyhow!(
                    "spawn task failed: {e}"
                )))
            })??;

        {
            let mut inner = self.inner.write();
            if let Some(max) = inner.max_sessions {
                if inner.sessions.len() >= max {
                    // Lost the admission race; clean up the fresh spawn.
                    drop(inner);
                    session.begin_terminate();
                    session.send_sighup();
                    schedule_kill_escalation(&session);
                    session.cancelled.cancel();
                    return Err(SessionError::MaxSessionsReached);
                }
            }
            inner.sessions.insert(session.id.clone(), session.clone());
        }

        self.monitor_child_exit(session.clone(), child_exit_rx);

        tracing::info!(session = %session.id, shell = %session.shell, "session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// Clone of every live session handle, for iteration outside the lock.
    pub fn sessions_snapshot(&self) -> Vec<Session> {
        self.inner.read().sessions.values().cloned().collect()
    }

    pub fn list(&self) -> Vec<SessionDescriptor> {
        self.inner
            .read()
            .sessions
            .values()
            .map(Session::descriptor)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drive a session to `Terminated` and evict it.
    ///
    /// Eviction is immediate — a subsequent `get`/`terminate` on the same id
    /// returns `NotFound`. The child gets SIGHUP right away and SIGKILL
    /// after the grace period if it lingers; pending output that was already
    /// read still flushes to subscribers before their streams close.
    pub fn terminate(&self, id: &str) -> Result<(), SessionError> {
        let session = {
            let mut inner = self.inner.write();
            inner
                .sessions
                .remove(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?
        };

        session.begin_terminate();
        session.send_sighup();
        schedule_kill_escalation(&session);
        tracing::info!(session = %id, "session terminating");

        Ok(())
    }

    /// Remove all sessions atomically, used during server shutdown.
    ///
    /// A single write lock covers the snapshot so in-flight creates cannot
    /// slip a session past the drain. Returns a handle for the SIGKILL
    /// escalation task when any sessions were drained.
    pub fn drain(&self) -> Option<tokio::task::JoinHandle<()>> {
        let sessions: Vec<Session> = {
            let mut inner = self.inner.write();
            let drained: Vec<Session> = inner.sessions.drain().map(|(_, s)| s).collect();
            for session in &drained {
                session.begin_terminate();
                session.send_sighup();
            }
            drained
        };
        if sessions.is_empty() {
            return None;
        }
        tracing::info!(count = sessions.len(), "draining sessions");
        Some(tokio::spawn(async move {
            tokio::time::sleep(KILL_GRACE_PERIOD).await;
            for session in &sessions {
                session.kill_child();
            }
        }))
    }

    /// Watch for the child's exit and finish the session's lifecycle: record
    /// the exit status, mark `Terminated`, evict the registry entry if it is
    /// still present (unexpected exit), and cancel the session token so
    /// subscriber loops wind down.
    fn monitor_child_exit(
        &self,
        session: Session,
        child_exit_rx: oneshot::Receiver<Option<u32>>,
    ) {
        let registry = self.clone();
        tokio::spawn(async move {
            let status = child_exit_rx.await.ok().flatten();

            session.child_exited.store(true, Ordering::Release);
            *session.exit_status.write() = status;
            session.begin_terminate();

            let was_present = registry
                .inner
                .write()
                .sessions
                .remove(&session.id)
                .is_some();
            if was_present {
                tracing::info!(session = %session.id, ?status, "session child exited");
            } else {
                tracing::debug!(session = %session.id, ?status, "session child exited (already evicted)");
            }

            session.mark_terminated();
            session.cancelled.cancel();
        });
    }
}
