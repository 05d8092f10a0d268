use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn command: {0}")]
    SpawnCommand(#[source] anyhow::Error),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("failed to wait for child: {0}")]
    Wait(#[from] std::io::Error),
}

/// Launch parameters for the subprocess attached to the PTY slave side.
#[derive(Debug, Clone)]
pub struct SpawnParams {
    pub shell: String,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    /// Lines of history the screen emulator retains above the visible grid.
    pub scrollback_limit: usize,
}

impl SpawnParams {
    /// Resolve the shell to run: explicit request, else the configured
    /// default, else `$SHELL`, else `/bin/sh`.
    pub fn resolve_shell(requested: Option<String>, default: Option<&str>) -> String {
        requested
            .or_else(|| default.map(str::to_string))
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// One spawned interactive subprocess attached to a pseudo-terminal pair.
///
/// The master side provides the raw byte reader/writer; `resize` issues the
/// window-size-change notification (SIGWINCH) to the child.
pub struct Pty {
    pair: PtyPair,
    child: Option<Box<dyn portable_pty::Child + Send + Sync>>,
}

impl Pty {
    pub fn spawn(params: &SpawnParams) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows: params.rows,
            cols: params.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(PtyError::OpenPty)?;

        let mut cmd = CommandBuilder::new(&params.shell);
        if let Some(ref dir) = params.cwd {
            cmd.cwd(dir);
        }
        for (k, v) in &params.env {
            cmd.env(k, v);
        }
        // The child must believe it is on a capable terminal even when the
        // request env omits TERM.
        if !params.env.contains_key("TERM") {
            cmd.env(
                "TERM",
                std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
            );
        }

        let child = pair.slave.spawn_command(cmd).map_err(PtyError::SpawnCommand)?;

        Ok(Self {
            pair,
            child: Some(child),
        })
    }

    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.pair
            .master
            .try_clone_reader()
            .map_err(PtyError::CloneReader)
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.pair.master.take_writer().map_err(PtyError::TakeWriter)
    }

    /// Take ownership of the child handle. The caller waits on it from a
    /// dedicated blocking task; exactly one wait loop may exist per session.
    pub fn take_child(&mut self) -> Option<Box<dyn portable_pty::Child + Send + Sync>> {
        self.child.take()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.process_id())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.pair
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Resize)
    }
}

/// Send a signal to a child's process group.
///
/// portable_pty calls setsid() when spawning, so the child leads its own
/// process group; signalling the negative PID reaches shell descendants too.
#[cfg(unix)]
pub fn signal_process_group(pid: u32, signal: i32) {
    if pid == 0 || pid > i32::MAX as u32 {
        tracing::warn!(pid, "PID is 0 or exceeds i32::MAX, cannot send signal");
        return;
    }
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

#[cfg(not(unix))]
pub fn signal_process_group(_pid: u32, _signal: i32) {}
