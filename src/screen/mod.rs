//! Stateful screen emulation for a session.
//!
//! A dedicated actor task owns the `avt` virtual terminal. The session's PTY
//! reader feeds raw bytes in through a bounded channel; subscribers receive
//! the same bytes fanned out through a broadcast channel owned by the actor,
//! and can atomically obtain a snapshot together with a subscription so a
//! late joiner sees the current screen followed by every later chunk —
//! no gap, no duplicate.

pub mod state;

mod format;
mod task;

use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use state::{Format, Query, QueryResponse, SnapshotResponse};

/// Capacity of the broadcast channel that fans output out to subscribers.
/// A subscriber that lags past this many chunks misses data (lossy by
/// design); the emulator itself never misses a byte.
const BROADCAST_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum ScreenError {
    #[error("screen task died unexpectedly")]
    TaskDied,

    #[error("screen query timed out")]
    QueryTimeout,
}

/// Handle to a session's screen actor.
///
/// The actor owns the only broadcast sender; receivers come exclusively
/// from `join`, so every subscriber stream closes as soon as the actor
/// exits, no matter how long this handle lives.
#[derive(Clone)]
pub struct Screen {
    query_tx: mpsc::Sender<(Query, oneshot::Sender<QueryResponse>)>,
}

impl Screen {
    /// Spawn the screen actor consuming `raw_rx`.
    ///
    /// The actor exits when the raw channel closes (PTY reader ended), which
    /// in turn closes every subscriber's broadcast stream.
    pub fn spawn(
        raw_rx: mpsc::Receiver<Bytes>,
        cols: usize,
        rows: usize,
        scrollback_limit: usize,
    ) -> Self {
        let (query_tx, query_rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let result =
                AssertUnwindSafe(task::run(raw_rx, query_rx, cols, rows, scrollback_limit))
                    .catch_unwind()
                    .await;
            match result {
                Ok(()) => tracing::debug!("screen task exited"),
                Err(e) => tracing::error!("screen task panicked: {:?}", e),
            }
        });

        Self { query_tx }
    }

    /// Query current state. Times out after 5 seconds rather than blocking
    /// callers on a stalled actor.
    async fn query(&self, query: Query) -> Result<QueryResponse, ScreenError> {
        let (tx, rx) = oneshot::channel();
        self.query_tx
            .send((query, tx))
            .await
            .map_err(|_| ScreenError::TaskDied)?;
        tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .map_err(|_| ScreenError::QueryTimeout)?
            .map_err(|_| ScreenError::TaskDied)
    }

    /// Immutable copy of the current screen contents and cursor.
    pub async fn snapshot(&self, format: Format) -> Result<SnapshotResponse, ScreenError> {
        match self.query(Query::Snapshot { format }).await? {
            QueryResponse::Snapshot(snap) => Ok(snap),
            _ => Err(ScreenError::TaskDied),
        }
    }

    /// Snapshot plus broadcast subscription, taken atomically by the actor.
    pub async fn join(
        &self,
        format: Format,
    ) -> Result<(SnapshotResponse, broadcast::Receiver<Bytes>), ScreenError> {
        match self.query(Query::Join { format }).await? {
            QueryResponse::Joined(snap, rx) => Ok((snap, rx)),
            _ => Err(ScreenError::TaskDied),
        }
    }

    /// Reallocate the grid to new dimensions.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), ScreenError> {
        self.query(Query::Resize {
            cols: cols as usize,
            rows: rows as usize,
        })
        .await?;
        Ok(())
    }
}
