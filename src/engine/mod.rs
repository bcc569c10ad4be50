mod conflict;
mod error;
mod interval;
mod mutations;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use conflict::{first_conflict, has_conflict, now_local};
pub use error::EngineError;
pub use interval::{parse_interval, parse_minutes};
pub use store::{InMemoryStore, ReservationStore};

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use chrono::TimeDelta;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{error, info};

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

/// Reservations older than this (by end time) are purged.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

const WAL_CHANNEL_CAPACITY: usize = 4096;

type Ack = oneshot::Sender<io::Result<()>>;

// ── WAL writer task ──────────────────────────────────────

enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the log. Mutations wait for their ack while holding the store write
/// lock, so appends arrive one at a time and each is synced on its own.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let _ = response.send(commit(&mut wal, &event));
            }
            WalCommand::Compact { events, response } => {
                let _ = response.send(wal.compact(&events));
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
    info!(path = %wal.path().display(), "WAL writer stopped");
}

fn commit(wal: &mut Wal, event: &Event) -> io::Result<()> {
    let started = Instant::now();
    let result = wal.append(event);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!(error = %e, "WAL append failed");
    }
    result
}

// ── Engine ───────────────────────────────────────────────

/// The scheduling engine: one exclusive timeline, one store, one log.
///
/// Every mutation holds the store's write lock across validate → conflict
/// check → WAL append → apply, so no two overlapping creations can both
/// commit.
pub struct Engine<S = InMemoryStore> {
    store: RwLock<S>,
    wal_tx: mpsc::Sender<WalCommand>,
    retention: TimeDelta,
}

/// Apply a logged event to the store (caller holds the write lock).
fn apply_event<S: ReservationStore + ?Sized>(store: &mut S, event: &Event) {
    match event {
        Event::ReservationCreated { id, owner, span } => store.insert(Reservation {
            id: *id,
            owner: owner.clone(),
            span: *span,
        }),
        Event::ReservationCancelled { id } => {
            store.delete_by_id(id);
        }
        Event::RetentionSwept { cutoff } => {
            store.delete_older_than(*cutoff);
        }
    }
}

impl Engine<InMemoryStore> {
    pub fn new(wal_path: PathBuf, retention: TimeDelta) -> io::Result<Self> {
        Self::with_store(InMemoryStore::new(), wal_path, retention)
    }
}

impl<S: ReservationStore> Engine<S> {
    /// Replay the log at `wal_path` into `store` and start the writer task.
    /// Must run inside a Tokio runtime.
    pub fn with_store(mut store: S, wal_path: PathBuf, retention: TimeDelta) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        for event in &events {
            apply_event(&mut store, event);
        }
        info!(
            wal = %wal_path.display(),
            replayed = events.len(),
            reservations = store.len(),
            "reservation log replayed"
        );
        metrics::gauge!(observability::RESERVATIONS_ACTIVE).set(store.len() as f64);

        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            store: RwLock::new(store),
            wal_tx,
            retention,
        })
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))
    }

    /// Durably log one event through the writer task.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.wal_request(cmd, rx)
            .await?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Log first, then apply: a failed append leaves the store untouched.
    pub(super) async fn persist_and_apply(
        &self,
        store: &mut S,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(store, event);
        metrics::gauge!(observability::RESERVATIONS_ACTIVE).set(store.len() as f64);
        Ok(())
    }
}
