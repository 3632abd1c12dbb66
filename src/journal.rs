use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, mpsc, oneshot};

use crate::observability;
use crate::wal::Wal;

enum JournalCommand<T> {
    Append {
        record: T,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<T>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending<T> = Vec<(T, oneshot::Sender<io::Result<()>>)>;

/// Handle to a journal file owned by a background group-commit writer.
///
/// Appends from concurrent callers that arrive while a flush is in progress
/// are written and fsynced together. Cloning shares the same writer.
pub struct Journal<T> {
    tx: mpsc::Sender<JournalCommand<T>>,
    gate: Arc<RwLock<()>>,
}

impl<T> Clone for Journal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<T> Journal<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Replay `path` and start the writer. Returns the replayed records.
    pub fn open(name: &'static str, path: &Path) -> io::Result<(Self, Vec<T>)> {
        let records = Wal::<T>::replay(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(name, wal, rx));
        tracing::info!(journal = name, path = %path.display(), replayed = records.len(), "journal opened");
        Ok((
            Self {
                tx,
                gate: Arc::new(RwLock::new(())),
            },
            records,
        ))
    }

    /// Held across append + in-memory apply so compaction never snapshots
    /// state that is ahead of, or behind, the file.
    pub async fn commit_permit(&self) -> OwnedRwLockReadGuard<()> {
        self.gate.clone().read_owned().await
    }

    /// Durably append one record. Resolves once the batch holding it is fsynced.
    pub async fn append(&self, record: T) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Append { record, response })
            .await
            .map_err(|_| io::Error::other("journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("journal writer dropped response"))?
    }

    /// Rewrite the file from `snapshot()`, taken while no commit is in flight.
    pub async fn compact_with<F>(&self, snapshot: F) -> io::Result<()>
    where
        F: FnOnce() -> Vec<T>,
    {
        let _exclusive = self.gate.write().await;
        let records = snapshot();
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Compact { records, response })
            .await
            .map_err(|_| io::Error::other("journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("journal writer dropped response"))?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .tx
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Owns the file. Blocks for the first append, drains whatever else is
/// already queued, then does a single fsync for the whole batch.
async fn writer_loop<T: Serialize + DeserializeOwned>(
    name: &'static str,
    mut wal: Wal<T>,
    mut rx: mpsc::Receiver<JournalCommand<T>>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(name, &mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_control(name, &mut wal, other);
                }
            }
            other => handle_control(name, &mut wal, other),
        }
    }
    tracing::debug!(journal = name, "journal writer stopped");
}

fn commit_batch<T: Serialize + DeserializeOwned>(
    name: &'static str,
    wal: &mut Wal<T>,
    batch: &mut Pending<T>,
) {
    metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE, "journal" => name)
        .record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(name, wal, batch);
    metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS, "journal" => name)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(journal = name, error = %e, "journal flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Write and fsync the whole batch, or leave the file as it was before it.
fn flush_batch<T: Serialize + DeserializeOwned>(
    name: &'static str,
    wal: &mut Wal<T>,
    batch: &Pending<T>,
) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(record, _)| wal.append_buffered(record))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!(journal = name, error = %e, "journal rollback failed, refusing further writes");
    }
    result
}

fn handle_control<T: Serialize + DeserializeOwned>(
    name: &'static str,
    wal: &mut Wal<T>,
    cmd: JournalCommand<T>,
) {
    match cmd {
        JournalCommand::Compact { records, response } => {
            let kept = records.len();
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            match &result {
                Ok(()) => tracing::info!(journal = name, records = kept, "journal compacted"),
                Err(e) => tracing::error!(journal = name, error = %e, "journal compaction failed"),
            }
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { record, response } => {
            let mut batch = vec![(record, response)];
            commit_batch(name, wal, &mut batch);
        }
    }
}
