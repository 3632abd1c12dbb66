mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod store;

pub use conflict::conflicts;
pub use error::{Conflict, ConflictKind, EngineError};
pub use mutations::VacantKey;
pub use pricing::price;
pub use store::{Ledger, LockSet, RentalStore};

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{CarLookup, UserLookup};
use crate::journal::Journal;
use crate::model::RentalEvent;

/// Behavior switches that vary by deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePolicy {
    /// On update, also reject spans touching another rental of the car by one day.
    pub update_buffer_day: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            update_buffer_day: true,
        }
    }
}

/// Checks, prices and commits rentals. Every mutation runs with the write
/// locks of the car and user ledgers it touches.
pub struct Engine {
    pub(super) store: Arc<RentalStore>,
    pub(super) journal: Journal<RentalEvent>,
    pub(super) cars: Arc<dyn CarLookup>,
    pub(super) users: Arc<dyn UserLookup>,
    pub(super) policy: EnginePolicy,
}

impl Engine {
    /// Replay the rental journal at `path` and start its writer.
    pub fn new(
        path: &Path,
        cars: Arc<dyn CarLookup>,
        users: Arc<dyn UserLookup>,
        policy: EnginePolicy,
    ) -> io::Result<Self> {
        let (journal, events) = Journal::open("rentals", path)?;
        let store = RentalStore::from_events(events);
        metrics::gauge!(crate::observability::RENTALS_ACTIVE).set(store.len() as f64);
        Ok(Self {
            store: Arc::new(store),
            journal,
            cars,
            users,
            policy,
        })
    }

    /// Journal then apply, in a task that owns the locks. A caller dropped
    /// mid-commit can't leave the file and memory disagreeing.
    pub(super) async fn commit(&self, mut locks: LockSet, event: RentalEvent) -> Result<(), EngineError> {
        let store = self.store.clone();
        let journal = self.journal.clone();
        tokio::spawn(async move {
            let _permit = journal.commit_permit().await;
            journal.append(event.clone()).await?;
            store.apply(&event, &mut locks);
            metrics::gauge!(crate::observability::RENTALS_ACTIVE).set(store.len() as f64);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|e| EngineError::Storage(format!("commit task failed: {e}")))?
    }

    /// Rewrite the rental journal with one record per live rental.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let store = self.store.clone();
        self.journal.compact_with(move || store.snapshot()).await?;
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
