use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::service::RentalService;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites each journal once it has grown past
/// `threshold` appends since its last compaction.
pub async fn run_compactor(service: Arc<RentalService>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_once(&service, threshold).await;
    }
}

/// One pass over both journals. Returns how many were compacted.
pub async fn compact_once(service: &RentalService, threshold: u64) -> usize {
    let mut compacted = 0;

    let pending = service.engine().journal_appends_since_compact().await;
    if pending >= threshold {
        let result = service.engine().compact_journal().await;
        record("rentals", pending, result.is_ok());
        if let Err(e) = result {
            tracing::error!("rental journal compaction failed: {e}");
        } else {
            compacted += 1;
        }
    }

    let pending = service.catalog().journal_appends_since_compact().await;
    if pending >= threshold {
        let result = service.catalog().compact_journal().await;
        record("catalog", pending, result.is_ok());
        if let Err(e) = result {
            tracing::error!("catalog journal compaction failed: {e}");
        } else {
            compacted += 1;
        }
    }

    compacted
}

fn record(journal: &'static str, pending: u64, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(observability::JOURNAL_COMPACTIONS_TOTAL, "journal" => journal, "status" => status)
        .increment(1);
    if ok {
        info!(journal, pending, "journal compacted");
    }
}
