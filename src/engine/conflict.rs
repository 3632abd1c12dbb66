use ulid::Ulid;

use crate::limits::MAX_RENTAL_DAYS;
use crate::model::{DateSpan, Rental};

use super::error::{Conflict, ConflictKind};
use super::EngineError;

pub(crate) fn validate_span(span: &DateSpan) -> Result<(), EngineError> {
    if span.elapsed_days() > MAX_RENTAL_DAYS {
        return Err(EngineError::LimitExceeded("rental too long"));
    }
    Ok(())
}

/// True iff `candidate` shares a day with any of `existing`.
pub fn conflicts<'a>(candidate: &DateSpan, existing: impl IntoIterator<Item = &'a DateSpan>) -> bool {
    existing.into_iter().any(|s| candidate.overlaps(s))
}

/// First rental in a start-sorted ledger overlapping `span`, skipping `exclude`.
pub(crate) fn find_conflict(entries: &[Rental], span: &DateSpan, exclude: Option<Ulid>) -> Option<Ulid> {
    entries
        .iter()
        .take_while(|r| r.span.start <= span.end)
        .filter(|r| Some(r.id) != exclude)
        .find(|r| r.span.overlaps(span))
        .map(|r| r.id)
}

/// First rental in a start-sorted ledger ending the day before `span` or
/// starting the day after it, skipping `exclude`.
pub(crate) fn find_adjacent(entries: &[Rental], span: &DateSpan, exclude: Option<Ulid>) -> Option<Conflict> {
    let horizon = span.end.succ_opt().unwrap_or(span.end);
    entries
        .iter()
        .take_while(|r| r.span.start <= horizon)
        .filter(|r| Some(r.id) != exclude)
        .find_map(|r| {
            let kind = if span.is_preceded_by(&r.span) {
                ConflictKind::DayBefore
            } else if span.is_followed_by(&r.span) {
                ConflictKind::DayAfter
            } else {
                return None;
            };
            Some(Conflict { rental_id: r.id, kind })
        })
}
