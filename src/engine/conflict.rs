use crate::model::*;

use super::EngineError;
use super::store::ReservationStore;

/// Wall clock as a naive local timestamp.
pub fn now_local() -> Stamp {
    chrono::Local::now().naive_local()
}

/// First reservation in `existing` that intersects `candidate`.
///
/// `E.start < candidate.end && E.end > candidate.start`: a shared boundary is
/// not a conflict, an identical interval is.
pub fn first_conflict<'a, I>(candidate: &Span, existing: I) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing
        .into_iter()
        .find(|e| e.span.start < candidate.end && e.span.end > candidate.start)
}

pub fn has_conflict<'a, I>(candidate: &Span, existing: I) -> bool
where
    I: IntoIterator<Item = &'a Reservation>,
{
    first_conflict(candidate, existing).is_some()
}

/// Check against every stored reservation regardless of owner: the resource
/// is one exclusive timeline shared by all users.
pub(crate) fn check_no_conflict<S>(store: &S, candidate: &Span) -> Result<(), EngineError>
where
    S: ReservationStore + ?Sized,
{
    match first_conflict(candidate, store.find_overlapping(candidate)) {
        Some(existing) => Err(EngineError::SlotConflict(existing.id)),
        None => Ok(()),
    }
}
