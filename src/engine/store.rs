use std::collections::{HashMap, HashSet};

use crate::model::*;

/// Storage gateway consumed by the engine.
///
/// The engine serialises all mutations behind its own lock, so
/// implementations need no internal synchronisation.
pub trait ReservationStore: Send + Sync {
    fn insert(&mut self, reservation: Reservation);

    fn delete_by_id(&mut self, id: &ReservationId) -> Option<Reservation>;

    fn find_by_id(&self, id: &ReservationId) -> Option<&Reservation>;

    /// All records, oldest insertion first.
    fn list_all(&self) -> Vec<&Reservation>;

    /// Delete every record whose end is strictly before `cutoff`.
    fn delete_older_than(&mut self, cutoff: Stamp) -> Vec<Reservation>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records whose span intersects `span`. The default is a linear scan.
    fn find_overlapping(&self, span: &Span) -> Vec<&Reservation> {
        self.list_all()
            .into_iter()
            .filter(|r| r.span.overlaps(span))
            .collect()
    }

    fn count_older_than(&self, cutoff: Stamp) -> usize {
        self.list_all()
            .into_iter()
            .filter(|r| r.span.ends_before(cutoff))
            .count()
    }
}

/// In-memory reservation set, rebuilt from the WAL on startup.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: HashMap<ReservationId, Reservation>,
    /// Insertion order, for listings.
    order: Vec<ReservationId>,
    /// `(span, id)` sorted by `span.start`, for range queries.
    by_start: Vec<(Span, ReservationId)>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&mut self, id: &ReservationId) {
        self.order.retain(|o| o != id);
        self.by_start.retain(|(_, o)| o != id);
    }
}

impl ReservationStore for InMemoryStore {
    fn insert(&mut self, reservation: Reservation) {
        // Ids are never reused; a repeat insert replaces the old record.
        self.delete_by_id(&reservation.id);
        let pos = self
            .by_start
            .partition_point(|(span, _)| span.start <= reservation.span.start);
        self.by_start.insert(pos, (reservation.span, reservation.id));
        self.order.push(reservation.id);
        self.records.insert(reservation.id, reservation);
    }

    fn delete_by_id(&mut self, id: &ReservationId) -> Option<Reservation> {
        let removed = self.records.remove(id)?;
        self.unindex(id);
        Some(removed)
    }

    fn find_by_id(&self, id: &ReservationId) -> Option<&Reservation> {
        self.records.get(id)
    }

    fn list_all(&self) -> Vec<&Reservation> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }

    fn delete_older_than(&mut self, cutoff: Stamp) -> Vec<Reservation> {
        let expired: HashSet<ReservationId> = self
            .records
            .values()
            .filter(|r| r.span.ends_before(cutoff))
            .map(|r| r.id)
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }
        self.order.retain(|id| !expired.contains(id));
        self.by_start.retain(|(_, id)| !expired.contains(id));
        expired
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    /// Entries starting at or after `span.end` can't intersect it, so only
    /// the prefix left of that point is scanned.
    fn find_overlapping(&self, span: &Span) -> Vec<&Reservation> {
        let right_bound = self.by_start.partition_point(|(s, _)| s.start < span.end);
        self.by_start[..right_bound]
            .iter()
            .filter(|(s, _)| s.end > span.start)
            .filter_map(|(_, id)| self.records.get(id))
            .collect()
    }
}
