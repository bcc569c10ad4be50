use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::identity::UserId;

/// Naive local timestamp at minute precision. No time zone is attached.
pub type Stamp = NaiveDateTime;

/// Storage-assigned reservation identifier. Never reused.
pub type ReservationId = Ulid;

/// How timestamps are rendered to clients.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Stamp,
    pub end: Stamp,
}

impl Span {
    pub fn new(start: Stamp, end: Stamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Strict comparison on both sides: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn ends_before(&self, cutoff: Stamp) -> bool {
        self.end < cutoff
    }
}

/// One exclusive hold on the shared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub owner: UserId,
    pub span: Span,
}

/// WAL record format. Replaying these in order rebuilds the reservation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: ReservationId,
        owner: UserId,
        span: Span,
    },
    ReservationCancelled {
        id: ReservationId,
    },
    /// Everything ending strictly before `cutoff` was purged.
    RetentionSwept {
        cutoff: Stamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Stamp {
        NaiveDate::from_ymd_opt(2023, 3, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn span_duration() {
        let s = Span::new(at(10, 0), at(11, 30));
        assert_eq!(s.duration(), TimeDelta::minutes(90));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(at(10, 0), at(11, 0));
        let b = Span::new(at(10, 30), at(11, 30));
        let c = Span::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn identical_spans_overlap() {
        let a = Span::new(at(10, 0), at(11, 0));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn enclosing_span_overlaps() {
        let outer = Span::new(at(9, 0), at(13, 0));
        let inner = Span::new(at(10, 0), at(10, 1));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn ends_before_is_strict() {
        let s = Span::new(at(10, 0), at(11, 0));
        assert!(s.ends_before(at(11, 1)));
        assert!(!s.ends_before(at(11, 0)));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            id: Ulid::new(),
            owner: UserId::from_username("Simone"),
            span: Span::new(at(10, 0), at(11, 0)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
