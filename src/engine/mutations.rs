use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::identity::UserId;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::check_no_conflict;
use super::interval::parse_interval;
use super::{Engine, EngineError, ReservationStore, WalCommand};

impl<S: ReservationStore> Engine<S> {
    /// Reserve `[date + time, date + time + duration)` for `owner`.
    pub async fn create_reservation(
        &self,
        owner: Option<&UserId>,
        date: Option<&str>,
        time: Option<&str>,
        duration_minutes: Option<i64>,
    ) -> Result<Reservation, EngineError> {
        let owner = owner.ok_or(EngineError::Unauthenticated)?;
        let span = parse_interval(date, time, duration_minutes)?;
        self.reserve_span(owner, span).await
    }

    /// Check-then-insert as one critical section.
    pub(crate) async fn reserve_span(
        &self,
        owner: &UserId,
        span: Span,
    ) -> Result<Reservation, EngineError> {
        let mut store = self.store.write().await;
        if store.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Err(e) = check_no_conflict(&*store, &span) {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            debug!(%owner, start = %span.start, end = %span.end, "slot conflict");
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            owner: owner.clone(),
            span,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            owner: reservation.owner.clone(),
            span,
        };
        self.persist_and_apply(&mut store, &event).await?;

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            id = %reservation.id,
            %owner,
            start = %span.start,
            end = %span.end,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Delete `id` if and only if `requester` owns it.
    pub async fn cancel_reservation(
        &self,
        requester: Option<&UserId>,
        id: ReservationId,
    ) -> Result<(), EngineError> {
        let requester = requester.ok_or(EngineError::Unauthenticated)?;
        let mut store = self.store.write().await;
        let owned = store
            .find_by_id(&id)
            .is_some_and(|r| &r.owner == requester);
        if !owned {
            debug!(%id, %requester, "cancel rejected");
            return Err(EngineError::NotFoundOrUnauthorized);
        }

        let event = Event::ReservationCancelled { id };
        self.persist_and_apply(&mut store, &event).await?;

        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(%id, %requester, "reservation cancelled");
        Ok(())
    }

    /// Purge every reservation whose end is more than the retention window
    /// before `now`. Returns how many were removed.
    pub async fn sweep_expired(&self, now: Stamp) -> Result<usize, EngineError> {
        let mut store = self.store.write().await;
        self.sweep_locked(&mut store, now).await
    }

    pub(super) async fn sweep_locked(&self, store: &mut S, now: Stamp) -> Result<usize, EngineError> {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return Ok(0);
        };
        let expired = store.count_older_than(cutoff);
        if expired == 0 {
            return Ok(0);
        }

        let event = Event::RetentionSwept { cutoff };
        self.persist_and_apply(store, &event).await?;

        metrics::counter!(observability::RESERVATIONS_SWEPT_TOTAL).increment(expired as u64);
        info!(%cutoff, removed = expired, "retention sweep");
        Ok(expired)
    }

    /// Rewrite the log as one creation per surviving reservation, in
    /// insertion order.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held across the swap: no append can land between snapshot and rename.
        let store = self.store.read().await;
        let events: Vec<Event> = store
            .list_all()
            .into_iter()
            .map(|r| Event::ReservationCreated {
                id: r.id,
                owner: r.owner.clone(),
                span: r.span,
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!(reservations = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        match self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "WAL append counter unavailable");
                0
            }
        }
    }
}
