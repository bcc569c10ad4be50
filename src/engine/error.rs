use thiserror::Error;

use crate::model::ReservationId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing, malformed, or non-positive-duration input.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("not authenticated")]
    Unauthenticated,
    /// Carries the existing reservation that blocks the slot.
    #[error("this time slot is already reserved")]
    SlotConflict(ReservationId),
    /// Unknown id and foreign owner look the same from outside.
    #[error("reservation not found")]
    NotFoundOrUnauthorized,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInterval(reason.into())
    }
}
