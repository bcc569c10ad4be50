use tokio::sync::RwLockWriteGuard;

use crate::identity::UserId;
use crate::model::*;

use super::conflict::now_local;
use super::{Engine, EngineError, ReservationStore};

impl<S: ReservationStore> Engine<S> {
    /// Every live reservation in insertion order, after a retention sweep.
    pub async fn list_active_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        self.list_active_at(now_local()).await
    }

    /// The caller's own live reservations, for picking one to cancel.
    pub async fn list_owner_reservations(
        &self,
        owner: Option<&UserId>,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list_owner_at(owner, now_local()).await
    }

    pub async fn list_active_at(&self, now: Stamp) -> Result<Vec<Reservation>, EngineError> {
        let mut store = self.store.write().await;
        self.sweep_locked(&mut store, now).await?;
        let store = RwLockWriteGuard::downgrade(store);
        Ok(store.list_all().into_iter().cloned().collect())
    }

    pub async fn list_owner_at(
        &self,
        owner: Option<&UserId>,
        now: Stamp,
    ) -> Result<Vec<Reservation>, EngineError> {
        let owner = owner.ok_or(EngineError::Unauthenticated)?;
        let mut active = self.list_active_at(now).await?;
        active.retain(|r| &r.owner == owner);
        Ok(active)
    }

    /// Plain lookup, no sweep and no ownership check.
    pub async fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.store.read().await.find_by_id(id).cloned()
    }

    pub async fn reservation_count(&self) -> usize {
        self.store.read().await.len()
    }
}
