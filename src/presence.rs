use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::models::PresenceStatus;

/// Tracks each user's presence status. Typing indicators live in [`crate::typing`].
pub struct PresenceManager {
    statuses: Arc<DashMap<Uuid, PresenceStatus>>,
}

impl PresenceManager {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(DashMap::new()),
        }
    }

    pub fn set_status(&self, user_id: Uuid, status: PresenceStatus) {
        self.statuses.insert(user_id, status);
    }

    pub fn get_status(&self, user_id: Uuid) -> PresenceStatus {
        self.statuses
            .get(&user_id)
            .map(|s| s.clone())
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Mark a user offline — called when their last live session closes.
    pub fn set_offline(&self, user_id: &Uuid) {
        self.statuses.insert(*user_id, PresenceStatus::Offline);
    }

    pub fn get_bulk_status(&self, user_ids: &[Uuid]) -> HashMap<Uuid, PresenceStatus> {
        user_ids.iter().map(|id| (*id, self.get_status(*id))).collect()
    }
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_defaults_to_offline() {
        let mgr = PresenceManager::new();
        assert_eq!(mgr.get_status(Uuid::new_v4()), PresenceStatus::Offline);
    }

    #[test]
    fn set_status_round_trips() {
        let mgr = PresenceManager::new();
        let user = Uuid::new_v4();
        mgr.set_status(user, PresenceStatus::Idle);
        assert_eq!(mgr.get_status(user), PresenceStatus::Idle);
        mgr.set_offline(&user);
        assert_eq!(mgr.get_status(user), PresenceStatus::Offline);
    }
}
