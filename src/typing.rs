//! Typing Manager (C6): per-(user, channel) typing state with a 10-second
//! auto-expiry, broadcast on start, and silent removal on expiry — no
//! "stopped typing" event exists in this protocol.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

pub const TYPING_TTL: Duration = Duration::from_secs(10);

/// Keyed by (channel_id, user_id) so expiry and lookups stay independent per channel.
pub struct TypingManager {
    entries: Arc<DashMap<(Uuid, Uuid), tokio::time::Instant>>,
}

impl TypingManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Create or refresh the typing entry for `user_id` in `channel_id`.
    /// The caller is responsible for broadcasting TYPING_START.
    pub fn start(&self, channel_id: Uuid, user_id: Uuid) {
        self.entries.insert((channel_id, user_id), tokio::time::Instant::now());
    }

    /// Cancel the typing entry — called when that user sends a message in the channel.
    pub fn cancel(&self, channel_id: Uuid, user_id: Uuid) {
        self.entries.remove(&(channel_id, user_id));
    }

    pub fn is_typing(&self, channel_id: Uuid, user_id: Uuid) -> bool {
        match self.entries.get(&(channel_id, user_id)) {
            Some(started) => started.elapsed() < TYPING_TTL,
            None => false,
        }
    }

    pub fn active_in_channel(&self, channel_id: Uuid) -> Vec<Uuid> {
        let now = tokio::time::Instant::now();
        self.entries
            .iter()
            .filter(|e| e.key().0 == channel_id && now.duration_since(*e.value()) < TYPING_TTL)
            .map(|e| e.key().1)
            .collect()
    }

    /// Sweep expired entries. Run on an interval as a supervised background activity.
    pub fn sweep_expired(&self) {
        let now = tokio::time::Instant::now();
        self.entries.retain(|_, started| now.duration_since(*started) < TYPING_TTL);
    }

    /// Spawn the periodic sweep activity. Returns a handle the caller may abort on shutdown.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                self.sweep_expired();
            }
        })
    }
}

impl Default for TypingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_cancel_clears_entry() {
        let mgr = TypingManager::new();
        let channel = Uuid::new_v4();
        let user = Uuid::new_v4();
        mgr.start(channel, user);
        assert!(mgr.is_typing(channel, user));
        mgr.cancel(channel, user);
        assert!(!mgr.is_typing(channel, user));
    }

    #[test]
    fn independent_channels_for_same_user() {
        let mgr = TypingManager::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        mgr.start(c1, user);
        assert!(mgr.is_typing(c1, user));
        assert!(!mgr.is_typing(c2, user));
    }

    #[test]
    fn active_in_channel_lists_only_that_channel() {
        let mgr = TypingManager::new();
        let channel = Uuid::new_v4();
        let other = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        mgr.start(channel, alice);
        mgr.start(other, bob);
        assert_eq!(mgr.active_in_channel(channel), vec![alice]);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let mgr = TypingManager::new();
        let channel = Uuid::new_v4();
        let user = Uuid::new_v4();
        mgr.entries.insert((channel, user), tokio::time::Instant::now() - Duration::from_secs(11));
        mgr.sweep_expired();
        assert!(!mgr.is_typing(channel, user));
    }
}
