//! Hub (C4): process-wide session registry, membership indexes, and fan-out.
//!
//! Three indexes (user/server/channel) over the same session table, with
//! best-effort per-session delivery: a slow consumer gets closed, not the
//! whole broadcast stalled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::protocol::{close_code, EventTag, Envelope};

#[derive(Clone)]
struct SessionEntry {
    user_id: Uuid,
    sender: mpsc::Sender<Envelope>,
    /// The single cancel signal a session's reader and writer both observe.
    /// `None` means live; `Some(code)` is the close code the writer should
    /// emit before tearing down.
    cancel: watch::Sender<Option<u16>>,
}

/// Process-wide registry. Must be instantiated exactly once per service
/// instance and passed explicitly to every Session and Handler — never
/// reached via an ambient global.
pub struct Hub {
    sessions: DashMap<Uuid, SessionEntry>,
    by_user: DashMap<Uuid, Vec<Uuid>>,
    by_server: DashMap<Uuid, Vec<Uuid>>,
    by_channel: DashMap<Uuid, Vec<Uuid>>,
    dropped_sessions: AtomicU64,
    gateway_errors: AtomicU64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            by_server: DashMap::new(),
            by_channel: DashMap::new(),
            dropped_sessions: AtomicU64::new(0),
            gateway_errors: AtomicU64::new(0),
        })
    }

    /// Register a freshly-authenticated session under its user/server/channel
    /// indexes. `channel_ids` should be every text channel across the
    /// session's server snapshot (implicit subscription, §4.4).
    pub fn register(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        server_ids: &[Uuid],
        channel_ids: &[Uuid],
        sender: mpsc::Sender<Envelope>,
        cancel: watch::Sender<Option<u16>>,
    ) {
        self.sessions.insert(session_id, SessionEntry { user_id, sender, cancel });
        push_index(&self.by_user, user_id, session_id);
        for server_id in server_ids {
            push_index(&self.by_server, *server_id, session_id);
        }
        for channel_id in channel_ids {
            push_index(&self.by_channel, *channel_id, session_id);
        }
    }

    /// Fully unregister a session. Safe to call more than once.
    pub fn unregister(&self, session_id: Uuid, user_id: Uuid, server_ids: &[Uuid], channel_ids: &[Uuid]) {
        self.sessions.remove(&session_id);
        remove_index(&self.by_user, user_id, session_id);
        for server_id in server_ids {
            remove_index(&self.by_server, *server_id, session_id);
        }
        for channel_id in channel_ids {
            remove_index(&self.by_channel, *channel_id, session_id);
        }
    }

    pub fn subscribe_channel(&self, channel_id: Uuid, session_id: Uuid) {
        push_index(&self.by_channel, channel_id, session_id);
    }

    pub fn unsubscribe_channel(&self, channel_id: Uuid, session_id: Uuid) {
        remove_index(&self.by_channel, channel_id, session_id);
    }

    /// Drop a channel's entire subscriber index — used when the channel itself
    /// is deleted, so no stale entries linger in `by_channel`.
    pub fn drop_channel(&self, channel_id: Uuid) {
        self.by_channel.remove(&channel_id);
    }

    /// True if any session belonging to `user_id` is currently registered.
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_user.get(&user_id).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn sessions_for_server(&self, server_id: Uuid) -> Vec<Uuid> {
        self.by_server.get(&server_id).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn dropped_session_count(&self) -> u64 {
        self.dropped_sessions.load(Ordering::Relaxed)
    }

    /// Counts a non-terminal, in-band handler error (§7: counted, not
    /// individually logged).
    pub fn record_gateway_error(&self) {
        self.gateway_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_error_count(&self) -> u64 {
        self.gateway_errors.load(Ordering::Relaxed)
    }

    pub fn broadcast_channel(&self, channel_id: Uuid, tag: EventTag, payload: serde_json::Value, except: Option<Uuid>) {
        let targets = self.by_channel.get(&channel_id).map(|v| v.clone()).unwrap_or_default();
        self.fan_out(&targets, tag, payload, except);
    }

    pub fn broadcast_server(&self, server_id: Uuid, tag: EventTag, payload: serde_json::Value, except: Option<Uuid>) {
        let targets = self.by_server.get(&server_id).map(|v| v.clone()).unwrap_or_default();
        self.fan_out(&targets, tag, payload, except);
    }

    pub fn send_to_user(&self, user_id: Uuid, tag: EventTag, payload: serde_json::Value) {
        let targets = self.by_user.get(&user_id).map(|v| v.clone()).unwrap_or_default();
        self.fan_out(&targets, tag, payload, None);
    }

    /// Deliver to exactly one session — used for replies scoped to the
    /// requesting connection (e.g. `request_messages`) rather than every
    /// device a user has open.
    pub fn send_to_session(&self, session_id: Uuid, tag: EventTag, payload: serde_json::Value) {
        self.fan_out(std::slice::from_ref(&session_id), tag, payload, None);
    }

    pub fn broadcast_presence(&self, server_ids: &[Uuid], tag: EventTag, payload: serde_json::Value) {
        for server_id in server_ids {
            self.broadcast_server(*server_id, tag, payload.clone(), None);
        }
    }

    /// Force-close every session a user has within a given server — used by
    /// kick/ban. The writer handles actually emitting the close frame.
    pub fn close_sessions_in_server(&self, user_id: Uuid, server_id: Uuid, code: u16) {
        let targets = self.by_server.get(&server_id).map(|v| v.clone()).unwrap_or_default();
        for session_id in targets {
            if let Some(entry) = self.sessions.get(&session_id) {
                if entry.user_id == user_id {
                    let _ = entry.cancel.send(Some(code));
                }
            }
        }
    }

    fn fan_out(&self, targets: &[Uuid], tag: EventTag, payload: serde_json::Value, except: Option<Uuid>) {
        for session_id in targets {
            if Some(*session_id) == except {
                continue;
            }
            let Some(entry) = self.sessions.get(session_id) else { continue };
            // `s` is left unset — the session's own writer stamps its sequence number.
            let frame = Envelope::dispatch(0, tag, payload.clone());
            if entry.sender.try_send(frame).is_err() {
                let _ = entry.cancel.send(Some(close_code::RATE_LIMITED));
                self.dropped_sessions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn push_index(map: &DashMap<Uuid, Vec<Uuid>>, key: Uuid, session_id: Uuid) {
    let mut entry = map.entry(key).or_default();
    if !entry.contains(&session_id) {
        entry.push(session_id);
    }
}

fn remove_index(map: &DashMap<Uuid, Vec<Uuid>>, key: Uuid, session_id: Uuid) {
    if let Some(mut entry) = map.get_mut(&key) {
        entry.retain(|id| *id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(
        hub: &Arc<Hub>,
        user_id: Uuid,
        server_id: Uuid,
        channel_id: Uuid,
    ) -> (Uuid, mpsc::Receiver<Envelope>, watch::Receiver<Option<u16>>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(None);
        hub.register(session_id, user_id, &[server_id], &[channel_id], tx, cancel_tx);
        (session_id, rx, cancel_rx)
    }

    #[tokio::test]
    async fn broadcast_channel_excludes_author() {
        let hub = Hub::new();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let (alice_id, mut alice_rx, _) = handle(&hub, Uuid::new_v4(), server, channel);
        let (_bob_id, mut bob_rx, _) = handle(&hub, Uuid::new_v4(), server, channel);

        hub.broadcast_channel(channel, EventTag::MESSAGE_CREATE, serde_json::json!({"x": 1}), Some(alice_id));

        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_session_of_that_user() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let (_s1, mut rx1, _) = handle(&hub, user, server, channel);
        let session2 = Uuid::new_v4();
        let (tx2, mut rx2) = mpsc::channel(8);
        let (cancel2, _cancel2_rx) = watch::channel(None);
        hub.register(session2, user, &[server], &[channel], tx2, cancel2);

        hub.send_to_user(user, EventTag::WHISPER_CREATE, serde_json::json!({}));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_session_reaches_only_that_session() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let (session_a, mut rx_a, _) = handle(&hub, user, server, channel);
        let session_b = Uuid::new_v4();
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (cancel_b, _cancel_b_rx) = watch::channel(None);
        hub.register(session_b, user, &[server], &[channel], tx_b, cancel_b);

        hub.send_to_session(session_a, EventTag::MESSAGES_HISTORY, serde_json::json!({}));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_from_all_indexes() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let (session_id, _rx, _cancel_rx) = handle(&hub, user, server, channel);

        hub.unregister(session_id, user, &[server], &[channel]);

        assert!(!hub.is_online(user));
        assert!(hub.sessions_for_server(server).is_empty());
    }

    #[tokio::test]
    async fn full_queue_triggers_cancel_signal_for_that_session_only() {
        let hub = Hub::new();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let slow_session = Uuid::new_v4();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (slow_cancel_tx, slow_cancel_rx) = watch::channel(None);
        hub.register(slow_session, Uuid::new_v4(), &[server], &[channel], slow_tx, slow_cancel_tx);
        let (_fast_id, mut fast_rx, fast_cancel_rx) = handle(&hub, Uuid::new_v4(), server, channel);

        hub.broadcast_channel(channel, EventTag::MESSAGE_CREATE, serde_json::json!({}), None);
        hub.broadcast_channel(channel, EventTag::MESSAGE_CREATE, serde_json::json!({}), None);

        assert!(slow_rx.try_recv().is_ok());
        assert_eq!(*slow_cancel_rx.borrow(), Some(close_code::RATE_LIMITED));
        assert_eq!(*fast_cancel_rx.borrow(), None);
        assert!(fast_rx.try_recv().is_ok());
        assert_eq!(hub.dropped_session_count(), 1);
    }

    #[tokio::test]
    async fn record_gateway_error_increments_counter() {
        let hub = Hub::new();
        assert_eq!(hub.gateway_error_count(), 0);

        hub.record_gateway_error();
        hub.record_gateway_error();

        assert_eq!(hub.gateway_error_count(), 2);
    }

    #[tokio::test]
    async fn drop_channel_clears_its_subscriber_index() {
        let hub = Hub::new();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let (_sid, mut rx, _) = handle(&hub, Uuid::new_v4(), server, channel);

        hub.drop_channel(channel);
        hub.broadcast_channel(channel, EventTag::CHANNEL_DELETE, serde_json::json!({}), None);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_sessions_in_server_only_targets_matching_user() {
        let hub = Hub::new();
        let server = Uuid::new_v4();
        let channel = Uuid::new_v4();
        let mallory = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let (_m1, _rx1, mallory_cancel) = handle(&hub, mallory, server, channel);
        let (_c1, _rx2, carol_cancel) = handle(&hub, carol, server, channel);

        hub.close_sessions_in_server(mallory, server, close_code::NORMAL);

        assert_eq!(*mallory_cancel.borrow(), Some(close_code::NORMAL));
        assert_eq!(*carol_cancel.borrow(), None);
    }
}
