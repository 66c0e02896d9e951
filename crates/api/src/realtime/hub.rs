use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};

use super::protocol::ServerEvent;
use crate::observability;

pub type ConnectionId = u64;
pub type Outbound = mpsc::Sender<String>;

pub fn user_group(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub fn chat_group(chat_id: &str) -> String {
    format!("chat:{chat_id}")
}

struct ConnectionEntry {
    user_id: String,
    outbound: Outbound,
    groups: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    // group name -> subscribed connections
    groups: HashMap<String, HashSet<ConnectionId>>,
}

impl HubState {
    fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&connection_id)?;
        for group in &entry.groups {
            self.unsubscribe(connection_id, group);
        }
        Some(entry)
    }

    fn unsubscribe(&mut self, connection_id: ConnectionId, group: &str) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

enum Delivery {
    Queued,
    Gone,
    // queue full; the connection is evicted
    Overflow,
}

fn deliver(outbound: &Outbound, payload: String) -> Delivery {
    match outbound.try_send(payload) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Closed(_)) => Delivery::Gone,
        Err(TrySendError::Full(_)) => Delivery::Overflow,
    }
}

/// Per-process subscription table for live channel connections.
///
/// Each connection owns a bounded outbound queue. A connection whose queue is
/// full is dropped from the table; its socket task sees the queue close and
/// shuts the channel down.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    state: Arc<RwLock<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a connection to `user_id` and subscribes it to the user's own group.
    pub async fn register(
        &self,
        user_id: &str,
        outbound: Outbound,
    ) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let personal = user_group(user_id);
        let mut state = self.state.write().await;
        state
            .groups
            .entry(personal.clone())
            .or_default()
            .insert(connection_id);
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.to_string(),
                outbound,
                groups: HashSet::from([personal]),
            },
        );
        connection_id
    }

    pub async fn join(&self, connection_id: ConnectionId, group: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.groups.insert(group.to_string());
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(connection_id);
        true
    }

    pub async fn leave(&self, connection_id: ConnectionId, group: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.groups.remove(group);
        }
        state.unsubscribe(connection_id, group);
    }

    /// Drops the connection and every subscription it held. Returns the bound user.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<String> {
        let mut state = self.state.write().await;
        state
            .remove_connection(connection_id)
            .map(|entry| entry.user_id)
    }

    /// Queues `event` for every connection in `group`; returns how many accepted it.
    pub async fn broadcast(&self, group: &str, event: &ServerEvent) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        {
            let state = self.state.read().await;
            let Some(members) = state.groups.get(group) else {
                return 0;
            };
            for connection_id in members {
                let Some(entry) = state.connections.get(connection_id) else {
                    continue;
                };
                match deliver(&entry.outbound, payload.clone()) {
                    Delivery::Queued => delivered += 1,
                    Delivery::Gone => {}
                    Delivery::Overflow => overflowed.push(*connection_id),
                }
            }
        }
        self.evict(&overflowed).await;
        delivered
    }

    /// Notifies every subscriber of `group`, then removes the group entirely.
    pub async fn close_group(&self, group: &str, event: &ServerEvent) -> usize {
        let payload = encode(event);
        let mut state = self.state.write().await;
        let Some(members) = state.groups.remove(group) else {
            return 0;
        };
        let mut notified = 0;
        let mut overflowed = Vec::new();
        for connection_id in members {
            let Some(entry) = state.connections.get_mut(&connection_id) else {
                continue;
            };
            entry.groups.remove(group);
            let Some(payload) = payload.as_ref() else {
                continue;
            };
            match deliver(&entry.outbound, payload.clone()) {
                Delivery::Queued => notified += 1,
                Delivery::Gone => {}
                Delivery::Overflow => overflowed.push(connection_id),
            }
        }
        for connection_id in overflowed {
            evicted(state.remove_connection(connection_id), connection_id);
        }
        notified
    }

    pub async fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(payload) = encode(event) else {
            return false;
        };
        let delivery = {
            let state = self.state.read().await;
            let Some(entry) = state.connections.get(&connection_id) else {
                return false;
            };
            deliver(&entry.outbound, payload)
        };
        match delivery {
            Delivery::Queued => true,
            Delivery::Gone => false,
            Delivery::Overflow => {
                self.evict(&[connection_id]).await;
                false
            }
        }
    }

    async fn evict(&self, connection_ids: &[ConnectionId]) {
        if connection_ids.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for connection_id in connection_ids {
            evicted(state.remove_connection(*connection_id), *connection_id);
        }
    }

    pub async fn group_size(&self, group: &str) -> usize {
        self.state
            .read()
            .await
            .groups
            .get(group)
            .map_or(0, HashSet::len)
    }

    #[cfg(test)]
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

fn evicted(entry: Option<ConnectionEntry>, connection_id: ConnectionId) {
    if let Some(entry) = entry {
        tracing::warn!(
            user_id = %entry.user_id,
            connection_id,
            "outbound queue full; dropping slow connection"
        );
        observability::register_realtime_event("evict", "queue_full", "ok");
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode realtime event");
            None
        }
    }
}
