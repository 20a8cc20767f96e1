//! Connection hub: fan-out of signed frames to every live connection of a
//! user. Multi-device sessions map one user to many connections.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use alloy_primitives::Address;
use tokio::sync::{mpsc, RwLock};

#[derive(Default)]
struct HubInner {
    connections: HashMap<u64, ConnectionEntry>,
    users: HashMap<Address, HashSet<u64>>,
}

struct ConnectionEntry {
    sender: mpsc::Sender<String>,
    user: Option<Address>,
}

#[derive(Default)]
pub struct ConnectionHub {
    inner: RwLock<HubInner>,
    next_id: AtomicU64,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn register(&self, connection_id: u64, sender: mpsc::Sender<String>) {
        let mut inner = self.inner.write().await;
        inner
            .connections
            .insert(connection_id, ConnectionEntry { sender, user: None });
    }

    /// Bind a connection to an authenticated wallet, replacing any previous
    /// binding of that connection.
    pub async fn associate_user(&self, connection_id: u64, user: Address) {
        let mut inner = self.inner.write().await;
        let previous = match inner.connections.get_mut(&connection_id) {
            Some(entry) => entry.user.replace(user),
            None => return,
        };
        if let Some(previous) = previous {
            if let Some(set) = inner.users.get_mut(&previous) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.users.remove(&previous);
                }
            }
        }
        inner.users.entry(user).or_default().insert(connection_id);
    }

    pub async fn unregister(&self, connection_id: u64) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.connections.remove(&connection_id) {
            if let Some(user) = entry.user {
                if let Some(set) = inner.users.get_mut(&user) {
                    set.remove(&connection_id);
                    if set.is_empty() {
                        inner.users.remove(&user);
                    }
                }
            }
        }
    }

    pub async fn user_of(&self, connection_id: u64) -> Option<Address> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection_id).and_then(|e| e.user)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Push a frame to every connection of a user. Writes never block: a
    /// full outbound queue drops the message for that connection only.
    pub async fn publish(&self, user: Address, message: &str) -> usize {
        let inner = self.inner.read().await;
        let Some(connection_ids) = inner.users.get(&user) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in connection_ids {
            let Some(entry) = inner.connections.get(connection_id) else {
                continue;
            };
            match entry.sender.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping notification for connection {}: {}",
                        connection_id, e
                    );
                }
            }
        }
        delivered
    }
}
