use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Registry of the connections a server currently holds.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    connections: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid, addr: SocketAddr) {
        let peer = PeerInfo {
            addr,
            connected_at: Utc::now(),
        };
        self.connections.write().await.insert(id, peer);
        info!("Added connection {} ({}) to pool", id, addr);
    }

    pub async fn remove(&self, id: &Uuid) -> Option<PeerInfo> {
        let removed = self.connections.write().await.remove(id);
        if let Some(peer) = &removed {
            let held = Utc::now() - peer.connected_at;
            info!(
                "Removed connection {} ({}) from pool after {}ms",
                id,
                peer.addr,
                held.num_milliseconds()
            );
        }
        removed
    }

    pub async fn get(&self, id: &Uuid) -> Option<PeerInfo> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn get_all_connection_ids(&self) -> Vec<Uuid> {
        self.connections.read().await.keys().cloned().collect()
    }
}
