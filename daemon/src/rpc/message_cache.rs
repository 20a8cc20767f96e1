//! Replay protection: a TTL-bounded cache of request hashes.
//!
//! Keys are keccak256 of the raw frame bytes, so any byte-identical resend
//! within the TTL is rejected. The cache is in-memory only; a restart
//! within the TTL may admit a duplicate, which the wire semantics accept.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use alloy_primitives::{keccak256, B256};
use clearhouse_common::rpc::RpcError;
use tokio::sync::Mutex;

const MIN_CLEANUP_INTERVAL_SECS: u64 = 10;
const MAX_CLEANUP_INTERVAL_SECS: u64 = 1000;

/// Cleanup cadence adapts to the live size: size/10 seconds, clamped.
fn cleanup_interval(size: usize) -> Duration {
    Duration::from_secs(
        (size as u64 / 10).clamp(MIN_CLEANUP_INTERVAL_SECS, MAX_CLEANUP_INTERVAL_SECS),
    )
}

struct CacheInner {
    seen: HashMap<B256, Instant>,
    last_cleanup: Instant,
}

pub struct MessageCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl MessageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner {
                seen: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Reject the frame when its hash is still live, otherwise remember it.
    pub async fn check_and_insert(&self, raw: &[u8]) -> Result<(), RpcError> {
        let hash = keccak256(raw);
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(seen_at) = inner.seen.get(&hash) {
            if now.duration_since(*seen_at) < self.ttl {
                return Err(RpcError::AlreadyProcessed);
            }
        }
        inner.seen.insert(hash, now);

        if now.duration_since(inner.last_cleanup) >= cleanup_interval(inner.seen.len()) {
            let ttl = self.ttl;
            inner.seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
            inner.last_cleanup = now;
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
