//! Ephemeral Store: in-memory, token-keyed blob store for one-shot fetches
//! during adoption.
//!
//! The source never deletes blobs — an unbounded memory leak in long-lived
//! deployments (§9, a documented defect, not to be replicated). This
//! implementation adds a TTL sweep instead: an entry not read for 10 minutes
//! is dropped by a background sweeper the owning binary spawns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    blob: String,
    last_read: Instant,
}

/// Token-addressed, single-value, read-many blob store.
pub struct EphemeralStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl EphemeralStore {
    pub fn new() -> Arc<Self> {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        })
    }

    /// Store `blob` under a freshly minted unguessable token, returning it.
    pub async fn store(&self, blob: String) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.entries.write().await.insert(
            token.clone(),
            Entry {
                blob,
                last_read: Instant::now(),
            },
        );
        token
    }

    /// Fetch the blob for `token`, refreshing its last-read time. Returns
    /// `None` if the token is unknown or has expired — the Bootstrap File
    /// Server treats both the same way: an empty payload (§4.7).
    pub async fn get(&self, token: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(token)?;
        entry.last_read = Instant::now();
        Some(entry.blob.clone())
    }

    /// Blocking variant of [`store`](Self::store) for use from inside a
    /// `spawn_blocking` Driver call, which cannot `.await`.
    pub fn store_blocking(self: &Arc<Self>, blob: String) -> String {
        tokio::runtime::Handle::current().block_on(self.store(blob))
    }

    /// Drop every entry whose last read exceeds the configured TTL.
    pub async fn sweep(&self) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_read.elapsed() < ttl);
    }

    /// Spawn a background task that sweeps every minute until the returned
    /// handle is dropped/aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.sweep().await;
            }
        })
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let store = EphemeralStore::new();
        let token = store.store("hello".to_string()).await;
        assert_eq!(store.get(&token).await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn unknown_token_returns_none() {
        let store = EphemeralStore::new();
        assert_eq!(store.get("no-such-token").await, None);
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let store = EphemeralStore::with_ttl(Duration::from_millis(1));
        let token = store.store("hello".to_string()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.sweep().await;
        assert_eq!(store.get(&token).await, None);
    }

    #[tokio::test]
    async fn read_refreshes_ttl() {
        let store = EphemeralStore::with_ttl(Duration::from_millis(50));
        let token = store.store("hello".to_string()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get(&token).await, Some("hello".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Still alive because the read above refreshed last_read.
        store.sweep().await;
        assert_eq!(store.get(&token).await, Some("hello".to_string()));
    }
}
