use super::store::{AcquireOutcome, Fingerprint, LeaseStore, LeaseToken};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    owner: Uuid,
    expires_at: Instant,
}

/// Single shared lease store backed by process memory.
///
/// One instance is shared (via `Arc`) by every worker in the deployment, so
/// test-and-set under the inner mutex is atomic across all concurrent
/// acquirers, the property the orchestrator relies on. Expiry is enforced
/// lazily at `acquire` and by the lifecycle sweeper. A network-backed store
/// (the original deployment used Redis `SETEX`) plugs in behind the same
/// trait.
#[derive(Debug, Clone, Default)]
pub struct SharedLeaseStore {
    leases: Arc<Mutex<HashMap<String, LeaseEntry>>>,
}

impl SharedLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) leases, for diagnostics.
    pub async fn live_count(&self) -> usize {
        let now = Instant::now();
        self.leases
            .lock()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

impl LeaseStore for SharedLeaseStore {
    fn acquire<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<AcquireOutcome>> {
        Box::pin(async move {
            let key = fingerprint.key();
            let now = Instant::now();
            let mut leases = self.leases.lock().await;

            if let Some(entry) = leases.get(&key) {
                if entry.expires_at > now {
                    return Ok(AcquireOutcome::Busy);
                }
                // TTL elapsed without release (crashed holder): the slot is free.
                leases.remove(&key);
            }

            let owner = Uuid::new_v4();
            leases.insert(
                key,
                LeaseEntry {
                    owner,
                    expires_at: now + ttl,
                },
            );
            Ok(AcquireOutcome::Granted(LeaseToken::new(
                fingerprint.clone(),
                owner,
            )))
        })
    }

    fn release<'a>(&'a self, token: &'a LeaseToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = token.fingerprint().key();
            let mut leases = self.leases.lock().await;
            // Compare-and-delete: a stale token must not free a lease that
            // has since expired and been re-granted to another owner.
            if let Some(entry) = leases.get(&key) {
                if entry.owner == token.owner() {
                    leases.remove(&key);
                }
            }
            Ok(())
        })
    }

    fn sweep_expired<'a>(&'a self) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut leases = self.leases.lock().await;
            let before = leases.len();
            leases.retain(|_, entry| entry.expires_at > now);
            Ok(before - leases.len())
        })
    }
}
