//! Depot connection cache.
//!
//! Connecting to a depot is expensive (handshake plus login), so idle
//! connections are pooled per (server, workspace, user, identity) key.
//! Checkout removes the connection from the pool entirely; a borrowed
//! connection is invisible to the garbage collector and can never be closed
//! out from under a request. Dropping the lease returns it with a fresh
//! last-used stamp.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hollow_core::depot::{DepotClient, DepotConfig, DepotFactory};
use hollow_core::types::{DepotServer, DepotSyncOptions, DepotUser, DepotWorkspace, Identity};

use crate::error::SyncError;

/// Everything that distinguishes one depot login from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub server: DepotServer,
    pub workspace: DepotWorkspace,
    pub user: DepotUser,
    pub identity: Identity,
}

impl ConnectionKey {
    pub fn from_options(options: &DepotSyncOptions) -> Self {
        Self {
            server: options.server.clone(),
            workspace: options.workspace.clone(),
            user: options.user.clone(),
            identity: options.context.identity.clone(),
        }
    }

    pub fn config(&self) -> DepotConfig {
        DepotConfig {
            server: self.server.clone(),
            workspace: self.workspace.clone(),
            user: self.user.clone(),
            password: None,
            host: None,
        }
    }
}

struct IdleConnection {
    client: Box<dyn DepotClient>,
    last_used: Instant,
}

/// Pool of idle depot connections, keyed by [`ConnectionKey`].
pub struct ConnectionCache {
    factory: Arc<dyn DepotFactory>,
    idle: Mutex<HashMap<ConnectionKey, Vec<IdleConnection>>>,
}

impl ConnectionCache {
    pub fn new(factory: Arc<dyn DepotFactory>) -> Self {
        Self {
            factory,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Borrow a connection for `key`, reusing an idle one when available and
    /// dialing a fresh one otherwise.
    pub fn checkout(&self, key: &ConnectionKey) -> Result<ConnectionLease<'_>, SyncError> {
        let reused = self
            .lock()
            .get_mut(key)
            .and_then(|pool| pool.pop())
            .map(|idle| idle.client);

        let client = match reused {
            Some(client) => {
                tracing::debug!(server = %key.server, workspace = %key.workspace, "reusing cached depot connection");
                client
            }
            None => {
                tracing::debug!(server = %key.server, workspace = %key.workspace, "opening depot connection");
                self.factory.connect(&key.config())?
            }
        };

        Ok(ConnectionLease {
            cache: self,
            key: key.clone(),
            client: Some(client),
        })
    }

    /// Close idle connections unused for at least `idle_timeout`; returns how
    /// many were closed. Borrowed connections are not in the pool and are
    /// never touched.
    pub fn garbage_collect(&self, idle_timeout: Duration) -> usize {
        let mut pools = self.lock();
        let mut closed = 0;
        pools.retain(|key, pool| {
            let before = pool.len();
            pool.retain(|idle| idle.last_used.elapsed() < idle_timeout);
            let dropped = before - pool.len();
            if dropped > 0 {
                tracing::debug!(server = %key.server, workspace = %key.workspace, dropped, "closed idle depot connections");
            }
            closed += dropped;
            !pool.is_empty()
        });
        closed
    }

    /// Number of idle (returnable) connections currently pooled.
    pub fn idle_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionKey, Vec<IdleConnection>>> {
        self.idle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_in(&self, key: ConnectionKey, client: Box<dyn DepotClient>) {
        self.lock().entry(key).or_default().push(IdleConnection {
            client,
            last_used: Instant::now(),
        });
    }
}

/// An exclusively borrowed depot connection. Returned to the pool on drop.
pub struct ConnectionLease<'a> {
    cache: &'a ConnectionCache,
    key: ConnectionKey,
    // Present from checkout until drop.
    client: Option<Box<dyn DepotClient>>,
}

impl Deref for ConnectionLease<'_> {
    type Target = dyn DepotClient;

    fn deref(&self) -> &Self::Target {
        self.client
            .as_deref()
            .expect("lease holds a client until drop")
    }
}

impl DerefMut for ConnectionLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
            .as_deref_mut()
            .expect("lease holds a client until drop")
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.cache.check_in(self.key.clone(), client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hollow_core::depot::memory::MemoryDepotFactory;

    fn cache() -> ConnectionCache {
        ConnectionCache::new(Arc::new(MemoryDepotFactory::new()))
    }

    fn key(workspace: &str) -> ConnectionKey {
        ConnectionKey {
            server: DepotServer::from("localhost:1666"),
            workspace: DepotWorkspace::from(workspace),
            user: DepotUser::from("alice"),
            identity: Identity::from("alice"),
        }
    }

    #[test]
    fn dropped_leases_return_to_the_pool() {
        let cache = cache();
        let lease = cache.checkout(&key("ws")).expect("checkout");
        assert_eq!(cache.idle_count(), 0);
        drop(lease);
        assert_eq!(cache.idle_count(), 1);

        // The pooled connection is handed back out, not duplicated.
        let _lease = cache.checkout(&key("ws")).expect("checkout");
        assert_eq!(cache.idle_count(), 0);
    }

    #[test]
    fn distinct_keys_pool_separately() {
        let cache = cache();
        let a = cache.checkout(&key("ws-a")).expect("checkout");
        let b = cache.checkout(&key("ws-b")).expect("checkout");
        drop(a);
        drop(b);
        assert_eq!(cache.idle_count(), 2);
        assert_eq!(cache.lock().len(), 2);
    }

    #[test]
    fn gc_closes_only_expired_idle_connections() {
        let cache = cache();
        drop(cache.checkout(&key("ws")).expect("checkout"));
        assert_eq!(cache.garbage_collect(Duration::from_secs(60)), 0);
        assert_eq!(cache.idle_count(), 1);
        assert_eq!(cache.garbage_collect(Duration::ZERO), 1);
        assert_eq!(cache.idle_count(), 0);
    }

    #[test]
    fn borrowed_connections_survive_gc() {
        let cache = cache();
        let lease = cache.checkout(&key("ws")).expect("checkout");
        assert_eq!(cache.garbage_collect(Duration::ZERO), 0);
        drop(lease);
        assert_eq!(cache.idle_count(), 1);
    }
}
