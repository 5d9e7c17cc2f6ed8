//! Watch sessions and the per-namespace session pool.
//!
//! A watch session is a running subscription-plus-local-cache engine bound to
//! one namespace (or to cluster scope). The pool creates one session per
//! scope on first use, starts it, and memoizes it for the life of the process.

use crate::error::WatchCacheError;
use crate::event::RawEvent;
use crate::scope::Mapping;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Partition a watch session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionScope {
    /// Cluster-wide session, only used for cluster-scoped kinds
    Cluster,
    /// Session bound to a single namespace
    Namespace(String),
}

impl SessionScope {
    /// Namespace filter of the scope, `None` for cluster scope
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Cluster => None,
            Self::Namespace(ns) => Some(ns),
        }
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("<cluster>"),
            Self::Namespace(ns) => f.write_str(ns),
        }
    }
}

/// Receives raw notifications from an informer.
///
/// Handlers are called sequentially from the informer's task, so a slow
/// handler delays later events of the same kind.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one notification
    async fn handle(&self, event: RawEvent);
}

/// Per-kind event source within a session.
#[async_trait::async_trait]
pub trait Informer: fmt::Debug + Send + Sync {
    /// Attach a handler. Objects already cached are delivered to it as adds
    /// before any later event.
    async fn add_handler(&self, handler: Arc<dyn EventHandler>);
}

/// A running watch-and-cache engine bound to one scope.
#[async_trait::async_trait]
pub trait WatchSession: fmt::Debug + Send + Sync {
    /// Begin background synchronization under `cancel`. Does not block.
    fn start(&self, cancel: CancellationToken);

    /// Informer for a kind, waiting until its initial listing completes
    async fn informer(&self, mapping: &Mapping) -> Result<Arc<dyn Informer>, WatchCacheError>;
}

/// Constructs watch sessions.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Build a session bound to `scope` that resyncs every `resync`
    async fn create(
        &self,
        scope: &SessionScope,
        resync: Duration,
    ) -> Result<Arc<dyn WatchSession>, WatchCacheError>;
}

type SessionSlot = Arc<OnceCell<Arc<dyn WatchSession>>>;

/// Lazily created, memoized sessions keyed by scope.
///
/// Each scope is initialized independently: a slow or failing construction
/// only holds up callers asking for that same scope.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    resync: Duration,
    cancel: CancellationToken,
    sessions: Mutex<HashMap<SessionScope, SessionSlot>>,
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("resync", &self.resync)
            .field("scopes", &self.scopes())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Creates an empty pool. Sessions run under children of `cancel`.
    pub fn new(factory: Arc<dyn SessionFactory>, resync: Duration, cancel: CancellationToken) -> Self {
        Self {
            factory,
            resync,
            cancel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionScope, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session for a scope, creating and starting it on first use.
    ///
    /// Concurrent callers for the same scope share one construction. A failed
    /// construction is not memoized; the next call retries.
    pub async fn session_for(&self, scope: &SessionScope) -> Result<Arc<dyn WatchSession>, WatchCacheError> {
        let slot = Arc::clone(self.slots().entry(scope.clone()).or_default());

        let session = slot
            .get_or_try_init(|| async {
                if self.cancel.is_cancelled() {
                    return Err(WatchCacheError::Session(format!(
                        "cannot create watch session for {}: cache is shut down",
                        scope
                    )));
                }

                debug!("Creating watch session for {}", scope);
                let session = self.factory.create(scope, self.resync).await.map_err(|e| {
                    warn!("Failed to create watch session for {}: {}", scope, e);
                    e
                })?;
                session.start(self.cancel.child_token());
                info!("Started watch session for {} (resync {:?})", scope, self.resync);
                Ok(session)
            })
            .await?;
        Ok(Arc::clone(session))
    }

    /// Returns true when a session exists for the scope
    #[must_use]
    pub fn contains(&self, scope: &SessionScope) -> bool {
        self.slots().get(scope).is_some_and(|slot| slot.initialized())
    }

    /// Scopes with a running session
    #[must_use]
    pub fn scopes(&self) -> Vec<SessionScope> {
        let mut scopes: Vec<_> = self
            .slots()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(scope, _)| scope.clone())
            .collect();
        scopes.sort();
        scopes
    }

    /// Number of running sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().values().filter(|slot| slot.initialized()).count()
    }

    /// Returns true when no session was created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool-wide resync period
    #[must_use]
    pub fn resync(&self) -> Duration {
        self.resync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSessionFactory;

    fn pool(factory: &MockSessionFactory) -> SessionPool {
        SessionPool::new(
            Arc::new(factory.clone()),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_session_is_memoized() {
        let factory = MockSessionFactory::new();
        let pool = pool(&factory);
        let scope = SessionScope::Namespace("kube-system".to_string());

        let first = pool.session_for(&scope).await.unwrap();
        let second = pool.session_for(&scope).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_construction() {
        let factory = MockSessionFactory::new();
        let pool = Arc::new(pool(&factory));
        let scope = SessionScope::Namespace("kube-system".to_string());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let scope = scope.clone();
                tokio::spawn(async move { pool.session_for(&scope).await.map(|_| ()) })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(factory.created_count(), 1);
        assert_eq!(pool.scopes(), vec![scope]);
    }

    #[tokio::test]
    async fn test_session_started_with_pool_resync() {
        let factory = MockSessionFactory::new();
        let pool = pool(&factory);
        let scope = SessionScope::Namespace("default".to_string());

        pool.session_for(&scope).await.unwrap();

        let session = factory.session(&scope).unwrap();
        assert!(session.is_started());
        assert_eq!(session.resync(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cluster_scope_is_separate_entry() {
        let factory = MockSessionFactory::new();
        let pool = pool(&factory);

        pool.session_for(&SessionScope::Cluster).await.unwrap();
        pool.session_for(&SessionScope::Namespace("default".to_string())).await.unwrap();

        assert_eq!(factory.created_count(), 2);
        assert!(pool.contains(&SessionScope::Cluster));
        assert_eq!(factory.created_scopes(), vec![
            SessionScope::Cluster,
            SessionScope::Namespace("default".to_string()),
        ]);
    }

    #[tokio::test]
    async fn test_failed_construction_is_not_memoized() {
        let factory = MockSessionFactory::new();
        factory.fail_next_creates(1);
        let pool = pool(&factory);
        let scope = SessionScope::Namespace("default".to_string());

        let err = pool.session_for(&scope).await.unwrap_err();
        assert!(err.is_session());
        assert!(!pool.contains(&scope));

        pool.session_for(&scope).await.unwrap();
        assert!(pool.contains(&scope));
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_other_sessions() {
        let factory = MockSessionFactory::new();
        let pool = pool(&factory);
        let healthy = SessionScope::Namespace("healthy".to_string());
        pool.session_for(&healthy).await.unwrap();

        factory.fail_next_creates(1);
        assert!(pool.session_for(&SessionScope::Namespace("broken".to_string())).await.is_err());

        let session = factory.session(&healthy).unwrap();
        assert!(!session.is_cancelled());
        assert!(pool.contains(&healthy));
    }

    #[tokio::test]
    async fn test_sessions_stop_with_pool_token() {
        let factory = MockSessionFactory::new();
        let cancel = CancellationToken::new();
        let pool = SessionPool::new(Arc::new(factory.clone()), Duration::from_secs(30), cancel.clone());
        let scope = SessionScope::Namespace("default".to_string());
        pool.session_for(&scope).await.unwrap();

        cancel.cancel();

        assert!(factory.session(&scope).unwrap().is_cancelled());
        let err = pool.session_for(&SessionScope::Cluster).await.unwrap_err();
        assert!(err.is_session());
    }
}
