//! Namespaced watch cache.
//!
//! Entry point of the crate. Callers register individual objects with
//! [`NamespacedCache::watch`] and drain one consolidated [`EventStream`],
//! without knowing how many sessions or discovery lookups that takes.

use crate::error::WatchCacheError;
use crate::event::{ChangeNotification, EventStream};
use crate::forwarder::ChangeForwarder;
use crate::key::WatchKey;
use crate::kube_session::KubeSessionFactory;
use crate::options::{CacheOptions, DEFAULT_EVENT_BUFFER, DEFAULT_RESYNC};
use crate::scope::{DiscoveryMapper, RestMapper, ScopeResolver};
use crate::session::{SessionFactory, SessionPool, SessionScope};
use kube::core::DynamicObject;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type PendingWatch = Arc<Mutex<()>>;

/// Registered watches, plus per-key locks for registrations in flight.
///
/// The registry lock is only held for map lookups and inserts. The slow part
/// of a registration (session construction, initial listing) runs under the
/// key's own pending lock, so identical calls are serialized while calls for
/// other objects proceed.
#[derive(Default)]
struct Registry {
    watched: HashMap<SessionScope, HashSet<WatchKey>>,
    pending: HashMap<(SessionScope, WatchKey), PendingWatch>,
}

impl Registry {
    fn is_watched(&self, scope: &SessionScope, key: &WatchKey) -> bool {
        self.watched.get(scope).is_some_and(|keys| keys.contains(key))
    }
}

/// Per-namespace cache of watch sessions multiplexed onto one event stream.
///
/// Registrations only grow: there is no unwatch, and sessions live until the
/// root cancellation token is cancelled.
pub struct NamespacedCache {
    resolver: ScopeResolver,
    pool: SessionPool,
    registry: Mutex<Registry>,
    events_tx: mpsc::Sender<ChangeNotification>,
    events: EventStream,
    cancel: CancellationToken,
}

impl fmt::Debug for NamespacedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespacedCache")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl NamespacedCache {
    /// Creates a cache, running discovery when no mapper is supplied.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when neither a client nor both collaborators are set,
    /// or when the resync period or event buffer is zero; `Discovery` when the
    /// default mapper cannot be built.
    pub async fn new(opts: CacheOptions) -> Result<Self, WatchCacheError> {
        let CacheOptions {
            client,
            mapper,
            session_factory,
            resync,
            event_buffer,
            cancel,
        } = opts;

        let client_required = || WatchCacheError::InvalidArgument("client is required".to_string());
        if client.is_none() && (mapper.is_none() || session_factory.is_none()) {
            return Err(client_required());
        }

        let resync = resync.unwrap_or(DEFAULT_RESYNC);
        if resync.is_zero() {
            return Err(WatchCacheError::InvalidArgument("resync period must be non-zero".to_string()));
        }
        let capacity = event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER);
        if capacity == 0 {
            return Err(WatchCacheError::InvalidArgument("event buffer must be non-zero".to_string()));
        }

        let mapper: Arc<dyn RestMapper> = match (mapper, &client) {
            (Some(mapper), _) => mapper,
            (None, Some(client)) => Arc::new(DiscoveryMapper::discover(client.clone()).await?),
            (None, None) => return Err(client_required()),
        };
        let factory: Arc<dyn SessionFactory> = match (session_factory, client) {
            (Some(factory), _) => factory,
            (None, Some(client)) => Arc::new(KubeSessionFactory::new(client)),
            (None, None) => return Err(client_required()),
        };
        let cancel = cancel.unwrap_or_default();

        let (events_tx, events_rx) = mpsc::channel(capacity);
        info!("Namespaced watch cache ready (resync {:?}, event buffer {})", resync, capacity);

        Ok(Self {
            resolver: ScopeResolver::new(mapper),
            pool: SessionPool::new(factory, resync, cancel.clone()),
            registry: Mutex::new(Registry::default()),
            events_tx,
            events: EventStream::new(events_rx),
            cancel,
        })
    }

    /// Registers a watch for one object. Idempotent.
    ///
    /// Creates the session for the object's namespace (or the cluster session
    /// for cluster-scoped kinds) on first use, waits for the kind's initial
    /// listing, and attaches a forwarder for the object's name. The watch is
    /// only recorded once all of that succeeded, so a failed call can be
    /// retried.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a namespaced object without namespace or an object
    /// without name, `Discovery` when the kind cannot be resolved, `Session`
    /// when the session or informer cannot be obtained.
    pub async fn watch(&self, obj: &DynamicObject) -> Result<(), WatchCacheError> {
        let mapping = self.resolver.mapping_for(obj)?;
        let scope = self.resolver.session_scope(obj, &mapping)?;
        let key = WatchKey::for_object(&self.resolver, obj)?;
        let name = match obj.metadata.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(WatchCacheError::InvalidArgument(format!(
                    "{} object in {} must set its name",
                    mapping.group_kind(),
                    scope
                )))
            }
        };

        let pending = {
            let mut registry = self.registry.lock().await;
            if registry.is_watched(&scope, &key) {
                debug!("{} in {} is already watched", key, scope);
                return Ok(());
            }
            Arc::clone(registry.pending.entry((scope.clone(), key.clone())).or_default())
        };

        let _in_flight = pending.lock().await;
        if self.registry.lock().await.is_watched(&scope, &key) {
            debug!("{} in {} was registered concurrently", key, scope);
            return Ok(());
        }

        let session = self.pool.session_for(&scope).await?;
        let informer = session.informer(&mapping).await?;
        informer
            .add_handler(Arc::new(ChangeForwarder::new(name, self.events_tx.clone())))
            .await;

        info!("Watching {} in {}", key, scope);
        let mut registry = self.registry.lock().await;
        registry.pending.remove(&(scope.clone(), key.clone()));
        registry.watched.entry(scope).or_default().insert(key);
        Ok(())
    }

    /// Returns true when a watch is registered for the object
    ///
    /// # Errors
    ///
    /// Same resolution errors as [`NamespacedCache::watch`].
    pub async fn is_watched(&self, obj: &DynamicObject) -> Result<bool, WatchCacheError> {
        let mapping = self.resolver.mapping_for(obj)?;
        let scope = self.resolver.session_scope(obj, &mapping)?;
        let key = WatchKey::for_object(&self.resolver, obj)?;
        Ok(self.registry.lock().await.is_watched(&scope, &key))
    }

    /// Number of registered watches across all scopes
    pub async fn watch_count(&self) -> usize {
        self.registry.lock().await.watched.values().map(HashSet::len).sum()
    }

    /// The consolidated change stream. Always the same stream.
    #[must_use]
    pub fn event_stream(&self) -> EventStream {
        self.events.clone()
    }

    /// Stops every session. Registrations are kept but deliver nothing further.
    pub fn shutdown(&self) {
        info!("Shutting down namespaced watch cache");
        self.cancel.cancel();
    }
}
