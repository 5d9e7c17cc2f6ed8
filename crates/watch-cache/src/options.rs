//! Cache construction options.

use crate::scope::RestMapper;
use crate::session::SessionFactory;
use kube::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default period after which every cached object is re-delivered.
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(10 * 60 * 60);

/// Default capacity of the consolidated event stream.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Options for [`NamespacedCache::new`](crate::NamespacedCache::new).
///
/// A client is required unless both a mapper and a session factory are
/// supplied. Unset fields are defaulted at construction.
#[derive(Clone, Default)]
pub struct CacheOptions {
    /// Cluster client used for discovery and watch sessions
    pub client: Option<Client>,
    /// Kind-to-scope mapper; defaults to a discovery snapshot
    pub mapper: Option<Arc<dyn RestMapper>>,
    /// Watch session engine; defaults to `KubeSessionFactory`
    pub session_factory: Option<Arc<dyn SessionFactory>>,
    /// Resync period of every session; defaults to [`DEFAULT_RESYNC`]
    pub resync: Option<Duration>,
    /// Event stream capacity; defaults to [`DEFAULT_EVENT_BUFFER`]
    pub event_buffer: Option<usize>,
    /// Root cancellation token for all sessions; defaults to a fresh token
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("client", &self.client.is_some())
            .field("mapper", &self.mapper.is_some())
            .field("session_factory", &self.session_factory.is_some())
            .field("resync", &self.resync)
            .field("event_buffer", &self.event_buffer)
            .finish_non_exhaustive()
    }
}

impl CacheOptions {
    /// Options around a cluster client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client: Some(client),
            ..Self::default()
        }
    }

    /// Sets the kind mapper
    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<dyn RestMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Sets the session engine
    #[must_use]
    pub fn with_session_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.session_factory = Some(factory);
        self
    }

    /// Sets the resync period
    #[must_use]
    pub fn with_resync(mut self, resync: Duration) -> Self {
        self.resync = Some(resync);
        self
    }

    /// Sets the event stream capacity
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Sets the root cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
