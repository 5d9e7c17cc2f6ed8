//! In-memory watch sessions for unit testing
//!
//! `MockSessionFactory` implements `SessionFactory` without a cluster. Tests
//! seed objects the informers start out with, reach the sessions and
//! informers it created, and emit raw events through them by hand.
//! Construction and informer failures can be injected, and informers of a
//! scope can be made to never finish their initial listing.

use crate::error::WatchCacheError;
use crate::event::{Payload, RawEvent};
use crate::scope::{GroupKind, Mapping};
use crate::session::{EventHandler, Informer, SessionFactory, SessionScope, WatchSession};
use kube::core::DynamicObject;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consumes one pending injected failure, if any
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Scope an object lives in, judged by its namespace alone
fn scope_of(obj: &DynamicObject) -> SessionScope {
    match obj.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => SessionScope::Namespace(ns.to_string()),
        _ => SessionScope::Cluster,
    }
}

fn group_kind_of(obj: &DynamicObject) -> Option<GroupKind> {
    obj.types
        .as_ref()
        .map(|t| GroupKind::from_api_version(&t.api_version, &t.kind))
}

/// `namespace/name` of an object
fn object_key(obj: &DynamicObject) -> String {
    format!(
        "{}/{}",
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default()
    )
}

/// State shared between the factory and everything it creates
#[derive(Debug, Default)]
struct Shared {
    seeds: Mutex<Vec<DynamicObject>>,
    stalled: Mutex<HashSet<SessionScope>>,
    informer_failures: AtomicUsize,
}

/// Mock session factory for testing
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    sessions: Arc<Mutex<Vec<(SessionScope, Arc<MockSession>)>>>,
    create_failures: Arc<AtomicUsize>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSessionFactory")
            .field("created", &self.created_scopes())
            .finish_non_exhaustive()
    }
}

impl MockSessionFactory {
    /// Create a new mock factory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` session constructions fail
    pub fn fail_next_creates(&self, n: usize) {
        self.create_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` informer requests fail, across all sessions
    pub fn fail_next_informers(&self, n: usize) {
        self.shared.informer_failures.store(n, Ordering::SeqCst);
    }

    /// Make informer requests in `scope` wait forever, as if the initial
    /// listing never completed
    pub fn stall_informers_in(&self, scope: SessionScope) {
        locked(&self.shared.stalled).insert(scope);
    }

    /// Adds an object that informers of its kind and namespace start out with
    pub fn seed(&self, obj: DynamicObject) {
        locked(&self.shared.seeds).push(obj);
    }

    /// Number of sessions successfully created
    #[must_use]
    pub fn created_count(&self) -> usize {
        locked(&self.sessions).len()
    }

    /// Scopes of created sessions, in creation order
    #[must_use]
    pub fn created_scopes(&self) -> Vec<SessionScope> {
        locked(&self.sessions).iter().map(|(scope, _)| scope.clone()).collect()
    }

    /// Most recently created session for a scope
    #[must_use]
    pub fn session(&self, scope: &SessionScope) -> Option<Arc<MockSession>> {
        locked(&self.sessions)
            .iter()
            .rev()
            .find(|(s, _)| s == scope)
            .map(|(_, session)| Arc::clone(session))
    }
}

#[async_trait::async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(
        &self,
        scope: &SessionScope,
        resync: Duration,
    ) -> Result<Arc<dyn WatchSession>, WatchCacheError> {
        if take_failure(&self.create_failures) {
            return Err(WatchCacheError::Session(format!("mock: cannot create session for {}", scope)));
        }

        let session = Arc::new(MockSession {
            scope: scope.clone(),
            resync,
            cancel: Mutex::new(None),
            informers: Mutex::new(HashMap::new()),
            shared: Arc::clone(&self.shared),
        });
        locked(&self.sessions).push((scope.clone(), Arc::clone(&session)));
        Ok(session)
    }
}

/// Mock watch session
#[derive(Debug)]
pub struct MockSession {
    scope: SessionScope,
    resync: Duration,
    cancel: Mutex<Option<CancellationToken>>,
    informers: Mutex<HashMap<GroupKind, Arc<MockInformer>>>,
    shared: Arc<Shared>,
}

impl MockSession {
    /// Scope the session was created for
    #[must_use]
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Resync period the session was created with
    #[must_use]
    pub fn resync(&self) -> Duration {
        self.resync
    }

    /// Returns true once `start` was called
    #[must_use]
    pub fn is_started(&self) -> bool {
        locked(&self.cancel).is_some()
    }

    /// Returns true when the session's cancellation scope has ended
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        locked(&self.cancel).as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Informer previously requested for a kind
    #[must_use]
    pub fn informer(&self, gk: &GroupKind) -> Option<Arc<MockInformer>> {
        locked(&self.informers).get(gk).cloned()
    }

    /// Number of kinds with an informer
    #[must_use]
    pub fn informer_count(&self) -> usize {
        locked(&self.informers).len()
    }
}

#[async_trait::async_trait]
impl WatchSession for MockSession {
    fn start(&self, cancel: CancellationToken) {
        *locked(&self.cancel) = Some(cancel);
    }

    async fn informer(&self, mapping: &Mapping) -> Result<Arc<dyn Informer>, WatchCacheError> {
        if !self.is_started() {
            return Err(WatchCacheError::Session(format!("mock: session for {} not started", self.scope)));
        }
        if take_failure(&self.shared.informer_failures) {
            return Err(WatchCacheError::Session(format!(
                "mock: cannot start informer for {}",
                mapping.group_kind()
            )));
        }
        let stalled = locked(&self.shared.stalled).contains(&self.scope);
        if stalled {
            std::future::pending::<()>().await;
        }

        let gk = mapping.group_kind();
        let informer = Arc::clone(locked(&self.informers).entry(gk.clone()).or_insert_with(|| {
            let seeded = locked(&self.shared.seeds)
                .iter()
                .filter(|obj| scope_of(obj) == self.scope && group_kind_of(obj).as_ref() == Some(&gk))
                .cloned()
                .collect();
            Arc::new(MockInformer::new(self.scope.clone(), gk.clone(), seeded))
        }));
        Ok(informer)
    }
}

/// Mock informer that caches objects, records handlers and delivers emitted
/// events to them
pub struct MockInformer {
    scope: SessionScope,
    group_kind: GroupKind,
    objects: Mutex<BTreeMap<String, Arc<DynamicObject>>>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl std::fmt::Debug for MockInformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInformer")
            .field("scope", &self.scope)
            .field("group_kind", &self.group_kind)
            .field("objects", &self.object_count())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl MockInformer {
    fn new(scope: SessionScope, group_kind: GroupKind, seeded: Vec<DynamicObject>) -> Self {
        let objects = seeded
            .into_iter()
            .map(|obj| (object_key(&obj), Arc::new(obj)))
            .collect();
        Self {
            scope,
            group_kind,
            objects: Mutex::new(objects),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Kind the informer serves
    #[must_use]
    pub fn group_kind(&self) -> &GroupKind {
        &self.group_kind
    }

    /// Number of attached handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        locked(&self.handlers).len()
    }

    /// Number of cached objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        locked(&self.objects).len()
    }

    /// Applies an event to the cached objects and delivers it to every
    /// attached handler, in attach order
    pub async fn emit(&self, event: RawEvent) {
        if let Some(Payload::Object(obj)) = event.payload() {
            let mut objects = locked(&self.objects);
            match &event {
                RawEvent::Deleted(_) => {
                    objects.remove(&object_key(obj));
                }
                RawEvent::Added(_) | RawEvent::Updated { .. } => {
                    objects.insert(object_key(obj), Arc::clone(obj));
                }
            }
        }

        let handlers: Vec<_> = locked(&self.handlers).clone();
        for handler in handlers {
            handler.handle(event.clone()).await;
        }
    }
}

#[async_trait::async_trait]
impl Informer for MockInformer {
    async fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        let cached: Vec<_> = locked(&self.objects).values().cloned().collect();
        for obj in cached {
            handler.handle(RawEvent::added(obj)).await;
        }
        locked(&self.handlers).push(handler);
    }
}
