//! Watch sessions backed by `kube_runtime`.
//!
//! Each kind requested from a session gets an informer: a tokio task driving
//! a `watcher` stream into a reflector store and dispatching add/update/delete
//! notifications to the attached handlers. Reconnection and backoff come from
//! `kube_runtime`; periodic resync re-delivers every cached object as an
//! update.

use crate::error::WatchCacheError;
use crate::event::RawEvent;
use crate::scope::{GroupKind, Mapping};
use crate::session::{EventHandler, Informer, SessionFactory, SessionScope, WatchSession};
use futures::StreamExt;
use kube::core::{ApiResource, DynamicObject};
use kube::{Api, Client};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Creates `KubeSession`s sharing one client.
#[derive(Clone)]
pub struct KubeSessionFactory {
    client: Client,
}

impl KubeSessionFactory {
    /// Creates a factory
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for KubeSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSessionFactory").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl SessionFactory for KubeSessionFactory {
    async fn create(
        &self,
        scope: &SessionScope,
        resync: Duration,
    ) -> Result<Arc<dyn WatchSession>, WatchCacheError> {
        // Fail at construction rather than on the first informer when the API server is unreachable
        let version = self.client.apiserver_version().await.map_err(|e| {
            WatchCacheError::Session(format!("cannot reach API server for {} session: {}", scope, e))
        })?;
        debug!(
            "API server v{}.{} reachable for {} session",
            version.major, version.minor, scope
        );

        Ok(Arc::new(KubeSession::new(self.client.clone(), scope.clone(), resync)))
    }
}

/// Watch session bound to one namespace or to cluster scope.
pub struct KubeSession {
    client: Client,
    scope: SessionScope,
    resync: Duration,
    cancel: OnceLock<CancellationToken>,
    informers: Mutex<HashMap<GroupKind, Arc<KubeInformer>>>,
}

impl fmt::Debug for KubeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSession")
            .field("scope", &self.scope)
            .field("resync", &self.resync)
            .finish_non_exhaustive()
    }
}

impl KubeSession {
    /// Creates a session; nothing runs until [`WatchSession::start`]
    pub fn new(client: Client, scope: SessionScope, resync: Duration) -> Self {
        Self {
            client,
            scope,
            resync,
            cancel: OnceLock::new(),
            informers: Mutex::new(HashMap::new()),
        }
    }

    fn api_for(&self, mapping: &Mapping) -> Result<Api<DynamicObject>, WatchCacheError> {
        match (&self.scope, mapping.is_namespaced()) {
            (SessionScope::Namespace(ns), true) => {
                Ok(Api::namespaced_with(self.client.clone(), ns, &mapping.resource))
            }
            (SessionScope::Cluster, false) => Ok(Api::all_with(self.client.clone(), &mapping.resource)),
            (SessionScope::Namespace(ns), false) => Err(WatchCacheError::Session(format!(
                "cluster-scoped {} cannot be watched from the {} namespace session",
                mapping.group_kind(),
                ns
            ))),
            (SessionScope::Cluster, true) => Err(WatchCacheError::Session(format!(
                "namespaced {} cannot be watched from the cluster session",
                mapping.group_kind()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl WatchSession for KubeSession {
    fn start(&self, cancel: CancellationToken) {
        if self.cancel.set(cancel).is_err() {
            warn!("Watch session for {} already started", self.scope);
        } else {
            debug!("Watch session for {} started", self.scope);
        }
    }

    async fn informer(&self, mapping: &Mapping) -> Result<Arc<dyn Informer>, WatchCacheError> {
        let cancel = self.cancel.get().cloned().ok_or_else(|| {
            WatchCacheError::Session(format!("watch session for {} was not started", self.scope))
        })?;

        let gk = mapping.group_kind();
        let informer = {
            let mut informers = self.informers.lock().await;
            match informers.get(&gk) {
                Some(informer) => Arc::clone(informer),
                None => {
                    let api = self.api_for(mapping)?;
                    let name = format!("{} in {}", gk, self.scope);
                    let informer = KubeInformer::spawn(api, mapping.resource.clone(), self.resync, cancel.clone(), name);
                    informers.insert(gk.clone(), Arc::clone(&informer));
                    informer
                }
            }
        };

        if let Err(e) = informer.wait_ready(&cancel).await {
            // A stopped informer never becomes ready; let the next request start a fresh one
            forget_informer(&mut *self.informers.lock().await, &gk, &informer);
            return Err(e);
        }
        Ok(informer)
    }
}

/// Removes `informer` from the map unless it was already replaced
fn forget_informer(
    informers: &mut HashMap<GroupKind, Arc<KubeInformer>>,
    gk: &GroupKind,
    informer: &Arc<KubeInformer>,
) {
    if informers.get(gk).is_some_and(|current| Arc::ptr_eq(current, informer)) {
        debug!("Forgetting informer for {}", informer.name);
        informers.remove(gk);
    }
}

/// Handle on a running informer task.
struct KubeInformer {
    name: String,
    reader: Store<DynamicObject>,
    handlers: mpsc::UnboundedSender<Arc<dyn EventHandler>>,
}

impl KubeInformer {
    fn spawn(
        api: Api<DynamicObject>,
        resource: ApiResource,
        resync: Duration,
        cancel: CancellationToken,
        name: String,
    ) -> Arc<Self> {
        let task = InformerTask::new(name.clone(), resource);
        let reader = task.reader.clone();
        let (handlers, handler_rx) = mpsc::unbounded_channel();
        tokio::spawn(task.run(api, handler_rx, resync, cancel));

        Arc::new(Self { name, reader, handlers })
    }

    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), WatchCacheError> {
        tokio::select! {
            ready = self.reader.wait_until_ready() => ready.map_err(|e| {
                WatchCacheError::Session(format!(
                    "informer for {} stopped before its initial listing completed: {}",
                    self.name, e
                ))
            }),
            () = cancel.cancelled() => Err(WatchCacheError::Session(format!(
                "watch session cancelled while waiting for {}",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for KubeInformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeInformer")
            .field("name", &self.name)
            .field("cached", &self.reader.state().len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Informer for KubeInformer {
    async fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        // Handlers are registered by the informer task so that the replay of
        // cached objects is ordered before any later live event.
        if self.handlers.send(handler).is_err() {
            warn!("Informer for {} has stopped; new handler will receive no events", self.name);
        }
    }
}

/// State of an in-progress (re)list.
struct Relist {
    previous: Vec<Arc<DynamicObject>>,
    listed: Vec<Arc<DynamicObject>>,
}

enum Step {
    Stop,
    Skip,
    AddHandler(Arc<dyn EventHandler>),
    Dispatch(Vec<RawEvent>),
}

struct InformerTask {
    name: String,
    resource: ApiResource,
    writer: Writer<DynamicObject>,
    reader: Store<DynamicObject>,
    handlers: Vec<Arc<dyn EventHandler>>,
    relist: Option<Relist>,
}

impl InformerTask {
    fn new(name: String, resource: ApiResource) -> Self {
        let writer = Writer::new(resource.clone());
        let reader = writer.as_reader();
        Self {
            name,
            resource,
            writer,
            reader,
            handlers: Vec::new(),
            relist: None,
        }
    }

    async fn run(
        mut self,
        api: Api<DynamicObject>,
        mut handler_rx: mpsc::UnboundedReceiver<Arc<dyn EventHandler>>,
        resync: Duration,
        cancel: CancellationToken,
    ) {
        info!("Starting informer for {}", self.name);

        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        let mut resync_timer = tokio::time::interval_at(Instant::now() + resync, resync);

        loop {
            let step = tokio::select! {
                () = cancel.cancelled() => Step::Stop,
                Some(handler) = handler_rx.recv() => Step::AddHandler(handler),
                _ = resync_timer.tick() => Step::Dispatch(self.resync_events()),
                event = stream.next() => match event {
                    Some(Ok(event)) => Step::Dispatch(self.apply(event)),
                    Some(Err(e)) => {
                        warn!("Watch error for {}: {}", self.name, e);
                        Step::Skip
                    }
                    None => Step::Stop,
                },
            };

            let delivered = match step {
                Step::Stop => break,
                Step::Skip => true,
                Step::AddHandler(handler) => self.attach(handler, &cancel).await,
                Step::Dispatch(events) => dispatch(&self.handlers, events, &cancel).await,
            };
            if !delivered {
                break;
            }
        }

        info!("Informer for {} stopped", self.name);
    }

    /// Replays the cached objects to a new handler as adds, then attaches it
    async fn attach(&mut self, handler: Arc<dyn EventHandler>, cancel: &CancellationToken) -> bool {
        let replay: Vec<RawEvent> = self.reader.state().into_iter().map(RawEvent::added).collect();
        debug!("Attaching handler to {} (replaying {} cached objects)", self.name, replay.len());
        let delivered = dispatch(std::slice::from_ref(&handler), replay, cancel).await;
        self.handlers.push(handler);
        delivered
    }

    fn object_ref(&self, obj: &DynamicObject) -> ObjectRef<DynamicObject> {
        ObjectRef::from_obj_with(obj, self.resource.clone())
    }

    /// Applies a watcher event to the store and derives the notifications it implies
    fn apply(&mut self, event: watcher::Event<DynamicObject>) -> Vec<RawEvent> {
        match &event {
            watcher::Event::Apply(obj) => {
                let key = self.object_ref(obj);
                let old = self.reader.get(&key);
                self.writer.apply_watcher_event(&event);
                let new = self.reader.get(&key).unwrap_or_else(|| Arc::new(obj.clone()));
                match old {
                    Some(old) => vec![RawEvent::updated(old, new)],
                    None => vec![RawEvent::added(new)],
                }
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                vec![RawEvent::deleted(Arc::new(obj.clone()))]
            }
            watcher::Event::Init => {
                self.relist = Some(Relist {
                    previous: self.reader.state(),
                    listed: Vec::new(),
                });
                self.writer.apply_watcher_event(&event);
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.writer.apply_watcher_event(&event);
                if let Some(relist) = self.relist.as_mut() {
                    relist.listed.push(Arc::new(obj.clone()));
                }
                Vec::new()
            }
            watcher::Event::InitDone => {
                self.writer.apply_watcher_event(&event);
                match self.relist.take() {
                    Some(relist) => self.relist_events(relist),
                    None => Vec::new(),
                }
            }
        }
    }

    /// Diffs a completed listing against the store contents before it
    fn relist_events(&self, relist: Relist) -> Vec<RawEvent> {
        let mut previous: HashMap<ObjectRef<DynamicObject>, Arc<DynamicObject>> = relist
            .previous
            .into_iter()
            .map(|obj| (self.object_ref(&obj), obj))
            .collect();

        let mut events = Vec::with_capacity(relist.listed.len() + previous.len());
        for obj in relist.listed {
            match previous.remove(&self.object_ref(&obj)) {
                Some(old) => events.push(RawEvent::updated(old, obj)),
                None => events.push(RawEvent::added(obj)),
            }
        }
        events.extend(previous.into_values().map(RawEvent::deleted));

        debug!("Listing of {} complete: {} objects", self.name, self.reader.state().len());
        events
    }

    fn resync_events(&self) -> Vec<RawEvent> {
        let state = self.reader.state();
        if !state.is_empty() {
            debug!("Resyncing {} cached objects of {}", state.len(), self.name);
        }
        state
            .into_iter()
            .map(|obj| RawEvent::updated(Arc::clone(&obj), obj))
            .collect()
    }
}

/// Delivers events to handlers in order; returns false if cancelled first
async fn dispatch(handlers: &[Arc<dyn EventHandler>], events: Vec<RawEvent>, cancel: &CancellationToken) -> bool {
    if handlers.is_empty() || events.is_empty() {
        return true;
    }

    let delivery = async {
        for event in events {
            for handler in handlers {
                handler.handle(event.clone()).await;
            }
        }
    };

    tokio::select! {
        () = delivery => true,
        () = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeKind, Payload};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::sync::Mutex as StdMutex;

    fn resource() -> ApiResource {
        ApiResource::erase::<ConfigMap>(&())
    }

    fn task() -> InformerTask {
        InformerTask::new("ConfigMap in default".to_string(), resource())
    }

    fn config_map(name: &str, value: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &resource()).within("default");
        obj.data = serde_json::json!({ "data": { "value": value } });
        obj
    }

    fn describe(event: &RawEvent) -> (ChangeKind, String) {
        let name = match event.payload() {
            Some(Payload::Object(obj)) => obj.metadata.name.clone().unwrap_or_default(),
            _ => String::new(),
        };
        (event.kind(), name)
    }

    fn sorted(events: &[RawEvent]) -> Vec<(ChangeKind, String)> {
        let mut described: Vec<_> = events.iter().map(describe).collect();
        described.sort_by(|a, b| a.1.cmp(&b.1));
        described
    }

    fn list(task: &mut InformerTask, objects: Vec<DynamicObject>) -> Vec<RawEvent> {
        let mut events = task.apply(watcher::Event::Init);
        for obj in objects {
            events.extend(task.apply(watcher::Event::InitApply(obj)));
        }
        events.extend(task.apply(watcher::Event::InitDone));
        events
    }

    #[derive(Debug, Default)]
    struct Recorder {
        seen: StdMutex<Vec<(ChangeKind, String)>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: RawEvent) {
            self.seen.lock().unwrap().push(describe(&event));
        }
    }

    #[test]
    fn test_initial_listing_adds_every_object() {
        let mut task = task();
        let events = list(&mut task, vec![config_map("a", "1"), config_map("b", "1")]);

        assert_eq!(
            sorted(&events),
            vec![(ChangeKind::Added, "a".to_string()), (ChangeKind::Added, "b".to_string())]
        );
        assert_eq!(task.reader.state().len(), 2);
    }

    #[test]
    fn test_apply_distinguishes_add_from_update() {
        let mut task = task();
        list(&mut task, vec![config_map("a", "1")]);

        let events = task.apply(watcher::Event::Apply(config_map("a", "2")));
        assert_eq!(events.len(), 1);
        match &events[0] {
            RawEvent::Updated {
                old: Some(Payload::Object(old)),
                new: Some(Payload::Object(new)),
            } => {
                assert_eq!(old.data["data"]["value"], "1");
                assert_eq!(new.data["data"]["value"], "2");
            }
            other => panic!("expected an update, got {:?}", other),
        }

        let events = task.apply(watcher::Event::Apply(config_map("c", "1")));
        assert_eq!(sorted(&events), vec![(ChangeKind::Added, "c".to_string())]);
    }

    #[test]
    fn test_delete_removes_from_store() {
        let mut task = task();
        list(&mut task, vec![config_map("a", "1"), config_map("b", "1")]);

        let events = task.apply(watcher::Event::Delete(config_map("b", "1")));

        assert_eq!(sorted(&events), vec![(ChangeKind::Deleted, "b".to_string())]);
        assert_eq!(task.reader.state().len(), 1);
    }

    #[test]
    fn test_relist_diffs_against_previous_contents() {
        let mut task = task();
        list(&mut task, vec![config_map("a", "1"), config_map("b", "1")]);
        task.apply(watcher::Event::Apply(config_map("c", "1")));

        let events = list(&mut task, vec![config_map("a", "2")]);

        assert_eq!(
            sorted(&events),
            vec![
                (ChangeKind::Updated, "a".to_string()),
                (ChangeKind::Deleted, "b".to_string()),
                (ChangeKind::Deleted, "c".to_string()),
            ]
        );
        assert_eq!(task.reader.state().len(), 1);
    }

    #[test]
    fn test_resync_redelivers_cache_as_updates() {
        let mut task = task();
        assert!(task.resync_events().is_empty());

        list(&mut task, vec![config_map("a", "1"), config_map("b", "1")]);
        let events = task.resync_events();

        assert_eq!(
            sorted(&events),
            vec![(ChangeKind::Updated, "a".to_string()), (ChangeKind::Updated, "b".to_string())]
        );
        for event in &events {
            match event {
                RawEvent::Updated {
                    old: Some(Payload::Object(old)),
                    new: Some(Payload::Object(new)),
                } => assert!(Arc::ptr_eq(old, new)),
                other => panic!("expected an update, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_attach_replays_cache_before_live_events() {
        let mut task = task();
        let cancel = CancellationToken::new();
        list(&mut task, vec![config_map("a", "1"), config_map("b", "1")]);

        let recorder = Arc::new(Recorder::default());
        assert!(task.attach(recorder.clone(), &cancel).await);
        assert_eq!(task.handlers.len(), 1);

        let live = task.apply(watcher::Event::Apply(config_map("a", "2")));
        assert!(dispatch(&task.handlers, live, &cancel).await);

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        let mut replayed = seen[..2].to_vec();
        replayed.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            replayed,
            vec![(ChangeKind::Added, "a".to_string()), (ChangeKind::Added, "b".to_string())]
        );
        assert_eq!(seen[2], (ChangeKind::Updated, "a".to_string()));
    }

    #[tokio::test]
    async fn test_stopped_informer_is_not_ready_and_is_forgotten() {
        let writer: Writer<DynamicObject> = Writer::new(resource());
        let reader = writer.as_reader();
        drop(writer);
        let (handlers, _handler_rx) = mpsc::unbounded_channel();
        let informer = Arc::new(KubeInformer {
            name: "ConfigMap in default".to_string(),
            reader,
            handlers,
        });

        let err = informer.wait_ready(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_session());

        let gk = GroupKind::new("", "ConfigMap");
        let mut informers = HashMap::new();
        informers.insert(gk.clone(), Arc::clone(&informer));

        let (other_handlers, _other_rx) = mpsc::unbounded_channel();
        let replacement = Arc::new(KubeInformer {
            name: "ConfigMap in default".to_string(),
            reader: Writer::<DynamicObject>::new(resource()).as_reader(),
            handlers: other_handlers,
        });
        forget_informer(&mut informers, &gk, &replacement);
        assert!(informers.contains_key(&gk));

        forget_informer(&mut informers, &gk, &informer);
        assert!(informers.is_empty());
    }
}
