//! Namespaced watch cache
//!
//! Observe individual Kubernetes objects, identified by namespace and kind,
//! and receive their changes on one consolidated stream.
//!
//! The cache lazily creates one watch session per namespace (plus one for
//! cluster-scoped kinds), checks that namespaced objects carry a namespace,
//! deduplicates repeated registrations of the same object, and filters each
//! session's notifications down to the registered object names.
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kube::core::{ApiResource, DynamicObject};
//! use watch_cache::{CacheOptions, NamespacedCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let cache = NamespacedCache::new(CacheOptions::new(client)).await?;
//!
//! let config = DynamicObject::new("cc-config", &ApiResource::erase::<ConfigMap>(&()))
//!     .within("kube-system");
//! cache.watch(&config).await?;
//!
//! let events = cache.event_stream();
//! while let Some(change) = events.recv().await {
//!     println!("{} {:?}", change.kind, change.object.metadata.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod key;
pub mod kube_session;
pub mod options;
pub mod scope;
pub mod session;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;


pub use cache::NamespacedCache;
pub use error::WatchCacheError;
pub use event::{ChangeKind, ChangeNotification, EventStream, Payload, RawEvent};
pub use forwarder::{ChangeForwarder, Discard};
pub use key::WatchKey;
pub use kube_session::{KubeSession, KubeSessionFactory};
pub use options::{CacheOptions, DEFAULT_EVENT_BUFFER, DEFAULT_RESYNC};
pub use scope::{DiscoveryMapper, GroupKind, Mapping, RestMapper, ScopeResolver, StaticMapper};
pub use session::{EventHandler, Informer, SessionFactory, SessionPool, SessionScope, WatchSession};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockInformer, MockSession, MockSessionFactory};
