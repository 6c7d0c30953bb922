//! Registered handlers and the plugins that own them.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use super::error::ListenerError;
use super::event::EventArgs;
use crate::filters::BoxedFilter;

/// Priority given to listeners that do not ask for one. Lower runs earlier.
pub const DEFAULT_PRIORITY: i32 = 100;

/// What a listener hands back to the dispatcher.
pub type ListenerResult = Result<Option<Value>, ListenerError>;

/// Type-erased listener callback.
pub type Handler = Arc<dyn Fn(EventArgs) -> BoxFuture<'static, ListenerResult> + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

/// Identity of the plugin that owns a set of listeners.
///
/// Two handles are equal only when they come from the same `new` call.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    id: PluginId,
    name: Arc<str>,
}

impl PluginHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: PluginId(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for PluginHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PluginHandle {}

impl Hash for PluginHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Registry-assigned listener id. Increases with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// A handler registered for one event.
///
/// Cloning is cheap; clones refer to the same registration.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    id: ListenerId,
    event: String,
    name: String,
    owner: PluginHandle,
    priority: i32,
    filter: Option<BoxedFilter>,
    handler: Handler,
}

impl Listener {
    pub(crate) fn from_parts(id: ListenerId, new: NewListener) -> Self {
        let name = new
            .name
            .unwrap_or_else(|| format!("{}.on_{}", new.owner.name(), new.event));

        Self {
            inner: Arc::new(ListenerInner {
                id,
                event: new.event,
                name,
                owner: new.owner,
                priority: new.priority,
                filter: new.filter,
                handler: new.handler,
            }),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.inner.id
    }

    pub fn event(&self) -> &str {
        &self.inner.event
    }

    /// Display name used in logs and alerts, `Plugin.on_event` by default.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> &PluginHandle {
        &self.inner.owner
    }

    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    pub fn filter(&self) -> Option<&BoxedFilter> {
        self.inner.filter.as_ref()
    }

    pub(crate) fn invoke(&self, args: EventArgs) -> BoxFuture<'static, ListenerResult> {
        (self.inner.handler)(args)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.inner.id)
            .field("event", &self.inner.event)
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("filtered", &self.inner.filter.is_some())
            .finish()
    }
}

/// A listener waiting to be registered.
pub struct NewListener {
    pub(crate) event: String,
    pub(crate) owner: PluginHandle,
    pub(crate) handler: Handler,
    pub(crate) priority: i32,
    pub(crate) filter: Option<BoxedFilter>,
    pub(crate) name: Option<String>,
}

impl NewListener {
    pub fn new<F, Fut>(event: impl Into<String>, owner: PluginHandle, f: F) -> Self
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        Self::with_handler(event, owner, handler_fn(f))
    }

    pub fn with_handler(event: impl Into<String>, owner: PluginHandle, handler: Handler) -> Self {
        Self {
            event: event.into(),
            owner,
            handler,
            priority: DEFAULT_PRIORITY,
            filter: None,
            name: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn filter(mut self, filter: BoxedFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
