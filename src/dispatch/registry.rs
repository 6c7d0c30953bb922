//! Listener registry - per-event listener lists kept in priority order.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::event::is_lifecycle;
use super::listener::{Listener, ListenerId, NewListener, PluginHandle};

/// Maps event names to their listeners, lowest priority value first.
///
/// An event never maps to an empty list: the entry is dropped together with
/// its last listener.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<String, Vec<Listener>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a listener after every existing listener of equal or lower
    /// priority value.
    pub fn register(&mut self, mut new: NewListener) -> Listener {
        if is_lifecycle(&new.event) && new.filter.take().is_some() {
            warn!(
                event = %new.event,
                plugin = new.owner.name(),
                "Built-in listener can't be used with filters. Removing..."
            );
        }

        self.next_id += 1;
        let listener = Listener::from_parts(ListenerId(self.next_id), new);

        if listener.filter().is_some() {
            debug!(event = listener.event(), listener = listener.name(), "Registering filtered listener");
        }

        let list = self.listeners.entry(listener.event().to_string()).or_default();
        let at = list.partition_point(|l| l.priority() <= listener.priority());
        list.insert(at, listener.clone());

        listener
    }

    /// Remove one listener. Returns `false` when it was not registered.
    pub fn unregister(&mut self, listener: &Listener) -> bool {
        let Some(list) = self.listeners.get_mut(listener.event()) else {
            return false;
        };

        let before = list.len();
        list.retain(|l| l.id() != listener.id());
        let removed = list.len() != before;

        if list.is_empty() {
            self.listeners.remove(listener.event());
        }

        removed
    }

    /// Remove every listener owned by `owner`, returning how many went away.
    pub fn unregister_all(&mut self, owner: &PluginHandle) -> usize {
        let mut removed = 0;

        self.listeners.retain(|_, list| {
            let before = list.len();
            list.retain(|l| l.owner() != owner);
            removed += before - list.len();
            !list.is_empty()
        });

        removed
    }

    pub fn listeners(&self, event: &str) -> &[Listener] {
        self.listeners.get(event).map(Vec::as_slice).unwrap_or_default()
    }

    /// Copy of the listener list for `event`, or `None` if nobody listens.
    pub fn snapshot(&self, event: &str) -> Option<Vec<Listener>> {
        self.listeners
            .get(event)
            .filter(|list| !list.is_empty())
            .cloned()
    }

}
