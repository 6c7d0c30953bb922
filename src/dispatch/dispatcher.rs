//! Event dispatcher.
//!
//! [`EventDispatcher::dispatch`] runs the listeners of one event strictly in
//! priority order:
//!
//! 1. Events with no listeners resolve to `None` without touching metrics
//! 2. A listener with a filter only runs when the filter accepts the first
//!    Telegram event among the positional arguments; captures are written
//!    onto that argument before the listener runs
//! 3. `Skip` moves on, `StopPropagation` ends the dispatch, any other error is
//!    counted, logged, and forwarded to the alert sink
//!
//! Nothing a listener returns or panics with escapes `dispatch`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use teloxide::Bot;
use teloxide::types::ChatId;
use tracing::{debug, error, trace, warn};

use super::alert::AlertSink;
use super::error::{DispatchError, ListenerError, ListenerPanic};
use super::event::{self, EventArgs};
use super::listener::{Listener, NewListener, PluginHandle};
use super::metrics::Metrics;
use super::registry::ListenerRegistry;
use crate::filters::FilterOutcome;

/// Dispatcher settings, built from the application config.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Label on the unhandled-error counter.
    pub fault_category: String,

    /// Forward listener faults to the alert sink.
    pub forward_alerts: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fault_category: "command".to_string(),
            forward_alerts: true,
        }
    }
}

/// Routes named events to registered listeners.
///
/// Registration takes a write lock; a dispatch copies the listener list under
/// a read lock and runs it without holding any lock, so plugins can be
/// (un)loaded while events are in flight.
pub struct EventDispatcher {
    registry: RwLock<ListenerRegistry>,
    bot: Bot,
    metrics: Arc<Metrics>,
    alerts: Arc<dyn AlertSink>,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new(
        bot: Bot,
        metrics: Arc<Metrics>,
        alerts: Arc<dyn AlertSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry: RwLock::new(ListenerRegistry::new()),
            bot,
            metrics,
            alerts,
            config,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn register(&self, listener: NewListener) -> Listener {
        self.registry.write().register(listener)
    }

    /// Returns `false` when the listener was not registered.
    pub fn unregister(&self, listener: &Listener) -> bool {
        self.registry.write().unregister(listener)
    }

    pub fn unregister_all(&self, owner: &PluginHandle) -> usize {
        self.registry.write().unregister_all(owner)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry.read().listeners(event).len()
    }

    /// Run every listener of `event` and collect their non-null results.
    ///
    /// Returns `None` when nobody listens to `event`, otherwise the results in
    /// invocation order (possibly empty).
    pub async fn dispatch(&self, event: &str, mut args: EventArgs) -> Option<Vec<Value>> {
        let listeners = self.registry.read().snapshot(event)?;

        debug!(event, listeners = listeners.len(), "Dispatching event with data [{}]", args.summary());

        self.metrics.record_event(event);
        let _timer = self.metrics.start_timer(event);

        let mut results = Vec::new();

        for listener in &listeners {
            if let Some(filter) = listener.filter() {
                let Some(index) = args.telegram_index() else {
                    error!(
                        event,
                        listener = listener.name(),
                        "Filtered listener received no message, callback query or inline query; skipping"
                    );
                    continue;
                };

                let outcome = match args.telegram_at(index) {
                    Some(telegram) => AssertUnwindSafe(filter.check(&self.bot, telegram))
                        .catch_unwind()
                        .await
                        .map_err(panic_error),
                    None => Ok(FilterOutcome::Rejected),
                };

                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(source) => {
                        self.report_fault(event, listener, &args, source.context("filter panicked"))
                            .await;
                        continue;
                    }
                };

                match outcome {
                    FilterOutcome::Rejected => continue,
                    FilterOutcome::Accepted => {}
                    FilterOutcome::Captured(matches) => args.set_matches(index, matches),
                }
            }

            let outcome = AssertUnwindSafe(listener.invoke(args.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ListenerError::Fault(panic_error(panic))));

            match outcome {
                Ok(Some(value)) if !value.is_null() => results.push(value),
                Ok(_) => {}
                Err(ListenerError::Skip) => {
                    trace!(event, listener = listener.name(), "Listener skipped");
                }
                Err(ListenerError::StopPropagation) => {
                    debug!(event, listener = listener.name(), "Propagation stopped");
                    break;
                }
                Err(ListenerError::Fault(source)) => {
                    self.report_fault(event, listener, &args, source).await;
                }
            }
        }

        Some(results)
    }

    /// Dispatch the synthetic `stat_listen` event.
    pub async fn log_stat(&self, stat: &str, value: i64) -> Option<Vec<Value>> {
        self.dispatch(event::STAT_LISTEN, EventArgs::new().with(stat).with(value))
            .await
    }

    /// Forward an error to the alert sink. Delivery failures are only logged.
    pub async fn dispatch_alert(&self, invoker: &str, error: &anyhow::Error, chat_id: Option<ChatId>) {
        if !self.config.forward_alerts {
            return;
        }

        if let Err(err) = self.alerts.alert(invoker, error, chat_id).await {
            warn!(invoker, "Failed to deliver alert: {err:#}");
        }
    }

    async fn report_fault(
        &self,
        event: &str,
        listener: &Listener,
        args: &EventArgs,
        source: anyhow::Error,
    ) {
        self.metrics.record_unhandled(&self.config.fault_category);

        let error = anyhow::Error::new(DispatchError {
            event: event.to_string(),
            listener: listener.name().to_string(),
            source,
        });

        if let Some(trace) = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<ListenerPanic>())
            .and_then(|panic| panic.trace.as_deref())
        {
            error!(event, listener = listener.name(), "Panic backtrace:\n{trace}");
        }

        let data = args.telegram().map(|telegram| telegram.data());
        match &data {
            Some(data) => error!(
                event,
                listener = listener.name(),
                "Error dispatching event '{}' on {}\n  Data:\n{}\n{:?}",
                event,
                listener.name(),
                data,
                error
            ),
            None => error!(
                event,
                listener = listener.name(),
                "Error dispatching event '{}' on {} with data\n{}\n{:?}",
                event,
                listener.name(),
                args.summary(),
                error
            ),
        }

        let invoker = format!("Event {} on {}", event, listener.name());
        let chat_id = data.and_then(|d| d.chat_id).map(ChatId);
        self.dispatch_alert(&invoker, &error, chat_id).await;
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    anyhow::Error::new(ListenerPanic::from_payload(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{self, Filter};
    use crate::testing;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        invokers: Mutex<Vec<(String, Option<ChatId>)>>,
        panics: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn alert(
            &self,
            invoker: &str,
            error: &anyhow::Error,
            chat_id: Option<ChatId>,
        ) -> anyhow::Result<()> {
            self.invokers.lock().push((invoker.to_string(), chat_id));
            if let Some(panic) = error.chain().find_map(|c| c.downcast_ref::<ListenerPanic>()) {
                self.panics.lock().push(panic.message.clone());
            }
            if self.fail {
                anyhow::bail!("telegram is down");
            }
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: EventDispatcher,
        alerts: Arc<RecordingSink>,
        owner: PluginHandle,
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingSink::default(), DispatcherConfig::default())
    }

    fn fixture_with(sink: RecordingSink, config: DispatcherConfig) -> Fixture {
        let alerts = Arc::new(sink);
        let dispatcher = EventDispatcher::new(
            testing::bot(),
            Arc::new(Metrics::new().unwrap()),
            alerts.clone(),
            config,
        );
        Fixture {
            dispatcher,
            alerts,
            owner: PluginHandle::new("Test"),
        }
    }

    fn returning(event: &str, owner: &PluginHandle, value: Value) -> NewListener {
        NewListener::new(event, owner.clone(), move |_| {
            let value = value.clone();
            async move { Ok(Some(value)) }
        })
    }

    fn failing(event: &str, owner: &PluginHandle) -> NewListener {
        NewListener::new(event, owner.clone(), |_| async {
            Err(ListenerError::Fault(anyhow::anyhow!("database unavailable")))
        })
    }

    #[tokio::test]
    async fn test_dispatch_without_listeners_returns_none() {
        let f = fixture();

        let result = f.dispatch_message("nobody", "hi").await;

        assert!(result.is_none());
        assert_eq!(f.dispatcher.metrics().event_count("nobody"), 0);
        assert_eq!(f.dispatcher.metrics().latency_samples("nobody"), 0);
    }

    #[tokio::test]
    async fn test_results_follow_priority_order() {
        let f = fixture();
        f.dispatcher.register(returning("message", &f.owner, json!("late")).priority(200));
        f.dispatcher.register(returning("message", &f.owner, json!("early")).priority(10));
        f.dispatcher.register(returning("message", &f.owner, json!("default")));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("early"), json!("default"), json!("late")]);
        assert_eq!(f.dispatcher.metrics().event_count("message"), 1);
        assert_eq!(f.dispatcher.metrics().latency_samples("message"), 1);
    }

    #[tokio::test]
    async fn test_null_results_are_dropped() {
        let f = fixture();
        f.dispatcher.register(NewListener::new("message", f.owner.clone(), |_| async { Ok(None) }));
        f.dispatcher.register(returning("message", &f.owner, Value::Null));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ping_filter_scenario() {
        let f = fixture();
        f.dispatcher.register(returning("message", &f.owner, json!("A")).priority(50));
        f.dispatcher.register(
            returning("message", &f.owner, json!("B"))
                .priority(100)
                .filter(filters::text_eq("ping")),
        );

        let ping = f.dispatch_message("message", "ping").await.unwrap();
        assert_eq!(ping, vec![json!("A"), json!("B")]);

        let pong = f.dispatch_message("message", "pong").await.unwrap();
        assert_eq!(pong, vec![json!("A")]);
    }

    #[tokio::test]
    async fn test_fault_is_isolated_counted_and_alerted() {
        let f = fixture();
        f.dispatcher.register(failing("message", &f.owner).priority(10));
        f.dispatcher.register(returning("message", &f.owner, json!("after")).priority(20));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("after")]);
        assert_eq!(f.dispatcher.metrics().unhandled_errors("command"), 1);

        let alerts = f.alerts.invokers.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "Event message on Test.on_message");
        assert_eq!(alerts[0].1, Some(ChatId(testing::GROUP_ID)));
    }

    #[tokio::test]
    async fn test_single_faulty_listener_returns_empty_sequence() {
        let f = fixture();
        f.dispatcher.register(failing("stat_listen", &f.owner));

        let results = f.dispatcher.log_stat("received", 1).await;

        assert_eq!(results, Some(vec![]));
        assert_eq!(f.dispatcher.metrics().unhandled_errors("command"), 1);

        let alerts = f.alerts.invokers.lock();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].0.contains("stat_listen"));
        assert_eq!(alerts[0].1, None);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_contained() {
        let f = fixture();
        f.dispatcher.register(NewListener::new("message", f.owner.clone(), |_| async {
            panic!("plugin bug");
        }));
        f.dispatcher.register(returning("message", &f.owner, json!("survivor")).priority(150));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("survivor")]);
        assert_eq!(f.alerts.invokers.lock().len(), 1);
        assert_eq!(*f.alerts.panics.lock(), vec!["plugin bug".to_string()]);
    }

    #[tokio::test]
    async fn test_alert_failure_is_swallowed() {
        let f = fixture_with(
            RecordingSink { fail: true, ..Default::default() },
            DispatcherConfig::default(),
        );
        f.dispatcher.register(failing("message", &f.owner));
        f.dispatcher.register(returning("message", &f.owner, json!("still runs")));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("still runs")]);
        assert_eq!(f.alerts.invokers.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_alerts_can_be_disabled() {
        let config = DispatcherConfig {
            forward_alerts: false,
            ..Default::default()
        };
        let f = fixture_with(RecordingSink::default(), config);
        f.dispatcher.register(failing("message", &f.owner));

        f.dispatch_message("message", "hi").await;

        assert!(f.alerts.invokers.lock().is_empty());
        assert_eq!(f.dispatcher.metrics().unhandled_errors("command"), 1);
    }

    #[tokio::test]
    async fn test_stop_propagation_keeps_earlier_results() {
        let f = fixture();
        let reached = Arc::new(AtomicUsize::new(0));

        f.dispatcher.register(returning("message", &f.owner, json!(1)).priority(1));
        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), |_| async {
                Err(ListenerError::StopPropagation)
            })
            .priority(2),
        );
        let counter = reached.clone();
        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .priority(3),
        );

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!(1)]);
        assert_eq!(reached.load(Ordering::SeqCst), 0);

        // The next dispatch is unaffected.
        f.dispatch_message("message", "again").await;
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skip_continues_without_alert() {
        let f = fixture();
        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), |_| async { Err(ListenerError::Skip) })
                .priority(1),
        );
        f.dispatcher.register(returning("message", &f.owner, json!("next")));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("next")]);
        assert!(f.alerts.invokers.lock().is_empty());
        assert_eq!(f.dispatcher.metrics().unhandled_errors("command"), 0);
    }

    #[tokio::test]
    async fn test_filter_without_telegram_argument_skips_listener() {
        let f = fixture();
        f.dispatcher.register(returning("stat_listen", &f.owner, json!("filtered")).filter(filters::group()));
        f.dispatcher.register(returning("stat_listen", &f.owner, json!("plain")));

        let results = f.dispatcher.log_stat("downtime", 30).await.unwrap();

        assert_eq!(results, vec![json!("plain")]);
    }

    #[tokio::test]
    async fn test_captures_reach_the_handler_and_last_write_wins() {
        let f = fixture();
        f.dispatcher.register(
            NewListener::new("callback_query", f.owner.clone(), |args: EventArgs| async move {
                let group = args.telegram().and_then(|e| e.matches()).and_then(|m| m.group(1));
                Ok(group.map(|g| json!(g)))
            })
            .priority(1)
            .filter(filters::regex(r"^help_(\w+)$").unwrap()),
        );
        f.dispatcher.register(
            NewListener::new("callback_query", f.owner.clone(), |args: EventArgs| async move {
                let group = args.telegram().and_then(|e| e.matches()).and_then(|m| m.group(1));
                Ok(group.map(|g| json!(g)))
            })
            .priority(2)
            .filter(filters::regex(r"^help_(\w)").unwrap()),
        );
        // No filter: sees whatever the previous filter wrote.
        f.dispatcher.register(
            NewListener::new("callback_query", f.owner.clone(), |args: EventArgs| async move {
                let group = args.telegram().and_then(|e| e.matches()).and_then(|m| m.group(1));
                Ok(group.map(|g| json!(format!("last:{g}"))))
            })
            .priority(3),
        );

        let args = EventArgs::new().with(testing::callback_query("help_close"));
        let results = f.dispatcher.dispatch("callback_query", args).await.unwrap();

        assert_eq!(results, vec![json!("close"), json!("c"), json!("last:c")]);
    }

    #[tokio::test]
    async fn test_unload_during_dispatch_uses_snapshot() {
        let f = Arc::new(fixture());
        let other = PluginHandle::new("Other");

        let inner = f.clone();
        let owner = f.owner.clone();
        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), move |_| {
                let inner = inner.clone();
                let owner = owner.clone();
                async move {
                    inner.dispatcher.unregister_all(&owner);
                    Ok(Some(json!("unloaded")))
                }
            })
            .priority(1),
        );
        f.dispatcher.register(returning("message", &other, json!("other")));

        let results = f.dispatch_message("message", "hi").await.unwrap();

        assert_eq!(results, vec![json!("unloaded"), json!("other")]);
        assert_eq!(f.dispatcher.listener_count("message"), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_listener_ignores_filter() {
        let f = fixture();
        f.dispatcher.register(returning("start", &f.owner, json!("started")).filter(filters::private()));

        let results = f
            .dispatcher
            .dispatch("start", EventArgs::new().with(1_700_000_000_i64))
            .await;

        assert_eq!(results, Some(vec![json!("started")]));
    }

    #[tokio::test]
    async fn test_async_filter_receives_bot() {
        struct NeverMatches;

        #[async_trait]
        impl Filter for NeverMatches {
            async fn check(&self, _bot: &Bot, _event: &event::TelegramEvent) -> FilterOutcome {
                tokio::task::yield_now().await;
                FilterOutcome::Rejected
            }
        }

        let f = fixture();
        f.dispatcher.register(returning("message", &f.owner, json!("x")).filter(Arc::new(NeverMatches)));

        let results = f.dispatch_message("message", "hi").await;

        assert_eq!(results, Some(vec![]));
    }

    #[tokio::test]
    async fn test_panicking_filter_is_reported() {
        struct Exploding;

        #[async_trait]
        impl Filter for Exploding {
            async fn check(&self, _bot: &Bot, _event: &event::TelegramEvent) -> FilterOutcome {
                panic!("bad filter")
            }
        }

        let f = fixture();
        f.dispatcher.register(returning("message", &f.owner, json!("x")).filter(Arc::new(Exploding)));
        f.dispatcher.register(returning("message", &f.owner, json!("y")).priority(200));

        let results = f.dispatch_message("message", "hi").await;

        assert_eq!(results, Some(vec![json!("y")]));
        assert_eq!(f.dispatcher.metrics().unhandled_errors("command"), 1);
        assert_eq!(f.alerts.invokers.lock().len(), 1);
        assert_eq!(*f.alerts.panics.lock(), vec!["bad filter".to_string()]);
    }

    #[tokio::test]
    async fn test_named_arguments_reach_every_handler() {
        let f = fixture();

        fn named_k(args: &EventArgs) -> Option<i64> {
            args.named("k").and_then(|arg| arg.as_int())
        }

        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), |args: EventArgs| async move {
                let group = args.telegram().and_then(|e| e.matches()).and_then(|m| m.group(1));
                Ok(Some(json!([named_k(&args), group])))
            })
            .priority(1)
            .filter(filters::regex(r"^count (\d+)$").unwrap()),
        );
        f.dispatcher.register(
            NewListener::new("message", f.owner.clone(), |args: EventArgs| async move {
                Ok(Some(json!(named_k(&args))))
            })
            .priority(2),
        );

        let args = EventArgs::new()
            .with(testing::group_message("count 3"))
            .with_named("k", 7_i64);
        let results = f.dispatcher.dispatch("message", args).await.unwrap();

        assert_eq!(results, vec![json!([7, "3"]), json!(7)]);
    }

    impl Fixture {
        async fn dispatch_message(&self, event: &str, text: &str) -> Option<Vec<Value>> {
            let args = EventArgs::new().with(testing::group_message(text));
            self.dispatcher.dispatch(event, args).await
        }
    }
}
