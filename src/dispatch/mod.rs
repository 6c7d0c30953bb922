//! Event dispatch core: listener registry, dispatcher, metrics and alerts.

pub mod alert;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod registry;

pub use alert::{AlertFanout, AlertSink, AlertTarget, AlertmanagerAlerter, TelegramAlerter};
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use error::{DispatchError, ListenerError};
pub use event::{EventArg, EventArgs, EventData, EventPayload, Matches, TelegramEvent};
pub use listener::{DEFAULT_PRIORITY, Handler, Listener, ListenerResult, NewListener, PluginHandle};
pub use metrics::Metrics;
pub use registry::ListenerRegistry;
