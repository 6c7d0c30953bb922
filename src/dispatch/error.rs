//! Listener outcomes and the fault wrapper reported to operators.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};

use thiserror::Error;

/// Ways a listener can end other than returning a value.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener does not apply to this event; try the next one.
    #[error("listener does not apply to this event")]
    Skip,

    /// No further listeners run for this dispatch.
    #[error("event propagation stopped")]
    StopPropagation,

    /// Anything else. Counted, logged, and forwarded to the alert sink.
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<teloxide::RequestError> for ListenerError {
    fn from(err: teloxide::RequestError) -> Self {
        Self::Fault(err.into())
    }
}

/// A listener fault with the dispatch context attached.
#[derive(Debug, Error)]
#[error("error dispatching event '{event}' on {listener}")]
pub struct DispatchError {
    pub event: String,
    pub listener: String,
    #[source]
    pub source: anyhow::Error,
}

/// A listener or filter panicked while being polled.
#[derive(Debug, Error)]
#[error("panicked: {message}")]
pub struct ListenerPanic {
    pub message: String,

    /// Stack at the point the panic was caught, when `RUST_BACKTRACE` enables capture.
    pub trace: Option<String>,
}

impl ListenerPanic {
    /// Build from a `catch_unwind` payload. Must run on the panicking thread.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        let backtrace = Backtrace::capture();
        let trace = (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        Self { message, trace }
    }
}
