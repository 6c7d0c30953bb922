//! Prometheus metrics for event dispatch.
//!
//! Tracks:
//! - `anjani_event_count{event}` - dispatches that reached at least one listener
//! - `anjani_event_latency_seconds{event}` - time spent running those listeners
//! - `anjani_unhandled_error{category}` - listener faults caught by the dispatcher

use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Dispatch metrics on a registry owned by this instance.
pub struct Metrics {
    registry: Registry,
    event_count: IntCounterVec,
    event_latency: HistogramVec,
    unhandled_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("anjani".to_string()), None)?;

        let event_count = IntCounterVec::new(
            Opts::new("event_count", "Number of dispatched events by name"),
            &["event"],
        )?;

        let event_latency = HistogramVec::new(
            HistogramOpts::new(
                "event_latency_seconds",
                "Time spent running the listeners of an event",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["event"],
        )?;

        let unhandled_errors = IntCounterVec::new(
            Opts::new("unhandled_error", "Listener errors caught by the dispatcher"),
            &["category"],
        )?;

        registry.register(Box::new(event_count.clone()))?;
        registry.register(Box::new(event_latency.clone()))?;
        registry.register(Box::new(unhandled_errors.clone()))?;

        Ok(Self {
            registry,
            event_count,
            event_latency,
            unhandled_errors,
        })
    }

    pub fn record_event(&self, event: &str) {
        self.event_count.with_label_values(&[event]).inc();
    }

    /// Starts a latency observation that is recorded when the timer drops.
    pub fn start_timer(&self, event: &str) -> HistogramTimer {
        self.event_latency.with_label_values(&[event]).start_timer()
    }

    pub fn record_unhandled(&self, category: &str) {
        self.unhandled_errors.with_label_values(&[category]).inc();
    }

    pub fn event_count(&self, event: &str) -> u64 {
        self.event_count.with_label_values(&[event]).get()
    }

    pub fn latency_samples(&self, event: &str) -> u64 {
        self.event_latency.with_label_values(&[event]).get_sample_count()
    }

    pub fn unhandled_errors(&self, category: &str) -> u64 {
        self.unhandled_errors.with_label_values(&[category]).get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}
