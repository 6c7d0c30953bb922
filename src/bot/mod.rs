//! Bot module - teloxide adapter around the event dispatcher.

pub mod dispatcher;
mod runtime;
pub mod webhook;

pub use dispatcher::{ThrottledBot, build_dispatcher};
pub use runtime::run;
