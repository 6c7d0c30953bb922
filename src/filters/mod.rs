//! Listener filters.
//!
//! A filter decides whether a listener runs for one Telegram event. Filters
//! that capture text (regex, command) hand the captures back to the
//! dispatcher, which stores them on the event before the listener runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ping = filters::group().and(filters::command("ping", setup.bot_username()));
//! setup.on("message").filter(ping).handle(handler);
//! ```

mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::Bot;

use crate::dispatch::{Matches, TelegramEvent};

pub use builtin::{
    admin, callback_prefix, channel, command, group, private, regex, text_eq,
};

/// Result of checking one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Rejected,
    Accepted,
    /// Accepted, with capture groups for the listener.
    Captured(Matches),
}

impl FilterOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn matches(&self) -> Option<&Matches> {
        match self {
            Self::Captured(matches) => Some(matches),
            _ => None,
        }
    }
}

impl From<bool> for FilterOutcome {
    fn from(accepted: bool) -> Self {
        if accepted { Self::Accepted } else { Self::Rejected }
    }
}

#[async_trait]
pub trait Filter: Send + Sync {
    async fn check(&self, bot: &Bot, event: &TelegramEvent) -> FilterOutcome;
}

pub type BoxedFilter = Arc<dyn Filter>;

/// Combinators on shared filters.
pub trait FilterExt {
    /// Both must accept. Captures of the right-hand side win.
    fn and(self, other: BoxedFilter) -> BoxedFilter;
    /// Either must accept. The left-hand side is checked first.
    fn or(self, other: BoxedFilter) -> BoxedFilter;
    fn not(self) -> BoxedFilter;
}

impl FilterExt for BoxedFilter {
    fn and(self, other: BoxedFilter) -> BoxedFilter {
        Arc::new(And(self, other))
    }

    fn or(self, other: BoxedFilter) -> BoxedFilter {
        Arc::new(Or(self, other))
    }

    fn not(self) -> BoxedFilter {
        Arc::new(Not(self))
    }
}

struct And(BoxedFilter, BoxedFilter);

#[async_trait]
impl Filter for And {
    async fn check(&self, bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        let left = self.0.check(bot, event).await;
        if !left.is_accepted() {
            return FilterOutcome::Rejected;
        }

        match self.1.check(bot, event).await {
            FilterOutcome::Rejected => FilterOutcome::Rejected,
            FilterOutcome::Accepted => left,
            captured => captured,
        }
    }
}

struct Or(BoxedFilter, BoxedFilter);

#[async_trait]
impl Filter for Or {
    async fn check(&self, bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        match self.0.check(bot, event).await {
            FilterOutcome::Rejected => self.1.check(bot, event).await,
            accepted => accepted,
        }
    }
}

struct Not(BoxedFilter);

#[async_trait]
impl Filter for Not {
    async fn check(&self, bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        (!self.0.check(bot, event).await.is_accepted()).into()
    }
}
