//! Built-in filters.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use teloxide::Bot;
use teloxide::types::Chat;
use tracing::warn;

use super::{BoxedFilter, Filter, FilterOutcome};
use crate::dispatch::{Matches, TelegramEvent};
use crate::permissions::Permissions;

/// Accepts events whose chat passes `predicate`.
struct ChatKind(fn(&Chat) -> bool);

#[async_trait]
impl Filter for ChatKind {
    async fn check(&self, _bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        event.chat().is_some_and(self.0).into()
    }
}

/// Groups and supergroups.
pub fn group() -> BoxedFilter {
    Arc::new(ChatKind(|chat| chat.is_group() || chat.is_supergroup()))
}

pub fn private() -> BoxedFilter {
    Arc::new(ChatKind(Chat::is_private))
}

pub fn channel() -> BoxedFilter {
    Arc::new(ChatKind(Chat::is_channel))
}

struct TextEq(String);

#[async_trait]
impl Filter for TextEq {
    async fn check(&self, _bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        (event.text() == Some(self.0.as_str())).into()
    }
}

/// Input text equal to `text`.
pub fn text_eq(text: impl Into<String>) -> BoxedFilter {
    Arc::new(TextEq(text.into()))
}

struct Pattern(Regex);

#[async_trait]
impl Filter for Pattern {
    async fn check(&self, _bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        event
            .text()
            .and_then(|text| Matches::from_regex(&self.0, text))
            .map_or(FilterOutcome::Rejected, FilterOutcome::Captured)
    }
}

/// Input text matching `pattern`. Every match is captured.
pub fn regex(pattern: &str) -> Result<BoxedFilter, regex::Error> {
    Ok(Arc::new(Pattern(Regex::new(pattern)?)))
}

struct Command {
    name: String,
    bot_username: String,
}

#[async_trait]
impl Filter for Command {
    async fn check(&self, _bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        // Commands only come from messages.
        let Some(text) = event.as_message().and_then(|msg| msg.text()) else {
            return FilterOutcome::Rejected;
        };

        let Some(parsed) = parse_command(text) else {
            return FilterOutcome::Rejected;
        };

        if !parsed.name.eq_ignore_ascii_case(&self.name) {
            return FilterOutcome::Rejected;
        }

        // `/name@otherbot` is addressed to another bot in the same chat.
        if parsed
            .mention
            .is_some_and(|mention| !mention.eq_ignore_ascii_case(&self.bot_username))
        {
            return FilterOutcome::Rejected;
        }

        FilterOutcome::Captured(Matches::new(vec![vec![Some(text.to_string()), parsed.args]]))
    }
}

/// `/name` or `/name@bot_username`, optionally followed by arguments.
///
/// Group 1 of the captures holds the arguments, if any.
pub fn command(name: impl Into<String>, bot_username: impl Into<String>) -> BoxedFilter {
    Arc::new(Command {
        name: name.into(),
        bot_username: bot_username.into(),
    })
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedCommand<'a> {
    name: &'a str,
    mention: Option<&'a str>,
    args: Option<String>,
}

/// Split `/name@bot args` into the command name, the addressed bot and the
/// trimmed arguments.
fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, Some(args.trim())),
        None => (rest, None),
    };

    let (name, mention) = match head.split_once('@') {
        Some((name, mention)) => (name, Some(mention)),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }

    Some(ParsedCommand {
        name,
        mention,
        args: args.filter(|a| !a.is_empty()).map(str::to_string),
    })
}

struct CallbackPrefix(String);

#[async_trait]
impl Filter for CallbackPrefix {
    async fn check(&self, _bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        event
            .as_callback_query()
            .and_then(|query| query.data.as_deref())
            .is_some_and(|data| data.starts_with(&self.0))
            .into()
    }
}

/// Callback queries whose data starts with `prefix`.
pub fn callback_prefix(prefix: impl Into<String>) -> BoxedFilter {
    Arc::new(CallbackPrefix(prefix.into()))
}

struct Admin(Arc<Permissions>);

#[async_trait]
impl Filter for Admin {
    async fn check(&self, bot: &Bot, event: &TelegramEvent) -> FilterOutcome {
        let (Some(chat), Some(user)) = (event.chat(), event.from()) else {
            return FilterOutcome::Rejected;
        };

        match self.0.is_admin(bot, chat.id, user.id).await {
            Ok(is_admin) => is_admin.into(),
            Err(err) => {
                warn!(chat = %chat.id, user = %user.id, "Admin lookup failed: {err:#}");
                FilterOutcome::Rejected
            }
        }
    }
}

/// Senders who administer the chat, plus bot owners.
pub fn admin(permissions: Arc<Permissions>) -> BoxedFilter {
    Arc::new(Admin(permissions))
}
