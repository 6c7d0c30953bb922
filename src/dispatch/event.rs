//! Event names and the argument payloads carried through a dispatch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use teloxide::types::{CallbackQuery, Chat, ChatMemberUpdated, InlineQuery, Message, User};

pub const MESSAGE: &str = "message";
pub const CALLBACK_QUERY: &str = "callback_query";
pub const INLINE_QUERY: &str = "inline_query";
pub const CHAT_MEMBER_UPDATE: &str = "chat_member_update";

/// Synthetic event used by [`EventDispatcher::log_stat`](super::EventDispatcher::log_stat).
pub const STAT_LISTEN: &str = "stat_listen";

pub const LOAD: &str = "load";
pub const START: &str = "start";
pub const STARTED: &str = "started";
pub const STOP: &str = "stop";
pub const STOPPED: &str = "stopped";

/// Built-in lifecycle events. Listeners on these never carry a filter.
pub const LIFECYCLE_EVENTS: [&str; 5] = [LOAD, START, STARTED, STOP, STOPPED];

pub fn is_lifecycle(event: &str) -> bool {
    LIFECYCLE_EVENTS.contains(&event)
}

/// Capture groups produced by a matching filter.
///
/// Each entry is one match of the pattern; group 0 is the whole match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matches(Vec<Vec<Option<String>>>);

impl Matches {
    pub fn new(sets: Vec<Vec<Option<String>>>) -> Self {
        Self(sets)
    }

    /// Collect every match of `re` in `text`, or `None` when nothing matched.
    pub fn from_regex(re: &Regex, text: &str) -> Option<Self> {
        let sets: Vec<Vec<Option<String>>> = re
            .captures_iter(text)
            .map(|caps| {
                caps.iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect()
            })
            .collect();

        if sets.is_empty() { None } else { Some(Self(sets)) }
    }

    /// Group `index` of the first match.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.0.first()?.get(index)?.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Option<String>]> {
        self.0.iter().map(Vec::as_slice)
    }
}

/// The update types filters know how to inspect.
#[derive(Debug)]
pub enum EventPayload {
    Message(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::CallbackQuery(_) => "callback_query",
            Self::InlineQuery(_) => "inline_query",
        }
    }
}

/// A Telegram update recognized by the filter engine.
///
/// The payload is shared; `matches` belongs to this copy and is written by the
/// dispatcher when a filter reports captures.
#[derive(Debug, Clone)]
pub struct TelegramEvent {
    payload: Arc<EventPayload>,
    matches: Option<Matches>,
}

impl TelegramEvent {
    fn new(payload: EventPayload) -> Self {
        Self {
            payload: Arc::new(payload),
            matches: None,
        }
    }

    pub fn message(msg: Message) -> Self {
        Self::new(EventPayload::Message(msg))
    }

    pub fn callback_query(query: CallbackQuery) -> Self {
        Self::new(EventPayload::CallbackQuery(query))
    }

    pub fn inline_query(query: InlineQuery) -> Self {
        Self::new(EventPayload::InlineQuery(query))
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self.payload.as_ref() {
            EventPayload::Message(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_callback_query(&self) -> Option<&CallbackQuery> {
        match self.payload.as_ref() {
            EventPayload::CallbackQuery(query) => Some(query),
            _ => None,
        }
    }

    /// User input: message text (or caption), callback data, or inline query.
    pub fn text(&self) -> Option<&str> {
        match self.payload.as_ref() {
            EventPayload::Message(msg) => msg.text().or_else(|| msg.caption()),
            EventPayload::CallbackQuery(query) => query.data.as_deref(),
            EventPayload::InlineQuery(query) => Some(query.query.as_str()),
        }
    }

    pub fn chat(&self) -> Option<&Chat> {
        match self.payload.as_ref() {
            EventPayload::Message(msg) => Some(&msg.chat),
            EventPayload::CallbackQuery(query) => query.message.as_ref().map(|m| m.chat()),
            EventPayload::InlineQuery(_) => None,
        }
    }

    pub fn from(&self) -> Option<&User> {
        match self.payload.as_ref() {
            EventPayload::Message(msg) => msg.from.as_ref(),
            EventPayload::CallbackQuery(query) => Some(&query.from),
            EventPayload::InlineQuery(query) => Some(&query.from),
        }
    }

    pub fn matches(&self) -> Option<&Matches> {
        self.matches.as_ref()
    }

    pub(crate) fn set_matches(&mut self, matches: Matches) {
        self.matches = Some(matches);
    }

    /// Diagnostic fields for error reports.
    pub fn data(&self) -> EventData {
        match self.payload.as_ref() {
            EventPayload::Message(msg) => {
                let (user_name, user_id) = match (&msg.from, &msg.sender_chat) {
                    (Some(user), _) => (Some(user.first_name.clone()), Some(user.id.0 as i64)),
                    (None, Some(chat)) => (chat.title().map(str::to_string), Some(chat.id.0)),
                    (None, None) => (None, None),
                };
                EventData {
                    chat_title: msg.chat.title().map(str::to_string),
                    chat_id: Some(msg.chat.id.0),
                    user_name,
                    user_id,
                    input: msg.text().map(str::to_string),
                }
            }
            EventPayload::CallbackQuery(query) => {
                let chat = query.message.as_ref().map(|m| m.chat());
                EventData {
                    chat_title: chat.and_then(|c| c.title()).map(str::to_string),
                    chat_id: chat.map(|c| c.id.0),
                    user_name: Some(query.from.first_name.clone()),
                    user_id: Some(query.from.id.0 as i64),
                    input: query.data.clone(),
                }
            }
            EventPayload::InlineQuery(query) => EventData {
                chat_title: None,
                chat_id: None,
                user_name: Some(query.from.first_name.clone()),
                user_id: Some(query.from.id.0 as i64),
                input: Some(query.query.clone()),
            },
        }
    }
}

/// Who triggered an event, where, and with what input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventData {
    pub chat_title: Option<String>,
    pub chat_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_id: Option<i64>,
    pub input: Option<String>,
}

impl fmt::Display for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "    • Chat    -> {} ({})",
            self.chat_title.as_deref().unwrap_or("Unknown"),
            self.chat_id.unwrap_or(-1)
        )?;
        writeln!(
            f,
            "    • Invoker -> {} ({})",
            self.user_name.as_deref().unwrap_or("Unknown"),
            self.user_id.unwrap_or(-1)
        )?;
        write!(f, "    • Input   -> {}", self.input.as_deref().unwrap_or("None"))
    }
}

/// A single positional or named dispatch argument.
#[derive(Debug, Clone)]
pub enum EventArg {
    Telegram(TelegramEvent),
    ChatMember(Arc<ChatMemberUpdated>),
    Int(i64),
    Text(String),
}

impl EventArg {
    pub fn as_telegram(&self) -> Option<&TelegramEvent> {
        match self {
            Self::Telegram(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_chat_member(&self) -> Option<&ChatMemberUpdated> {
        match self {
            Self::ChatMember(update) => Some(update),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for EventArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram(event) => {
                let data = event.data();
                write!(
                    f,
                    "{}(chat={}, from={}, input={:?})",
                    event.payload().kind(),
                    data.chat_id.unwrap_or(-1),
                    data.user_id.unwrap_or(-1),
                    data.input.unwrap_or_default()
                )
            }
            Self::ChatMember(update) => write!(
                f,
                "chat_member(chat={}, user={})",
                update.chat.id, update.new_chat_member.user.id
            ),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text:?}"),
        }
    }
}

impl From<TelegramEvent> for EventArg {
    fn from(event: TelegramEvent) -> Self {
        Self::Telegram(event)
    }
}

impl From<Message> for EventArg {
    fn from(msg: Message) -> Self {
        Self::Telegram(TelegramEvent::message(msg))
    }
}

impl From<CallbackQuery> for EventArg {
    fn from(query: CallbackQuery) -> Self {
        Self::Telegram(TelegramEvent::callback_query(query))
    }
}

impl From<InlineQuery> for EventArg {
    fn from(query: InlineQuery) -> Self {
        Self::Telegram(TelegramEvent::inline_query(query))
    }
}

impl From<ChatMemberUpdated> for EventArg {
    fn from(update: ChatMemberUpdated) -> Self {
        Self::ChatMember(Arc::new(update))
    }
}

impl From<i64> for EventArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for EventArg {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for EventArg {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Positional and named arguments handed to every listener of a dispatch.
#[derive(Debug, Clone, Default)]
pub struct EventArgs {
    args: Vec<EventArg>,
    named: BTreeMap<String, EventArg>,
}

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with(mut self, arg: impl Into<EventArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set a named argument.
    pub fn with_named(mut self, key: impl Into<String>, arg: impl Into<EventArg>) -> Self {
        self.named.insert(key.into(), arg.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&EventArg> {
        self.args.get(index)
    }

    pub fn named(&self, key: &str) -> Option<&EventArg> {
        self.named.get(key)
    }

    /// Position of the first positional Telegram event, the one filters inspect.
    pub fn telegram_index(&self) -> Option<usize> {
        self.args.iter().position(|arg| arg.as_telegram().is_some())
    }

    /// The first positional Telegram event.
    pub fn telegram(&self) -> Option<&TelegramEvent> {
        self.args.iter().find_map(EventArg::as_telegram)
    }

    pub(crate) fn telegram_at(&self, index: usize) -> Option<&TelegramEvent> {
        self.args.get(index).and_then(EventArg::as_telegram)
    }

    pub(crate) fn set_matches(&mut self, index: usize, matches: Matches) {
        if let Some(EventArg::Telegram(event)) = self.args.get_mut(index) {
            event.set_matches(matches);
        }
    }

    /// Comma-separated rendering of the positional arguments for logs.
    pub fn summary(&self) -> String {
        self.args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_lifecycle_names() {
        assert!(is_lifecycle("load"));
        assert!(is_lifecycle("stopped"));
        assert!(!is_lifecycle("message"));
    }

    #[test]
    fn test_matches_from_regex() {
        let re = Regex::new(r"notify_(\w+)").unwrap();
        let matches = Matches::from_regex(&re, "notify_daily notify_weekly").unwrap();

        assert_eq!(matches.iter().count(), 2);
        assert_eq!(matches.group(0), Some("notify_daily"));
        assert_eq!(matches.group(1), Some("daily"));
        assert!(Matches::from_regex(&re, "nothing here").is_none());
    }

    #[test]
    fn test_message_event_data() {
        let event = TelegramEvent::message(testing::group_message("ping"));
        let data = event.data();

        assert_eq!(data.chat_title.as_deref(), Some(testing::GROUP_TITLE));
        assert_eq!(data.chat_id, Some(testing::GROUP_ID));
        assert_eq!(data.user_name.as_deref(), Some(testing::USER_NAME));
        assert_eq!(data.user_id, Some(testing::USER_ID as i64));
        assert_eq!(data.input.as_deref(), Some("ping"));
    }

    #[test]
    fn test_callback_and_inline_event_data() {
        let callback = TelegramEvent::callback_query(testing::callback_query("help_close"));
        let data = callback.data();
        assert_eq!(data.chat_id, Some(testing::GROUP_ID));
        assert_eq!(data.input.as_deref(), Some("help_close"));

        let inline = TelegramEvent::inline_query(testing::inline_query("beecon"));
        let data = inline.data();
        assert_eq!(data.chat_id, None);
        assert_eq!(data.user_id, Some(testing::USER_ID as i64));
        assert_eq!(inline.text(), Some("beecon"));
    }

    #[test]
    fn test_event_data_display_uses_sentinels() {
        let rendered = EventData::default().to_string();
        assert!(rendered.contains("Unknown (-1)"));
        assert!(rendered.contains("Input   -> None"));
    }

    #[test]
    fn test_args_find_first_telegram_event() {
        let args = EventArgs::new()
            .with("stat")
            .with(testing::group_message("first"))
            .with(testing::private_message("second"));

        assert_eq!(args.telegram_index(), Some(1));
        assert_eq!(args.telegram().and_then(TelegramEvent::text), Some("first"));
    }

    #[test]
    fn test_set_matches_only_touches_that_copy() {
        let mut args = EventArgs::new().with(testing::group_message("notify_x"));
        let snapshot = args.clone();

        args.set_matches(0, Matches::new(vec![vec![Some("x".into())]]));

        assert_eq!(args.telegram().and_then(|e| e.matches()).and_then(|m| m.group(0)), Some("x"));
        assert!(snapshot.telegram().and_then(|e| e.matches()).is_none());
    }
}
