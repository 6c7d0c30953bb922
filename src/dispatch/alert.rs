//! Operator alerts for listener faults.
//!
//! The dispatcher only sees the [`AlertSink`] trait. Implementations:
//! - [`TelegramAlerter`] - HTML alert posted to the `ALERT_LOG` chat (and topic)
//! - [`AlertmanagerAlerter`] - firing alert pushed to an Alertmanager endpoint
//! - [`AlertFanout`] - forwards to several sinks

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode, ThreadId};
use tracing::{debug, info};
use url::Url;

use crate::bot::ThrottledBot;
use crate::utils::{html_escape, truncate};

/// Longest error text embedded in a Telegram alert.
const MAX_ERROR_CHARS: usize = 3500;

/// Receives listener faults the dispatcher could not handle.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(
        &self,
        invoker: &str,
        error: &anyhow::Error,
        chat_id: Option<ChatId>,
    ) -> anyhow::Result<()>;
}

/// Destination chat for alerts, written as `chat_id` or `chat_id#thread_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTarget {
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
}

impl FromStr for AlertTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chat, thread) = match s.trim().split_once('#') {
            Some((chat, thread)) => (chat, Some(thread)),
            None => (s.trim(), None),
        };

        let chat_id = chat
            .trim()
            .parse::<i64>()
            .map_err(|err| format!("invalid chat id '{chat}': {err}"))?;

        let thread_id = thread
            .map(|t| {
                t.trim()
                    .parse::<i32>()
                    .map(|id| ThreadId(MessageId(id)))
                    .map_err(|err| format!("invalid thread id '{t}': {err}"))
            })
            .transpose()?;

        Ok(Self {
            chat_id: ChatId(chat_id),
            thread_id,
        })
    }
}

/// Build the HTML body of a Telegram alert.
pub fn format_alert(
    invoker: &str,
    error: &anyhow::Error,
    chat_id: Option<ChatId>,
    now: DateTime<Utc>,
) -> String {
    let chat = chat_id.map_or_else(|| "None".to_string(), |id| id.to_string());
    let details = truncate(&format!("{error:?}"), MAX_ERROR_CHARS);

    format!(
        "🔴 <b>Anjani ERROR ALERT</b>\n\n\
         \u{20}\u{20}- <b>Alert by:</b> {}\n\
         \u{20}\u{20}- <b>Chat ID:</b> {}\n\
         \u{20}\u{20}- <b>Time (UTC):</b> {}\n\n\
         <b>ERROR</b>\n<pre>{}</pre>",
        html_escape(invoker),
        chat,
        now.format("%Y-%m-%d %H:%M:%S"),
        html_escape(&details),
    )
}

/// Posts alerts to a Telegram chat.
pub struct TelegramAlerter {
    bot: ThrottledBot,
    target: AlertTarget,
}

impl TelegramAlerter {
    pub fn new(bot: ThrottledBot, target: AlertTarget) -> Self {
        Self { bot, target }
    }
}

#[async_trait]
impl AlertSink for TelegramAlerter {
    async fn alert(
        &self,
        invoker: &str,
        error: &anyhow::Error,
        chat_id: Option<ChatId>,
    ) -> anyhow::Result<()> {
        let text = format_alert(invoker, error, chat_id, Utc::now());

        let mut request = self
            .bot
            .send_message(self.target.chat_id, text)
            .parse_mode(ParseMode::Html);
        if let Some(thread_id) = self.target.thread_id {
            request = request.message_thread_id(thread_id);
        }
        request.await.context("sending alert to Telegram")?;

        debug!(chat = %self.target.chat_id, "Alert delivered");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AlertmanagerAlert<'a> {
    status: &'static str,
    labels: AlertLabels<'a>,
    annotations: AlertAnnotations,
}

#[derive(Debug, Serialize)]
struct AlertLabels<'a> {
    alertname: &'a str,
    severity: &'static str,
    alert_type: &'static str,
    instance: &'static str,
}

#[derive(Debug, Serialize)]
struct AlertAnnotations {
    description: String,
}

/// Pushes firing alerts to an Alertmanager-compatible API.
pub struct AlertmanagerAlerter {
    client: reqwest::Client,
    url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl AlertmanagerAlerter {
    pub fn new(url: Url, user: Option<String>, password: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            credentials: user.map(|user| (user, password)),
        }
    }
}

#[async_trait]
impl AlertSink for AlertmanagerAlerter {
    async fn alert(
        &self,
        invoker: &str,
        error: &anyhow::Error,
        chat_id: Option<ChatId>,
    ) -> anyhow::Result<()> {
        let description = match chat_id {
            Some(chat) => format!("{invoker} (chat {chat}): {error:#}"),
            None => format!("{invoker}: {error:#}"),
        };
        let payload = [AlertmanagerAlert {
            status: "firing",
            labels: AlertLabels {
                alertname: "listener_fault",
                severity: "error",
                alert_type: "app",
                instance: "anjani",
            },
            annotations: AlertAnnotations { description },
        }];

        let mut request = self.client.post(self.url.clone()).json(&payload);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = request.send().await.context("posting alert")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("alertmanager answered {status}: {body}");
        }

        info!(url = %self.url, "Alert pushed to alertmanager");
        Ok(())
    }
}

/// Forwards each alert to every sink, even when an earlier one fails.
#[derive(Default)]
pub struct AlertFanout {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait]
impl AlertSink for AlertFanout {
    async fn alert(
        &self,
        invoker: &str,
        error: &anyhow::Error,
        chat_id: Option<ChatId>,
    ) -> anyhow::Result<()> {
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(err) = sink.alert(invoker, error, chat_id).await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn alert(&self, _: &str, _: &anyhow::Error, _: Option<ChatId>) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("sink down");
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_alert_target() {
        let plain: AlertTarget = "-100123".parse().unwrap();
        assert_eq!(plain.chat_id, ChatId(-100123));
        assert_eq!(plain.thread_id, None);

        let topic: AlertTarget = "-100123#45".parse().unwrap();
        assert_eq!(topic.thread_id, Some(ThreadId(MessageId(45))));

        assert!("abc".parse::<AlertTarget>().is_err());
        assert!("-100#topic".parse::<AlertTarget>().is_err());
    }

    #[test]
    fn test_format_alert_escapes_and_labels() {
        let error = anyhow::anyhow!("bad <input>").context("handler failed");
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let text = format_alert("Event message on Ping.on_message", &error, Some(ChatId(-42)), now);

        assert!(text.contains("<b>Alert by:</b> Event message on Ping.on_message"));
        assert!(text.contains("<b>Chat ID:</b> -42"));
        assert!(text.contains("2024-05-01 12:30:00"));
        assert!(text.contains("bad &lt;input&gt;"));
        assert!(text.contains("handler failed"));
    }

    #[tokio::test]
    async fn test_fanout_tries_every_sink() {
        let failing = Arc::new(CountingSink { calls: AtomicUsize::new(0), fail: true });
        let healthy = Arc::new(CountingSink { calls: AtomicUsize::new(0), fail: false });

        let mut fanout = AlertFanout::new();
        fanout.push(failing.clone());
        fanout.push(healthy.clone());

        let result = fanout.alert("Event x", &anyhow::anyhow!("boom"), None).await;

        assert!(result.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_fanout_succeeds() {
        let fanout = AlertFanout::new();
        assert!(fanout.alert("Event x", &anyhow::anyhow!("boom"), None).await.is_ok());
    }
}
