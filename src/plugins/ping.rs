//! Ping command plugin.
//!
//! Measures and displays Telegram API latency.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};

use super::{Plugin, PluginSetup};
use crate::bot::ThrottledBot;
use crate::dispatch::{EventArgs, ListenerError, ListenerResult, event};
use crate::filters;

pub struct Ping {
    bot: ThrottledBot,
}

impl Ping {
    pub fn new(bot: ThrottledBot) -> Self {
        Self { bot }
    }

    /// Handle /ping: time a getMe call and reply with it.
    async fn ping(&self, args: EventArgs) -> ListenerResult {
        let Some(msg) = args.telegram().and_then(|e| e.as_message()) else {
            return Err(ListenerError::Skip);
        };

        // Measure time to call getMe (lightweight API call)
        let start = Instant::now();
        self.bot.get_me().await?;
        let ms = start.elapsed().as_millis() as u64;

        self.bot
            .send_message(msg.chat.id, format!("{} Pong! <code>{}ms</code>", latency_emoji(ms), ms))
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;

        Ok(Some(json!(ms)))
    }
}

fn latency_emoji(ms: u64) -> &'static str {
    match ms {
        0..100 => "🟢",
        100..300 => "🟡",
        _ => "🔴",
    }
}

impl Plugin for Ping {
    fn name(&self) -> &str {
        "Ping"
    }

    fn help(&self) -> Option<&str> {
        Some("/ping - check Telegram API latency")
    }

    fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()> {
        let ping = filters::command("ping", setup.bot_username());
        setup
            .on(event::MESSAGE)
            .filter(ping)
            .handle(move |args| {
                let this = self.clone();
                async move { this.ping(args).await }
            });
        Ok(())
    }
}
