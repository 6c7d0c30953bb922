//! Bot runtime - lifecycle events around the polling or webhook loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::dispatcher::{ThrottledBot, build_dispatcher};
use super::webhook::start_webhook;
use crate::config::{BotMode, Config};
use crate::dispatch::{EventArgs, EventDispatcher, event};

/// Run the bot with the configured mode until Ctrl+C.
///
/// Dispatches `start` (with the unix timestamp) and `started` before the
/// first update, `stop` and `stopped` after the update loop returns.
pub async fn run(config: &Config, bot: ThrottledBot, events: Arc<EventDispatcher>) -> anyhow::Result<()> {
    events
        .dispatch(event::START, EventArgs::new().with(Utc::now().timestamp()))
        .await;
    events.dispatch(event::STARTED, EventArgs::new()).await;

    let mut dispatcher = build_dispatcher(bot.clone(), events.clone());

    let result = match config.bot_mode {
        BotMode::Polling => {
            info!("Starting bot in polling mode...");
            dispatcher.dispatch().await;
            Ok(())
        }
        BotMode::Webhook => {
            info!("Starting bot in webhook mode...");
            start_webhook(config, dispatcher, bot).await
        }
    };

    events.dispatch(event::STOP, EventArgs::new()).await;
    events.dispatch(event::STOPPED, EventArgs::new()).await;

    result
}
