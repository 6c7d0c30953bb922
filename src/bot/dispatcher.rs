//! Telegram update routing.
//!
//! Every supported update is translated into a named event and handed to the
//! [`EventDispatcher`]. Listener failures never reach teloxide.

use std::sync::Arc;

use teloxide::adaptors::Throttle;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberUpdated, InlineQuery};
use tracing::trace;

use crate::dispatch::{EventArgs, EventDispatcher, event};

/// Bot type with Throttle adaptor for automatic rate limiting.
pub type ThrottledBot = Throttle<Bot>;

/// Build the teloxide dispatcher feeding `events`.
pub fn build_dispatcher(
    bot: ThrottledBot,
    events: Arc<EventDispatcher>,
) -> Dispatcher<ThrottledBot, anyhow::Error, teloxide::dispatching::DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![events])
        .default_handler(|_| async {
            trace!("Unsupported update ignored");
        })
        .enable_ctrlc_handler()
        .build()
}

/// Build the handler schema.
fn schema() -> UpdateHandler<anyhow::Error> {
    use teloxide::dispatching::UpdateFilterExt;

    dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback_query))
        .branch(Update::filter_inline_query().endpoint(on_inline_query))
        .branch(Update::filter_chat_member().endpoint(on_chat_member))
        .branch(Update::filter_my_chat_member().endpoint(on_chat_member))
}

async fn forward(events: &EventDispatcher, name: &str, args: EventArgs) -> anyhow::Result<()> {
    events.dispatch(name, args).await;
    events.log_stat("received", 1).await;
    Ok(())
}

async fn on_message(msg: Message, events: Arc<EventDispatcher>) -> anyhow::Result<()> {
    forward(&events, event::MESSAGE, EventArgs::new().with(msg)).await
}

async fn on_callback_query(query: CallbackQuery, events: Arc<EventDispatcher>) -> anyhow::Result<()> {
    forward(&events, event::CALLBACK_QUERY, EventArgs::new().with(query)).await
}

async fn on_inline_query(query: InlineQuery, events: Arc<EventDispatcher>) -> anyhow::Result<()> {
    forward(&events, event::INLINE_QUERY, EventArgs::new().with(query)).await
}

async fn on_chat_member(update: ChatMemberUpdated, events: Arc<EventDispatcher>) -> anyhow::Result<()> {
    forward(&events, event::CHAT_MEMBER_UPDATE, EventArgs::new().with(update)).await
}
