//! Welcome plugin.
//!
//! Greets users joining a group and logs when the bot itself is added.

use std::sync::Arc;

use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberUpdated, ParseMode, User, UserId};
use tracing::info;

use super::{Plugin, PluginSetup};
use crate::bot::ThrottledBot;
use crate::dispatch::{EventArgs, ListenerError, ListenerResult, event};
use crate::utils::{html_escape, mention_html};

#[derive(Debug, PartialEq, Eq)]
enum Join<'a> {
    /// The bot was added to the chat.
    Bot,
    /// A human joined.
    User(&'a User),
}

/// Classify a member transition. Leaves, bans, promotions and other bots
/// joining are ignored.
fn classify(update: &ChatMemberUpdated, me: UserId) -> Option<Join<'_>> {
    let old = &update.old_chat_member;
    let new = &update.new_chat_member;

    if old.is_present() || !new.is_present() {
        return None;
    }

    if new.user.id == me {
        Some(Join::Bot)
    } else if new.user.is_bot {
        None
    } else {
        Some(Join::User(&new.user))
    }
}

pub struct Welcome {
    bot: ThrottledBot,
    me: UserId,
}

impl Welcome {
    pub fn new(bot: ThrottledBot, me: UserId) -> Self {
        Self { bot, me }
    }

    async fn on_member_update(&self, args: EventArgs) -> ListenerResult {
        let Some(update) = args.get(0).and_then(|a| a.as_chat_member()) else {
            return Err(ListenerError::Skip);
        };

        match classify(update, self.me) {
            Some(Join::Bot) => {
                info!(chat = %update.chat.id, title = update.chat.title(), "Bot added to chat");
                Ok(None)
            }
            Some(Join::User(user)) => {
                let title = update.chat.title().unwrap_or("the group");
                let text = format!("Welcome to {}, {}!", html_escape(title), mention_html(user));

                self.bot
                    .send_message(update.chat.id, text)
                    .parse_mode(ParseMode::Html)
                    .await?;

                Ok(Some(json!(user.id.0)))
            }
            None => Ok(None),
        }
    }
}

impl Plugin for Welcome {
    fn name(&self) -> &str {
        "Welcome"
    }

    fn help(&self) -> Option<&str> {
        Some("New members are greeted when they join.")
    }

    fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()> {
        setup.on(event::CHAT_MEMBER_UPDATE).handle(move |args| {
            let this = self.clone();
            async move { this.on_member_update(args).await }
        });
        Ok(())
    }
}
