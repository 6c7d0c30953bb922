//! System plugin.
//!
//! Posts lifecycle notices to the log channel and drives the help menu.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::info;

use super::{Plugin, PluginSetup};
use crate::bot::ThrottledBot;
use crate::dispatch::{EventArgs, ListenerError, ListenerResult, event};
use crate::filters::{self, FilterExt};
use crate::utils::html_escape;

/// Callback data prefix of help menu buttons.
const HELP_PREFIX: &str = "help_";

pub struct System {
    bot: ThrottledBot,
    log_channel: Option<ChatId>,
    /// Help text per plugin name.
    sections: BTreeMap<String, String>,
}

impl System {
    pub fn new(
        bot: ThrottledBot,
        log_channel: Option<ChatId>,
        sections: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            bot,
            log_channel,
            sections: sections.into_iter().collect(),
        }
    }

    async fn notify(&self, text: &str) -> ListenerResult {
        let Some(chat) = self.log_channel else {
            return Ok(None);
        };

        self.bot.send_message(chat, text).await?;
        Ok(None)
    }

    async fn on_start(&self, args: EventArgs) -> ListenerResult {
        if let Some(ts) = args.get(0).and_then(|a| a.as_int()) {
            info!(started_at = ts, "System starting");
        }
        self.notify("Starting system...").await
    }

    async fn on_help_command(&self, args: EventArgs) -> ListenerResult {
        let Some(msg) = args.telegram().and_then(|e| e.as_message()) else {
            return Err(ListenerError::Skip);
        };

        self.bot
            .send_message(msg.chat.id, "<b>Help</b>\nPick a section:")
            .parse_mode(ParseMode::Html)
            .reply_markup(self.menu())
            .await?;

        Ok(None)
    }

    async fn on_help_callback(&self, args: EventArgs) -> ListenerResult {
        let Some(event) = args.telegram() else {
            return Err(ListenerError::Skip);
        };
        let (Some(query), Some(section)) = (
            event.as_callback_query(),
            event.matches().and_then(|m| m.group(1)),
        ) else {
            return Err(ListenerError::Skip);
        };
        let Some(message) = query.message.as_ref() else {
            return Err(ListenerError::Skip);
        };

        match HelpAction::parse(section) {
            HelpAction::Close => {
                self.bot.delete_message(message.chat().id, message.id()).await?;
            }
            HelpAction::Menu => {
                self.bot
                    .edit_message_text(message.chat().id, message.id(), "<b>Help</b>\nPick a section:")
                    .parse_mode(ParseMode::Html)
                    .reply_markup(self.menu())
                    .await?;
            }
            HelpAction::Section(name) => {
                let Some(help) = self.sections.get(name) else {
                    self.bot
                        .answer_callback_query(query.id.clone())
                        .text("Unknown help section")
                        .await?;
                    return Ok(None);
                };

                let back = InlineKeyboardMarkup::new(vec![vec![
                    InlineKeyboardButton::callback("« Back", format!("{HELP_PREFIX}menu")),
                    InlineKeyboardButton::callback("Close", format!("{HELP_PREFIX}close")),
                ]]);
                self.bot
                    .edit_message_text(
                        message.chat().id,
                        message.id(),
                        format!("<b>{}</b>\n\n{}", html_escape(name), html_escape(help)),
                    )
                    .parse_mode(ParseMode::Html)
                    .reply_markup(back)
                    .await?;
            }
        }

        self.bot.answer_callback_query(query.id.clone()).await?;
        Ok(Some(json!(section)))
    }

    fn menu(&self) -> InlineKeyboardMarkup {
        let mut rows: Vec<Vec<InlineKeyboardButton>> = self
            .sections
            .keys()
            .map(|name| vec![InlineKeyboardButton::callback(name.clone(), format!("{HELP_PREFIX}{name}"))])
            .collect();
        rows.push(vec![InlineKeyboardButton::callback("Close", format!("{HELP_PREFIX}close"))]);
        InlineKeyboardMarkup::new(rows)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HelpAction<'a> {
    Close,
    Menu,
    Section(&'a str),
}

impl<'a> HelpAction<'a> {
    fn parse(section: &'a str) -> Self {
        match section {
            "close" => Self::Close,
            "menu" => Self::Menu,
            name => Self::Section(name),
        }
    }
}

impl Plugin for System {
    fn name(&self) -> &str {
        "System"
    }

    fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()> {
        let this = self.clone();
        setup.on(event::START).handle(move |args| {
            let this = this.clone();
            async move { this.on_start(args).await }
        });

        let this = self.clone();
        setup.on(event::STOP).handle(move |_| {
            let this = this.clone();
            async move { this.notify("Shutting down system...").await }
        });

        let help_command = filters::private().and(filters::command("help", setup.bot_username()));

        let this = self.clone();
        setup
            .on(event::MESSAGE)
            .filter(help_command)
            .handle(move |args| {
                let this = this.clone();
                async move { this.on_help_command(args).await }
            });

        setup
            .on(event::CALLBACK_QUERY)
            .filter(filters::regex(&format!("^{HELP_PREFIX}(.*)"))?)
            .handle(move |args| {
                let this = self.clone();
                async move { this.on_help_callback(args).await }
            });

        Ok(())
    }
}
