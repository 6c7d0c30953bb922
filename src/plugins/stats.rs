//! Message statistics plugin.
//!
//! Counts messages per user in each group for the current (UTC) day and
//! accumulates the values reported through `stat_listen`. Admins can read
//! the daily leaderboard with /stats.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, UserId};
use tracing::debug;

use super::{Plugin, PluginSetup};
use crate::bot::ThrottledBot;
use crate::dispatch::{EventArgs, ListenerError, ListenerResult, event};
use crate::filters::{self, FilterExt};
use crate::permissions::Permissions;

const LEADERBOARD_SIZE: usize = 10;

/// Counts of one chat for one day.
#[derive(Debug, Default)]
struct DailyCounts {
    day: Option<NaiveDate>,
    users: HashMap<UserId, (String, u64)>,
}

pub struct MessageStats {
    bot: ThrottledBot,
    permissions: Arc<Permissions>,
    chats: DashMap<ChatId, DailyCounts>,
    stats: DashMap<String, i64>,
}

impl MessageStats {
    pub fn new(bot: ThrottledBot, permissions: Arc<Permissions>) -> Self {
        Self {
            bot,
            permissions,
            chats: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Count one message. Counts from any other day are dropped first.
    pub fn record(&self, chat: ChatId, user: UserId, name: &str, day: NaiveDate) -> u64 {
        let mut counts = self.chats.entry(chat).or_default();
        if counts.day != Some(day) {
            counts.users.clear();
            counts.day = Some(day);
        }

        let entry = counts.users.entry(user).or_insert_with(|| (name.to_string(), 0));
        entry.1 += 1;
        entry.1
    }

    /// Messages sent by `user` in `chat` on `day`.
    pub fn count(&self, chat: ChatId, user: UserId, day: NaiveDate) -> u64 {
        self.chats
            .get(&chat)
            .filter(|counts| counts.day == Some(day))
            .and_then(|counts| counts.users.get(&user).map(|(_, n)| *n))
            .unwrap_or(0)
    }

    /// Most active users of `chat` on `day`, highest count first.
    pub fn top(&self, chat: ChatId, day: NaiveDate, limit: usize) -> Vec<(UserId, String, u64)> {
        let Some(counts) = self.chats.get(&chat).filter(|c| c.day == Some(day)) else {
            return Vec::new();
        };

        let mut top: Vec<_> = counts
            .users
            .iter()
            .map(|(id, (name, n))| (*id, name.clone(), *n))
            .collect();
        top.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.0.cmp(&b.0.0)));
        top.truncate(limit);
        top
    }

    /// Accumulated value of a `stat_listen` stat.
    pub fn stat(&self, name: &str) -> i64 {
        self.stats.get(name).map(|v| *v).unwrap_or(0)
    }

    async fn on_message(&self, args: EventArgs) -> ListenerResult {
        let Some(msg) = args.telegram().and_then(|e| e.as_message()) else {
            return Err(ListenerError::Skip);
        };
        let Some(user) = msg.from.as_ref().filter(|u| !u.is_bot) else {
            return Ok(None);
        };

        let count = self.record(msg.chat.id, user.id, &user.first_name, msg.date.date_naive());
        debug!(chat = %msg.chat.id, user = %user.id, count, "Message counted");

        Ok(None)
    }

    async fn on_stat(&self, args: EventArgs) -> ListenerResult {
        let (Some(name), Some(value)) = (
            args.get(0).and_then(|a| a.as_text()),
            args.get(1).and_then(|a| a.as_int()),
        ) else {
            return Err(ListenerError::Skip);
        };

        let mut total = self.stats.entry(name.to_string()).or_insert(0);
        *total += value;
        Ok(None)
    }

    async fn on_stats_command(&self, args: EventArgs) -> ListenerResult {
        let Some(msg) = args.telegram().and_then(|e| e.as_message()) else {
            return Err(ListenerError::Skip);
        };

        let today = Utc::now().date_naive();
        let top = self.top(msg.chat.id, today, LEADERBOARD_SIZE);

        self.bot
            .send_message(msg.chat.id, leaderboard_text(&top))
            .parse_mode(ParseMode::Html)
            .await?;

        Ok(Some(json!(top.len())))
    }
}

fn leaderboard_text(top: &[(UserId, String, u64)]) -> String {
    if top.is_empty() {
        return "No messages counted today.".to_string();
    }

    let mut text = String::from("<b>Most active today</b>\n");
    for (rank, (id, name, count)) in top.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. <a href=\"tg://user?id={}\">{}</a> - {}",
            rank + 1,
            id,
            crate::utils::html_escape(name),
            count
        ));
    }
    text
}

impl Plugin for MessageStats {
    fn name(&self) -> &str {
        "Message Stats"
    }

    fn help(&self) -> Option<&str> {
        Some("/stats - today's most active members (admins only)")
    }

    fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()> {
        let stats_command = filters::group()
            .and(filters::command("stats", setup.bot_username()))
            .and(filters::admin(self.permissions.clone()));

        let this = self.clone();
        setup
            .on(event::MESSAGE)
            .priority(10)
            .filter(stats_command)
            .name("MessageStats.stats_command")
            .handle(move |args| {
                let this = this.clone();
                async move { this.on_stats_command(args).await }
            });

        let this = self.clone();
        setup
            .on(event::MESSAGE)
            .filter(filters::group())
            .handle(move |args| {
                let this = this.clone();
                async move { this.on_message(args).await }
            });

        setup.on(event::STAT_LISTEN).handle(move |args| {
            let this = self.clone();
            async move { this.on_stat(args).await }
        });

        Ok(())
    }
}
