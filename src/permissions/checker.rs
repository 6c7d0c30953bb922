//! Permission checker with caching.

use std::time::Duration;

use moka::sync::Cache;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatMember, ChatMemberKind, UserId};
use tracing::debug;

/// Elevated role of a user in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    Owner,
    Administrator,
}

impl ChatRole {
    fn from_chat_member(member: &ChatMember) -> Option<Self> {
        match &member.kind {
            ChatMemberKind::Owner(_) => Some(Self::Owner),
            ChatMemberKind::Administrator(_) => Some(Self::Administrator),
            _ => None,
        }
    }
}

/// Cache key for role lookups.
type RoleCacheKey = (i64, u64); // (chat_id, user_id)

/// Permission checker with caching support.
///
/// Bot owners (from OWNER_IDS env) pass every check without an API call.
#[derive(Clone)]
pub struct Permissions {
    cache: Cache<RoleCacheKey, Option<ChatRole>>,
    owner_ids: Vec<u64>,
}

impl Permissions {
    pub fn new(owner_ids: Vec<u64>) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .time_to_idle(Duration::from_secs(120)) // 2 minutes idle
            .build();

        Self { cache, owner_ids }
    }

    #[inline]
    pub fn is_bot_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id.0)
    }

    /// Role of `user_id` in `chat_id`, `None` for regular members.
    pub async fn role(
        &self,
        bot: &Bot,
        chat_id: ChatId,
        user_id: UserId,
    ) -> anyhow::Result<Option<ChatRole>> {
        let key = (chat_id.0, user_id.0);

        if let Some(cached) = self.cache.get(&key) {
            debug!("Role cache hit for user {} in chat {}", user_id, chat_id);
            return Ok(cached);
        }

        debug!("Role cache miss for user {} in chat {}", user_id, chat_id);

        let member = bot.get_chat_member(chat_id, user_id).await?;
        let role = ChatRole::from_chat_member(&member);

        // Non-admins are cached too.
        self.cache.insert(key, role);

        Ok(role)
    }

    /// Check if a user is an admin (including owner).
    /// Bot owners always return true.
    pub async fn is_admin(&self, bot: &Bot, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool> {
        if self.is_bot_owner(user_id) {
            return Ok(true);
        }
        Ok(self.role(bot, chat_id, user_id).await?.is_some())
    }

    #[cfg(test)]
    pub(crate) fn remember(&self, chat_id: ChatId, user_id: UserId, role: Option<ChatRole>) {
        self.cache.insert((chat_id.0, user_id.0), role);
    }
}
