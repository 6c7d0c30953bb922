//! Shared fixtures for unit tests.

use serde_json::{Value, json};
use teloxide::Bot;
use teloxide::types::{CallbackQuery, ChatMemberUpdated, InlineQuery, Message};

pub const GROUP_ID: i64 = -1001234567890;
pub const GROUP_TITLE: &str = "Beecon Community";
pub const USER_ID: u64 = 4242;
pub const USER_NAME: &str = "Alice";

pub fn bot() -> Bot {
    Bot::new("123456:TEST-TOKEN")
}

fn user() -> Value {
    json!({ "id": USER_ID, "is_bot": false, "first_name": USER_NAME, "username": "alice" })
}

fn group_chat() -> Value {
    json!({ "id": GROUP_ID, "type": "supergroup", "title": GROUP_TITLE })
}

fn private_chat() -> Value {
    json!({ "id": USER_ID, "type": "private", "first_name": USER_NAME })
}

fn message_json(chat: Value, text: &str) -> Value {
    json!({
        "message_id": 7,
        "date": 1_700_000_000,
        "chat": chat,
        "from": user(),
        "text": text,
    })
}

pub fn group_message(text: &str) -> Message {
    serde_json::from_value(message_json(group_chat(), text)).unwrap()
}

pub fn private_message(text: &str) -> Message {
    serde_json::from_value(message_json(private_chat(), text)).unwrap()
}

pub fn channel_post(text: &str) -> Message {
    let mut post = message_json(
        json!({ "id": -1009876543210_i64, "type": "channel", "title": "Beecon News" }),
        text,
    );
    post.as_object_mut().unwrap().remove("from");
    serde_json::from_value(post).unwrap()
}

pub fn group_message_from(user_id: u64, first_name: &str, is_bot: bool, text: &str) -> Message {
    let mut msg = message_json(group_chat(), text);
    msg["from"] = json!({ "id": user_id, "is_bot": is_bot, "first_name": first_name });
    serde_json::from_value(msg).unwrap()
}

pub fn callback_query(data: &str) -> CallbackQuery {
    serde_json::from_value(json!({
        "id": "cb-1",
        "from": user(),
        "chat_instance": "instance-1",
        "message": message_json(group_chat(), "menu"),
        "data": data,
    }))
    .unwrap()
}

pub fn inline_query(query: &str) -> InlineQuery {
    serde_json::from_value(json!({
        "id": "iq-1",
        "from": user(),
        "query": query,
        "offset": "",
    }))
    .unwrap()
}

/// A chat member transition in the test group.
pub fn chat_member_update(
    user_id: u64,
    is_bot: bool,
    old_status: &str,
    new_status: &str,
) -> ChatMemberUpdated {
    let member = |status: &str| {
        json!({
            "status": status,
            "user": { "id": user_id, "is_bot": is_bot, "first_name": "Newcomer" },
        })
    };

    serde_json::from_value(json!({
        "chat": group_chat(),
        "from": user(),
        "date": 1_700_000_000,
        "old_chat_member": member(old_status),
        "new_chat_member": member(new_status),
    }))
    .unwrap()
}
