//! Chat role lookups.
//!
//! Used by the `admin` filter. Results of `get_chat_member` are cached so a
//! busy group does not cost one API call per message.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let perms = Permissions::new(config.owner_ids.clone());
//!
//! if perms.is_admin(&bot, chat_id, user_id).await? {
//!     // ...
//! }
//! ```

mod checker;

pub use checker::{ChatRole, Permissions};
