//! Plugin system.
//!
//! A plugin registers its listeners explicitly from [`Plugin::setup`]:
//!
//! ```rust,ignore
//! fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()> {
//!     let this = self.clone();
//!     let ping = filters::command("ping", setup.bot_username());
//!     setup
//!         .on(event::MESSAGE)
//!         .filter(ping)
//!         .handle(move |args| {
//!             let this = this.clone();
//!             async move { this.ping(args).await }
//!         });
//!     Ok(())
//! }
//! ```
//!
//! Add new plugins by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_plugin;` below
//! 3. Adding it to [`builtin`]

pub mod ping;
pub mod stats;
pub mod system;
pub mod welcome;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::bot::ThrottledBot;
use crate::config::{Config, plugin_flag};
use crate::dispatch::{
    EventArgs, EventDispatcher, Listener, ListenerResult, NewListener, PluginHandle,
};
use crate::filters::BoxedFilter;
use crate::permissions::Permissions;

pub use ping::Ping;
pub use stats::MessageStats;
pub use system::System;
pub use welcome::Welcome;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is already loaded")]
    Duplicate(String),

    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("failed to set up plugin '{name}'")]
    Setup {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A bundle of listeners loaded and unloaded together.
pub trait Plugin: Send + Sync + 'static {
    /// Display name, also used for `PLUGIN_FLAG` matching.
    fn name(&self) -> &str;

    /// Short help text shown by the help menu.
    fn help(&self) -> Option<&str> {
        None
    }

    fn setup(self: Arc<Self>, setup: &mut PluginSetup<'_>) -> anyhow::Result<()>;
}

/// Registration context handed to [`Plugin::setup`].
pub struct PluginSetup<'a> {
    dispatcher: &'a EventDispatcher,
    owner: PluginHandle,
    bot_username: &'a str,
    registered: Vec<Listener>,
}

impl<'a> PluginSetup<'a> {
    fn new(dispatcher: &'a EventDispatcher, owner: PluginHandle, bot_username: &'a str) -> Self {
        Self {
            dispatcher,
            owner,
            bot_username,
            registered: Vec::new(),
        }
    }

    pub fn owner(&self) -> &PluginHandle {
        &self.owner
    }

    /// Username commands must be addressed to when they carry `@bot`.
    pub fn bot_username(&self) -> &'a str {
        self.bot_username
    }

    /// Start registering a listener for `event`.
    pub fn on(&mut self, event: impl Into<String>) -> ListenerBuilder<'_, 'a> {
        ListenerBuilder {
            setup: self,
            event: event.into(),
            priority: None,
            filter: None,
            name: None,
        }
    }

    fn rollback(&mut self) -> usize {
        let dispatcher = self.dispatcher;
        self.registered
            .drain(..)
            .filter(|listener| dispatcher.unregister(listener))
            .count()
    }
}

pub struct ListenerBuilder<'s, 'a> {
    setup: &'s mut PluginSetup<'a>,
    event: String,
    priority: Option<i32>,
    filter: Option<BoxedFilter>,
    name: Option<String>,
}

impl ListenerBuilder<'_, '_> {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn filter(mut self, filter: BoxedFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register `f` and return the live listener.
    pub fn handle<F, Fut>(self, f: F) -> Listener
    where
        F: Fn(EventArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let mut new = NewListener::new(self.event, self.setup.owner.clone(), f);
        if let Some(priority) = self.priority {
            new = new.priority(priority);
        }
        if let Some(filter) = self.filter {
            new = new.filter(filter);
        }
        if let Some(name) = self.name {
            new = new.name(name);
        }

        let listener = self.setup.dispatcher.register(new);
        self.setup.registered.push(listener.clone());
        listener
    }
}

/// Loads plugins into an [`EventDispatcher`] and tracks what they own.
pub struct PluginManager {
    dispatcher: Arc<EventDispatcher>,
    flags: HashSet<String>,
    bot_username: String,
    loaded: BTreeMap<String, PluginHandle>,
}

impl PluginManager {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dispatcher,
            flags: HashSet::new(),
            bot_username: String::new(),
            loaded: BTreeMap::new(),
        }
    }

    /// The bot's own username, without the leading `@`.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = username.into();
        self
    }

    /// `PLUGIN_FLAG` entries, e.g. `disable_ping_plugin`.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = String>) -> Self {
        self.flags.extend(flags.into_iter().map(|f| f.to_lowercase()));
        self
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.flags.contains(&plugin_flag(name))
    }

    /// Load `plugin`. Returns `Ok(None)` when a flag disables it.
    ///
    /// If setup fails, every listener it registered is removed again.
    pub fn load(&mut self, plugin: Arc<dyn Plugin>) -> Result<Option<PluginHandle>, PluginError> {
        let name = plugin.name().to_string();

        if self.is_disabled(&name) {
            info!(plugin = %name, "Plugin disabled by flag, skipping");
            return Ok(None);
        }

        if self.loaded.contains_key(&name) {
            return Err(PluginError::Duplicate(name));
        }

        let handle = PluginHandle::new(name.as_str());
        let mut setup = PluginSetup::new(&self.dispatcher, handle.clone(), &self.bot_username);

        if let Err(source) = plugin.setup(&mut setup) {
            let removed = setup.rollback();
            warn!(plugin = %name, removed, "Plugin setup failed, listeners removed");
            return Err(PluginError::Setup { name, source });
        }

        info!(plugin = %name, listeners = setup.registered.len(), "Plugin loaded");
        self.loaded.insert(name, handle.clone());

        Ok(Some(handle))
    }

    /// Load several plugins, stopping at the first error.
    pub fn load_all(
        &mut self,
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> Result<usize, PluginError> {
        let mut count = 0;
        for plugin in plugins {
            if self.load(plugin)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove a plugin and all of its listeners.
    pub fn unload(&mut self, name: &str) -> Result<usize, PluginError> {
        let handle = self
            .loaded
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;

        let removed = self.dispatcher.unregister_all(&handle);
        info!(plugin = name, removed, "Plugin unloaded");
        Ok(removed)
    }

    /// Names of the loaded plugins, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.loaded.keys().map(String::as_str).collect()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }
}

/// Everything the bundled plugins need at construction.
#[derive(Clone)]
pub struct PluginContext {
    pub bot: ThrottledBot,
    pub config: Arc<Config>,
    pub permissions: Arc<Permissions>,
    pub me: teloxide::types::UserId,
}

/// The bundled plugins, in load order.
pub fn builtin(ctx: &PluginContext) -> Vec<Arc<dyn Plugin>> {
    let ping: Arc<dyn Plugin> = Arc::new(Ping::new(ctx.bot.clone()));
    let stats: Arc<dyn Plugin> = Arc::new(MessageStats::new(ctx.bot.clone(), ctx.permissions.clone()));
    let welcome: Arc<dyn Plugin> = Arc::new(Welcome::new(ctx.bot.clone(), ctx.me));

    let help: Vec<(String, String)> = [&ping, &stats, &welcome]
        .iter()
        .filter_map(|p| p.help().map(|h| (p.name().to_string(), h.to_string())))
        .collect();

    let system: Arc<dyn Plugin> = Arc::new(System::new(ctx.bot.clone(), ctx.config.log_channel, help));

    vec![system, ping, stats, welcome]
}
