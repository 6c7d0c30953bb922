//! Anjani - Telegram community bot
//!
//! Incoming updates become named events routed through a prioritized
//! plugin listener registry.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `dispatch` - Listener registry, event dispatcher, metrics and alerts
//! - `filters` - Predicates gating listeners
//! - `permissions` - Admin checking with caching
//! - `plugins` - Bundled plugins and the plugin manager
//! - `bot` - teloxide adapter (with Throttle for API rate limiting)
//! - `server` - Metrics and health endpoints
//! - `utils` - Utility functions

mod bot;
mod config;
mod dispatch;
mod filters;
mod permissions;
mod plugins;
mod server;
mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use teloxide::adaptors::throttle::Limits;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use dispatch::{
    AlertFanout, AlertmanagerAlerter, EventArgs, EventDispatcher, Metrics, TelegramAlerter, event,
};
use permissions::Permissions;
use plugins::{PluginContext, PluginManager};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("anjani=info,teloxide=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Anjani...");

    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded successfully");
    info!("Bot mode: {:?}", config.bot_mode);

    // Initialize bot with Throttle for automatic rate limiting
    let bot = Bot::new(&config.bot_token).throttle(Limits::default());
    info!("Bot initialized with rate limiting (Throttle)");

    let me = bot.get_me().await?;
    info!("Bot username: @{}", me.username());

    if config.owner_ids.is_empty() {
        info!("No owner IDs configured (OWNER_IDS is empty)");
    } else {
        info!("Bot owners: {:?}", config.owner_ids);
    }

    let metrics = Arc::new(Metrics::new()?);

    let mut alerts = AlertFanout::new();
    if let Some(target) = config.alert_log {
        alerts.push(Arc::new(TelegramAlerter::new(bot.clone(), target)));
    }
    if let Some(url) = &config.alert_api {
        alerts.push(Arc::new(AlertmanagerAlerter::new(
            url.clone(),
            config.alert_user.clone(),
            config.alert_pass.clone(),
        )));
    }
    if alerts.is_empty() {
        warn!("No ALERT_LOG or ALERT_API configured, listener errors are only logged");
    } else {
        info!("Alert sinks configured: {}", alerts.len());
    }

    let events = Arc::new(EventDispatcher::new(
        bot.inner().clone(),
        metrics.clone(),
        Arc::new(alerts),
        config.dispatcher_config(),
    ));

    let ctx = PluginContext {
        bot: bot.clone(),
        config: config.clone(),
        permissions: Arc::new(Permissions::new(config.owner_ids.clone())),
        me: me.id,
    };

    let mut manager = PluginManager::new(events.clone())
        .with_flags(config.plugin_flags.clone())
        .with_bot_username(me.username());
    let loaded = manager.load_all(plugins::builtin(&ctx))?;
    info!("Loaded {} plugins: {:?}", loaded, manager.names());

    events.dispatch(event::LOAD, EventArgs::new()).await;

    let addr = config.web_addr();
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(err) = server::serve(addr, server_metrics).await {
            error!("Metrics server stopped: {err:#}");
        }
    });

    bot::run(&config, bot, events).await
}
