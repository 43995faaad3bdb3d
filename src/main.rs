use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info};

use tg_repeatbot::album::{self, AlbumAggregator};
use tg_repeatbot::config;
use tg_repeatbot::groups::GroupRegistry;
use tg_repeatbot::handlers::{self, AppState};
use tg_repeatbot::messenger::{Messenger, TelegramMessenger};
use tg_repeatbot::repeat::RepeatScheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let groups = GroupRegistry::open(cfg.groups_file()).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let me = bot.get_me().await.context("failed to fetch bot identity")?;
    let bot_username = me.user.username.clone().unwrap_or_default();

    // Spawn album sweeper
    let aggregator = Arc::new(AlbumAggregator::new());
    tokio::spawn(album::run_sweeper(
        aggregator.clone(),
        cfg.sweep_interval(),
        cfg.album_expiry(),
    ));

    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        scheduler: RepeatScheduler::new(messenger.clone(), cfg.interval_limits()),
        aggregator,
        groups,
        messenger,
        bot_username,
        cfg,
    });

    info!(username = %state.bot_username, "starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let state = state.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &state, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
