use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::Chat;
use teloxide::utils::command::BotCommands;
use tracing::{info, instrument, warn};

use crate::album::AlbumAggregator;
use crate::config::Config;
use crate::groups::{self, GroupRegistry};
use crate::messenger::Messenger;
use crate::model::ResolvedAlbum;
use crate::repeat::{parse_interval, IntervalLimits, RepeatError, RepeatScheduler};

const BROADCAST_CONCURRENCY: usize = 4;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "reply to a message to repost it every <interval> (90, 15m, 2h).")]
    Repeat(String),
    #[command(description = "stop every repeat in this chat.")]
    Stop,
    #[command(description = "owner only: reply to a message to copy it to every known group.")]
    Broadcast,
    #[command(description = "owner only: count known groups.")]
    Groups,
    #[command(description = "health check.")]
    Ping,
    #[command(description = "show this text.")]
    Help,
}

/// Everything the update handler needs, shared across updates.
pub struct AppState {
    pub cfg: Config,
    pub aggregator: Arc<AlbumAggregator>,
    pub scheduler: RepeatScheduler,
    pub groups: GroupRegistry,
    pub messenger: Arc<dyn Messenger>,
    pub bot_username: String,
}

#[instrument(skip_all, fields(chat_id = msg.chat.id.0, message_id = msg.id.0))]
pub async fn handle_update(bot: &Bot, state: &Arc<AppState>, msg: &Message) -> Result<()> {
    let chat_id = msg.chat.id.0;

    if is_group_chat(&msg.chat) {
        if let Err(err) = state.groups.record(chat_id).await {
            warn!(?err, "failed to record group");
        }
    }

    if let Some(group_id) = msg.media_group_id() {
        state
            .aggregator
            .append(chat_id, &group_id.to_string(), msg.id.0)
            .await;
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Ok(command) = Command::parse(text, &state.bot_username) else {
        return Ok(());
    };

    match command {
        Command::Repeat(arg) => handle_repeat(bot, state, msg, &arg).await?,
        Command::Stop => {
            if !require_admin(bot, msg, "stop").await {
                return Ok(());
            }
            let stopped = state.scheduler.stop_all(chat_id).await;
            let reply = if stopped == 0 {
                "Nothing is repeating here.".to_string()
            } else {
                format!("Stopped {} repeat job(s).", stopped)
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
        }
        Command::Broadcast => handle_broadcast(bot, state, msg).await?,
        Command::Groups => {
            if !is_owner(&state.cfg, msg) {
                return Ok(());
            }
            let count = state.groups.len().await;
            let _ = bot
                .send_message(msg.chat.id, format!("Known groups: {}", count))
                .await;
        }
        Command::Ping => {
            let _ = bot.send_message(msg.chat.id, "PONG").await;
        }
        Command::Help => {
            let _ = bot
                .send_message(msg.chat.id, Command::descriptions().to_string())
                .await;
        }
    }

    Ok(())
}

async fn handle_repeat(bot: &Bot, state: &Arc<AppState>, msg: &Message, arg: &str) -> Result<()> {
    if !require_admin(bot, msg, "repeat").await {
        return Ok(());
    }

    let Some(target) = msg.reply_to_message() else {
        let _ = bot
            .send_message(msg.chat.id, "Reply to the message you want to repeat.")
            .await;
        return Ok(());
    };

    let seconds = match validate_repeat_arg(arg, state.scheduler.limits()) {
        Ok(seconds) => seconds,
        Err(reason) => {
            let _ = bot.send_message(msg.chat.id, reason).await;
            return Ok(());
        }
    };

    let chat_id = msg.chat.id;
    let target_id = target.id.0;
    let group_id = target.media_group_id().map(|id| id.to_string());
    if let Some(group_id) = group_id.as_deref() {
        // The reply carries the target itself; make sure it is buffered even
        // if its own update was missed.
        state.aggregator.append(chat_id.0, group_id, target_id).await;
    }

    // A /stop handled while the album resolves must cancel this request too.
    let generation = state.scheduler.stop_generation(chat_id.0).await;

    // Album fragments for this chat keep arriving while we wait, so resolve
    // off the update handler.
    let bot = bot.clone();
    let state = state.clone();
    tokio::spawn(async move {
        let resolved = match group_id {
            Some(group_id) => {
                state
                    .aggregator
                    .resolve(chat_id.0, &group_id, target_id, &state.cfg.resolve_policy())
                    .await
            }
            None => ResolvedAlbum::single(target_id),
        };
        let items = resolved.items.len();
        match state
            .scheduler
            .start_unless_stopped(
                chat_id.0,
                generation,
                resolved.items,
                seconds,
                resolved.is_album,
            )
            .await
        {
            Ok(handle) => {
                info!(job_id = %handle.id(), chat_id = chat_id.0, items, "repeat requested");
                let what = if resolved.is_album {
                    format!("album of {} items", items)
                } else {
                    "message".to_string()
                };
                let _ = bot
                    .send_message(
                        chat_id,
                        format!("Repeating this {} every {}.", what, format_interval(seconds)),
                    )
                    .await;
            }
            Err(RepeatError::Cancelled) => {}
            Err(err) => {
                let _ = bot.send_message(chat_id, err.to_string()).await;
            }
        }
    });

    Ok(())
}

async fn handle_broadcast(bot: &Bot, state: &Arc<AppState>, msg: &Message) -> Result<()> {
    if !is_owner(&state.cfg, msg) {
        return Ok(());
    }
    let Some(target) = msg.reply_to_message() else {
        let _ = bot
            .send_message(msg.chat.id, "Reply to the message you want to broadcast.")
            .await;
        return Ok(());
    };

    let targets = state.groups.all().await;
    if targets.is_empty() {
        let _ = bot.send_message(msg.chat.id, "No known groups yet.").await;
        return Ok(());
    }

    let chat_id = msg.chat.id;
    let message_id = target.id.0;
    let bot = bot.clone();
    let messenger = state.messenger.clone();
    tokio::spawn(async move {
        let report = groups::broadcast(
            messenger,
            &targets,
            chat_id.0,
            message_id,
            BROADCAST_CONCURRENCY,
        )
        .await;
        let _ = bot
            .send_message(
                chat_id,
                format!(
                    "Broadcast finished: {} delivered, {} failed.",
                    report.delivered, report.failed
                ),
            )
            .await;
    });

    Ok(())
}

fn is_group_chat(chat: &Chat) -> bool {
    chat.is_group() || chat.is_supergroup()
}

fn is_owner(cfg: &Config, msg: &Message) -> bool {
    msg.from
        .as_ref()
        .is_some_and(|user| user.id.0 as i64 == cfg.telegram.owner_id)
}

/// Reply with a rejection and return false unless the sender may run
/// `/{command}` in this chat.
async fn require_admin(bot: &Bot, msg: &Message, command: &str) -> bool {
    let check = is_admin(bot, msg).await;
    if let Err(err) = &check {
        warn!(?err, command, "failed to verify permissions");
    }
    match admin_rejection(&check, command) {
        None => true,
        Some(reason) => {
            let _ = bot.send_message(msg.chat.id, reason).await;
            false
        }
    }
}

fn admin_rejection(check: &Result<bool>, command: &str) -> Option<String> {
    match check {
        Ok(true) => None,
        Ok(false) => Some(format!("Only chat administrators can use /{command}.")),
        Err(_) => Some(format!(
            "Could not verify your permissions for /{command}; please try again."
        )),
    }
}

/// Private chats belong to the user; elsewhere the sender must be an
/// administrator or the creator.
async fn is_admin(bot: &Bot, msg: &Message) -> Result<bool> {
    if msg.chat.is_private() {
        return Ok(true);
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(false);
    };
    let member = bot
        .get_chat_member(msg.chat.id, user.id)
        .await
        .context("failed to look up chat member")?;
    Ok(member.is_privileged())
}

/// Turn the `/repeat` argument into seconds, or a plain-text rejection.
fn validate_repeat_arg(arg: &str, limits: IntervalLimits) -> Result<u64, String> {
    let seconds = parse_interval(arg).map_err(|err| format!("{err}. Usage: /repeat 15m"))?;
    limits.check(seconds).map_err(|err| err.to_string())?;
    Ok(seconds)
}

fn format_interval(seconds: u64) -> String {
    match seconds {
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}
