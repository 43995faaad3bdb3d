use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use teloxide::prelude::*;
use teloxide::types::MessageId;

/// Outbound Telegram operations used by repeat jobs and broadcasts.
///
/// Every call may fail; callers decide whether a failure matters.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Copy one message into `chat_id`, returning the new message id.
    async fn copy_message(&self, chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<i32>;

    /// Copy an ordered set of messages (an album) into `chat_id`, returning
    /// the new ids in the same order.
    async fn copy_messages(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_ids: &[i32],
    ) -> Result<Vec<i32>>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;
}

/// [`Messenger`] backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl fmt::Debug for TelegramMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramMessenger").finish_non_exhaustive()
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn copy_message(&self, chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<i32> {
        let copied = self
            .bot
            .copy_message(ChatId(chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await
            .with_context(|| format!("copyMessage {message_id} into chat {chat_id} failed"))?;
        Ok(copied.0)
    }

    async fn copy_messages(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_ids: &[i32],
    ) -> Result<Vec<i32>> {
        let ids = message_ids.iter().copied().map(MessageId);
        let copied = self
            .bot
            .copy_messages(ChatId(chat_id), ChatId(from_chat_id), ids)
            .await
            .with_context(|| {
                format!(
                    "copyMessages of {} items into chat {chat_id} failed",
                    message_ids.len()
                )
            })?;
        Ok(copied.into_iter().map(|id| id.0).collect())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .with_context(|| format!("deleteMessage {message_id} in chat {chat_id} failed"))?;
        Ok(())
    }
}
