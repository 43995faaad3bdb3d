//! Repeating reposts per chat.
//!
//! Each `/repeat` creates an independent [`JobHandle`] whose worker deletes the
//! copies it posted last time, posts fresh copies and sleeps for its interval.
//! Jobs are grouped by chat so `/stop` can cancel all of them at once.
//! Cancellation is cooperative: the worker checks its running flag once per
//! cycle, so a cycle already under way completes first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::messenger::Messenger;

mod job;

pub use job::JobHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepeatError {
    #[error("interval must be between {min} and {max} seconds, got {seconds}")]
    IntervalOutOfRange { seconds: u64, min: u64, max: u64 },
    #[error("nothing to repeat")]
    NoContent,
    #[error("repeat cancelled by /stop")]
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalParseError {
    #[error("missing interval")]
    Missing,
    #[error("cannot read interval `{0}`; use seconds or a suffix like 90s, 15m, 2h")]
    Malformed(String),
}

/// Accepted range for repeat intervals, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalLimits {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl Default for IntervalLimits {
    fn default() -> Self {
        Self {
            min_seconds: 60,
            max_seconds: 86_400,
        }
    }
}

impl IntervalLimits {
    pub fn check(&self, seconds: u64) -> Result<Duration, RepeatError> {
        if seconds == 0 || seconds < self.min_seconds || seconds > self.max_seconds {
            return Err(RepeatError::IntervalOutOfRange {
                seconds,
                min: self.min_seconds,
                max: self.max_seconds,
            });
        }
        Ok(Duration::from_secs(seconds))
    }
}

static INTERVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(\d{1,9})\s*([smh]?)$").expect("valid interval regex"));

/// Parse a `/repeat` argument such as `90`, `90s`, `15m` or `2h` into seconds.
pub fn parse_interval(text: &str) -> Result<u64, IntervalParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(IntervalParseError::Missing);
    }
    let caps = INTERVAL_RE
        .captures(trimmed)
        .ok_or_else(|| IntervalParseError::Malformed(trimmed.to_string()))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|_| IntervalParseError::Malformed(trimmed.to_string()))?;
    let multiplier = match caps[2].to_ascii_lowercase().as_str() {
        "m" => 60,
        "h" => 3_600,
        _ => 1,
    };
    Ok(value * multiplier)
}

/// Jobs of one chat plus a counter bumped by every `stop_all`.
#[derive(Debug, Default)]
struct ChatJobs {
    stop_generation: u64,
    jobs: Vec<JobHandle>,
}

/// Owns every active repeat job, keyed by chat.
pub struct RepeatScheduler {
    messenger: Arc<dyn Messenger>,
    limits: IntervalLimits,
    chats: Mutex<HashMap<i64, ChatJobs>>,
}

impl RepeatScheduler {
    pub fn new(messenger: Arc<dyn Messenger>, limits: IntervalLimits) -> Self {
        Self {
            messenger,
            limits,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> IntervalLimits {
        self.limits
    }

    /// Current stop generation of `chat_id`. Capture it before any delay
    /// between a `/repeat` request and its [`start_unless_stopped`] call.
    ///
    /// [`start_unless_stopped`]: RepeatScheduler::start_unless_stopped
    pub async fn stop_generation(&self, chat_id: i64) -> u64 {
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .map_or(0, |chat| chat.stop_generation)
    }

    /// Validate and start a new repeat job for `chat_id`. Returns without
    /// waiting for the first cycle.
    ///
    /// Existing jobs in the chat are left alone; overlapping jobs interleave.
    pub async fn start(
        &self,
        chat_id: i64,
        item_ids: Vec<i32>,
        interval_seconds: u64,
        is_album: bool,
    ) -> Result<JobHandle, RepeatError> {
        self.register(chat_id, None, item_ids, interval_seconds, is_album)
            .await
    }

    /// Like [`start`](RepeatScheduler::start), but refuses with
    /// [`RepeatError::Cancelled`] if `stop_all` ran for the chat since
    /// `generation` was read.
    pub async fn start_unless_stopped(
        &self,
        chat_id: i64,
        generation: u64,
        item_ids: Vec<i32>,
        interval_seconds: u64,
        is_album: bool,
    ) -> Result<JobHandle, RepeatError> {
        self.register(chat_id, Some(generation), item_ids, interval_seconds, is_album)
            .await
    }

    async fn register(
        &self,
        chat_id: i64,
        generation: Option<u64>,
        item_ids: Vec<i32>,
        interval_seconds: u64,
        is_album: bool,
    ) -> Result<JobHandle, RepeatError> {
        let interval = self.limits.check(interval_seconds)?;
        if item_ids.is_empty() {
            return Err(RepeatError::NoContent);
        }

        let mut chats = self.chats.lock().await;
        let chat = chats.entry(chat_id).or_default();
        if generation.is_some_and(|expected| expected != chat.stop_generation) {
            info!(chat_id, "repeat request dropped: chat was stopped meanwhile");
            return Err(RepeatError::Cancelled);
        }

        let handle = JobHandle::new(chat_id, item_ids, interval, is_album);
        chat.jobs.push(handle.clone());
        handle.spawn(self.messenger.clone());
        info!(
            job_id = %handle.id(),
            chat_id,
            is_album,
            interval_secs = interval_seconds,
            active = chat.jobs.len(),
            "repeat job registered"
        );
        Ok(handle)
    }

    /// Stop every job in `chat_id` and invalidate starts still pending for
    /// it. Returns how many jobs were stopped; a chat without jobs is a no-op.
    pub async fn stop_all(&self, chat_id: i64) -> usize {
        let removed = {
            let mut chats = self.chats.lock().await;
            let chat = chats.entry(chat_id).or_default();
            chat.stop_generation += 1;
            std::mem::take(&mut chat.jobs)
        };
        for handle in &removed {
            handle.cancel();
        }
        if !removed.is_empty() {
            info!(chat_id, stopped = removed.len(), "repeat jobs stopped");
        }
        removed.len()
    }

    pub async fn active_jobs(&self, chat_id: i64) -> usize {
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .map_or(0, |chat| chat.jobs.len())
    }

    /// Chats that currently have at least one job.
    pub async fn chats(&self) -> Vec<i64> {
        let mut chats: Vec<i64> = self
            .chats
            .lock()
            .await
            .iter()
            .filter(|(_, chat)| !chat.jobs.is_empty())
            .map(|(chat_id, _)| *chat_id)
            .collect();
        chats.sort_unstable();
        chats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval_units() {
        assert_eq!(parse_interval("90"), Ok(90));
        assert_eq!(parse_interval(" 90s "), Ok(90));
        assert_eq!(parse_interval("15m"), Ok(900));
        assert_eq!(parse_interval("2H"), Ok(7_200));
        assert_eq!(parse_interval("0"), Ok(0));
    }

    #[test]
    fn parse_interval_rejects_garbage() {
        assert_eq!(parse_interval(""), Err(IntervalParseError::Missing));
        assert!(matches!(parse_interval("-5"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(parse_interval("soon"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(parse_interval("5d"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(parse_interval("1.5m"), Err(IntervalParseError::Malformed(_))));
    }

    #[test]
    fn limits_reject_out_of_range() {
        let limits = IntervalLimits::default();
        assert_eq!(limits.check(60), Ok(Duration::from_secs(60)));
        assert_eq!(
            limits.check(0),
            Err(RepeatError::IntervalOutOfRange {
                seconds: 0,
                min: 60,
                max: 86_400
            })
        );
        assert!(limits.check(59).is_err());
        assert!(limits.check(86_401).is_err());

        let permissive = IntervalLimits {
            min_seconds: 0,
            max_seconds: 10,
        };
        assert!(permissive.check(0).is_err());
    }
}
