//! Album buffering.
//!
//! Telegram delivers each item of a media group as its own update, sharing a
//! `media_group_id`, and never says when the group is complete. The
//! [`AlbumAggregator`] collects fragment message ids per (chat, group) and
//! [`AlbumAggregator::resolve`] waits a bounded, growing amount of time for a
//! group to fill up before handing its items to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument};

use crate::model::{AlbumKey, ResolvedAlbum};

/// Fragments seen so far for one album.
#[derive(Debug, Clone)]
pub struct AlbumBuffer {
    /// Message ids in arrival order.
    pub items: Vec<i32>,
    pub updated_at: Instant,
}

/// Timings for [`AlbumAggregator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub max_wait: Duration,
    pub poll_initial: Duration,
    pub poll_step: Duration,
    pub poll_max: Duration,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(4_500),
            poll_initial: Duration::from_millis(350),
            poll_step: Duration::from_millis(150),
            poll_max: Duration::from_millis(800),
        }
    }
}

impl ResolvePolicy {
    /// Upper bound on poll iterations: the poll interval never shrinks below
    /// `poll_initial`, so this many ticks always cover `max_wait`.
    pub fn max_iterations(&self) -> u32 {
        let initial = self.poll_initial.as_millis().max(1);
        let iterations = self.max_wait.as_millis().div_ceil(initial);
        u32::try_from(iterations).unwrap_or(u32::MAX).max(1)
    }

    fn next_poll(&self, current: Duration) -> Duration {
        (current + self.poll_step).min(self.poll_max)
    }
}

#[derive(Debug, Default)]
pub struct AlbumAggregator {
    buffers: Mutex<HashMap<AlbumKey, AlbumBuffer>>,
}

impl AlbumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `item_id` arrived as part of album `group_id` in `chat_id`.
    pub async fn append(&self, chat_id: i64, group_id: &str, item_id: i32) {
        self.append_at(chat_id, group_id, item_id, Instant::now()).await;
    }

    async fn append_at(&self, chat_id: i64, group_id: &str, item_id: i32, now: Instant) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers
            .entry(AlbumKey::new(chat_id, group_id))
            .or_insert_with(|| AlbumBuffer {
                items: Vec::new(),
                updated_at: now,
            });
        // Redelivered updates carry the same id; the timestamp still moves.
        if !buffer.items.contains(&item_id) {
            buffer.items.push(item_id);
        }
        buffer.updated_at = now;
        debug!(chat_id, group_id, item_id, items = buffer.items.len(), "album fragment buffered");
    }

    /// Items buffered for the album, in arrival order.
    pub async fn items(&self, chat_id: i64, group_id: &str) -> Option<Vec<i32>> {
        let buffers = self.buffers.lock().await;
        buffers
            .get(&AlbumKey::new(chat_id, group_id))
            .map(|buffer| buffer.items.clone())
    }

    pub async fn len(&self) -> usize {
        self.buffers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffers.lock().await.is_empty()
    }

    async fn item_count(&self, key: &AlbumKey) -> Option<usize> {
        self.buffers.lock().await.get(key).map(|b| b.items.len())
    }

    /// Wait for the album containing `fallback_item_id` to fill up, then
    /// return its items in ascending id order.
    ///
    /// Stops polling as soon as more than one item is buffered or once
    /// `policy.max_wait` has elapsed. An unknown album gets one extra poll tick
    /// before falling back to `[fallback_item_id]`.
    #[instrument(skip(self, policy))]
    pub async fn resolve(
        &self,
        chat_id: i64,
        group_id: &str,
        fallback_item_id: i32,
        policy: &ResolvePolicy,
    ) -> ResolvedAlbum {
        let key = AlbumKey::new(chat_id, group_id);
        let started = Instant::now();
        let mut poll = policy.poll_initial;
        let mut missed = false;

        for _ in 0..policy.max_iterations() {
            match self.item_count(&key).await {
                Some(count) if count > 1 => break,
                None if missed => break,
                None => missed = true,
                Some(_) => {}
            }
            let remaining = policy.max_wait.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(poll.min(remaining)).await;
            poll = policy.next_poll(poll);
        }

        let resolved = match self.items(chat_id, group_id).await {
            Some(items) if !items.is_empty() => ResolvedAlbum::from_items(items),
            _ => ResolvedAlbum::single(fallback_item_id),
        };
        debug!(
            items = resolved.items.len(),
            is_album = resolved.is_album,
            waited_ms = started.elapsed().as_millis() as u64,
            "album resolved"
        );
        resolved
    }

    /// Drop every buffer idle for longer than `expiry` as of `now`.
    /// Returns the number of buffers removed.
    pub async fn sweep(&self, now: Instant, expiry: Duration) -> usize {
        let mut buffers = self.buffers.lock().await;
        let before = buffers.len();
        buffers.retain(|_, buffer| now.saturating_duration_since(buffer.updated_at) <= expiry);
        before - buffers.len()
    }
}

/// Periodically evict stale album buffers. Runs until the task is dropped.
pub async fn run_sweeper(aggregator: Arc<AlbumAggregator>, every: Duration, expiry: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = aggregator.sweep(Instant::now(), expiry).await;
        if removed > 0 {
            debug!(removed, "swept expired album buffers");
        }
    }
}
