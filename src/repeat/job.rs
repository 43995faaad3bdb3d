//! A single repeating job and its worker loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::messenger::Messenger;

/// State shared between a [`JobHandle`] and its worker.
#[derive(Debug)]
pub(crate) struct RepeatJob {
    id: Uuid,
    chat_id: i64,
    items: Vec<i32>,
    interval: Duration,
    is_album: bool,
    running: AtomicBool,
    wake: Notify,
    last_sent: Mutex<Vec<i32>>,
    cycles: AtomicU64,
}

/// Handle to a running repeat job. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct JobHandle {
    inner: Arc<RepeatJob>,
}

impl JobHandle {
    pub(crate) fn new(chat_id: i64, items: Vec<i32>, interval: Duration, is_album: bool) -> Self {
        Self {
            inner: Arc::new(RepeatJob {
                id: Uuid::new_v4(),
                chat_id,
                items,
                interval,
                is_album,
                running: AtomicBool::new(true),
                wake: Notify::new(),
                last_sent: Mutex::new(Vec::new()),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn chat_id(&self) -> i64 {
        self.inner.chat_id
    }

    pub fn items(&self) -> &[i32] {
        &self.inner.items
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_album(&self) -> bool {
        self.inner.is_album
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Number of completed delete/send cycles.
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Acquire)
    }

    /// Ids of the copies posted by the most recent cycle.
    pub async fn last_sent(&self) -> Vec<i32> {
        self.inner.last_sent.lock().await.clone()
    }

    /// Clear the running flag and wake the worker if it is waiting out its
    /// interval. A send already in flight is not interrupted.
    pub(crate) fn cancel(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.wake.notify_one();
    }

    pub(crate) fn spawn(&self, messenger: Arc<dyn Messenger>) {
        let job = self.inner.clone();
        tokio::spawn(run(job, messenger));
    }
}

async fn run(job: Arc<RepeatJob>, messenger: Arc<dyn Messenger>) {
    info!(
        job_id = %job.id,
        chat_id = job.chat_id,
        items = job.items.len(),
        interval_secs = job.interval.as_secs(),
        "repeat job started"
    );

    while job.running.load(Ordering::Acquire) {
        let previous = std::mem::take(&mut *job.last_sent.lock().await);
        for message_id in previous {
            if let Err(err) = messenger.delete_message(job.chat_id, message_id).await {
                warn!(?err, job_id = %job.id, chat_id = job.chat_id, message_id, "failed to delete previous copy");
            }
        }

        let sent = send_copy(&job, messenger.as_ref()).await;
        *job.last_sent.lock().await = sent;
        job.cycles.fetch_add(1, Ordering::AcqRel);

        tokio::select! {
            _ = tokio::time::sleep(job.interval) => {}
            _ = job.wake.notified() => {}
        }
    }

    info!(job_id = %job.id, chat_id = job.chat_id, cycles = job.cycles.load(Ordering::Acquire), "repeat job stopped");
}

/// Post one copy of the job's content. An empty list means nothing was sent.
async fn send_copy(job: &RepeatJob, messenger: &dyn Messenger) -> Vec<i32> {
    if job.is_album {
        match messenger
            .copy_messages(job.chat_id, job.chat_id, &job.items)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                warn!(?err, job_id = %job.id, chat_id = job.chat_id, "failed to repost album");
                Vec::new()
            }
        }
    } else {
        let Some(&message_id) = job.items.first() else {
            return Vec::new();
        };
        match messenger
            .copy_message(job.chat_id, job.chat_id, message_id)
            .await
        {
            Ok(id) => vec![id],
            Err(err) => {
                warn!(?err, job_id = %job.id, chat_id = job.chat_id, message_id, "failed to repost message");
                Vec::new()
            }
        }
    }
}
