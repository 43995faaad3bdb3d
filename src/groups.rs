//! Known-group registry and owner broadcasts.
//!
//! Groups are kept in memory and mirrored to an append-only text file with
//! one `<chat_id>\t<first_seen>` line per group.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::messenger::Messenger;

#[derive(Debug)]
pub struct GroupRegistry {
    path: PathBuf,
    known: Mutex<HashSet<i64>>,
}

impl GroupRegistry {
    /// Load the registry from `path`. A missing file is an empty registry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let known = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_groups(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read groups file {}", path.display()))
            }
        };
        info!(groups = known.len(), path = %path.display(), "loaded group registry");
        Ok(Self {
            path,
            known: Mutex::new(known),
        })
    }

    /// Remember `chat_id`. Returns true when the group was not known before.
    pub async fn record(&self, chat_id: i64) -> Result<bool> {
        let mut known = self.known.lock().await;
        if known.contains(&chat_id) {
            return Ok(false);
        }

        let line = format!(
            "{}\t{}\n",
            chat_id,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open groups file {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("failed to append to groups file")?;
        file.flush().await.context("failed to flush groups file")?;

        known.insert(chat_id);
        info!(chat_id, total = known.len(), "recorded new group");
        Ok(true)
    }

    pub async fn all(&self) -> Vec<i64> {
        let mut groups: Vec<i64> = self.known.lock().await.iter().copied().collect();
        groups.sort_unstable();
        groups
    }

    pub async fn len(&self) -> usize {
        self.known.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.known.lock().await.is_empty()
    }
}

fn parse_groups(content: &str) -> HashSet<i64> {
    let mut groups = HashSet::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id = line.split('\t').next().unwrap_or_default();
        match id.trim().parse::<i64>() {
            Ok(chat_id) => {
                groups.insert(chat_id);
            }
            Err(_) => warn!(line = lineno + 1, "skipping malformed groups file line"),
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Copy one message to every group, at most `concurrency` sends at a time.
pub async fn broadcast(
    messenger: Arc<dyn Messenger>,
    groups: &[i64],
    from_chat_id: i64,
    message_id: i32,
    concurrency: usize,
) -> BroadcastReport {
    let results: Vec<bool> = stream::iter(groups.iter().copied())
        .map(|chat_id| {
            let messenger = messenger.clone();
            async move {
                match messenger.copy_message(chat_id, from_chat_id, message_id).await {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(?err, chat_id, "broadcast delivery failed");
                        false
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let delivered = results.iter().filter(|ok| **ok).count();
    let report = BroadcastReport {
        delivered,
        failed: results.len() - delivered,
    };
    info!(delivered = report.delivered, failed = report.failed, "broadcast finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_groups_skips_bad_lines() {
        let content = "-1001\t2026-01-01T00:00:00Z\n\nnot-a-number\n-1002\n-1001\n";
        let groups = parse_groups(content);
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&-1001));
        assert!(groups.contains(&-1002));
    }
}
