use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::tempdir;
use tg_repeatbot::groups::{broadcast, BroadcastReport, GroupRegistry};
use tg_repeatbot::messenger::Messenger;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct RecordingMessenger {
    failing_chats: HashSet<i64>,
    copies: Arc<Mutex<Vec<(i64, i64, i32)>>>,
}

impl RecordingMessenger {
    fn failing_for(chats: &[i64]) -> Self {
        Self {
            failing_chats: chats.iter().copied().collect(),
            ..Default::default()
        }
    }

    async fn copies(&self) -> Vec<(i64, i64, i32)> {
        let mut copies = self.copies.lock().await.clone();
        copies.sort_unstable();
        copies
    }
}

#[async_trait::async_trait]
impl Messenger for RecordingMessenger {
    async fn copy_message(&self, chat_id: i64, from_chat_id: i64, message_id: i32) -> Result<i32> {
        self.copies
            .lock()
            .await
            .push((chat_id, from_chat_id, message_id));
        if self.failing_chats.contains(&chat_id) {
            return Err(anyhow!("bot was kicked from the group chat"));
        }
        Ok(1)
    }

    async fn copy_messages(
        &self,
        _chat_id: i64,
        _from_chat_id: i64,
        _message_ids: &[i32],
    ) -> Result<Vec<i32>> {
        Err(anyhow!("not used by broadcasts"))
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i32) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn registry_records_each_group_once() {
    let td = tempdir().unwrap();
    let path = td.path().join("groups.txt");

    let registry = GroupRegistry::open(&path).await.unwrap();
    assert!(registry.is_empty().await);

    assert!(registry.record(-1001).await.unwrap());
    assert!(registry.record(-1002).await.unwrap());
    assert!(!registry.record(-1001).await.unwrap());
    assert_eq!(registry.all().await, vec![-1002, -1001]);

    let content = std::fs::read_to_string(&path).unwrap();
    let ids: Vec<&str> = content
        .lines()
        .map(|line| line.split('\t').next().unwrap())
        .collect();
    assert_eq!(ids, vec!["-1001", "-1002"]);
}

#[tokio::test]
async fn registry_reloads_from_file() {
    let td = tempdir().unwrap();
    let path = td.path().join("groups.txt");

    {
        let registry = GroupRegistry::open(&path).await.unwrap();
        registry.record(-1001).await.unwrap();
        registry.record(-1002).await.unwrap();
    }

    let reopened = GroupRegistry::open(&path).await.unwrap();
    assert_eq!(reopened.len().await, 2);
    assert!(!reopened.record(-1002).await.unwrap());
    assert!(reopened.record(-1003).await.unwrap());
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
}

#[tokio::test]
async fn registry_tolerates_hand_edited_file() {
    let td = tempdir().unwrap();
    let path = td.path().join("groups.txt");
    std::fs::write(&path, "-1001\n\ngarbage\n-1002\t2026-01-01T00:00:00Z\n").unwrap();

    let registry = GroupRegistry::open(&path).await.unwrap();
    assert_eq!(registry.all().await, vec![-1002, -1001]);
}

#[tokio::test]
async fn broadcast_reports_failures_per_group() {
    let messenger = RecordingMessenger::failing_for(&[-1002]);
    let groups = vec![-1001, -1002, -1003];

    let report = broadcast(Arc::new(messenger.clone()), &groups, 42, 7, 2).await;

    assert_eq!(
        report,
        BroadcastReport {
            delivered: 2,
            failed: 1
        }
    );
    assert_eq!(
        messenger.copies().await,
        vec![(-1003, 42, 7), (-1002, 42, 7), (-1001, 42, 7)]
    );
}

#[tokio::test]
async fn broadcast_to_no_groups_is_empty_report() {
    let messenger = RecordingMessenger::default();
    let report = broadcast(Arc::new(messenger.clone()), &[], 42, 7, 4).await;
    assert_eq!(report, BroadcastReport::default());
    assert!(messenger.copies().await.is_empty());
}
