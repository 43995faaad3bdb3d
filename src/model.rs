/// Identifies one album: Telegram only guarantees `media_group_id` is unique
/// within a chat, so the chat id is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub chat_id: i64,
    pub group_id: String,
}

impl AlbumKey {
    pub fn new(chat_id: i64, group_id: impl Into<String>) -> Self {
        Self {
            chat_id,
            group_id: group_id.into(),
        }
    }
}

/// Final item list handed to the scheduler after album resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAlbum {
    /// Message ids in ascending order.
    pub items: Vec<i32>,
    pub is_album: bool,
}

impl ResolvedAlbum {
    pub fn single(message_id: i32) -> Self {
        Self {
            items: vec![message_id],
            is_album: false,
        }
    }

    pub fn from_items(mut items: Vec<i32>) -> Self {
        items.sort_unstable();
        let is_album = items.len() > 1;
        Self { items, is_album }
    }
}
