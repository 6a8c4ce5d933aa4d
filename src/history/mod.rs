mod memory;
mod redis;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::config::{ HistoryBackend, Settings };
use crate::error::StoreError;
use crate::models::chat::{ Conversation, Message };

pub use self::memory::MemoryConversationStore;
pub use self::redis::RedisConversationStore;

/// Persistent conversation storage. The orchestration core only appends;
/// ordering within a conversation is the store's insertion order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError>;

    /// Appends all messages or none.
    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message]
    ) -> Result<(), StoreError>;

    async fn append_message(&self, conversation_id: &str, message: &Message) -> Result<(), StoreError> {
        self.append_messages(conversation_id, std::slice::from_ref(message)).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// Conversations for a user, newest first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;
}

pub fn create_history_store(settings: &Settings) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match &settings.history {
        HistoryBackend::Memory => {
            info!("Conversations will be kept in memory");
            Ok(Arc::new(MemoryConversationStore::new()))
        }
        HistoryBackend::Redis { url, prefix } => {
            info!("Conversations will be stored in redis at {}", url);
            Ok(Arc::new(RedisConversationStore::new(url, prefix)?))
        }
    }
}
