use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::ConversationStore;
use crate::error::StoreError;
use crate::models::chat::{ Conversation, Message };

#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(user_id, title);
        self.conversations.write().await.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message]
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        conversation.messages.extend_from_slice(messages);
        conversation.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        self.conversations
            .read().await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.conversations
            .write().await
            .remove(conversation_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut list: Vec<Conversation> = self.conversations
            .read().await
            .values()
            .filter(|conversation| conversation.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(list)
    }
}
