use async_trait::async_trait;
use chrono::Utc;
use log::error;
use ::redis::{ AsyncCommands, Client, Script };
use lazy_static::lazy_static;
use serde::{ Deserialize, Serialize };

use super::ConversationStore;
use crate::error::StoreError;
use crate::models::chat::{ Conversation, Message };

lazy_static! {
    /// KEYS: meta, message list. ARGV: updated meta, then encoded messages.
    /// Returns 0 without writing when the conversation no longer exists.
    static ref APPEND_IF_EXISTS: Script = Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        for i = 2, #ARGV do
            redis.call('RPUSH', KEYS[2], ARGV[i])
        end
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
        "
    );
}

/// Conversation metadata; messages live in a separate list so appends are a
/// single RPUSH.
#[derive(Serialize, Deserialize)]
struct StoredConversation {
    id: String,
    user_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

impl StoredConversation {
    fn from_conversation(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            user_id: conversation.user_id.clone(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }

    fn into_conversation(self, messages: Vec<Message>) -> Conversation {
        Conversation {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            messages,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub struct RedisConversationStore {
    client: Client,
    key_prefix: String,
}

impl RedisConversationStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<::redis::aio::MultiplexedConnection, ::redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn meta_key(&self, conversation_id: &str) -> String {
        format!("{}conversation:{}", self.key_prefix, conversation_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, conversation_id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}user:{}", self.key_prefix, user_id)
    }

    async fn load_meta(
        &self,
        conn: &mut ::redis::aio::MultiplexedConnection,
        conversation_id: &str
    ) -> Result<StoredConversation, StoreError> {
        let raw: Option<String> = conn.get(self.meta_key(conversation_id)).await?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn load_conversation(
        &self,
        conn: &mut ::redis::aio::MultiplexedConnection,
        conversation_id: &str
    ) -> Result<Conversation, StoreError> {
        let meta = self.load_meta(conn, conversation_id).await?;
        let entries: Vec<String> = conn.lrange(self.messages_key(conversation_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(entries.len());
        for entry in &entries {
            match serde_json::from_str::<Message>(entry) {
                Ok(message) => messages.push(message),
                Err(e) => error!("Error parsing stored message in {}: {}", conversation_id, e),
            }
        }
        Ok(meta.into_conversation(messages))
    }
}

/// Script arguments for an append: the updated meta first, then each message.
fn append_args(meta: &StoredConversation, messages: &[Message]) -> Result<Vec<String>, serde_json::Error> {
    let mut args = Vec::with_capacity(messages.len() + 1);
    args.push(serde_json::to_string(meta)?);
    for message in messages {
        args.push(serde_json::to_string(message)?);
    }
    Ok(args)
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        let conversation = Conversation::new(user_id, title);
        let meta = serde_json::to_string(&StoredConversation::from_conversation(&conversation))?;

        ::redis
            ::pipe()
            .atomic()
            .set(self.meta_key(&conversation.id), meta)
            .ignore()
            .sadd(self.user_key(user_id), &conversation.id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(conversation)
    }

    async fn append_messages(
        &self,
        conversation_id: &str,
        messages: &[Message]
    ) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.get_connection().await?;
        let mut meta = self.load_meta(&mut conn, conversation_id).await?;
        meta.updated_at = Utc::now().timestamp_millis();

        let appended: i32 = APPEND_IF_EXISTS.key(self.meta_key(conversation_id))
            .key(self.messages_key(conversation_id))
            .arg(append_args(&meta, messages)?)
            .invoke_async(&mut conn).await?;
        if appended == 0 {
            // Deleted between the lookup and the write.
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        self.load_conversation(&mut conn, conversation_id).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let meta = self.load_meta(&mut conn, conversation_id).await?;

        ::redis
            ::pipe()
            .atomic()
            .del(self.meta_key(conversation_id))
            .ignore()
            .del(self.messages_key(conversation_id))
            .ignore()
            .srem(self.user_key(&meta.user_id), conversation_id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.smembers(self.user_key(user_id)).await?;
        let mut conversations = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.load_conversation(&mut conn, id).await {
                Ok(conversation) => conversations.push(conversation),
                Err(StoreError::NotFound(_)) => error!("Dangling conversation id {} for user {}", id, user_id),
                Err(e) => {
                    return Err(e);
                }
            }
        }
        conversations.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_args_put_meta_first() {
        let conversation = Conversation::new("u1", "title");
        let meta = StoredConversation::from_conversation(&conversation);
        let messages = vec![Message::user("hi"), Message::assistant("hello")];

        let args = append_args(&meta, &messages).unwrap();
        assert_eq!(args.len(), 3);
        let decoded: StoredConversation = serde_json::from_str(&args[0]).unwrap();
        assert_eq!(decoded.id, conversation.id);
        let reply: Message = serde_json::from_str(&args[2]).unwrap();
        assert_eq!(reply.content, "hello");
    }

    /// Needs a live server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_append_after_delete_leaves_no_keys() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("test:{}:", uuid::Uuid::now_v7());
        let store = RedisConversationStore::new(&url, &prefix).unwrap();

        let conversation = store.create_conversation("u1", "doomed").await.unwrap();
        store.append_message(&conversation.id, &Message::user("first")).await.unwrap();
        store.delete_conversation(&conversation.id).await.unwrap();

        let result = store.append_message(&conversation.id, &Message::user("late")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let mut conn = store.get_connection().await.unwrap();
        let meta_exists: bool = conn.exists(store.meta_key(&conversation.id)).await.unwrap();
        let list_exists: bool = conn.exists(store.messages_key(&conversation.id)).await.unwrap();
        assert!(!meta_exists);
        assert!(!list_exists);
    }
}
