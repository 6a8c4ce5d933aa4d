use log::debug;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::history::ConversationStore;
use crate::models::chat::Message;
use crate::models::event::Event;

/// Appends produced messages to a conversation and announces them.
#[derive(Clone)]
pub struct MessageAssembler {
    store: Arc<dyn ConversationStore>,
    events: broadcast::Sender<Event>,
}

impl MessageAssembler {
    pub fn new(store: Arc<dyn ConversationStore>, events: broadcast::Sender<Event>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Appends `messages` in the given order as one batch. Scroll-to-latest
    /// is emitted only after the store accepted the whole batch.
    pub async fn append(&self, conversation_id: &str, messages: Vec<Message>) -> Result<(), StoreError> {
        let Some(last_id) = messages.last().map(|message| message.id.clone()) else {
            return Ok(());
        };
        self.store.append_messages(conversation_id, &messages).await?;
        debug!("Appended {} message(s) to {}", messages.len(), conversation_id);

        // Sending only fails when nobody is subscribed.
        let _ = self.events.send(Event::MessagesAppended {
            conversation_id: conversation_id.to_string(),
            messages,
        });
        let _ = self.events.send(Event::ScrollToLatest {
            conversation_id: conversation_id.to_string(),
            message_id: last_id,
        });
        Ok(())
    }
}
