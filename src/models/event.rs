use serde::{ Deserialize, Serialize };

use super::chat::Message;

/// Observable side effects of the pipeline, delivered to UI subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "progress")] Progress {
        conversation_id: String,
        value: u8,
    },
    #[serde(rename = "messages_appended")] MessagesAppended {
        conversation_id: String,
        messages: Vec<Message>,
    },
    #[serde(rename = "scroll_to_latest")] ScrollToLatest {
        conversation_id: String,
        message_id: String,
    },
    #[serde(rename = "notification")] Notification {
        conversation_id: String,
        message: String,
    },
}
