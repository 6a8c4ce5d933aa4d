use chrono::Utc;
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::segment::Fragment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation entry.
///
/// Code blocks from one assistant turn are stored as their own messages
/// (`is_code`), never spliced into the prose message of the same round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7, so lexical order follows creation order.
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_code: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub long_form: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            image: None,
            is_code: false,
            language: None,
            long_form: false,
            reasoning: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn from_fragment(fragment: Fragment) -> Self {
        match fragment {
            Fragment::Prose { text } => Self::assistant(text),
            Fragment::Code { language, text } => {
                let mut message = Self::assistant(text);
                message.is_code = true;
                message.language = language;
                message
            }
            Fragment::LongForm { text } => {
                let mut message = Self::assistant(text);
                message.long_form = true;
                message
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(user_id: &str, title: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

const TITLE_MAX_CHARS: usize = 40;

/// Derives a conversation title from the first user input.
pub fn title_from_input(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str("...");
    title
}
