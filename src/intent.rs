use lazy_static::lazy_static;
use regex::Regex;
use serde::{ Deserialize, Serialize };
use std::fmt;

lazy_static! {
    static ref IMAGE_REQUEST: Regex = Regex::new(
        r"(?i)\b(generate|create|draw|make|paint|render|design|produce|sketch)\b.*\b(images?|pictures?|photos?|photographs?|art|artwork|illustrations?|drawings?|paintings?|portraits?|logos?|wallpapers?)\b"
    ).expect("image intent pattern");
    static ref ESSAY_VOCABULARY: Regex = Regex::new(
        r"(?i)\b(essays?|compositions?|dissertations?|thesis|term\s+paper)\b"
    ).expect("essay vocabulary pattern");
    static ref ESSAY_EXPOSITION: Regex = Regex::new(
        r"(?i)\b(explain|describe|discuss|compare)\b.*\b(essay|paper|article)s?\b"
    ).expect("essay exposition pattern");
    static ref ESSAY_WRITE: Regex = Regex::new(
        r"(?i)\bwrite\s+(about|on|an?\s+essay)\b"
    ).expect("essay write pattern");
}

/// Classified purpose of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Intent {
    Chat,
    Image,
    Essay,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Chat => write!(f, "chat"),
            Intent::Image => write!(f, "image"),
            Intent::Essay => write!(f, "essay"),
        }
    }
}

/// Classifies raw input text. Image requests win over essay requests; chat is
/// the fallback.
pub fn classify(text: &str) -> Intent {
    if IMAGE_REQUEST.is_match(text) {
        Intent::Image
    } else if is_essay_request(text) {
        Intent::Essay
    } else {
        Intent::Chat
    }
}

/// Classifies a submission. An attached image always means the user wants
/// to talk about that image, so the text pattern is ignored.
pub fn classify_submission(text: &str, has_attachment: bool) -> Intent {
    if has_attachment {
        return Intent::Chat;
    }
    classify(text)
}

fn is_essay_request(text: &str) -> bool {
    ESSAY_VOCABULARY.is_match(text) || ESSAY_EXPOSITION.is_match(text) || ESSAY_WRITE.is_match(text)
}
