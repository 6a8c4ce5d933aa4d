pub mod openai;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };

use crate::error::InferenceError;

pub use self::openai::OpenAIChatClient;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Plain text, or a text + image composite when the user attached an image.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatRequest {
    /// Builds a single-turn user request.
    pub fn single_turn(
        model: &str,
        text: &str,
        image_url: Option<&str>,
        max_tokens: u32,
        temperature: f32
    ) -> Self {
        let content = match image_url {
            Some(url) =>
                MessageContent::Parts(
                    vec![
                        ContentPart::Text { text: text.to_string() },
                        ContentPart::ImageUrl { image_url: ImageUrl { url: url.to_string() } }
                    ]
                ),
            None => MessageContent::Text(text.to_string()),
        };
        Self {
            model: model.to_string(),
            messages: vec![RequestMessage { role: "user".to_string(), content }],
            max_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub response: String,
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

/// Extracts `choices[0].message.content` from a completion body.
pub fn parse_completion(body: &str) -> Result<CompletionResponse, InferenceError> {
    let parsed: CompletionBody = serde_json
        ::from_str(body)
        .map_err(|e| InferenceError::Shape(format!("invalid completion body: {}", e)))?;
    let message = parsed.choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::Shape("no choices in completion".to_string()))?
        .message;
    let response = message.content.ok_or_else(||
        InferenceError::Shape("choices[0].message.content missing".to_string())
    )?;
    let reasoning = message.reasoning_content
        .or(message.reasoning)
        .filter(|text| !text.trim().is_empty());
    Ok(CompletionResponse { response, reasoning })
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse, InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_request_payload() {
        let request = ChatRequest::single_turn("gpt-4o-mini", "hi", None, 1000, 0.5);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": "hi" }],
                "max_tokens": 1000,
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn test_composite_request_payload() {
        let request = ChatRequest::single_turn(
            "gpt-4o",
            "what is this?",
            Some("data:image/png;base64,AAAA"),
            2000,
            0.5
        );
        assert_eq!(
            serde_json::to_value(&request).unwrap()["messages"][0]["content"],
            json!([
                { "type": "text", "text": "what is this?" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }
            ])
        );
    }

    #[test]
    fn test_parse_completion_content_and_reasoning() {
        let body =
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello","reasoning_content":"thinking"}}]}"#;
        let parsed = parse_completion(body).unwrap();
        assert_eq!(parsed.response, "Hello");
        assert_eq!(parsed.reasoning.as_deref(), Some("thinking"));
    }

    #[test]
    fn test_parse_completion_shape_errors() {
        for body in [
            "not json",
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"role":"assistant"}}]}"#,
            r#"{"error":"rate limited"}"#,
        ] {
            assert!(matches!(parse_completion(body), Err(InferenceError::Shape(_))), "{}", body);
        }
    }
}
