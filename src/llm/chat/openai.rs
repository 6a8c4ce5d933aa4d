use async_trait::async_trait;
use log::{ debug, warn };
use reqwest::Client as HttpClient;
use url::Url;

use super::{ parse_completion, ChatClient, ChatRequest, CompletionResponse };
use crate::error::InferenceError;
use crate::llm::{ send_checked, EndpointConfig };

pub const DEFAULT_CHAT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAIChatClient {
    http: HttpClient,
    endpoint: Url,
}

impl OpenAIChatClient {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, InferenceError> {
        let (http, endpoint) = config.build_http()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResponse, InferenceError> {
        debug!(
            "POST {} model={} max_tokens={}",
            self.endpoint,
            request.model,
            request.max_tokens
        );
        let response = send_checked(self.http.post(self.endpoint.clone()).json(request)).await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!("Chat completion request failed: {}", e);
                return Err(e);
            }
        };
        let body = response.text().await?;
        parse_completion(&body)
    }
}
