pub mod chat;
pub mod image;

use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE } };
use url::Url;

use crate::error::InferenceError;

/// Where and how to reach one inference endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    fn build_http(&self) -> Result<(HttpClient, Url), InferenceError> {
        let url = Url::parse(&self.url).map_err(|_| InferenceError::InvalidEndpoint(self.url.clone()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_|
                    InferenceError::InvalidEndpoint(format!("{} (malformed API key)", self.url))
                )?
            );
        }

        let http = HttpClient::builder().default_headers(headers).build()?;
        Ok((http, url))
    }
}

/// Sends the request and turns a non-2xx reply into [`InferenceError::Status`].
async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, InferenceError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(InferenceError::Status { status: status.as_u16(), body });
    }
    Ok(response)
}
