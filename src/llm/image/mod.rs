use async_trait::async_trait;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, header::CONTENT_TYPE };
use serde::Serialize;
use url::Url;

use crate::error::InferenceError;
use crate::llm::{ send_checked, EndpointConfig };
use crate::models::attachment::to_data_url;

pub const DEFAULT_IMAGE_ENDPOINT: &str = "http://127.0.0.1:7860/generate";
const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Serialize, Debug)]
struct ImageRequest<'a> {
    prompt: &'a str,
}

/// Raw image payload as returned by the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    /// Displayable reference for the payload.
    pub fn to_data_url(&self) -> String {
        to_data_url(&self.mime, &self.bytes)
    }
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, InferenceError>;
}

pub struct HttpImageClient {
    http: HttpClient,
    endpoint: Url,
}

impl HttpImageClient {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, InferenceError> {
        let (http, endpoint) = config.build_http()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl ImageClient for HttpImageClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, InferenceError> {
        debug!("POST {} (image generation)", self.endpoint);
        let request = self.http.post(self.endpoint.clone()).json(&(ImageRequest { prompt }));
        let response = match send_checked(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Image generation request failed: {}", e);
                return Err(e);
            }
        };

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(image_mime)
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(InferenceError::Shape("empty image payload".to_string()));
        }
        Ok(GeneratedImage { mime, bytes })
    }
}

/// Keeps the media type of a Content-Type header, falling back to PNG for
/// anything that is not an image.
fn image_mime(content_type: &str) -> String {
    let media = content_type.split(';').next().unwrap_or_default().trim();
    if media.starts_with("image/") {
        media.to_string()
    } else {
        DEFAULT_IMAGE_MIME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_mime_from_content_type() {
        assert_eq!(image_mime("image/jpeg"), "image/jpeg");
        assert_eq!(image_mime("image/webp; charset=binary"), "image/webp");
        assert_eq!(image_mime("application/octet-stream"), "image/png");
    }

    #[test]
    fn test_generated_image_data_url() {
        let image = GeneratedImage { mime: "image/png".to_string(), bytes: vec![0x89, 0x50] };
        assert_eq!(image.to_data_url(), "data:image/png;base64,iVA=");
    }

    #[test]
    fn test_request_body_is_prompt_only() {
        let body = serde_json::to_value(ImageRequest { prompt: "a cat" }).unwrap();
        assert_eq!(body, serde_json::json!({ "prompt": "a cat" }));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let config = EndpointConfig::new("not a url", None);
        assert!(matches!(
            HttpImageClient::from_config(&config),
            Err(InferenceError::InvalidEndpoint(_))
        ));
    }
}
