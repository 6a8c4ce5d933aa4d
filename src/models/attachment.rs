use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use log::debug;
use std::path::Path;

use crate::error::AttachmentError;

/// An image the user attached to a submission, held as a data URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub mime: String,
    pub data_url: String,
}

impl Attachment {
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self {
            mime: mime.to_string(),
            data_url: to_data_url(mime, bytes),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, AttachmentError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let mime = image_mime_for(path).ok_or_else(|| AttachmentError::Unsupported(display.clone()))?;
        let bytes = tokio::fs::read(path).await.map_err(|source| AttachmentError::Io {
            path: display.clone(),
            source,
        })?;
        debug!("Captured attachment {} ({} bytes, {})", display, bytes.len(), mime);
        Ok(Self::from_bytes(mime, &bytes))
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

fn image_mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_encoding() {
        assert_eq!(to_data_url("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(image_mime_for(Path::new("cat.JPG")), Some("image/jpeg"));
        assert_eq!(image_mime_for(Path::new("notes.txt")), None);
        assert_eq!(image_mime_for(Path::new("no_extension")), None);
    }

    #[tokio::test]
    async fn test_from_path_rejects_non_images() {
        let err = Attachment::from_path("README.md").await.unwrap_err();
        assert!(matches!(err, AttachmentError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_from_path_reports_missing_file() {
        let err = Attachment::from_path("definitely/missing/file.png").await.unwrap_err();
        assert!(matches!(err, AttachmentError::Io { .. }));
    }
}
