//! Resolution of `image_url` content parts into raw image bytes.
//!
//! Inline `data:` URIs are decoded in place; anything else is fetched through
//! an [`ImageFetcher`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{ProxyError, Result};
use crate::translate::bedrock_types::{ImageBlock, ImageSource};

/// Format assumed when a fetched image carries no content-type.
pub const DEFAULT_IMAGE_FORMAT: &str = "jpeg";

/// Raw bytes and the content-type header of a fetched image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch an image over HTTP(S). Non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

/// [`ImageFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::image_fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::image_fetch(format!(
                "{url}: server returned status {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProxyError::image_fetch(format!("{url}: {e}")))?;

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Turn an image URL into a native image block.
pub async fn resolve_image(url: &str, fetcher: &dyn ImageFetcher) -> Result<ImageBlock> {
    if url.starts_with("data:") {
        let (format, bytes) = decode_data_uri(url)?;
        return Ok(ImageBlock {
            format,
            source: ImageSource::Bytes(bytes),
        });
    }

    let fetched = fetcher.fetch(url).await?;
    let format = fetched
        .content_type
        .as_deref()
        .and_then(format_from_content_type)
        .unwrap_or_else(|| DEFAULT_IMAGE_FORMAT.to_string());

    Ok(ImageBlock {
        format,
        source: ImageSource::Bytes(fetched.bytes),
    })
}

/// Decode `data:image/<fmt>;base64,<data>` into `(fmt, bytes)`.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ProxyError::unsupported("image URL is not a data URI"))?;

    let (media_type, data) = rest.split_once(";base64,").ok_or_else(|| {
        ProxyError::unsupported("only base64-encoded image data URIs are supported")
    })?;

    let format = media_type
        .strip_prefix("image/")
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            ProxyError::unsupported(format!("data URI media type '{media_type}' is not an image"))
        })?;

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| ProxyError::unsupported(format!("invalid base64 image data: {e}")))?;

    Ok((format.to_string(), bytes))
}

/// `image/png; charset=binary` -> `png`. Header values outside `image/*`
/// yield `None` and fall back to the default format.
fn format_from_content_type(content_type: &str) -> Option<String> {
    let media_type = content_type.split(';').next()?.trim();
    media_type
        .strip_prefix("image/")
        .filter(|f| !f.is_empty())
        .map(str::to_ascii_lowercase)
}
