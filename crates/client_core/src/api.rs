//! Request/response endpoints of the device server: preview images, fonts and uploads.

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use shared::domain::{EngraveMode, FontEntry};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    debounce::PreviewRequest,
    error::{ClientError, ClientResult},
};

/// The image and font endpoints the session consumes.
#[async_trait]
pub trait PreviewBackend: Send + Sync {
    async fn fonts(&self) -> ClientResult<Vec<FontEntry>>;
    async fn fetch_preview(&self, request: &PreviewRequest) -> ClientResult<Vec<u8>>;
}

/// Maps `http(s)://host:port` to the control channel `ws(s)://host:port/ws`.
pub fn websocket_url(server_url: &str) -> ClientResult<String> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(ClientError::InvalidServerUrl(server_url.to_string()));
    };
    Ok(format!("{ws_url}/ws"))
}

#[derive(Debug, Clone)]
pub struct EngraverApi {
    http: Client,
    base: Url,
}

impl EngraverApi {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(ClientError::InvalidServerUrl(server_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base: Url::parse(server_url)?,
        })
    }

    pub fn preview_url(&self, request: &PreviewRequest) -> ClientResult<Url> {
        let mut url = match request.mode {
            EngraveMode::Image => self.base.join("/image")?,
            EngraveMode::Text => self.base.join("/textimage")?,
        };
        {
            let mut query = url.query_pairs_mut();
            if let Some(text) = &request.text {
                query.append_pair("text", text);
            }
            query
                .append_pair("width", &request.width.to_string())
                .append_pair("height", &request.height.to_string());
            match request.mode {
                EngraveMode::Image => {
                    query
                        .append_pair("trf", &request.transformation)
                        .append_pair("contrast", &request.contrast.to_string())
                        .append_pair("brightness", &request.brightness.to_string());
                }
                EngraveMode::Text => {
                    query
                        .append_pair("font", request.font.as_deref().unwrap_or_default())
                        .append_pair("trf", &request.transformation);
                }
            }
        }
        Ok(url)
    }

    /// Posts `bytes` as the multipart field `file`; 200 and 201 count as success.
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<()> {
        let url = self.base.join("/upload")?;
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self.http.post(url).multipart(form).send().await?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!(filename, "upload accepted");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(filename, status = status.as_u16(), "upload rejected");
        Err(ClientError::UploadRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PreviewBackend for EngraverApi {
    async fn fonts(&self) -> ClientResult<Vec<FontEntry>> {
        let url = self.base.join("/fonts")?;
        let fonts = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(fonts)
    }

    async fn fetch_preview(&self, request: &PreviewRequest) -> ClientResult<Vec<u8>> {
        let url = self.preview_url(request)?;
        debug!(%url, "fetching preview image");
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
