use shared::error::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server_url must start with http:// or https://, got `{0}`")]
    InvalidServerUrl(String),
    #[error("inbound frames already taken; only one consumer may be registered")]
    ReceiverTaken,
    #[error("connection manager is not running")]
    NotRunning,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {body}")]
    UploadRejected { status: u16, body: String },
    #[error("failed to decode preview image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
