use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no `type` discriminant")]
    MissingDiscriminant,
    #[error("unknown frame discriminant `{0}`")]
    UnknownDiscriminant(String),
}

impl ProtocolError {
    /// Frames that fail this way are dropped by the receiver; none of these are fatal.
    pub fn is_unknown_discriminant(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingDiscriminant | ProtocolError::UnknownDiscriminant(_)
        )
    }
}
