use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Shared secret missing or wrong
    #[error("Authorization failed")]
    AuthorizationFailed,

    /// Declared or streamed upload size over the configured maximum
    #[error("Upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Multipart body missing, malformed, or without a `file` field
    #[error("{message}")]
    MalformedRequest { message: String },

    /// Sniffed content type is not on the allow-list
    #[error("Unsupported file type {mime}")]
    UnsupportedContentType { mime: String },

    /// Creating or writing the stored file failed
    #[error("Failed to write {name}: {source}")]
    StorageWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested stored file does not exist
    #[error("File {id} not found")]
    NotFound { id: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::AuthorizationFailed => StatusCode::FORBIDDEN,
            Error::PayloadTooLarge { .. } => StatusCode::FORBIDDEN,
            Error::UnsupportedContentType { .. } => StatusCode::FORBIDDEN,
            Error::MalformedRequest { .. } => StatusCode::BAD_REQUEST,
            Error::StorageWrite { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Short plaintext message returned to the client, without internal details
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::AuthorizationFailed => "Authorization failed",
            Error::PayloadTooLarge { .. } => "File size is too big",
            Error::UnsupportedContentType { .. } => "Unsupported file type",
            Error::MalformedRequest { .. } | Error::StorageWrite { .. } => "Bad Request",
            Error::NotFound { .. } => "Not Found",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::StorageWrite { .. } => {
                tracing::error!("Storage error: {}", self);
            }
            Error::AuthorizationFailed => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::PayloadTooLarge { .. } | Error::UnsupportedContentType { .. } => {
                tracing::info!("Upload rejected: {}", self);
            }
            Error::MalformedRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
