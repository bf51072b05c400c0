use crate::config::ValidationError;
use crate::key_store::KeyStoreError;
use hyper::StatusCode;
use hyper::body::Bytes;
use hyper::Response;
use shared::http::text_response;
use thiserror::Error;

/// Errors that can occur while handling a relay request
///
/// Every variant maps to exactly one HTTP status. Variants that wrap internal
/// failures keep the cause for logging but answer the caller with a fixed
/// message.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("This endpoint accepts POST requests only.")]
    PostOnly,

    #[error("API key is required in the Authorization header with Bearer token format.")]
    MissingAuthHeader,

    #[error("API key is required.")]
    EmptyApiKey,

    #[error("Invalid API key.")]
    InvalidApiKey,

    #[error("Not found")]
    NotFound,

    #[error("Request body must be form-encoded.")]
    UnsupportedBody,

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Invalid sender address.")]
    InvalidSender,

    #[error("DKIM settings are missing for the domain: {0}")]
    DkimMissing(String),

    #[error("All parameters are required.")]
    MissingParameters,

    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream returned an invalid response: {0}")]
    UpstreamResponseInvalid(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::PostOnly
            | RelayError::MissingAuthHeader
            | RelayError::EmptyApiKey
            | RelayError::UnsupportedBody
            | RelayError::RequestBodyError(_)
            | RelayError::InvalidSender
            | RelayError::DkimMissing(_)
            | RelayError::MissingParameters => StatusCode::BAD_REQUEST,
            RelayError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::KeyStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::UpstreamRequestFailed(..) | RelayError::UpstreamResponseInvalid(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::ResponseSerializationError(_)
            | RelayError::InvalidConfig(_)
            | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the caller.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::RequestBodyError(_) => "Invalid request body.".to_string(),
            RelayError::KeyStore(_) => "Key store unavailable.".to_string(),
            RelayError::UpstreamTimeout(_) => "Upstream request timed out.".to_string(),
            RelayError::UpstreamRequestFailed(..) => "Upstream request failed.".to_string(),
            RelayError::UpstreamResponseInvalid(_) => {
                "Upstream returned an invalid response.".to_string()
            }
            RelayError::ResponseSerializationError(_)
            | RelayError::InvalidConfig(_)
            | RelayError::Io(_) => "Internal server error.".to_string(),
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Response<Bytes> {
        text_response(self.status_code(), self.public_message())
    }
}
