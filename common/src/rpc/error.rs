use anyhow::Error as AnyError;
use serde_json::Error as SerdeError;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Error type returned by RPC middleware and handlers.
///
/// Every variant except `Internal` is client-safe: its message is returned
/// verbatim in the error response. Internal errors are logged and replaced
/// with a generic message so infra details never leak to clients.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("{0}")]
    Client(String),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("invalid params: {0}")]
    InvalidParams(#[from] SerdeError),
    #[error("method '{0}' in request was not found")]
    MethodNotFound(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("already processed")]
    AlreadyProcessed,
    #[error("authentication required")]
    AuthRequired,
    #[error(transparent)]
    Internal(#[from] AnyError),
}

impl RpcError {
    pub fn client<S: Into<String>>(message: S) -> Self {
        Self::Client(message.into())
    }

    pub fn is_client_safe(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// The message to put in the error response.
    pub fn client_message(&self) -> String {
        if self.is_client_safe() {
            format!("{:#}", self)
        } else {
            "internal server error".to_string()
        }
    }
}

impl From<CryptoError> for RpcError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidEncoding | CryptoError::RecoveryFailed => Self::InvalidSignature,
            other => Self::Internal(other.into()),
        }
    }
}
