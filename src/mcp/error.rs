use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Invalid request format")]
    InvalidRequest,

    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Error executing method: {0}")]
    HandlerFailed(String),
}

impl McpError {
    pub fn status(&self) -> StatusCode {
        match self {
            McpError::InvalidRequest => StatusCode::BAD_REQUEST,
            McpError::MethodNotFound(_) => StatusCode::NOT_FOUND,
            McpError::HandlerFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
