//! Authentication errors.

use thiserror::Error;

/// Authentication failure modes.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials; use 'Authorization: Bearer <token>' or '?api_key=<token>'")]
    MissingCredentials,

    #[error("invalid Authorization header format; use 'Bearer <token>'")]
    InvalidAuthHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication error: {0}")]
    Internal(String),
}
