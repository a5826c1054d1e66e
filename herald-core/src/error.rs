//! Top-level error types for Herald.

use thiserror::Error;

use crate::api::ContentError;
use crate::auth::TokenError;
use crate::feed::FeedError;
use crate::store::StoreError;

/// Top-level error type encompassing all Herald errors.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// Error from token persistence.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from session token operations.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Error from the data API.
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Error fetching or parsing a feed.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}
