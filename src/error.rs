//! Peering error types

use thiserror::Error;

/// NNTP peering and storage errors
#[derive(Error, Debug)]
pub enum NntpError {
    /// IO error during network or filesystem operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("timeout")]
    Timeout,

    /// Malformed status line or broken framing from a peer
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP error reply with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 430, 501)
        code: u16,
        /// Error message from the peer
        message: String,
    },

    /// Message-id or newsgroup failed lexical validation
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Another task is already ingesting this article
    #[error("article is already being loaded")]
    Busy,

    /// The peer index says this article, address, or group is banned
    #[error("banned: {0}")]
    Banned(String),

    /// Peer index lookup or mutation failed
    #[error("database error: {0}")]
    Database(String),

    /// Malformed moderation signing key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Connection closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using NntpError
pub type Result<T> = std::result::Result<T, NntpError>;
