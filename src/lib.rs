#![doc = include_str!("../README.md")]

/// Article headers and on-disk header block format
pub mod article;
/// CAPABILITIES parsing
pub mod capabilities;
/// Dot-stuffed multiline framing
pub mod codec;
/// NNTP command builders and response parsers
pub mod commands;
mod config;
/// Per-peer protocol drivers
pub mod connection;
mod daemon;
mod error;
/// Article admission filtering
pub mod filter;
/// Peer index facade (seen/banned/local state)
pub mod index;
/// Moderation key checks
pub mod moderation;
mod response;
/// Content-addressed article store
pub mod store;
/// Message-id and newsgroup validation
pub mod validation;

pub use article::Headers;
pub use capabilities::Capabilities;
pub use commands::XoverEntry;
pub use config::{Config, FeedConfig, FeedPolicy, PreferMode};
pub use connection::{Connection, Mode, StreamEvent};
pub use daemon::{ArticleEntry, Daemon, Mailboxes};
pub use error::{NntpError, Result};
pub use filter::{HeaderFilter, Verdict};
pub use index::{MemoryIndex, PeerIndex};
pub use response::{codes, NntpResponse};
pub use store::{ArticleStore, TempSink};
pub use validation::{validate_message_id, validate_newsgroup_name};
