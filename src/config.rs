//! Daemon and feed configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NntpError, Result};

/// Which submode to negotiate on an outbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferMode {
    /// Pipelined CHECK/TAKETHIS streaming
    Stream,
    /// Reader mode, used for backfill scraping
    Reader,
}

/// Per-peer feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Label for this peer, used as the log prefix
    pub name: String,
    /// host:port to dial
    pub addr: String,
    /// Preferred submode for the connection
    #[serde(default = "default_prefer_mode")]
    pub prefer_mode: PreferMode,
    /// Which newsgroups to offer this peer
    #[serde(default)]
    pub policy: FeedPolicy,
}

fn default_prefer_mode() -> PreferMode {
    PreferMode::Stream
}

/// Newsgroup patterns controlling what a feed is offered
///
/// Patterns are literal group names, or prefixes ending in `*`. An empty
/// pattern list allows everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPolicy {
    /// Allowed newsgroup patterns
    #[serde(default)]
    pub groups: Vec<String>,
}

impl FeedPolicy {
    /// Does this policy allow offering articles in `newsgroup`?
    pub fn allows_newsgroup(&self, newsgroup: &str) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        self.groups.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => newsgroup.starts_with(prefix),
                None => newsgroup == pattern,
            }
        })
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of this instance, stamped into generated message-ids
    pub instance_name: String,
    /// Address to listen on for inbound peers
    pub bind: String,
    /// Article store directory
    pub store_dir: String,
    /// Accept anonymous posts
    #[serde(default)]
    pub allow_anon: bool,
    /// Accept signed posts or attachments from anonymous posters
    #[serde(default)]
    pub allow_anon_attachments: bool,
    /// Outbound peers
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|err| NntpError::Other(format!("bad config: {err}")))
    }
}
