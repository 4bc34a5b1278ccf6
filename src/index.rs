//! Peer index facade
//!
//! The daemon keeps its seen/banned/local state in an external database;
//! this module is the narrow surface the protocol consumes. All methods are
//! idempotent, safe for concurrent use, and cheap enough to call from the
//! per-connection drivers. `Banned` is absorbing: once an article or group
//! is banned the answer never flips back. `Seen` is monotone.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::commands::XoverEntry;
use crate::error::{NntpError, Result};

/// Seen/banned/local lookups and mutations consumed by the protocol
pub trait PeerIndex: Send + Sync {
    /// Has this article been seen anywhere (locally stored or relayed)?
    fn has_article(&self, message_id: &str) -> Result<bool>;

    /// Is this article stored locally?
    fn has_article_local(&self, message_id: &str) -> Result<bool>;

    /// Is this article banned?
    fn article_banned(&self, message_id: &str) -> Result<bool>;

    /// Persist a ban record for an article with the rejection reason
    fn ban_article(&self, message_id: &str, reason: &str) -> Result<()>;

    /// Is this newsgroup banned?
    fn newsgroup_banned(&self, newsgroup: &str) -> Result<bool>;

    /// Do we carry this newsgroup?
    fn has_newsgroup(&self, newsgroup: &str) -> Result<bool>;

    /// Is this encrypted poster address banned?
    fn check_enc_ip_banned(&self, encaddr: &str) -> Result<bool>;

    /// Is this hex-encoded ed25519 pubkey a moderator key?
    fn check_mod_pubkey(&self, pubkey: &str) -> Result<bool>;

    /// Has this article aged out of retention?
    fn is_expired(&self, message_id: &str) -> Result<bool>;

    /// Every newsgroup we carry
    fn all_newsgroups(&self) -> Result<Vec<String>>;

    /// Low and high water marks for a group
    fn group_range(&self, newsgroup: &str) -> Result<(u64, u64)>;

    /// Number of posts in a group
    fn count_posts(&self, newsgroup: &str) -> Result<u64>;

    /// Overview rows for every post in a group
    fn posts_in_group(&self, newsgroup: &str) -> Result<Vec<XoverEntry>>;
}

#[derive(Default)]
struct MemoryState {
    seen: HashSet<String>,
    local: HashSet<String>,
    banned: HashMap<String, String>,
    banned_groups: HashSet<String>,
    banned_enc_ips: HashSet<String>,
    mod_pubkeys: HashSet<String>,
    expired: HashSet<String>,
    groups: BTreeMap<String, Vec<XoverEntry>>,
}

/// In-memory peer index
///
/// Backs single-node deployments and every test in the crate. State lives
/// behind one mutex; the daemon treats the index as externally serialized.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<MemoryState>,
}

impl MemoryIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| NntpError::Database("peer index poisoned".to_string()))
    }

    /// Record an article as seen (optionally stored locally)
    pub fn mark_seen(&self, message_id: &str, local: bool) {
        if let Ok(mut state) = self.lock() {
            state.seen.insert(message_id.to_string());
            if local {
                state.local.insert(message_id.to_string());
            }
        }
    }

    /// Register a newsgroup we carry
    pub fn add_newsgroup(&self, newsgroup: &str) {
        if let Ok(mut state) = self.lock() {
            state.groups.entry(newsgroup.to_string()).or_default();
        }
    }

    /// Add an overview row to a group, creating the group if needed
    pub fn add_post(&self, newsgroup: &str, entry: XoverEntry) {
        if let Ok(mut state) = self.lock() {
            state.seen.insert(entry.message_id.clone());
            state.local.insert(entry.message_id.clone());
            state.groups.entry(newsgroup.to_string()).or_default().push(entry);
        }
    }

    /// Ban a newsgroup
    pub fn ban_newsgroup(&self, newsgroup: &str) {
        if let Ok(mut state) = self.lock() {
            state.banned_groups.insert(newsgroup.to_string());
        }
    }

    /// Ban an encrypted poster address
    pub fn ban_enc_ip(&self, encaddr: &str) {
        if let Ok(mut state) = self.lock() {
            state.banned_enc_ips.insert(encaddr.to_string());
        }
    }

    /// Register a moderator pubkey (hex)
    pub fn add_mod_pubkey(&self, pubkey: &str) {
        if let Ok(mut state) = self.lock() {
            state.mod_pubkeys.insert(pubkey.to_string());
        }
    }

    /// Mark an article as expired
    pub fn mark_expired(&self, message_id: &str) {
        if let Ok(mut state) = self.lock() {
            state.expired.insert(message_id.to_string());
        }
    }

    /// Stored ban reason for an article, if any
    pub fn ban_reason(&self, message_id: &str) -> Option<String> {
        self.lock().ok()?.banned.get(message_id).cloned()
    }
}

impl PeerIndex for MemoryIndex {
    fn has_article(&self, message_id: &str) -> Result<bool> {
        Ok(self.lock()?.seen.contains(message_id))
    }

    fn has_article_local(&self, message_id: &str) -> Result<bool> {
        Ok(self.lock()?.local.contains(message_id))
    }

    fn article_banned(&self, message_id: &str) -> Result<bool> {
        Ok(self.lock()?.banned.contains_key(message_id))
    }

    fn ban_article(&self, message_id: &str, reason: &str) -> Result<()> {
        // first recorded reason wins; the ban itself is absorbing
        self.lock()?
            .banned
            .entry(message_id.to_string())
            .or_insert_with(|| reason.to_string());
        Ok(())
    }

    fn newsgroup_banned(&self, newsgroup: &str) -> Result<bool> {
        Ok(self.lock()?.banned_groups.contains(newsgroup))
    }

    fn has_newsgroup(&self, newsgroup: &str) -> Result<bool> {
        Ok(self.lock()?.groups.contains_key(newsgroup))
    }

    fn check_enc_ip_banned(&self, encaddr: &str) -> Result<bool> {
        Ok(self.lock()?.banned_enc_ips.contains(encaddr))
    }

    fn check_mod_pubkey(&self, pubkey: &str) -> Result<bool> {
        Ok(self.lock()?.mod_pubkeys.contains(pubkey))
    }

    fn is_expired(&self, message_id: &str) -> Result<bool> {
        Ok(self.lock()?.expired.contains(message_id))
    }

    fn all_newsgroups(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.groups.keys().cloned().collect())
    }

    fn group_range(&self, newsgroup: &str) -> Result<(u64, u64)> {
        let state = self.lock()?;
        let posts = state
            .groups
            .get(newsgroup)
            .ok_or_else(|| NntpError::Database(format!("no such group: {newsgroup}")))?;
        if posts.is_empty() {
            Ok((0, 0))
        } else {
            Ok((1, posts.len() as u64))
        }
    }

    fn count_posts(&self, newsgroup: &str) -> Result<u64> {
        let state = self.lock()?;
        Ok(state.groups.get(newsgroup).map_or(0, |p| p.len() as u64))
    }

    fn posts_in_group(&self, newsgroup: &str) -> Result<Vec<XoverEntry>> {
        let state = self.lock()?;
        Ok(state.groups.get(newsgroup).cloned().unwrap_or_default())
    }
}
