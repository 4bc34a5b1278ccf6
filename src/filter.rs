//! Article admission filter
//!
//! Every inbound article (TAKETHIS, IHAVE, POST, and reader-mode fetches)
//! passes through [`HeaderFilter::check`] before a byte of its body is
//! stored. The checks run in a fixed priority order; the first match
//! decides. Reordering them changes observable behavior: a banned article
//! we also hold locally must report "article banned", not "have this
//! article locally".

use std::sync::Arc;

use tracing::{debug, warn};

use crate::article::Headers;
use crate::error::Result;
use crate::index::PeerIndex;
use crate::validation::{validate_message_id, validate_newsgroup_name};

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accept the article
    Admit,
    /// Refuse the article with a human-readable reason
    Reject(String),
}

impl Verdict {
    /// True when the article was admitted
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }

    /// Rejection reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Admit => None,
            Verdict::Reject(reason) => Some(reason),
        }
    }
}

fn reject(reason: impl Into<String>) -> Verdict {
    Verdict::Reject(reason.into())
}

/// Header admission policy for one daemon instance
pub struct HeaderFilter {
    index: Arc<dyn PeerIndex>,
    allow_anon: bool,
    allow_anon_attachments: bool,
}

impl HeaderFilter {
    /// Create a filter over the given peer index and anonymity policy
    pub fn new(index: Arc<dyn PeerIndex>, allow_anon: bool, allow_anon_attachments: bool) -> Self {
        Self {
            index,
            allow_anon,
            allow_anon_attachments,
        }
    }

    /// Decide whether to admit an article given its headers
    ///
    /// Pure apart from the peer index reads. Index failures reject
    /// conservatively with reason `database error`.
    pub fn check(&self, headers: &Headers) -> Verdict {
        match self.check_ordered(headers) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!("peer index failure during admission: {}", err);
                reject("database error")
            }
        }
    }

    fn check_ordered(&self, headers: &Headers) -> Result<Verdict> {
        let newsgroup = headers.get("Newsgroups");
        let reference = headers.get("References");
        let message_id = headers.get("Message-Id");
        let encaddr = headers.get("X-Encrypted-Ip");
        let tor_poster = headers.get("X-Tor-Poster");
        let i2p_desthash = headers.get("X-I2p-Desthash");
        let pubkey = headers.get("X-Pubkey-Ed25519");

        let has_attachment = headers.get("Content-Type").starts_with("multipart/mixed");
        let is_signed = !pubkey.is_empty();
        let is_ctl = newsgroup == "ctl" && is_signed;
        let anon_poster = !tor_poster.is_empty() || !i2p_desthash.is_empty() || encaddr.is_empty();

        if validate_newsgroup_name(newsgroup).is_err() {
            return Ok(reject("invalid newsgroup"));
        }
        if self.index.newsgroup_banned(newsgroup)? {
            return Ok(reject("newsgroup banned"));
        }

        let id_ok = validate_message_id(message_id).is_ok()
            && (reference.is_empty() || validate_message_id(reference).is_ok());
        if !id_ok {
            return Ok(reject(format!(
                "invalid reference or message id is '{message_id}' reference is '{reference}'"
            )));
        }

        if self.index.article_banned(message_id)? {
            return Ok(reject("article banned"));
        }
        if !reference.is_empty() && self.index.article_banned(reference)? {
            return Ok(reject("thread banned"));
        }
        if self.index.has_article_local(message_id)? {
            return Ok(reject("have this article locally"));
        }
        if self.index.has_article(message_id)? {
            return Ok(reject("already seen"));
        }

        // control messages are always accepted here; signature
        // verification happens downstream
        if is_ctl {
            return Ok(Verdict::Admit);
        }

        if anon_poster {
            if !self.allow_anon {
                return Ok(reject("no anon posts allowed"));
            }
            if (has_attachment || is_signed) && !self.allow_anon_attachments {
                return Ok(reject("no anon signed posts or attachments"));
            }
            return Ok(Verdict::Admit);
        }

        // non-anonymous implies an encrypted address was attached
        if !encaddr.is_empty() {
            if self.index.check_enc_ip_banned(encaddr)? {
                return Ok(reject("address banned"));
            }
            return Ok(Verdict::Admit);
        }

        debug!("article is neither anonymous nor carries an encrypted address");
        Ok(Verdict::Admit)
    }
}
