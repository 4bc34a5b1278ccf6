//! Lexical validation for message-ids and newsgroup names
//!
//! These predicates gate everything that enters the admission filter, the
//! article store, and the wire. Both are pure.

use crate::{NntpError, Result};

/// Maximum accepted length of a message-id, brackets included
const MAX_MESSAGE_ID_LEN: usize = 250;

/// Maximum accepted length of a newsgroup name
const MAX_NEWSGROUP_LEN: usize = 128;

/// Validates a message-id
///
/// A message-id has the form `<local@domain>` where both tokens are
/// non-empty printable ASCII without `<`, `>`, `@`, whitespace, or control
/// characters. Total length is capped at 250 octets.
///
/// # Examples
///
/// ```
/// use overchan::validation::validate_message_id;
///
/// assert!(validate_message_id("<abc123@example.onion>").is_ok());
/// assert!(validate_message_id("abc123@example.onion").is_err()); // missing brackets
/// assert!(validate_message_id("<abc123>").is_err());             // missing @
/// ```
pub fn validate_message_id(message_id: &str) -> Result<()> {
    if message_id.len() < 5 || message_id.len() > MAX_MESSAGE_ID_LEN {
        return Err(NntpError::InvalidFormat(format!(
            "message-id length {} out of bounds",
            message_id.len()
        )));
    }

    if !message_id.starts_with('<') || !message_id.ends_with('>') {
        return Err(NntpError::InvalidFormat(
            "message-id must be enclosed in angle brackets".to_string(),
        ));
    }

    let content = &message_id[1..message_id.len() - 1];

    let mut tokens = content.split('@');
    let (local, domain) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => {
            return Err(NntpError::InvalidFormat(
                "message-id must contain exactly one @ sign".to_string(),
            ))
        }
    };

    if local.is_empty() || domain.is_empty() {
        return Err(NntpError::InvalidFormat(
            "message-id tokens cannot be empty".to_string(),
        ));
    }

    // is_ascii_graphic excludes whitespace and control characters
    for ch in content.chars() {
        if !ch.is_ascii_graphic() || ch == '<' || ch == '>' {
            return Err(NntpError::InvalidFormat(format!(
                "invalid character {ch:?} in message-id"
            )));
        }
    }

    Ok(())
}

/// Validates a newsgroup name
///
/// Newsgroup names are non-empty, at most 128 octets, and consist of
/// dot-separated segments of `[a-z0-9+_-]` with no leading or trailing dot.
///
/// # Examples
///
/// ```
/// use overchan::validation::validate_newsgroup_name;
///
/// assert!(validate_newsgroup_name("overchan.test").is_ok());
/// assert!(validate_newsgroup_name("ctl").is_ok());
/// assert!(validate_newsgroup_name(".overchan").is_err());  // leading dot
/// assert!(validate_newsgroup_name("over..chan").is_err()); // empty segment
/// ```
pub fn validate_newsgroup_name(newsgroup: &str) -> Result<()> {
    if newsgroup.is_empty() || newsgroup.len() > MAX_NEWSGROUP_LEN {
        return Err(NntpError::InvalidFormat(format!(
            "newsgroup length {} out of bounds",
            newsgroup.len()
        )));
    }

    if newsgroup.starts_with('.') || newsgroup.ends_with('.') {
        return Err(NntpError::InvalidFormat(
            "newsgroup cannot start or end with a dot".to_string(),
        ));
    }

    for segment in newsgroup.split('.') {
        if segment.is_empty() {
            return Err(NntpError::InvalidFormat(
                "newsgroup cannot have empty segments".to_string(),
            ));
        }
        for ch in segment.chars() {
            if !(ch.is_ascii_lowercase()
                || ch.is_ascii_digit()
                || ch == '+'
                || ch == '-'
                || ch == '_')
            {
                return Err(NntpError::InvalidFormat(format!(
                    "invalid character {ch:?} in newsgroup name"
                )));
            }
        }
    }

    Ok(())
}
