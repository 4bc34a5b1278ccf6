//! Article headers
//!
//! An article is a header block plus an opaque body. Headers are kept as an
//! ordered, case-insensitive multimap so unknown headers survive relay
//! verbatim. On disk the block is `Name: value\n` lines terminated by a
//! blank line, with the body following.

use chrono::Utc;
use rand::Rng;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NntpError, Result};

/// Upper bound on an inbound header block, to keep a hostile peer from
/// growing the buffer without ever sending the blank line
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Ordered, case-insensitive header multimap
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header block
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for a header name, or the empty string when absent
    ///
    /// Matching is case-insensitive; `Message-Id` and `MESSAGE-ID` are the
    /// same header.
    pub fn get(&self, name: &str) -> &str {
        self.first(name).unwrap_or("")
    }

    /// First value for a header name
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header name, in order of appearance
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Append a value, preserving any existing values for the name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for the name with a single value
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.push((name.to_string(), value.into()));
    }

    /// Number of header entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no headers are present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the block as `Name: value\n` lines plus the blank terminator
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        for (name, value) in &self.entries {
            writer
                .write_all(format!("{}: {}\n", name, value).as_bytes())
                .await?;
        }
        writer.write_all(b"\n").await?;
        Ok(())
    }
}

/// Read a header block from a peer, up to and including the blank line
///
/// Folded continuation lines (leading whitespace) are unfolded into the
/// previous value. A lone `.` before the blank line means the article had
/// no body separator, which is broken framing.
pub async fn read_header_block<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Headers> {
    let mut headers = Headers::new();
    let mut total = 0usize;

    loop {
        let mut line_bytes = Vec::with_capacity(256);
        let n = reader.read_until(b'\n', &mut line_bytes).await?;
        if n == 0 {
            return Err(NntpError::ConnectionClosed);
        }
        total += n;
        if total > MAX_HEADER_BYTES {
            return Err(NntpError::InvalidResponse("header block too large".into()));
        }

        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if line == "." {
            return Err(NntpError::InvalidResponse(
                "article terminated inside header block".into(),
            ));
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match headers.entries.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim_start());
                }
                None => {
                    return Err(NntpError::InvalidResponse(
                        "continuation line before first header".into(),
                    ))
                }
            }
            continue;
        }

        match line.split_once(':') {
            Some((name, value)) => headers.append(name.trim(), value.trim()),
            None => {
                return Err(NntpError::InvalidResponse(format!(
                    "malformed header line: {}",
                    line.chars().take(100).collect::<String>()
                )))
            }
        }
    }

    Ok(headers)
}

/// Generate a fresh message-id stamped with this instance's name
pub fn generate_message_id(instance: &str) -> String {
    let entropy: u64 = rand::thread_rng().gen();
    format!("<{:x}.{}@{}>", entropy, Utc::now().timestamp(), instance)
}

/// Current date in the RFC 5322 shape the Date header wants
pub fn format_date_now() -> String {
    Utc::now().to_rfc2822()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_message_id;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_header_block() {
        let raw = b"Message-Id: <a@b>\r\nNewsgroups: overchan.test\r\nX-Custom: kept\r\n\r\nbody";
        let mut reader = BufReader::new(&raw[..]);
        let headers = read_header_block(&mut reader).await.unwrap();

        assert_eq!(headers.get("message-id"), "<a@b>");
        assert_eq!(headers.get("Newsgroups"), "overchan.test");
        assert_eq!(headers.get("X-Custom"), "kept");
        assert_eq!(headers.get("Absent"), "");
        assert_eq!(headers.len(), 3);
    }

    #[tokio::test]
    async fn test_read_header_block_folded() {
        let raw = b"References: <a@b>\r\n\t<c@d>\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let headers = read_header_block(&mut reader).await.unwrap();
        assert_eq!(headers.get("References"), "<a@b> <c@d>");
    }

    #[tokio::test]
    async fn test_read_header_block_malformed() {
        let raw = b"not a header\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        assert!(read_header_block(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_header_block_dot_terminator() {
        let raw = b"Message-Id: <a@b>\r\n.\r\n";
        let mut reader = BufReader::new(&raw[..]);
        assert!(read_header_block(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_header_block_eof() {
        let raw = b"Message-Id: <a@b>\r\n";
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_header_block(&mut reader).await,
            Err(NntpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let mut headers = Headers::new();
        headers.append("Message-Id", "<a@b>");
        headers.append("Newsgroups", "overchan.test");

        let mut buf = Vec::new();
        headers.write_to(&mut buf).await.unwrap();
        assert_eq!(buf, b"Message-Id: <a@b>\nNewsgroups: overchan.test\n\n");

        let mut reader = BufReader::new(&buf[..]);
        let parsed = read_header_block(&mut reader).await.unwrap();
        assert_eq!(parsed.get("Message-Id"), "<a@b>");
        assert_eq!(parsed.get("Newsgroups"), "overchan.test");
    }

    #[test]
    fn test_set_replaces_all() {
        let mut headers = Headers::new();
        headers.append("Message-ID", "<old@x>");
        headers.append("message-id", "<older@x>");
        headers.set("Message-ID", "<new@x>");
        assert_eq!(headers.get_all("Message-Id"), vec!["<new@x>"]);
    }

    #[test]
    fn test_generate_message_id_is_valid() {
        let msgid = generate_message_id("overchan.node");
        assert!(validate_message_id(&msgid).is_ok(), "{msgid}");
        assert!(msgid.ends_with("@overchan.node>"));
    }
}
