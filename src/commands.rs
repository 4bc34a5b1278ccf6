//! NNTP command builders and response parsers
//!
//! Builders return the full command line including CRLF; parsers consume
//! status lines and the multiline payloads the peering protocol uses
//! (overview rows, newsgroup listings).

use crate::error::{NntpError, Result};
use crate::response::NntpResponse;

/// Build CAPABILITIES command (RFC 3977 Section 5.2)
pub fn capabilities() -> &'static str {
    "CAPABILITIES\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Build MODE READER command (RFC 3977 Section 5.3)
pub fn mode_reader() -> &'static str {
    "MODE READER\r\n"
}

/// Build MODE STREAM command (RFC 4644 Section 2.3)
pub fn mode_stream() -> &'static str {
    "MODE STREAM\r\n"
}

/// Build CHECK command (RFC 4644 Section 2.4)
pub fn check(message_id: &str) -> String {
    format!("CHECK {}\r\n", message_id)
}

/// Build TAKETHIS command line (RFC 4644 Section 2.5)
///
/// The dot-stuffed article must follow immediately.
pub fn takethis(message_id: &str) -> String {
    format!("TAKETHIS {}\r\n", message_id)
}

/// Build ARTICLE command for a message-id
pub fn article(message_id: &str) -> String {
    format!("ARTICLE {}\r\n", message_id)
}

/// Build GROUP command
pub fn group(newsgroup: &str) -> String {
    format!("GROUP {}\r\n", newsgroup)
}

/// Build XOVER command
pub fn xover(range: &str) -> String {
    format!("XOVER {}\r\n", range)
}

/// Build the all-time NEWSGROUPS command used by the scraper
///
/// The epoch-ago timestamp asks the peer for every group it carries.
pub fn newsgroups_all() -> &'static str {
    "NEWSGROUPS 1 000000 GMT\r\n"
}

/// Parse an NNTP status line into code and message
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
    {
        return Err(NntpError::InvalidResponse(line.chars().take(100).collect()));
    }

    // A fourth digit means a malformed code like "2000", not "200" + message
    if bytes.len() > 3 && bytes[3].is_ascii_digit() {
        return Err(NntpError::InvalidResponse(line.chars().take(100).collect()));
    }

    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| NntpError::InvalidResponse(line.chars().take(100).collect()))?;

    let message = if line.len() > 3 {
        if bytes[3] == b' ' {
            line[4..].to_string()
        } else {
            line[3..].to_string()
        }
    } else {
        String::new()
    };

    Ok((code, message))
}

/// Parse a single-line NNTP response
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;

    Ok(NntpResponse {
        code,
        message,
        lines: vec![],
    })
}

/// Format a status reply line (no CRLF)
pub fn format_status(code: u16, message_id: &str, text: &str) -> String {
    if text.is_empty() {
        format!("{} {}", code, message_id)
    } else {
        format!("{} {} {}", code, message_id, text)
    }
}

/// One row of overview output
///
/// Overlay overview rows are tab-separated with the message-id in field 4
/// and the references in field 5, which is all the scraper reads.
#[derive(Debug, Clone)]
pub struct XoverEntry {
    /// Article number within the newsgroup
    pub article_number: u64,
    /// Article subject line
    pub subject: String,
    /// Article author
    pub author: String,
    /// Article date string
    pub date: String,
    /// Unique message-id
    pub message_id: String,
    /// References header of the article (root post of the thread)
    pub references: String,
}

impl XoverEntry {
    /// Format the row for the wire (no line terminator)
    pub fn format(&self) -> String {
        format!(
            "{:06}\t{}\t{}\t{}\t{}\t{}",
            self.article_number,
            self.subject,
            self.author,
            self.date,
            self.message_id,
            self.references
        )
    }
}

/// Parse an overview row into components
///
/// Rows with fewer than six fields are not valid overview output.
pub fn parse_xover_line(line: &str) -> Result<XoverEntry> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 6 {
        return Err(NntpError::InvalidResponse(line.to_string()));
    }

    Ok(XoverEntry {
        article_number: parts[0].parse().unwrap_or(0),
        subject: parts[1].to_string(),
        author: parts[2].to_string(),
        date: parts[3].to_string(),
        message_id: parts[4].to_string(),
        references: parts[5].to_string(),
    })
}

/// Extract the group name from one NEWSGROUPS listing line
///
/// Lines are `group low high status`; only the first token matters here.
pub fn parse_newsgroups_line(line: &str) -> Option<&str> {
    let name = line.split_whitespace().next()?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builders() {
        assert_eq!(check("<a@b>"), "CHECK <a@b>\r\n");
        assert_eq!(takethis("<a@b>"), "TAKETHIS <a@b>\r\n");
        assert_eq!(article("<a@b>"), "ARTICLE <a@b>\r\n");
        assert_eq!(group("overchan.test"), "GROUP overchan.test\r\n");
        assert_eq!(xover("0"), "XOVER 0\r\n");
        assert_eq!(newsgroups_all(), "NEWSGROUPS 1 000000 GMT\r\n");
    }

    #[test]
    fn test_parse_response_line() {
        let (code, msg) = parse_response_line("200 Posting Allowed").unwrap();
        assert_eq!(code, 200);
        assert_eq!(msg, "Posting Allowed");

        let (code, msg) = parse_response_line("438 <a@b>").unwrap();
        assert_eq!(code, 438);
        assert_eq!(msg, "<a@b>");
    }

    #[test]
    fn test_parse_response_line_invalid() {
        assert!(parse_response_line("").is_err());
        assert!(parse_response_line("ab").is_err());
        assert!(parse_response_line("TAKETHIS <a@b>").is_err());
        assert!(parse_response_line("2000 message").is_err());
    }

    #[test]
    fn test_parse_response_line_missing_space() {
        let (code, msg) = parse_response_line("203Stream").unwrap();
        assert_eq!(code, 203);
        assert_eq!(msg, "Stream");

        let (code, msg) = parse_response_line("205").unwrap();
        assert_eq!(code, 205);
        assert_eq!(msg, "");
    }

    #[test]
    fn test_status_round_trip() {
        let line = format_status(439, "<a@b>", "newsgroup banned");
        let (code, msg) = parse_response_line(&line).unwrap();
        assert_eq!(code, 439);
        let mut parts = msg.splitn(2, ' ');
        assert_eq!(parts.next(), Some("<a@b>"));
        assert_eq!(parts.next(), Some("newsgroup banned"));
    }

    #[test]
    fn test_xover_round_trip() {
        let entry = XoverEntry {
            article_number: 7,
            subject: "hello".to_string(),
            author: "\"anon\" <anon@overchan>".to_string(),
            date: "Thu, 02 Jan 2025 00:00:00 +0000".to_string(),
            message_id: "<x@y>".to_string(),
            references: "<r@y>".to_string(),
        };
        let parsed = parse_xover_line(&entry.format()).unwrap();
        assert_eq!(parsed.article_number, 7);
        assert_eq!(parsed.message_id, "<x@y>");
        assert_eq!(parsed.references, "<r@y>");
    }

    #[test]
    fn test_parse_xover_line_short() {
        assert!(parse_xover_line("1\tsubject\tauthor").is_err());
        assert!(parse_xover_line("").is_err());
    }

    #[test]
    fn test_parse_newsgroups_line() {
        assert_eq!(
            parse_newsgroups_line("overchan.test 0 10 y"),
            Some("overchan.test")
        );
        assert_eq!(parse_newsgroups_line("solo"), Some("solo"));
        assert_eq!(parse_newsgroups_line("   "), None);
    }
}
