//! Dot-stuffed multiline framing (RFC 3977 Section 3.1.1)
//!
//! Multiline payloads end with a line containing a single `.`; payload
//! lines beginning with `.` are byte-stuffed with an extra `.` on the wire.
//! Wire lines are CRLF; decoded payloads use LF, which is the on-disk
//! article format.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NntpError, Result};

/// Decode a dot-stuffed block into `sink`, one LF-terminated line at a time
///
/// Returns the number of payload bytes written. The terminator line is
/// consumed but not written.
pub async fn copy_body<R, W>(reader: &mut R, sink: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    loop {
        let mut line_bytes = Vec::with_capacity(512);
        reader.read_until(b'\n', &mut line_bytes).await?;

        if line_bytes.is_empty() {
            return Err(NntpError::ConnectionClosed);
        }

        if line_bytes == b".\r\n" || line_bytes == b".\n" {
            break;
        }

        let content_end = if line_bytes.ends_with(b"\r\n") {
            line_bytes.len() - 2
        } else if line_bytes.ends_with(b"\n") {
            line_bytes.len() - 1
        } else {
            line_bytes.len()
        };
        let line_content = &line_bytes[..content_end];

        // Byte-stuffed lines ("..foo") lose their first dot
        let line_content = if line_content.starts_with(b"..") {
            &line_content[1..]
        } else {
            line_content
        };

        sink.write_all(line_content).await?;
        sink.write_all(b"\n").await?;
        written += line_content.len() as u64 + 1;
    }

    Ok(written)
}

/// Consume and discard a dot-stuffed block
pub async fn discard_body<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<u64> {
    copy_body(reader, &mut tokio::io::sink()).await
}

/// Read a dot-terminated block as text lines, byte-stuffing removed
pub async fn read_lines<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(64);

    loop {
        let mut line_bytes = Vec::with_capacity(512);
        reader.read_until(b'\n', &mut line_bytes).await?;

        if line_bytes.is_empty() {
            return Err(NntpError::ConnectionClosed);
        }

        let line = String::from_utf8_lossy(&line_bytes);
        let line = line.trim_end_matches(['\r', '\n']);

        if line == "." {
            break;
        }

        let line = if line.starts_with("..") { &line[1..] } else { line };
        lines.push(line.to_string());
    }

    Ok(lines)
}

/// Encode `data` as a dot-stuffed block, terminator included
///
/// `data` is LF-separated article bytes as stored on disk; each line goes
/// out CRLF-terminated with leading dots stuffed.
pub async fn write_body<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(data.len() + data.len() / 32 + 8);

    let mut segments = data.split(|&b| b == b'\n').peekable();
    while let Some(segment) = segments.next() {
        // A trailing LF produces one empty tail segment, not an empty line
        if segment.is_empty() && segments.peek().is_none() && data.ends_with(b"\n") {
            break;
        }
        let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
        if segment.starts_with(b".") {
            buf.push(b'.');
        }
        buf.extend_from_slice(segment);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b".\r\n");

    writer.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(wire: &[u8]) -> Vec<u8> {
        let mut reader = BufReader::new(wire);
        let mut sink = Vec::new();
        copy_body(&mut reader, &mut sink).await.unwrap();
        sink
    }

    async fn encode(data: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        write_body(&mut wire, data).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn test_copy_body_unstuffs() {
        let body = decode(b"hello\r\n..dotted\r\nworld\r\n.\r\n").await;
        assert_eq!(body, b"hello\n.dotted\nworld\n");
    }

    #[tokio::test]
    async fn test_copy_body_lf_only_lines() {
        let body = decode(b"one\ntwo\n.\n").await;
        assert_eq!(body, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_copy_body_eof_before_terminator() {
        let mut reader = BufReader::new(&b"partial\r\n"[..]);
        let mut sink = Vec::new();
        assert!(matches!(
            copy_body(&mut reader, &mut sink).await,
            Err(NntpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_body_stuffs_and_terminates() {
        let wire = encode(b"hello\n.dotted\n").await;
        assert_eq!(wire, b"hello\r\n..dotted\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_write_body_empty() {
        let wire = encode(b"").await;
        assert_eq!(wire, b".\r\n");
    }

    #[tokio::test]
    async fn test_write_body_no_trailing_newline() {
        let wire = encode(b"tail").await;
        assert_eq!(wire, b"tail\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_round_trip() {
        let original: &[u8] = b"line one\n.starts with dot\n\nlast\n";
        let wire = encode(original).await;
        let decoded = decode(&wire).await;
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_read_lines() {
        let mut reader = BufReader::new(&b"VERSION 2\r\nSTREAMING\r\n..dot\r\n.\r\n"[..]);
        let lines = read_lines(&mut reader).await.unwrap();
        assert_eq!(lines, vec!["VERSION 2", "STREAMING", ".dot"]);
    }

    #[tokio::test]
    async fn test_discard_body() {
        let mut reader = BufReader::new(&b"junk\r\nmore\r\n.\r\nafter"[..]);
        discard_body(&mut reader).await.unwrap();
        let mut rest = String::new();
        tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut rest)
            .await
            .unwrap();
        assert_eq!(rest, "after");
    }
}
