//! Per-peer protocol driver
//!
//! One driver task per TCP connection, inbound or outbound. The driver
//! owns the buffered read half; the write half sits behind a mutex shared
//! with the streaming sender, which is the sole steady-state writer once
//! STREAM mode is up. The mutex also covers the mode-switch exchange so a
//! command and its reply cannot interleave with stream traffic.

mod defer;
mod ingest;
mod scrape;
mod stream;

pub use defer::{DeferQueue, DEFER_DELAY};
pub use stream::StreamEvent;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::article::{self, read_header_block};
use crate::capabilities::Capabilities;
use crate::codec;
use crate::commands;
use crate::config::{FeedPolicy, PreferMode};
use crate::daemon::{Daemon, PeerHandle};
use crate::error::{NntpError, Result};
use crate::filter::Verdict;
use crate::index::PeerIndex;
use crate::response::{codes, NntpResponse};
use crate::validation::validate_message_id;

/// Bounded capacity of the CHECK/TAKETHIS stream channel
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Bounded capacity of the reader-mode article request channel
pub const ARTICLE_CHANNEL_CAPACITY: usize = 32;

/// Outbound handshake and mode-switch timeout
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) type Reader = BufReader<OwnedReadHalf>;
pub(crate) type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Negotiated submode of a connection, write-once after negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reader commands (ARTICLE/GROUP/XOVER), used for backfill
    Reader,
    /// Pipelined CHECK/TAKETHIS
    Stream,
}

enum Flow {
    Continue,
    Quit,
}

/// State for one peer connection
pub struct Connection {
    name: String,
    mode: Option<Mode>,
    group: Option<String>,
    policy: FeedPolicy,
    daemon: Arc<Daemon>,
    stream_tx: mpsc::Sender<StreamEvent>,
    stream_rx: Option<mpsc::Receiver<StreamEvent>>,
    article_rx: Option<mpsc::Receiver<String>>,
    defer: DeferQueue,
    sender_active: bool,
}

impl Connection {
    /// Create connection state plus the handle the hub keeps
    pub(crate) fn new(
        name: impl Into<String>,
        policy: FeedPolicy,
        daemon: Arc<Daemon>,
    ) -> (Self, PeerHandle) {
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let (article_tx, article_rx) = mpsc::channel(ARTICLE_CHANNEL_CAPACITY);
        let defer = DeferQueue::new(stream_tx.clone(), DEFER_DELAY);
        let handle = PeerHandle::new(stream_tx.clone(), article_tx, policy.clone());

        let connection = Self {
            name: name.into(),
            mode: None,
            group: None,
            policy,
            daemon,
            stream_tx,
            stream_rx: Some(stream_rx),
            article_rx: Some(article_rx),
            defer,
            sender_active: false,
        };
        (connection, handle)
    }

    /// Peer label used as the log prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive an accepted connection until QUIT or error
    pub async fn run_inbound(mut self, socket: TcpStream) {
        let (read_half, write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let writer: SharedWriter = Arc::new(Mutex::new(write_half));

        let result = async {
            let greeting = format!("{} Posting Allowed", codes::READY_POSTING_ALLOWED);
            send_line(&writer, &greeting).await?;
            self.command_loop(&mut reader, &writer).await
        }
        .await;

        if let Err(err) = result {
            warn!("{} connection error: {}", self.name, err);
        }
        let _ = writer.lock().await.shutdown().await;
    }

    /// Drive a dialed connection: handshake, arbitrate a mode, run it
    pub async fn run_outbound(mut self, socket: TcpStream, prefer: PreferMode) {
        let (read_half, write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let writer: SharedWriter = Arc::new(Mutex::new(write_half));

        let result = self.run_outbound_inner(&mut reader, &writer, prefer).await;
        if let Err(err) = result {
            warn!("{} connection error: {}", self.name, err);
            // polite best-effort QUIT before tearing the socket down
            let _ = send_command(&writer, commands::quit()).await;
        }
        let _ = writer.lock().await.shutdown().await;
    }

    async fn run_outbound_inner(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
        prefer: PreferMode,
    ) -> Result<()> {
        let caps = self.outbound_handshake(reader, writer).await?;

        match prefer {
            PreferMode::Stream if caps.supports_streaming() => {
                if !self.mode_switch(reader, writer, Mode::Stream).await? {
                    send_command(writer, commands::quit()).await?;
                    return Ok(());
                }
                self.mode = Some(Mode::Stream);
                self.spawn_sender(writer);
                self.command_loop(reader, writer).await
            }
            PreferMode::Reader if caps.supports_reader() => {
                if !self.mode_switch(reader, writer, Mode::Reader).await? {
                    send_command(writer, commands::quit()).await?;
                    return Ok(());
                }
                self.mode = Some(Mode::Reader);
                self.scrape_server(reader, writer).await?;
                self.reader_loop(reader, writer).await
            }
            _ => {
                debug!("{} supports neither preferred mode, quitting", self.name);
                send_command(writer, commands::quit()).await?;
                Ok(())
            }
        }
    }

    /// Read the greeting, then ask for capabilities
    async fn outbound_handshake(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
    ) -> Result<Capabilities> {
        debug!("{} outbound handshake", self.name);
        loop {
            let response = timeout(HANDSHAKE_TIMEOUT, self.read_status(reader))
                .await
                .map_err(|_| NntpError::Timeout)??;
            match response.code {
                codes::READY_POSTING_ALLOWED => {
                    send_command(writer, commands::capabilities()).await?;
                    let response = timeout(HANDSHAKE_TIMEOUT, self.read_status(reader))
                        .await
                        .map_err(|_| NntpError::Timeout)??;
                    if response.code != codes::CAPABILITY_LIST {
                        return Err(NntpError::Protocol {
                            code: response.code,
                            message: response.message,
                        });
                    }
                    let lines = codec::read_lines(reader).await?;
                    return Ok(Capabilities::parse(&lines));
                }
                codes::READY_NO_POSTING => {
                    warn!("{} does not allow posting", self.name);
                    return Err(NntpError::Protocol {
                        code: response.code,
                        message: response.message,
                    });
                }
                _ => continue,
            }
        }
    }

    /// Send `MODE STREAM` or `MODE READER` and accept any 2xx answer
    ///
    /// The writer lock is held for the command itself; the reply is read by
    /// the driver, which owns the read half outright. The sender task does
    /// not exist yet at every call site, so nothing can interleave.
    async fn mode_switch(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
        mode: Mode,
    ) -> Result<bool> {
        let command = match mode {
            Mode::Stream => commands::mode_stream(),
            Mode::Reader => commands::mode_reader(),
        };
        send_command(writer, command).await?;
        let response = timeout(HANDSHAKE_TIMEOUT, self.read_status(reader))
            .await
            .map_err(|_| NntpError::Timeout)??;
        let accepted = response.is_success();
        if accepted {
            debug!("{} switched to mode {:?}", self.name, mode);
        }
        Ok(accepted)
    }

    fn spawn_sender(&mut self, writer: &SharedWriter) {
        if let Some(rx) = self.stream_rx.take() {
            self.sender_active = true;
            tokio::spawn(stream::run_sender(
                self.name.clone(),
                self.daemon.clone(),
                rx,
                writer.clone(),
            ));
        }
    }

    /// Main dispatch loop: commands from the peer, or status replies to
    /// our pipelined stream traffic
    async fn command_loop(&mut self, reader: &mut Reader, writer: &SharedWriter) -> Result<()> {
        loop {
            let Some(line) = read_line(reader).await? else {
                return Ok(());
            };
            if line.is_empty() {
                continue;
            }
            if let Ok(response) = commands::parse_single_response(&line) {
                self.handle_response(response).await?;
            } else {
                match self.handle_command(&line, reader, writer).await? {
                    Flow::Continue => {}
                    Flow::Quit => return Ok(()),
                }
            }
        }
    }

    /// Ask the peer for articles the hub requested, one at a time
    async fn reader_loop(&mut self, reader: &mut Reader, writer: &SharedWriter) -> Result<()> {
        let Some(mut article_rx) = self.article_rx.take() else {
            return Ok(());
        };
        while let Some(message_id) = article_rx.recv().await {
            self.request_article(reader, writer, &message_id).await?;
        }
        Ok(())
    }

    /// Handle a status reply from the peer (stream-mode traffic)
    async fn handle_response(&mut self, response: NntpResponse) -> Result<()> {
        let message_id = response.message.split_whitespace().next().unwrap_or("");
        match response.code {
            codes::CHECK_SEND => {
                if validate_message_id(message_id).is_ok() && self.sender_active {
                    self.stream_tx
                        .send(StreamEvent::Takethis(message_id.to_string()))
                        .await
                        .map_err(|_| NntpError::ConnectionClosed)?;
                }
            }
            codes::TAKETHIS_RECEIVED => {
                debug!("{} sent via {}", message_id, self.name);
            }
            codes::CHECK_LATER => {
                debug!("defer sending {} to {}", message_id, self.name);
                self.defer.push(message_id.to_string());
            }
            codes::CHECK_NOT_WANTED => {
                debug!("{} doesn't want {}", self.name, message_id);
            }
            codes::TAKETHIS_REJECTED => {
                warn!(
                    "{} was not sent to {}, denied: {}",
                    message_id, self.name, response.message
                );
            }
            _ => {
                debug!(
                    "{} unhandled status {} {}",
                    self.name, response.code, response.message
                );
            }
        }
        Ok(())
    }

    /// Handle one command line from the peer
    async fn handle_command(
        &mut self,
        line: &str,
        reader: &mut Reader,
        writer: &SharedWriter,
    ) -> Result<Flow> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("").to_ascii_uppercase();
        let argument = parts.next().unwrap_or("");

        match command.as_str() {
            "CAPABILITIES" => {
                self.send_capabilities(writer).await?;
            }
            "MODE" => {
                self.handle_mode(argument, writer).await?;
            }
            "QUIT" => {
                send_line(writer, &format!("{} closing connection", codes::CLOSING_CONNECTION))
                    .await?;
                return Ok(Flow::Quit);
            }
            "CHECK" => {
                self.handle_check(argument, writer).await?;
            }
            "TAKETHIS" => {
                self.handle_takethis(argument, reader, writer).await?;
            }
            "IHAVE" => {
                self.handle_ihave(argument, reader, writer).await?;
            }
            "ARTICLE" => {
                self.handle_article(argument, writer).await?;
            }
            "POST" => {
                self.handle_post(reader, writer).await?;
            }
            "GROUP" => {
                self.handle_group(argument, writer).await?;
            }
            "NEWSGROUPS" => {
                self.handle_newsgroups(writer).await?;
            }
            "XOVER" => {
                self.handle_xover(writer).await?;
            }
            _ => {
                debug!("{} invalid command recv'd: {}", self.name, command);
                let reply =
                    format!("{} Invalid command: {command}", codes::COMMAND_NOT_RECOGNIZED);
                send_line(writer, &reply).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn send_capabilities(&self, writer: &SharedWriter) -> Result<()> {
        let mut block = format!("{} capability list follows\r\n", codes::CAPABILITY_LIST);
        for capability in ["VERSION 2", "READER", "STREAMING", "IMPLEMENTATION srndv2"] {
            block.push_str(capability);
            block.push_str("\r\n");
        }
        block.push_str(".\r\n");
        let mut guard = writer.lock().await;
        guard.write_all(block.as_bytes()).await?;
        Ok(())
    }

    /// MODE is write-once: a repeat of the same mode is a no-op, anything
    /// else is rejected
    async fn handle_mode(&mut self, argument: &str, writer: &SharedWriter) -> Result<()> {
        match (argument.to_ascii_uppercase().as_str(), self.mode) {
            ("READER", None) | ("READER", Some(Mode::Reader)) => {
                self.mode = Some(Mode::Reader);
                send_line(writer, &format!("{} No posting permitted", codes::READY_NO_POSTING))
                    .await?;
            }
            ("STREAM", None) => {
                self.mode = Some(Mode::Stream);
                send_line(writer, &format!("{} Streaming enabled", codes::STREAMING_OK)).await?;
                debug!("{} streaming enabled", self.name);
                self.spawn_sender(writer);
            }
            ("STREAM", Some(Mode::Stream)) => {
                send_line(writer, &format!("{} Streaming enabled", codes::STREAMING_OK)).await?;
            }
            (other, _) => {
                debug!("{} rejected mode request {}", self.name, other);
                let reply =
                    format!("{} invalid mode variant: {other}", codes::COMMAND_SYNTAX_ERROR);
                send_line(writer, &reply).await?;
            }
        }
        Ok(())
    }

    /// CHECK: 438 when we have it or banned it, 238 otherwise
    async fn handle_check(&self, message_id: &str, writer: &SharedWriter) -> Result<()> {
        if validate_message_id(message_id).is_err() {
            send_line(writer, &format!("{} syntax error", codes::COMMAND_SYNTAX_ERROR)).await?;
            return Ok(());
        }
        let unwanted = self.daemon.index().has_article(message_id)?
            || self.daemon.index().article_banned(message_id)?;
        if unwanted {
            send_line(writer, &commands::format_status(codes::CHECK_NOT_WANTED, message_id, ""))
                .await?;
        } else {
            send_line(writer, &commands::format_status(codes::CHECK_SEND, message_id, "")).await?;
        }
        Ok(())
    }

    async fn handle_takethis(
        &mut self,
        message_id: &str,
        reader: &mut Reader,
        writer: &SharedWriter,
    ) -> Result<()> {
        if validate_message_id(message_id).is_err() {
            // the inline article still has to be consumed to keep framing
            let _ = read_header_block(reader).await?;
            codec::discard_body(reader).await?;
            let reply =
                commands::format_status(codes::TAKETHIS_REJECTED, message_id, "invalid message id");
            return send_line(writer, &reply).await;
        }
        let headers = match read_header_block(reader).await {
            Ok(headers) => headers,
            Err(err) => {
                warn!("{} error reading mime header: {}", self.name, err);
                let reply =
                    commands::format_status(codes::TAKETHIS_REJECTED, message_id, "error reading mime header");
                let _ = send_line(writer, &reply).await;
                return Err(err);
            }
        };

        let verdict = self.ingest_article(message_id, &headers, reader).await?;
        let reply = match verdict {
            Verdict::Admit => commands::format_status(codes::TAKETHIS_RECEIVED, message_id, "gotten"),
            Verdict::Reject(reason) => {
                commands::format_status(codes::TAKETHIS_REJECTED, message_id, &reason)
            }
        };
        send_line(writer, &reply).await
    }

    async fn handle_ihave(
        &mut self,
        message_id: &str,
        reader: &mut Reader,
        writer: &SharedWriter,
    ) -> Result<()> {
        let unwanted = validate_message_id(message_id).is_err()
            || self.daemon.index().has_article_local(message_id)?
            || self.daemon.index().has_article(message_id)?
            || self.daemon.index().article_banned(message_id)?;
        if unwanted {
            send_line(writer, &format!("{} Article Not Wanted", codes::ARTICLE_NOT_WANTED))
                .await?;
            return Ok(());
        }

        send_line(writer, &format!("{} Send it", codes::SEND_ARTICLE_TRANSFER)).await?;
        let headers = match read_header_block(reader).await {
            Ok(headers) => headers,
            Err(err) => {
                let reply = format!("{} Transfer failed", codes::TRANSFER_NOT_POSSIBLE);
                let _ = send_line(writer, &reply).await;
                return Err(err);
            }
        };

        let verdict = self.ingest_article(message_id, &headers, reader).await?;
        match verdict {
            Verdict::Admit => {
                send_line(writer, &format!("{} article transferred ok", codes::ARTICLE_TRANSFERRED))
                    .await
            }
            Verdict::Reject(reason) => {
                send_line(writer, &commands::format_status(codes::TRANSFER_REJECTED, message_id, &reason))
                    .await
            }
        }
    }

    /// ARTICLE by message-id, from the local store
    async fn handle_article(&self, message_id: &str, writer: &SharedWriter) -> Result<()> {
        if validate_message_id(message_id).is_err() {
            send_line(writer, &format!("{} Syntax error", codes::COMMAND_NOT_RECOGNIZED)).await?;
            return Ok(());
        }
        if !self.daemon.store().has_article(message_id).await {
            send_line(writer, &commands::format_status(codes::NO_SUCH_ARTICLE_ID, message_id, ""))
                .await?;
            return Ok(());
        }
        match self.daemon.store().read_article(message_id).await {
            Ok(data) => {
                // one lock for status line plus body keeps the framing whole
                let mut guard = writer.lock().await;
                guard
                    .write_all(format!("{} {message_id}\r\n", codes::ARTICLE_FOLLOWS).as_bytes())
                    .await?;
                codec::write_body(&mut *guard, &data).await?;
                Ok(())
            }
            Err(err) => {
                warn!("{} failed to read {} from store: {}", self.name, message_id, err);
                let reply = format!("{} could not read article", codes::FEATURE_NOT_SUPPORTED);
                send_line(writer, &reply).await
            }
        }
    }

    async fn handle_post(&mut self, reader: &mut Reader, writer: &SharedWriter) -> Result<()> {
        send_line(writer, &format!("{} send article to be posted", codes::SEND_ARTICLE)).await?;

        let headers = read_header_block(reader).await;
        let outcome = match headers {
            Ok(mut headers) => {
                // the daemon names the article; whatever the client claims
                // as Message-ID is discarded
                let message_id = article::generate_message_id(self.daemon.instance_name());
                headers.set("Message-ID", message_id.clone());
                if headers.get("Date").is_empty() {
                    headers.set("Date", article::format_date_now());
                }
                self.ingest_article(&message_id, &headers, reader).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(Verdict::Admit) => {
                send_line(writer, &format!("{} article posted", codes::ARTICLE_POSTED)).await
            }
            Ok(Verdict::Reject(reason)) => {
                debug!("{} rejected POST: {}", self.name, reason);
                send_line(writer, &format!("{} Posting Failed", codes::POSTING_FAILED)).await
            }
            Err(err) => {
                warn!("{} failed nntp POST: {}", self.name, err);
                let _ = send_line(writer, &format!("{} Posting Failed", codes::POSTING_FAILED)).await;
                Err(err)
            }
        }
    }

    async fn handle_group(&mut self, newsgroup: &str, writer: &SharedWriter) -> Result<()> {
        if !self.daemon.index().has_newsgroup(newsgroup)? {
            send_line(writer, &format!("{} No Such Newsgroup", codes::NO_SUCH_GROUP)).await?;
            return Ok(());
        }
        self.group = Some(newsgroup.to_string());
        let count = self.daemon.index().count_posts(newsgroup)?;
        let reply = match self.daemon.index().group_range(newsgroup) {
            Ok((low, high)) => {
                format!("{} {count} {low} {high} {newsgroup}", codes::GROUP_SELECTED)
            }
            Err(err) => {
                warn!("{} error in GROUP command: {}", self.name, err);
                format!("{} {count} 0 1 {newsgroup}", codes::GROUP_SELECTED)
            }
        };
        send_line(writer, &reply).await
    }

    async fn handle_newsgroups(&self, writer: &SharedWriter) -> Result<()> {
        let mut block =
            format!("{} list of newsgroups follows\r\n", codes::NEW_NEWSGROUPS_FOLLOW);
        for newsgroup in self.daemon.index().all_newsgroups()? {
            match self.daemon.index().group_range(&newsgroup) {
                Ok((low, high)) => {
                    block.push_str(&format!("{newsgroup} {low} {high} y\r\n"));
                }
                Err(err) => {
                    warn!("{} no water marks for {}: {}", self.name, newsgroup, err);
                }
            }
        }
        block.push_str(".\r\n");
        let mut guard = writer.lock().await;
        guard.write_all(block.as_bytes()).await?;
        Ok(())
    }

    async fn handle_xover(&self, writer: &SharedWriter) -> Result<()> {
        let Some(group) = self.group.as_deref() else {
            let reply = format!("{} No newsgroup selected", codes::NO_GROUP_SELECTED);
            return send_line(writer, &reply).await;
        };
        match self.daemon.index().posts_in_group(group) {
            Ok(entries) => {
                let mut block =
                    format!("{} Overview information follows\r\n", codes::OVERVIEW_INFO_FOLLOWS);
                for entry in entries {
                    block.push_str(&entry.format());
                    block.push_str("\r\n");
                }
                block.push_str(".\r\n");
                let mut guard = writer.lock().await;
                guard.write_all(block.as_bytes()).await?;
                Ok(())
            }
            Err(err) => {
                warn!("{} error reading posts in {}: {}", self.name, group, err);
                let reply = format!("{} could not read overview", codes::FEATURE_NOT_SUPPORTED);
                send_line(writer, &reply).await
            }
        }
    }

    /// Read one status line
    pub(crate) async fn read_status(&self, reader: &mut Reader) -> Result<NntpResponse> {
        match read_line(reader).await? {
            Some(line) => commands::parse_single_response(&line),
            None => Err(NntpError::ConnectionClosed),
        }
    }
}

/// Write one CRLF-terminated line under the writer lock
pub(crate) async fn send_line(writer: &SharedWriter, line: &str) -> Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.write_all(b"\r\n").await?;
    Ok(())
}

/// Write a built command (the builders include the CRLF)
pub(crate) async fn send_command(writer: &SharedWriter, command: &str) -> Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(command.as_bytes()).await?;
    Ok(())
}

/// Read one line, line endings stripped; None at EOF
async fn read_line(reader: &mut Reader) -> Result<Option<String>> {
    let mut buf = Vec::with_capacity(512);
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
