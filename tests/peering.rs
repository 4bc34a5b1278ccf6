//! End-to-end peering tests over loopback TCP
//!
//! Each test stands up a daemon on an ephemeral port and speaks raw NNTP
//! at it, or scripts a fake remote peer and lets the daemon dial it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use overchan::{
    ArticleEntry, Config, Daemon, FeedConfig, Mailboxes, MemoryIndex, PeerIndex, PreferMode,
};

const WAIT: Duration = Duration::from_secs(5);

struct TestNode {
    daemon: Arc<Daemon>,
    mailboxes: Mailboxes,
    index: Arc<MemoryIndex>,
    addr: SocketAddr,
    _dir: tempfile::TempDir,
}

async fn start_node(allow_anon: bool) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        instance_name: "test.node".to_string(),
        bind: "127.0.0.1:0".to_string(),
        store_dir: dir.path().join("articles").to_string_lossy().into_owned(),
        allow_anon,
        allow_anon_attachments: false,
        feeds: vec![],
    };
    let index = Arc::new(MemoryIndex::new());
    let (daemon, mailboxes) = Daemon::with_index(config, index.clone()).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(daemon.clone().serve(listener));

    TestNode {
        daemon,
        mailboxes,
        index,
        addr,
        _dir: dir,
    }
}

/// Raw NNTP wire to a listening daemon
struct Wire {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Wire {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = socket.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    async fn send_raw(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for line")
            .unwrap();
        assert!(n > 0, "peer closed connection");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn lines_until_dot(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            if line == "." {
                return lines;
            }
            let line = if line.starts_with("..") {
                line[1..].to_string()
            } else {
                line
            };
            lines.push(line);
        }
    }
}

#[tokio::test]
async fn admit_path_streams_article_into_store() {
    let mut node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;

    assert!(wire.line().await.starts_with("200"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    wire.send("CHECK <a@b>").await;
    assert_eq!(wire.line().await, "238 <a@b>");

    wire.send_raw(
        "TAKETHIS <a@b>\r\nMessage-Id: <a@b>\r\nNewsgroups: overchan.test\r\n\r\nhello world\r\n.\r\n",
    )
    .await;
    assert_eq!(wire.line().await, "239 <a@b> gotten");

    let loaded = timeout(WAIT, node.mailboxes.infeed_load.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, "<a@b>");
    assert!(node.daemon.store().has_article("<a@b>").await);

    // round trip: the body comes back byte-identical over ARTICLE
    wire.send("ARTICLE <a@b>").await;
    assert_eq!(wire.line().await, "220 <a@b>");
    let lines = wire.lines_until_dot().await;
    assert_eq!(
        lines,
        vec![
            "Message-Id: <a@b>",
            "Newsgroups: overchan.test",
            "",
            "hello world"
        ]
    );
}

#[tokio::test]
async fn duplicate_article_gets_438() {
    let node = start_node(true).await;
    node.index.mark_seen("<a@b>", false);

    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    wire.send("CHECK <a@b>").await;
    assert_eq!(wire.line().await, "438 <a@b>");
}

#[tokio::test]
async fn banned_newsgroup_discards_body_and_bans_article() {
    let node = start_node(true).await;
    node.index.ban_newsgroup("spam");

    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    wire.send_raw(
        "TAKETHIS <bad@b>\r\nMessage-Id: <bad@b>\r\nNewsgroups: spam\r\n\r\njunk\r\n.\r\n",
    )
    .await;
    assert_eq!(wire.line().await, "439 <bad@b> newsgroup banned");
    assert!(node.index.article_banned("<bad@b>").unwrap());
    assert!(!node.daemon.store().has_article("<bad@b>").await);

    // the body was consumed cleanly: the connection still parses commands
    wire.send("CHECK <ok@b>").await;
    assert_eq!(wire.line().await, "238 <ok@b>");
}

#[tokio::test]
async fn missing_root_post_is_requested() {
    let mut node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;

    assert!(wire.line().await.starts_with("200"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    wire.send_raw(
        "TAKETHIS <reply@b>\r\nMessage-Id: <reply@b>\r\nNewsgroups: overchan.test\r\nReferences: <root@x>\r\n\r\nre: hi\r\n.\r\n",
    )
    .await;
    assert_eq!(wire.line().await, "239 <reply@b> gotten");

    let entry = timeout(WAIT, node.mailboxes.ask_for_article.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        entry,
        ArticleEntry {
            message_id: "<root@x>".to_string(),
            newsgroup: "overchan.test".to_string(),
        }
    );
}

#[tokio::test]
async fn mode_is_write_once() {
    let node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;

    assert!(wire.line().await.starts_with("200"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    // a different mode is rejected, a repeat is a no-op
    wire.send("MODE READER").await;
    assert!(wire.line().await.starts_with("501"));
    wire.send("MODE STREAM").await;
    assert!(wire.line().await.starts_with("203"));

    // still in streaming mode
    wire.send("CHECK <a@b>").await;
    assert_eq!(wire.line().await, "238 <a@b>");
}

#[tokio::test]
async fn ihave_transfer_and_duplicate() {
    let node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));

    wire.send("IHAVE <i@b>").await;
    assert!(wire.line().await.starts_with("335"));
    wire.send_raw("Message-Id: <i@b>\r\nNewsgroups: overchan.test\r\n\r\nvia ihave\r\n.\r\n")
        .await;
    assert!(wire.line().await.starts_with("235"));
    assert!(node.daemon.store().has_article("<i@b>").await);

    node.index.mark_seen("<i@b>", true);
    wire.send("IHAVE <i@b>").await;
    assert!(wire.line().await.starts_with("435"));
}

#[tokio::test]
async fn post_uses_generated_message_id() {
    let mut node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));

    wire.send("POST").await;
    assert!(wire.line().await.starts_with("340"));
    wire.send_raw("Newsgroups: overchan.test\r\nSubject: hi\r\n\r\nposted body\r\n.\r\n")
        .await;
    assert!(wire.line().await.starts_with("240"));

    let loaded = timeout(WAIT, node.mailboxes.infeed_load.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(loaded.ends_with("@test.node>"), "{loaded}");
    assert!(node.daemon.store().has_article(&loaded).await);
}

#[tokio::test]
async fn capabilities_and_group_commands() {
    let node = start_node(true).await;
    node.index.add_newsgroup("overchan.test");

    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));

    wire.send("CAPABILITIES").await;
    assert!(wire.line().await.starts_with("101"));
    let caps = wire.lines_until_dot().await;
    assert!(caps.contains(&"STREAMING".to_string()));
    assert!(caps.contains(&"READER".to_string()));
    assert!(caps.contains(&"IMPLEMENTATION srndv2".to_string()));

    wire.send("GROUP overchan.test").await;
    assert_eq!(wire.line().await, "211 0 0 0 overchan.test");
    wire.send("GROUP nope.not.here").await;
    assert!(wire.line().await.starts_with("411"));

    wire.send("XOVER 0").await;
    assert!(wire.line().await.starts_with("224"));
    assert!(wire.lines_until_dot().await.is_empty());

    wire.send("BOGUS thing").await;
    assert!(wire.line().await.starts_with("500"));

    wire.send("QUIT").await;
    assert!(wire.line().await.starts_with("205"));
}

#[tokio::test]
async fn xover_without_group_gets_412() {
    let node = start_node(true).await;
    let mut wire = Wire::connect(node.addr).await;
    assert!(wire.line().await.starts_with("200"));
    wire.send("XOVER 0").await;
    assert!(wire.line().await.starts_with("412"));
}

/// Scripted remote peer for the scrape test. Answers the daemon's reader
/// handshake and serves one group with one article, recording every
/// command it sees.
async fn scripted_scrape_peer(listener: TcpListener, commands: Arc<Mutex<Vec<String>>>) {
    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    writer.write_all(b"200 fake peer ready\r\n").await.unwrap();

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        commands.lock().unwrap().push(line.clone());

        let reply: String = if line == "CAPABILITIES" {
            "101 capabilities follow\r\nVERSION 2\r\nREADER\r\n.\r\n".to_string()
        } else if line == "MODE READER" {
            "201 reader mode ok\r\n".to_string()
        } else if line.starts_with("NEWSGROUPS") {
            "231 list follows\r\ng1 1 1 y\r\ng2 1 1 y\r\n.\r\n".to_string()
        } else if line == "GROUP g2" {
            "211 1 1 1 g2\r\n".to_string()
        } else if line == "XOVER 0" {
            "224 overview follows\r\n000001\tsubj\tanon <a@g2>\tdate\t<x@y>\t<r@y>\r\n.\r\n"
                .to_string()
        } else if line == "ARTICLE <r@y>" {
            "430 <r@y>\r\n".to_string()
        } else if line == "ARTICLE <x@y>" {
            "220 <x@y>\r\nMessage-Id: <x@y>\r\nNewsgroups: g2\r\nReferences: <r@y>\r\n\r\nscraped\r\n.\r\n"
                .to_string()
        } else if line == "QUIT" {
            return;
        } else {
            "500 what\r\n".to_string()
        };
        writer.write_all(reply.as_bytes()).await.unwrap();
    }
}

#[tokio::test]
async fn scrape_cycle_pulls_missing_articles() {
    let mut node = start_node(true).await;
    node.index.ban_newsgroup("g1");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = listener.local_addr().unwrap();
    let commands = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(scripted_scrape_peer(listener, commands.clone()));

    let feed = FeedConfig {
        name: "fake-peer".to_string(),
        addr: peer_addr.to_string(),
        prefer_mode: PreferMode::Reader,
        policy: Default::default(),
    };
    tokio::spawn(node.daemon.clone().dial_feed(feed));

    let loaded = timeout(WAIT, node.mailboxes.infeed_load.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, "<x@y>");
    assert!(node.daemon.store().has_article("<x@y>").await);

    let seen = commands.lock().unwrap().clone();
    assert!(!seen.iter().any(|c| c == "GROUP g1"), "banned group scraped: {seen:?}");
    let articles: Vec<&String> = seen.iter().filter(|c| c.starts_with("ARTICLE")).collect();
    assert_eq!(articles, ["ARTICLE <r@y>", "ARTICLE <x@y>"]);
}
