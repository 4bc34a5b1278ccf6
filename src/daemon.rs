//! Daemon hub
//!
//! The hub owns the article store, the peer index, and the two mailboxes
//! the rest of the node consumes: `infeed_load` announces freshly stored
//! articles, `ask_for_article` carries pull requests for articles we
//! learned about but don't hold. Connections borrow the hub by shared
//! reference and never mutate it; per-peer state lives in the connections
//! themselves and in the peer registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{Config, FeedConfig, FeedPolicy};
use crate::connection::{Connection, StreamEvent};
use crate::error::{NntpError, Result};
use crate::filter::HeaderFilter;
use crate::index::{MemoryIndex, PeerIndex};
use crate::store::ArticleStore;

/// Capacity of the infeed_load mailbox
const INFEED_CAPACITY: usize = 64;

/// Capacity of the ask_for_article mailbox
const ASK_FOR_CAPACITY: usize = 64;

/// TCP connect timeout for dialed feeds
const DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before re-dialing a feed that dropped
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// A pull request: fetch this article, probably in this group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleEntry {
    /// Message-id to fetch
    pub message_id: String,
    /// Group the article was referenced from
    pub newsgroup: String,
}

/// Consumer ends of the hub mailboxes
pub struct Mailboxes {
    /// Message-ids of articles ready for downstream indexing; duplicates
    /// possible, the consumer must be idempotent
    pub infeed_load: mpsc::Receiver<String>,
    /// Articles worth pulling from peers
    pub ask_for_article: mpsc::Receiver<ArticleEntry>,
}

/// Hub-side handle to one live peer connection
pub struct PeerHandle {
    stream: mpsc::Sender<StreamEvent>,
    articles: mpsc::Sender<String>,
    policy: FeedPolicy,
}

impl PeerHandle {
    pub(crate) fn new(
        stream: mpsc::Sender<StreamEvent>,
        articles: mpsc::Sender<String>,
        policy: FeedPolicy,
    ) -> Self {
        Self {
            stream,
            articles,
            policy,
        }
    }
}

/// The daemon hub
pub struct Daemon {
    store: ArticleStore,
    index: Arc<dyn PeerIndex>,
    config: Config,
    infeed_tx: mpsc::Sender<String>,
    askfor_tx: mpsc::Sender<ArticleEntry>,
    peers: Mutex<HashMap<String, PeerHandle>>,
}

impl Daemon {
    /// Create a hub backed by the in-memory peer index
    pub async fn new(config: Config) -> Result<(Arc<Self>, Mailboxes)> {
        Self::with_index(config, Arc::new(MemoryIndex::new())).await
    }

    /// Create a hub over an externally provided peer index
    pub async fn with_index(
        config: Config,
        index: Arc<dyn PeerIndex>,
    ) -> Result<(Arc<Self>, Mailboxes)> {
        let store = ArticleStore::open(&config.store_dir).await?;
        let (infeed_tx, infeed_rx) = mpsc::channel(INFEED_CAPACITY);
        let (askfor_tx, askfor_rx) = mpsc::channel(ASK_FOR_CAPACITY);

        let daemon = Arc::new(Self {
            store,
            index,
            config,
            infeed_tx,
            askfor_tx,
            peers: Mutex::new(HashMap::new()),
        });
        let mailboxes = Mailboxes {
            infeed_load: infeed_rx,
            ask_for_article: askfor_rx,
        };
        Ok((daemon, mailboxes))
    }

    /// The article store
    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    /// The peer index
    pub fn index(&self) -> &Arc<dyn PeerIndex> {
        &self.index
    }

    /// Name of this instance, stamped into generated message-ids
    pub fn instance_name(&self) -> &str {
        &self.config.instance_name
    }

    /// Admission filter configured for this instance
    pub fn filter(&self) -> HeaderFilter {
        HeaderFilter::new(
            self.index.clone(),
            self.config.allow_anon,
            self.config.allow_anon_attachments,
        )
    }

    pub(crate) fn infeed(&self) -> &mpsc::Sender<String> {
        &self.infeed_tx
    }

    pub(crate) fn ask_for(&self) -> &mpsc::Sender<ArticleEntry> {
        &self.askfor_tx
    }

    /// Bind the configured listener, dial every feed, and accept peers
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        info!("listening on {}", self.config.bind);

        for feed in self.config.feeds.clone() {
            let daemon = self.clone();
            tokio::spawn(daemon.keep_feed(feed));
        }
        self.serve(listener).await
    }

    /// Accept inbound peers on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            let _ = socket.set_nodelay(true);
            let daemon = self.clone();
            tokio::spawn(daemon.handle_inbound(socket, addr.to_string()));
        }
    }

    async fn handle_inbound(self: Arc<Self>, socket: TcpStream, name: String) {
        debug!("{} inbound connection", name);
        let (connection, handle) =
            Connection::new(name.as_str(), FeedPolicy::default(), self.clone());
        self.register_peer(&name, handle);
        connection.run_inbound(socket).await;
        self.unregister_peer(&name);
        debug!("{} connection closed", name);
    }

    /// Dial one feed and drive it until the connection dies
    pub async fn dial_feed(self: Arc<Self>, feed: FeedConfig) -> Result<()> {
        let socket = dial(&feed.addr).await?;
        let (connection, handle) =
            Connection::new(feed.name.as_str(), feed.policy.clone(), self.clone());
        self.register_peer(&feed.name, handle);
        connection.run_outbound(socket, feed.prefer_mode).await;
        self.unregister_peer(&feed.name);
        Ok(())
    }

    async fn keep_feed(self: Arc<Self>, feed: FeedConfig) {
        loop {
            if let Err(err) = self.clone().dial_feed(feed.clone()).await {
                warn!("{} dial failed: {}", feed.name, err);
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    /// Offer a stored article to every streaming peer whose policy allows
    /// the group
    ///
    /// Blocks on a full stream channel until the peer drains it; offers
    /// are never dropped here, only deferred re-CHECKs are.
    pub async fn offer_article(&self, message_id: &str, newsgroup: &str) {
        let targets: Vec<(String, mpsc::Sender<StreamEvent>)> = {
            let peers = match self.peers.lock() {
                Ok(peers) => peers,
                Err(_) => return,
            };
            peers
                .iter()
                .filter(|(_, handle)| handle.policy.allows_newsgroup(newsgroup))
                .map(|(name, handle)| (name.clone(), handle.stream.clone()))
                .collect()
        };

        for (name, stream) in targets {
            let event = StreamEvent::Check(message_id.to_string());
            if stream.send(event).await.is_err() {
                debug!("{} went away before taking offer of {}", name, message_id);
            }
        }
    }

    /// Ask connected peers to pull an article, best-effort
    pub fn ask_peers_for(&self, message_id: &str, newsgroup: &str) {
        let peers = match self.peers.lock() {
            Ok(peers) => peers,
            Err(_) => return,
        };
        for (name, handle) in peers.iter() {
            if !handle.policy.allows_newsgroup(newsgroup) {
                continue;
            }
            if handle.articles.try_send(message_id.to_string()).is_err() {
                debug!("{} article request channel full, dropped {}", name, message_id);
            }
        }
    }

    fn register_peer(&self, name: &str, handle: PeerHandle) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(name.to_string(), handle);
        }
    }

    fn unregister_peer(&self, name: &str) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(name);
        }
    }
}

/// Dial a peer with the usual TCP tuning
async fn dial(addr: &str) -> Result<TcpStream> {
    use std::net::ToSocketAddrs;

    let addr = addr.to_string();
    let socket_addr = addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| NntpError::Other(format!("no address resolved for {addr}")))?;

    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;

    // connect while still blocking, then hand the socket to tokio
    let stream = timeout(
        DIAL_TIMEOUT,
        tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
            socket.connect(&socket_addr.into())?;
            socket.set_nonblocking(true)?;
            Ok(socket.into())
        }),
    )
    .await
    .map_err(|_| NntpError::Timeout)?
    .map_err(|err| NntpError::Other(format!("task join error: {err}")))??;

    Ok(TcpStream::from_std(stream)?)
}
