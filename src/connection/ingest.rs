//! Shared article ingestion
//!
//! TAKETHIS, IHAVE, POST, and reader-mode ARTICLE replies all funnel
//! through the same flow: filter on headers, then either discard the
//! dot-stuffed body and record a ban, or stream it into a store temp sink
//! and announce the new article on the infeed mailbox.

use tracing::{debug, warn};

use crate::article::Headers;
use crate::codec;
use crate::daemon::ArticleEntry;
use crate::error::{NntpError, Result};
use crate::filter::Verdict;
use crate::index::PeerIndex;
use crate::validation::validate_message_id;

use super::{Connection, Reader};

impl Connection {
    /// Run the admission filter and ingest or discard the body
    ///
    /// `message_id` names the article in the store: the command-line id for
    /// transfers, the generated id for POST. The reader must be positioned
    /// at the first body line; the dot terminator is always consumed.
    pub(super) async fn ingest_article(
        &self,
        message_id: &str,
        headers: &Headers,
        reader: &mut Reader,
    ) -> Result<Verdict> {
        let verdict = self.daemon.filter().check(headers);

        if let Some(reason) = verdict.reason() {
            warn!("{} rejected {} {}", self.name, message_id, reason);
            codec::discard_body(reader).await?;
            if validate_message_id(message_id).is_ok() {
                self.daemon.index().ban_article(message_id, reason)?;
            }
            return Ok(verdict);
        }

        self.request_missing_root(headers).await;

        let mut sink = match self.daemon.store().create_temp(message_id).await {
            Ok(sink) => sink,
            Err(NntpError::Busy) => {
                debug!("{} discarding {}, already being loaded", self.name, message_id);
                codec::discard_body(reader).await?;
                return Ok(verdict);
            }
            Err(err) => return Err(err),
        };

        let stored = async {
            headers.write_to(&mut sink).await?;
            codec::copy_body(reader, &mut sink).await?;
            Ok::<_, NntpError>(())
        }
        .await;

        match stored {
            Ok(()) => {
                sink.commit().await?;
                // block rather than drop; the infeed consumer sets the pace
                self.daemon
                    .infeed()
                    .send(message_id.to_string())
                    .await
                    .map_err(|_| NntpError::ConnectionClosed)?;
                Ok(verdict)
            }
            Err(err) => {
                warn!("{} error reading article {}: {}", self.name, message_id, err);
                sink.discard().await;
                Err(err)
            }
        }
    }

    /// Ask the hub to pull the thread root if we are missing it
    ///
    /// Best-effort: a full mailbox drops the request.
    async fn request_missing_root(&self, headers: &Headers) {
        let reference = headers.get("References");
        let newsgroup = headers.get("Newsgroups");
        if reference.is_empty() || validate_message_id(reference).is_err() {
            return;
        }
        if self.daemon.store().has_article(reference).await {
            return;
        }
        if self.daemon.index().is_expired(reference).unwrap_or(false) {
            return;
        }
        debug!("{} got reply to {} but we don't have it", self.name, reference);
        let entry = ArticleEntry {
            message_id: reference.to_string(),
            newsgroup: newsgroup.to_string(),
        };
        if self.daemon.ask_for().try_send(entry).is_err() {
            debug!("{} ask_for_article mailbox full, dropped", self.name);
        }
    }
}
