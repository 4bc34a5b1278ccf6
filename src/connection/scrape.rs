//! Reader-mode backfill scraper
//!
//! On an outbound reader connection we enumerate the peer's groups, diff
//! each group's XOVER output against what we already hold, and pull every
//! article (and thread root) we are missing. An error in one group aborts
//! the whole scrape; the connection is closed by the caller.

use tracing::{debug, warn};

use crate::codec;
use crate::commands;
use crate::error::{NntpError, Result};
use crate::index::PeerIndex;
use crate::response::codes;
use crate::validation::validate_message_id;

use super::{send_command, Connection, Reader, SharedWriter};

impl Connection {
    /// Grab every post the remote server has that we don't
    pub(super) async fn scrape_server(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
    ) -> Result<()> {
        debug!("{} scrape remote server", self.name);

        send_command(writer, commands::newsgroups_all()).await?;
        let response = self.read_status(reader).await?;
        if response.code != codes::NEW_NEWSGROUPS_FOLLOW {
            return Err(NntpError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        let mut groups = Vec::new();
        for line in codec::read_lines(reader).await? {
            match commands::parse_newsgroups_line(&line) {
                Some(group) => groups.push(group.to_string()),
                None => warn!("{} invalid line in newsgroups response: {}", self.name, line),
            }
        }
        debug!("{} got list of {} newsgroups", self.name, groups.len());

        for group in groups {
            if self.daemon.index().newsgroup_banned(&group)? {
                continue;
            }
            if !self.policy.allows_newsgroup(&group) {
                continue;
            }
            self.scrape_group(reader, writer, &group).await?;
        }
        Ok(())
    }

    /// Scrape one newsgroup, pulling unknown articles and thread roots
    async fn scrape_group(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
        group: &str,
    ) -> Result<()> {
        debug!("{} scrape newsgroup {}", self.name, group);

        send_command(writer, &commands::group(group)).await?;
        let response = self.read_status(reader).await?;
        if response.code != codes::GROUP_SELECTED {
            warn!("{} says they don't have {}, skipping", self.name, group);
            return Ok(());
        }

        send_command(writer, &commands::xover("0")).await?;
        let response = self.read_status(reader).await?;
        if response.code != codes::OVERVIEW_INFO_FOLLOWS {
            return Err(NntpError::Protocol {
                code: response.code,
                message: response.message,
            });
        }

        // message-id -> references, in listing order
        let mut articles = Vec::new();
        for line in codec::read_lines(reader).await? {
            match commands::parse_xover_line(&line) {
                Ok(entry) => articles.push((entry.message_id, entry.references)),
                // not every peer pads overview rows; skip the short ones
                Err(_) => continue,
            }
        }

        for (message_id, reference) in articles {
            if self.wants_article(&reference)? {
                self.request_article(reader, writer, &reference).await?;
            }
            if self.wants_article(&message_id)? {
                self.request_article(reader, writer, &message_id).await?;
            }
        }
        Ok(())
    }

    /// Unknown, unbanned, and lexically valid?
    fn wants_article(&self, message_id: &str) -> Result<bool> {
        if message_id.is_empty() || validate_message_id(message_id).is_err() {
            return Ok(false);
        }
        if self.daemon.index().has_article(message_id)? {
            return Ok(false);
        }
        if self.daemon.index().article_banned(message_id)? {
            return Ok(false);
        }
        Ok(true)
    }

    /// Fetch one article and feed it through the shared ingestion flow
    pub(super) async fn request_article(
        &mut self,
        reader: &mut Reader,
        writer: &SharedWriter,
        message_id: &str,
    ) -> Result<()> {
        debug!("{} asking for {}", self.name, message_id);
        send_command(writer, &commands::article(message_id)).await?;

        let response = self.read_status(reader).await?;
        match response.code {
            codes::ARTICLE_FOLLOWS => {
                let headers = crate::article::read_header_block(reader).await?;
                self.ingest_article(message_id, &headers, reader).await?;
                Ok(())
            }
            codes::NO_SUCH_ARTICLE_ID => {
                debug!("{} not known by {}", message_id, self.name);
                Ok(())
            }
            _ => {
                warn!(
                    "{} invalid response to ARTICLE: {} {}",
                    self.name, response.code, response.message
                );
                Ok(())
            }
        }
    }
}
