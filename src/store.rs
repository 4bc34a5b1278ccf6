//! Content-addressed article store
//!
//! One regular file per article, named by its message-id, under the store
//! directory. Group membership is a symlink forest:
//! `store/<group>/<message-id>` points at `../<message-id>`. Ingestion goes
//! through a temp file in `store/tmp/` and a rename, so readers see either
//! nothing or the complete article, never a partial write. At most one
//! live sink exists per message-id; a second concurrent creator gets
//! [`NntpError::Busy`] and is expected to discard its input.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{NntpError, Result};

/// Subdirectory holding in-flight ingests
const TEMP_DIR: &str = "tmp";

/// Article store rooted at one directory
#[derive(Debug, Clone)]
pub struct ArticleStore {
    directory: PathBuf,
}

impl ArticleStore {
    /// Open the store, creating its directories if missing
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(directory.join(TEMP_DIR)).await?;
        Ok(Self { directory })
    }

    /// Root directory of the store
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Canonical path of an article
    pub fn filename(&self, message_id: &str) -> PathBuf {
        self.directory.join(message_id)
    }

    /// Is the complete article on disk?
    pub async fn has_article(&self, message_id: &str) -> bool {
        if safe_component(message_id).is_err() {
            return false;
        }
        match fs::metadata(self.filename(message_id)).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    /// Read the whole article
    pub async fn read_article(&self, message_id: &str) -> Result<Vec<u8>> {
        safe_component(message_id)?;
        Ok(fs::read(self.filename(message_id)).await?)
    }

    /// Open a single-writer sink for an article
    ///
    /// Returns [`NntpError::Busy`] when another task already holds a sink
    /// for the same message-id. Nothing is visible under the canonical name
    /// until [`TempSink::commit`].
    pub async fn create_temp(&self, message_id: &str) -> Result<TempSink> {
        safe_component(message_id)?;
        let temp_path = self.directory.join(TEMP_DIR).join(message_id);
        let final_path = self.filename(message_id);

        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(NntpError::Busy)
            }
            Err(err) => return Err(err.into()),
        };

        Ok(TempSink {
            file: Some(file),
            temp_path,
            final_path,
        })
    }

    /// Link an article into a group directory
    ///
    /// Idempotent: an existing link is a no-op.
    pub async fn store_symlink(&self, newsgroup: &str, message_id: &str) -> Result<()> {
        safe_component(newsgroup)?;
        safe_component(message_id)?;

        let group_dir = self.directory.join(newsgroup);
        fs::create_dir_all(&group_dir).await?;

        let link = group_dir.join(message_id);
        let target = Path::new("..").join(message_id);
        match fs::symlink(&target, &link).await {
            Ok(()) => {
                debug!("stored article {} in {}", message_id, newsgroup);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Invoke `hook` with every article name until it returns true
    ///
    /// Group and temp directories are skipped.
    pub async fn iterate_all<F>(&self, mut hook: F) -> Result<()>
    where
        F: FnMut(&str) -> bool,
    {
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if hook(name) {
                break;
            }
        }
        Ok(())
    }

    /// Invoke `hook` with every article name in a group until it returns true
    pub async fn iterate_group<F>(&self, newsgroup: &str, mut hook: F) -> Result<()>
    where
        F: FnMut(&str) -> bool,
    {
        safe_component(newsgroup)?;
        let mut entries = fs::read_dir(self.directory.join(newsgroup)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if hook(name) {
                break;
            }
        }
        Ok(())
    }
}

// path separators in a name would escape the store root
fn safe_component(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(NntpError::InvalidFormat(format!(
            "unsafe store name: {name:?}"
        )));
    }
    Ok(())
}

/// Writable sink for one in-flight article
///
/// Dropping the sink without committing removes the temp file, releasing
/// the message-id for the next ingest attempt.
#[derive(Debug)]
pub struct TempSink {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl TempSink {
    /// Flush and atomically publish the article under its canonical name
    pub async fn commit(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
        }
        if let Err(err) = fs::rename(&self.temp_path, &self.final_path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Drop the partial write and release the message-id
    pub async fn discard(mut self) {
        self.file.take();
        if let Err(err) = fs::remove_file(&self.temp_path).await {
            warn!("failed to remove temp file {:?}: {}", self.temp_path, err);
        }
    }
}

impl tokio::io::AsyncWrite for TempSink {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.file.as_mut() {
            Some(file) => std::pin::Pin::new(file).poll_write(cx, buf),
            None => std::task::Poll::Ready(Err(std::io::Error::other("sink already consumed"))),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => std::pin::Pin::new(file).poll_flush(cx),
            None => std::task::Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => std::pin::Pin::new(file).poll_shutdown(cx),
            None => std::task::Poll::Ready(Ok(())),
        }
    }
}

impl Drop for TempSink {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            // sink abandoned without commit/discard
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
