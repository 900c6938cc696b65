//! Download orchestrator.
//!
//! Streams a chosen format of an acquisition entry into a freshly created
//! spool file and optionally hands it to a [`LibraryImport`] collaborator.
//! The orchestrator is format-agnostic: when an entry offers several
//! formats, picking one is the caller's job.

use crate::config::ServerProfile;
use crate::library::LibraryImport;
use crate::opds::{BookEntry, FetchError, Fetcher, Format};
use crate::util::sanitize_title;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Invalid download URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Library import failed: {0}")]
    Import(String),
}

/// Result of a download request.
#[derive(Debug)]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    /// The entry has no downloadable content. This is an informational
    /// outcome the caller explains to the user, not a failure.
    NoFormats,
}

pub struct Downloader {
    spool_dir: PathBuf,
}

impl Downloader {
    /// Spools into the OS temp directory.
    pub fn new() -> Self {
        Self {
            spool_dir: std::env::temp_dir(),
        }
    }

    pub fn with_spool_dir(spool_dir: PathBuf) -> Self {
        Self { spool_dir }
    }

    /// Fetches `format` of `entry` into a spool file and returns its path.
    ///
    /// `format.url` is resolved against `base_url` (the feed the entry came
    /// from) when relative. A fetch failure removes the partial file; no
    /// import ever sees it.
    pub async fn download(
        &self,
        fetcher: &Fetcher,
        profile: &ServerProfile,
        entry: &BookEntry,
        format: &Format,
        base_url: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        if entry.formats.is_empty() {
            tracing::info!(title = %entry.title, "Entry has no downloadable formats");
            return Ok(DownloadOutcome::NoFormats);
        }

        let url = match base_url {
            Some(base) => Url::parse(base)?.join(&format.url)?.to_string(),
            None => format.url.clone(),
        };
        let path = self.spool_path(&entry.title, &format.file_type);

        match fetcher.fetch_to_path(&url, profile, &path).await {
            Ok(bytes) => {
                tracing::info!(
                    title = %entry.title,
                    format = %format.file_type,
                    bytes = bytes,
                    path = %path.display(),
                    "Download complete"
                );
                Ok(DownloadOutcome::Saved { path, bytes })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            path = %path.display(),
                            error = %remove_err,
                            "Failed to remove partial download"
                        );
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Downloads and hands `(path, entry)` to the importer, which takes
    /// ownership of the spool file on success.
    pub async fn download_and_import(
        &self,
        fetcher: &Fetcher,
        profile: &ServerProfile,
        entry: &BookEntry,
        format: &Format,
        base_url: Option<&str>,
        importer: &dyn LibraryImport,
    ) -> Result<DownloadOutcome, DownloadError> {
        let outcome = self
            .download(fetcher, profile, entry, format, base_url)
            .await?;
        if let DownloadOutcome::Saved { path, .. } = &outcome {
            importer
                .import(&[path.clone()], Some(entry))
                .map_err(|e| DownloadError::Import(e.to_string()))?;
        }
        Ok(outcome)
    }

    /// Spool filename: sanitized title prefix, a uniqueness suffix so
    /// repeated downloads never collide, and the format extension.
    fn spool_path(&self, title: &str, extension: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let extension = if extension.is_empty() { "bin" } else { extension };
        self.spool_dir
            .join(format!("{}-{:x}.{}", sanitize_title(title), nanos, extension))
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}
