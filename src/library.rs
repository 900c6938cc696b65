//! Library import boundary.
//!
//! After a download finishes, the spooled file is handed to an importer
//! together with the catalog entry it came from. Importers take ownership
//! of the files: a successful import deletes the consumed temp files.
//! When no entry is available the caller keeps the spooled path and
//! handles the file manually instead.

use crate::opds::BookEntry;
use crate::util::sanitize_title;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Author shown when a catalog entry names none.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Consumer of finished downloads.
pub trait LibraryImport {
    /// Imports the files at `paths`. When `entry` is present the importer
    /// synthesizes metadata from it (title, authors, publisher) and is
    /// responsible for deleting the temp files after consuming them.
    fn import(&self, paths: &[PathBuf], entry: Option<&BookEntry>) -> anyhow::Result<()>;
}

/// Imports downloads into a flat directory, naming files
/// `"<title> - <first author>.<ext>"` from the catalog metadata.
pub struct DirectoryImport {
    dest: PathBuf,
}

impl DirectoryImport {
    pub fn new(dest: PathBuf) -> Self {
        Self { dest }
    }

    fn target_name(&self, path: &Path, entry: Option<&BookEntry>) -> String {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();

        match entry {
            Some(entry) => {
                let author = entry
                    .authors
                    .first()
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_AUTHOR);
                format!(
                    "{}.{}",
                    sanitize_title(&format!("{} - {}", entry.title, author)),
                    ext
                )
            }
            None => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(String::from)
                .unwrap_or_else(|| format!("download.{}", ext)),
        }
    }

    /// First free path for `name` in the destination, numbering duplicates
    /// rather than overwriting an existing book.
    fn free_path(&self, name: &str) -> PathBuf {
        let candidate = self.dest.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((s, e)) => (s.to_string(), format!(".{}", e)),
            None => (name.to_string(), String::new()),
        };
        let mut n = 1;
        loop {
            let candidate = self.dest.join(format!("{} ({}){}", stem, n, ext));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl LibraryImport for DirectoryImport {
    fn import(&self, paths: &[PathBuf], entry: Option<&BookEntry>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dest).with_context(|| {
            format!("Failed to create library directory {}", self.dest.display())
        })?;

        for path in paths {
            let dest = self.free_path(&self.target_name(path, entry));
            // Copy, not rename: the spool directory may sit on a
            // different filesystem.
            std::fs::copy(path, &dest)
                .with_context(|| format!("Failed to copy {} into library", path.display()))?;

            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete temp file");
            }
            tracing::info!(dest = %dest.display(), "Imported download");
        }
        Ok(())
    }
}
