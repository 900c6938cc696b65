//! Normalized OPDS feed model.
//!
//! Every field here is validated and defaulted by the parser before it
//! enters the model, so downstream code never re-checks for missing data.

/// One link in a navigation (folder) feed.
///
/// `url` may be relative to the feed's own URL; the session resolves it
/// before fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    pub title: String,
    pub url: String,
    /// Entry summary, passed through verbatim.
    pub content: String,
}

/// One downloadable rendition of a book entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Short extension, e.g. "epub". Derived from the MIME type.
    pub file_type: String,
    pub mime: String,
    pub url: String,
    /// Declared size in bytes; 0 means unknown.
    pub size: u64,
}

/// One publication in an acquisition feed.
///
/// `formats` may be empty: the entry then has no downloadable content and
/// callers refuse the download with an explanation rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookEntry {
    pub title: String,
    /// Named authors in document order, not deduplicated.
    pub authors: Vec<String>,
    pub formats: Vec<Format>,
    pub summary: String,
    pub cover_url: String,
    pub publisher: String,
}

/// A feed whose entries link to further feeds (folders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationFeed {
    pub title: String,
    pub entries: Vec<NavEntry>,
}

/// A feed whose entries are downloadable publications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionFeed {
    pub title: String,
    pub entries: Vec<BookEntry>,
    /// Href of the feed-level `next` link, if the catalog is paginated.
    pub next_url: Option<String>,
    /// OpenSearch result count; 0 means unknown.
    pub total_results: u64,
}

/// The closed union produced by one parse. A feed is never both kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Navigation(NavigationFeed),
    Acquisition(AcquisitionFeed),
}

impl Feed {
    pub fn title(&self) -> &str {
        match self {
            Feed::Navigation(f) => &f.title,
            Feed::Acquisition(f) => &f.title,
        }
    }

    pub fn is_acquisition(&self) -> bool {
        matches!(self, Feed::Acquisition(_))
    }

    /// Pagination cursor; always `None` for navigation feeds.
    pub fn next_url(&self) -> Option<&str> {
        match self {
            Feed::Navigation(_) => None,
            Feed::Acquisition(f) => f.next_url.as_deref(),
        }
    }
}
