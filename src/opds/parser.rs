use crate::opds::model::{
    AcquisitionFeed, BookEntry, Feed, Format, NavEntry, NavigationFeed,
};
use feed_rs::model::Link;
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Link-relation namespace prefix identifying downloadable-format links.
const ACQUISITION_REL: &str = "http://opds-spec.org/acquisition";
const SUBSECTION_REL: &str = "http://opds-spec.org/subsection";
const IMAGE_REL: &str = "http://opds-spec.org/image";
const COVER_REL: &str = "http://opds-spec.org/cover";
const THUMBNAIL_REL: &str = "http://opds-spec.org/image/thumbnail";

const UNTITLED: &str = "(no title)";

/// MIME types that identify a downloadable publication, with the short
/// extension each maps to. Matching is prefix-based so parameterized
/// types (`application/epub+zip;profile=...`) still resolve.
const ACQUISITION_TYPES: &[(&str, &str)] = &[
    ("application/epub+zip", "epub"),
    ("application/pdf", "pdf"),
    ("application/x-mobipocket-ebook", "mobi"),
    ("application/vnd.amazon.mobi8-ebook", "azw3"),
    ("application/fb2", "fb2"),
    ("application/zip", "zip"),
    ("application/x-cbz", "cbz"),
    ("application/x-cbr", "cbr"),
];

/// The feed XML was unrecoverably malformed and no entries could be
/// extracted at all. Slightly invalid feeds that still parse flow through.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to parse OPDS feed: {0}")]
    Malformed(String),
}

fn is_acquisition_type(mime: &str) -> bool {
    ACQUISITION_TYPES.iter().any(|(t, _)| mime.starts_with(t))
}

fn extension_for(mime: &str) -> String {
    ACQUISITION_TYPES
        .iter()
        .find(|(t, _)| mime.starts_with(t))
        .map(|(_, ext)| (*ext).to_string())
        // Unmapped types fall back to the MIME subtype
        .unwrap_or_else(|| mime.rsplit('/').next().unwrap_or(mime).to_string())
}

fn link_rel(link: &Link) -> &str {
    link.rel.as_deref().unwrap_or("")
}

fn link_type(link: &Link) -> &str {
    link.media_type.as_deref().unwrap_or("")
}

/// A link that carries (or strongly implies) a downloadable format:
/// either an acquisition relation, or no relation at all but a known
/// publication MIME type.
fn is_acquisition_link(link: &Link) -> bool {
    let rel = link_rel(link);
    rel.starts_with(ACQUISITION_REL) || (rel.is_empty() && is_acquisition_type(link_type(link)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Navigation,
    Acquisition,
}

/// Infers the feed kind from link relations and MIME types.
///
/// OPDS has no explicit type tag, so the kind is decided by a priority
/// list; the first matching rule wins:
///
/// 1. any entry carries an acquisition link → acquisition
/// 2. the self link's type declares `kind=acquisition` / `kind=navigation`
/// 3. any entry carries a link typed as an Atom feed → navigation
/// 4. default: navigation
fn classify(feed: &feed_rs::model::Feed) -> FeedKind {
    if feed
        .entries
        .iter()
        .any(|e| e.links.iter().any(is_acquisition_link))
    {
        return FeedKind::Acquisition;
    }

    if let Some(self_link) = feed.links.iter().find(|l| link_rel(l) == "self") {
        let declared = link_type(self_link);
        if declared.contains("kind=acquisition") {
            return FeedKind::Acquisition;
        }
        if declared.contains("kind=navigation") {
            return FeedKind::Navigation;
        }
    }

    if feed.entries.iter().any(|e| {
        e.links
            .iter()
            .any(|l| link_type(l).contains("application/atom+xml"))
    }) {
        return FeedKind::Navigation;
    }

    FeedKind::Navigation
}

/// Parses raw feed bytes into the normalized model.
///
/// Classification happens on the structured parse; acquisition feeds get a
/// second, narrow structural scan of the same bytes for fields the
/// structured parser does not surface (publisher, result count).
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    let parsed = parser::parse(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;
    let title = parsed
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();

    match classify(&parsed) {
        FeedKind::Navigation => Ok(Feed::Navigation(parse_navigation(parsed, title))),
        FeedKind::Acquisition => Ok(Feed::Acquisition(parse_acquisition(parsed, title, bytes))),
    }
}

fn parse_navigation(parsed: feed_rs::model::Feed, title: String) -> NavigationFeed {
    let entries = parsed
        .entries
        .into_iter()
        .map(|entry| {
            // Target: first alternate/subsection link, else the first link
            // at all. A link without a relation counts as alternate.
            let url = entry
                .links
                .iter()
                .find(|l| {
                    let rel = l.rel.as_deref().unwrap_or("alternate");
                    rel == "alternate" || rel == "subsection" || rel == SUBSECTION_REL
                })
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
                .unwrap_or_default();

            NavEntry {
                title: entry_title(entry.title),
                url,
                content: entry.summary.map(|s| s.content).unwrap_or_default(),
            }
        })
        .collect();

    NavigationFeed { title, entries }
}

fn parse_acquisition(parsed: feed_rs::model::Feed, title: String, bytes: &[u8]) -> AcquisitionFeed {
    let next_url = parsed
        .links
        .iter()
        .find(|l| link_rel(l) == "next")
        .map(|l| l.href.clone());

    // Positional join: both passes enumerate entries in document order.
    // Atom does not strictly guarantee this holds for arbitrary producers;
    // known limitation, not hardened further.
    let scan = scan_extensions(bytes);

    let entries = parsed
        .entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let publisher = scan.publishers.get(i).cloned().unwrap_or_default();
            book_entry(entry, publisher)
        })
        .collect();

    AcquisitionFeed {
        title,
        entries,
        next_url,
        total_results: scan.total_results,
    }
}

fn entry_title(title: Option<feed_rs::model::Text>) -> String {
    title
        .map(|t| t.content)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

fn book_entry(entry: feed_rs::model::Entry, publisher: String) -> BookEntry {
    let authors = entry
        .authors
        .into_iter()
        .map(|p| p.name)
        .filter(|n| !n.is_empty())
        .collect();

    // Full-size cover beats thumbnail regardless of document order; within
    // each class the first link wins.
    let mut cover: Option<String> = None;
    let mut thumbnail: Option<String> = None;
    let mut formats = Vec::new();

    for link in &entry.links {
        let rel = link_rel(link);
        if rel == IMAGE_REL || rel == COVER_REL {
            if cover.is_none() {
                cover = Some(link.href.clone());
            }
        } else if rel == THUMBNAIL_REL {
            if thumbnail.is_none() {
                thumbnail = Some(link.href.clone());
            }
        } else if is_acquisition_link(link) {
            let mime = link_type(link);
            formats.push(Format {
                file_type: extension_for(mime),
                mime: mime.to_string(),
                url: link.href.clone(),
                size: link.length.unwrap_or(0),
            });
        }
    }

    BookEntry {
        title: entry_title(entry.title),
        authors,
        formats,
        summary: entry.summary.map(|s| s.content).unwrap_or_default(),
        cover_url: cover.or(thumbnail).unwrap_or_default(),
        publisher,
    }
}

// ============================================================================
// Structural scan
// ============================================================================

/// Fields recovered by the raw scan of the feed bytes.
#[derive(Debug, Default)]
struct RawExtensions {
    /// OpenSearch `totalResults`; 0 when missing or non-numeric.
    total_results: u64,
    /// Per-entry publisher in document order; empty string when absent.
    publishers: Vec<String>,
}

/// What the current text node is being collected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    TotalResults,
    DcPublisher,
    PublisherName,
    PublisherText,
}

/// Scans the raw XML for fields the structured parser does not surface:
/// the Dublin-Core `publisher` extension, Calibre-Web style
/// `<publisher><name>` elements, and the OpenSearch result count.
///
/// A scan failure must never abort the overall parse, so any structural
/// error yields the empty default.
fn scan_extensions(bytes: &[u8]) -> RawExtensions {
    try_scan(bytes).unwrap_or_default()
}

fn try_scan(bytes: &[u8]) -> Option<RawExtensions> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut out = RawExtensions::default();
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut capture: Option<Capture> = None;

    let mut in_entry = false;
    let mut in_publisher = false;
    // Per-entry candidates, merged at </entry>
    let mut dc_publisher: Option<String> = None;
    let mut publisher_name: Option<String> = None;
    let mut publisher_text: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) => {
                let name = e.name();
                let prefixed = name.prefix().is_some();
                match name.local_name().as_ref() {
                    b"entry" => {
                        in_entry = true;
                        dc_publisher = None;
                        publisher_name = None;
                        publisher_text = None;
                    }
                    b"totalResults" if !in_entry => {
                        capture = Some(Capture::TotalResults);
                        text.clear();
                    }
                    b"publisher" if in_entry && prefixed => {
                        // dcterms:publisher (or any prefixed form)
                        capture = Some(Capture::DcPublisher);
                        text.clear();
                    }
                    b"publisher" if in_entry => {
                        in_publisher = true;
                        capture = Some(Capture::PublisherText);
                        text.clear();
                    }
                    b"name" if in_publisher => {
                        capture = Some(Capture::PublisherName);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if capture.is_some() {
                    text.push_str(&t.unescape().ok()?);
                }
            }
            Event::End(e) => {
                let name = e.name();
                let prefixed = name.prefix().is_some();
                match name.local_name().as_ref() {
                    b"entry" => {
                        out.publishers.push(
                            dc_publisher
                                .take()
                                .or_else(|| publisher_name.take())
                                .or_else(|| publisher_text.take())
                                .unwrap_or_default(),
                        );
                        in_entry = false;
                        in_publisher = false;
                        capture = None;
                    }
                    b"totalResults" => {
                        if capture == Some(Capture::TotalResults) {
                            out.total_results = text.trim().parse().unwrap_or(0);
                        }
                        capture = None;
                    }
                    b"publisher" if prefixed => {
                        if capture == Some(Capture::DcPublisher) {
                            dc_publisher = Some(text.trim().to_string());
                        }
                        capture = None;
                    }
                    b"publisher" => {
                        if capture == Some(Capture::PublisherText) {
                            publisher_text =
                                Some(text.trim().to_string()).filter(|t| !t.is_empty());
                        }
                        in_publisher = false;
                        capture = None;
                    }
                    b"name" => {
                        if capture == Some(Capture::PublisherName) {
                            publisher_name = Some(text.trim().to_string());
                        }
                        capture = None;
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Some(out)
}
