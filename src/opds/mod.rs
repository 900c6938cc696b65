//! OPDS feed support: fetching, classification and parsing.
//!
//! OPDS feeds are Atom documents without an explicit type tag, so the
//! parser infers the feed kind heuristically from link relations and MIME
//! types and produces a closed [`Feed`] union:
//!
//! - [`fetcher`]: authenticated HTTP retrieval with transient-failure
//!   retry and download streaming
//! - [`parser`]: tolerant Atom parsing feeding the strict, fully
//!   defaulted model in [`model`]
//!
//! Real-world catalog servers emit slightly invalid feeds; anything the
//! parser can extract entries from stays browsable, and every model field
//! is defaulted before it leaves this module.

mod fetcher;
mod model;
mod parser;

pub use fetcher::{FetchError, Fetcher};
pub use model::{AcquisitionFeed, BookEntry, Feed, Format, NavEntry, NavigationFeed};
pub use parser::{parse_feed, ParseError};
