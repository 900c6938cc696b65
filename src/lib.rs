//! OPDS catalog client library.
//!
//! OPDS (Open Publication Distribution System) is an Atom-feed profile used
//! by ebook servers to expose browsable catalogs. This crate fetches those
//! feeds, classifies them as navigation (folders of sub-catalogs) or
//! acquisition (pages of downloadable books), and exposes session-based
//! traversal plus a download path:
//!
//! - [`opds`]: feed fetching ([`opds::Fetcher`]), classification and
//!   parsing ([`opds::parse_feed`]), and the normalized feed model
//! - [`session`]: the catalog session: breadcrumbed navigation, paging,
//!   search, and last-request-wins result application
//! - [`download`]: streaming a chosen format to a spool file and handing
//!   it to a library importer
//! - [`config`]: the ordered server-profile store
//! - [`library`]: the import boundary consumed after downloads
//!
//! # Example
//!
//! ```ignore
//! use folio::{config::ServerProfile, opds::Fetcher, session::CatalogSession};
//!
//! let fetcher = Fetcher::new()?;
//! let mut session = CatalogSession::new();
//! session.open(&fetcher, profile).await?;
//! // session.current_feed() is now a NavigationFeed or AcquisitionFeed
//! ```

pub mod config;
pub mod download;
pub mod library;
pub mod opds;
pub mod session;
pub mod util;
