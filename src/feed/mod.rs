//! Feed ingestion: fetch, parse, normalize, and refresh.
//!
//! The pipeline runs in stages. [`xml`] turns raw bytes into a format-
//! agnostic element tree, [`parser`] detects RSS 2.0 / Atom / RDF and
//! normalizes channel metadata and items into the canonical model, and
//! [`fetcher`] wraps the whole thing behind HTTP plus the refresh engine
//! that dedups against the store. [`opml`] handles subscription-list
//! import and export.

pub mod fetcher;
pub mod opml;
pub mod parser;
pub mod text;
pub mod xml;

pub use fetcher::{
    build_client, fetch_and_parse_feed, refresh_all, refresh_feed, FeedStore, FetchError,
    RefreshError, RefreshGuard, RefreshOutcome,
};
pub use opml::{export_opml, import_outlines, parse_opml, ImportSummary, OpmlError};
pub use parser::{parse_feed, FeedFormat};
pub use xml::ParseError;
