//! readly: a personal feed reader.
//!
//! Subscribes to RSS 2.0, Atom, and RDF/RSS 1.0 feeds, normalizes them
//! into one canonical model, and keeps a local SQLite store with
//! per-item read/star state and optional AI summaries. The ingestion
//! pipeline lives in [`feed`], persistence in [`storage`].

pub mod config;
pub mod feed;
pub mod storage;
pub mod summarize;
