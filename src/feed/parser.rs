//! The ingestion core: format detection, channel extraction, item
//! normalization, and feed assembly.
//!
//! Input is raw XML text in one of three divergent syndication formats;
//! output is the canonical [`Feed`] + [`FeedItem`] shape the rest of the
//! system depends on. The whole pipeline is a pure, synchronous transform:
//! fetching and persistence live elsewhere.
//!
//! Failure policy: a malformed item degrades field-by-field to documented
//! defaults and never aborts the feed. Only an unparseable document or an
//! unrecognized root format is a hard failure.

use uuid::Uuid;

use super::text::{self, TextValue};
use super::xml::{self, XmlNode};
use crate::storage::{Feed, FeedItem};

pub use super::xml::ParseError;

/// Title fallback for items that provide none.
const UNTITLED: &str = "Untitled";
/// Title fallback for feeds that provide none.
const UNKNOWN_FEED: &str = "Unknown Feed";

/// The detected syndication format, with the node downstream extraction
/// starts from. Mutually exclusive; detection is by root signature in
/// priority order.
#[derive(Debug)]
pub enum FeedFormat<'a> {
    /// RSS 2.0 — an `rss` root containing a `channel`.
    Rss(&'a XmlNode),
    /// Atom — a root `feed` element.
    Atom(&'a XmlNode),
    /// RDF/RSS 1.0 — an `rdf:RDF` root (items are siblings of the channel).
    Rdf(&'a XmlNode),
}

/// Classifies a parsed document by its root signature.
pub fn detect(doc: &XmlNode) -> Result<FeedFormat<'_>, ParseError> {
    if let Some(channel) = doc.child("rss").and_then(|rss| rss.child("channel")) {
        return Ok(FeedFormat::Rss(channel));
    }
    if let Some(feed) = doc.child("feed") {
        return Ok(FeedFormat::Atom(feed));
    }
    if let Some(rdf) = doc.child("rdf:RDF") {
        return Ok(FeedFormat::Rdf(rdf));
    }
    Err(ParseError::UnsupportedFormat)
}

/// Feed-level metadata extracted from the channel (or Atom feed) element.
#[derive(Debug)]
struct ChannelMeta {
    title: String,
    link: String,
    description: String,
    image_url: Option<String>,
}

/// Parses raw feed XML into a canonical [`Feed`].
///
/// `url` is the subscription URL: it becomes `Feed.url`, and serves as the
/// base-URL fallback when the feed declares no site link. The returned
/// feed carries a fresh synthetic id; persistence assigns its own.
pub fn parse_feed(xml_text: &str, url: &str) -> Result<Feed, ParseError> {
    let doc = xml::parse_document(xml_text)?;
    let feed_id = generate_id();

    let (meta, items) = match detect(&doc)? {
        FeedFormat::Rss(channel) => {
            let meta = rss_channel_meta(channel);
            let base = base_url(&meta.link, url);
            let items = channel
                .children_named("item")
                .map(|item| normalize_rss_item(item, &feed_id, &base))
                .collect();
            (meta, items)
        }
        FeedFormat::Atom(feed) => {
            let meta = atom_feed_meta(feed);
            let base = base_url(&meta.link, url);
            let items = feed
                .children_named("entry")
                .map(|entry| normalize_atom_entry(entry, &feed_id, &base))
                .collect();
            (meta, items)
        }
        FeedFormat::Rdf(rdf) => {
            // RDF reuses the RSS channel/item shapes, but items sit beside
            // the channel rather than inside it, and there is no feed image.
            let meta = match rdf.child("channel") {
                Some(channel) => {
                    let mut meta = rss_channel_meta(channel);
                    meta.image_url = None;
                    meta
                }
                None => ChannelMeta {
                    title: UNKNOWN_FEED.to_string(),
                    link: String::new(),
                    description: String::new(),
                    image_url: None,
                },
            };
            let base = base_url(&meta.link, url);
            let items = rdf
                .children_named("item")
                .map(|item| normalize_rss_item(item, &feed_id, &base))
                .collect();
            (meta, items)
        }
    };

    let base = base_url(&meta.link, url);
    let image_url = meta
        .image_url
        .map(|img| text::resolve_url(&base, &img).unwrap_or(img));

    Ok(Feed {
        id: feed_id,
        title: meta.title,
        url: url.to_string(),
        link: meta.link,
        description: meta.description,
        image_url,
        folder_id: None,
        last_fetched: Some(chrono::Utc::now().to_rfc3339()),
        items,
    })
}

/// The base URL for resolving relative references: the feed's own site
/// link, or the fetch URL when the feed declares none.
fn base_url<'a>(link: &'a str, fetch_url: &'a str) -> String {
    if link.is_empty() {
        fetch_url.to_string()
    } else {
        link.to_string()
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Channel Extraction
// ============================================================================

fn rss_channel_meta(channel: &XmlNode) -> ChannelMeta {
    let title = TextValue::from_node(channel.child("title")).into_string();
    ChannelMeta {
        title: non_empty_or(title, UNKNOWN_FEED),
        link: TextValue::from_node(channel.child("link")).into_string(),
        description: TextValue::from_node(channel.child("description")).into_string(),
        image_url: channel
            .child("image")
            .and_then(|img| img.child("url"))
            .and_then(|url| url.text())
            .map(str::to_string),
    }
}

fn atom_feed_meta(feed: &XmlNode) -> ChannelMeta {
    let title = TextValue::from_node(feed.child("title")).into_string();
    let icon = TextValue::from_node(feed.child("icon"));
    let logo = TextValue::from_node(feed.child("logo"));
    let image_url = if !icon.is_empty() {
        Some(icon.into_string())
    } else if !logo.is_empty() {
        Some(logo.into_string())
    } else {
        None
    };
    ChannelMeta {
        title: non_empty_or(title, UNKNOWN_FEED),
        link: atom_link(feed),
        description: TextValue::from_node(feed.child("subtitle")).into_string(),
        image_url,
    }
}

/// Resolves an Atom link set to a single href.
///
/// Prefers the entry whose `rel` is `alternate` or absent, falling back to
/// the first link, then the empty string.
fn atom_link(node: &XmlNode) -> String {
    let links: Vec<&XmlNode> = node.children_named("link").collect();
    let preferred = links
        .iter()
        .find(|l| matches!(l.attr("rel"), Some("alternate") | None))
        .or_else(|| links.first());
    preferred
        .and_then(|l| l.attr("href"))
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// Item Normalization
// ============================================================================

fn normalize_rss_item(item: &XmlNode, feed_id: &str, base: &str) -> FeedItem {
    let title = TextValue::from_node(item.child("title")).into_string();
    let link = TextValue::from_node(item.child("link")).into_string();

    // Prefer the richer full-content field over the summary field.
    let raw_content = first_non_empty([
        TextValue::from_node(item.child("content:encoded")),
        TextValue::from_node(item.child("description")),
    ]);
    let content = text::rewrite_img_srcs(&raw_content, base);

    let author = first_non_empty([
        TextValue::from_node(item.child("author")),
        TextValue::from_node(item.child("dc:creator")),
    ]);

    let pub_date = TextValue::from_node(item.child("pubDate")).into_string();
    let image_url = rss_image_url(item, &content, base);

    assemble_item(feed_id, title, link, content, author, pub_date, image_url)
}

fn normalize_atom_entry(entry: &XmlNode, feed_id: &str, base: &str) -> FeedItem {
    let title = TextValue::from_node(entry.child("title")).into_string();
    let link = atom_link(entry);

    let raw_content = first_non_empty([
        TextValue::from_node(entry.child("content")),
        TextValue::from_node(entry.child("summary")),
    ]);
    let content = text::rewrite_img_srcs(&raw_content, base);

    let author = entry
        .child("author")
        .and_then(|a| a.child("name"))
        .and_then(|n| n.text())
        .unwrap_or_default()
        .to_string();

    let pub_date = first_non_empty([
        TextValue::from_node(entry.child("updated")),
        TextValue::from_node(entry.child("published")),
    ]);

    let image_url = media_image_url(entry)
        .or_else(|| text::first_img_src(&content).map(str::to_string))
        .map(|src| text::resolve_url(base, &src).unwrap_or(src));

    assemble_item(feed_id, title, link, content, author, pub_date, image_url)
}

/// Image discovery for RSS items, in order: image enclosure, media:content,
/// media:thumbnail, first `<img src>` in the selected content. Every hit is
/// resolved against the base URL. Absence is `None`, never empty.
fn rss_image_url(item: &XmlNode, content: &str, base: &str) -> Option<String> {
    let enclosure = item.child("enclosure").and_then(|enc| {
        let is_image = enc
            .attr("type")
            .map(|t| t.starts_with("image/"))
            .unwrap_or(false);
        if is_image {
            enc.attr("url").map(str::to_string)
        } else {
            None
        }
    });

    enclosure
        .or_else(|| media_image_url(item))
        .or_else(|| text::first_img_src(content).map(str::to_string))
        .map(|src| text::resolve_url(base, &src).unwrap_or(src))
}

fn media_image_url(node: &XmlNode) -> Option<String> {
    node.child("media:content")
        .and_then(|m| m.attr("url"))
        .or_else(|| node.child("media:thumbnail").and_then(|m| m.attr("url")))
        .map(str::to_string)
}

fn assemble_item(
    feed_id: &str,
    title: String,
    link: String,
    content: String,
    author: String,
    pub_date: String,
    image_url: Option<String>,
) -> FeedItem {
    FeedItem {
        id: generate_id(),
        feed_id: feed_id.to_string(),
        title: non_empty_or(title, UNTITLED),
        link,
        content_snippet: text::snippet(&content),
        content,
        author,
        pub_date,
        image_url,
        is_read: false,
        is_starred: false,
        summary: None,
    }
}

fn first_non_empty<const N: usize>(candidates: [TextValue; N]) -> String {
    candidates
        .into_iter()
        .find(|v| !v.is_empty())
        .map(TextValue::into_string)
        .unwrap_or_default()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
