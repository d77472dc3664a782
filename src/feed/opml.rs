//! OPML subscription import and export.
//!
//! Import flattens the outline tree into one record per subscription
//! (any `<outline>` carrying an `xmlUrl`), tagging each with the name of
//! its nearest enclosing non-leaf outline as the folder. Export emits an
//! OPML 2.0 document with feeds grouped under their folder outlines.

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::fetcher;
use crate::storage::{Database, Feed, Folder, OpmlOutline, StorageError};

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds the safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The document contains no outline elements at all.
    #[error("Invalid OPML file: no outlines found")]
    NoOutlines,

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses an OPML file from disk into a flat subscription list.
pub async fn parse_file(path: &str) -> Result<Vec<OpmlOutline>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Tally of one OPML import run.
#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Subscriptions fetched, ingested, and persisted with their items.
    pub imported: usize,
    /// Outlines whose URL was already subscribed.
    pub skipped: usize,
    /// Outlines whose fetch or parse failed; logged and left out.
    pub failed: usize,
}

/// Imports a flattened outline list: each new subscription is fetched
/// and ingested so the feed lands with its initial item batch, exactly
/// like a single `add`.
///
/// Fetch and parse failures are isolated per outline (logged, counted,
/// import continues); storage failures abort the run. Already-subscribed
/// URLs are skipped.
pub async fn import_outlines(
    db: &Database,
    client: &reqwest::Client,
    outlines: Vec<OpmlOutline>,
) -> Result<ImportSummary, StorageError> {
    let mut summary = ImportSummary::default();

    for outline in outlines {
        if db.url_exists(&outline.xml_url).await? {
            summary.skipped += 1;
            continue;
        }

        let mut feed = match fetcher::fetch_and_parse_feed(client, &outline.xml_url).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(feed = %outline.xml_url, error = %e, "Skipping unreachable feed during import");
                summary.failed += 1;
                continue;
            }
        };

        if let Some(name) = &outline.folder {
            let folder = db.find_or_create_folder(name).await?;
            feed.folder_id = Some(folder.id);
        }
        db.add_feed(&feed).await?;
        summary.imported += 1;
    }

    Ok(summary)
}

/// Parses OPML content into a flat list of subscription outlines.
///
/// Leaf outlines (those with an `xmlUrl`) become [`OpmlOutline`] records;
/// non-leaf outlines contribute only their name, which becomes the
/// `folder` of every subscription nested beneath them. Leaf titles fall
/// back `title` → `text` → `"Untitled"`.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlOutline>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines = Vec::new();
    let mut seen_any = false;
    // One entry per open <outline>: Some(name) for folder outlines,
    // None for subscription outlines that happen to have children.
    let mut stack: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                seen_any = true;
                if stack.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let attrs = OutlineAttrs::read(&e, &reader);
                if attrs.xml_url.is_some() {
                    if let Some(outline) = attrs.into_outline(current_folder(&stack)) {
                        outlines.push(outline);
                    }
                    stack.push(None);
                } else {
                    // Folder outline: its name scopes everything below.
                    stack.push(Some(attrs.folder_name()));
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                seen_any = true;
                let attrs = OutlineAttrs::read(&e, &reader);
                if let Some(outline) = attrs.into_outline(current_folder(&stack)) {
                    outlines.push(outline);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if !seen_any {
        return Err(OpmlError::NoOutlines);
    }

    Ok(outlines)
}

fn current_folder(stack: &[Option<String>]) -> Option<String> {
    stack.iter().rev().find_map(|entry| entry.clone())
}

#[derive(Default)]
struct OutlineAttrs {
    title: Option<String>,
    text: Option<String>,
    xml_url: Option<String>,
    html_url: Option<String>,
}

impl OutlineAttrs {
    fn read(e: &quick_xml::events::BytesStart<'_>, reader: &Reader<&[u8]>) -> Self {
        let mut out = Self::default();
        for attr_result in e.attributes() {
            let attr = match attr_result {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                    continue;
                }
            };
            let decoder = reader.decoder();
            let value = match attr.decode_and_unescape_value(decoder) {
                Ok(v) => v.to_string(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable OPML attribute");
                    continue;
                }
            };
            match attr.key.as_ref() {
                b"title" => out.title = Some(value),
                b"text" => out.text = Some(value),
                b"xmlUrl" => out.xml_url = Some(value),
                b"htmlUrl" => out.html_url = Some(value),
                _ => {}
            }
        }
        out
    }

    fn folder_name(self) -> String {
        self.title
            .or(self.text)
            .unwrap_or_else(|| "Untitled".to_string())
    }

    /// A subscription outline needs an `xmlUrl`; everything else is a
    /// folder (or noise) and yields `None`.
    fn into_outline(self, folder: Option<String>) -> Option<OpmlOutline> {
        let xml_url = self.xml_url?;
        Some(OpmlOutline {
            title: self
                .title
                .or(self.text)
                .unwrap_or_else(|| "Untitled".to_string()),
            xml_url,
            html_url: self.html_url,
            folder,
        })
    }
}

// ============================================================================
// Export
// ============================================================================

/// Exports subscriptions as an OPML 2.0 XML string, grouping feeds under
/// their folder outlines. Uncategorized feeds sit directly in the body.
pub fn export_opml(feeds: &[Feed], folders: &[Folder]) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("readly subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    let write_feed = |writer: &mut Writer<Cursor<Vec<u8>>>, feed: &Feed| -> Result<()> {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.url.as_str()));
        if !feed.link.is_empty() {
            outline.push_attribute(("htmlUrl", feed.link.as_str()));
        }
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
        Ok(())
    };

    for folder in folders {
        let mut group = BytesStart::new("outline");
        group.push_attribute(("text", folder.name.as_str()));
        group.push_attribute(("title", folder.name.as_str()));
        writer
            .write_event(Event::Start(group))
            .context("Failed to write folder outline")?;
        for feed in feeds
            .iter()
            .filter(|f| f.folder_id.as_deref() == Some(folder.id.as_str()))
        {
            write_feed(&mut writer, feed)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("outline")))
            .context("Failed to write folder outline end")?;
    }

    for feed in feeds.iter().filter(|f| f.folder_id.is_none()) {
        write_feed(&mut writer, feed)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bare_feed(title: &str, url: &str, folder_id: Option<&str>) -> Feed {
        Feed {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            url: url.to_string(),
            link: "https://example.com".to_string(),
            description: String::new(),
            image_url: None,
            folder_id: folder_id.map(str::to_string),
            last_fetched: None,
            items: Vec::new(),
        }
    }

    #[test]
    fn test_flatten_nested_outlines_with_folder() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline type="rss" text="No HTML" title="No HTML" xmlUrl="https://nohtml.com/rss"/>
    </outline>
    <outline type="rss" text="Loose Feed" xmlUrl="https://loose.com/feed"/>
  </body>
</opml>"#;

        let outlines = parse_opml(content).unwrap();
        assert_eq!(outlines.len(), 3);

        assert_eq!(outlines[0].title, "Example Blog");
        assert_eq!(outlines[0].xml_url, "https://example.com/feed.xml");
        assert_eq!(outlines[0].html_url.as_deref(), Some("https://example.com"));
        assert_eq!(outlines[0].folder.as_deref(), Some("Blogs"));

        assert_eq!(outlines[1].folder.as_deref(), Some("Blogs"));
        assert_eq!(outlines[1].html_url, None);

        assert_eq!(outlines[2].title, "Loose Feed");
        assert_eq!(outlines[2].folder, None);
    }

    #[test]
    fn test_nearest_enclosing_folder_wins() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline text="Outer">
      <outline text="Inner">
        <outline text="Deep Feed" xmlUrl="https://deep.com/feed"/>
      </outline>
    </outline>
</body></opml>"#;

        let outlines = parse_opml(content).unwrap();
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].folder.as_deref(), Some("Inner"));
    }

    #[test]
    fn test_title_fallback_to_text_then_untitled() {
        let content = r#"<?xml version="1.0"?>
<opml version="2.0"><body>
    <outline type="rss" text="Text Only" xmlUrl="https://textonly.com/feed"/>
    <outline type="rss" xmlUrl="https://untitled.com/feed"/>
</body></opml>"#;

        let outlines = parse_opml(content).unwrap();
        assert_eq!(outlines[0].title, "Text Only");
        assert_eq!(outlines[1].title, "Untitled");
    }

    #[test]
    fn test_no_outlines_is_an_error() {
        let content = r#"<?xml version="1.0"?><opml version="2.0"><body></body></opml>"#;
        assert!(matches!(parse_opml(content), Err(OpmlError::NoOutlines)));
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(
            parse_opml("<not valid xml"),
            Err(OpmlError::XmlParse(_))
        ));
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        assert!(matches!(
            parse_opml(&opml),
            Err(OpmlError::MaxDepthExceeded(_))
        ));
    }

    #[test]
    fn test_export_round_trip_with_folders() {
        let folder = Folder {
            id: "folder-1".to_string(),
            name: "Tech".to_string(),
            is_expanded: true,
            sort_by: None,
            position: 0,
        };
        let feeds = vec![
            bare_feed("Grouped", "https://grouped.com/feed", Some("folder-1")),
            bare_feed("Loose", "https://loose.com/feed", None),
        ];

        let exported = export_opml(&feeds, &[folder]).unwrap();
        let parsed = parse_opml(&exported).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].title, "Grouped");
        assert_eq!(parsed[0].folder.as_deref(), Some("Tech"));
        assert_eq!(parsed[1].title, "Loose");
        assert_eq!(parsed[1].folder, None);
    }

    #[test]
    fn test_export_escapes_special_chars() {
        let feeds = vec![bare_feed(
            "Feed with <special> & \"chars\"",
            "https://example.com/feed?a=1&b=2",
            None,
        )];

        let exported = export_opml(&feeds, &[]).unwrap();
        let parsed = parse_opml(&exported).unwrap();

        assert_eq!(parsed[0].title, "Feed with <special> & \"chars\"");
        assert_eq!(parsed[0].xml_url, "https://example.com/feed?a=1&b=2");
    }
}
