use std::borrow::Cow;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::models::{FeedDocument, FeedItem};
use super::sanitize::unescape_entities;
use crate::{Error, Result};

const UTF8_BOM: &str = "\u{feff}";

// Nesting levels: root element, <channel>, channel fields and <item>, item fields
const CHANNEL_LEVEL: usize = 2;
const ITEM_LEVEL: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Target {
    Title,
    Link,
    Description,
    PubDate,
}

impl Target {
    fn from_name(name: &[u8], in_item: bool) -> Option<Self> {
        match name {
            b"title" => Some(Target::Title),
            b"link" => Some(Target::Link),
            b"description" => Some(Target::Description),
            b"pubDate" if in_item => Some(Target::PubDate),
            _ => None,
        }
    }
}

/// Text fields collected for a channel or an item; the first occurrence wins
#[derive(Default)]
struct Fields {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    pub_date: Option<String>,
}

impl Fields {
    fn set(&mut self, target: Target, value: String) {
        let slot = match target {
            Target::Title => &mut self.title,
            Target::Link => &mut self.link,
            Target::Description => &mut self.description,
            Target::PubDate => &mut self.pub_date,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

fn require(value: Option<String>, element: &str, scope: &str) -> Result<String> {
    value.ok_or_else(|| Error::Decode(format!("{} is missing <{}>", scope, element)))
}

fn build_item(fields: Fields, index: usize) -> Result<FeedItem> {
    let scope = format!("item #{}", index);
    Ok(FeedItem {
        title: require(fields.title, "title", &scope)?,
        link: require(fields.link, "link", &scope)?,
        description: require(fields.description, "description", &scope)?,
        pub_date: require(fields.pub_date, "pubDate", &scope)?,
    })
}

/// A field element whose text is being collected
struct OpenField {
    target: Target,
    level: usize,
    text: String,
}

/// Decode an RSS document into a [`FeedDocument`] and unescape its text fields.
///
/// Every channel field (`title`, `link`, `description`) and every item field
/// (the same plus `pubDate`) is required. A missing field or malformed markup
/// fails the whole document. Elements outside this shape, including namespaced
/// ones such as `atom:link`, are skipped. Links and publication dates are kept
/// as written.
pub fn parse_feed(content: &[u8]) -> Result<FeedDocument> {
    let text = std::str::from_utf8(content)
        .map_err(|e| Error::Decode(format!("document is not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let mut reader = Reader::from_str(text);

    let mut depth = 0usize;
    let mut channel: Option<Fields> = None;
    let mut channel_open = false;
    let mut item: Option<Fields> = None;
    let mut items = Vec::new();
    let mut field: Option<OpenField> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::Decode(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = e.name();
                match depth {
                    1 if channel.is_none() && name.as_ref() == b"channel" => {
                        channel = Some(Fields::default());
                        channel_open = true;
                    }
                    CHANNEL_LEVEL if channel_open => {
                        if name.as_ref() == b"item" {
                            item = Some(Fields::default());
                        } else if let Some(target) = Target::from_name(name.as_ref(), false) {
                            field = Some(OpenField { target, level: depth + 1, text: String::new() });
                        }
                    }
                    ITEM_LEVEL if item.is_some() => {
                        if let Some(target) = Target::from_name(name.as_ref(), true) {
                            field = Some(OpenField { target, level: depth + 1, text: String::new() });
                        }
                    }
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = e.name();
                match depth {
                    1 if channel.is_none() && name.as_ref() == b"channel" => {
                        channel = Some(Fields::default());
                    }
                    CHANNEL_LEVEL if channel_open => {
                        if name.as_ref() == b"item" {
                            items.push(build_item(Fields::default(), items.len() + 1)?);
                        } else if let (Some(target), Some(fields)) =
                            (Target::from_name(name.as_ref(), false), channel.as_mut())
                        {
                            fields.set(target, String::new());
                        }
                    }
                    ITEM_LEVEL => {
                        if let (Some(target), Some(fields)) =
                            (Target::from_name(name.as_ref(), true), item.as_mut())
                        {
                            fields.set(target, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some(open) = field.as_mut().filter(|open| open.level == depth) {
                    let unescaped = e
                        .unescape()
                        .map_err(|e| Error::Decode(format!("invalid character data: {}", e)))?;
                    open.text.push_str(&unescaped);
                }
            }
            Event::CData(e) => {
                if let Some(open) = field.as_mut().filter(|open| open.level == depth) {
                    open.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                match field.take() {
                    Some(open) if open.level == depth => {
                        let owner = if depth > ITEM_LEVEL { item.as_mut() } else { channel.as_mut() };
                        if let Some(fields) = owner {
                            fields.set(open.target, open.text);
                        }
                    }
                    other => {
                        field = other;
                        if depth == ITEM_LEVEL {
                            if let Some(fields) = item.take() {
                                items.push(build_item(fields, items.len() + 1)?);
                            }
                        } else if depth == CHANNEL_LEVEL && channel_open {
                            channel_open = false;
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => {
                if depth > 0 {
                    return Err(Error::Decode(
                        "unexpected end of document: unclosed elements".to_string(),
                    ));
                }
                break;
            }
            _ => {}
        }
    }

    let fields = channel.ok_or_else(|| Error::Decode("missing <channel> element".to_string()))?;

    Ok(FeedDocument {
        title: sanitize_text(require(fields.title, "title", "channel")?),
        link: require(fields.link, "link", "channel")?,
        description: sanitize_text(require(fields.description, "description", "channel")?),
        items: items.into_iter().map(sanitize_item).collect(),
    })
}

fn sanitize_item(item: FeedItem) -> FeedItem {
    FeedItem {
        title: sanitize_text(item.title),
        description: sanitize_text(item.description),
        ..item
    }
}

/// Unescape, reusing the original allocation when nothing changes
fn sanitize_text(text: String) -> String {
    if let Cow::Owned(decoded) = unescape_entities(&text) {
        return decoded;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
  <title>Lane&#39;s Blog</title>
  <link>https://example.com/</link>
  <atom:link href="https://example.com/index.xml" rel="self" type="application/rss+xml"/>
  <description>Notes on Rust &amp;amp; feeds</description>
  <language>en-us</language>
  <item>
    <title>First &lt;post&gt;</title>
    <link>https://example.com/first?a=1&amp;b=2</link>
    <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate>
    <guid>https://example.com/first</guid>
    <description><![CDATA[<p>Hello &amp; welcome</p>]]></description>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/second</link>
    <pubDate>yesterday-ish</pubDate>
    <description>Plain text</description>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_channel_and_items_in_order() {
        let doc = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();

        assert_eq!(doc.title, "Lane's Blog");
        assert_eq!(doc.link, "https://example.com/");
        assert_eq!(doc.description, "Notes on Rust & feeds");
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.items[0].title, "First <post>");
        assert_eq!(doc.items[1].title, "Second");
    }

    #[test]
    fn test_cdata_description_is_unescaped() {
        let doc = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        assert_eq!(doc.items[0].description, "<p>Hello & welcome</p>");
        assert_eq!(doc.items[1].description, "Plain text");
    }

    #[test]
    fn test_links_and_dates_kept_verbatim() {
        let doc = parse_feed(SAMPLE_RSS.as_bytes()).unwrap();
        // XML-level escaping is still undone by the reader
        assert_eq!(doc.items[0].link, "https://example.com/first?a=1&b=2");
        assert_eq!(doc.items[0].pub_date, "Mon, 02 Jan 2006 15:04:05 -0700");
        assert_eq!(doc.items[1].pub_date, "yesterday-ish");
    }

    #[test]
    fn test_channel_without_items() {
        let xml = r#"<rss><channel><title>Empty</title><link>https://e.com</link><description>Nothing yet</description></channel></rss>"#;
        let doc = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(doc.title, "Empty");
        assert!(doc.items.is_empty());
    }

    #[test]
    fn test_empty_elements_count_as_present() {
        let xml = r#"<rss><channel><title>T</title><link>L</link><description/>
            <item><title>A</title><link/><description>D</description><pubDate/></item>
        </channel></rss>"#;
        let doc = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(doc.description, "");
        assert_eq!(doc.items[0].link, "");
        assert_eq!(doc.items[0].pub_date, "");
    }

    #[test]
    fn test_nested_markup_inside_field_is_skipped() {
        let xml = r#"<rss><channel><title>T <b>bold</b>tail</title><link>L</link><description>D</description></channel></rss>"#;
        assert_eq!(parse_feed(xml.as_bytes()).unwrap().title, "T tail");
    }

    #[test]
    fn test_byte_order_mark_is_ignored() {
        let xml = "\u{feff}<rss><channel><title>T</title><link>L</link><description>D</description></channel></rss>";
        assert_eq!(parse_feed(xml.as_bytes()).unwrap().title, "T");
    }

    #[test]
    fn test_missing_channel_is_decode_error() {
        let xml = r#"<rss><title>Not a channel</title></rss>"#;
        assert!(matches!(parse_feed(xml.as_bytes()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_missing_channel_field_is_decode_error() {
        let xml = r#"<rss><channel><title>No link</title><description>D</description></channel></rss>"#;
        let err = parse_feed(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("<link>"));
    }

    #[test]
    fn test_missing_item_field_is_decode_error() {
        let xml = r#"<rss><channel><title>T</title><link>L</link><description>D</description>
            <item><title>Dated</title><link>L</link><description>D</description><pubDate>P</pubDate></item>
            <item><title>No date</title><link>L</link><description>D</description></item>
        </channel></rss>"#;
        let err = parse_feed(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("item #2")));
    }

    #[test]
    fn test_truncated_markup_is_decode_error() {
        let truncated = &SAMPLE_RSS[..SAMPLE_RSS.len() / 2];
        assert!(matches!(parse_feed(truncated.as_bytes()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_mismatched_tags_are_decode_error() {
        let xml = r#"<rss><channel><title>T</link></channel></rss>"#;
        assert!(matches!(parse_feed(xml.as_bytes()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_non_xml_body_is_decode_error() {
        assert!(matches!(parse_feed(b"{\"json\": true}"), Err(Error::Decode(_))));
        assert!(matches!(parse_feed(b""), Err(Error::Decode(_))));
        assert!(matches!(parse_feed(&[0xff, 0xfe, 0x00]), Err(Error::Decode(_))));
    }
}
