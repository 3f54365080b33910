use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::Result;

/// A feed entry extracted from an OPML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    pub url: String,
    pub name: String,
    /// Enclosing outline names joined with `/`; empty at top level
    pub category: String,
}

/// Parse an OPML file and extract feed entries
pub fn parse_opml_file(path: &Path) -> Result<Vec<OpmlFeed>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

struct Outline {
    xml_url: Option<String>,
    name: Option<String>,
}

fn read_outline(e: &BytesStart<'_>) -> Outline {
    let mut xml_url = None;
    let mut name = None;

    for attr in e.attributes().flatten() {
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value),
            b"title" => name = Some(value),
            b"text" if name.is_none() => name = Some(value),
            _ => {}
        }
    }

    Outline { xml_url, name }
}

/// Parse OPML content string
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    // One entry per open <outline>; `Some` for the ones that name a category
    let mut open: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e);
                match outline.xml_url {
                    Some(url) => {
                        feeds.push(feed_entry(url, outline.name, &open));
                        open.push(None);
                    }
                    None => open.push(Some(outline.name.unwrap_or_default())),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e);
                // Only add if xmlUrl exists (actual feed, not category)
                if let Some(url) = outline.xml_url {
                    feeds.push(feed_entry(url, outline.name, &open));
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(crate::Error::FeedParse(format!("Failed to parse OPML: {}", e)));
            }
            _ => {}
        }
    }

    Ok(feeds)
}

fn feed_entry(url: String, name: Option<String>, open: &[Option<String>]) -> OpmlFeed {
    let category = open
        .iter()
        .flatten()
        .filter(|name| !name.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("/");

    OpmlFeed {
        url: url.trim().to_string(),
        name: name.unwrap_or_default(),
        category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opml_nested_categories() {
        let opml = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test</title></head>
  <body>
    <outline text="Tech">
      <outline text="Feed 1" title="Feed One" xmlUrl="https://example.com/feed1.xml" type="rss"/>
      <outline text="Rust">
        <outline text="Feed 2" xmlUrl="https://example.com/feed2.xml" type="rss"/>
      </outline>
    </outline>
    <outline text="Direct &amp; Feed" xmlUrl="https://example.com/feed3.xml" type="rss"/>
  </body>
</opml>"#;

        let feeds = parse_opml(opml).unwrap();
        assert_eq!(feeds.len(), 3);
        assert_eq!(feeds[0].name, "Feed One"); // title takes precedence
        assert_eq!(feeds[0].category, "Tech");
        assert_eq!(feeds[1].name, "Feed 2"); // fallback to text
        assert_eq!(feeds[1].category, "Tech/Rust");
        assert_eq!(feeds[2].name, "Direct & Feed");
        assert_eq!(feeds[2].category, "");
    }

    #[test]
    fn test_parse_opml_empty_category() {
        let opml = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <body>
    <outline text="Empty Category"/>
  </body>
</opml>"#;

        let feeds = parse_opml(opml).unwrap();
        assert!(feeds.is_empty());
    }

    #[test]
    fn test_parse_opml_malformed() {
        assert!(parse_opml("<opml><body><outline text=\"x\"></body>").is_err());
    }
}
