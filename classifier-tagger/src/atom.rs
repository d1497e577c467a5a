//! Atom feed parsing for tag training documents and the tag index, and
//! atom feed construction for result uploads.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

pub const NEGATIVE_EXAMPLE_REL: &str = "http://peerworks.org/classifier/negative-example";
pub const RESULT_EDIT_REL: &str = "http://peerworks.org/classifier/edit";
pub const TRAINING_REL: &str = "http://peerworks.org/classifier/training";

#[derive(Debug, Clone, Default)]
pub struct FeedLink {
    pub rel: String,
    pub href: String,
}

#[derive(Debug, Clone, Default)]
pub struct FeedCategory {
    pub term: String,
    pub scheme: String,
}

/// One `<entry>` from a tag training document or the tag index.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub author: String,
    pub content: String,
    pub links: Vec<FeedLink>,
    pub category: Option<FeedCategory>,
    pub updated: Option<DateTime<Utc>>,
    /// Verbatim `<entry>...</entry>` slice, re-declaring the feed's
    /// namespaces so it stands alone as valid XML. Used to build an
    /// [`classifier_core::Entry`] for an example the item cache has
    /// never seen.
    pub raw_xml: String,
}

impl FeedEntry {
    pub fn has_link_rel(&self, rel: &str) -> bool {
        self.links.iter().any(|l| l.rel == rel)
    }

    pub fn link_href(&self, rel: &str) -> Option<&str> {
        self.links.iter().find(|l| l.rel == rel).map(|l| l.href.as_str())
    }
}

/// A parsed tag training document (or tag index, which only needs
/// `entries`).
#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub id: String,
    pub links: Vec<FeedLink>,
    pub category: Option<FeedCategory>,
    pub updated: Option<DateTime<Utc>>,
    pub classified: Option<DateTime<Utc>>,
    pub bias: Option<f64>,
    pub entries: Vec<FeedEntry>,
}

fn local_name(qname: &[u8]) -> &str {
    let full = std::str::from_utf8(qname).unwrap_or("");
    full.rsplit(':').next().unwrap_or(full)
}

fn attr_value(e: &quick_xml::events::BytesStart, decoder: quick_xml::Decoder, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.decode_and_unescape_value(decoder).ok())
        .map(|v| v.into_owned())
}

fn parse_link(e: &quick_xml::events::BytesStart, decoder: quick_xml::Decoder) -> FeedLink {
    FeedLink {
        rel: attr_value(e, decoder, b"rel").unwrap_or_default(),
        href: attr_value(e, decoder, b"href").unwrap_or_default(),
    }
}

fn parse_category(e: &quick_xml::events::BytesStart, decoder: quick_xml::Decoder) -> FeedCategory {
    FeedCategory {
        term: attr_value(e, decoder, b"term").unwrap_or_default(),
        scheme: attr_value(e, decoder, b"scheme").unwrap_or_default(),
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Parses a tag training document / tag index atom feed.
pub fn parse_feed(xml: &str) -> Result<Feed, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut feed_xmlns: Vec<(String, String)> = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut entry_start = 0u64;
    let mut in_author = false;
    let mut text = String::new();

    loop {
        let pos_before = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref()).to_string();
                let decoder = reader.decoder();
                if name == "feed" && feed_xmlns.is_empty() {
                    for attr in e.attributes().flatten() {
                        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
                        if key == "xmlns" || key.starts_with("xmlns:") {
                            if let Ok(value) = attr.decode_and_unescape_value(decoder) {
                                feed_xmlns.push((key.to_string(), value.into_owned()));
                            }
                        }
                    }
                } else if name == "entry" {
                    entry_start = pos_before;
                    current = Some(FeedEntry::default());
                } else if name == "link" {
                    let link = parse_link(&e, decoder);
                    match current.as_mut() {
                        Some(entry) => entry.links.push(link),
                        None => feed.links.push(link),
                    }
                } else if name == "category" {
                    let category = parse_category(&e, decoder);
                    match current.as_mut() {
                        Some(entry) => entry.category = Some(category),
                        None => feed.category = Some(category),
                    }
                } else if name == "author" {
                    in_author = true;
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref()).to_string();
                let decoder = reader.decoder();
                if name == "link" {
                    let link = parse_link(&e, decoder);
                    match current.as_mut() {
                        Some(entry) => entry.links.push(link),
                        None => feed.links.push(link),
                    }
                } else if name == "category" {
                    let category = parse_category(&e, decoder);
                    match current.as_mut() {
                        Some(entry) => entry.category = Some(category),
                        None => feed.category = Some(category),
                    }
                }
            }
            Ok(Event::Text(t)) => {
                text.push_str(&t.xml_content().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref()).to_string();
                match name.as_str() {
                    "id" => match current.as_mut() {
                        Some(entry) => entry.id = text.trim().to_string(),
                        None => feed.id = text.trim().to_string(),
                    },
                    "title" => {
                        if let Some(entry) = current.as_mut() {
                            entry.title = text.trim().to_string();
                        }
                    }
                    "content" => {
                        if let Some(entry) = current.as_mut() {
                            entry.content = text.trim().to_string();
                        }
                    }
                    "name" if in_author => {
                        if let Some(entry) = current.as_mut() {
                            entry.author = text.trim().to_string();
                        }
                    }
                    "author" => {
                        in_author = false;
                        if let Some(entry) = current.as_mut() {
                            if entry.author.is_empty() {
                                entry.author = text.trim().to_string();
                            }
                        }
                    }
                    "updated" => {
                        let when = parse_date(text.trim());
                        match current.as_mut() {
                            Some(entry) => entry.updated = when,
                            None => feed.updated = when,
                        }
                    }
                    "classified" => feed.classified = parse_date(text.trim()),
                    "bias" => feed.bias = text.trim().parse().ok(),
                    "entry" => {
                        if let Some(mut entry) = current.take() {
                            let entry_end = reader.buffer_position();
                            entry.raw_xml = wrap_with_namespaces(
                                &xml[entry_start as usize..entry_end as usize],
                                &feed_xmlns,
                            );
                            feed.entries.push(entry);
                        }
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(feed)
}

/// Re-declares the parent feed's xmlns attributes on a sliced `<entry>`
/// fragment so it parses as a standalone document.
fn wrap_with_namespaces(raw_entry: &str, feed_xmlns: &[(String, String)]) -> String {
    if feed_xmlns.is_empty() {
        return raw_entry.to_string();
    }
    let Some(tag_end) = raw_entry.find('>') else {
        return raw_entry.to_string();
    };
    let mut wrapped = raw_entry.to_string();
    let insertion: String = feed_xmlns
        .iter()
        .map(|(k, v)| format!(" {k}=\"{v}\""))
        .collect();
    wrapped.insert_str(tag_end, &insertion);
    wrapped
}

/// Builds the atom feed body for a result upload: a `<feed>` with a
/// `classifier:classified` timestamp and one `<entry>` per tagging.
pub fn build_taggings_feed(
    tag_id: &str,
    term: &str,
    scheme: &str,
    last_classified: DateTime<Utc>,
    taggings: &[(String, f64)],
) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0"?>"#);
    out.push_str(&format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:classifier="http://peerworks.org/classifier"><id>{tag_id}</id><classifier:classified>{}</classifier:classified>"#,
        last_classified.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    for (item_id, strength) in taggings {
        out.push_str(&format!(
            r#"<entry><id>{item_id}</id><category term="{term}" scheme="{scheme}" classifier:strength="{strength:.6}"/></entry>"#,
        ));
    }
    out.push_str("</feed>");
    out
}

/// Extracts every training URL from a parsed tag index feed.
pub fn training_urls(index: &Feed) -> Vec<String> {
    index
        .entries
        .iter()
        .filter_map(|entry| entry.link_href(TRAINING_REL))
        .map(|href| href.to_string())
        .collect()
}
