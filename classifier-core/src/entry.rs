//! Entry: the raw, pre-tokenization representation of an item.

use crate::Timestamp;

/// The hand-off record between "an entry arrived" and "an item has
/// been tokenized and stored".
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub full_id: String,
    pub title: String,
    pub author: String,
    pub alternate_link: String,
    pub self_link: String,
    pub content: String,
    pub updated: Timestamp,
    /// The verbatim atom XML this entry was parsed from, kept so the
    /// feature extractor can send it unchanged to the tokenizer.
    pub source_xml: String,
}

impl Entry {
    pub fn id(&self) -> &str {
        &self.full_id
    }
}
