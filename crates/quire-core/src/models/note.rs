//! Note model

use serde::{Deserialize, Serialize};

/// A note's association with a category, optionally narrowed to one of the
/// category's subcategories. Categories are referenced by GUID so links can
/// cross peers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryLink {
    pub category_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory_guid: Option<String>,
}

impl CategoryLink {
    #[must_use]
    pub fn new(category_guid: impl Into<String>) -> Self {
        Self {
            category_guid: category_guid.into(),
            subcategory_guid: None,
        }
    }

    #[must_use]
    pub fn with_subcategory(mut self, subcategory_guid: impl Into<String>) -> Self {
        self.subcategory_guid = Some(subcategory_guid.into());
        self
    }
}

/// Sort and deduplicate links so two mapping sets compare by content.
#[must_use]
pub fn normalize_links(mut links: Vec<CategoryLink>) -> Vec<CategoryLink> {
    links.sort();
    links.dedup();
    links
}

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Peer-local key, never sent to other peers
    pub id: i64,
    /// Globally unique identifier used for cross-peer reference
    pub guid: String,
    pub title: String,
    pub description: Option<String>,
    /// Plaintext body (decrypted for private notes)
    pub body: String,
    pub is_private: bool,
    /// Last time a human edited the note (Unix ms)
    pub authored_at: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last write, local or replicated (Unix ms)
    pub updated_at: i64,
    /// Soft delete tombstone (Unix ms)
    pub deleted_at: Option<i64>,
    /// Category associations, normalized
    pub categories: Vec<CategoryLink>,
}

impl Note {
    /// Whether the note carries a tombstone
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The note's current state expressed as an input
    #[must_use]
    pub fn to_input(&self) -> NoteInput {
        NoteInput {
            title: self.title.clone(),
            description: self.description.clone(),
            body: self.body.clone(),
            is_private: self.is_private,
            categories: self.categories.clone(),
        }
    }

    /// Get first line of the body as a preview, truncated to `max_len` characters
    #[must_use]
    pub fn body_preview(&self, max_len: usize) -> String {
        self.body
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

/// The user-editable fields of a note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInput {
    pub title: String,
    pub description: Option<String>,
    pub body: String,
    pub is_private: bool,
    pub categories: Vec<CategoryLink>,
}

impl NoteInput {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_categories(mut self, categories: Vec<CategoryLink>) -> Self {
        self.categories = normalize_links(categories);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_links_sorts_and_dedups() {
        let links = normalize_links(vec![
            CategoryLink::new("b"),
            CategoryLink::new("a").with_subcategory("s"),
            CategoryLink::new("b"),
        ]);
        assert_eq!(
            links,
            vec![CategoryLink::new("a").with_subcategory("s"), CategoryLink::new("b")]
        );
    }

    #[test]
    fn link_without_subcategory_omits_field() {
        let json = serde_json::to_string(&CategoryLink::new("c1")).unwrap();
        assert_eq!(json, r#"{"category_guid":"c1"}"#);
    }

    #[test]
    fn body_preview_takes_first_line() {
        let note = Note {
            id: 1,
            guid: "g".to_string(),
            title: "t".to_string(),
            description: None,
            body: "First line\nSecond line".to_string(),
            is_private: false,
            authored_at: 0,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
            categories: Vec::new(),
        };
        assert_eq!(note.body_preview(50), "First line");
        assert_eq!(note.body_preview(5), "First");
    }
}
