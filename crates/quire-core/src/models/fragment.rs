//! Delta payloads attached to changes
//!
//! A fragment stores only the fields selected by its bitmask. Values of
//! unselected fields are always `None`; a selected optional field whose value
//! is `None` means the field was cleared.

use serde::{Deserialize, Serialize};

use super::note::CategoryLink;

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Delta payload for a note change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFragment {
    pub bitmask: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// `body` is a line diff against the previous body rather than a snapshot
    #[serde(default, skip_serializing_if = "is_false")]
    pub body_is_diff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<CategoryLink>>,
}

impl NoteFragment {
    pub const TITLE: u32 = 1 << 0;
    pub const DESCRIPTION: u32 = 1 << 1;
    pub const BODY: u32 = 1 << 2;
    pub const IS_PRIVATE: u32 = 1 << 3;
    pub const CATEGORIES: u32 = 1 << 4;
    pub const ALL: u32 =
        Self::TITLE | Self::DESCRIPTION | Self::BODY | Self::IS_PRIVATE | Self::CATEGORIES;

    #[must_use]
    pub const fn has(&self, bit: u32) -> bool {
        self.bitmask & bit != 0
    }
}

/// Delta payload for a category change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFragment {
    pub bitmask: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<String>,
}

impl CategoryFragment {
    pub const NAME: u32 = 1 << 0;
    pub const DESCRIPTION: u32 = 1 << 1;
    pub const COLOR: u32 = 1 << 2;
    pub const PARENT: u32 = 1 << 3;
    pub const ALL: u32 = Self::NAME | Self::DESCRIPTION | Self::COLOR | Self::PARENT;

    #[must_use]
    pub const fn has(&self, bit: u32) -> bool {
        self.bitmask & bit != 0
    }
}

/// Fragment payload tagged with the entity kind it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fragment {
    Note(NoteFragment),
    Category(CategoryFragment),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unselected_fields_are_omitted_from_json() {
        let fragment = Fragment::Note(NoteFragment {
            bitmask: NoteFragment::TITLE,
            title: Some("Hello".to_string()),
            ..NoteFragment::default()
        });
        let json = serde_json::to_value(&fragment).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "note", "bitmask": 1, "title": "Hello"})
        );
    }

    #[test]
    fn cleared_optional_field_is_selected_but_empty() {
        let json = r#"{"kind":"category","bitmask":4}"#;
        let Fragment::Category(fragment) = serde_json::from_str(json).unwrap() else {
            panic!("expected category fragment");
        };
        assert!(fragment.has(CategoryFragment::COLOR));
        assert_eq!(fragment.color, None);
        assert!(!fragment.has(CategoryFragment::NAME));
    }
}
