//! Category model

use serde::{Deserialize, Serialize};

/// A category for organizing notes. A category with a parent is a
/// subcategory of that parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Peer-local key
    pub id: i64,
    pub guid: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent_guid: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Category {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn to_input(&self) -> CategoryInput {
        CategoryInput {
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            parent_guid: self.parent_guid.clone(),
        }
    }
}

/// The user-editable fields of a category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent_guid: Option<String>,
}

impl CategoryInput {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_guid: impl Into<String>) -> Self {
        self.parent_guid = Some(parent_guid.into());
        self
    }
}
