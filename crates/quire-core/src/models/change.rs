//! Change log records

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of entity a change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Note,
    Category,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(Self::Note),
            "category" => Ok(Self::Category),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Operation recorded by a change. Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Materialized from a remote peer; never treated as a local edit
    Sync,
}

impl Operation {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Update => 2,
            Self::Delete => 3,
            Self::Sync => 9,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Sync => "sync",
        }
    }
}

impl From<Operation> for u8 {
    fn from(value: Operation) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Create),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            9 => Ok(Self::Sync),
            other => Err(format!("unknown operation code: {other}")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only change row (`note_changes` / `category_changes`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub id: i64,
    /// Globally unique; the protocol's idempotency key
    pub guid: String,
    pub entity_guid: String,
    pub operation: Operation,
    /// Deletes carry no fragment
    pub fragment_id: Option<i64>,
    pub author: String,
    pub created_at: i64,
}
