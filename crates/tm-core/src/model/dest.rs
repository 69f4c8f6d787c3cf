use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The destination databases a page can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Task,
    Project,
    Area,
    Person,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Project => "project",
            Self::Area => "area",
            Self::Person => "person",
        }
    }
}

/// Explicit tagged property values, replacing free-form property dicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    Select(Option<String>),
    MultiSelect(Vec<String>),
    Date {
        start: String,
        #[serde(default)]
        time: Option<String>,
        #[serde(default)]
        timezone: Option<String>,
    },
    Checkbox(bool),
    Relation(Vec<String>),
    Text(String),
    Url(String),
}

/// A page-body block. Only the two shapes the engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Paragraph(String),
    Heading(String),
}

impl Block {
    pub fn text(&self) -> &str {
        match self {
            Self::Paragraph(t) | Self::Heading(t) => t,
        }
    }
}

/// The full payload for a destination page write.
///
/// Properties are kept in a `BTreeMap` so canonical JSON serialization gets
/// sorted keys for free.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagePayload {
    pub properties: BTreeMap<String, PropertyValue>,
    pub body: Vec<Block>,
}

impl PagePayload {
    pub fn set(&mut self, name: &str, value: PropertyValue) -> &mut Self {
        self.properties.insert(name.to_string(), value);
        self
    }
}

/// A destination page as read back from the API, reduced to the fields the
/// engine and the reverse extractor need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestPage {
    pub id: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    /// Status select value (project pages: "Active" / "Archived").
    #[serde(default)]
    pub status: Option<String>,
    /// The mirrored source entity id stored on the page.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A row from the destination People database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: String,
    pub name: String,
}
