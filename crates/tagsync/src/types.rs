//! Shared identifiers and API payload types.
//!
//! These mirror the JSON shapes returned by the server. The cache converts
//! them into shared [`crate::cache::Image`] / [`crate::cache::Tag`] entities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type ImageId = u64;
pub type TagId = u64;
pub type UserId = u64;

/// Tag id -> user who applied it.
pub type TagBlame = HashMap<TagId, UserId>;

/// Attribute key -> (value -> user who wrote it).
pub type AttributeBlame = HashMap<String, HashMap<String, UserId>>;

/// Image metadata as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiImage {
    pub id: ImageId,
    pub hash: String,
    #[serde(default)]
    pub tags: TagBlame,
    #[serde(default)]
    pub attributes: AttributeBlame,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTag {
    pub id: TagId,
    pub name: String,
    pub active: bool,
}

/// Reference data describing how tags relate to one another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTagMappings {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub implications: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub deprecations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub scopes: String,
}

/// Result ordering hint produced by the query compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    Id,
    Hash,
}

impl OrderBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Hash => "hash",
        }
    }
}

/// Fields a search may ask the server to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSelect {
    Id,
    Hash,
    Tags,
    Attributes,
}

impl SearchSelect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Hash => "hash",
            Self::Tags => "tags",
            Self::Attributes => "attributes",
        }
    }
}

/// Renders a select list as the comma-separated `select` query parameter.
pub fn select_param(select: &[SearchSelect]) -> String {
    select
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_image_parses_string_keyed_tag_map() {
        let image: ApiImage = serde_json::from_value(json!({
            "id": 7,
            "hash": "ab",
            "tags": { "3": 1, "9": 2 },
            "attributes": { "source": { "https://a": 1, "https://b": 2 } },
            "active": true
        }))
        .expect("parse");
        assert_eq!(image.tags.get(&3), Some(&1));
        assert_eq!(image.tags.get(&9), Some(&2));
        assert_eq!(image.attributes["source"].len(), 2);
    }

    #[test]
    fn select_param_joins_fields() {
        assert_eq!(
            select_param(&[SearchSelect::Id, SearchSelect::Tags]),
            "id,tags"
        );
    }
}
