use std::collections::HashMap;

use parking_lot::RwLock;

use crate::codec::{hash_to_hex, ImageRecord};
use crate::types::{ApiImage, AttributeBlame, ImageId, TagBlame, TagId, UserId};

/// Mutable part of an [`Image`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageState {
    pub tags: TagBlame,
    pub attributes: AttributeBlame,
    pub active: bool,
}

/// A corpus image. Shared as `Arc<Image>`; `id` and `hash` never change and
/// every update happens in place, so the `Arc` stays the identity.
#[derive(Debug)]
pub struct Image {
    id: ImageId,
    hash: String,
    state: RwLock<ImageState>,
}

impl Image {
    pub(crate) fn new(id: ImageId, hash: String, state: ImageState) -> Self {
        Self {
            id,
            hash,
            state: RwLock::new(state),
        }
    }

    pub(crate) fn from_api(image: ApiImage) -> Self {
        Self::new(
            image.id,
            image.hash,
            ImageState {
                tags: image.tags,
                attributes: image.attributes,
                active: image.active,
            },
        )
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    pub fn snapshot(&self) -> ImageState {
        self.state.read().clone()
    }

    pub fn tags(&self) -> TagBlame {
        self.state.read().tags.clone()
    }

    pub fn attributes(&self) -> AttributeBlame {
        self.state.read().attributes.clone()
    }

    pub fn has_tag(&self, tag_id: TagId) -> bool {
        self.state.read().tags.contains_key(&tag_id)
    }

    pub fn tag_count(&self) -> usize {
        self.state.read().tags.len()
    }

    /// Applied tag ids, ascending.
    pub fn flat_tags(&self) -> Vec<TagId> {
        let mut ids: Vec<TagId> = self.state.read().tags.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Every `(key, value)` pair, sorted.
    pub fn flat_attributes(&self) -> Vec<(String, String)> {
        let state = self.state.read();
        let mut pairs: Vec<(String, String)> = state
            .attributes
            .iter()
            .flat_map(|(key, values)| values.keys().map(move |value| (key.clone(), value.clone())))
            .collect();
        pairs.sort();
        pairs
    }

    /// Value of a single-valued attribute. `None` when absent or when the
    /// key holds more than one value.
    pub fn singular_attribute(&self, key: &str) -> Option<String> {
        let state = self.state.read();
        let values = state.attributes.get(key)?;
        match values.len() {
            1 => values.keys().next().cloned(),
            _ => None,
        }
    }

    /// Replaces tags, attributes and the active flag with server data.
    pub(crate) fn merge(&self, image: ApiImage) {
        let mut state = self.state.write();
        state.tags = image.tags;
        state.attributes = image.attributes;
        state.active = image.active;
    }

    /// Replaces only the fields the record carries.
    pub(crate) fn merge_record(&self, record: &ImageRecord) {
        let mut state = self.state.write();
        if let Some(tags) = &record.tags {
            state.tags = tags.clone();
        }
        if let Some(attributes) = &record.attributes {
            state.attributes = attributes.clone();
        }
    }

    pub(crate) fn apply_tag(&self, tag_id: TagId, user_id: UserId) {
        self.state.write().tags.insert(tag_id, user_id);
    }

    pub(crate) fn drop_tag(&self, tag_id: TagId) {
        self.state.write().tags.remove(&tag_id);
    }

    /// Singular writes replace the whole value set; multi writes insert.
    pub(crate) fn apply_attribute(&self, key: &str, value: &str, user_id: UserId, singular: bool) {
        let mut state = self.state.write();
        let values = state.attributes.entry(key.to_string()).or_default();
        if singular {
            *values = HashMap::from([(value.to_string(), user_id)]);
        } else {
            values.insert(value.to_string(), user_id);
        }
    }

    pub(crate) fn drop_attribute(&self, key: &str, value: &str) {
        let mut state = self.state.write();
        if let Some(values) = state.attributes.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                state.attributes.remove(key);
            }
        }
    }
}

/// Cache key for a record's hash, when it carries one.
pub(crate) fn record_hash(record: &ImageRecord) -> Option<String> {
    record.hash.as_deref().map(hash_to_hex)
}
