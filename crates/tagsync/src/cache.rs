//! Canonical image and tag entities.
//!
//! Images are indexed by id and by hash; both indices always hold the same
//! `Arc` for one logical image. Upserts merge into the existing instance so
//! holders of an `Arc<Image>` observe updates without re-fetching.

mod image;
mod tags;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::ApiClient;
use crate::codec::ImageRecord;
use crate::error::SyncResult;
use crate::types::{ApiImage, ImageId};

pub use image::{Image, ImageState};
pub use tags::{Tag, TagRegistry};

#[derive(Default)]
struct ImageIndex {
    by_id: HashMap<ImageId, Arc<Image>>,
    by_hash: HashMap<String, Arc<Image>>,
}

impl ImageIndex {
    fn insert(&mut self, image: Arc<Image>) {
        self.by_id.insert(image.id(), Arc::clone(&image));
        self.by_hash.insert(image.hash().to_string(), image);
    }

    fn existing(&self, id: Option<ImageId>, hash: Option<&str>) -> Option<Arc<Image>> {
        if let Some(found) = hash.and_then(|hash| self.by_hash.get(hash)) {
            if id.is_some_and(|id| id != found.id()) {
                tracing::warn!(
                    hash = found.hash(),
                    cached_id = found.id(),
                    incoming_id = ?id,
                    "hash already cached under another id"
                );
            }
            return Some(Arc::clone(found));
        }
        let found = id.and_then(|id| self.by_id.get(&id))?;
        if let Some(hash) = hash {
            tracing::warn!(
                id = found.id(),
                cached_hash = found.hash(),
                incoming_hash = hash,
                "id already cached under another hash"
            );
        }
        Some(Arc::clone(found))
    }
}

pub struct EntityCache {
    api: Arc<ApiClient>,
    images: RwLock<ImageIndex>,
    tags: TagRegistry,
}

impl EntityCache {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            tags: TagRegistry::new(Arc::clone(&api)),
            api,
            images: RwLock::new(ImageIndex::default()),
        }
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.images.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges server data, creating the image on first sight. Always returns
    /// the one cached instance for that image.
    pub fn upsert(&self, image: ApiImage) -> Arc<Image> {
        let mut index = self.images.write();
        if let Some(existing) = index.existing(Some(image.id), Some(&image.hash)) {
            existing.merge(image);
            return existing;
        }
        let created = Arc::new(Image::from_api(image));
        index.insert(Arc::clone(&created));
        created
    }

    /// Merges a decoded search record. Creating an image needs both an id
    /// and a hash; a record matching nothing without both is dropped.
    pub fn upsert_record(&self, record: &ImageRecord) -> Option<Arc<Image>> {
        let id = record.id.map(ImageId::from);
        let hash = image::record_hash(record);
        let mut index = self.images.write();

        if let Some(existing) = index.existing(id, hash.as_deref()) {
            existing.merge_record(record);
            return Some(existing);
        }

        let (id, hash) = (id?, hash?);
        let created = Arc::new(Image::new(
            id,
            hash,
            ImageState {
                tags: record.tags.clone().unwrap_or_default(),
                attributes: record.attributes.clone().unwrap_or_default(),
                active: true,
            },
        ));
        index.insert(Arc::clone(&created));
        Some(created)
    }

    pub fn get_by_id(&self, id: ImageId) -> Option<Arc<Image>> {
        self.images.read().by_id.get(&id).cloned()
    }

    pub fn get_by_hash(&self, hash: &str) -> Option<Arc<Image>> {
        self.images.read().by_hash.get(hash).cloned()
    }

    /// Fetches fresh metadata and merges it. `Ok(None)` when the server has
    /// no such image.
    pub async fn fetch_by_id(&self, id: ImageId) -> SyncResult<Option<Arc<Image>>> {
        let fetched = self.api.image_by_id(id).await?;
        Ok(fetched.map(|image| self.upsert(image)))
    }

    pub async fn fetch_by_hash(&self, hash: &str) -> SyncResult<Option<Arc<Image>>> {
        let fetched = self.api.image_by_hash(hash).await?;
        Ok(fetched.map(|image| self.upsert(image)))
    }

    /// Cached image, fetched first when absent.
    pub async fn hydrate(&self, id: ImageId) -> SyncResult<Option<Arc<Image>>> {
        if let Some(image) = self.get_by_id(id) {
            return Ok(Some(image));
        }
        self.fetch_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HASH_LEN;
    use crate::test_support::ScriptedTransport;
    use crate::types::TagBlame;
    use bytes::Bytes;
    use serde_json::json;

    fn cache() -> (Arc<ScriptedTransport>, EntityCache) {
        let transport = ScriptedTransport::new();
        let cache = EntityCache::new(transport.client());
        (transport, cache)
    }

    fn api_image(id: ImageId, hash: &str, tags: &[(u64, u64)]) -> ApiImage {
        ApiImage {
            id,
            hash: hash.to_string(),
            tags: tags.iter().copied().collect(),
            attributes: Default::default(),
            active: true,
        }
    }

    #[test]
    fn upsert_keeps_identity_and_replaces_tags() {
        let (_, cache) = cache();
        let first = cache.upsert(api_image(1, "aa", &[(1, 1), (2, 1)]));
        let second = cache.upsert(api_image(1, "aa", &[(3, 2)]));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.tags(), TagBlame::from([(3, 2)]));
        assert!(Arc::ptr_eq(&cache.get_by_id(1).expect("by id"), &first));
        assert!(Arc::ptr_eq(&cache.get_by_hash("aa").expect("by hash"), &first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hash_index_wins_over_conflicting_id() {
        let (_, cache) = cache();
        let original = cache.upsert(api_image(1, "aa", &[]));
        let merged = cache.upsert(api_image(2, "aa", &[(7, 1)]));

        assert!(Arc::ptr_eq(&original, &merged));
        assert_eq!(merged.id(), 1);
        assert!(cache.get_by_id(2).is_none());
        assert!(merged.has_tag(7));
    }

    #[test]
    fn merge_updates_active_flag() {
        let (_, cache) = cache();
        let image = cache.upsert(api_image(1, "aa", &[]));
        let mut inactive = api_image(1, "aa", &[]);
        inactive.active = false;
        cache.upsert(inactive);
        assert!(!image.is_active());
    }

    #[test]
    fn records_create_and_merge() {
        let (_, cache) = cache();
        let hash = Bytes::from(vec![0xab; HASH_LEN]);
        let created = cache
            .upsert_record(&ImageRecord {
                id: Some(5),
                hash: Some(hash.clone()),
                tags: Some(TagBlame::from([(1, 1)])),
                attributes: None,
            })
            .expect("created");
        assert_eq!(created.hash(), "ab".repeat(HASH_LEN));

        let merged = cache
            .upsert_record(&ImageRecord {
                id: Some(5),
                tags: Some(TagBlame::from([(2, 1)])),
                ..ImageRecord::default()
            })
            .expect("merged");
        assert!(Arc::ptr_eq(&created, &merged));
        assert_eq!(merged.flat_tags(), vec![2]);

        assert!(cache
            .upsert_record(&ImageRecord {
                id: Some(6),
                ..ImageRecord::default()
            })
            .is_none());
    }

    #[tokio::test]
    async fn fetch_by_id_merges_into_cached_instance() {
        let (transport, cache) = cache();
        let cached = cache.upsert(api_image(4, "cc", &[]));
        transport.serve_image(4, "cc", json!({ "9": 1 }));

        let fetched = cache.fetch_by_id(4).await.expect("fetch").expect("found");
        assert!(Arc::ptr_eq(&cached, &fetched));
        assert!(cached.has_tag(9));
    }

    #[tokio::test]
    async fn hydrate_skips_network_for_cached_images() {
        let (transport, cache) = cache();
        cache.upsert(api_image(4, "cc", &[]));
        cache.hydrate(4).await.expect("hydrate").expect("cached");
        assert!(transport.requests().is_empty());

        assert!(cache.hydrate(5).await.expect("hydrate").is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn fetch_by_hash_uses_hash_route() {
        let (transport, cache) = cache();
        transport.respond_json(
            crate::api::Method::Get,
            "/images/hash/dd/metadata",
            json!({ "id": 3, "hash": "dd", "active": true }),
        );
        let image = cache.fetch_by_hash("dd").await.expect("fetch").expect("found");
        assert_eq!(image.id(), 3);
        assert!(Arc::ptr_eq(&cache.get_by_id(3).expect("indexed"), &image));
    }
}
