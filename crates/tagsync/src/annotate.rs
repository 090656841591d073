//! Tag toggles and attribute writes.
//!
//! Every cache change follows a confirmed server call for that one change.
//! A multi-tag toggle applies tags one request at a time and stops at the
//! first failure, leaving the already confirmed tags in place.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::api::ApiClient;
use crate::bus::Bus;
use crate::cache::{EntityCache, Image, Tag};
use crate::error::{SyncError, SyncResult};
use crate::event::{ImageUpdatedPayload, SyncEvent};
use crate::types::{ApiUser, ImageId, TagId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleDirection {
    Add,
    Remove,
}

/// Tags changed by a completed toggle, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleReport {
    pub direction: ToggleDirection,
    pub applied: Vec<TagId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeWrite {
    Written,
    /// The server already held the value (409); nothing changed.
    AlreadyPresent,
}

pub struct AnnotationMutator {
    api: Arc<ApiClient>,
    cache: Arc<EntityCache>,
    bus: Bus,
    user: RwLock<Option<ApiUser>>,
    image_locks: Mutex<HashMap<ImageId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AnnotationMutator {
    pub fn new(api: Arc<ApiClient>, cache: Arc<EntityCache>, bus: Bus) -> Self {
        Self {
            api,
            cache,
            bus,
            user: RwLock::new(None),
            image_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the user recorded as blame on confirmed changes.
    pub fn set_user(&self, user: Option<ApiUser>) {
        *self.user.write() = user;
    }

    pub fn user(&self) -> Option<ApiUser> {
        self.user.read().clone()
    }

    pub async fn load_user(&self) -> SyncResult<ApiUser> {
        let user = self.api.current_user().await?;
        tracing::info!(user_id = user.id, username = %user.username, "acting user loaded");
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    fn acting_user(&self) -> SyncResult<UserId> {
        self.user
            .read()
            .as_ref()
            .map(|user| user.id)
            .ok_or(SyncError::NotAuthenticated)
    }

    fn image_lock(&self, image_id: ImageId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.image_locks.lock().entry(image_id).or_default())
    }

    /// Drops the lock entry for `image_id` once no toggle holds or waits
    /// on it. Waiters clone the entry under the map lock, so a count of one
    /// means the map owns the only reference.
    fn release_image_lock(&self, image_id: ImageId) {
        let mut locks = self.image_locks.lock();
        if locks
            .get(&image_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&image_id);
        }
    }

    /// Adds `tag` (and every implied tag the image lacks) or removes it.
    ///
    /// Removal never retracts implied tags. Toggles on the same image are
    /// serialized. When a request fails after earlier ones succeeded the
    /// error is [`SyncError::ToggleAborted`] naming the applied, failed and
    /// skipped tags.
    pub async fn toggle_tag(&self, image: &Arc<Image>, tag: &Arc<Tag>) -> SyncResult<ToggleReport> {
        let user_id = self.acting_user()?;
        if !self.cache.tags().is_loaded() {
            return Err(SyncError::NotLoaded("tag implications"));
        }
        if !tag.is_active() {
            return Err(SyncError::Inactive(format!("tag {:?}", tag.name())));
        }
        if !image.is_active() {
            return Err(SyncError::Inactive(format!("image {}", image.id())));
        }

        let lock = self.image_lock(image.id());
        let result = {
            let _guard = lock.lock().await;
            self.toggle_locked(image, tag, user_id).await
        };
        drop(lock);
        self.release_image_lock(image.id());
        result
    }

    async fn toggle_locked(
        &self,
        image: &Arc<Image>,
        tag: &Arc<Tag>,
        user_id: UserId,
    ) -> SyncResult<ToggleReport> {
        let direction = if image.has_tag(tag.id()) {
            ToggleDirection::Remove
        } else {
            ToggleDirection::Add
        };
        let mut queue = vec![Arc::clone(tag)];
        if direction == ToggleDirection::Add {
            queue.extend(
                self.cache
                    .tags()
                    .implied_tags(tag)?
                    .into_iter()
                    .filter(|implied| !image.has_tag(implied.id())),
            );
        }

        tracing::info!(
            image_id = image.id(),
            tag = tag.name(),
            ?direction,
            planned = ?queue.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "toggling tag"
        );

        let mut applied = Vec::with_capacity(queue.len());
        for (position, next) in queue.iter().enumerate() {
            let result = match direction {
                ToggleDirection::Add => self.api.add_tag(image.id(), next.id()).await,
                ToggleDirection::Remove => self.api.remove_tag(image.id(), next.id()).await,
            };
            if let Err(source) = result {
                let skipped: Vec<TagId> = queue[position + 1..].iter().map(|t| t.id()).collect();
                tracing::warn!(
                    image_id = image.id(),
                    failed = next.id(),
                    applied = ?applied,
                    skipped = ?skipped,
                    error = %source,
                    "tag toggle aborted"
                );
                if !applied.is_empty() {
                    self.publish_update(image.id());
                }
                return Err(abort(applied, next.id(), skipped, source));
            }
            match direction {
                ToggleDirection::Add => image.apply_tag(next.id(), user_id),
                ToggleDirection::Remove => image.drop_tag(next.id()),
            }
            applied.push(next.id());
        }

        self.publish_update(image.id());
        Ok(ToggleReport { direction, applied })
    }

    /// Writes one attribute value. Singular writes replace every existing
    /// value for `key`; others add to the set.
    pub async fn write_attribute(
        &self,
        image: &Arc<Image>,
        key: &str,
        value: &str,
        singular: bool,
    ) -> SyncResult<AttributeWrite> {
        let user_id = self.acting_user()?;
        if key.trim().is_empty() {
            return Err(SyncError::InvalidInput("attribute key must not be empty".to_string()));
        }

        match self.api.add_attribute(image.id(), key, value, singular).await {
            Ok(()) => {}
            Err(error) if error.is_conflict() => {
                tracing::debug!(image_id = image.id(), key, "attribute already present");
                return Ok(AttributeWrite::AlreadyPresent);
            }
            Err(error) => return Err(error),
        }

        image.apply_attribute(key, value, user_id, singular);
        self.publish_update(image.id());
        Ok(AttributeWrite::Written)
    }

    pub async fn remove_attribute(&self, image: &Arc<Image>, key: &str, value: &str) -> SyncResult<()> {
        self.acting_user()?;
        self.api.remove_attribute(image.id(), key, value).await?;
        image.drop_attribute(key, value);
        self.publish_update(image.id());
        Ok(())
    }

    fn publish_update(&self, image_id: ImageId) {
        self.bus
            .publish(SyncEvent::ImageUpdated(ImageUpdatedPayload { image_id }));
    }
}

fn abort(applied: Vec<TagId>, failed: TagId, skipped: Vec<TagId>, source: SyncError) -> SyncError {
    if applied.is_empty() {
        return source;
    }
    SyncError::ToggleAborted {
        applied,
        failed,
        skipped,
        source: Box::new(source),
    }
}
