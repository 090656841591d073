//! Position within the visible result sequence.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::cache::{EntityCache, Image, Tag};
use crate::config::ClientConfig;
use crate::error::SyncResult;
use crate::search::SearchSession;
use crate::types::ImageId;

pub struct NavigationCursor {
    session: Arc<SearchSession>,
    cache: Arc<EntityCache>,
    prefetch_radius: usize,
    unannotated_threshold: usize,
}

impl NavigationCursor {
    pub fn new(session: Arc<SearchSession>, cache: Arc<EntityCache>, config: &ClientConfig) -> Self {
        Self {
            session,
            cache,
            prefetch_radius: config.prefetch_radius,
            unannotated_threshold: config.unannotated_threshold,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.current_index()
    }

    pub fn current_image_id(&self) -> Option<ImageId> {
        self.session.current_image_id()
    }

    /// The current image, if it has been hydrated into the cache.
    pub fn current_image(&self) -> Option<Arc<Image>> {
        self.cache.get_by_id(self.current_image_id()?)
    }

    /// Tags of the current image keyed by name. `None` without a hydrated
    /// current image or a loaded tag list.
    pub fn current_tag_map(&self) -> Option<HashMap<String, Arc<Tag>>> {
        let image = self.current_image()?;
        let registry = self.cache.tags();
        if !registry.is_loaded() {
            return None;
        }
        Some(
            image
                .flat_tags()
                .into_iter()
                .filter_map(|id| registry.get(id))
                .map(|tag| (tag.name().to_string(), tag))
                .collect(),
        )
    }

    fn clamp(&self, index: i64) -> Option<usize> {
        let last = self.session.len().checked_sub(1)?;
        let clamped = index.clamp(0, i64::try_from(last).unwrap_or(i64::MAX));
        usize::try_from(clamped).ok()
    }

    /// Moves to `index`, clamped into the result sequence, then hydrates
    /// the look-ahead window. `None` only when there are no results.
    pub async fn jump_to_index(&self, index: i64) -> Option<usize> {
        let target = self.clamp(index)?;
        self.session.set_current_index(target)?;
        self.prefetch_window().await;
        Some(target)
    }

    /// Moves to the first occurrence of `image_id` in the results and
    /// hydrates the look-ahead window. `None` when the image is not there.
    pub async fn jump_to_image(&self, image_id: ImageId) -> Option<usize> {
        let index = self.session.set_current_image(image_id)?;
        self.prefetch_window().await;
        Some(index)
    }

    /// Moves `delta` positions from the current one (from the start when
    /// there is no current position).
    pub async fn advance(&self, delta: i64) -> Option<usize> {
        let base = self
            .current_index()
            .and_then(|index| i64::try_from(index).ok())
            .unwrap_or(0);
        self.jump_to_index(base.saturating_add(delta)).await
    }

    /// Walks forward from the current position, fetching each candidate,
    /// and stops on the first image with fewer tags than the threshold.
    /// `Ok(None)` when the end is reached first, or when a new result
    /// sequence replaced the one being walked.
    pub async fn next_unannotated(&self) -> SyncResult<Option<usize>> {
        let results = self.session.results();
        let start = self.current_index().map_or(0, |index| index + 1);

        for (index, image_id) in results.iter().copied().enumerate().skip(start) {
            let fetched = self.cache.fetch_by_id(image_id).await?;
            if !Arc::ptr_eq(&results, &self.session.results()) {
                tracing::info!("results replaced while looking for an unannotated image");
                return Ok(None);
            }
            let Some(image) = fetched else {
                tracing::debug!(image_id, "skipping image missing on the server");
                continue;
            };
            if image.tag_count() < self.unannotated_threshold {
                self.session.set_current_index(index);
                self.prefetch_window().await;
                return Ok(Some(index));
            }
        }

        tracing::info!("no unannotated image found");
        Ok(None)
    }

    /// Fetches the images around the current position. Failures are
    /// logged; the window is best effort. Returns how many were hydrated.
    pub async fn prefetch_window(&self) -> usize {
        let Some(current) = self.current_index() else {
            return 0;
        };
        let results = self.session.results();
        let first = current.saturating_sub(self.prefetch_radius);
        let last = current
            .saturating_add(self.prefetch_radius)
            .min(results.len().saturating_sub(1));
        let window = results.get(first..=last).unwrap_or_default();

        let fetches = window.iter().map(|id| self.cache.fetch_by_id(*id));
        let mut hydrated = 0;
        for (id, result) in window.iter().zip(join_all(fetches).await) {
            match result {
                Ok(Some(_)) => hydrated += 1,
                Ok(None) => tracing::debug!(image_id = id, "prefetch target not found"),
                Err(error) => tracing::warn!(image_id = id, %error, "prefetch failed"),
            }
        }
        hydrated
    }
}
