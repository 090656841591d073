//! One context object per process, owning every component.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::annotate::{AnnotationMutator, AttributeWrite, ToggleReport};
use crate::api::{ApiClient, HttpTransport, Transport};
use crate::bus::Bus;
use crate::cache::{EntityCache, Image, Tag};
use crate::config::ClientConfig;
use crate::error::SyncResult;
use crate::event::{ErrorPayload, ServiceStatusPayload, SyncEvent, TagsLoadedPayload};
use crate::navigation::NavigationCursor;
use crate::search::{SearchOutcome, SearchSession};
use crate::storage::SessionStore;

pub struct SyncEngine {
    config: ClientConfig,
    bus: Bus,
    api: Arc<ApiClient>,
    cache: Arc<EntityCache>,
    store: Arc<SessionStore>,
    session: Arc<SearchSession>,
    mutator: AnnotationMutator,
    cursor: NavigationCursor,
    service_down: AtomicBool,
}

impl SyncEngine {
    /// Builds the engine with durable state chosen by `config.state_path`.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> SyncResult<Self> {
        config.validate()?;
        let store = SessionStore::from_config(&config)?;
        Ok(Self::with_store(config, transport, store))
    }

    /// Builds an engine talking HTTP to `config.api_url`. The returned
    /// transport is where the bearer token gets set.
    pub fn over_http(config: ClientConfig) -> SyncResult<(Self, Arc<HttpTransport>)> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let engine = Self::new(config, Arc::clone(&transport) as Arc<dyn Transport>)?;
        Ok((engine, transport))
    }

    pub fn with_store(config: ClientConfig, transport: Arc<dyn Transport>, store: SessionStore) -> Self {
        let bus = Bus::new(config.bus_capacity.max(1));
        let api = Arc::new(ApiClient::new(transport));
        let cache = Arc::new(EntityCache::new(Arc::clone(&api)));
        let store = Arc::new(store);
        let session = Arc::new(SearchSession::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            Arc::clone(&store),
            bus.clone(),
            config.history_limit,
        ));
        let mutator = AnnotationMutator::new(Arc::clone(&api), Arc::clone(&cache), bus.clone());
        let cursor = NavigationCursor::new(Arc::clone(&session), Arc::clone(&cache), &config);

        Self {
            config,
            bus,
            api,
            cache,
            store,
            session,
            mutator,
            cursor,
            service_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn session(&self) -> &Arc<SearchSession> {
        &self.session
    }

    pub fn mutator(&self) -> &AnnotationMutator {
        &self.mutator
    }

    pub fn cursor(&self) -> &NavigationCursor {
        &self.cursor
    }

    pub fn is_service_down(&self) -> bool {
        self.service_down.load(Ordering::Acquire)
    }

    /// Loads the acting user and the tag registry, then re-runs the saved
    /// query. A saved query that no longer compiles falls back to the
    /// empty query.
    pub async fn initialize(&self) -> SyncResult<SearchOutcome> {
        self.report(self.mutator.load_user().await)?;
        let tag_count = self.report(self.cache.tags().load().await)?;
        self.bus.publish(SyncEvent::TagsLoaded(TagsLoadedPayload {
            tag_count,
            created: None,
        }));

        let saved = self.store.query_text().unwrap_or_default();
        if let Err(error) = self.session.set_query(&saved) {
            tracing::warn!(query = %saved, %error, "saved query no longer compiles");
            self.session.set_query("")?;
        }
        self.run(self.session.execute().await).await
    }

    pub async fn search(&self, text: &str) -> SyncResult<SearchOutcome> {
        self.run(self.session.search(text).await).await
    }

    /// Re-runs the current query.
    pub async fn refresh(&self) -> SyncResult<SearchOutcome> {
        self.run(self.session.execute().await).await
    }

    async fn run(&self, outcome: SyncResult<SearchOutcome>) -> SyncResult<SearchOutcome> {
        let outcome = self.report(outcome)?;
        if matches!(outcome, SearchOutcome::Applied { .. }) {
            self.cursor.prefetch_window().await;
        }
        Ok(outcome)
    }

    pub async fn toggle_tag(&self, image: &Arc<Image>, tag: &Arc<Tag>) -> SyncResult<ToggleReport> {
        self.report(self.mutator.toggle_tag(image, tag).await)
    }

    pub async fn write_attribute(
        &self,
        image: &Arc<Image>,
        key: &str,
        value: &str,
        singular: bool,
    ) -> SyncResult<AttributeWrite> {
        self.report(self.mutator.write_attribute(image, key, value, singular).await)
    }

    pub async fn remove_attribute(&self, image: &Arc<Image>, key: &str, value: &str) -> SyncResult<()> {
        self.report(self.mutator.remove_attribute(image, key, value).await)
    }

    pub async fn create_tag(&self, name: &str) -> SyncResult<Arc<Tag>> {
        let tag = self.report(self.cache.tags().create_tag(name).await)?;
        self.bus.publish(SyncEvent::TagsLoaded(TagsLoadedPayload {
            tag_count: self.cache.tags().len(),
            created: Some(tag.id()),
        }));
        Ok(tag)
    }

    /// Publishes the outcome of a user-facing operation.
    ///
    /// A 502 flips the engine into the service-down state instead of
    /// producing an error message; the next success flips it back.
    pub fn report<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => {
                if self.service_down.swap(false, Ordering::AcqRel) {
                    tracing::info!("service is back");
                    self.publish_service_status(false);
                }
            }
            Err(error) if error.is_service_down() => {
                if !self.service_down.swap(true, Ordering::AcqRel) {
                    tracing::warn!(%error, "service is down");
                    self.publish_service_status(true);
                }
            }
            Err(error) => {
                tracing::warn!(%error, "operation failed");
                self.bus.publish(SyncEvent::Error(ErrorPayload {
                    message: error.to_string(),
                    status: error.status(),
                }));
            }
        }
        result
    }

    fn publish_service_status(&self, down: bool) {
        self.bus
            .publish(SyncEvent::ServiceStatus(ServiceStatusPayload { down }));
    }
}
