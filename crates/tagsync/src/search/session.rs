use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::api::ApiClient;
use crate::bus::Bus;
use crate::cache::EntityCache;
use crate::cancel::{SearchVersionTracker, VersionStamp};
use crate::codec;
use crate::error::SyncResult;
use crate::event::{
    CurrentImageChangedPayload, QueryChangedPayload, ResultsReplacedPayload, SyncEvent,
};
use crate::query::{compile, CompiledQuery};
use crate::storage::SessionStore;
use crate::types::{ImageId, SearchSelect};

use super::history::SearchHistory;

/// What happened to a search once its response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The results replaced the visible sequence.
    Applied { len: usize },
    /// A newer search started first; the response was ignored.
    Superseded,
}

struct SessionState {
    query_text: String,
    compiled: CompiledQuery,
    results: Arc<[ImageId]>,
    current: Option<(usize, ImageId)>,
    history: SearchHistory,
}

/// The active query, its visible result sequence and the current position
/// within it.
pub struct SearchSession {
    api: Arc<ApiClient>,
    cache: Arc<EntityCache>,
    store: Arc<SessionStore>,
    bus: Bus,
    versions: SearchVersionTracker,
    state: RwLock<SessionState>,
}

impl SearchSession {
    pub fn new(
        api: Arc<ApiClient>,
        cache: Arc<EntityCache>,
        store: Arc<SessionStore>,
        bus: Bus,
        history_limit: usize,
    ) -> Self {
        let history = SearchHistory::from_entries(store.history(), history_limit);
        Self {
            api,
            cache,
            store,
            bus,
            versions: SearchVersionTracker::new(),
            state: RwLock::new(SessionState {
                query_text: String::new(),
                compiled: CompiledQuery::default(),
                results: Arc::from(Vec::new()),
                current: None,
                history,
            }),
        }
    }

    pub fn query_text(&self) -> String {
        self.state.read().query_text.clone()
    }

    pub fn compiled(&self) -> CompiledQuery {
        self.state.read().compiled.clone()
    }

    pub fn history(&self) -> Vec<String> {
        self.state.read().history.to_vec()
    }

    /// Snapshot of the visible result sequence, in server rank order.
    pub fn results(&self) -> Arc<[ImageId]> {
        Arc::clone(&self.state.read().results)
    }

    pub fn len(&self) -> usize {
        self.state.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the most recently started search.
    pub fn version(&self) -> u64 {
        self.versions.current_version()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.read().current.map(|(index, _)| index)
    }

    pub fn current_image_id(&self) -> Option<ImageId> {
        self.state.read().current.map(|(_, id)| id)
    }

    /// Compiles and installs a new query. Returns `false` when `text` is
    /// already the current query. Compile errors leave all state untouched.
    pub fn set_query(&self, text: &str) -> SyncResult<bool> {
        if self.state.read().query_text == text {
            return Ok(false);
        }
        let compiled = compile(text, self.cache.tags())?;

        let history = {
            let mut state = self.state.write();
            state.query_text = text.to_string();
            state.compiled = compiled;
            state.results = Arc::from(Vec::new());
            state.current = None;
            state.history.push(text.to_string());
            state.history.to_vec()
        };

        if let Err(error) = self.store.save_query(text, &history) {
            tracing::warn!(%error, "failed to persist search query");
        }
        self.bus.publish(SyncEvent::QueryChanged(QueryChangedPayload {
            text: text.to_string(),
        }));
        Ok(true)
    }

    /// `set_query` followed by `execute`.
    pub async fn search(&self, text: &str) -> SyncResult<SearchOutcome> {
        self.set_query(text)?;
        self.execute().await
    }

    /// Runs the current query.
    ///
    /// Only the most recently started search can change the visible results:
    /// a response (or failure) arriving after a newer search began is
    /// dropped and reported as [`SearchOutcome::Superseded`]. A query with no
    /// predicate is never sent; it yields an empty sequence.
    #[tracing::instrument(skip_all, fields(version))]
    pub async fn execute(&self) -> SyncResult<SearchOutcome> {
        let (query_text, compiled) = {
            let state = self.state.read();
            (state.query_text.clone(), state.compiled.clone())
        };
        let stamp = self.versions.begin();
        tracing::Span::current().record("version", stamp.version());

        let fetched = if compiled.is_unconstrained() {
            tracing::debug!("unconstrained query, skipping search request");
            Ok(Vec::new())
        } else {
            tracing::info!(query = %compiled.to_query_text(), "searching");
            self.fetch_ids(&compiled).await
        };

        if stamp.is_superseded() {
            tracing::info!(
                version = stamp.version(),
                current = self.versions.current_version(),
                "discarding stale search response"
            );
            return Ok(SearchOutcome::Superseded);
        }
        let ids = fetched?;
        Ok(self.apply_results(&stamp, &query_text, ids))
    }

    async fn fetch_ids(&self, compiled: &CompiledQuery) -> SyncResult<Vec<ImageId>> {
        let body: Bytes = self.api.search(compiled, &[SearchSelect::Id]).await?;
        let ids = codec::decode(body)?.into_ids()?;
        Ok(ids.iter().map(ImageId::from).collect())
    }

    fn apply_results(&self, stamp: &VersionStamp, query_text: &str, ids: Vec<ImageId>) -> SearchOutcome {
        let restored = self.store.position_for(query_text);

        let (len, current) = {
            let mut state = self.state.write();
            if stamp.is_superseded() || state.query_text != query_text {
                tracing::info!(version = stamp.version(), "query changed while searching, discarding");
                return SearchOutcome::Superseded;
            }

            let current = restored
                .and_then(|id| ids.iter().position(|candidate| *candidate == id).map(|index| (index, id)))
                .or_else(|| ids.first().map(|id| (0, *id)));
            let len = ids.len();
            state.results = Arc::from(ids);
            state.current = current;
            (len, current)
        };

        tracing::info!(version = stamp.version(), results = len, "search results applied");
        self.bus.publish(SyncEvent::ResultsReplaced(ResultsReplacedPayload {
            query_text: query_text.to_string(),
            version: stamp.version(),
            len,
        }));
        self.announce_current(query_text, current);
        SearchOutcome::Applied { len }
    }

    /// Moves to `index` in the result sequence. Out-of-range indices leave
    /// the position unchanged and return `None`. Callers outside the crate
    /// move through [`NavigationCursor`](crate::navigation::NavigationCursor),
    /// which also hydrates the surrounding window.
    pub(crate) fn set_current_index(&self, index: usize) -> Option<ImageId> {
        let (query_text, current) = {
            let mut state = self.state.write();
            let id = *state.results.get(index)?;
            if state.current == Some((index, id)) {
                return Some(id);
            }
            state.current = Some((index, id));
            (state.query_text.clone(), (index, id))
        };
        self.announce_current(&query_text, Some(current));
        Some(current.1)
    }

    /// Moves to the first occurrence of `image_id` in the results.
    pub(crate) fn set_current_image(&self, image_id: ImageId) -> Option<usize> {
        let index = self
            .state
            .read()
            .results
            .iter()
            .position(|candidate| *candidate == image_id)?;
        self.set_current_index(index).map(|_| index)
    }

    fn announce_current(&self, query_text: &str, current: Option<(usize, ImageId)>) {
        if let Some((_, image_id)) = current {
            if let Err(error) = self.store.remember_position(query_text, image_id) {
                tracing::warn!(%error, image_id, "failed to persist current position");
            }
        }
        self.bus
            .publish(SyncEvent::CurrentImageChanged(CurrentImageChangedPayload {
                image_id: current.map(|(_, id)| id),
                index: current.map(|(index, _)| index),
            }));
    }
}
