use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::ApiClient;
use crate::error::{SyncError, SyncResult};
use crate::query::TagResolver;
use crate::types::{ApiTag, ApiTagMappings, TagId};

/// An interned tag. One instance per id for the life of the registry.
#[derive(Debug)]
pub struct Tag {
    id: TagId,
    name: String,
    active: AtomicBool,
}

impl Tag {
    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

#[derive(Default)]
struct TagIndex {
    by_id: HashMap<TagId, Arc<Tag>>,
    by_name: HashMap<String, Arc<Tag>>,
    mappings: Option<Mappings>,
}

struct Mappings {
    aliases: HashMap<String, String>,
    implications: HashMap<String, Vec<String>>,
}

impl TagIndex {
    fn intern(&mut self, tag: ApiTag) -> Arc<Tag> {
        if let Some(existing) = self.by_id.get(&tag.id) {
            existing.set_active(tag.active);
            return Arc::clone(existing);
        }
        let interned = Arc::new(Tag {
            id: tag.id,
            name: tag.name,
            active: AtomicBool::new(tag.active),
        });
        self.by_id.insert(interned.id, Arc::clone(&interned));
        self.by_name
            .insert(interned.name.clone(), Arc::clone(&interned));
        interned
    }

    fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.mappings
            .as_ref()
            .and_then(|mappings| mappings.aliases.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }
}

/// Tag list plus the reference data relating tags to one another
/// (aliases and implications).
pub struct TagRegistry {
    api: Arc<ApiClient>,
    index: RwLock<TagIndex>,
}

impl TagRegistry {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            index: RwLock::new(TagIndex::default()),
        }
    }

    /// Fetches the tag list, then the mappings.
    pub async fn load(&self) -> SyncResult<usize> {
        let tags = self.api.tags().await?;
        let mappings = self.api.tag_mappings().await?;
        let count = tags.len();
        self.install(tags, mappings);
        tracing::info!(tags = count, "tag registry loaded");
        Ok(count)
    }

    /// Interns `tags` and replaces the mappings. Existing instances are
    /// kept; only their active flag follows the new data.
    pub(crate) fn install(&self, tags: Vec<ApiTag>, mappings: ApiTagMappings) {
        let mut index = self.index.write();
        for tag in tags {
            index.intern(tag);
        }
        index.mappings = Some(Mappings {
            aliases: mappings.aliases,
            implications: mappings.implications,
        });
    }

    pub fn is_loaded(&self) -> bool {
        self.index.read().mappings.is_some()
    }

    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: TagId) -> Option<Arc<Tag>> {
        self.index.read().by_id.get(&id).cloned()
    }

    /// Looks a tag up by name, following aliases.
    pub fn by_name(&self, name: &str) -> Option<Arc<Tag>> {
        let index = self.index.read();
        let canonical = index.canonical_name(name);
        index.by_name.get(canonical).cloned()
    }

    /// Every tag `tag` implies, directly or transitively, in breadth-first
    /// order. The source tag is never part of its own closure.
    pub fn implied_tags(&self, tag: &Tag) -> SyncResult<Vec<Arc<Tag>>> {
        let index = self.index.read();
        let mappings = index
            .mappings
            .as_ref()
            .ok_or(SyncError::NotLoaded("tag implications"))?;

        let mut seen = HashSet::from([tag.name.as_str()]);
        let mut queue = VecDeque::from([tag.name.as_str()]);
        let mut implied = Vec::new();

        while let Some(name) = queue.pop_front() {
            let Some(targets) = mappings.implications.get(name) else {
                continue;
            };
            for target in targets {
                let target = index.canonical_name(target);
                if !seen.insert(target) {
                    continue;
                }
                queue.push_back(target);
                match index.by_name.get(target) {
                    Some(found) => implied.push(Arc::clone(found)),
                    None => tracing::warn!(
                        source = %tag.name,
                        implied = target,
                        "implication names an unknown tag"
                    ),
                }
            }
        }

        Ok(implied)
    }

    /// Creates `name` on the server and interns the result.
    ///
    /// An inactive tag of the same name is reactivated in place; an active
    /// one is rejected.
    pub async fn create_tag(&self, name: &str) -> SyncResult<Arc<Tag>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidInput("tag name must not be empty".to_string()));
        }
        if let Some(existing) = self.by_name(name) {
            if existing.is_active() {
                return Err(SyncError::InvalidInput(format!("tag {name:?} already exists")));
            }
        }

        self.api.create_tag(name).await?;
        let created = self
            .api
            .tag_by_name(name)
            .await?
            .ok_or_else(|| SyncError::Protocol(format!("created tag {name:?} was not found")))?;

        let tag = self.index.write().intern(created);
        tracing::info!(tag_id = tag.id, name = %tag.name, "tag created");
        Ok(tag)
    }
}

impl TagResolver for TagRegistry {
    fn resolve_tag(&self, name: &str) -> SyncResult<Option<TagId>> {
        if !self.is_loaded() {
            return Err(SyncError::NotLoaded("tag list"));
        }
        Ok(self.by_name(name).map(|tag| tag.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::query::compile;
    use crate::test_support::ScriptedTransport;
    use serde_json::json;

    fn api_tag(id: TagId, name: &str, active: bool) -> ApiTag {
        ApiTag {
            id,
            name: name.to_string(),
            active,
        }
    }

    fn loaded_registry() -> TagRegistry {
        let registry = TagRegistry::new(ScriptedTransport::new().client());
        registry.install(
            vec![
                api_tag(1, "cat", true),
                api_tag(2, "animal", true),
                api_tag(3, "mammal", true),
                api_tag(4, "kitten", true),
            ],
            ApiTagMappings {
                aliases: HashMap::from([("feline".to_string(), "cat".to_string())]),
                implications: HashMap::from([
                    ("kitten".to_string(), vec!["cat".to_string()]),
                    ("cat".to_string(), vec!["mammal".to_string(), "ghost".to_string()]),
                    ("mammal".to_string(), vec!["animal".to_string(), "cat".to_string()]),
                ]),
                blacklist: vec!["nsfw".to_string()],
                deprecations: vec!["old".to_string()],
            },
        );
        registry
    }

    fn names(tags: &[Arc<Tag>]) -> Vec<&str> {
        tags.iter().map(|tag| tag.name()).collect()
    }

    #[test]
    fn closure_is_transitive_and_excludes_source() {
        let registry = loaded_registry();
        let kitten = registry.get(4).expect("kitten");
        let implied = registry.implied_tags(&kitten).expect("closure");
        assert_eq!(names(&implied), vec!["cat", "mammal", "animal"]);

        let cat = registry.get(1).expect("cat");
        let implied = registry.implied_tags(&cat).expect("closure");
        assert_eq!(names(&implied), vec!["mammal", "animal"]);
    }

    #[test]
    fn closure_requires_loaded_mappings() {
        let registry = TagRegistry::new(ScriptedTransport::new().client());
        let tag = Tag {
            id: 1,
            name: "cat".to_string(),
            active: AtomicBool::new(true),
        };
        assert!(matches!(
            registry.implied_tags(&tag),
            Err(SyncError::NotLoaded(_))
        ));
    }

    #[test]
    fn aliases_resolve_for_queries() {
        let registry = loaded_registry();
        assert_eq!(registry.by_name("feline").map(|tag| tag.id()), Some(1));
        let query = compile("feline -animal", &registry).expect("compile");
        assert_eq!(query.to_query_text(), "(tag:1 and not tag:2)");
    }

    #[test]
    fn unloaded_registry_refuses_name_resolution() {
        let registry = TagRegistry::new(ScriptedTransport::new().client());
        assert!(matches!(
            compile("cat", &registry),
            Err(SyncError::NotLoaded(_))
        ));
    }

    #[test]
    fn reinstall_keeps_instances() {
        let registry = loaded_registry();
        let before = registry.get(1).expect("cat");
        registry.install(vec![api_tag(1, "cat", false)], ApiTagMappings::default());
        let after = registry.get(1).expect("cat");
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!before.is_active());
    }

    #[tokio::test]
    async fn load_fetches_tags_then_mappings() {
        let transport = ScriptedTransport::new();
        transport.respond_json(
            Method::Get,
            "/tags",
            json!([{ "id": 1, "name": "cat", "active": true }]),
        );
        transport.respond_json(
            Method::Get,
            "/tag_mappings",
            json!({ "implications": { "cat": ["animal"] } }),
        );
        let registry = TagRegistry::new(transport.client());

        assert_eq!(registry.load().await.expect("load"), 1);
        assert!(registry.is_loaded());
        let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/tags", "/tag_mappings"]);
    }

    #[tokio::test]
    async fn create_tag_reactivates_inactive_instance() {
        let transport = ScriptedTransport::new();
        let registry = TagRegistry::new(transport.client());
        registry.install(vec![api_tag(8, "sunset", false)], ApiTagMappings::default());
        let before = registry.get(8).expect("sunset");

        transport.respond(Method::Post, "/tags", crate::api::RawResponse::ok(""));
        transport.respond_json(
            Method::Get,
            "/tags/by-name/sunset",
            json!({ "id": 8, "name": "sunset", "active": true }),
        );
        let created = registry.create_tag("sunset").await.expect("create");
        assert!(Arc::ptr_eq(&before, &created));
        assert!(created.is_active());
    }

    #[tokio::test]
    async fn create_tag_rejects_active_duplicate() {
        let transport = ScriptedTransport::new();
        let registry = TagRegistry::new(transport.client());
        registry.install(vec![api_tag(1, "cat", true)], ApiTagMappings::default());

        let err = registry.create_tag("cat").await.expect_err("duplicate");
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(transport.requests().is_empty());
    }
}
