//! Invalidation subscriptions.
//!
//! The host decides when content changes; the cache decides which entries
//! that invalidates. Hosts register named handlers against event names
//! (`"post.saved"`, `"option.updated"`, ...) and dispatch [`EntityChange`]s
//! through an [`InvalidationRegistry`]. [`InvalidationRegistry::content_defaults`]
//! wires the standard content-model events to the handlers on
//! [`ObjectCache`].

use std::collections::BTreeMap;

use crate::object_cache::ObjectCache;
use crate::store::PersistentStore;

const TRANSIENT_META_PREFIX: &str = "_transient_";

/// A change in the host's content model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    Option { name: String },
    Post { id: u64, post_type: Option<String> },
    Term { ids: Vec<u64>, taxonomy: Option<String> },
    Meta { object_id: Option<u64>, meta_key: Option<String> },
    Comment { id: u64 },
    User { id: u64 },
}

impl EntityChange {
    /// Short name of the changed entity kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EntityChange::Option { .. } => "option",
            EntityChange::Post { .. } => "post",
            EntityChange::Term { .. } => "term",
            EntityChange::Meta { .. } => "meta",
            EntityChange::Comment { .. } => "comment",
            EntityChange::User { .. } => "user",
        }
    }
}

type HandlerFn<S> = Box<dyn Fn(&mut ObjectCache<S>, &EntityChange) + Send + Sync>;

struct Handler<S: PersistentStore> {
    name: String,
    callback: HandlerFn<S>,
}

/// Named invalidation handlers keyed by event name.
pub struct InvalidationRegistry<S: PersistentStore> {
    handlers: BTreeMap<String, Vec<Handler<S>>>,
}

impl<S: PersistentStore> Default for InvalidationRegistry<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S: PersistentStore> InvalidationRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry bound to the standard content-model events.
    pub fn content_defaults() -> Self {
        let mut registry = Self::new();

        for event in ["option.added", "option.updated", "option.deleted"] {
            registry.subscribe(event, "flush_option", |cache, change| {
                if let EntityChange::Option { name } = change {
                    cache.invalidate_option(name);
                }
            });
        }

        for event in ["post.saved", "post.deleted", "post.cleaned", "post.status_changed"] {
            registry.subscribe(event, "flush_post", |cache, change| {
                if let EntityChange::Post { id, post_type } = change {
                    cache.invalidate_post(*id, post_type.as_deref());
                }
            });
        }

        for event in ["term.edited", "term.deleted", "term.cleaned", "terms.edited"] {
            registry.subscribe(event, "flush_term", |cache, change| {
                if let EntityChange::Term { ids, taxonomy } = change {
                    cache.invalidate_terms(ids, taxonomy.as_deref());
                }
            });
        }

        for event in ["post_meta.added", "post_meta.updated", "post_meta.deleted"] {
            registry.subscribe(event, "flush_meta", |cache, change| {
                if let EntityChange::Meta {
                    object_id,
                    meta_key,
                } = change
                {
                    cache.invalidate_meta(*object_id, meta_key.as_deref());
                }
            });
        }

        for event in ["comment.status_changed", "comment.edited"] {
            registry.subscribe(event, "flush_comment", |cache, change| {
                if let EntityChange::Comment { id } = change {
                    cache.invalidate_comment(*id);
                }
            });
        }

        for event in ["user.updated", "user.registered", "user.deleted"] {
            registry.subscribe(event, "flush_user", |cache, change| {
                if let EntityChange::User { id } = change {
                    cache.invalidate_user(*id);
                }
            });
        }

        registry
    }

    /// Register `handler` under `name` for `event`.
    pub fn subscribe<F>(&mut self, event: &str, name: &str, handler: F)
    where
        F: Fn(&mut ObjectCache<S>, &EntityChange) + Send + Sync + 'static,
    {
        tracing::debug!(event, handler = name, "Registered invalidation handler");
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(Handler {
                name: name.to_string(),
                callback: Box::new(handler),
            });
    }

    /// Remove every handler registered under `name` for `event`.
    /// Returns how many were removed.
    pub fn unsubscribe(&mut self, event: &str, name: &str) -> usize {
        let Some(handlers) = self.handlers.get_mut(event) else {
            return 0;
        };
        let before = handlers.len();
        handlers.retain(|handler| handler.name != name);
        let removed = before - handlers.len();
        if handlers.is_empty() {
            self.handlers.remove(event);
        }
        removed
    }

    /// Run every handler registered for `event`. Returns how many ran.
    pub fn dispatch(&self, cache: &mut ObjectCache<S>, event: &str, change: &EntityChange) -> usize {
        let Some(handlers) = self.handlers.get(event) else {
            tracing::trace!(event, "No invalidation handlers for event");
            return 0;
        };

        for handler in handlers {
            tracing::trace!(
                event,
                handler = %handler.name,
                entity = change.kind(),
                "Running invalidation handler"
            );
            (handler.callback)(cache, change);
        }
        handlers.len()
    }

    /// Names of the handlers registered for `event`, in registration order.
    pub fn handlers(&self, event: &str) -> Vec<&str> {
        self.handlers
            .get(event)
            .map(|handlers| handlers.iter().map(|h| h.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Event names with at least one handler.
    pub fn events(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

// ============================================================================
// CONTENT HANDLERS
// ============================================================================

impl<S: PersistentStore> ObjectCache<S> {
    /// Drop a cached option. Multi-tenant caches also drop the network-wide
    /// copies.
    pub fn invalidate_option(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        self.delete(name, "options");
        if self.config().multi_tenant {
            self.delete(name, "site-options");
            self.delete(name, "site-transient");
        }
    }

    /// Drop a cached post. Pages and menu items also flush their listing groups.
    pub fn invalidate_post(&mut self, id: u64, post_type: Option<&str>) {
        if id == 0 {
            return;
        }
        let key = id.to_string();
        self.delete(&key, "posts");
        self.delete(&key, "post_meta");

        let Some(post_type) = post_type.filter(|t| !t.is_empty()) else {
            return;
        };
        self.delete(&key, &format!("post_{}", post_type));

        match post_type {
            "page" => {
                self.flush_group("pages");
            }
            "nav_menu_item" => {
                self.flush_group("nav_menu");
            }
            _ => {}
        }
    }

    pub fn invalidate_terms(&mut self, ids: &[u64], taxonomy: Option<&str>) {
        let taxonomy_group = taxonomy
            .filter(|t| !t.is_empty())
            .map(|t| format!("term_{}", t));

        for id in ids.iter().filter(|id| **id != 0) {
            let key = id.to_string();
            self.delete(&key, "terms");
            self.delete(&key, "term_meta");
            if let Some(group) = &taxonomy_group {
                self.delete(&key, group);
            }
        }
    }

    /// Transient meta keys drop the transient itself; any other meta change
    /// drops the object's meta from every meta group.
    pub fn invalidate_meta(&mut self, object_id: Option<u64>, meta_key: Option<&str>) {
        if let Some(transient) = meta_key.and_then(|key| key.strip_prefix(TRANSIENT_META_PREFIX)) {
            self.delete(transient, "transient");
            return;
        }

        let Some(object_id) = object_id.filter(|id| *id != 0) else {
            return;
        };
        let key = object_id.to_string();
        for group in ["post_meta", "comment_meta", "term_meta", "user_meta"] {
            self.delete(&key, group);
        }
    }

    pub fn invalidate_comment(&mut self, id: u64) {
        if id == 0 {
            return;
        }
        let key = id.to_string();
        self.delete(&key, "comments");
        self.delete(&key, "comment_meta");
    }

    pub fn invalidate_user(&mut self, id: u64) {
        if id == 0 {
            return;
        }
        let key = id.to_string();
        self.delete(&key, "users");
        self.delete(&key, "user_meta");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use strata_core::StrataConfig;

    fn cache() -> ObjectCache<SharedMemoryStore> {
        let config = StrataConfig::default().with_installation_path("/srv/hooks");
        ObjectCache::new(config, Arc::new(SharedMemoryStore::new())).unwrap()
    }

    #[test]
    fn test_subscribe_and_dispatch() {
        let mut registry = InvalidationRegistry::<SharedMemoryStore>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        registry.subscribe("post.saved", "count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut cache = cache();
        let change = EntityChange::Post {
            id: 1,
            post_type: None,
        };
        assert_eq!(registry.dispatch(&mut cache, "post.saved", &change), 1);
        assert_eq!(registry.dispatch(&mut cache, "post.deleted", &change), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(registry.unsubscribe("post.saved", "count"), 1);
        assert!(registry.events().is_empty());
    }

    #[test]
    fn test_content_defaults_bindings() {
        let registry = InvalidationRegistry::<SharedMemoryStore>::content_defaults();
        assert_eq!(registry.handlers("option.updated"), vec!["flush_option"]);
        assert_eq!(registry.handlers("post.status_changed"), vec!["flush_post"]);
        assert_eq!(registry.handlers("terms.edited"), vec!["flush_term"]);
        assert_eq!(registry.handlers("post_meta.deleted"), vec!["flush_meta"]);
        assert_eq!(registry.handlers("comment.edited"), vec!["flush_comment"]);
        assert_eq!(registry.handlers("user.registered"), vec!["flush_user"]);
        assert!(registry.handlers("unknown").is_empty());
    }

    #[test]
    fn test_option_change_drops_network_copies() {
        let registry = InvalidationRegistry::content_defaults();
        let mut cache = cache();
        cache.set("blogname", json!("Site"), "options", 0);
        cache.set("blogname", json!("Network"), "site-options", 0);

        let change = EntityChange::Option {
            name: "blogname".to_string(),
        };
        registry.dispatch(&mut cache, "option.updated", &change);

        assert_eq!(cache.get("blogname", "options"), None);
        assert_eq!(cache.get("blogname", "site-options"), None);
    }

    #[test]
    fn test_page_change_flushes_pages_group() {
        let mut cache = cache();
        cache.set("42", json!({"title": "About"}), "posts", 0);
        cache.set("42", json!("page"), "post_page", 0);
        cache.set("listing", json!([42]), "pages", 0);
        cache.set("other", json!(1), "terms", 0);

        cache.invalidate_post(42, Some("page"));

        assert_eq!(cache.get("42", "posts"), None);
        assert_eq!(cache.get("42", "post_page"), None);
        assert_eq!(cache.get("listing", "pages"), None);
        assert_eq!(cache.get("other", "terms"), Some(json!(1)));
    }

    #[test]
    fn test_term_change() {
        let mut cache = cache();
        cache.set("3", json!("t"), "terms", 0);
        cache.set("4", json!("t"), "term_category", 0);

        cache.invalidate_terms(&[3, 4], Some("category"));

        assert_eq!(cache.get("3", "terms"), None);
        assert_eq!(cache.get("4", "term_category"), None);
    }

    #[test]
    fn test_meta_change() {
        let mut cache = cache();
        cache.set("feed_cache", json!("xml"), "transient", 0);
        cache.set("9", json!({}), "user_meta", 0);
        cache.set("9", json!({}), "post_meta", 0);

        cache.invalidate_meta(None, Some("_transient_feed_cache"));
        assert_eq!(cache.get("feed_cache", "transient"), None);
        assert_eq!(cache.get("9", "user_meta"), Some(json!({})));

        cache.invalidate_meta(Some(9), Some("color"));
        assert_eq!(cache.get("9", "user_meta"), None);
        assert_eq!(cache.get("9", "post_meta"), None);
    }

    #[test]
    fn test_comment_and_user_change() {
        let registry = InvalidationRegistry::content_defaults();
        let mut cache = cache();
        cache.set("5", json!("c"), "comments", 0);
        cache.set("6", json!("u"), "users", 0);

        registry.dispatch(&mut cache, "comment.edited", &EntityChange::Comment { id: 5 });
        registry.dispatch(&mut cache, "user.deleted", &EntityChange::User { id: 6 });

        assert_eq!(cache.get("5", "comments"), None);
        assert_eq!(cache.get("6", "users"), None);
    }

    #[test]
    fn test_mismatched_change_is_ignored() {
        let registry = InvalidationRegistry::content_defaults();
        let mut cache = cache();
        cache.set("5", json!("c"), "comments", 0);

        registry.dispatch(&mut cache, "post.saved", &EntityChange::Comment { id: 5 });
        assert_eq!(cache.get("5", "comments"), Some(json!("c")));
    }
}
