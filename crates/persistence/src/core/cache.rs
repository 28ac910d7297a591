//! Optional caching and query-session services.
//!
//! All three services are optional collaborators of the engine. The in-memory
//! implementations here keep their state behind `parking_lot` locks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::model::{Entity, LoadMode};

/// A cached entity and the load mode it was materialized at.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntity {
    /// The entity as materialized.
    pub entity: Entity,
    /// Mode it was materialized at.
    pub load_mode: LoadMode,
}

/// Per-record cache keyed by logical key.
pub trait DataCache: Send + Sync {
    /// Cached copy of the current version of `key`.
    fn get(&self, key: Uuid) -> Option<CachedEntity>;

    /// Stores the current version of an entity.
    fn put(&self, entity: &Entity, load_mode: LoadMode);

    /// Drops a record.
    fn remove(&self, key: Uuid);

    /// Drops everything.
    fn clear(&self);
}

/// String-keyed cache of looked-up keys.
pub trait AdhocCache: Send + Sync {
    /// Cached value for `key`.
    fn get(&self, key: &str) -> Option<Uuid>;

    /// Stores a value.
    fn put(&self, key: &str, value: Uuid);

    /// Drops a value.
    fn remove(&self, key: &str);
}

/// Remembers the ordered key list of a query between pages.
pub trait QuerySessionStore: Send + Sync {
    /// Stores a result set and returns its session id.
    fn create(&self, keys: Vec<Uuid>) -> Uuid;

    /// The result set of a session.
    fn get(&self, session_id: Uuid) -> Option<Arc<Vec<Uuid>>>;

    /// Forgets a session.
    fn remove(&self, session_id: Uuid);
}

/// In-memory [`DataCache`].
#[derive(Debug, Default)]
pub struct MemoryDataCache {
    entries: RwLock<HashMap<Uuid, CachedEntity>>,
}

impl MemoryDataCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DataCache for MemoryDataCache {
    fn get(&self, key: Uuid) -> Option<CachedEntity> {
        self.entries.read().get(&key).cloned()
    }

    fn put(&self, entity: &Entity, load_mode: LoadMode) {
        if let Some(key) = entity.key {
            self.entries.write().insert(
                key,
                CachedEntity {
                    entity: entity.clone(),
                    load_mode,
                },
            );
        }
    }

    fn remove(&self, key: Uuid) {
        self.entries.write().remove(&key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

/// In-memory [`AdhocCache`].
#[derive(Debug, Default)]
pub struct MemoryAdhocCache {
    entries: RwLock<HashMap<String, Uuid>>,
}

impl MemoryAdhocCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdhocCache for MemoryAdhocCache {
    fn get(&self, key: &str) -> Option<Uuid> {
        self.entries.read().get(key).copied()
    }

    fn put(&self, key: &str, value: Uuid) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// In-memory [`QuerySessionStore`] holding at most `capacity` sessions.
///
/// The oldest session is evicted first.
#[derive(Debug)]
pub struct MemoryQuerySessions {
    capacity: usize,
    inner: Mutex<SessionTable>,
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<Uuid, Arc<Vec<Uuid>>>,
    order: VecDeque<Uuid>,
}

impl MemoryQuerySessions {
    /// Creates a store with the given capacity (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(SessionTable::default()),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns `true` if no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQuerySessions {
    fn default() -> Self {
        Self::new(256)
    }
}

impl QuerySessionStore for MemoryQuerySessions {
    fn create(&self, keys: Vec<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        let mut table = self.inner.lock();
        while table.sessions.len() >= self.capacity {
            match table.order.pop_front() {
                Some(oldest) => {
                    table.sessions.remove(&oldest);
                }
                None => break,
            }
        }
        table.sessions.insert(id, Arc::new(keys));
        table.order.push_back(id);
        id
    }

    fn get(&self, session_id: Uuid) -> Option<Arc<Vec<Uuid>>> {
        self.inner.lock().sessions.get(&session_id).cloned()
    }

    fn remove(&self, session_id: Uuid) {
        let mut table = self.inner.lock();
        table.sessions.remove(&session_id);
        table.order.retain(|id| *id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;

    #[test]
    fn test_data_cache_round_trip() {
        let cache = MemoryDataCache::new();
        let key = Uuid::new_v4();
        let entity = Entity::new(EntityKind::Entity).with_key(key);

        cache.put(&entity, LoadMode::Sync);
        let hit = cache.get(key).unwrap();
        assert_eq!(hit.load_mode, LoadMode::Sync);
        assert_eq!(hit.entity, entity);

        cache.remove(key);
        assert!(cache.get(key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_data_cache_ignores_unkeyed() {
        let cache = MemoryDataCache::new();
        cache.put(&Entity::new(EntityKind::Entity), LoadMode::Quick);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_adhoc_cache() {
        let cache = MemoryAdhocCache::new();
        let k = Uuid::new_v4();
        cache.put("concept:Foo", k);
        assert_eq!(cache.get("concept:Foo"), Some(k));
        cache.remove("concept:Foo");
        assert_eq!(cache.get("concept:Foo"), None);
    }

    #[test]
    fn test_sessions_evict_oldest() {
        let sessions = MemoryQuerySessions::new(2);
        let a = sessions.create(vec![Uuid::new_v4()]);
        let b = sessions.create(vec![]);
        let c = sessions.create(vec![]);

        assert!(sessions.get(a).is_none());
        assert!(sessions.get(b).is_some());
        assert!(sessions.get(c).is_some());
        assert_eq!(sessions.len(), 2);

        sessions.remove(b);
        assert!(sessions.get(b).is_none());
    }
}
