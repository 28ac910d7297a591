//! The entity store service.
//!
//! [`EntityStore`] wires the SQLite backend, the classification registry,
//! the validator, the predicate translator and the optional caches together,
//! and implements [`EntityStorage`], [`BulkStorage`] and
//! [`SecurityUserStorage`]. Every call opens exactly one transaction.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{EntityRow, SecurityUserRow};
use crate::backends::sqlite::{SqliteBackend, SqliteQueryTranslator};
use crate::config::EngineConfig;
use crate::context::ActorContext;
use crate::core::{
    AdhocCache, ArchiveStore, ArchivedEntity, BulkStorage, DataCache, DeleteMode, EntityQuery,
    EntityStorage, KeyPage, QueryPage, QuerySessionStore, SecurityUserStorage,
};
use crate::error::{
    ConfigurationError, QueryError, ResourceError, StorageError, StorageResult,
};
use crate::model::{
    Entity, EntityKindTag, LoadMode, Ref, SecurityUser, StatusKeys,
};
use crate::query::{Predicate, QueryTranslator, SqlFragment, describe_target};

use super::bulk;
use super::materialize::Materializer;
use super::persist::Persister;
use super::registry::ClassKeyRegistry;
use super::resolve::Resolvable;
use super::validation::{StandardValidator, Validator};

/// Builder for [`EntityStore`].
pub struct EntityStoreBuilder {
    backend: Arc<SqliteBackend>,
    config: EngineConfig,
    registry: Option<ClassKeyRegistry>,
    validator: Arc<dyn Validator>,
    translator: Arc<dyn QueryTranslator>,
    data_cache: Option<Arc<dyn DataCache>>,
    adhoc_cache: Option<Arc<dyn AdhocCache>>,
    sessions: Option<Arc<dyn QuerySessionStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl EntityStoreBuilder {
    /// Starts a store over `backend` with default settings.
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self {
            backend,
            config: EngineConfig::default(),
            registry: None,
            validator: Arc::new(StandardValidator),
            translator: Arc::new(SqliteQueryTranslator::with_standard_hacks()),
            data_cache: None,
            adhoc_cache: None,
            sessions: None,
            archive: None,
        }
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a custom classification registry instead of the standard one.
    pub fn registry(mut self, registry: ClassKeyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the pre-write validator.
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the predicate translator.
    pub fn translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = translator;
        self
    }

    /// Enables the entity data cache.
    pub fn data_cache(mut self, cache: Arc<dyn DataCache>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    /// Enables the natural-key lookup cache.
    pub fn adhoc_cache(mut self, cache: Arc<dyn AdhocCache>) -> Self {
        self.adhoc_cache = Some(cache);
        self
    }

    /// Enables stateful query sessions.
    pub fn query_sessions(mut self, sessions: Arc<dyn QuerySessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the destination for archived entities.
    pub fn archive_store(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Validates the configuration, initializes the schema and builds the
    /// store.
    ///
    /// # Errors
    ///
    /// * `StorageError::Configuration` - If the configuration is inconsistent
    /// * `StorageError::Backend` - If the schema cannot be initialized
    pub fn build(self) -> StorageResult<EntityStore> {
        self.config.validate()?;
        self.backend.init_schema()?;
        let registry = self.registry.unwrap_or_default();
        let failpoints = Arc::new(self.config.failpoint_set());
        if !failpoints.is_empty() {
            tracing::warn!(count = failpoints.len(), "Failpoints enabled");
        }
        tracing::info!(
            policy = ?self.config.versioning_policy,
            default_load_mode = %self.config.default_load_mode,
            hacks = ?self.translator.hack_names(),
            "Entity store ready"
        );
        Ok(EntityStore {
            backend: self.backend,
            config: self.config,
            registry,
            validator: self.validator,
            translator: self.translator,
            data_cache: self.data_cache,
            adhoc_cache: self.adhoc_cache,
            sessions: self.sessions,
            archive: self.archive,
            failpoints,
        })
    }
}

/// Versioned, polymorphic entity store.
///
/// # Example
///
/// ```no_run
/// use helios_entity_persistence::context::ActorContext;
/// use helios_entity_persistence::core::EntityStorage;
/// use helios_entity_persistence::engine::EntityStore;
/// use helios_entity_persistence::model::{Entity, EntityKind, EntityKindTag, PersonData};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = EntityStore::in_memory()?;
/// let actor = ActorContext::system();
/// let person = Entity::new(EntityKind::Person { person: PersonData::default() });
/// let saved = store.insert(&actor, person).await?;
/// let read = store
///     .get(EntityKindTag::Entity, saved.key.unwrap(), None, None)
///     .await?;
/// assert_eq!(read.unwrap().tag(), EntityKindTag::Person);
/// # Ok(())
/// # }
/// ```
pub struct EntityStore {
    backend: Arc<SqliteBackend>,
    config: EngineConfig,
    registry: ClassKeyRegistry,
    validator: Arc<dyn Validator>,
    translator: Arc<dyn QueryTranslator>,
    data_cache: Option<Arc<dyn DataCache>>,
    adhoc_cache: Option<Arc<dyn AdhocCache>>,
    sessions: Option<Arc<dyn QuerySessionStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
    failpoints: Arc<HashSet<String>>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("hacks", &self.translator.hack_names())
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Starts building a store over `backend`.
    pub fn builder(backend: Arc<SqliteBackend>) -> EntityStoreBuilder {
        EntityStoreBuilder::new(backend)
    }

    /// An in-memory store with default settings.
    pub fn in_memory() -> StorageResult<Self> {
        Self::builder(Arc::new(SqliteBackend::in_memory()?)).build()
    }

    /// A file-backed store.
    pub fn open<P: AsRef<Path>>(path: P, config: EngineConfig) -> StorageResult<Self> {
        let backend = SqliteBackend::with_config(path, config.sqlite.clone())?;
        Self::builder(Arc::new(backend)).config(config).build()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The classification registry.
    pub fn registry(&self) -> &ClassKeyRegistry {
        &self.registry
    }

    /// The underlying backend.
    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    /// Runs `work` in one transaction and flushes deferred cache writes
    /// after it commits.
    fn run<T, F>(&self, actor: &ActorContext, work: F) -> StorageResult<T>
    where
        F: FnOnce(&DataContext<'_>) -> StorageResult<T>,
    {
        let (value, pending) = self.backend.transaction(actor, &self.failpoints, work)?;
        if let Some(cache) = &self.adhoc_cache {
            for (key, value) in pending {
                cache.put(&key, value);
            }
        }
        Ok(value)
    }

    fn persister<'a, 'conn>(&'a self, ctx: &'a DataContext<'conn>) -> Persister<'a, 'conn> {
        Persister::new(
            ctx,
            &self.registry,
            self.validator.as_ref(),
            self.config.versioning_policy,
            self.adhoc_cache.as_deref(),
        )
    }

    fn invalidate(&self, key: Uuid) {
        if let Some(cache) = &self.data_cache {
            cache.remove(key);
        }
    }

    fn archive_store(&self) -> StorageResult<&Arc<dyn ArchiveStore>> {
        self.archive.as_ref().ok_or_else(|| {
            ConfigurationError::InvalidValue {
                field: "archive".to_string(),
                message: "no archive store configured".to_string(),
            }
            .into()
        })
    }

    fn check_page(&self, requested: usize) -> StorageResult<()> {
        if requested > self.config.max_page_size {
            return Err(QueryError::PageSizeExceeded {
                requested,
                max: self.config.max_page_size,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStorage for EntityStore {
    async fn insert(&self, actor: &ActorContext, entity: Entity) -> StorageResult<Entity> {
        let saved = self.run(actor, |ctx| self.persister(ctx).insert(entity))?;
        if let Some(key) = saved.key {
            self.invalidate(key);
        }
        Ok(saved)
    }

    async fn update(&self, actor: &ActorContext, entity: Entity) -> StorageResult<Entity> {
        let saved = self.run(actor, |ctx| self.persister(ctx).update(entity, None))?;
        if let Some(key) = saved.key {
            self.invalidate(key);
        }
        Ok(saved)
    }

    async fn update_if_match(
        &self,
        actor: &ActorContext,
        entity: Entity,
        expected_version_key: Uuid,
    ) -> StorageResult<Entity> {
        let saved = self.run(actor, |ctx| {
            self.persister(ctx).update(entity, Some(expected_version_key))
        })?;
        if let Some(key) = saved.key {
            self.invalidate(key);
        }
        Ok(saved)
    }

    async fn get(
        &self,
        target: EntityKindTag,
        key: Uuid,
        version_key: Option<Uuid>,
        load_mode: Option<LoadMode>,
    ) -> StorageResult<Option<Entity>> {
        let mode = load_mode.unwrap_or(self.config.default_load_mode);
        let cache = self.data_cache.as_ref().filter(|_| version_key.is_none());

        if let Some(hit) = cache.and_then(|c| c.get(key)) {
            if hit.load_mode == mode && hit.entity.tag().is_a(target) {
                tracing::debug!(%key, mode = %mode, "Data cache hit");
                return Ok(Some(hit.entity));
            }
        }

        let entity = self.run(&ActorContext::system(), |ctx| {
            Materializer::new(ctx, &self.registry).load(target, key, version_key, mode)
        })?;
        if let (Some(cache), Some(entity)) = (cache, &entity) {
            cache.put(entity, mode);
        }
        Ok(entity)
    }

    async fn query(&self, query: &EntityQuery) -> StorageResult<QueryPage> {
        let mode = query.load_mode.unwrap_or(self.config.default_load_mode);
        let limit = query.count.unwrap_or(self.config.max_page_size);
        self.check_page(limit)?;
        let codes = self.registry.codes_for(query.target);
        let sessions = self.sessions.as_deref();
        if query.stateful && query.session_id.is_none() && sessions.is_none() {
            tracing::warn!("Stateful query without a session store, running stateless");
        }

        let (items, total, session_id) = self.run(&ActorContext::system(), |ctx| {
            let (keys, total, session_id) = match (query.session_id, sessions) {
                (Some(session_id), store) => {
                    let all = store
                        .and_then(|s| s.get(session_id))
                        .ok_or(QueryError::UnknownSession { session_id })?;
                    let page = all.iter().skip(query.offset).take(limit).copied().collect();
                    (page, all.len(), Some(session_id))
                }
                (None, Some(store)) if query.stateful => {
                    let all = bulk::select_all(ctx, self.translator.as_ref(), &query.predicate, &codes)?;
                    let total = all.len();
                    let page = all.iter().skip(query.offset).take(limit).copied().collect();
                    (page, total, Some(store.create(all)))
                }
                _ => {
                    let page = bulk::select_page(
                        ctx,
                        self.translator.as_ref(),
                        &query.predicate,
                        &codes,
                        query.offset,
                        limit,
                    )?;
                    (page.keys, page.total, None)
                }
            };

            let materializer = Materializer::new(ctx, &self.registry);
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entity) = materializer.load(query.target, key, None, mode)? {
                    items.push(entity);
                }
            }
            Ok((items, total, session_id))
        })?;

        tracing::debug!(
            target_kinds = %describe_target(query.target),
            returned = items.len(),
            total,
            "Query complete"
        );
        Ok(QueryPage {
            items,
            total,
            offset: query.offset,
            session_id,
        })
    }

    async fn obsolete(&self, actor: &ActorContext, key: Uuid) -> StorageResult<Entity> {
        let entity = self.run(actor, |ctx| {
            self.persister(ctx).obsolete(key, StatusKeys::OBSOLETE)
        })?;
        self.invalidate(key);
        Ok(entity)
    }

    async fn delete(
        &self,
        actor: &ActorContext,
        key: Uuid,
        mode: DeleteMode,
    ) -> StorageResult<Option<Entity>> {
        let result = match mode {
            DeleteMode::LogicalDelete => self
                .run(actor, |ctx| {
                    self.persister(ctx).obsolete(key, StatusKeys::OBSOLETE)
                })
                .map(Some),
            DeleteMode::Nullify => self
                .run(actor, |ctx| {
                    self.persister(ctx).obsolete(key, StatusKeys::NULLIFIED)
                })
                .map(Some),
            DeleteMode::PermanentDelete => {
                let existed = self.run(actor, |ctx| self.persister(ctx).purge(key))?;
                if !existed {
                    return Err(ResourceError::NotFound {
                        resource_type: EntityKindTag::Entity.to_string(),
                        key,
                    }
                    .into());
                }
                Ok(None)
            }
        }?;
        self.invalidate(key);
        Ok(result)
    }

    async fn history(
        &self,
        key: Uuid,
        load_mode: Option<LoadMode>,
    ) -> StorageResult<Vec<Entity>> {
        let mode = load_mode.unwrap_or(self.config.default_load_mode);
        self.run(&ActorContext::system(), |ctx| {
            let root = ctx.get::<EntityRow>(key)?.ok_or_else(|| {
                StorageError::from(ResourceError::NotFound {
                    resource_type: EntityKindTag::Entity.to_string(),
                    key,
                })
            })?;
            let materializer = Materializer::new(ctx, &self.registry);
            let mut versions = Vec::new();
            for row in materializer.chain(key)? {
                if let Some(entity) =
                    materializer.load_version(EntityKindTag::Entity, &root, row, mode)?
                {
                    versions.push(entity);
                }
            }
            Ok(versions)
        })
    }
}

#[async_trait]
impl BulkStorage for EntityStore {
    async fn query_keys(
        &self,
        target: EntityKindTag,
        predicate: &Predicate,
        offset: usize,
        limit: usize,
    ) -> StorageResult<KeyPage> {
        let codes = self.registry.codes_for(target);
        self.run(&ActorContext::system(), |ctx| {
            bulk::select_page(ctx, self.translator.as_ref(), predicate, &codes, offset, limit)
        })
    }

    async fn obsolete_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize> {
        let count = self.run(actor, |ctx| {
            let persister = self.persister(ctx);
            for key in keys {
                persister.append_status(*key, StatusKeys::OBSOLETE)?;
            }
            Ok(keys.len())
        })?;
        keys.iter().for_each(|k| self.invalidate(*k));
        tracing::info!(count, "Bulk obsolete complete");
        Ok(count)
    }

    async fn purge_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize> {
        let count = self.run(actor, |ctx| {
            let persister = self.persister(ctx);
            let mut purged = 0;
            for key in keys {
                if persister.purge(*key)? {
                    purged += 1;
                }
            }
            Ok(purged)
        })?;
        keys.iter().for_each(|k| self.invalidate(*k));
        tracing::info!(count, requested = keys.len(), "Bulk purge complete");
        Ok(count)
    }

    async fn archive_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize> {
        let archive = self.archive_store()?;
        // (key, copy it replaced) for every chain written to the archive
        let mut written: Vec<(Uuid, Option<ArchivedEntity>)> = Vec::new();
        let result = self.run(actor, |ctx| {
            let persister = self.persister(ctx);
            for key in keys {
                let Some(snapshot) = bulk::snapshot(ctx, &self.registry, *key)? else {
                    continue;
                };
                let replaced = archive.retrieve(*key)?;
                archive.store(&snapshot)?;
                written.push((*key, replaced));
                persister.purge(*key)?;
            }
            Ok(written.len())
        });
        let count = match result {
            Ok(count) => count,
            Err(e) => {
                undo_archive(archive.as_ref(), written);
                return Err(e);
            }
        };
        keys.iter().for_each(|k| self.invalidate(*k));
        tracing::info!(count, requested = keys.len(), "Bulk archive complete");
        Ok(count)
    }

    async fn retrieve_archived(&self, key: Uuid) -> StorageResult<Option<Entity>> {
        let archived = self.archive_store()?.retrieve(key)?;
        Ok(archived
            .and_then(|a| a.last_version().cloned())
            .map(|mut entity| {
                entity.status_concept = Some(Ref::Key(StatusKeys::PURGED));
                entity
            }))
    }
}

/// Puts the archive back the way it was after the live purge rolled back.
fn undo_archive(archive: &dyn ArchiveStore, written: Vec<(Uuid, Option<ArchivedEntity>)>) {
    for (key, replaced) in written.into_iter().rev() {
        let restored = match replaced {
            Some(previous) => archive.store(&previous),
            None => archive.remove(key).map(|_| ()),
        };
        match restored {
            Ok(()) => tracing::debug!(%key, "Archived chain withdrawn"),
            Err(e) => tracing::error!(%key, error = %e, "Failed to withdraw archived chain"),
        }
    }
}

fn user_not_found(key: Uuid) -> StorageError {
    ResourceError::NotFound {
        resource_type: SecurityUser::TARGET.to_string(),
        key,
    }
    .into()
}

#[async_trait]
impl SecurityUserStorage for EntityStore {
    async fn insert_user(
        &self,
        actor: &ActorContext,
        user: SecurityUser,
    ) -> StorageResult<SecurityUser> {
        self.run(actor, |ctx| {
            let name = user.user_name.trim();
            let mut existing = ctx
                .first_or_default::<SecurityUserRow>(SqlFragment::column_eq("user_name", name))?
                .map(|row| row.key);
            if let Some(key) = user.key {
                if existing.is_none() && ctx.exists::<SecurityUserRow>(key)? {
                    existing = Some(key);
                }
            }
            if let Some(key) = existing {
                return Err(ResourceError::AlreadyExists {
                    resource_type: SecurityUser::TARGET.to_string(),
                    key,
                }
                .into());
            }
            let key = user.key.unwrap_or_else(Uuid::new_v4);
            let row = user.to_row(key, ctx.now());
            ctx.insert(&row)?;
            tracing::info!(%key, user_name = %row.user_name, "Inserted security user");
            Ok(SecurityUser::from_row(row))
        })
    }

    async fn get_user(&self, key: Uuid) -> StorageResult<Option<SecurityUser>> {
        self.run(&ActorContext::system(), |ctx| {
            Ok(ctx.get::<SecurityUserRow>(key)?.map(SecurityUser::from_row))
        })
    }

    async fn find_user_by_name(&self, user_name: &str) -> StorageResult<Option<SecurityUser>> {
        self.run(&ActorContext::system(), |ctx| {
            Ok(ctx
                .first_or_default::<SecurityUserRow>(SqlFragment::column_eq(
                    "user_name",
                    user_name.trim(),
                ))?
                .map(SecurityUser::from_row))
        })
    }

    async fn obsolete_user(
        &self,
        actor: &ActorContext,
        key: Uuid,
    ) -> StorageResult<SecurityUser> {
        self.run(actor, |ctx| {
            let mut row = ctx
                .get::<SecurityUserRow>(key)?
                .ok_or_else(|| user_not_found(key))?;
            row.obsoleted_at = Some(ctx.now());
            ctx.update(&row)?;
            tracing::info!(%key, "Obsoleted security user");
            Ok(SecurityUser::from_row(row))
        })
    }
}
