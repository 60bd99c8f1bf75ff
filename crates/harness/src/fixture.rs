use trackback_core::{
    change::{ChangeRecord, NewChange},
    field_value::FieldValue,
    ids::{ActorId, ChangeId, EntityId, EntityKind},
    snapshot::Snapshot,
};
use trackback_engine::{Engine, EngineError};
use trackback_storage::{ChangeLog, MarkOutcome, RecordStore, SqliteStore, StorageError};

/// Build a snapshot from a field list.
pub fn snap(fields: Vec<(&str, FieldValue)>) -> Snapshot {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// An engine over in-memory sqlite plus a default acting user.
pub struct TestTracker {
    pub actor: ActorId,
    pub engine: Engine<SqliteStore>,
}

impl TestTracker {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            actor: ActorId::new(),
            engine: Engine::new(SqliteStore::open_in_memory()?),
        })
    }

    pub fn create_issue(
        &mut self,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<ChangeRecord, EngineError> {
        self.engine
            .create(self.actor, EntityKind::Issue, snap(fields))
    }

    pub fn update_issue(
        &mut self,
        entity_id: EntityId,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<Option<ChangeRecord>, EngineError> {
        self.engine
            .update(self.actor, EntityKind::Issue, entity_id, snap(fields))
    }

    pub fn delete_issue(&mut self, entity_id: EntityId) -> Result<ChangeRecord, EngineError> {
        self.engine.delete(self.actor, EntityKind::Issue, entity_id)
    }

    pub fn issue_field(&self, entity_id: EntityId, key: &str) -> Option<FieldValue> {
        self.engine
            .read(EntityKind::Issue, entity_id)
            .ok()
            .flatten()
            .and_then(|s| s.get(key).cloned())
    }
}

/// Store wrapper whose change log can be switched to fail appends,
/// exercising the mutation-committed-but-unlogged path.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_appends: bool,
}

impl FlakyStore {
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            inner: SqliteStore::open_in_memory()?,
            fail_appends: false,
        })
    }
}

impl RecordStore for FlakyStore {
    fn read(&self, kind: EntityKind, entity_id: EntityId) -> Result<Option<Snapshot>, StorageError> {
        self.inner.read(kind, entity_id)
    }

    fn insert(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError> {
        self.inner.insert(kind, entity_id, fields)
    }

    fn put_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError> {
        self.inner.put_fields(kind, entity_id, fields)
    }

    fn clear_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        keys: &[String],
    ) -> Result<(), StorageError> {
        self.inner.clear_fields(kind, entity_id, keys)
    }

    fn remove(&mut self, kind: EntityKind, entity_id: EntityId) -> Result<bool, StorageError> {
        self.inner.remove(kind, entity_id)
    }
}

impl ChangeLog for FlakyStore {
    fn append(&mut self, change: &NewChange) -> Result<ChangeId, StorageError> {
        if self.fail_appends {
            return Err(StorageError::Serialization(
                "injected append failure".to_string(),
            ));
        }
        self.inner.append(change)
    }

    fn get(&self, id: ChangeId) -> Result<Option<ChangeRecord>, StorageError> {
        self.inner.get(id)
    }

    fn latest_by_actor(
        &self,
        actor_id: ActorId,
        kind: Option<EntityKind>,
    ) -> Result<Option<ChangeRecord>, StorageError> {
        self.inner.latest_by_actor(actor_id, kind)
    }

    fn list_recent(
        &self,
        limit: usize,
        actor_id: Option<ActorId>,
    ) -> Result<Vec<ChangeRecord>, StorageError> {
        self.inner.list_recent(limit, actor_id)
    }

    fn mark_rolled_back(&mut self, id: ChangeId) -> Result<MarkOutcome, StorageError> {
        self.inner.mark_rolled_back(id)
    }

    fn change_count(&self) -> Result<u64, StorageError> {
        self.inner.change_count()
    }
}
