use trackback_core::{
    change::{ChangeRecord, NewChange},
    ids::{ActorId, ChangeId, EntityId, EntityKind},
    snapshot::Snapshot,
};

use crate::error::StorageError;

/// Result of the rolled-back compare-and-set. Two undos racing on the same
/// record see exactly one `Marked`; the loser sees `AlreadyRolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyRolledBack,
    NotFound,
}

/// The entity repository the engine wraps. Holds current record state only;
/// history lives in the change log.
pub trait RecordStore {
    /// Current full state of a record, or None if it does not exist.
    fn read(&self, kind: EntityKind, entity_id: EntityId) -> Result<Option<Snapshot>, StorageError>;

    /// Insert a new record with the given initial fields.
    /// Fails with `DuplicateEntity` if the key is already live.
    fn insert(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError>;

    /// Upsert the given fields on an existing record, leaving others as-is.
    fn put_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError>;

    /// Drop the named fields from an existing record.
    fn clear_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        keys: &[String],
    ) -> Result<(), StorageError>;

    /// Remove a record and its fields. Returns false if it was not present.
    fn remove(&mut self, kind: EntityKind, entity_id: EntityId) -> Result<bool, StorageError>;
}

/// The durable append-only ledger of change records.
pub trait ChangeLog {
    /// Append a validated record; the store assigns the id and created_at.
    fn append(&mut self, change: &NewChange) -> Result<ChangeId, StorageError>;

    fn get(&self, id: ChangeId) -> Result<Option<ChangeRecord>, StorageError>;

    /// Most recent not-yet-rolled-back entry for the actor, optionally
    /// narrowed to one entity kind.
    fn latest_by_actor(
        &self,
        actor_id: ActorId,
        kind: Option<EntityKind>,
    ) -> Result<Option<ChangeRecord>, StorageError>;

    /// Newest-first page of the ledger, optionally narrowed to one actor.
    fn list_recent(
        &self,
        limit: usize,
        actor_id: Option<ActorId>,
    ) -> Result<Vec<ChangeRecord>, StorageError>;

    /// Atomic rolled_back 0 -> 1 transition.
    fn mark_rolled_back(&mut self, id: ChangeId) -> Result<MarkOutcome, StorageError>;

    fn change_count(&self) -> Result<u64, StorageError>;
}
