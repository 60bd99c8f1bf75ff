use trackback_core::{EntityId, EntityKind, Snapshot};
use trackback_storage::{RecordStore, StorageError};

use crate::error::EngineError;

/// A write against the record store, expressed structurally so the undo
/// planner can emit the same shape the forward path uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert a new record with the given initial fields.
    Insert { fields: Snapshot },
    /// Upsert `set` and drop `clear` on an existing record; fields named in
    /// neither are untouched.
    Write { set: Snapshot, clear: Vec<String> },
    /// Remove the record entirely.
    Remove,
}

/// Read the target's state strictly before a mutation commits. A missing
/// record here means the target vanished between request validation and
/// capture (race with a concurrent delete) and is surfaced as a conflict,
/// not silently ignored: an UPDATE/DELETE without a `before` snapshot
/// cannot be undone.
pub fn capture<S: RecordStore>(
    store: &S,
    kind: EntityKind,
    entity_id: EntityId,
) -> Result<Snapshot, EngineError> {
    match store.read(kind, entity_id)? {
        Some(snapshot) => Ok(snapshot),
        None => Err(EngineError::Conflict(format!("{kind}/{entity_id}"))),
    }
}

/// Perform the write and return the resulting state (`after` for
/// insert/write, None for remove). A failed write never reaches the change
/// log: the caller appends only on success.
pub fn apply<S: RecordStore>(
    store: &mut S,
    kind: EntityKind,
    entity_id: EntityId,
    mutation: &Mutation,
) -> Result<Option<Snapshot>, EngineError> {
    match mutation {
        Mutation::Insert { fields } => {
            store.insert(kind, entity_id, fields).map_err(|e| match e {
                StorageError::DuplicateEntity { .. } => {
                    EngineError::Conflict(format!("{kind}/{entity_id}"))
                }
                other => EngineError::Storage(other),
            })?;
            Ok(Some(fields.clone()))
        }
        Mutation::Write { set, clear } => {
            if !set.is_empty() {
                store.put_fields(kind, entity_id, set)?;
            }
            if !clear.is_empty() {
                store.clear_fields(kind, entity_id, clear)?;
            }
            Ok(store.read(kind, entity_id)?)
        }
        Mutation::Remove => {
            store.remove(kind, entity_id)?;
            Ok(None)
        }
    }
}
