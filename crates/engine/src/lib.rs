pub mod describe;
pub mod error;
pub mod mutation;
pub mod undo;

pub use describe::describe;
pub use error::EngineError;
pub use mutation::Mutation;
pub use undo::{Inverse, plan_inverse};

use tracing::{debug, warn};

use trackback_core::{
    change::{ChangeOp, ChangeRecord, NewChange},
    ids::{ActorId, ChangeId, EntityId, EntityKind},
    snapshot::Snapshot,
};
use trackback_storage::{ChangeLog, MarkOutcome, RecordStore, SqliteStore};

/// Outcome of a successful undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undone {
    pub change_id: ChangeId,
    /// The operation that was inverted.
    pub op: ChangeOp,
    /// True when the entity had drifted from the record's `after` snapshot
    /// and the field-level merge policy applied.
    pub merged: bool,
    /// Fields left at their current values by the merge.
    pub preserved: Vec<String>,
}

/// Coordinates the capture -> mutate -> log sequence and the undo path.
///
/// The mutation and the log append are two separate storage calls, in that
/// order: a failed mutation never reaches the log, and a failed append
/// after a committed mutation surfaces as [`EngineError::AuditTrailIncomplete`]
/// without unwinding the write.
pub struct Engine<S = SqliteStore> {
    store: S,
}

impl<S: RecordStore + ChangeLog> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Create a new entity, minting its id.
    pub fn create(
        &mut self,
        actor: ActorId,
        kind: EntityKind,
        fields: Snapshot,
    ) -> Result<ChangeRecord, EngineError> {
        self.create_with_id(actor, kind, EntityId::new(), fields)
    }

    /// Create a new entity under a caller-supplied id. The snapshot
    /// capturer is not invoked: no prior state exists for a CREATE.
    pub fn create_with_id(
        &mut self,
        actor: ActorId,
        kind: EntityKind,
        entity_id: EntityId,
        fields: Snapshot,
    ) -> Result<ChangeRecord, EngineError> {
        mutation::apply(
            &mut self.store,
            kind,
            entity_id,
            &Mutation::Insert {
                fields: fields.clone(),
            },
        )?;
        self.log(NewChange::create(actor, kind, entity_id, fields))
    }

    /// Apply a field patch to an existing entity.
    ///
    /// The full pre-mutation state is captured as `before` and the patched
    /// state as `after`. A patch that changes nothing is a no-op: nothing
    /// is written and nothing is logged, and `None` is returned.
    pub fn update(
        &mut self,
        actor: ActorId,
        kind: EntityKind,
        entity_id: EntityId,
        patch: Snapshot,
    ) -> Result<Option<ChangeRecord>, EngineError> {
        let before = mutation::capture(&self.store, kind, entity_id)?;
        let after = before.overlaid(&patch);
        if after == before {
            debug!(kind = %kind, entity = %entity_id, "no-op update skipped");
            return Ok(None);
        }

        // Write only the fields the patch actually changed.
        let mut set = Snapshot::new();
        for key in before.changed_keys(&after) {
            if let Some(value) = after.get(&key) {
                set.set(key, value.clone());
            }
        }
        mutation::apply(
            &mut self.store,
            kind,
            entity_id,
            &Mutation::Write {
                set,
                clear: Vec::new(),
            },
        )?;

        self.log(NewChange::update(actor, kind, entity_id, before, after))
            .map(Some)
    }

    /// Delete an entity, capturing its full state as `before`.
    pub fn delete(
        &mut self,
        actor: ActorId,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> Result<ChangeRecord, EngineError> {
        let before = mutation::capture(&self.store, kind, entity_id)?;
        mutation::apply(&mut self.store, kind, entity_id, &Mutation::Remove)?;
        self.log(NewChange::delete(actor, kind, entity_id, before))
    }

    /// Undo one change record by applying its structural inverse.
    ///
    /// One-shot per record: the rolled_back compare-and-set runs after the
    /// inverse mutation succeeds, so a failed inverse leaves the record
    /// unmarked and `undo` can safely be retried. The undo itself is not
    /// logged as a new change record.
    pub fn undo(&mut self, change_id: ChangeId, actor: ActorId) -> Result<Undone, EngineError> {
        let record = self
            .store
            .get(change_id)?
            .ok_or(EngineError::ChangeNotFound(change_id))?;
        if record.rolled_back {
            return Err(EngineError::AlreadyRolledBack(change_id));
        }

        let current = self.store.read(record.entity_kind, record.entity_id)?;
        let inverse = plan_inverse(&record, current.as_ref())?;
        if inverse.merged {
            warn!(
                change = %change_id,
                actor = %actor,
                preserved = ?inverse.preserved,
                "undo target drifted from its recorded state, applying field-level merge"
            );
        }

        mutation::apply(
            &mut self.store,
            record.entity_kind,
            record.entity_id,
            &inverse.mutation,
        )?;

        match self.store.mark_rolled_back(change_id)? {
            MarkOutcome::Marked => Ok(Undone {
                change_id,
                op: record.op,
                merged: inverse.merged,
                preserved: inverse.preserved,
            }),
            // A concurrent undo won the compare-and-set.
            MarkOutcome::AlreadyRolledBack => Err(EngineError::AlreadyRolledBack(change_id)),
            MarkOutcome::NotFound => Err(EngineError::ChangeNotFound(change_id)),
        }
    }

    /// Undo the actor's most recent not-yet-rolled-back change, optionally
    /// narrowed to one entity kind. Returns `None` when there is nothing
    /// to undo.
    pub fn undo_last(
        &mut self,
        actor: ActorId,
        kind: Option<EntityKind>,
    ) -> Result<Option<Undone>, EngineError> {
        match self.store.latest_by_actor(actor, kind)? {
            Some(record) => self.undo(record.id, actor).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_change(&self, change_id: ChangeId) -> Result<Option<ChangeRecord>, EngineError> {
        Ok(self.store.get(change_id)?)
    }

    pub fn list_recent(
        &self,
        limit: usize,
        actor: Option<ActorId>,
    ) -> Result<Vec<ChangeRecord>, EngineError> {
        Ok(self.store.list_recent(limit, actor)?)
    }

    /// Current state of an entity, if it exists.
    pub fn read(
        &self,
        kind: EntityKind,
        entity_id: EntityId,
    ) -> Result<Option<Snapshot>, EngineError> {
        Ok(self.store.read(kind, entity_id)?)
    }

    /// Human-readable rendering of one logged change.
    pub fn describe_change(&self, change_id: ChangeId) -> Result<String, EngineError> {
        let record = self
            .store
            .get(change_id)?
            .ok_or(EngineError::ChangeNotFound(change_id))?;
        Ok(describe(&record))
    }

    /// Append the record describing an already-committed mutation. An
    /// append failure is the one place the two stores can diverge; it is
    /// reported as a distinct warning-level failure and never retried,
    /// since a retry could not know whether the original append landed.
    fn log(&mut self, change: NewChange) -> Result<ChangeRecord, EngineError> {
        match self.store.append(&change) {
            Ok(id) => self
                .store
                .get(id)?
                .ok_or(EngineError::ChangeNotFound(id)),
            Err(e) => {
                warn!(
                    op = %change.op,
                    kind = %change.entity_kind,
                    entity = %change.entity_id,
                    error = %e,
                    "mutation succeeded, audit trail incomplete"
                );
                Err(EngineError::AuditTrailIncomplete(e))
            }
        }
    }
}
