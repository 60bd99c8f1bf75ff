use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{ActorId, ChangeId, EntityId, EntityKind};
use crate::snapshot::Snapshot;

/// The three capturable mutations. Tagged variant, not free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(CoreError::UnknownOperation(s.to_string())),
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged mutation: the atomic unit of the ledger.
///
/// Rows are immutable once written except for the single `rolled_back`
/// transition false -> true. `id` order is the system-wide mutation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub actor_id: ActorId,
    pub op: ChangeOp,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
    pub rolled_back: bool,
    /// Milliseconds since the Unix epoch, assigned at insertion.
    pub created_at: i64,
}

/// A change record as handed to the log for appending. The log assigns
/// `id` and `created_at`; `rolled_back` starts false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChange {
    pub actor_id: ActorId,
    pub op: ChangeOp,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,
}

impl NewChange {
    pub fn create(actor_id: ActorId, kind: EntityKind, entity_id: EntityId, after: Snapshot) -> Self {
        Self {
            actor_id,
            op: ChangeOp::Create,
            entity_kind: kind,
            entity_id,
            before: None,
            after: Some(after),
        }
    }

    pub fn update(
        actor_id: ActorId,
        kind: EntityKind,
        entity_id: EntityId,
        before: Snapshot,
        after: Snapshot,
    ) -> Self {
        Self {
            actor_id,
            op: ChangeOp::Update,
            entity_kind: kind,
            entity_id,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(actor_id: ActorId, kind: EntityKind, entity_id: EntityId, before: Snapshot) -> Self {
        Self {
            actor_id,
            op: ChangeOp::Delete,
            entity_kind: kind,
            entity_id,
            before: Some(before),
            after: None,
        }
    }

    /// Shape invariant: CREATE carries `after` only, DELETE carries `before`
    /// only, UPDATE carries both and they must differ in at least one field.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.op {
            ChangeOp::Create => {
                if self.before.is_some() {
                    return Err(CoreError::InvalidRecord("create must not carry a before snapshot".into()));
                }
                if self.after.is_none() {
                    return Err(CoreError::InvalidRecord("create requires an after snapshot".into()));
                }
            }
            ChangeOp::Delete => {
                if self.after.is_some() {
                    return Err(CoreError::InvalidRecord("delete must not carry an after snapshot".into()));
                }
                if self.before.is_none() {
                    return Err(CoreError::InvalidRecord("delete requires a before snapshot".into()));
                }
            }
            ChangeOp::Update => {
                let (before, after) = match (&self.before, &self.after) {
                    (Some(b), Some(a)) => (b, a),
                    _ => {
                        return Err(CoreError::InvalidRecord(
                            "update requires both before and after snapshots".into(),
                        ));
                    }
                };
                if before.changed_keys(after).is_empty() {
                    return Err(CoreError::InvalidRecord("update snapshots are identical".into()));
                }
            }
        }
        Ok(())
    }
}

impl ChangeRecord {
    /// Field names this record actually changed. For UPDATE that is the
    /// before/after diff; CREATE and DELETE touch every captured field.
    pub fn touched_keys(&self) -> Vec<String> {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => before.changed_keys(after),
            (Some(only), None) | (None, Some(only)) => {
                only.fields().map(|(k, _)| k.to_string()).collect()
            }
            (None, None) => Vec::new(),
        }
    }
}
