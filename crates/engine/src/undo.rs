use trackback_core::{ChangeOp, ChangeRecord, CoreError, Snapshot};

use crate::error::EngineError;
use crate::mutation::Mutation;

/// The planned structural inverse of a change record, computed against the
/// entity's current state. Pure data; `Engine::undo` executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inverse {
    pub mutation: Mutation,
    /// True when the current state no longer equals the record's `after`
    /// snapshot, i.e. a later mutation intervened and the best-effort
    /// policy applied.
    pub merged: bool,
    /// Fields that differ from `after` but were not captured by this record;
    /// the merge leaves them at their current values.
    pub preserved: Vec<String>,
}

fn require<'a>(snapshot: &'a Option<Snapshot>, what: &str) -> Result<&'a Snapshot, EngineError> {
    snapshot.as_ref().ok_or_else(|| {
        EngineError::Core(CoreError::InvalidRecord(format!(
            "stored record is missing its {what} snapshot"
        )))
    })
}

/// Compute the inverse of a change record given the entity's current state.
///
/// The mismatch policy: when the current state has drifted from `after`,
/// the inverse is applied as a diff. Only the fields this record actually
/// changed are restored to their `before` values; fields written by later
/// mutations keep their current values rather than being blindly
/// overwritten.
pub fn plan_inverse(
    record: &ChangeRecord,
    current: Option<&Snapshot>,
) -> Result<Inverse, EngineError> {
    match record.op {
        ChangeOp::Create => {
            let after = require(&record.after, "after")?;
            let current = current.ok_or_else(|| {
                EngineError::EntityGone(format!("{}/{}", record.entity_kind, record.entity_id))
            })?;
            Ok(Inverse {
                mutation: Mutation::Remove,
                merged: current != after,
                preserved: Vec::new(),
            })
        }

        ChangeOp::Delete => {
            let before = require(&record.before, "before")?;
            // The entity id is occupied again: either the record was somehow
            // restored out-of-band or the id was reused. Re-inserting would
            // clobber it, so refuse.
            if current.is_some() {
                return Err(EngineError::Conflict(format!(
                    "{}/{} exists again",
                    record.entity_kind, record.entity_id
                )));
            }
            Ok(Inverse {
                mutation: Mutation::Insert {
                    fields: before.clone(),
                },
                merged: false,
                preserved: Vec::new(),
            })
        }

        ChangeOp::Update => {
            let before = require(&record.before, "before")?;
            let after = require(&record.after, "after")?;
            let current = current.ok_or_else(|| {
                EngineError::EntityGone(format!("{}/{}", record.entity_kind, record.entity_id))
            })?;

            let touched = before.changed_keys(after);
            let mut set = Snapshot::new();
            let mut clear = Vec::new();
            for key in &touched {
                match before.get(key) {
                    Some(value) => set.set(key.clone(), value.clone()),
                    // Field was introduced by this update; the inverse drops it.
                    None => clear.push(key.clone()),
                }
            }

            let merged = current != after;
            let preserved = if merged {
                current
                    .changed_keys(after)
                    .into_iter()
                    .filter(|k| !touched.contains(k))
                    .collect()
            } else {
                Vec::new()
            };

            Ok(Inverse {
                mutation: Mutation::Write { set, clear },
                merged,
                preserved,
            })
        }
    }
}
