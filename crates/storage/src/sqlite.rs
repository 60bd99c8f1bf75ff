use rusqlite::{Connection, OptionalExtension};

use trackback_core::{
    change::{ChangeOp, ChangeRecord, NewChange},
    ids::{ActorId, ChangeId, EntityId, EntityKind},
    snapshot::Snapshot,
};

use crate::error::StorageError;
use crate::traits::{ChangeLog, MarkOutcome, RecordStore};

/// Blob column to fixed-size array, length-checked.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn read_change(row: &rusqlite::Row) -> Result<ChangeRecord, StorageError> {
    let id: i64 = row.get(0)?;
    let actor_id_bytes: Vec<u8> = row.get(1)?;
    let op_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let entity_id_bytes: Vec<u8> = row.get(4)?;
    let before_bytes: Option<Vec<u8>> = row.get(5)?;
    let after_bytes: Option<Vec<u8>> = row.get(6)?;
    let rolled_back: bool = row.get(7)?;
    let created_at: i64 = row.get(8)?;

    let actor_id = ActorId::from_bytes(to_array::<16>(actor_id_bytes, "actor_id")?);
    let entity_id = EntityId::from_bytes(to_array::<16>(entity_id_bytes, "entity_id")?);
    let op = ChangeOp::parse(&op_str)?;
    let entity_kind = EntityKind::parse(&kind_str)?;
    let before = before_bytes
        .map(|b| Snapshot::from_msgpack(&b))
        .transpose()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let after = after_bytes
        .map(|b| Snapshot::from_msgpack(&b))
        .transpose()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(ChangeRecord {
        id: ChangeId::from_i64(id),
        actor_id,
        op,
        entity_kind,
        entity_id,
        before,
        after,
        rolled_back,
        created_at,
    })
}

const CHANGE_COLUMNS: &str =
    "id, actor_id, op, entity_kind, entity_id, before, after, rolled_back, created_at";

impl RecordStore for SqliteStore {
    fn read(&self, kind: EntityKind, entity_id: EntityId) -> Result<Option<Snapshot>, StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE entity_kind = ?1 AND entity_id = ?2)",
            rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT field_key, value FROM record_fields WHERE entity_kind = ?1 AND entity_id = ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice()],
            |row| {
                let key: String = row.get(0)?;
                let val_bytes: Vec<u8> = row.get(1)?;
                Ok((key, val_bytes))
            },
        )?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let (key, val_bytes) = row?;
            let value = trackback_core::FieldValue::from_msgpack(&val_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            snapshot.set(key, value);
        }
        Ok(Some(snapshot))
    }

    fn insert(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        let result = tx.execute(
            "INSERT INTO records (entity_kind, entity_id) VALUES (?1, ?2)",
            rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice()],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StorageError::DuplicateEntity {
                    entity_id: entity_id.to_string(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        for (key, value) in fields.fields() {
            let value_bytes = value
                .to_msgpack()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO record_fields (entity_kind, entity_id, field_key, value) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    kind.as_str(),
                    entity_id.as_bytes().as_slice(),
                    key,
                    value_bytes,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn put_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        fields: &Snapshot,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;

        for (key, value) in fields.fields() {
            let value_bytes = value
                .to_msgpack()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO record_fields (entity_kind, entity_id, field_key, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_kind, entity_id, field_key) DO UPDATE SET value = excluded.value",
                rusqlite::params![
                    kind.as_str(),
                    entity_id.as_bytes().as_slice(),
                    key,
                    value_bytes,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn clear_fields(
        &mut self,
        kind: EntityKind,
        entity_id: EntityId,
        keys: &[String],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for key in keys {
            tx.execute(
                "DELETE FROM record_fields WHERE entity_kind = ?1 AND entity_id = ?2 AND field_key = ?3",
                rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice(), key],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, kind: EntityKind, entity_id: EntityId) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM record_fields WHERE entity_kind = ?1 AND entity_id = ?2",
            rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice()],
        )?;
        let removed = tx.execute(
            "DELETE FROM records WHERE entity_kind = ?1 AND entity_id = ?2",
            rusqlite::params![kind.as_str(), entity_id.as_bytes().as_slice()],
        )?;

        tx.commit()?;
        Ok(removed > 0)
    }
}

impl ChangeLog for SqliteStore {
    fn append(&mut self, change: &NewChange) -> Result<ChangeId, StorageError> {
        change.validate()?;

        let before_bytes = change
            .before
            .as_ref()
            .map(|s| s.to_msgpack())
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let after_bytes = change
            .after
            .as_ref()
            .map(|s| s.to_msgpack())
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO change_log (actor_id, op, entity_kind, entity_id, before, after) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                change.actor_id.as_bytes().as_slice(),
                change.op.as_str(),
                change.entity_kind.as_str(),
                change.entity_id.as_bytes().as_slice(),
                before_bytes,
                after_bytes,
            ],
        )?;

        Ok(ChangeId::from_i64(self.conn.last_insert_rowid()))
    }

    fn get(&self, id: ChangeId) -> Result<Option<ChangeRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CHANGE_COLUMNS} FROM change_log WHERE id = ?1"))?;
        let mut rows = stmt.query(rusqlite::params![id.as_i64()])?;

        match rows.next()? {
            Some(row) => Ok(Some(read_change(row)?)),
            None => Ok(None),
        }
    }

    fn latest_by_actor(
        &self,
        actor_id: ActorId,
        kind: Option<EntityKind>,
    ) -> Result<Option<ChangeRecord>, StorageError> {
        let (sql, params): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match kind {
            Some(kind) => (
                format!(
                    "SELECT {CHANGE_COLUMNS} FROM change_log
                     WHERE actor_id = ?1 AND rolled_back = 0 AND entity_kind = ?2
                     ORDER BY id DESC LIMIT 1"
                ),
                vec![
                    Box::new(actor_id.as_bytes().to_vec()),
                    Box::new(kind.as_str()),
                ],
            ),
            None => (
                format!(
                    "SELECT {CHANGE_COLUMNS} FROM change_log
                     WHERE actor_id = ?1 AND rolled_back = 0
                     ORDER BY id DESC LIMIT 1"
                ),
                vec![Box::new(actor_id.as_bytes().to_vec())],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))?;

        match rows.next()? {
            Some(row) => Ok(Some(read_change(row)?)),
            None => Ok(None),
        }
    }

    fn list_recent(
        &self,
        limit: usize,
        actor_id: Option<ActorId>,
    ) -> Result<Vec<ChangeRecord>, StorageError> {
        let (sql, params): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match actor_id {
            Some(actor_id) => (
                format!(
                    "SELECT {CHANGE_COLUMNS} FROM change_log WHERE actor_id = ?1 ORDER BY id DESC LIMIT ?2"
                ),
                vec![
                    Box::new(actor_id.as_bytes().to_vec()),
                    Box::new(limit as i64),
                ],
            ),
            None => (
                format!("SELECT {CHANGE_COLUMNS} FROM change_log ORDER BY id DESC LIMIT ?1"),
                vec![Box::new(limit as i64)],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(read_change(row)?);
        }
        Ok(result)
    }

    fn mark_rolled_back(&mut self, id: ChangeId) -> Result<MarkOutcome, StorageError> {
        // Compare-and-set: the WHERE clause makes the 0 -> 1 transition
        // atomic under sqlite's serialized write path, so of two racing
        // undos exactly one observes a changed row.
        let changed = self.conn.execute(
            "UPDATE change_log SET rolled_back = 1 WHERE id = ?1 AND rolled_back = 0",
            rusqlite::params![id.as_i64()],
        )?;
        if changed > 0 {
            return Ok(MarkOutcome::Marked);
        }

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM change_log WHERE id = ?1",
                rusqlite::params![id.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match exists {
            Some(_) => MarkOutcome::AlreadyRolledBack,
            None => MarkOutcome::NotFound,
        })
    }

    fn change_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackback_core::FieldValue;

    fn issue_snapshot(status: &str, priority: i64) -> Snapshot {
        Snapshot::from([
            ("status", FieldValue::Text(status.into())),
            ("priority", FieldValue::Integer(priority)),
        ])
    }

    #[test]
    fn record_store_roundtrip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let entity_id = EntityId::new();

        assert!(store.read(EntityKind::Issue, entity_id).unwrap().is_none());

        store
            .insert(EntityKind::Issue, entity_id, &issue_snapshot("todo", 3))
            .unwrap();
        let snap = store.read(EntityKind::Issue, entity_id).unwrap().unwrap();
        assert_eq!(snap.get("status"), Some(&FieldValue::Text("todo".into())));

        store
            .put_fields(
                EntityKind::Issue,
                entity_id,
                &Snapshot::from([("status", FieldValue::Text("done".into()))]),
            )
            .unwrap();
        let snap = store.read(EntityKind::Issue, entity_id).unwrap().unwrap();
        assert_eq!(snap.get("status"), Some(&FieldValue::Text("done".into())));
        assert_eq!(snap.get("priority"), Some(&FieldValue::Integer(3)));

        assert!(store.remove(EntityKind::Issue, entity_id).unwrap());
        assert!(store.read(EntityKind::Issue, entity_id).unwrap().is_none());
        assert!(!store.remove(EntityKind::Issue, entity_id).unwrap());
    }

    #[test]
    fn clear_fields_drops_only_named_keys() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let entity_id = EntityId::new();
        store
            .insert(EntityKind::Issue, entity_id, &issue_snapshot("todo", 3))
            .unwrap();

        store
            .clear_fields(EntityKind::Issue, entity_id, &["priority".to_string()])
            .unwrap();

        let snap = store.read(EntityKind::Issue, entity_id).unwrap().unwrap();
        assert!(snap.get("priority").is_none());
        assert_eq!(snap.get("status"), Some(&FieldValue::Text("todo".into())));
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let entity_id = EntityId::new();
        store
            .insert(EntityKind::Project, entity_id, &Snapshot::new())
            .unwrap();
        let err = store
            .insert(EntityKind::Project, entity_id, &Snapshot::new())
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateEntity { .. }));
    }

    #[test]
    fn same_entity_id_distinct_per_kind() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let entity_id = EntityId::new();
        store
            .insert(EntityKind::Issue, entity_id, &Snapshot::new())
            .unwrap();
        store
            .insert(EntityKind::Milestone, entity_id, &Snapshot::new())
            .unwrap();
        assert!(store.read(EntityKind::Issue, entity_id).unwrap().is_some());
        assert!(store.read(EntityKind::Milestone, entity_id).unwrap().is_some());
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let actor = ActorId::new();

        let mut prev = None;
        for i in 0..5 {
            let id = store
                .append(&NewChange::create(
                    actor,
                    EntityKind::Issue,
                    EntityId::new(),
                    issue_snapshot("todo", i),
                ))
                .unwrap();
            if let Some(prev) = prev {
                assert!(id > prev, "expected {id:?} > {prev:?}");
            }
            prev = Some(id);
        }
        assert_eq!(store.change_count().unwrap(), 5);
    }

    #[test]
    fn append_rejects_malformed_record() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let bad = NewChange {
            actor_id: ActorId::new(),
            op: ChangeOp::Update,
            entity_kind: EntityKind::Issue,
            entity_id: EntityId::new(),
            before: None,
            after: Some(Snapshot::new()),
        };
        assert!(matches!(store.append(&bad), Err(StorageError::Core(_))));
        assert_eq!(store.change_count().unwrap(), 0);
    }

    #[test]
    fn get_returns_stored_record() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let actor = ActorId::new();
        let entity_id = EntityId::new();

        let id = store
            .append(&NewChange::update(
                actor,
                EntityKind::Issue,
                entity_id,
                issue_snapshot("todo", 3),
                issue_snapshot("done", 3),
            ))
            .unwrap();

        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.actor_id, actor);
        assert_eq!(record.op, ChangeOp::Update);
        assert_eq!(record.entity_id, entity_id);
        assert!(!record.rolled_back);
        assert!(record.created_at > 0);
        assert_eq!(
            record.before.unwrap().get("status"),
            Some(&FieldValue::Text("todo".into()))
        );

        assert!(store.get(ChangeId::from_i64(9999)).unwrap().is_none());
    }

    #[test]
    fn latest_by_actor_skips_rolled_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let actor = ActorId::new();
        let other = ActorId::new();

        let first = store
            .append(&NewChange::create(
                actor,
                EntityKind::Issue,
                EntityId::new(),
                issue_snapshot("todo", 1),
            ))
            .unwrap();
        let second = store
            .append(&NewChange::create(
                actor,
                EntityKind::Project,
                EntityId::new(),
                Snapshot::from([("name", FieldValue::Text("Apollo".into()))]),
            ))
            .unwrap();
        store
            .append(&NewChange::create(
                other,
                EntityKind::Issue,
                EntityId::new(),
                issue_snapshot("todo", 2),
            ))
            .unwrap();

        let latest = store.latest_by_actor(actor, None).unwrap().unwrap();
        assert_eq!(latest.id, second);

        let latest_issue = store
            .latest_by_actor(actor, Some(EntityKind::Issue))
            .unwrap()
            .unwrap();
        assert_eq!(latest_issue.id, first);

        assert_eq!(store.mark_rolled_back(second).unwrap(), MarkOutcome::Marked);
        let latest = store.latest_by_actor(actor, None).unwrap().unwrap();
        assert_eq!(latest.id, first);
    }

    #[test]
    fn list_recent_newest_first() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let actor = ActorId::new();
        let other = ActorId::new();

        for i in 0..4 {
            let who = if i % 2 == 0 { actor } else { other };
            store
                .append(&NewChange::create(
                    who,
                    EntityKind::Issue,
                    EntityId::new(),
                    issue_snapshot("todo", i),
                ))
                .unwrap();
        }

        let all = store.list_recent(10, None).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));

        let mine = store.list_recent(10, Some(actor)).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.actor_id == actor));

        let page = store.list_recent(2, None).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn mark_rolled_back_is_one_shot() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .append(&NewChange::create(
                ActorId::new(),
                EntityKind::Issue,
                EntityId::new(),
                issue_snapshot("todo", 1),
            ))
            .unwrap();

        assert_eq!(store.mark_rolled_back(id).unwrap(), MarkOutcome::Marked);
        assert_eq!(
            store.mark_rolled_back(id).unwrap(),
            MarkOutcome::AlreadyRolledBack
        );
        assert_eq!(
            store.mark_rolled_back(ChangeId::from_i64(424242)).unwrap(),
            MarkOutcome::NotFound
        );

        let record = store.get(id).unwrap().unwrap();
        assert!(record.rolled_back);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackback.db");
        let path = path.to_str().unwrap();
        let entity_id = EntityId::new();

        {
            let mut store = SqliteStore::open(path).unwrap();
            store
                .insert(EntityKind::Issue, entity_id, &issue_snapshot("todo", 3))
                .unwrap();
            store
                .append(&NewChange::create(
                    ActorId::new(),
                    EntityKind::Issue,
                    entity_id,
                    issue_snapshot("todo", 3),
                ))
                .unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert!(store.read(EntityKind::Issue, entity_id).unwrap().is_some());
        assert_eq!(store.change_count().unwrap(), 1);
    }
}
