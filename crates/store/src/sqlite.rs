//! SQLite 이벤트 스토어
//!
//! rusqlite 연결 하나를 `Mutex`로 감싸 공유합니다.
//! 모든 쿼리는 `spawn_blocking` 안에서 실행되어 런타임 워커를 막지 않습니다.
//!
//! 타임스탬프는 UTC 마이크로초 정수로 저장합니다.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use certwatch_core::error::StoreError;
use certwatch_core::event::{Event, EventType};
use certwatch_core::metrics as m;
use certwatch_core::store::EventStore;
use certwatch_core::types::{Entity, EntityCount, EntityId, EntityType, TestCase, TestCaseId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS test_cases (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    run_name    TEXT NOT NULL,
    started_at  INTEGER NOT NULL,
    ended_at    INTEGER,
    success     INTEGER
);
CREATE INDEX IF NOT EXISTS idx_test_cases_run ON test_cases(run_name);

CREATE TABLE IF NOT EXISTS entities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    k8s_uid     TEXT NOT NULL UNIQUE,
    entity_type TEXT NOT NULL,
    tc_id       INTEGER NOT NULL REFERENCES test_cases(id),
    UNIQUE (entity_type, name, tc_id)
);

CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    tc_id       INTEGER NOT NULL REFERENCES test_cases(id),
    entity_id   INTEGER NOT NULL REFERENCES entities(id),
    event_type  TEXT NOT NULL,
    timestamp   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_tc ON events(tc_id);

CREATE TABLE IF NOT EXISTS entity_counts (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    tc_id            INTEGER NOT NULL REFERENCES test_cases(id),
    timestamp        INTEGER NOT NULL,
    pods_creating    INTEGER NOT NULL,
    pods_ready       INTEGER NOT NULL,
    pods_terminating INTEGER NOT NULL,
    pvc_creating     INTEGER NOT NULL,
    pvc_bound        INTEGER NOT NULL,
    pvc_terminating  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entity_counts_tc ON entity_counts(tc_id);
";

/// SQLite 기반 [`EventStore`] 구현
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 파일 데이터베이스를 열고 스키마를 준비합니다.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(query_err)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    /// 인메모리 데이터베이스를 엽니다.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(query_err)?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 연결을 잠근 채로 blocking 작업을 실행합니다.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Connection("connection mutex poisoned".to_owned()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Connection(format!("task join: {e}")))?
    }
}

impl EventStore for SqliteStore {
    async fn save_entities(&self, entities: &mut [Entity]) -> Result<(), StoreError> {
        let batch = entities.to_vec();
        let ids = self
            .with_conn(move |conn| save_entities_sync(conn, &batch))
            .await?;
        for (entity, id) in entities.iter_mut().zip(ids) {
            entity.id = id;
        }
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> Result<(), StoreError> {
        let batch = events.to_vec();
        self.with_conn(move |conn| save_events_sync(conn, &batch))
            .await
    }

    async fn save_entity_counts(&self, counts: &[EntityCount]) -> Result<(), StoreError> {
        let batch = counts.to_vec();
        self.with_conn(move |conn| save_counts_sync(conn, &batch))
            .await
    }

    async fn create_test_case(&self, test_case: &mut TestCase) -> Result<(), StoreError> {
        let tc = test_case.clone();
        let id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO test_cases (name, run_name, started_at) VALUES (?1, ?2, ?3)",
                    params![tc.name, tc.run_name, tc.started_at.timestamp_micros()],
                )
                .map_err(query_err)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        test_case.id = id;
        Ok(())
    }

    async fn finish_test_case(&self, tc_id: TestCaseId, success: bool) -> Result<(), StoreError> {
        let ended_at = Utc::now().timestamp_micros();
        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE test_cases SET ended_at = ?1, success = ?2 WHERE id = ?3",
                    params![ended_at, success, tc_id],
                )
                .map_err(query_err)?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("test case {tc_id}")));
            }
            Ok(())
        })
        .await
    }

    async fn get_test_case(&self, tc_id: TestCaseId) -> Result<Option<TestCase>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, run_name, started_at, ended_at, success
                 FROM test_cases WHERE id = ?1",
                [tc_id],
                row_to_test_case,
            )
            .optional()
            .map_err(query_err)
        })
        .await
    }

    async fn get_test_cases_by_run(&self, run_name: &str) -> Result<Vec<TestCase>, StoreError> {
        let run_name = run_name.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, run_name, started_at, ended_at, success
                     FROM test_cases WHERE run_name = ?1 ORDER BY started_at, id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([run_name], row_to_test_case)
                .map_err(query_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
        })
        .await
    }

    async fn get_entities(&self, tc_id: TestCaseId) -> Result<Vec<Entity>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, k8s_uid, entity_type, tc_id
                     FROM entities WHERE tc_id = ?1 ORDER BY id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([tc_id], row_to_entity)
                .map_err(query_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
        })
        .await
    }

    async fn get_entities_by_ids(&self, ids: &[EntityId]) -> Result<Vec<Entity>, StoreError> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, name, k8s_uid, entity_type, tc_id
                     FROM entities WHERE id = ?1",
                )
                .map_err(query_err)?;
            let mut entities = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(entity) = stmt
                    .query_row([id], row_to_entity)
                    .optional()
                    .map_err(query_err)?
                {
                    entities.push(entity);
                }
            }
            Ok(entities)
        })
        .await
    }

    async fn get_events(&self, tc_id: TestCaseId) -> Result<Vec<Event>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, tc_id, entity_id, event_type, timestamp
                     FROM events WHERE tc_id = ?1 ORDER BY id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([tc_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(query_err)?;

            let mut events = Vec::new();
            for row in rows {
                let (id, name, tc_id, entity_id, event_type, ts) = row.map_err(query_err)?;
                let event_type: EventType = event_type
                    .parse()
                    .map_err(|e| StoreError::Query(format!("event {name}: {e}")))?;
                events.push(Event {
                    id: Some(id),
                    name,
                    tc_id,
                    entity_id,
                    event_type,
                    timestamp: from_micros(ts)?,
                });
            }
            Ok(events)
        })
        .await
    }

    async fn get_entity_counts(&self, tc_id: TestCaseId) -> Result<Vec<EntityCount>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT tc_id, timestamp, pods_creating, pods_ready, pods_terminating,
                            pvc_creating, pvc_bound, pvc_terminating
                     FROM entity_counts WHERE tc_id = ?1 ORDER BY timestamp, id",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([tc_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        [
                            row.get::<_, u32>(2)?,
                            row.get::<_, u32>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, u32>(5)?,
                            row.get::<_, u32>(6)?,
                            row.get::<_, u32>(7)?,
                        ],
                    ))
                })
                .map_err(query_err)?;

            let mut counts = Vec::new();
            for row in rows {
                let (tc_id, ts, [pc, pr, pt, vc, vb, vt]) = row.map_err(query_err)?;
                counts.push(EntityCount {
                    tc_id,
                    timestamp: from_micros(ts)?,
                    pods_creating: pc,
                    pods_ready: pr,
                    pods_terminating: pt,
                    pvc_creating: vc,
                    pvc_bound: vb,
                    pvc_terminating: vt,
                });
            }
            Ok(counts)
        })
        .await
    }
}

// =============================================================================
// SQLite operations (sync, run inside spawn_blocking)
// =============================================================================

/// 엔티티 배치를 저장하고 입력 순서대로 ID를 돌려줍니다.
fn save_entities_sync(conn: &mut Connection, batch: &[Entity]) -> Result<Vec<i64>, StoreError> {
    let tx = conn.transaction().map_err(query_err)?;
    let mut ids = Vec::with_capacity(batch.len());
    {
        let mut insert = tx
            .prepare_cached(
                "INSERT INTO entities (name, k8s_uid, entity_type, tc_id)
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
            )
            .map_err(query_err)?;
        let mut existing = tx
            .prepare_cached(
                "SELECT id FROM entities
                 WHERE (entity_type = ?1 AND name = ?2 AND tc_id = ?3) OR k8s_uid = ?4
                 LIMIT 1",
            )
            .map_err(query_err)?;

        for entity in batch {
            let inserted = insert
                .execute(params![
                    entity.name,
                    entity.k8s_uid,
                    entity.entity_type.as_str(),
                    entity.tc_id
                ])
                .map_err(query_err)?;
            if inserted == 1 {
                ids.push(tx.last_insert_rowid());
                continue;
            }
            let id: i64 = existing
                .query_row(
                    params![
                        entity.entity_type.as_str(),
                        entity.name,
                        entity.tc_id,
                        entity.k8s_uid
                    ],
                    |row| row.get(0),
                )
                .map_err(query_err)?;
            debug!(entity = %entity, existing = id, "entity already stored");
            metrics::counter!(m::STORE_ENTITY_DUPLICATES_TOTAL).increment(1);
            ids.push(id);
        }
    }
    tx.commit().map_err(query_err)?;
    Ok(ids)
}

fn save_events_sync(conn: &mut Connection, batch: &[Event]) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(query_err)?;
    {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO events (name, tc_id, entity_id, event_type, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(query_err)?;
        for event in batch {
            stmt.execute(params![
                event.name,
                event.tc_id,
                event.entity_id,
                event.event_type.as_str(),
                event.timestamp.timestamp_micros()
            ])
            .map_err(|e| constraint_err(e, &event.name))?;
        }
    }
    // 실패 시 tx가 drop되며 롤백
    tx.commit().map_err(query_err)
}

fn save_counts_sync(conn: &mut Connection, batch: &[EntityCount]) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(query_err)?;
    {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO entity_counts
                 (tc_id, timestamp, pods_creating, pods_ready, pods_terminating,
                  pvc_creating, pvc_bound, pvc_terminating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(query_err)?;
        for c in batch {
            stmt.execute(params![
                c.tc_id,
                c.timestamp.timestamp_micros(),
                c.pods_creating,
                c.pods_ready,
                c.pods_terminating,
                c.pvc_creating,
                c.pvc_bound,
                c.pvc_terminating
            ])
            .map_err(query_err)?;
        }
    }
    tx.commit().map_err(query_err)
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let entity_type: String = row.get(3)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        k8s_uid: row.get(2)?,
        entity_type: entity_type.parse().unwrap_or(EntityType::Unknown),
        tc_id: row.get(4)?,
    })
}

fn row_to_test_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestCase> {
    let started: i64 = row.get(3)?;
    let ended: Option<i64> = row.get(4)?;
    Ok(TestCase {
        id: row.get(0)?,
        name: row.get(1)?,
        run_name: row.get(2)?,
        started_at: DateTime::from_timestamp_micros(started).unwrap_or_default(),
        ended_at: ended.and_then(DateTime::from_timestamp_micros),
        success: row.get(5)?,
    })
}

fn from_micros(ts: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(ts)
        .ok_or_else(|| StoreError::Query(format!("timestamp out of range: {ts}")))
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn constraint_err(e: rusqlite::Error, key: &str) -> StoreError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) if e.to_string().contains("UNIQUE") => {
            StoreError::Duplicate(key.to_owned())
        }
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            StoreError::NotFound(format!("{key}: {e}"))
        }
        _ => query_err(e),
    }
}
