use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use fieldsync_core::{
    next_created_at, now_ms, CaptureInput, EvidenceRecord, PatchOutcome, RecordId, RecordPatch, RecordStatus,
};
use fieldsync_storage::{merge_patch, RecordStore, StorageError, StoreResult};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

const COLUMNS: &str = "id, job_id, milestone_id, file_name, mime_type, content_hash, created_at, status, file, last_error, remote_url, uploaded_at";

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable record store. Several handles (pages, CLI invocations) may open the
/// same file; WAL plus a busy timeout lets them interleave safely.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

trait SqlResultExt<T> {
    fn store_err(self) -> StoreResult<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn store_err(self) -> StoreResult<T> {
        self.map_err(|e| match e.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied
                | ErrorCode::NotADatabase,
            ) => StorageError::Unavailable(e.to_string()),
            _ => StorageError::Backend(e.into()),
        })
    }
}

/// Row shape before the status column is validated.
struct RawRecord {
    record: EvidenceRecord,
    status: String,
}

impl RawRecord {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record: EvidenceRecord {
                id: RecordId::from_str(r.get::<_, String>(0)?),
                job_id: r.get(1)?,
                milestone_id: r.get(2)?,
                file_name: r.get(3)?,
                mime_type: r.get(4)?,
                content_hash: r.get(5)?,
                created_at: r.get(6)?,
                // overwritten by decode()
                status: RecordStatus::Pending,
                file: r.get(8)?,
                last_error: r.get(9)?,
                remote_url: r.get(10)?,
                uploaded_at: r.get(11)?,
            },
            status: r.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<EvidenceRecord> {
        let status = RecordStatus::parse(&self.status).ok_or_else(|| StorageError::Corrupt {
            id: self.record.id.0.clone(),
            reason: format!("unknown status {:?}", self.status),
        })?;
        Ok(EvidenceRecord { status, ..self.record })
    }
}

impl SqliteRecordStore {
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        Self::open_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Any failure here means the substrate cannot be used at all.
    pub fn open_with_timeout(db_path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        let unavailable = |e: &dyn std::fmt::Display| {
            StorageError::Unavailable(format!("open sqlite db {}: {}", db_path.display(), e))
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(&e))?;
        }
        let conn = Connection::open(db_path).map_err(|e| unavailable(&e))?;
        conn.busy_timeout(busy_timeout).map_err(|e| unavailable(&e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))
            .map_err(|e| unavailable(&e))?;
        // init schema
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).map_err(|e| unavailable(&e))?;
        info!(path = %db_path.display(), journal_mode = %mode, "opened evidence store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend(anyhow!("sqlite connection lock poisoned")))
    }

    fn query_records(conn: &Connection, sql: &str, args: &[&str]) -> StoreResult<Vec<EvidenceRecord>> {
        let mut stmt = conn.prepare(sql).store_err()?;
        let rows = stmt.query_map(params_from_iter(args.iter()), RawRecord::from_row).store_err()?;
        let mut out = vec![];
        for row in rows {
            out.push(row.store_err()?.decode()?);
        }
        Ok(out)
    }

    fn select_one(conn: &Connection, id: &RecordId) -> StoreResult<Option<EvidenceRecord>> {
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM evidence WHERE id = ?1"),
                params![id.0],
                RawRecord::from_row,
            )
            .optional()
            .store_err()?;
        raw.map(RawRecord::decode).transpose()
    }
}

impl RecordStore for SqliteRecordStore {
    fn create(&self, input: CaptureInput) -> StoreResult<EvidenceRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).store_err()?;
        let last: Option<i64> = tx
            .query_row("SELECT MAX(created_at) FROM evidence", [], |r| r.get(0))
            .store_err()?;
        let record = input.into_record(RecordId::new(), next_created_at(now_ms(), last));
        tx.execute(
            &format!("INSERT INTO evidence({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                record.id.0,
                record.job_id,
                record.milestone_id,
                record.file_name,
                record.mime_type,
                record.content_hash,
                record.created_at,
                record.status.as_str(),
                record.file,
                record.last_error,
                record.remote_url,
                record.uploaded_at
            ],
        )
        .store_err()?;
        tx.commit().store_err()?;
        debug!(record = %record.id, job = %record.job_id, bytes = record.file.len(), "created evidence record");
        Ok(record)
    }

    fn get(&self, id: &RecordId) -> StoreResult<Option<EvidenceRecord>> {
        let conn = self.lock()?;
        Self::select_one(&conn, id)
    }

    fn patch(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<PatchOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).store_err()?;
        let Some(current) = Self::select_one(&tx, id)? else {
            tx.commit().store_err()?;
            debug!(record = %id, "patch on absent record ignored");
            return Ok(PatchOutcome::Missing);
        };
        let outcome = merge_patch(current, patch);
        if let PatchOutcome::Applied(updated) = &outcome {
            tx.execute(
                "UPDATE evidence SET status = ?1, last_error = ?2, remote_url = ?3, uploaded_at = ?4 WHERE id = ?5",
                params![
                    updated.status.as_str(),
                    updated.last_error,
                    updated.remote_url,
                    updated.uploaded_at,
                    id.0
                ],
            )
            .store_err()?;
        }
        tx.commit().store_err()?;
        Ok(outcome)
    }

    fn remove(&self, id: &RecordId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM evidence WHERE id = ?1", params![id.0]).store_err()?;
        Ok(n > 0)
    }

    fn list_all(&self) -> StoreResult<Vec<EvidenceRecord>> {
        let conn = self.lock()?;
        Self::query_records(&conn, &format!("SELECT {COLUMNS} FROM evidence ORDER BY created_at, id"), &[])
    }

    fn list_by_status(&self, statuses: &[RecordStatus]) -> StoreResult<Vec<EvidenceRecord>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        Self::query_records(
            &conn,
            &format!("SELECT {COLUMNS} FROM evidence WHERE status IN ({placeholders}) ORDER BY created_at, id"),
            &names,
        )
    }

    fn remove_where(&self, predicate: &dyn Fn(RecordStatus) -> bool) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).store_err()?;
        let snapshot: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT id, status FROM evidence").store_err()?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))).store_err()?;
            rows.collect::<rusqlite::Result<_>>().store_err()?
        };
        let mut removed = 0;
        for (id, status) in snapshot {
            let matches = RecordStatus::parse(&status).map(|s| predicate(s)).unwrap_or(false);
            if !matches {
                continue;
            }
            // status guard: only delete the row as it was seen in the snapshot
            removed += tx
                .execute("DELETE FROM evidence WHERE id = ?1 AND status = ?2", params![id, status])
                .store_err()?;
        }
        tx.commit().store_err()?;
        if removed > 0 {
            info!(removed, "swept evidence records");
        }
        Ok(removed)
    }
}
