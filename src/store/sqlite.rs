//! Metadata vector store backed by SQLite and sqlite-vec.
//!
//! Records live in a plain table; embeddings live in a `vec0` virtual table
//! keyed by the record's rowid. Search computes cosine distance over the
//! rows that pass the metadata filter, then orders and limits.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Once;

use async_trait::async_trait;
use r2d2::{ManageConnection, Pool};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, info};

use super::{
    SearchFilter, StoreError, VectorStore, rank_candidates, validate_embedding, validate_request,
};
use crate::models::{MetadataRecord, RecordType, RetrievedMatch};

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS store_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT NOT NULL UNIQUE,
    page_content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    record_type TEXT,
    domain TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_domain ON records(domain);
CREATE INDEX IF NOT EXISTS idx_records_type ON records(record_type);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_records USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

// ── Connection pool ──────────────────────────────────────────────────

/// r2d2 manager that opens sqlite-vec enabled connections.
#[derive(Debug, Clone)]
pub struct SqliteVecManager {
    path: Option<PathBuf>,
}

impl ManageConnection for SqliteVecManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        init_sqlite_vec();
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Pooled SQLite vector store. Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: Pool<SqliteVecManager>,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Open (or create) a store at `path` with the given embedding size.
    ///
    /// Fails if the file was created with a different dimensionality.
    pub fn open<P: AsRef<Path>>(
        path: P,
        dimensions: usize,
        pool_size: u32,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening metadata store: {}", path.display());
        let manager = SqliteVecManager {
            path: Some(path.to_path_buf()),
        };
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::init(pool, dimensions)
    }

    /// Open an in-memory store (useful for testing).
    ///
    /// Limited to a single connection, since every in-memory connection is a
    /// separate database.
    pub fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteVecManager { path: None })?;
        Self::init(pool, dimensions)
    }

    fn init(pool: Pool<SqliteVecManager>, dimensions: usize) -> Result<Self, StoreError> {
        if dimensions == 0 {
            return Err(StoreError::InvalidInput("dimensions must be positive".to_string()));
        }
        let conn = pool.get()?;

        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(&schema_sql(dimensions))?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_info WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(value) => {
                let existing: usize = value.parse().map_err(|_| {
                    StoreError::Unavailable(format!("corrupt dimensions entry: {value}"))
                })?;
                if existing != dimensions {
                    return Err(StoreError::DimensionMismatch {
                        expected: existing,
                        actual: dimensions,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_info (key, value) VALUES ('dimensions', ?)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        drop(conn);
        Ok(Self { pool, dimensions })
    }

    /// Insert or replace records together with their precomputed embeddings.
    ///
    /// Returns the number of records written.
    pub fn upsert_records(&self, entries: &[(MetadataRecord, Vec<f32>)]) -> Result<usize, StoreError> {
        for (record, embedding) in entries {
            if record.id.trim().is_empty() {
                return Err(StoreError::InvalidInput("record id must not be empty".to_string()));
            }
            validate_embedding(&record.id, embedding, self.dimensions)?;
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        for (record, embedding) in entries {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| StoreError::InvalidInput(format!("metadata not serializable: {e}")))?;
            let row_id: i64 = tx.query_row(
                r#"
                INSERT INTO records (record_id, page_content, metadata, record_type, domain)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(record_id) DO UPDATE SET
                    page_content = excluded.page_content,
                    metadata = excluded.metadata,
                    record_type = excluded.record_type,
                    domain = excluded.domain
                RETURNING id
                "#,
                params![
                    record.id,
                    record.page_content,
                    metadata,
                    record.record_type().map(RecordType::as_str),
                    record.domain(),
                ],
                |row| row.get(0),
            )?;

            // vec0 has no upsert; replace the row
            tx.execute("DELETE FROM vec_records WHERE rowid = ?", params![row_id])?;
            tx.execute(
                "INSERT INTO vec_records (rowid, embedding) VALUES (?, ?)",
                params![row_id, serialize_vector(embedding)],
            )?;
        }
        tx.commit()?;
        debug!("upserted {} metadata records", entries.len());
        Ok(entries.len())
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn search_blocking(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievedMatch>, StoreError> {
        let mut query = String::from(
            r#"
            SELECT
                r.record_id,
                r.page_content,
                r.metadata,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_records v
            JOIN records r ON v.rowid = r.id
            "#,
        );

        let mut where_clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(vector))];

        if let Some(f) = filter {
            if let Some(domain) = &f.domain {
                where_clauses.push("r.domain = ?");
                params.push(Value::Text(domain.clone()));
            }
            if let Some(record_type) = f.record_type {
                where_clauses.push("r.record_type = ?");
                params.push(Value::Text(record_type.as_str().to_string()));
            }
        }

        if !where_clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&where_clauses.join(" AND "));
        }

        query.push_str(" ORDER BY distance ASC, r.record_id ASC LIMIT ?");
        params.push(Value::Integer(k as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let id: String = row.get(0)?;
            let page_content: String = row.get(1)?;
            let metadata: String = row.get(2)?;
            // NULL when either vector has zero norm
            let distance: Option<f64> = row.get(3)?;
            Ok((id, page_content, metadata, distance))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (id, page_content, metadata, distance) = row?;
            let Some(distance) = distance else {
                continue;
            };
            let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&metadata)
                .map_err(|e| StoreError::Unavailable(format!("corrupt metadata for {id}: {e}")))?;
            let record = MetadataRecord {
                id,
                page_content,
                metadata,
            };
            candidates.push((record, 1.0 - distance));
        }

        Ok(rank_candidates(candidates, k))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievedMatch>, StoreError> {
        validate_request(vector, k, self.dimensions)?;

        let store = self.clone();
        let vector = vector.to_vec();
        let filter = filter.cloned();
        tokio::task::spawn_blocking(move || store.search_blocking(&vector, k, filter.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("search task failed: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordType;

    fn padded(head: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[..head.len()].copy_from_slice(head);
        v
    }

    fn record(id: &str, kind: &str, domain: &str) -> MetadataRecord {
        MetadataRecord::new(id, format!("{id} description"))
            .with_field("type", kind)
            .with_field("domain", domain)
            .with_field("title", id.to_uppercase())
    }

    fn seeded() -> SqliteVectorStore {
        let store = SqliteVectorStore::open_in_memory(8).unwrap();
        store
            .upsert_records(&[
                (record("rev_report", "report", "sales"), padded(&[0.9, 0.1, 0.0])),
                (record("rev_metric", "metric", "sales"), padded(&[0.8, 0.3, 0.0])),
                (record("cac_metric", "metric", "marketing"), padded(&[1.0, 0.0, 0.0])),
                (record("nps_report", "report", "support"), padded(&[0.0, 0.0, 1.0])),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_serialize_vector() {
        let bytes = serialize_vector(&[1.0, 2.0, -3.5]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = seeded();
        let hits = store.search(&padded(&[1.0, 0.0, 0.0]), 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record.id, "cac_metric");
        assert!(hits[0].score > 0.99);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(hits.iter().map(|m| m.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(hits[0].record.field("title").as_deref(), Some("CAC_METRIC"));
    }

    #[tokio::test]
    async fn test_search_with_filter() {
        let store = seeded();
        let sales = SearchFilter {
            domain: Some("sales".to_string()),
            record_type: None,
        };
        let hits = store
            .search(&padded(&[1.0, 0.0, 0.0]), 5, Some(&sales))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|m| m.record.domain().as_deref() == Some("sales")));

        let sales_metrics = SearchFilter {
            domain: Some("sales".to_string()),
            record_type: Some(RecordType::Metric),
        };
        let hits = store
            .search(&padded(&[1.0, 0.0, 0.0]), 5, Some(&sales_metrics))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "rev_metric");
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() {
        let store = seeded();
        let err = store.search(&[1.0, 0.0], 3, None).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 8, actual: 2 }));
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let store = seeded();
        store
            .upsert_records(&[(record("rev_report", "report", "finance"), padded(&[0.0, 1.0]))])
            .unwrap();
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn test_upsert_rejects_zero_embedding() {
        let store = seeded();
        let err = store
            .upsert_records(&[(record("blank", "report", "sales"), vec![0.0; 8])])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(store.count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_zero_query_returns_no_matches() {
        let store = seeded();
        let hits = store.search(&[0.0; 8], 3, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_zero_row_on_disk_is_skipped() {
        let store = seeded();
        {
            // rows written before zero embeddings were rejected
            let conn = store.pool.get().unwrap();
            conn.execute(
                "INSERT INTO records (record_id, page_content, metadata, record_type, domain) \
                 VALUES ('legacy', 'old row', '{}', 'report', 'sales')",
                [],
            )
            .unwrap();
            let row_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO vec_records (rowid, embedding) VALUES (?, ?)",
                params![row_id, serialize_vector(&[0.0; 8])],
            )
            .unwrap();
        }

        let hits = store.search(&padded(&[1.0, 0.0, 0.0]), 10, None).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|m| m.record.id != "legacy"));
    }

    #[tokio::test]
    async fn test_type_filter_ignores_case() {
        let store = SqliteVectorStore::open_in_memory(8).unwrap();
        store
            .upsert_records(&[(
                MetadataRecord::new("r1", "Revenue").with_field("type", "Report"),
                padded(&[1.0]),
            )])
            .unwrap();
        let reports = SearchFilter {
            domain: None,
            record_type: Some(RecordType::Report),
        };
        let hits = store.search(&padded(&[1.0]), 5, Some(&reports)).await.unwrap();
        assert_eq!(hits.len(), 1);
        // stored metadata keeps the original spelling
        assert_eq!(hits[0].record.field("type").as_deref(), Some("Report"));
    }

    #[test]
    fn test_reopen_with_other_dimensions_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        SqliteVectorStore::open(&path, 8, 2).unwrap();
        let err = SqliteVectorStore::open(&path, 16, 2).err().unwrap();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 8, actual: 16 }));
    }
}
