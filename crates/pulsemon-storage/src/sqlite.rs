use crate::error::Result;
use crate::{Storage, StorageError};
use async_trait::async_trait;
use pulsemon_common::model::{Metric, MetricType};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metrics (
    id TEXT PRIMARY KEY,
    mtype TEXT NOT NULL,
    delta BIGINT,
    value DOUBLE PRECISION
)";

const UPSERT: &str = "INSERT INTO metrics (id, mtype, delta, value)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (id) DO UPDATE
    SET mtype = excluded.mtype,
        delta = excluded.delta,
        value = excluded.value";

/// Relational metric store backed by a single SQLite table.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn row_to_metric(id: String, mtype: String, delta: Option<i64>, value: Option<f64>) -> Result<Metric> {
    let mtype: MetricType = mtype
        .parse()
        .map_err(|_| StorageError::Corrupt(format!("unknown metric type for id={id}")))?;
    Ok(Metric {
        id,
        mtype,
        delta,
        value,
    })
}

fn query_metric(conn: &Connection, id: &str) -> Result<Metric> {
    let row = conn
        .query_row(
            "SELECT id, mtype, delta, value FROM metrics WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            },
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(id.to_string()),
            other => other.into(),
        })?;
    row_to_metric(row.0, row.1, row.2, row.3)
}

/// Upserts one metric through `conn`. Counter accumulation happens at the
/// application level: read current, sum, write. When `conn` is an open
/// transaction the read observes earlier writes of the same batch, so
/// repeated ids compose.
fn save_metric(conn: &Connection, metric: &mut Metric) -> Result<()> {
    if metric.mtype == MetricType::Counter {
        let previous = match query_metric(conn, &metric.id) {
            Ok(stored) => stored.delta.unwrap_or(0),
            Err(StorageError::NotFound(_)) => 0,
            Err(err) => return Err(err),
        };
        metric.delta = Some(previous + metric.delta.unwrap_or(0));
    }
    let mut stmt = conn.prepare_cached(UPSERT)?;
    stmt.execute(params![
        metric.id,
        metric.mtype.to_string(),
        metric.delta,
        metric.value
    ])?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save(&self, metric: &mut Metric) -> Result<()> {
        let conn = self.lock();
        save_metric(&conn, metric)
    }

    async fn save_batch(&self, metrics: &mut [Metric]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for metric in metrics.iter_mut() {
            save_metric(&tx, metric)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Metric> {
        let conn = self.lock();
        query_metric(&conn, id)
    }

    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT id, mtype, delta, value FROM metrics")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;
        let mut result = HashMap::new();
        for row in rows {
            let (id, mtype, delta, value) = row?;
            let metric = row_to_metric(id, mtype, delta, value)?;
            result.insert(metric.id.clone(), metric);
        }
        Ok(result)
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
