use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetmon_common::types::{Node, Tunnel};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Result, StorageError};
use crate::NodeRegistry;

const NODES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    last_collected_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_nodes_last_collected_at ON nodes(last_collected_at);
";

const MONITORS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS monitors (
    node_id TEXT PRIMARY KEY,
    is_login INTEGER NOT NULL DEFAULT 0,
    heartbeat_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_monitors_heartbeat_at ON monitors(heartbeat_at);
";

const TUNNELS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tunnels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    public_url TEXT NOT NULL,
    server TEXT NOT NULL,
    local_addr TEXT NOT NULL,
    established_at INTEGER NOT NULL,
    is_established INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_tunnels_node_addr ON tunnels(node_id, local_addr);
";

/// SQLite host parameter limit is 32766 on current builds; stay well below it.
const MAX_IDS_PER_STATEMENT: usize = 500;

pub struct SqliteNodeRegistry {
    conn: Mutex<Connection>,
    heartbeat_window: Duration,
}

impl SqliteNodeRegistry {
    /// Opens (creating if needed) the registry database at `db_path`.
    ///
    /// A node counts as reachable while its last heartbeat is younger than
    /// `heartbeat_window`.
    pub fn open(db_path: &Path, heartbeat_window: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(NODES_SCHEMA)?;
        conn.execute_batch(MONITORS_SCHEMA)?;
        conn.execute_batch(TUNNELS_SCHEMA)?;

        tracing::info!(path = %db_path.display(), "Initialized node registry");
        Ok(Self {
            conn: Mutex::new(conn),
            heartbeat_window,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a node. Existing bookkeeping is left untouched.
    pub fn upsert_node(&self, node_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO nodes (node_id, last_collected_at) VALUES (?1, NULL)
             ON CONFLICT(node_id) DO NOTHING",
            params![node_id],
        )?;
        Ok(())
    }

    pub fn record_heartbeat(
        &self,
        node_id: &str,
        is_login: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO monitors (node_id, is_login, heartbeat_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(node_id) DO UPDATE SET is_login = excluded.is_login,
                                                heartbeat_at = excluded.heartbeat_at",
            params![node_id, is_login, at.timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn register_tunnel(&self, tunnel: &Tunnel) -> Result<()> {
        self.conn().execute(
            "INSERT INTO tunnels (node_id, public_url, server, local_addr, established_at, is_established)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tunnel.node_id,
                tunnel.public_url,
                tunnel.server,
                tunnel.local_addr,
                tunnel.established_at.timestamp_millis(),
                tunnel.is_established,
            ],
        )?;
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.conn();
        let row: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_collected_at FROM nodes WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        row.map(|last| {
            Ok::<_, StorageError>(Node {
                id: node_id.to_string(),
                last_collected_at: last
                    .map(|ms| millis_to_datetime("last_collected_at", ms))
                    .transpose()?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl NodeRegistry for SqliteNodeRegistry {
    async fn list_reachable_nodes(&self) -> Result<Vec<String>> {
        let window_ms = i64::try_from(self.heartbeat_window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(window_ms);

        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT node_id FROM monitors
             WHERE is_login = 1 AND heartbeat_at > ?1
             ORDER BY node_id",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    async fn list_stale_nodes(
        &self,
        ids: &[String],
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        if ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let threshold = stale_before.timestamp_millis();
        let limit_param = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut candidates: Vec<(Option<i64>, String)> = Vec::new();

        let conn = self.conn();
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let sql = format!(
                "SELECT node_id, last_collected_at FROM nodes
                 WHERE node_id IN ({})
                   AND (last_collected_at IS NULL OR last_collected_at < ?1)
                 ORDER BY last_collected_at ASC, node_id ASC
                 LIMIT ?2",
                placeholders(chunk.len(), 3)
            );
            let values = [Value::Integer(threshold), Value::Integer(limit_param)]
                .into_iter()
                .chain(chunk.iter().map(|id| Value::Text(id.clone())));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, Option<i64>>(1)?, row.get::<_, String>(0)?))
            })?;
            for row in rows {
                candidates.push(row?);
            }
        }
        drop(conn);

        // None sorts before Some, so never-collected nodes lead.
        candidates.sort();
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(|(_, id)| id).collect())
    }

    async fn claim_collected(&self, ids: &[String], now: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now_ms = now.timestamp_millis();
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut updated = 0u64;
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let sql = format!(
                "UPDATE nodes SET last_collected_at = ?1 WHERE node_id IN ({})",
                placeholders(chunk.len(), 2)
            );
            let values = std::iter::once(Value::Integer(now_ms))
                .chain(chunk.iter().map(|id| Value::Text(id.clone())));
            updated += tx.execute(&sql, params_from_iter(values))? as u64;
        }
        tx.commit()?;
        Ok(updated)
    }

    async fn find_tunnel(&self, node_id: &str, local_addr: &str) -> Result<Option<Tunnel>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT node_id, public_url, server, local_addr, established_at, is_established
                 FROM tunnels
                 WHERE node_id = ?1 AND local_addr = ?2 AND is_established = 1
                 ORDER BY established_at DESC, id DESC
                 LIMIT 1",
                params![node_id, local_addr],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        row.map(
            |(node_id, public_url, server, local_addr, established_at, is_established)| {
                Ok::<_, StorageError>(Tunnel {
                    node_id,
                    public_url,
                    server,
                    local_addr,
                    established_at: millis_to_datetime("established_at", established_at)?,
                    is_established,
                })
            },
        )
        .transpose()
    }
}

/// `?start, ?start+1, ...` for an `IN (...)` list of `count` values.
fn placeholders(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn millis_to_datetime(column: &'static str, value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or(StorageError::InvalidTimestamp { column, value })
}

#[cfg(test)]
mod tests {
    use super::placeholders;

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(3, 2), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 1), "?1");
        assert_eq!(placeholders(0, 5), "");
    }
}
