//! Tunnel liveness backed by the relay's published set of live URLs.
//!
//! Each relay server keeps the public URLs it currently forwards in its own
//! set; a tunnel is alive when its URL is a member of its server's set.

use async_trait::async_trait;
use fleetmon_common::types::Tunnel;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::LivenessOracle;

const LIVE_TUNNELS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS live_tunnels (
    server TEXT NOT NULL,
    public_url TEXT NOT NULL,
    PRIMARY KEY (server, public_url)
);
";

pub struct SqliteLivenessOracle {
    conn: Mutex<Connection>,
}

impl SqliteLivenessOracle {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(LIVE_TUNNELS_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_alive(&self, server: &str, public_url: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO live_tunnels (server, public_url) VALUES (?1, ?2)",
            params![server, public_url],
        )?;
        Ok(())
    }

    pub fn mark_dead(&self, server: &str, public_url: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM live_tunnels WHERE server = ?1 AND public_url = ?2",
            params![server, public_url],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LivenessOracle for SqliteLivenessOracle {
    async fn is_tunnel_alive(&self, tunnel: &Tunnel) -> Result<bool> {
        let alive: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM live_tunnels WHERE server = ?1 AND public_url = ?2)",
            params![tunnel.server, tunnel.public_url],
            |row| row.get(0),
        )?;
        Ok(alive)
    }
}
