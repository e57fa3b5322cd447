use crate::trend::Observation;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub trait HistorySource {
    /// The most recent `limit` observations for `entity_id`, oldest first.
    fn fetch_window(&self, entity_id: &str, limit: usize) -> Result<Vec<Observation>>;
}

/// Reads a Home Assistant recorder database (SQLite) read-only.
#[derive(Debug, Clone)]
pub struct RecorderDb {
    path: PathBuf,
    busy_timeout: Duration,
}

impl RecorderDb {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open recorder db {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)
            .context("failed to set recorder busy timeout")?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistorySource for RecorderDb {
    fn fetch_window(&self, entity_id: &str, limit: usize) -> Result<Vec<Observation>> {
        let conn = self.open()?;

        // Recorder schema 41+ moved entity ids into states_meta.
        let has_states_meta: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'states_meta'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to inspect recorder schema")?;

        let sql = if has_states_meta.is_some() {
            r#"
            SELECT s.last_updated_ts, s.state
            FROM states s
            JOIN states_meta m ON m.metadata_id = s.metadata_id
            WHERE m.entity_id = ?1
              AND s.last_updated_ts IS NOT NULL
            ORDER BY s.last_updated_ts DESC
            LIMIT ?2
            "#
        } else {
            r#"
            SELECT last_updated_ts, state
            FROM states
            WHERE entity_id = ?1
              AND last_updated_ts IS NOT NULL
            ORDER BY last_updated_ts DESC
            LIMIT ?2
            "#
        };

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(sql).context("failed to prepare history query")?;
        let rows = stmt
            .query_map(params![entity_id, limit], |row| {
                Ok((row.get::<_, f64>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .with_context(|| format!("failed to query history for {entity_id}"))?;

        let mut observations = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let (timestamp, state) = row.context("failed to read history row")?;
            match state.as_deref().and_then(parse_state) {
                Some(voltage) => observations.push(Observation::new(timestamp, voltage)),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(entity_id, skipped, "skipped non-numeric states");
        }

        observations.reverse();
        Ok(observations)
    }
}

/// Recorder states are text; `unknown`/`unavailable` and friends are not readings.
fn parse_state(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn modern_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("home-assistant_v2.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE states_meta (metadata_id INTEGER PRIMARY KEY, entity_id VARCHAR(255));
            CREATE TABLE states (
                state_id INTEGER PRIMARY KEY,
                entity_id VARCHAR(255),
                state VARCHAR(255),
                last_updated_ts FLOAT,
                metadata_id INTEGER
            );
            INSERT INTO states_meta (metadata_id, entity_id) VALUES (1, 'sensor.battery'), (2, 'sensor.other');
            "#,
        )
        .unwrap();
        let rows: &[(f64, &str, i64)] = &[
            (100.0, "12.90", 1),
            (200.0, "12.80", 1),
            (250.0, "99.0", 2),
            (300.0, "unavailable", 1),
            (400.0, "12.70", 1),
            (500.0, "12.60", 1),
        ];
        for (ts, state, meta) in rows {
            conn.execute(
                "INSERT INTO states (state, last_updated_ts, metadata_id) VALUES (?1, ?2, ?3)",
                params![state, ts, meta],
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn returns_numeric_rows_oldest_first() {
        let dir = TempDir::new().unwrap();
        let db = RecorderDb::new(modern_db(&dir), Duration::from_secs(1));
        let obs = db.fetch_window("sensor.battery", 100).unwrap();
        assert_eq!(
            obs,
            vec![
                Observation::new(100.0, 12.9),
                Observation::new(200.0, 12.8),
                Observation::new(400.0, 12.7),
                Observation::new(500.0, 12.6),
            ]
        );
    }

    #[test]
    fn limit_keeps_most_recent_rows() {
        let dir = TempDir::new().unwrap();
        let db = RecorderDb::new(modern_db(&dir), Duration::from_secs(1));
        let obs = db.fetch_window("sensor.battery", 2).unwrap();
        assert_eq!(
            obs,
            vec![Observation::new(400.0, 12.7), Observation::new(500.0, 12.6)]
        );
    }

    #[test]
    fn unknown_entity_yields_empty_window() {
        let dir = TempDir::new().unwrap();
        let db = RecorderDb::new(modern_db(&dir), Duration::from_secs(1));
        assert!(db.fetch_window("sensor.missing", 10).unwrap().is_empty());
    }

    #[test]
    fn reads_legacy_schema_without_states_meta() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE states (
                state_id INTEGER PRIMARY KEY,
                entity_id VARCHAR(255),
                state VARCHAR(255),
                last_updated_ts FLOAT
            );
            INSERT INTO states (entity_id, state, last_updated_ts) VALUES
                ('sensor.battery', '13.1', 10.0),
                ('sensor.battery', '13.0', 20.0);
            "#,
        )
        .unwrap();
        drop(conn);

        let db = RecorderDb::new(&path, Duration::from_secs(1));
        let obs = db.fetch_window("sensor.battery", 10).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0], Observation::new(10.0, 13.1));
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = TempDir::new().unwrap();
        let db = RecorderDb::new(dir.path().join("nope.db"), Duration::from_secs(1));
        assert!(db.fetch_window("sensor.battery", 10).is_err());
    }

    #[test]
    fn parse_state_rejects_non_numeric() {
        assert_eq!(parse_state(" 12.5 "), Some(12.5));
        assert_eq!(parse_state("unknown"), None);
        assert_eq!(parse_state(""), None);
        assert_eq!(parse_state("NaN"), None);
    }
}
