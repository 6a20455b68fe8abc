//! SQLite persistence for window averages.
//!
//! One row per window, columns in a fixed order: timestamp, the three CF=1
//! concentrations, the three atmospheric concentrations, the six count
//! bins, temperature and humidity.

use crate::core::windowing::WindowResult;
use crate::core::WindowSink;
use crate::protocol::Particulates;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Timestamp format used in the `timestamp` column (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default table name.
pub const DEFAULT_TABLE: &str = "living";

const COLUMNS: [&str; 15] = [
    "timestamp",
    "pm1_0_cf1",
    "pm2_5_cf1",
    "pm10_cf1",
    "pm1_0_atm",
    "pm2_5_atm",
    "pm10_atm",
    "count_0_3um",
    "count_0_5um",
    "count_1_0um",
    "count_2_5um",
    "count_5_0um",
    "count_10um",
    "temperature_c",
    "humidity_percent",
];

/// A persisted window row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub particulates: Particulates,
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
}

/// Database handle bound to one readings table.
pub struct Database {
    conn: Connection,
    table: String,
}

impl Database {
    /// Open (or create) the database file and ensure the table exists.
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn, table)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        let db = Self {
            conn,
            table: table.to_string(),
        };
        db.init_schema()?;
        info!(
            "Connected! Database version: SQLite {}",
            db.engine_version()?
        );
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let table = &self.table;
        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                pm1_0_cf1 INTEGER NOT NULL,
                pm2_5_cf1 INTEGER NOT NULL,
                pm10_cf1 INTEGER NOT NULL,
                pm1_0_atm INTEGER NOT NULL,
                pm2_5_atm INTEGER NOT NULL,
                pm10_atm INTEGER NOT NULL,
                count_0_3um INTEGER NOT NULL,
                count_0_5um INTEGER NOT NULL,
                count_1_0um INTEGER NOT NULL,
                count_2_5um INTEGER NOT NULL,
                count_5_0um INTEGER NOT NULL,
                count_10um INTEGER NOT NULL,
                temperature_c REAL,
                humidity_percent REAL
            );

            CREATE INDEX IF NOT EXISTS idx_{table}_timestamp
            ON {table}(timestamp);
            ",
        ))?;
        Ok(())
    }

    /// Version string of the SQLite engine.
    pub fn engine_version(&self) -> Result<String, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
    }

    /// Table the handle writes to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert one window in its own transaction.
    ///
    /// On failure the transaction is rolled back and the error returned.
    pub fn insert(&mut self, result: &WindowResult) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            self.table,
            COLUMNS.join(", ")
        );
        let timestamp = result.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let p = &result.particulates;
        debug!(%timestamp, "{sql}");

        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            &sql,
            params![
                timestamp,
                p.pm1_0_cf1,
                p.pm2_5_cf1,
                p.pm10_cf1,
                p.pm1_0_atm,
                p.pm2_5_atm,
                p.pm10_atm,
                p.count_0_3um,
                p.count_0_5um,
                p.count_1_0um,
                p.count_2_5um,
                p.count_5_0um,
                p.count_10um,
                result.temperature_c,
                result.humidity_percent,
            ],
        );

        match inserted {
            Ok(_) => {
                tx.commit()?;
                debug!("data committed");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    error!("rollback failed: {rollback}");
                }
                error!("insert into {} failed, rolled back: {e}", self.table);
                Err(StoreError::Sqlite(e.to_string()))
            }
        }
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Timestamp of the most recent row, if any.
    pub fn last_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT timestamp FROM {} ORDER BY timestamp DESC, id DESC LIMIT 1",
            self.table
        ))?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(parse_timestamp(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY id",
            COLUMNS.join(", "),
            self.table
        ))?;
        let raw_rows = stmt.query_map([], RawRow::from_row)?;

        let mut rows = Vec::new();
        for raw in raw_rows {
            rows.push(raw?.into_stored()?);
        }
        Ok(rows)
    }

    /// Write all rows as CSV. Returns the number of rows written.
    pub fn export_csv<W: Write>(&self, out: &mut W) -> Result<usize, StoreError> {
        let io = |e: std::io::Error| StoreError::Io(e.to_string());

        writeln!(out, "{}", COLUMNS.join(",")).map_err(io)?;
        let rows = self.rows()?;
        for row in &rows {
            let fields: Vec<String> = row
                .particulates
                .to_array()
                .iter()
                .map(|v| v.to_string())
                .collect();
            writeln!(
                out,
                "{},{},{},{}",
                row.timestamp.format(TIMESTAMP_FORMAT),
                fields.join(","),
                optional_field(row.temperature_c),
                optional_field(row.humidity_percent)
            )
            .map_err(io)?;
        }
        Ok(rows.len())
    }
}

impl WindowSink for Database {
    type Error = StoreError;

    fn persist(&mut self, result: &WindowResult) -> Result<(), StoreError> {
        self.insert(result)
    }
}

/// Row as read from SQLite, before timestamp parsing.
struct RawRow {
    timestamp: String,
    fields: [u16; Particulates::FIELD_COUNT],
    temperature_c: Option<f64>,
    humidity_percent: Option<f64>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut fields = [0u16; Particulates::FIELD_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = row.get(i + 1)?;
        }
        Ok(Self {
            timestamp: row.get(0)?,
            fields,
            temperature_c: row.get(13)?,
            humidity_percent: row.get(14)?,
        })
    }

    fn into_stored(self) -> Result<StoredRow, StoreError> {
        Ok(StoredRow {
            timestamp: parse_timestamp(&self.timestamp)?,
            particulates: Particulates::from_array(self.fields),
            temperature_c: self.temperature_c,
            humidity_percent: self.humidity_percent,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn optional_field(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_default()
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

/// Storage errors.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(String),
    Io(String),
    InvalidTable(String),
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "Database error: {e}"),
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::InvalidTable(t) => write!(f, "Invalid table name: '{t}'"),
            StoreError::Corrupt(e) => write!(f, "Corrupt row: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result_at(secs: u32, value: u16, env: Option<(f64, f64)>) -> WindowResult {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap();
        WindowResult {
            timestamp,
            window_start: timestamp,
            particulates: Particulates::from_array([value; Particulates::FIELD_COUNT]),
            temperature_c: env.map(|(t, _)| t),
            humidity_percent: env.map(|(_, h)| h),
            samples: 49,
            env_samples: u32::from(env.is_some()),
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let mut db = Database::open_in_memory(DEFAULT_TABLE).unwrap();
        db.insert(&result_at(5, 12, Some((21.4, 48.0)))).unwrap();
        db.insert(&result_at(10, 13, None)).unwrap();

        assert_eq!(db.count().unwrap(), 2);
        let rows = db.rows().unwrap();
        assert_eq!(rows[0].particulates.pm2_5_cf1, 12);
        assert_eq!(rows[0].temperature_c, Some(21.4));
        assert_eq!(rows[1].particulates.count_10um, 13);
        assert_eq!(rows[1].humidity_percent, None);
        assert_eq!(
            db.last_timestamp().unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 10).unwrap())
        );
    }

    #[test]
    fn test_empty_table() {
        let db = Database::open_in_memory("kitchen").unwrap();
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.last_timestamp().unwrap(), None);
    }

    #[test]
    fn test_invalid_table_rejected() {
        assert!(matches!(
            Database::open_in_memory("living; DROP TABLE x"),
            Err(StoreError::InvalidTable(_))
        ));
        assert!(Database::open_in_memory("1living").is_err());
        assert!(Database::open_in_memory("").is_err());
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let mut db = Database::open_in_memory(DEFAULT_TABLE).unwrap();
        db.insert(&result_at(5, 1, None)).unwrap();
        db.conn.execute_batch("DROP TABLE living").unwrap();

        assert!(matches!(
            db.insert(&result_at(10, 2, None)),
            Err(StoreError::Sqlite(_))
        ));
        // The connection is usable again after the rollback.
        db.init_schema().unwrap();
        db.insert(&result_at(15, 3, None)).unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_export_csv() {
        let mut db = Database::open_in_memory(DEFAULT_TABLE).unwrap();
        db.insert(&result_at(5, 7, Some((20.0, 50.5)))).unwrap();
        db.insert(&result_at(10, 8, None)).unwrap();

        let mut out = Vec::new();
        assert_eq!(db.export_csv(&mut out).unwrap(), 2);

        let csv = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,pm1_0_cf1"));
        assert!(lines[1].starts_with("2024-03-01 12:00:05,7,7"));
        assert!(lines[1].ends_with(",20.0,50.5"));
        assert!(lines[2].ends_with(",8,,"));
    }

    #[test]
    fn test_open_creates_file() {
        let path = std::env::temp_dir()
            .join("pms-logger-store-test")
            .join(format!("{}.db", uuid::Uuid::new_v4()));

        {
            let mut db = Database::open(&path, DEFAULT_TABLE).unwrap();
            db.insert(&result_at(5, 1, None)).unwrap();
        }

        let db = Database::open(&path, DEFAULT_TABLE).unwrap();
        assert_eq!(db.count().unwrap(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
