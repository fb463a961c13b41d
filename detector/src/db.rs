use radiograph_common::report::BrightPixel;
use rusqlite::{params, Connection, Result as SqlResult};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// SQLite log of every confirmed capture.
///
/// WAL mode lets the HTTP handlers read while the observer task appends.
pub struct CaptureDb {
    conn: Mutex<Connection>,
}

/// A capture about to be logged.
#[derive(Debug, Clone)]
pub struct NewCapture<'a> {
    pub captured_at_ms: i64,
    pub file_name: &'a str,
    pub max_luminosity: u8,
    pub average_luminosity: f64,
    pub bright_pixels: &'a [BrightPixel],
    pub report_sequence: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureRecord {
    pub id: i64,
    pub captured_at_ms: i64,
    pub file_name: String,
    pub max_luminosity: u8,
    pub average_luminosity: f64,
    pub bright_pixels: Vec<BrightPixel>,
    pub report_sequence: i64,
}

impl CaptureDb {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> SqlResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|_e| rusqlite::Error::InvalidPath(dir.into()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.display(), "capture database opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS captures (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at_ms     INTEGER NOT NULL,
                file_name          TEXT    NOT NULL,
                max_luminosity     INTEGER NOT NULL,
                average_luminosity REAL    NOT NULL,
                bright_pixels      TEXT    NOT NULL DEFAULT '[]',
                report_sequence    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_captures_time
                ON captures(captured_at_ms);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_capture(&self, capture: &NewCapture<'_>) -> SqlResult<i64> {
        let pixels = serde_json::to_string(capture.bright_pixels)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO captures
                (captured_at_ms, file_name, max_luminosity, average_luminosity, bright_pixels, report_sequence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                capture.captured_at_ms,
                capture.file_name,
                capture.max_luminosity,
                capture.average_luminosity,
                pixels,
                capture.report_sequence as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, file_name = capture.file_name, "capture logged");
        Ok(id)
    }

    /// Captures at or after `since_ms`, newest first.
    pub fn list_captures(&self, since_ms: i64, limit: usize) -> SqlResult<Vec<CaptureRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, captured_at_ms, file_name, max_luminosity, average_luminosity,
                    bright_pixels, report_sequence
             FROM captures
             WHERE captured_at_ms >= ?1
             ORDER BY captured_at_ms DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since_ms, limit as i64], |row| {
            let pixels_raw: String = row.get(5)?;
            Ok(CaptureRecord {
                id: row.get(0)?,
                captured_at_ms: row.get(1)?,
                file_name: row.get(2)?,
                max_luminosity: row.get(3)?,
                average_luminosity: row.get(4)?,
                bright_pixels: serde_json::from_str(&pixels_raw).unwrap_or_default(),
                report_sequence: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    #[cfg(test)]
    pub fn count(&self) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row("SELECT COUNT(*) FROM captures", [], |row| row.get(0))
    }
}
