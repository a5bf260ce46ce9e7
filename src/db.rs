use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "sabe.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS localities(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id INTEGER PRIMARY KEY,
            inep TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            address TEXT,
            district TEXT,
            manager TEXT,
            phone TEXT,
            locality_id INTEGER NOT NULL,
            extra_json TEXT,
            FOREIGN KEY(locality_id) REFERENCES localities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_locality ON schools(locality_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            education_level TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS performances(
            id TEXT PRIMARY KEY,
            school_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            students_expected INTEGER NOT NULL,
            students_assessed INTEGER NOT NULL,
            assessed_pct REAL NOT NULL,
            mean_proficiency REAL NOT NULL,
            below_basic REAL NOT NULL DEFAULT 0,
            basic REAL NOT NULL DEFAULT 0,
            adequate REAL NOT NULL DEFAULT 0,
            advanced REAL NOT NULL DEFAULT 0,
            participation_rate REAL,
            target REAL,
            yoy_variation REAL,
            municipal_rank INTEGER,
            notes TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(school_id, year, subject_id, grade_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_performances_school ON performances(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_performances_year ON performances(year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS municipal_targets(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            grade_id TEXT NOT NULL,
            target_proficiency REAL NOT NULL,
            target_adequate_advanced_pct REAL NOT NULL,
            description TEXT,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(year, subject_id, grade_id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
