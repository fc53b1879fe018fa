// Fixtures for unit tests: the tables the write side maintains, and helpers to fill them
use crate::{JobCatalog, JobMethod};

use rusqlite::{params, Connection};

pub(crate) const SCHEMA: &str = r"
CREATE TABLE jobby_job (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state_id INTEGER,
    state_name TEXT,
    invocation_data TEXT,
    arguments TEXT,
    created_at INTEGER NOT NULL,
    expire_at INTEGER
);
CREATE INDEX jobby_job_state_name ON jobby_job (state_name, id);

CREATE TABLE jobby_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    reason TEXT,
    created_at INTEGER NOT NULL,
    data TEXT
);
CREATE INDEX jobby_state_job_id ON jobby_state (job_id);

CREATE TABLE jobby_job_parameter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    value TEXT
);

CREATE TABLE jobby_counter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value INTEGER NOT NULL,
    expire_at INTEGER
);

CREATE TABLE jobby_aggregated_counter (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL,
    expire_at INTEGER
);

CREATE TABLE jobby_set (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    score REAL NOT NULL DEFAULT 0,
    value TEXT NOT NULL,
    expire_at INTEGER,
    UNIQUE (key, value)
);

CREATE TABLE jobby_server (
    id TEXT PRIMARY KEY,
    data TEXT,
    last_heartbeat INTEGER
);

CREATE TABLE jobby_job_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    queue TEXT NOT NULL,
    fetched_at INTEGER
);
";

pub(crate) const CREATED_AT: i64 = 1_700_000_000_000;

pub(crate) const DESCRIPTOR: &str =
    r#"{"Type":"Mailer","Method":"Send","ParameterTypes":"[\"System.String\"]"}"#;
pub(crate) const ARGUMENTS: &str = r#"["\"hi@example.com\""]"#;
pub(crate) const MISSING_DESCRIPTOR: &str =
    r#"{"Type":"Mailer","Method":"Deleted","ParameterTypes":"[]"}"#;

pub(crate) fn catalog() -> JobCatalog {
    JobCatalog::new([JobMethod::new("Mailer", "Send", &["System.String"])])
}

pub(crate) fn connection() -> Connection {
    let connection = Connection::open_in_memory().unwrap();
    connection.execute_batch(SCHEMA).unwrap();
    connection
}

pub(crate) fn insert_job(
    connection: &Connection,
    invocation_data: Option<&str>,
    arguments: Option<&str>,
) -> i64 {
    connection
        .execute(
            "INSERT INTO jobby_job (invocation_data, arguments, created_at) VALUES (?1, ?2, ?3)",
            params![invocation_data, arguments, CREATED_AT],
        )
        .unwrap();
    connection.last_insert_rowid()
}

// Appends a state transition and points the job at it
pub(crate) fn add_state(
    connection: &Connection,
    job_id: i64,
    name: &str,
    reason: Option<&str>,
    data: Option<&str>,
) -> i64 {
    connection
        .execute(
            "INSERT INTO jobby_state (job_id, name, reason, created_at, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, name, reason, CREATED_AT, data],
        )
        .unwrap();
    let state_id = connection.last_insert_rowid();
    connection
        .execute(
            "UPDATE jobby_job SET state_id = ?1, state_name = ?2 WHERE id = ?3",
            params![state_id, name, job_id],
        )
        .unwrap();
    state_id
}

pub(crate) fn job_in_state(connection: &Connection, name: &str, data: Option<&str>) -> i64 {
    let job_id = insert_job(connection, Some(DESCRIPTOR), Some(ARGUMENTS));
    add_state(connection, job_id, name, None, data);
    job_id
}

pub(crate) fn insert_parameter(connection: &Connection, job_id: i64, name: &str, value: &str) {
    connection
        .execute(
            "INSERT INTO jobby_job_parameter (job_id, name, value) VALUES (?1, ?2, ?3)",
            params![job_id, name, value],
        )
        .unwrap();
}

pub(crate) fn insert_counter(connection: &Connection, key: &str, value: i64) {
    connection
        .execute(
            "INSERT INTO jobby_counter (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .unwrap();
}

pub(crate) fn insert_aggregated_counter(connection: &Connection, key: &str, value: i64) {
    connection
        .execute(
            "INSERT INTO jobby_aggregated_counter (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .unwrap();
}

pub(crate) fn insert_set_member(connection: &Connection, key: &str, value: &str) {
    connection
        .execute(
            "INSERT INTO jobby_set (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .unwrap();
}

pub(crate) fn insert_server(
    connection: &Connection,
    id: &str,
    data: Option<&str>,
    last_heartbeat: Option<i64>,
) {
    connection
        .execute(
            "INSERT INTO jobby_server (id, data, last_heartbeat) VALUES (?1, ?2, ?3)",
            params![id, data, last_heartbeat],
        )
        .unwrap();
}

pub(crate) fn enqueue(
    connection: &Connection,
    table: &str,
    job_id: i64,
    queue: &str,
    fetched_at: Option<i64>,
) {
    connection
        .execute(
            &format!("INSERT INTO {table} (job_id, queue, fetched_at) VALUES (?1, ?2, ?3)"),
            params![job_id, queue, fetched_at],
        )
        .unwrap();
}

pub(crate) fn create_queue_table(connection: &Connection, table: &str) {
    connection
        .execute_batch(&format!(
            "CREATE TABLE {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                queue TEXT NOT NULL,
                fetched_at INTEGER
            );"
        ))
        .unwrap();
}
