use crate::storage::schema;
use duckdb::Connection;

type Apply = fn(&Connection) -> Result<(), duckdb::Error>;

/// Schema steps in version order. Applied steps are never edited, only appended to.
const MIGRATIONS: &[(u32, &str, Apply)] = &[
    (1, "hit and event tables", schema::init_schema),
    (2, "visitor lookup index", add_visitor_index),
];

/// Bring `conn` up to the latest schema version.
///
/// Each pending step runs in its own transaction together with its version row.
pub fn run_migrations(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL,
            name VARCHAR NOT NULL DEFAULT '',
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
    )?;

    let current = schema_version(conn)?;
    for (version, name, apply) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        conn.execute_batch("BEGIN TRANSACTION")?;
        let applied = apply(conn).and_then(|()| {
            conn.execute(
                "INSERT INTO schema_version (version, name) VALUES (?, ?)",
                duckdb::params![*version, *name],
            )
        });
        if let Err(e) = applied {
            conn.execute_batch("ROLLBACK")?;
            return Err(e);
        }
        conn.execute_batch("COMMIT")?;
        tracing::info!(version = *version, name = *name, "Applied schema migration");
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, duckdb::Error> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Serves the store's last-hit lookup for a visitor on a session cache miss.
fn add_visitor_index(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS hit_visitor_idx ON hit (client_id, fingerprint)")
}
