use duckdb::Connection;

/// Columns shared by the `hit` and `event` tables.
const HIT_COLUMNS: &str = r"
    client_id                       BIGINT NOT NULL,
    fingerprint                     VARCHAR NOT NULL,
    time                            TIMESTAMP NOT NULL,
    session                         TIMESTAMP NOT NULL,
    previous_time_on_page_seconds   INTEGER NOT NULL DEFAULT 0,
    path                            VARCHAR NOT NULL DEFAULT '',
    url                             VARCHAR NOT NULL DEFAULT '',
    title                           VARCHAR NOT NULL DEFAULT '',
    language                        VARCHAR NOT NULL DEFAULT '',
    country_code                    VARCHAR NOT NULL DEFAULT '',
    referrer                        VARCHAR NOT NULL DEFAULT '',
    referrer_name                   VARCHAR NOT NULL DEFAULT '',
    referrer_icon                   VARCHAR NOT NULL DEFAULT '',
    os                              VARCHAR NOT NULL DEFAULT '',
    os_version                      VARCHAR NOT NULL DEFAULT '',
    browser                         VARCHAR NOT NULL DEFAULT '',
    browser_version                 VARCHAR NOT NULL DEFAULT '',
    desktop                         BOOLEAN NOT NULL DEFAULT false,
    mobile                          BOOLEAN NOT NULL DEFAULT false,
    screen_width                    INTEGER NOT NULL DEFAULT 0,
    screen_height                   INTEGER NOT NULL DEFAULT 0,
    screen_class                    VARCHAR NOT NULL DEFAULT '',
    utm_source                      VARCHAR NOT NULL DEFAULT '',
    utm_medium                      VARCHAR NOT NULL DEFAULT '',
    utm_campaign                    VARCHAR NOT NULL DEFAULT '',
    utm_content                     VARCHAR NOT NULL DEFAULT '',
    utm_term                        VARCHAR NOT NULL DEFAULT ''";

/// Column list used by inserts, in table order.
pub const HIT_INSERT_COLUMNS: &str = "client_id, fingerprint, time, session, \
    previous_time_on_page_seconds, path, url, title, language, country_code, referrer, \
    referrer_name, referrer_icon, os, os_version, browser, browser_version, desktop, mobile, \
    screen_width, screen_height, screen_class, utm_source, utm_medium, utm_campaign, \
    utm_content, utm_term";

pub const HIT_INSERT_ARITY: usize = 27;

/// Create the page-view table.
pub fn create_hit_table_sql() -> String {
    format!("CREATE TABLE IF NOT EXISTS hit ({HIT_COLUMNS}\n)")
}

/// Create the custom event table. Meta keys and values are parallel lists.
pub fn create_event_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS event ({HIT_COLUMNS},
    event_name                      VARCHAR NOT NULL,
    event_duration_seconds          INTEGER NOT NULL DEFAULT 0,
    event_meta_keys                 VARCHAR[] NOT NULL,
    event_meta_values               VARCHAR[] NOT NULL
)"
    )
}

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(&create_hit_table_sql())?;
    conn.execute_batch(&create_event_table_sql())?;
    Ok(())
}
