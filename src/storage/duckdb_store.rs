use crate::model::{Event, Hit, Session};
use crate::storage::schema::{HIT_INSERT_ARITY, HIT_INSERT_COLUMNS};
use crate::storage::{migrations, Row, Store, StoreError, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::Connection;
use parking_lot::Mutex;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// [`Store`] backed by a single DuckDB connection.
///
/// DuckDB serializes writers internally; the mutex keeps one statement in flight
/// per connection.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Open (or create) a database file, or an in-memory database for `None`,
    /// and bring its schema up to date.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(None)
    }
}

impl Store for DuckDbStore {
    fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError> {
        if hits.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let sql = format!(
                "INSERT INTO hit ({HIT_INSERT_COLUMNS}) VALUES ({})",
                placeholders(&hit_values(&hits[0]))
            );
            let mut stmt = tx.prepare(&sql)?;
            for hit in hits {
                let values: Vec<DuckValue> = hit_values(hit).iter().map(to_duck).collect();
                stmt.execute(duckdb::params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        tracing::debug!(count = hits.len(), "Saved hits");
        Ok(())
    }

    fn save_events(&self, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for event in events {
            let mut values = hit_values(&event.hit);
            values.push(Value::from(event.name.as_str()));
            values.push(Value::from(event.duration_seconds));
            let hit_part = placeholders(&values);
            values.extend(event.meta_keys().map(Value::from));
            values.extend(event.meta_values().map(Value::from));

            let list = string_list(event.meta.len());
            let sql = format!(
                "INSERT INTO event ({HIT_INSERT_COLUMNS}, event_name, event_duration_seconds, event_meta_keys, event_meta_values)
                 VALUES ({hit_part}, {list}, {list})"
            );
            let values: Vec<DuckValue> = values.iter().map(to_duck).collect();
            tx.execute(&sql, duckdb::params_from_iter(values.iter()))?;
        }
        tx.commit()?;

        tracing::debug!(count = events.len(), "Saved events");
        Ok(())
    }

    fn session(
        &self,
        client_id: i64,
        fingerprint: &str,
        max_age: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let row = self.get(
            "SELECT path, time, session FROM hit
             WHERE client_id = ? AND fingerprint = ? AND time >= CAST(? AS TIMESTAMP)
             ORDER BY time DESC
             LIMIT 1",
            &[
                Value::from(client_id),
                Value::from(fingerprint),
                Value::from(max_age),
            ],
        )?;

        row.map(|row| {
            Ok(Session {
                path: row.get_string(0)?,
                time: row.get_timestamp(1)?.and_utc(),
                session_start: row.get_timestamp(2)?.and_utc(),
            })
        })
        .transpose()
    }

    fn count(&self, query: &str, args: &[Value]) -> Result<u64, StoreError> {
        match self.get(query, args)? {
            Some(row) => row.get_u64(0),
            None => Ok(0),
        }
    }

    fn get(&self, query: &str, args: &[Value]) -> Result<Option<Row>, StoreError> {
        Ok(self.select(query, args)?.into_iter().next())
    }

    fn select(&self, query: &str, args: &[Value]) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(query)?;
        let params: Vec<DuckValue> = args.iter().map(to_duck).collect();
        let mut rows = stmt.query(duckdb::params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            // Column count is only known once the statement has run.
            let columns = row.as_ref().column_count();
            let values = (0..columns)
                .map(|i| row.get::<_, DuckValue>(i).map(from_duck))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(Row::new(values));
        }
        Ok(out)
    }
}

/// Insert values of a hit, in [`HIT_INSERT_COLUMNS`] order.
fn hit_values(hit: &Hit) -> Vec<Value> {
    let values = vec![
        Value::from(hit.client_id),
        Value::from(hit.fingerprint.as_str()),
        Value::from(hit.time),
        Value::from(hit.session),
        Value::from(hit.previous_time_on_page_seconds),
        Value::from(hit.path.as_str()),
        Value::from(hit.url.as_str()),
        Value::from(hit.title.as_str()),
        Value::from(hit.language.as_str()),
        Value::from(hit.country_code.as_str()),
        Value::from(hit.referrer.as_str()),
        Value::from(hit.referrer_name.as_str()),
        Value::from(hit.referrer_icon.as_str()),
        Value::from(hit.os.as_str()),
        Value::from(hit.os_version.as_str()),
        Value::from(hit.browser.as_str()),
        Value::from(hit.browser_version.as_str()),
        Value::from(hit.platform.is_desktop()),
        Value::from(hit.platform.is_mobile()),
        Value::from(hit.screen_width),
        Value::from(hit.screen_height),
        Value::from(hit.screen_class.as_str()),
        Value::from(hit.utm_source.as_str()),
        Value::from(hit.utm_medium.as_str()),
        Value::from(hit.utm_campaign.as_str()),
        Value::from(hit.utm_content.as_str()),
        Value::from(hit.utm_term.as_str()),
    ];
    debug_assert_eq!(values.len(), HIT_INSERT_ARITY);
    values
}

fn placeholders(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::placeholder)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A `VARCHAR[]` literal with `len` bound elements.
fn string_list(len: usize) -> String {
    if len == 0 {
        return "CAST([] AS VARCHAR[])".to_string();
    }
    format!("[{}]", vec!["CAST(? AS VARCHAR)"; len].join(", "))
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(v) => DuckValue::Boolean(*v),
        Value::Int(v) => DuckValue::BigInt(*v),
        Value::Float(v) => DuckValue::Double(*v),
        Value::Text(v) => DuckValue::Text(v.clone()),
        Value::Date(v) => DuckValue::Text(v.format("%Y-%m-%d").to_string()),
        Value::Timestamp(v) => DuckValue::Text(v.format(TIMESTAMP_FORMAT).to_string()),
        Value::List(items) => DuckValue::List(items.iter().map(to_duck).collect()),
    }
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Boolean(v) => Value::Bool(v),
        DuckValue::TinyInt(v) => Value::Int(v.into()),
        DuckValue::SmallInt(v) => Value::Int(v.into()),
        DuckValue::Int(v) => Value::Int(v.into()),
        DuckValue::BigInt(v) => Value::Int(v),
        DuckValue::HugeInt(v) => Value::Int(clamp_i128(v)),
        DuckValue::UTinyInt(v) => Value::Int(v.into()),
        DuckValue::USmallInt(v) => Value::Int(v.into()),
        DuckValue::UInt(v) => Value::Int(v.into()),
        DuckValue::UBigInt(v) => Value::Int(i64::try_from(v).unwrap_or(i64::MAX)),
        DuckValue::Float(v) => Value::Float(v.into()),
        DuckValue::Double(v) => Value::Float(v),
        DuckValue::Text(v) => Value::Text(v),
        DuckValue::Timestamp(unit, v) => timestamp(unit, v).map_or(Value::Null, Value::Timestamp),
        DuckValue::Date32(days) => date(days).map_or(Value::Null, Value::Date),
        DuckValue::List(items) => Value::List(items.into_iter().map(from_duck).collect()),
        _ => Value::Null,
    }
}

fn clamp_i128(v: i128) -> i64 {
    i64::try_from(v.clamp(i128::from(i64::MIN), i128::from(i64::MAX))).unwrap_or_default()
}

fn timestamp(unit: TimeUnit, v: i64) -> Option<NaiveDateTime> {
    let micros = match unit {
        TimeUnit::Second => v.checked_mul(1_000_000)?,
        TimeUnit::Millisecond => v.checked_mul(1_000)?,
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    };
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

fn date(days_since_epoch: i32) -> Option<NaiveDate> {
    // 719_163 days lie between 0001-01-01 and 1970-01-01.
    NaiveDate::from_num_days_from_ce_opt(days_since_epoch.checked_add(719_163)?)
}
