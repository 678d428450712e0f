use crate::error::Error;
use crate::filter::render::Sql;
use crate::filter::{CompiledFilter, Filter, Table};
use crate::query::{cte, ratio, with_base, Analyzer};
use crate::storage::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventStats {
    pub name: String,
    pub visitors: u64,
    pub views: u64,
    /// Share of all page visitors who triggered the event.
    pub cr: f64,
    pub average_duration_seconds: u64,
    /// Distinct metadata keys seen on the event, sorted.
    pub meta_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBreakdownStats {
    pub name: String,
    pub meta_value: String,
    pub visitors: u64,
    pub views: u64,
    pub cr: f64,
    pub average_duration_seconds: u64,
}

/// `WITH base AS (events), hits AS (page views)` for one compiled filter.
///
/// Page views ignore the event clauses and act as the conversion base.
fn with_events(compiled: &CompiledFilter) -> Sql {
    let mut sql = with_base(compiled, Table::Event, &compiled.clauses);
    sql.push(", ").append(cte(
        "hits",
        Table::Hit,
        &compiled.local_time,
        &compiled.without_event(),
    ));
    sql
}

impl Analyzer {
    /// Statistics per event name, ordered by visitors.
    pub fn events(&self, filter: &Filter) -> Result<Vec<EventStats>, Error> {
        let compiled = filter.compile();

        let mut sql = with_events(&compiled);
        sql.push(
            " SELECT event_name,
                     count(DISTINCT fingerprint) AS visitors,
                     count(*) AS views,
                     CAST(floor(avg(event_duration_seconds)) AS BIGINT),
                     (SELECT count(DISTINCT fingerprint) FROM hits)
              FROM base
              GROUP BY event_name
              ORDER BY visitors DESC, event_name",
        );
        compiled.render_limit(&mut sql);
        let rows = self.store.select(sql.text(), sql.args())?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut meta_keys = self.event_meta_keys(&compiled)?;
        let stats = rows
            .iter()
            .map(|row| {
                let name = row.get_string(0)?;
                let visitors = row.get_u64(1)?;
                Ok(EventStats {
                    meta_keys: meta_keys.remove(&name).unwrap_or_default(),
                    name,
                    visitors,
                    views: row.get_u64(2)?,
                    cr: ratio(visitors, row.get_u64(4)?),
                    average_duration_seconds: row.get_u64(3)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    fn event_meta_keys(
        &self,
        compiled: &CompiledFilter,
    ) -> Result<BTreeMap<String, Vec<String>>, Error> {
        let mut sql = with_base(compiled, Table::Event, &compiled.clauses);
        sql.push(
            " SELECT DISTINCT event_name, meta_key
              FROM (SELECT event_name, unnest(event_meta_keys) AS meta_key FROM base)
              ORDER BY 1, 2",
        );
        let mut keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in self.store.select(sql.text(), sql.args())? {
            keys.entry(row.get_string(0)?)
                .or_default()
                .push(row.get_string(1)?);
        }
        Ok(keys)
    }

    /// Statistics per value of `filter.event_meta_key` for `filter.event_name`.
    ///
    /// Both must be set; otherwise the result is empty.
    pub fn event_breakdown(&self, filter: &Filter) -> Result<Vec<EventBreakdownStats>, Error> {
        if filter.event_name.is_empty() || filter.event_meta_key.is_empty() {
            return Ok(Vec::new());
        }
        let compiled = filter.compile();

        let mut sql = with_events(&compiled);
        sql.push(
            ", breakdown AS (SELECT *, event_meta_values[list_position(event_meta_keys, CAST(",
        )
        .bind(filter.event_meta_key.as_str())
        .push(
            " AS VARCHAR))] AS meta_value FROM base)
              SELECT event_name, meta_value,
                     count(DISTINCT fingerprint) AS visitors,
                     count(*) AS views,
                     CAST(floor(avg(event_duration_seconds)) AS BIGINT),
                     (SELECT count(DISTINCT fingerprint) FROM hits)
              FROM breakdown
              GROUP BY event_name, meta_value
              ORDER BY visitors DESC, meta_value",
        );
        compiled.render_limit(&mut sql);

        let stats = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(2)?;
                Ok(EventBreakdownStats {
                    name: row.get_string(0)?,
                    meta_value: row.get_string(1)?,
                    visitors,
                    views: row.get_u64(3)?,
                    cr: ratio(visitors, row.get_u64(5)?),
                    average_duration_seconds: row.get_u64(4)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }
}
