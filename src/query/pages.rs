use crate::error::Error;
use crate::filter::render::Sql;
use crate::filter::{CompiledFilter, Filter};
use crate::query::visitors::TimeSpentStats;
use crate::query::{fill_days, predicate, ratio, with_base, Analyzer};
use crate::storage::{Row, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub relative_visitors: f64,
    pub sessions: u64,
    pub views: u64,
    pub relative_views: f64,
    pub bounces: u64,
    pub bounce_rate: f64,
    pub average_time_spent_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub entries: u64,
    pub average_time_spent_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
    pub exits: u64,
    pub exit_rate: f64,
    pub average_time_spent_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageConversionsStats {
    pub visitors: u64,
    pub views: u64,
    pub cr: f64,
}

/// Hits of each session in visit order, with the page seen before each hit.
const ORDERED_CTE: &str = ", ordered AS (
    SELECT *,
           row_number() OVER (PARTITION BY session_key ORDER BY time, path) AS entry_position,
           row_number() OVER (PARTITION BY session_key ORDER BY time DESC, path DESC) AS exit_position,
           lag(path) OVER (PARTITION BY session_key ORDER BY time, path) AS previous_path,
           lag(title) OVER (PARTITION BY session_key ORDER BY time, path) AS previous_title
    FROM base)";

/// Where the optional title column goes in a page query.
#[derive(Clone, Copy)]
struct Title(bool);

impl Title {
    const fn column(self) -> &'static str {
        if self.0 {
            ", title"
        } else {
            ""
        }
    }

    const fn qualified(self) -> &'static str {
        if self.0 {
            ", p.title"
        } else {
            ""
        }
    }

    /// Join condition on the title when it is part of the grouping.
    const fn join(self) -> &'static str {
        if self.0 {
            " AND t.title = p.title"
        } else {
            ""
        }
    }

    /// Index of column `i` counted as if there were no title column.
    const fn shift(self, i: usize) -> usize {
        if self.0 {
            i + 1
        } else {
            i
        }
    }

    fn read(self, row: &Row) -> Result<String, StoreError> {
        if self.0 {
            row.get_string(1)
        } else {
            Ok(String::new())
        }
    }
}

/// Base over the filter without its path clauses.
fn sequence_base(compiled: &CompiledFilter) -> Sql {
    with_base(compiled, compiled.table, &compiled.without_path())
}

/// Time-on-page samples attributed to the page they were spent on.
///
/// Each sample is clamped to `max_seconds` when that is set.
fn push_samples(sql: &mut Sql, max_seconds: u32) {
    sql.push(ORDERED_CTE)
        .push(", samples AS (SELECT previous_path AS path, previous_title AS title, local_time, ");
    if max_seconds > 0 {
        sql.push("least(previous_time_on_page_seconds, CAST(")
            .bind(max_seconds)
            .push(" AS INTEGER))");
    } else {
        sql.push("previous_time_on_page_seconds");
    }
    sql.push(
        " AS seconds FROM ordered
          WHERE previous_path IS NOT NULL AND previous_time_on_page_seconds > 0)",
    );
}

/// Average time per page from the samples, restricted by the path clauses.
fn push_times(sql: &mut Sql, compiled: &CompiledFilter, title: Title) {
    sql.push(", times AS (SELECT path")
        .push(title.column())
        .push(", CAST(floor(avg(seconds)) AS BIGINT) AS average FROM samples WHERE ")
        .append(predicate(&compiled.path_clauses()))
        .push(" GROUP BY path")
        .push(title.column())
        .push(")");
}

/// Optional join to the `times` CTE and the average column it provides.
fn push_average(sql: &mut Sql, include: bool, title: Title) {
    if include {
        sql.push(", coalesce(t.average, 0) FROM page_rows p LEFT JOIN times t ON t.path = p.path")
            .push(title.join());
    } else {
        sql.push(", 0 FROM page_rows p");
    }
}

impl Analyzer {
    /// Statistics per page (and title), ordered by visitors.
    ///
    /// Relative values are measured against the filter without its path clauses.
    pub fn pages(&self, filter: &Filter) -> Result<Vec<PageStats>, Error> {
        let compiled = filter.compile();
        let title = Title(filter.include_title);

        let mut sql = sequence_base(&compiled);
        sql.push(
            ", sessions AS (SELECT session_key, count(*) AS views FROM base GROUP BY session_key)",
        );
        if filter.include_avg_time_on_page {
            push_samples(&mut sql, filter.max_time_on_page_seconds);
            push_times(&mut sql, &compiled, title);
        }
        sql.push(", page_rows AS (SELECT p.path")
            .push(title.qualified())
            .push(
                ", count(DISTINCT p.fingerprint) AS visitors,
                   count(DISTINCT p.session_key) AS sessions,
                   count(*) AS views,
                   count(DISTINCT p.session_key) FILTER (WHERE s.views = 1) AS bounces
                FROM (SELECT * FROM base WHERE ",
            )
            .append(predicate(&compiled.path_clauses()))
            .push(") p JOIN sessions s ON s.session_key = p.session_key GROUP BY p.path")
            .push(title.qualified())
            .push(") SELECT p.path")
            .push(title.qualified())
            .push(
                ", p.visitors, p.sessions, p.views, p.bounces,
                   (SELECT count(DISTINCT fingerprint) FROM base),
                   (SELECT count(*) FROM base)",
            );
        push_average(&mut sql, filter.include_avg_time_on_page, title);
        sql.push(" ORDER BY p.visitors DESC, p.path")
            .push(title.qualified());
        compiled.render_limit(&mut sql);

        let stats = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                let col = |i| title.shift(i);
                let visitors = row.get_u64(col(1))?;
                let sessions = row.get_u64(col(2))?;
                let views = row.get_u64(col(3))?;
                let bounces = row.get_u64(col(4))?;
                Ok(PageStats {
                    path: row.get_string(0)?,
                    title: title.read(row)?,
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(col(5))?),
                    sessions,
                    views,
                    relative_views: ratio(views, row.get_u64(col(6))?),
                    bounces,
                    bounce_rate: ratio(bounces, sessions),
                    average_time_spent_seconds: row.get_u64(col(7))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    /// Pages that started a session, ordered by entries.
    pub fn entry_pages(&self, filter: &Filter) -> Result<Vec<EntryStats>, Error> {
        let rows = self.boundary_pages(filter, "entry_position")?;
        Ok(rows
            .into_iter()
            .map(|b| EntryStats {
                path: b.path,
                title: b.title,
                visitors: b.visitors,
                entries: b.count,
                average_time_spent_seconds: b.average,
            })
            .collect())
    }

    /// Pages that ended a session, ordered by exits.
    pub fn exit_pages(&self, filter: &Filter) -> Result<Vec<ExitStats>, Error> {
        let rows = self.boundary_pages(filter, "exit_position")?;
        Ok(rows
            .into_iter()
            .map(|b| ExitStats {
                path: b.path,
                title: b.title,
                visitors: b.visitors,
                exits: b.count,
                exit_rate: ratio(b.count, b.visitors),
                average_time_spent_seconds: b.average,
            })
            .collect())
    }

    /// Visitors whose session starts or ends on a page, depending on `position`.
    fn boundary_pages(
        &self,
        filter: &Filter,
        position: &'static str,
    ) -> Result<Vec<BoundaryRow>, Error> {
        let compiled = filter.compile();
        let title = Title(filter.include_title);

        let mut sql = sequence_base(&compiled);
        if filter.include_avg_time_on_page {
            push_samples(&mut sql, filter.max_time_on_page_seconds);
            push_times(&mut sql, &compiled, title);
        } else {
            sql.push(ORDERED_CTE);
        }
        sql.push(", page_rows AS (SELECT path")
            .push(title.column())
            .push(", count(DISTINCT fingerprint) AS visitors, count(DISTINCT fingerprint) FILTER (WHERE ")
            .push(position)
            .push(" = 1) AS boundary FROM ordered WHERE ")
            .append(predicate(&compiled.path_clauses()))
            .push(" GROUP BY path")
            .push(title.column())
            .push(") SELECT p.path")
            .push(title.qualified())
            .push(", p.visitors, p.boundary");
        push_average(&mut sql, filter.include_avg_time_on_page, title);
        sql.push(" WHERE p.boundary > 0 ORDER BY p.boundary DESC, p.visitors DESC, p.path")
            .push(title.qualified());
        compiled.render_limit(&mut sql);

        let rows = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                Ok(BoundaryRow {
                    path: row.get_string(0)?,
                    title: title.read(row)?,
                    visitors: row.get_u64(title.shift(1))?,
                    count: row.get_u64(title.shift(2))?,
                    average: row.get_u64(title.shift(3))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(rows)
    }

    /// Average time on page per page, in path order.
    pub fn avg_time_on_pages(&self, filter: &Filter) -> Result<Vec<TimeSpentStats>, Error> {
        let compiled = filter.compile();
        let title = Title(filter.include_title);

        let mut sql = sequence_base(&compiled);
        push_samples(&mut sql, filter.max_time_on_page_seconds);
        push_times(&mut sql, &compiled, title);
        sql.push(" SELECT path")
            .push(title.column())
            .push(", average FROM times ORDER BY path")
            .push(title.column());
        compiled.render_limit(&mut sql);

        let stats = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                Ok(TimeSpentStats {
                    day: None,
                    path: Some(row.get_string(0)?),
                    title: if filter.include_title {
                        Some(row.get_string(1)?)
                    } else {
                        None
                    },
                    average_time_spent_seconds: row.get_u64(title.shift(1))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    /// Average time on page per local day, zero-filled across `from..=to`.
    pub fn avg_time_on_page(&self, filter: &Filter) -> Result<Vec<TimeSpentStats>, Error> {
        let compiled = filter.compile();
        let mut sql = sequence_base(&compiled);
        push_samples(&mut sql, filter.max_time_on_page_seconds);
        sql.push(" SELECT CAST(local_time AS DATE), CAST(floor(avg(seconds)) AS BIGINT) FROM samples WHERE ")
            .append(predicate(&compiled.path_clauses()))
            .push(" GROUP BY 1 ORDER BY 1");

        let rows = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| Ok(TimeSpentStats::on_day(row.get_date(0)?, row.get_u64(1)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(fill_days(
            rows,
            compiled.fill,
            |r| r.day.unwrap_or_default(),
            |day| TimeSpentStats::on_day(day, 0),
        ))
    }

    /// Sum of all time-on-page samples in seconds.
    pub fn total_time_on_page(&self, filter: &Filter) -> Result<u64, Error> {
        let compiled = filter.compile();
        let mut sql = sequence_base(&compiled);
        push_samples(&mut sql, filter.max_time_on_page_seconds);
        sql.push(" SELECT CAST(coalesce(sum(seconds), 0) AS BIGINT) FROM samples WHERE ")
            .append(predicate(&compiled.path_clauses()));
        Ok(self.store.count(sql.text(), sql.args())?)
    }

    /// Visitors and views matching the path filter, against all visitors of the filter.
    pub fn page_conversions(&self, filter: &Filter) -> Result<PageConversionsStats, Error> {
        let compiled = filter.compile();
        let path = compiled.path_clauses();

        let mut sql = sequence_base(&compiled);
        sql.push(" SELECT count(DISTINCT fingerprint) FILTER (WHERE ")
            .append(predicate(&path))
            .push("), count(*) FILTER (WHERE ")
            .append(predicate(&path))
            .push("), count(DISTINCT fingerprint) FROM base");

        let Some(row) = self.store.get(sql.text(), sql.args())? else {
            return Ok(PageConversionsStats {
                visitors: 0,
                views: 0,
                cr: 0.0,
            });
        };
        let visitors = row.get_u64(0)?;
        Ok(PageConversionsStats {
            visitors,
            views: row.get_u64(1)?,
            cr: ratio(visitors, row.get_u64(2)?),
        })
    }
}

/// Entry or exit row before it is named.
struct BoundaryRow {
    path: String,
    title: String,
    visitors: u64,
    count: u64,
    average: u64,
}
