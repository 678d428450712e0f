use crate::error::Error;
use crate::filter::Filter;
use crate::query::{fill_days, ratio, with_base, Analyzer};
use crate::storage::StoreError;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;

/// Visitors, sessions, views and bounces of one local day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorStats {
    pub day: NaiveDate,
    pub visitors: u64,
    pub sessions: u64,
    pub views: u64,
    pub bounces: u64,
    pub bounce_rate: f64,
}

impl VisitorStats {
    const fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            visitors: 0,
            sessions: 0,
            views: 0,
            bounces: 0,
            bounce_rate: 0.0,
        }
    }
}

/// Visitors currently on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveVisitorStats {
    pub path: String,
    pub title: String,
    pub visitors: u64,
}

/// Relative change of each metric against the preceding period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Growth {
    pub visitors_growth: f64,
    pub views_growth: f64,
    pub sessions_growth: f64,
    pub bounces_growth: f64,
    pub time_spent_growth: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorHourStats {
    pub hour: u32,
    pub visitors: u64,
}

/// Average time in whole seconds, per day or per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSpentStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub average_time_spent_seconds: u64,
}

impl TimeSpentStats {
    pub(crate) const fn on_day(day: NaiveDate, average_time_spent_seconds: u64) -> Self {
        Self {
            day: Some(day),
            path: None,
            title: None,
            average_time_spent_seconds,
        }
    }
}

/// Totals of one period, compared by [`Analyzer::growth`].
struct PeriodMetrics {
    visitors: u64,
    views: u64,
    sessions: u64,
    bounces: u64,
    time_spent: u64,
}

/// Per-session view count, shared by the session-aware views.
const SESSIONS_CTE: &str =
    ", sessions AS (SELECT session_key, count(*) AS views FROM base GROUP BY session_key)";

/// Session duration from its start to its last hit, and the local day of its first hit.
const SESSION_DURATIONS_CTE: &str = ", durations AS (
    SELECT CAST(min(local_time) AS DATE) AS day,
           date_diff('second', min(session), max(time)) AS duration
    FROM base
    GROUP BY session_key)";

impl Analyzer {
    /// Visitor statistics per local day, zero-filled across `from..=to`.
    pub fn visitors(&self, filter: &Filter) -> Result<Vec<VisitorStats>, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(SESSIONS_CTE).push(
            " SELECT CAST(b.local_time AS DATE),
                     count(DISTINCT b.fingerprint),
                     count(DISTINCT b.session_key),
                     count(*),
                     count(DISTINCT b.session_key) FILTER (WHERE s.views = 1)
              FROM base b JOIN sessions s ON s.session_key = b.session_key
              GROUP BY 1
              ORDER BY 1",
        );

        let rows = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                let sessions = row.get_u64(2)?;
                let bounces = row.get_u64(4)?;
                Ok(VisitorStats {
                    day: row.get_date(0)?,
                    visitors: row.get_u64(1)?,
                    sessions,
                    views: row.get_u64(3)?,
                    bounces,
                    bounce_rate: ratio(bounces, sessions),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(fill_days(rows, compiled.fill, |r| r.day, VisitorStats::empty))
    }

    /// Visitors seen within `window` before now, per page, plus the distinct total.
    ///
    /// The date fields of `filter` are replaced by `start = now - window`.
    pub fn active_visitors(
        &self,
        filter: &Filter,
        window: Duration,
    ) -> Result<(Vec<ActiveVisitorStats>, u64), Error> {
        let filter = Filter {
            from: None,
            to: None,
            day: None,
            start: Some(Utc::now() - window),
            ..filter.clone()
        };
        let compiled = filter.compile();
        let title = if filter.include_title { ", title" } else { "" };

        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(" SELECT path")
            .push(title)
            .push(", count(DISTINCT fingerprint) FROM base GROUP BY path")
            .push(title)
            .push(" ORDER BY path")
            .push(title);
        compiled.render_limit(&mut sql);

        let visitors_col = if filter.include_title { 2 } else { 1 };
        let stats = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                Ok(ActiveVisitorStats {
                    path: row.get_string(0)?,
                    title: if filter.include_title {
                        row.get_string(1)?
                    } else {
                        String::new()
                    },
                    visitors: row.get_u64(visitors_col)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(" SELECT count(DISTINCT fingerprint) FROM base");
        let total = self.store.count(sql.text(), sql.args())?;

        Ok((stats, total))
    }

    /// Growth of the period in `filter` against the preceding period of equal length.
    ///
    /// A `day` is compared with the day before. A `from..=to` range is compared with
    /// the range of the same length ending the day before `from`.
    pub fn growth(&self, filter: &Filter) -> Result<Growth, Error> {
        let current = filter.validate();
        let previous = previous_period(&current).ok_or(Error::NoPeriodOrDay)?;

        let now = self.period_metrics(&current)?;
        let before = self.period_metrics(&previous)?;
        tracing::debug!(
            visitors = now.visitors,
            previous_visitors = before.visitors,
            "Computed period growth"
        );

        Ok(Growth {
            visitors_growth: super::growth(now.visitors, before.visitors),
            views_growth: super::growth(now.views, before.views),
            sessions_growth: super::growth(now.sessions, before.sessions),
            bounces_growth: super::growth(now.bounces, before.bounces),
            time_spent_growth: super::growth(now.time_spent, before.time_spent),
        })
    }

    fn period_metrics(&self, filter: &Filter) -> Result<PeriodMetrics, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(
            ", sessions AS (
                SELECT count(*) AS views,
                       greatest(date_diff('second', min(session), max(time)), 0) AS duration
                FROM base
                GROUP BY session_key)
              SELECT (SELECT count(DISTINCT fingerprint) FROM base),
                     (SELECT count(*) FROM base),
                     count(*),
                     count(*) FILTER (WHERE views = 1),
                     CAST(coalesce(sum(duration), 0) AS BIGINT)
              FROM sessions",
        );

        let Some(row) = self.store.get(sql.text(), sql.args())? else {
            return Ok(PeriodMetrics {
                visitors: 0,
                views: 0,
                sessions: 0,
                bounces: 0,
                time_spent: 0,
            });
        };
        Ok(PeriodMetrics {
            visitors: row.get_u64(0)?,
            views: row.get_u64(1)?,
            sessions: row.get_u64(2)?,
            bounces: row.get_u64(3)?,
            time_spent: row.get_u64(4)?,
        })
    }

    /// Distinct visitors per local hour of day, always 24 rows.
    pub fn visitor_hours(&self, filter: &Filter) -> Result<Vec<VisitorHourStats>, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(
            " SELECT CAST(hour(local_time) AS BIGINT), count(DISTINCT fingerprint)
              FROM base
              GROUP BY 1
              ORDER BY 1",
        );

        let mut hours: Vec<VisitorHourStats> = (0..24)
            .map(|hour| VisitorHourStats { hour, visitors: 0 })
            .collect();
        for row in self.store.select(sql.text(), sql.args())? {
            let hour = usize::try_from(row.get_u64(0)?).unwrap_or(usize::MAX);
            if let Some(slot) = hours.get_mut(hour) {
                slot.visitors = row.get_u64(1)?;
            }
        }
        Ok(hours)
    }

    /// Average session duration per local day of the session's first hit.
    ///
    /// Sessions without a measurable duration are left out.
    pub fn avg_session_duration(&self, filter: &Filter) -> Result<Vec<TimeSpentStats>, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(SESSION_DURATIONS_CTE).push(
            " SELECT day, CAST(floor(avg(duration)) AS BIGINT)
              FROM durations
              WHERE duration > 0
              GROUP BY day
              ORDER BY day",
        );

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

    /// Sum of all session durations in seconds.
    pub fn total_session_duration(&self, filter: &Filter) -> Result<u64, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(SESSION_DURATIONS_CTE).push(
            " SELECT CAST(coalesce(sum(duration), 0) AS BIGINT) FROM durations WHERE duration > 0",
        );
        Ok(self.store.count(sql.text(), sql.args())?)
    }
}

/// The period immediately before the one selected by `filter`, or `None` if
/// neither a day nor a full range is set.
fn previous_period(filter: &Filter) -> Option<Filter> {
    if let Some(day) = filter.day {
        return Some(Filter {
            day: day.pred_opt(),
            ..filter.clone()
        });
    }

    let (from, to) = (filter.from?, filter.to?);
    let days = (to - from).num_days() + 1;
    Some(Filter {
        from: Some(from - Duration::days(days)),
        to: from.pred_opt(),
        ..filter.clone()
    })
}
