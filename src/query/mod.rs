//! Read-only aggregation views over stored hits and events.
//!
//! Every view compiles its [`Filter`](crate::filter::Filter), wraps the matching rows in a `base` CTE
//! that adds `local_time` (the hit time in the filter timezone) and
//! `session_key`, and derives its statistic from there.

pub mod dimensions;
pub mod events;
pub mod pages;
pub mod visitors;

pub use dimensions::{
    BrowserStats, BrowserVersionStats, Dimension, DimensionStats, OsStats, OsVersionStats,
    PlatformStats, ReferrerStats,
};
pub use events::{EventBreakdownStats, EventStats};
pub use pages::{EntryStats, ExitStats, PageConversionsStats, PageStats};
pub use visitors::{ActiveVisitorStats, Growth, TimeSpentStats, VisitorHourStats, VisitorStats};

use crate::filter::predicate::Clause;
use crate::filter::render::{render_clauses, Sql};
use crate::filter::timezone::LocalTime;
use crate::filter::{CompiledFilter, DayRange, Table};
use crate::storage::Store;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Analytics over a [`Store`].
#[derive(Clone)]
pub struct Analyzer {
    store: Arc<dyn Store>,
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

/// Render `name AS (SELECT *, local_time, session_key FROM table WHERE clauses)`.
fn cte(name: &str, table: Table, local_time: &LocalTime, clauses: &[Clause]) -> Sql {
    let mut sql = Sql::new();
    sql.push(name).push(" AS (SELECT *, ");
    local_time.render("time", &mut sql);
    sql.push(
        " AS local_time, fingerprint || '-' || CAST(session AS VARCHAR) AS session_key FROM ",
    )
    .push(table.name())
    .push(" WHERE ");
    render_clauses(clauses, &mut sql);
    sql.push(")");
    sql
}

/// `WITH base AS (...)` over `clauses` of `table`, shifted by the compiled local time.
fn with_base(compiled: &CompiledFilter, table: Table, clauses: &[Clause]) -> Sql {
    let mut sql = Sql::new();
    sql.push("WITH ")
        .append(cte("base", table, &compiled.local_time, clauses));
    sql
}

/// Render a conjunction as a standalone fragment.
fn predicate(clauses: &[Clause]) -> Sql {
    let mut sql = Sql::new();
    render_clauses(clauses, &mut sql);
    sql
}

/// Relative change from `previous` to `current`.
///
/// Both zero is no change. Growth from zero is `1`, a drop to zero is `-1`.
#[allow(clippy::cast_precision_loss)]
pub fn growth(current: u64, previous: u64) -> f64 {
    match (current, previous) {
        (0, 0) => 0.0,
        (_, 0) => 1.0,
        (0, _) => -1.0,
        (c, p) => (c as f64 - p as f64) / p as f64,
    }
}

/// `part / total`, or 0 for an empty total.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Zero-fill a day series across `fill`, keeping rows sorted by day.
///
/// Without a range the rows are returned as queried.
fn fill_days<T>(
    rows: Vec<T>,
    fill: Option<DayRange>,
    day_of: impl Fn(&T) -> NaiveDate,
    empty: impl Fn(NaiveDate) -> T,
) -> Vec<T> {
    let Some(range) = fill else {
        return rows;
    };
    let mut by_day: BTreeMap<NaiveDate, T> = rows.into_iter().map(|r| (day_of(&r), r)).collect();
    range
        .days()
        .map(|day| by_day.remove(&day).unwrap_or_else(|| empty(day)))
        .collect()
}



#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_growth_sign_follows_change(current in 0u64..10_000, previous in 0u64..10_000) {
            let g = growth(current, previous);
            prop_assert_eq!(g > 0.0, current > previous);
            prop_assert_eq!(g < 0.0, current < previous);
            prop_assert!(g >= -1.0);
        }
    }
}
