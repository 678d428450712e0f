use crate::filter::render::Sql;
use crate::storage::Value;
use chrono::{Duration, NaiveDate, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;

/// UTC instant at which `date` begins in `tz`.
///
/// Ambiguous midnights resolve to the earlier instant. A midnight skipped by a
/// DST jump resolves to the first valid local time after it.
pub fn local_midnight_utc(tz: Tz, date: NaiveDate) -> NaiveDateTime {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    (0..4)
        .find_map(|hour| {
            tz.from_local_datetime(&(midnight + Duration::hours(hour)))
                .earliest()
        })
        .map_or(midnight, |dt| dt.naive_utc())
}

/// Offset from UTC (in seconds) that `tz` applies at the UTC instant `at`.
pub fn offset_at(tz: Tz, at: NaiveDateTime) -> i64 {
    i64::from(tz.offset_from_utc_datetime(&at).fix().local_minus_utc())
}

/// One constant-offset stretch of a [`LocalTime`] schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    /// Exclusive UTC end; `None` for the last segment.
    until: Option<NaiveDateTime>,
    offset_seconds: i64,
}

/// Piecewise UTC offset schedule used to shift stored UTC timestamps into the
/// filter timezone when grouping by local day or hour.
///
/// Instants before the first transition use the first offset and instants after
/// the last transition use the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTime {
    segments: Vec<Segment>,
}

impl Default for LocalTime {
    fn default() -> Self {
        Self::utc()
    }
}

impl LocalTime {
    pub fn utc() -> Self {
        Self {
            segments: vec![Segment {
                until: None,
                offset_seconds: 0,
            }],
        }
    }

    /// Schedule of `tz` covering `[start, end]`, scanned day by day.
    pub fn for_range(tz: Tz, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        if tz == Tz::UTC {
            return Self::utc();
        }

        let mut segments = Vec::new();
        let mut current = offset_at(tz, start);
        let mut cursor = start;
        while cursor < end {
            let next = (cursor + Duration::days(1)).min(end);
            let offset = offset_at(tz, next);
            if offset != current {
                segments.push(Segment {
                    until: Some(find_transition(tz, cursor, next, current)),
                    offset_seconds: current,
                });
                current = offset;
            }
            cursor = next;
        }
        segments.push(Segment {
            until: None,
            offset_seconds: current,
        });
        Self { segments }
    }

    pub fn is_utc(&self) -> bool {
        matches!(self.segments.as_slice(), [s] if s.offset_seconds == 0)
    }

    /// Offset applied to the UTC instant `at`.
    pub fn offset_for(&self, at: NaiveDateTime) -> i64 {
        self.segments
            .iter()
            .find(|s| s.until.is_none_or(|until| at < until))
            .map_or(0, |s| s.offset_seconds)
    }

    /// Push an expression that converts `column` (UTC) to local wall time.
    pub fn render(&self, column: &str, sql: &mut Sql) {
        match self.segments.as_slice() {
            [only] if only.offset_seconds == 0 => {
                sql.push(column);
            }
            [only] => {
                sql.push("(").push(column).push(" + to_seconds(CAST(");
                sql.bind(only.offset_seconds).push(" AS BIGINT)))");
            }
            segments => {
                sql.push("(").push(column).push(" + to_seconds(CASE");
                for segment in segments {
                    match segment.until {
                        Some(until) => {
                            sql.push(" WHEN ").push(column).push(" < ");
                            sql.bind(Value::from(until)).push(" THEN CAST(");
                        }
                        None => {
                            sql.push(" ELSE CAST(");
                        }
                    }
                    sql.bind(segment.offset_seconds).push(" AS BIGINT)");
                }
                sql.push(" END))");
            }
        }
    }
}

/// First UTC second in `(lo, hi]` at which the offset differs from `before`.
fn find_transition(tz: Tz, mut lo: NaiveDateTime, mut hi: NaiveDateTime, before: i64) -> NaiveDateTime {
    while hi - lo > Duration::seconds(1) {
        let mid = lo + (hi - lo) / 2;
        if offset_at(tz, mid) == before {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    hi
}
