pub mod predicate;
pub mod render;
pub mod timezone;

use crate::filter::predicate::{Clause, Column, Comparison};
use crate::filter::render::{render_clauses, Sql};
use crate::filter::timezone::{local_midnight_utc, LocalTime};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// Window scanned for offset transitions when a non-UTC filter has no lower bound.
const UNBOUNDED_SPAN_DAYS: i64 = 5 * 366;

/// Source table of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Hit,
    Event,
}

impl Table {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Event => "event",
        }
    }
}

/// Inclusive range of local days a day series must cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DayRange {
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        self.from.iter_days().take_while(move |d| *d <= self.to)
    }
}

/// Query parameters shared by all analyzer views.
///
/// String dimensions are unset when empty; a leading `!` negates the test.
/// `Filter::default()` selects everything of tenant 0 in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub client_id: i64,
    pub timezone: Tz,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub day: Option<NaiveDate>,
    pub start: Option<DateTime<Utc>>,
    pub path: String,
    pub path_pattern: String,
    pub language: String,
    pub country: String,
    pub referrer: String,
    pub os: String,
    pub os_version: String,
    pub browser: String,
    pub browser_version: String,
    pub platform: String,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    pub event_name: String,
    pub event_meta_key: String,
    /// Maximum rows; 0 or negative means no limit.
    pub limit: i64,
    pub include_title: bool,
    pub include_avg_time_on_page: bool,
    /// Clamp for each time-on-page sample; 0 disables clamping.
    pub max_time_on_page_seconds: u32,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            client_id: 0,
            timezone: Tz::UTC,
            from: None,
            to: None,
            day: None,
            start: None,
            path: String::new(),
            path_pattern: String::new(),
            language: String::new(),
            country: String::new(),
            referrer: String::new(),
            os: String::new(),
            os_version: String::new(),
            browser: String::new(),
            browser_version: String::new(),
            platform: String::new(),
            screen_class: String::new(),
            utm_source: String::new(),
            utm_medium: String::new(),
            utm_campaign: String::new(),
            utm_content: String::new(),
            utm_term: String::new(),
            event_name: String::new(),
            event_meta_key: String::new(),
            limit: 0,
            include_title: false,
            include_avg_time_on_page: false,
            max_time_on_page_seconds: 0,
        }
    }
}

impl Filter {
    /// Normalized copy, with "today" taken in the filter timezone.
    pub fn validate(&self) -> Self {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        self.validate_on(today)
    }

    /// Normalized copy:
    /// - `from` and `to` are swapped when reversed
    /// - `to` is clamped to `today`
    /// - an exact path discards the path pattern
    /// - a negative limit becomes 0
    pub fn validate_on(&self, today: NaiveDate) -> Self {
        let mut filter = self.clone();
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                filter.from = Some(to);
                filter.to = Some(from);
            }
        }
        if filter.to.is_some_and(|to| to > today) {
            filter.to = Some(today);
        }
        if !filter.path.is_empty() {
            filter.path_pattern.clear();
        }
        if filter.limit < 0 {
            filter.limit = 0;
        }
        filter
    }

    /// The event table when an event name is set, the hit table otherwise.
    pub fn table(&self) -> Table {
        if self.event_name.is_empty() {
            Table::Hit
        } else {
            Table::Event
        }
    }

    /// Validate and compile into a predicate AST plus grouping directives.
    pub fn compile(&self) -> CompiledFilter {
        self.validate().compile_at(Utc::now())
    }

    /// Compile an already validated filter. `now` bounds open ranges for the
    /// timezone schedule.
    pub fn compile_at(&self, now: DateTime<Utc>) -> CompiledFilter {
        let table = self.table();
        let mut clauses = self.time_clauses();
        clauses.extend(self.field_clauses(table));

        let fill = match (self.from, self.to) {
            (Some(from), Some(to)) => Some(DayRange { from, to }),
            _ => None,
        };

        CompiledFilter {
            table,
            clauses,
            fill,
            limit: u64::try_from(self.limit).ok().filter(|l| *l > 0),
            local_time: self.local_time(now),
        }
    }

    fn time_clauses(&self) -> Vec<Clause> {
        let tz = self.timezone;
        let day_start = |date: NaiveDate| local_midnight_utc(tz, date);
        let day_end = |date: NaiveDate| local_midnight_utc(tz, next_day(date));

        let mut clauses = vec![Clause::compare(
            Column::ClientId,
            Comparison::Eq,
            self.client_id,
        )];
        if let Some(from) = self.from {
            clauses.push(Clause::compare(Column::Time, Comparison::Ge, day_start(from)));
        }
        if let Some(to) = self.to {
            clauses.push(Clause::compare(Column::Time, Comparison::Lt, day_end(to)));
        }
        if let Some(day) = self.day {
            clauses.push(Clause::compare(Column::Time, Comparison::Ge, day_start(day)));
            clauses.push(Clause::compare(Column::Time, Comparison::Lt, day_end(day)));
        }
        if let Some(start) = self.start {
            clauses.push(Clause::compare(Column::Time, Comparison::Ge, start));
        }
        clauses
    }

    fn field_clauses(&self, table: Table) -> Vec<Clause> {
        let mut clauses = Vec::new();
        if self.path.is_empty() {
            clauses.extend(Clause::path_pattern(&self.path_pattern));
        } else {
            clauses.extend(Clause::dimension(Column::Path, &self.path));
        }

        let dimensions = [
            (Column::Language, &self.language),
            (Column::CountryCode, &self.country),
            (Column::Referrer, &self.referrer),
            (Column::Os, &self.os),
            (Column::OsVersion, &self.os_version),
            (Column::Browser, &self.browser),
            (Column::BrowserVersion, &self.browser_version),
        ];
        for (column, value) in dimensions {
            clauses.extend(Clause::dimension(column, value));
        }
        clauses.extend(Clause::platform(&self.platform));

        let dimensions = [
            (Column::ScreenClass, &self.screen_class),
            (Column::UtmSource, &self.utm_source),
            (Column::UtmMedium, &self.utm_medium),
            (Column::UtmCampaign, &self.utm_campaign),
            (Column::UtmContent, &self.utm_content),
            (Column::UtmTerm, &self.utm_term),
            (Column::EventName, &self.event_name),
        ];
        for (column, value) in dimensions {
            clauses.extend(Clause::dimension(column, value));
        }

        if table == Table::Event && !self.event_meta_key.is_empty() {
            clauses.push(Clause::Contains {
                column: Column::EventMetaKeys,
                value: self.event_meta_key.clone(),
            });
        }
        clauses
    }

    fn local_time(&self, now: DateTime<Utc>) -> LocalTime {
        let tz = self.timezone;
        if tz == Tz::UTC {
            return LocalTime::utc();
        }

        let first = [self.from, self.day]
            .into_iter()
            .flatten()
            .min()
            .map(|d| local_midnight_utc(tz, d))
            .or_else(|| self.start.map(|s| s.naive_utc()))
            .unwrap_or_else(|| (now - Duration::days(UNBOUNDED_SPAN_DAYS)).naive_utc());
        let last = [self.to, self.day]
            .into_iter()
            .flatten()
            .max()
            .map_or_else(|| now.naive_utc(), |d| local_midnight_utc(tz, next_day(d)));

        LocalTime::for_range(tz, first - Duration::days(1), last + Duration::days(1))
    }
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// Output of [`Filter::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub table: Table,
    pub clauses: Vec<Clause>,
    /// Day range to zero-fill in day series.
    pub fill: Option<DayRange>,
    pub limit: Option<u64>,
    pub local_time: LocalTime,
}

impl CompiledFilter {
    /// All clauses rendered as one predicate.
    pub fn predicate(&self) -> Sql {
        let mut sql = Sql::new();
        render_clauses(&self.clauses, &mut sql);
        sql
    }

    /// Clauses that constrain the path.
    pub fn path_clauses(&self) -> Vec<Clause> {
        self.clauses.iter().filter(|c| c.is_path()).cloned().collect()
    }

    /// Clauses without the path constraints.
    pub fn without_path(&self) -> Vec<Clause> {
        self.clauses.iter().filter(|c| !c.is_path()).cloned().collect()
    }

    /// Clauses applicable to the hit table.
    pub fn without_event(&self) -> Vec<Clause> {
        self.clauses.iter().filter(|c| !c.is_event()).cloned().collect()
    }

    /// Append `LIMIT ?` when a limit is set.
    pub fn render_limit(&self, sql: &mut Sql) {
        if let Some(limit) = self.limit {
            sql.push(" LIMIT ").bind(limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn midnight(y: i32, m: u32, d: u32) -> Value {
        Value::Timestamp(date(y, m, d).and_hms_opt(0, 0, 0).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_validate_swaps_reversed_range() {
        let filter = Filter {
            from: Some(date(2024, 6, 10)),
            to: Some(date(2024, 6, 1)),
            ..Filter::default()
        }
        .validate_on(date(2024, 6, 15));
        assert_eq!(filter.from, Some(date(2024, 6, 1)));
        assert_eq!(filter.to, Some(date(2024, 6, 10)));
    }

    #[test]
    fn test_validate_clamps_to_today() {
        let filter = Filter {
            from: Some(date(2024, 6, 1)),
            to: Some(date(2024, 7, 1)),
            ..Filter::default()
        }
        .validate_on(date(2024, 6, 15));
        assert_eq!(filter.to, Some(date(2024, 6, 15)));
    }

    #[test]
    fn test_validate_future_range_selects_nothing() {
        let filter = Filter {
            from: Some(date(2024, 6, 20)),
            to: Some(date(2024, 6, 25)),
            ..Filter::default()
        }
        .validate_on(date(2024, 6, 15));
        assert_eq!(filter.from, Some(date(2024, 6, 20)));
        assert_eq!(filter.to, Some(date(2024, 6, 15)));

        let compiled = filter.compile_at(now());
        assert_eq!(compiled.fill.map(|range| range.days().count()), Some(0));
    }

    #[test]
    fn test_validate_path_wins_over_pattern() {
        let filter = Filter {
            path: "/".to_string(),
            path_pattern: "^/blog".to_string(),
            limit: -5,
            ..Filter::default()
        }
        .validate_on(date(2024, 6, 15));
        assert_eq!(filter.path, "/");
        assert!(filter.path_pattern.is_empty());
        assert_eq!(filter.limit, 0);
    }

    #[test]
    fn test_validate_uses_filter_timezone_for_today() {
        let filter = Filter {
            timezone: "Pacific/Kiritimati".parse().unwrap(),
            to: Some(Utc::now().date_naive() + Duration::days(1)),
            ..Filter::default()
        }
        .validate();
        // UTC+14 is always on the same day as UTC or one day ahead.
        let utc_today = Utc::now().date_naive();
        let to = filter.to.unwrap();
        assert!(to == utc_today || to == utc_today + Duration::days(1));
    }

    #[test]
    fn test_table_selection() {
        assert_eq!(Filter::default().table(), Table::Hit);
        let filter = Filter {
            event_name: "signup".to_string(),
            ..Filter::default()
        };
        assert_eq!(filter.table(), Table::Event);
    }

    #[test]
    fn test_compile_defaults() {
        let compiled = Filter::default().compile_at(now());
        assert_eq!(compiled.table, Table::Hit);
        assert_eq!(compiled.predicate().text(), "client_id = ?");
        assert_eq!(compiled.predicate().args(), &[Value::Int(0)]);
        assert!(compiled.fill.is_none());
        assert!(compiled.limit.is_none());
        assert!(compiled.local_time.is_utc());
    }

    #[test]
    fn test_compile_utc_range() {
        let compiled = Filter {
            client_id: 3,
            from: Some(date(2024, 6, 1)),
            to: Some(date(2024, 6, 3)),
            ..Filter::default()
        }
        .compile_at(now());

        let predicate = compiled.predicate();
        assert_eq!(
            predicate.text(),
            "client_id = ? AND time >= CAST(? AS TIMESTAMP) AND time < CAST(? AS TIMESTAMP)"
        );
        assert_eq!(
            predicate.args(),
            &[Value::Int(3), midnight(2024, 6, 1), midnight(2024, 6, 4)]
        );
        assert_eq!(
            compiled.fill,
            Some(DayRange {
                from: date(2024, 6, 1),
                to: date(2024, 6, 3),
            })
        );
    }

    #[test]
    fn test_compile_day_in_tokyo_uses_local_midnights() {
        let compiled = Filter {
            timezone: "Asia/Tokyo".parse().unwrap(),
            day: Some(date(2024, 6, 10)),
            ..Filter::default()
        }
        .compile_at(now());

        let ts = |d: u32, h: u32| Value::Timestamp(date(2024, 6, d).and_hms_opt(h, 0, 0).unwrap());
        assert_eq!(
            compiled.predicate().args(),
            &[Value::Int(0), ts(9, 15), ts(10, 15)]
        );
        assert!(compiled.fill.is_none());
        assert!(!compiled.local_time.is_utc());
    }

    #[test]
    fn test_compile_start_is_instant() {
        let start = Utc.with_ymd_and_hms(2024, 6, 15, 11, 30, 0).unwrap();
        let compiled = Filter {
            start: Some(start),
            ..Filter::default()
        }
        .compile_at(now());
        assert_eq!(
            compiled.predicate().args()[1],
            Value::Timestamp(start.naive_utc())
        );
    }

    #[test]
    fn test_compile_fields_and_limit() {
        let compiled = Filter {
            path: "/".to_string(),
            language: "en".to_string(),
            browser: "!Chrome".to_string(),
            platform: "mobile".to_string(),
            utm_source: "newsletter".to_string(),
            limit: 10,
            ..Filter::default()
        }
        .compile_at(now());

        assert_eq!(
            compiled.predicate().text(),
            "client_id = ? AND path = ? AND language = ? AND browser <> ? AND mobile = ? AND utm_source = ?"
        );
        assert_eq!(compiled.limit, Some(10));

        let mut sql = Sql::new();
        compiled.render_limit(&mut sql);
        assert_eq!(sql.text(), " LIMIT ?");
        assert_eq!(sql.args(), &[Value::Int(10)]);
    }

    #[test]
    fn test_compile_pattern_when_path_empty() {
        let compiled = Filter {
            path_pattern: "(?i)^/simple/[^/]+/.*".to_string(),
            ..Filter::default()
        }
        .compile_at(now());
        assert_eq!(
            compiled.predicate().text(),
            "client_id = ? AND regexp_matches(path, ?)"
        );
        assert_eq!(compiled.path_clauses().len(), 1);
        assert_eq!(compiled.without_path().len(), 1);
    }

    #[test]
    fn test_compile_event_filter() {
        let compiled = Filter {
            event_name: "signup".to_string(),
            event_meta_key: "plan".to_string(),
            ..Filter::default()
        }
        .compile_at(now());
        assert_eq!(compiled.table, Table::Event);
        assert_eq!(
            compiled.predicate().text(),
            "client_id = ? AND event_name = ? AND list_contains(event_meta_keys, CAST(? AS VARCHAR))"
        );
        assert_eq!(compiled.without_event().len(), 1);
    }

    #[test]
    fn test_meta_key_ignored_without_event_name() {
        let compiled = Filter {
            event_meta_key: "plan".to_string(),
            ..Filter::default()
        }
        .compile_at(now());
        assert_eq!(compiled.clauses.len(), 1);
    }

    #[test]
    fn test_day_range_iterates_inclusive() {
        let range = DayRange {
            from: date(2024, 2, 27),
            to: date(2024, 3, 1),
        };
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![
                date(2024, 2, 27),
                date(2024, 2, 28),
                date(2024, 2, 29),
                date(2024, 3, 1)
            ]
        );
    }
}
