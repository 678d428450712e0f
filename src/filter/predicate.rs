use crate::storage::Value;

/// Filterable columns. Names come from this fixed set only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    ClientId,
    Time,
    Path,
    Language,
    CountryCode,
    Referrer,
    Os,
    OsVersion,
    Browser,
    BrowserVersion,
    Desktop,
    Mobile,
    ScreenClass,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmContent,
    UtmTerm,
    EventName,
    EventMetaKeys,
}

impl Column {
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClientId => "client_id",
            Self::Time => "time",
            Self::Path => "path",
            Self::Language => "language",
            Self::CountryCode => "country_code",
            Self::Referrer => "referrer",
            Self::Os => "os",
            Self::OsVersion => "os_version",
            Self::Browser => "browser",
            Self::BrowserVersion => "browser_version",
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::ScreenClass => "screen_class",
            Self::UtmSource => "utm_source",
            Self::UtmMedium => "utm_medium",
            Self::UtmCampaign => "utm_campaign",
            Self::UtmContent => "utm_content",
            Self::UtmTerm => "utm_term",
            Self::EventName => "event_name",
            Self::EventMetaKeys => "event_meta_keys",
        }
    }

    /// Columns that only exist on the event table.
    pub const fn is_event(self) -> bool {
        matches!(self, Self::EventName | Self::EventMetaKeys)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Ge,
    Lt,
}

impl Comparison {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Ge => ">=",
            Self::Lt => "<",
        }
    }
}

/// One node of a compiled filter. A clause list is an implicit conjunction.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Compare {
        column: Column,
        op: Comparison,
        value: Value,
    },
    /// RE2 regular expression match.
    Matches {
        column: Column,
        pattern: String,
        negated: bool,
    },
    /// List column contains the value.
    Contains { column: Column, value: String },
    /// At least one of the nested clauses holds.
    Any(Vec<Clause>),
}

impl Clause {
    pub fn compare(column: Column, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    /// Equality test, or inequality when `raw` starts with `!`. `None` for an empty filter value.
    pub fn dimension(column: Column, raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        Some(match raw.strip_prefix('!') {
            Some(value) => Self::compare(column, Comparison::NotEq, value),
            None => Self::compare(column, Comparison::Eq, raw),
        })
    }

    /// Regex test against the path; `!` negates.
    pub fn path_pattern(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let (pattern, negated) = raw
            .strip_prefix('!')
            .map_or((raw, false), |rest| (rest, true));
        Some(Self::Matches {
            column: Column::Path,
            pattern: pattern.to_string(),
            negated,
        })
    }

    /// Clauses for the tri-state platform selector.
    ///
    /// `desktop` and `mobile` test their flag; anything else selects hits with
    /// neither flag. `!` inverts each branch.
    pub fn platform(raw: &str) -> Vec<Self> {
        if raw.is_empty() {
            return Vec::new();
        }
        let (selector, negated) = raw
            .strip_prefix('!')
            .map_or((raw, false), |rest| (rest, true));
        match selector.to_ascii_lowercase().as_str() {
            "desktop" => vec![Self::compare(Column::Desktop, Comparison::Eq, !negated)],
            "mobile" => vec![Self::compare(Column::Mobile, Comparison::Eq, !negated)],
            _ if negated => vec![Self::Any(vec![
                Self::compare(Column::Desktop, Comparison::Eq, true),
                Self::compare(Column::Mobile, Comparison::Eq, true),
            ])],
            _ => vec![
                Self::compare(Column::Desktop, Comparison::Eq, false),
                Self::compare(Column::Mobile, Comparison::Eq, false),
            ],
        }
    }

    /// Whether the clause constrains the path column.
    pub fn is_path(&self) -> bool {
        self.columns().iter().any(|c| *c == Column::Path)
    }

    /// Whether the clause needs a column of the event table.
    pub fn is_event(&self) -> bool {
        self.columns().iter().any(|c| c.is_event())
    }

    fn columns(&self) -> Vec<Column> {
        match self {
            Self::Compare { column, .. }
            | Self::Matches { column, .. }
            | Self::Contains { column, .. } => vec![*column],
            Self::Any(clauses) => clauses.iter().flat_map(Self::columns).collect(),
        }
    }
}
