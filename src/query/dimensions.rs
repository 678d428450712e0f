use crate::error::Error;
use crate::filter::predicate::Column;
use crate::filter::Filter;
use crate::model::{Browser, Os};
use crate::query::{ratio, with_base, Analyzer};
use crate::storage::{Row, StoreError};
use serde::Serialize;

/// Single-column breakdowns that share one row type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Language,
    Country,
    ScreenClass,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmContent,
    UtmTerm,
}

impl Dimension {
    const fn column(self) -> Column {
        match self {
            Self::Language => Column::Language,
            Self::Country => Column::CountryCode,
            Self::ScreenClass => Column::ScreenClass,
            Self::UtmSource => Column::UtmSource,
            Self::UtmMedium => Column::UtmMedium,
            Self::UtmCampaign => Column::UtmCampaign,
            Self::UtmContent => Column::UtmContent,
            Self::UtmTerm => Column::UtmTerm,
        }
    }

    /// UTM parameters are absent on most hits, so their empty group is dropped.
    const fn skips_empty(self) -> bool {
        matches!(
            self,
            Self::UtmSource | Self::UtmMedium | Self::UtmCampaign | Self::UtmContent | Self::UtmTerm
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionStats {
    pub value: String,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserStats {
    pub browser: Browser,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserVersionStats {
    pub browser: Browser,
    pub browser_version: String,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsStats {
    pub os: Os,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsVersionStats {
    pub os: Os,
    pub os_version: String,
    pub visitors: u64,
    pub relative_visitors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerStats {
    pub referrer: String,
    pub referrer_name: String,
    pub referrer_icon: String,
    pub visitors: u64,
    pub relative_visitors: f64,
    pub bounces: u64,
    pub bounce_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformStats {
    pub platform_desktop: u64,
    pub platform_mobile: u64,
    pub platform_unknown: u64,
    pub relative_platform_desktop: f64,
    pub relative_platform_mobile: f64,
    pub relative_platform_unknown: f64,
}

impl Analyzer {
    /// Visitors grouped by `columns`, followed by the visitor count and the
    /// filter total: `[columns..., visitors, total]`.
    fn grouped(
        &self,
        filter: &Filter,
        columns: &[Column],
        skip_empty: bool,
    ) -> Result<Vec<Row>, Error> {
        let compiled = filter.compile();
        let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
        let list = names.join(", ");

        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(" SELECT ")
            .push(&list)
            .push(
                ", count(DISTINCT fingerprint) AS visitors,
                   (SELECT count(DISTINCT fingerprint) FROM base)
                FROM base",
            );
        if skip_empty {
            sql.push(" WHERE ").push(&names.join(" <> '' AND ")).push(" <> ''");
        }
        sql.push(" GROUP BY ")
            .push(&list)
            .push(" ORDER BY visitors DESC, ")
            .push(&list);
        compiled.render_limit(&mut sql);
        Ok(self.store.select(sql.text(), sql.args())?)
    }

    /// Visitors per value of a single-column dimension.
    pub fn breakdown(
        &self,
        filter: &Filter,
        dimension: Dimension,
    ) -> Result<Vec<DimensionStats>, Error> {
        let stats = self
            .grouped(filter, &[dimension.column()], dimension.skips_empty())?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(1)?;
                Ok(DimensionStats {
                    value: row.get_string(0)?,
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(2)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    pub fn languages(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::Language)
    }

    pub fn countries(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::Country)
    }

    pub fn screen_class(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::ScreenClass)
    }

    pub fn utm_source(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::UtmSource)
    }

    pub fn utm_medium(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::UtmMedium)
    }

    pub fn utm_campaign(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::UtmCampaign)
    }

    pub fn utm_content(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::UtmContent)
    }

    pub fn utm_term(&self, filter: &Filter) -> Result<Vec<DimensionStats>, Error> {
        self.breakdown(filter, Dimension::UtmTerm)
    }

    pub fn browser(&self, filter: &Filter) -> Result<Vec<BrowserStats>, Error> {
        let stats = self
            .grouped(filter, &[Column::Browser], false)?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(1)?;
                Ok(BrowserStats {
                    browser: Browser::from_name(&row.get_string(0)?),
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(2)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    pub fn browser_version(&self, filter: &Filter) -> Result<Vec<BrowserVersionStats>, Error> {
        let stats = self
            .grouped(filter, &[Column::Browser, Column::BrowserVersion], false)?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(2)?;
                Ok(BrowserVersionStats {
                    browser: Browser::from_name(&row.get_string(0)?),
                    browser_version: row.get_string(1)?,
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(3)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    pub fn os(&self, filter: &Filter) -> Result<Vec<OsStats>, Error> {
        let stats = self
            .grouped(filter, &[Column::Os], false)?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(1)?;
                Ok(OsStats {
                    os: Os::from_name(&row.get_string(0)?),
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(2)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    pub fn os_version(&self, filter: &Filter) -> Result<Vec<OsVersionStats>, Error> {
        let stats = self
            .grouped(filter, &[Column::Os, Column::OsVersion], false)?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(2)?;
                Ok(OsVersionStats {
                    os: Os::from_name(&row.get_string(0)?),
                    os_version: row.get_string(1)?,
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(3)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    /// Visitors and bounces per referrer.
    ///
    /// A bounce is a single-view session whose only view carries the referrer.
    pub fn referrer(&self, filter: &Filter) -> Result<Vec<ReferrerStats>, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(
            ", sessions AS (SELECT session_key, count(*) AS views FROM base GROUP BY session_key)
            SELECT b.referrer, b.referrer_name, b.referrer_icon,
                   count(DISTINCT b.fingerprint) AS visitors,
                   count(DISTINCT b.session_key) AS sessions,
                   count(DISTINCT b.session_key) FILTER (WHERE s.views = 1) AS bounces,
                   (SELECT count(DISTINCT fingerprint) FROM base)
            FROM base b JOIN sessions s ON s.session_key = b.session_key
            GROUP BY b.referrer, b.referrer_name, b.referrer_icon
            ORDER BY visitors DESC, b.referrer",
        );
        compiled.render_limit(&mut sql);

        let stats = self
            .store
            .select(sql.text(), sql.args())?
            .iter()
            .map(|row| {
                let visitors = row.get_u64(3)?;
                let bounces = row.get_u64(5)?;
                Ok(ReferrerStats {
                    referrer: row.get_string(0)?,
                    referrer_name: row.get_string(1)?,
                    referrer_icon: row.get_string(2)?,
                    visitors,
                    relative_visitors: ratio(visitors, row.get_u64(6)?),
                    bounces,
                    bounce_rate: ratio(bounces, row.get_u64(4)?),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(stats)
    }

    /// Visitors per device class. Relative values divide by the sum of the three counts.
    pub fn platform(&self, filter: &Filter) -> Result<PlatformStats, Error> {
        let compiled = filter.compile();
        let mut sql = with_base(&compiled, compiled.table, &compiled.clauses);
        sql.push(
            " SELECT count(DISTINCT fingerprint) FILTER (WHERE desktop),
                     count(DISTINCT fingerprint) FILTER (WHERE mobile),
                     count(DISTINCT fingerprint) FILTER (WHERE NOT desktop AND NOT mobile)
              FROM base",
        );
        let (desktop, mobile, unknown) = match self.store.get(sql.text(), sql.args())? {
            Some(row) => (row.get_u64(0)?, row.get_u64(1)?, row.get_u64(2)?),
            None => (0, 0, 0),
        };
        let total = desktop + mobile + unknown;
        Ok(PlatformStats {
            platform_desktop: desktop,
            platform_mobile: mobile,
            platform_unknown: unknown,
            relative_platform_desktop: ratio(desktop, total),
            relative_platform_mobile: ratio(mobile, total),
            relative_platform_unknown: ratio(unknown, total),
        })
    }
}
