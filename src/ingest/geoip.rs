use std::net::IpAddr;
use std::path::Path;

/// Resolves an IP address to a lower-case ISO country code.
///
/// PRIVACY: the address is used for the lookup only and never stored or logged.
pub trait GeoDb: Send + Sync {
    /// Country code of `ip`, or an empty string when unknown.
    fn country_code(&self, ip: &str) -> String;
}

/// MaxMind GeoLite2 country lookups. Without a database every lookup misses.
pub struct MaxMindGeoDb {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl MaxMindGeoDb {
    /// Open a `.mmdb` file. A missing or unreadable file disables lookups.
    pub fn open(path: Option<&Path>) -> Self {
        let reader = path.and_then(|p| {
            if !p.exists() {
                tracing::warn!(path = %p.display(), "GeoIP database not found, country lookup disabled");
                return None;
            }
            match maxminddb::Reader::open_readfile(p) {
                Ok(r) => {
                    tracing::info!(path = %p.display(), "GeoIP database loaded");
                    Some(r)
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "Failed to open GeoIP database, country lookup disabled");
                    None
                }
            }
        });
        Self { reader }
    }

    pub const fn is_loaded(&self) -> bool {
        self.reader.is_some()
    }
}

impl GeoDb for MaxMindGeoDb {
    fn country_code(&self, ip: &str) -> String {
        let Some(reader) = &self.reader else {
            return String::new();
        };
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return String::new();
        };
        let Ok(result) = reader.lookup(addr) else {
            return String::new();
        };
        let Ok(Some(country)) = result.decode::<maxminddb::geoip2::Country>() else {
            return String::new();
        };
        country
            .country
            .iso_code
            .map(str::to_lowercase)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_database_misses() {
        let db = MaxMindGeoDb::open(None);
        assert!(!db.is_loaded());
        assert_eq!(db.country_code("8.8.8.8"), "");
    }

    #[test]
    fn test_missing_file_misses() {
        let db = MaxMindGeoDb::open(Some(Path::new("/nonexistent/GeoLite2-Country.mmdb")));
        assert!(!db.is_loaded());
        assert_eq!(db.country_code("8.8.8.8"), "");
    }

    #[test]
    fn test_invalid_ip_misses() {
        let db = MaxMindGeoDb::open(None);
        assert_eq!(db.country_code("not-an-ip"), "");
        assert_eq!(db.country_code(""), "");
    }
}
