use url::Url;

/// A referrer as stored on a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Referrer {
    pub referrer: String,
    pub name: String,
    pub icon: String,
}

/// Display name and icon of well-known referrer hosts, matched on the
/// registrable part of the host.
const KNOWN_REFERRERS: &[(&str, &str, &str)] = &[
    ("google.", "Google", "https://www.google.com/favicon.ico"),
    ("bing.com", "Bing", "https://www.bing.com/favicon.ico"),
    ("yahoo.", "Yahoo!", "https://www.yahoo.com/favicon.ico"),
    ("duckduckgo.com", "DuckDuckGo", "https://duckduckgo.com/favicon.ico"),
    ("ecosia.org", "Ecosia", "https://www.ecosia.org/favicon.ico"),
    ("twitter.com", "Twitter", "https://twitter.com/favicon.ico"),
    ("t.co", "Twitter", "https://twitter.com/favicon.ico"),
    ("x.com", "Twitter", "https://twitter.com/favicon.ico"),
    ("facebook.com", "Facebook", "https://www.facebook.com/favicon.ico"),
    ("linkedin.com", "LinkedIn", "https://www.linkedin.com/favicon.ico"),
    ("reddit.com", "Reddit", "https://www.reddit.com/favicon.ico"),
    ("github.com", "GitHub", "https://github.com/favicon.ico"),
    ("news.ycombinator.com", "Hacker News", "https://news.ycombinator.com/favicon.ico"),
    ("youtube.com", "YouTube", "https://www.youtube.com/favicon.ico"),
    ("instagram.com", "Instagram", "https://www.instagram.com/favicon.ico"),
    ("pinterest.", "Pinterest", "https://www.pinterest.com/favicon.ico"),
];

/// Lower-case host of a referrer or URL, accepting values without a scheme.
///
/// A leading `www.` is dropped.
pub fn host_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("http://{raw}")).ok())?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Whether `host` is `domain` or one of its subdomains.
pub fn is_same_or_subdomain(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Resolve a raw referrer for a page on `page_host`.
///
/// Self-referrals resolve to nothing. Known hosts carry a display name and
/// icon; any other host is its own name.
pub fn resolve(raw: &str, page_host: Option<&str>) -> Option<Referrer> {
    let host = host_of(raw)?;
    if page_host.is_some_and(|page| page.trim_start_matches("www.").eq_ignore_ascii_case(&host)) {
        return None;
    }

    let known = KNOWN_REFERRERS.iter().find(|(pattern, _, _)| {
        if pattern.ends_with('.') {
            host.starts_with(pattern) || host.contains(&format!(".{pattern}"))
        } else {
            is_same_or_subdomain(&host, pattern)
        }
    });
    let (name, icon) = known.map_or_else(
        || (host.clone(), String::new()),
        |(_, name, icon)| ((*name).to_string(), (*icon).to_string()),
    );
    Some(Referrer {
        referrer: raw.trim().to_string(),
        name,
        icon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://www.Google.com/search?q=x").as_deref(), Some("google.com"));
        assert_eq!(host_of("2your.site").as_deref(), Some("2your.site"));
        assert_eq!(host_of("sub.2your.site/path").as_deref(), Some("sub.2your.site"));
        assert_eq!(host_of("http://ref/").as_deref(), Some("ref"));
        assert_eq!(host_of(""), None);
        assert_eq!(host_of("   "), None);
    }

    #[test]
    fn test_subdomain_match() {
        assert!(is_same_or_subdomain("2your.site", "2your.site"));
        assert!(is_same_or_subdomain("a.b.2your.site", "2your.site"));
        assert!(!is_same_or_subdomain("my2your.site", "2your.site"));
        assert!(!is_same_or_subdomain("2your.site.com", "2your.site"));
    }

    #[test]
    fn test_resolve_known() {
        let r = resolve("https://www.google.de/search?q=test", None).unwrap();
        assert_eq!(r.name, "Google");
        assert!(!r.icon.is_empty());
        assert_eq!(r.referrer, "https://www.google.de/search?q=test");

        let r = resolve("https://t.co/abc", None).unwrap();
        assert_eq!(r.name, "Twitter");
        let r = resolve("https://old.reddit.com/r/rust", None).unwrap();
        assert_eq!(r.name, "Reddit");
    }

    #[test]
    fn test_resolve_unknown_is_host() {
        let r = resolve("https://myblog.com/post", None).unwrap();
        assert_eq!(r.name, "myblog.com");
        assert!(r.icon.is_empty());
    }

    #[test]
    fn test_resolve_drops_self_referral() {
        assert!(resolve("https://example.com/other", Some("example.com")).is_none());
        assert!(resolve("https://www.example.com/other", Some("example.com")).is_none());
        assert!(resolve("https://other.com/", Some("example.com")).is_some());
    }

    #[test]
    fn test_resolve_empty() {
        assert!(resolve("", None).is_none());
    }
}
