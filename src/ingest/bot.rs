use crate::ingest::referrer::{host_of, is_same_or_subdomain};
use crate::ingest::request::RequestMeta;
use crate::ingest::useragent::parse_user_agent;
use crate::model::Browser;
use std::collections::HashMap;

/// Case-insensitive keywords that mark automated clients.
const BOT_KEYWORDS: &[&str] = &["bot", "crawler", "spider", "crawling", "headless"];

/// Tokens that indicate a URL embedded in the user agent.
const URL_TOKENS: &[&str] = &["http://", "https://", "www."];

/// Known automated clients whose user agent carries none of the keywords.
pub const USER_AGENT_BLACKLIST: &[&str] = &[
    "curl/",
    "Wget/",
    "python-requests/",
    "python-urllib/",
    "aiohttp/",
    "Go-http-client/",
    "Java/",
    "okhttp/",
    "axios/",
    "node-fetch/",
    "Apache-HttpClient/",
    "libwww-perl/",
    "Scrapy/",
    "PhantomJS/",
    "Lighthouse",
    "PTST/",
    "facebookexternalhit/",
    "WhatsApp/",
    "Mediapartners-Google",
    "Feedfetcher-Google",
    "Google-Read-Aloud",
    "ia_archiver",
    "Pingdom.com_",
    "UptimeRobot/",
    "Yahoo! Slurp",
    "Embedly/",
    "Qwantify/",
    "SiteAuditor/",
    "Screaming Frog",
    "HTTrack",
];

/// Referrer domains that only ever send spam. Subdomains match too.
pub const SPAM_REFERRERS: &[&str] = &[
    "2your.site",
    "100dollars-seo.com",
    "4webmasters.org",
    "7makemoneyonline.com",
    "best-seo-offer.com",
    "blackhatworth.com",
    "buttons-for-website.com",
    "buy-cheap-online.info",
    "darodar.com",
    "econom.co",
    "event-tracking.com",
    "floating-share-buttons.com",
    "free-share-buttons.com",
    "free-social-buttons.com",
    "get-free-traffic-now.com",
    "hulfingtonpost.com",
    "ilovevitaly.com",
    "kambasoft.com",
    "o-o-6-o-o.com",
    "priceg.com",
    "rank-checker.online",
    "savetubevideo.com",
    "semalt.com",
    "seo-platform.com",
    "simple-share-buttons.com",
    "social-buttons.com",
    "trafficmonetize.org",
    "webmonetizer.net",
];

/// Decides whether a request must not be tracked.
///
/// The checks only read the request. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct BotFilter {
    min_versions: HashMap<Browser, u32>,
}

impl BotFilter {
    /// `min_versions` maps a browser to the lowest accepted major version.
    pub const fn new(min_versions: HashMap<Browser, u32>) -> Self {
        Self { min_versions }
    }

    pub fn should_ignore(&self, request: &RequestMeta<'_>) -> bool {
        is_prefetch(request)
            || self.is_bot_user_agent(request.user_agent())
            || request.header("dnt").is_some_and(|v| v.trim() == "1")
            || is_spam_referrer(request)
    }

    fn is_bot_user_agent(&self, ua: &str) -> bool {
        if ua.is_empty() {
            return true;
        }
        let lower = ua.to_lowercase();
        if BOT_KEYWORDS.iter().any(|k| lower.contains(k))
            || URL_TOKENS.iter().any(|t| lower.contains(t))
            || USER_AGENT_BLACKLIST
                .iter()
                .any(|b| lower.contains(&b.to_lowercase()))
        {
            return true;
        }
        self.is_outdated(ua)
    }

    fn is_outdated(&self, ua: &str) -> bool {
        let parsed = parse_user_agent(ua);
        let Some(min) = self.min_versions.get(&parsed.browser) else {
            return false;
        };
        parsed.browser_major().is_some_and(|major| major < *min)
    }
}

fn is_prefetch(request: &RequestMeta<'_>) -> bool {
    let is = |name: &str, values: &[&str]| {
        request
            .header(name)
            .is_some_and(|v| values.iter().any(|x| v.trim().eq_ignore_ascii_case(x)))
    };
    is("x-moz", &["prefetch"])
        || is("x-purpose", &["prefetch", "preview"])
        || is("purpose", &["prefetch", "preview"])
}

fn is_spam_referrer(request: &RequestMeta<'_>) -> bool {
    [
        request.header("referer").map(str::to_string),
        request.query_param("ref"),
    ]
    .into_iter()
    .flatten()
    .filter_map(|raw| host_of(&raw))
    .any(|host| SPAM_REFERRERS.iter().any(|d| is_same_or_subdomain(&host, d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Uri};

    const CHROME_84: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/84.0.4147.135 Safari/537.36";

    fn filter() -> BotFilter {
        BotFilter::new(HashMap::from([(Browser::Chrome, 84)]))
    }

    fn ignored(headers: &[(&'static str, &str)], uri: &str) -> bool {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        let uri: Uri = uri.parse().unwrap();
        filter().should_ignore(&RequestMeta::new(&map, &uri, None))
    }

    #[test]
    fn test_prefetch_headers() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:89.0) Gecko/20100101 Firefox/89.0";
        assert!(ignored(&[("user-agent", ua), ("x-moz", "prefetch")], "/"));
        assert!(ignored(&[("user-agent", ua), ("x-purpose", "prefetch")], "/"));
        assert!(ignored(&[("user-agent", ua), ("x-purpose", "preview")], "/"));
        assert!(ignored(&[("user-agent", ua), ("purpose", "prefetch")], "/"));
        assert!(ignored(&[("user-agent", ua), ("purpose", "preview")], "/"));
        assert!(!ignored(&[("user-agent", ua)], "/"));
    }

    #[test]
    fn test_user_agent_keywords() {
        assert!(ignored(&[("user-agent", "This is a bot request")], "/"));
        assert!(ignored(&[("user-agent", "This is a crawler request")], "/"));
        assert!(ignored(&[("user-agent", "This is a SPIDER request")], "/"));
        assert!(ignored(&[("user-agent", "Visit http://spam.com!")], "/"));
        assert!(!ignored(&[("user-agent", "Mozilla/123.0")], "/"));
        assert!(ignored(&[("user-agent", "")], "/"));
        assert!(ignored(&[], "/"));
    }

    #[test]
    fn test_blacklisted_user_agents() {
        for ua in USER_AGENT_BLACKLIST {
            assert!(ignored(&[("user-agent", ua)], "/"), "{ua} must be ignored");
        }
    }

    #[test]
    fn test_spam_referrer() {
        assert!(ignored(&[("user-agent", "ua"), ("referer", "2your.site")], "/"));
        assert!(ignored(
            &[("user-agent", "ua"), ("referer", "subdomain.2your.site")],
            "/"
        ));
        assert!(ignored(&[("user-agent", "ua")], "/?ref=2your.site"));
        assert!(!ignored(
            &[("user-agent", "ua"), ("referer", "https://example.com/")],
            "/"
        ));
    }

    #[test]
    fn test_browser_version_floor() {
        let old = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/61.0.4147.135 Safari/537.36";
        assert!(ignored(&[("user-agent", old)], "/"));
        assert!(!ignored(&[("user-agent", CHROME_84)], "/"));

        let permissive = BotFilter::default();
        let map = HeaderMap::from_iter([(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static(old),
        )]);
        let uri: Uri = "/".parse().unwrap();
        assert!(!permissive.should_ignore(&RequestMeta::new(&map, &uri, None)));
    }

    #[test]
    fn test_do_not_track() {
        assert!(!ignored(&[("user-agent", CHROME_84)], "/"));
        assert!(ignored(&[("user-agent", CHROME_84), ("dnt", "1")], "/"));
        assert!(!ignored(&[("user-agent", CHROME_84), ("dnt", "0")], "/"));
    }
}
