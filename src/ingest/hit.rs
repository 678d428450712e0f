use crate::ingest::fingerprint::{daily_salt, fingerprint};
use crate::ingest::geoip::GeoDb;
use crate::ingest::referrer::{self, Referrer};
use crate::ingest::request::RequestMeta;
use crate::ingest::session::SessionCache;
use crate::ingest::useragent::parse_user_agent;
use crate::model::{screen_class, Event, Hit};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

const MAX_URL_LEN: usize = 2000;
const MAX_PATH_LEN: usize = 2000;
const MAX_TITLE_LEN: usize = 512;
const MAX_REFERRER_LEN: usize = 2000;
const MAX_UTM_LEN: usize = 200;
const MAX_EVENT_NAME_LEN: usize = 200;
const MAX_META_LEN: usize = 200;

/// Overrides for fields otherwise read from the request itself.
///
/// Used when hits are sent from a tracking script on another origin, where
/// the page URL and referrer are passed as parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitOptions {
    pub client_id: i64,
    pub url: String,
    pub path: String,
    pub title: String,
    pub referrer: String,
    pub screen_width: i64,
    pub screen_height: i64,
}

impl HitOptions {
    /// Read `client_id`, `url`, `t`, `ref`, `w` and `h` from the query string.
    pub fn from_query(request: &RequestMeta<'_>) -> Self {
        let text = |name: &str| request.query_param(name).unwrap_or_default();
        let int = |name: &str| request.query_param(name).map_or(0, |v| int_param(&v));
        Self {
            client_id: int("client_id"),
            url: text("url"),
            path: String::new(),
            title: text("t"),
            referrer: text("ref"),
            screen_width: int("w"),
            screen_height: int("h"),
        }
    }
}

/// Payload of a custom event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOptions {
    pub name: String,
    pub duration_seconds: u32,
    pub meta: Vec<(String, String)>,
}

impl EventOptions {
    /// Metadata with unique keys. The first value of a key wins.
    pub fn unique_meta(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::with_capacity(self.meta.len());
        for (key, value) in &self.meta {
            let key = sanitize(key, MAX_META_LEN);
            if key.is_empty() || out.iter().any(|(k, _)| *k == key) {
                continue;
            }
            out.push((key, sanitize(value, MAX_META_LEN)));
        }
        out
    }
}

/// Integer query parameter; anything that doesn't parse is 0.
pub fn int_param(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

/// Truncate to `max_len` characters and drop control characters.
pub fn sanitize(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect()
}

/// Builds de-identified hits from requests.
///
/// PRIVACY: the client address and user agent only feed the fingerprint and
/// the classifiers; neither is kept on the hit.
pub struct HitBuilder {
    secret: String,
    geo: Option<Arc<dyn GeoDb>>,
}

impl HitBuilder {
    pub fn new(secret: impl Into<String>, geo: Option<Arc<dyn GeoDb>>) -> Self {
        Self {
            secret: secret.into(),
            geo,
        }
    }

    /// Build the hit for `request` at `now` and record it in `sessions`.
    pub fn hit(
        &self,
        request: &RequestMeta<'_>,
        options: &HitOptions,
        sessions: &SessionCache,
        now: DateTime<Utc>,
    ) -> Hit {
        self.build(request, options, sessions, now, true)
    }

    fn build(
        &self,
        request: &RequestMeta<'_>,
        options: &HitOptions,
        sessions: &SessionCache,
        now: DateTime<Utc>,
        page_view: bool,
    ) -> Hit {
        let user_agent = request.user_agent();
        let ip = request.client_ip();
        let client_id = options.client_id;
        let salt = daily_salt(&self.secret, now.date_naive());
        let fingerprint = fingerprint(client_id, &ip, user_agent, &salt);

        let page = PageUrl::new(request, options);
        let agent = parse_user_agent(user_agent);
        let referrer = self.referrer(request, options, page.host.as_deref());
        let (screen_width, screen_height) = screen_size(options.screen_width, options.screen_height);
        let utm = |name: &str| sanitize(&page.query_param(name), MAX_UTM_LEN);
        let path = sanitize(&page.path, MAX_PATH_LEN);

        let resolved = if page_view {
            sessions.stitch(client_id, &fingerprint, now, &path)
        } else {
            sessions.stitch_event(client_id, &fingerprint, now, &path)
        };

        Hit {
            client_id,
            fingerprint,
            time: now,
            session: resolved.session_start,
            previous_time_on_page_seconds: resolved.previous_time_on_page_seconds,
            url: sanitize(&page.url, MAX_URL_LEN),
            title: sanitize(options.title.trim(), MAX_TITLE_LEN),
            language: language(request.header("accept-language").unwrap_or("")),
            country_code: self
                .geo
                .as_ref()
                .map(|geo| geo.country_code(&ip))
                .unwrap_or_default(),
            referrer: sanitize(&referrer.referrer, MAX_REFERRER_LEN),
            referrer_name: sanitize(&referrer.name, MAX_REFERRER_LEN),
            referrer_icon: sanitize(&referrer.icon, MAX_REFERRER_LEN),
            os: agent.os,
            os_version: agent.os_version.clone(),
            browser: agent.browser,
            browser_version: agent.browser_version_short(),
            platform: agent.platform,
            screen_width,
            screen_height,
            screen_class: screen_class(screen_width).to_string(),
            utm_source: utm("utm_source"),
            utm_medium: utm("utm_medium"),
            utm_campaign: utm("utm_campaign"),
            utm_content: utm("utm_content"),
            utm_term: utm("utm_term"),
            path,
        }
    }

    /// Build an event carrying the hit of `request`.
    ///
    /// The event joins the visitor's session but does not count as a page view.
    pub fn event(
        &self,
        request: &RequestMeta<'_>,
        options: &HitOptions,
        event: &EventOptions,
        sessions: &SessionCache,
        now: DateTime<Utc>,
    ) -> Event {
        Event {
            hit: self.build(request, options, sessions, now, false),
            name: sanitize(event.name.trim(), MAX_EVENT_NAME_LEN),
            duration_seconds: event.duration_seconds,
            meta: event.unique_meta(),
        }
    }

    /// The option, then the `Referer` header, then the `ref` parameter.
    fn referrer(
        &self,
        request: &RequestMeta<'_>,
        options: &HitOptions,
        page_host: Option<&str>,
    ) -> Referrer {
        let raw = Some(options.referrer.clone())
            .filter(|r| !r.trim().is_empty())
            .or_else(|| request.header("referer").map(str::to_string))
            .or_else(|| request.query_param("ref"))
            .unwrap_or_default();
        let page_host = page_host
            .map(str::to_string)
            .or_else(|| request.header("host").and_then(referrer::host_of));
        referrer::resolve(&raw, page_host.as_deref()).unwrap_or_default()
    }
}

/// The page a hit is recorded for.
struct PageUrl {
    url: String,
    path: String,
    host: Option<String>,
    parsed: Option<Url>,
}

impl PageUrl {
    /// URL from the options or the request. A path option replaces the
    /// URL path as well.
    fn new(request: &RequestMeta<'_>, options: &HitOptions) -> Self {
        let raw = if options.url.trim().is_empty() {
            request.uri.to_string()
        } else {
            options.url.trim().to_string()
        };
        let (parsed, absolute) = match Url::parse(&raw) {
            Ok(url) if url.has_host() => (Some(url), true),
            _ => (relative_base().and_then(|base| base.join(&raw).ok()), false),
        };

        let Some(mut parsed) = parsed else {
            let path = if options.path.is_empty() {
                "/".to_string()
            } else {
                options.path.clone()
            };
            return Self {
                url: raw,
                path,
                host: None,
                parsed: None,
            };
        };

        if !options.path.is_empty() {
            parsed.set_path(&options.path);
        }
        let path = parsed.path().to_string();
        let url = if absolute {
            parsed.to_string()
        } else {
            relative(&parsed)
        };
        let host = if absolute {
            parsed.host_str().map(str::to_lowercase)
        } else {
            None
        };
        Self {
            url,
            path,
            host,
            parsed: Some(parsed),
        }
    }

    fn query_param(&self, name: &str) -> String {
        self.parsed
            .as_ref()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.into_owned())
            })
            .unwrap_or_default()
    }
}

fn relative_base() -> Option<Url> {
    Url::parse("http://localhost/").ok()
}

/// Path, query and fragment of `url`.
fn relative(url: &Url) -> String {
    let mut out = url.path().to_string();
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Primary subtag of the first `Accept-Language` entry, lower-cased.
fn language(accept_language: &str) -> String {
    accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .and_then(|tag| tag.trim().split(['-', '_']).next())
        .map(|primary| primary.trim().to_lowercase())
        .filter(|primary| primary.chars().all(|c| c.is_ascii_alphabetic()) && primary.len() <= 8)
        .unwrap_or_default()
}

/// Both sides or neither.
fn screen_size(width: i64, height: i64) -> (u32, u32) {
    if width <= 0 || height <= 0 {
        return (0, 0);
    }
    (
        u32::try_from(width).unwrap_or(u32::MAX),
        u32::try_from(height).unwrap_or(u32::MAX),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Browser, Os, Platform};
    use axum::http::{HeaderMap, HeaderValue, Uri};
    use chrono::Duration;

    const CHROME_84: &str = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/84.0.4147.135 Safari/537.36";

    struct FixedGeo;

    impl GeoDb for FixedGeo {
        fn country_code(&self, ip: &str) -> String {
            if ip == "81.2.69.142" {
                "gb".to_string()
            } else {
                String::new()
            }
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn sessions() -> SessionCache {
        SessionCache::new(None, Duration::minutes(30), 100)
    }

    fn build(headers: &HeaderMap, uri: &str, options: &HitOptions) -> Hit {
        let uri: Uri = uri.parse().unwrap();
        let request = RequestMeta::new(headers, &uri, None);
        HitBuilder::new("salt", None).hit(&request, options, &sessions(), Utc::now())
    }

    #[test]
    fn test_hit_from_request() {
        let headers = headers(&[
            (
                "accept-language",
                "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7,fr;q=0.6,nb;q=0.5,la;q=0.4",
            ),
            ("user-agent", CHROME_84),
            ("referer", "http://ref/"),
        ]);
        let uri = "/test/path?query=param&foo=bar&utm_source=test+source&utm_medium=email&utm_campaign=newsletter&utm_content=signup&utm_term=keywords";
        let hit = build(
            &headers,
            uri,
            &HitOptions {
                client_id: 42,
                title: "title".to_string(),
                screen_width: 640,
                screen_height: 1024,
                ..HitOptions::default()
            },
        );

        assert_eq!(hit.client_id, 42);
        assert_eq!(hit.fingerprint.len(), 64);
        assert_eq!(hit.session, hit.time);
        assert_eq!(hit.previous_time_on_page_seconds, 0);
        assert_eq!(hit.path, "/test/path");
        assert_eq!(hit.url, uri);
        assert_eq!(hit.title, "title");
        assert_eq!(hit.language, "de");
        assert_eq!(hit.referrer, "http://ref/");
        assert_eq!(hit.referrer_name, "ref");
        assert_eq!(hit.os, Os::Windows);
        assert_eq!(hit.os_version, "10");
        assert_eq!(hit.browser, Browser::Chrome);
        assert_eq!(hit.browser_version, "84.0");
        assert_eq!(hit.platform, Platform::Desktop);
        assert_eq!(hit.screen_width, 640);
        assert_eq!(hit.screen_height, 1024);
        assert_eq!(hit.screen_class, "XS");
        assert_eq!(hit.utm_source, "test source");
        assert_eq!(hit.utm_medium, "email");
        assert_eq!(hit.utm_campaign, "newsletter");
        assert_eq!(hit.utm_content, "signup");
        assert_eq!(hit.utm_term, "keywords");
    }

    #[test]
    fn test_hit_continues_session() {
        let headers = headers(&[("user-agent", CHROME_84)]);
        let uri: Uri = "/test/path?query=param".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        let builder = HitBuilder::new("salt", None);
        let sessions = sessions();
        let start = Utc::now() - Duration::seconds(5);

        let first = builder.hit(&request, &HitOptions::default(), &sessions, start);
        let second = builder.hit(&request, &HitOptions::default(), &sessions, Utc::now());
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(second.session, first.session);
        assert_eq!(second.previous_time_on_page_seconds, 5);
    }

    #[test]
    fn test_url_override() {
        let hit = build(
            &HeaderMap::new(),
            "http://foo.bar/test/path?query=param&foo=bar#anchor",
            &HitOptions {
                url: "http://bar.foo/new/custom/path?query=param&foo=bar#anchor".to_string(),
                ..HitOptions::default()
            },
        );
        assert_eq!(hit.path, "/new/custom/path");
        assert_eq!(hit.url, "http://bar.foo/new/custom/path?query=param&foo=bar#anchor");
    }

    #[test]
    fn test_path_and_referrer_override() {
        let hit = build(
            &HeaderMap::new(),
            "http://foo.bar/test/path?query=param&foo=bar#anchor",
            &HitOptions {
                url: "http://bar.foo/overwrite/this?query=param&foo=bar#anchor".to_string(),
                path: "/new/custom/path".to_string(),
                referrer: "http://custom.ref/".to_string(),
                ..HitOptions::default()
            },
        );
        assert_eq!(hit.path, "/new/custom/path");
        assert_eq!(hit.url, "http://bar.foo/new/custom/path?query=param&foo=bar#anchor");
        assert_eq!(hit.referrer, "http://custom.ref/");
    }

    #[test]
    fn test_self_referral_dropped() {
        let headers = headers(&[("referer", "http://bar.foo/previous")]);
        let hit = build(
            &headers,
            "/",
            &HitOptions {
                url: "http://bar.foo/page".to_string(),
                ..HitOptions::default()
            },
        );
        assert_eq!(hit.referrer, "");
        assert_eq!(hit.referrer_name, "");
    }

    #[test]
    fn test_screen_size() {
        let headers = HeaderMap::new();
        let size = |w, h| {
            let hit = build(
                &headers,
                "/",
                &HitOptions {
                    screen_width: w,
                    screen_height: h,
                    ..HitOptions::default()
                },
            );
            (hit.screen_width, hit.screen_height, hit.screen_class)
        };
        assert_eq!(size(-5, 400), (0, 0, String::new()));
        assert_eq!(size(400, 0), (0, 0, String::new()));
        assert_eq!(size(1920, 1080), (1920, 1080, "XL".to_string()));
    }

    #[test]
    fn test_country_code() {
        let headers = HeaderMap::new();
        let uri: Uri = "http://foo.bar/test/path".parse().unwrap();
        let builder = HitBuilder::new("salt", Some(Arc::new(FixedGeo)));

        let request = RequestMeta::new(&headers, &uri, Some("81.2.69.142".parse().unwrap()));
        let hit = builder.hit(&request, &HitOptions::default(), &sessions(), Utc::now());
        assert_eq!(hit.country_code, "gb");

        let request = RequestMeta::new(&headers, &uri, Some("127.0.0.1".parse().unwrap()));
        let hit = builder.hit(&request, &HitOptions::default(), &sessions(), Utc::now());
        assert_eq!(hit.country_code, "");
    }

    #[test]
    fn test_options_from_query() {
        let headers = HeaderMap::new();
        let uri: Uri = "http://test.com/my/path".parse().unwrap();
        let options = HitOptions::from_query(&RequestMeta::new(&headers, &uri, None));
        assert_eq!(options, HitOptions::default());

        let uri: Uri = "http://test.com/my/path?client_id=42&url=http://foo.bar/test&t=title&ref=http://ref/&w=640&h=1024"
            .parse()
            .unwrap();
        let options = HitOptions::from_query(&RequestMeta::new(&headers, &uri, None));
        assert_eq!(options.client_id, 42);
        assert_eq!(options.url, "http://foo.bar/test");
        assert_eq!(options.title, "title");
        assert_eq!(options.referrer, "http://ref/");
        assert_eq!(options.screen_width, 640);
        assert_eq!(options.screen_height, 1024);
    }

    #[test]
    fn test_int_param() {
        for (input, expected) in [("", 0), ("   ", 0), ("asdf", 0), ("32asdf", 0), ("42", 42)] {
            assert_eq!(int_param(input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Hello World", 5), "Hello");
        assert_eq!(sanitize("Hello World", 50), "Hello World");
        assert_eq!(sanitize("hello\x00world\x01", 50), "helloworld");
    }

    #[test]
    fn test_language() {
        assert_eq!(language("de-DE,de;q=0.9"), "de");
        assert_eq!(language("EN"), "en");
        assert_eq!(language("fr;q=0.5"), "fr");
        assert_eq!(language(""), "");
        assert_eq!(language("*"), "");
    }

    #[test]
    fn test_event_meta_first_value_wins() {
        let options = EventOptions {
            name: "signup".to_string(),
            duration_seconds: 3,
            meta: vec![
                ("plan".to_string(), "pro".to_string()),
                ("seats".to_string(), "3".to_string()),
                ("plan".to_string(), "free".to_string()),
                (String::new(), "x".to_string()),
            ],
        };
        assert_eq!(
            options.unique_meta(),
            vec![
                ("plan".to_string(), "pro".to_string()),
                ("seats".to_string(), "3".to_string())
            ]
        );

        let headers = headers(&[("user-agent", CHROME_84)]);
        let uri: Uri = "/signup".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        let event = HitBuilder::new("salt", None).event(
            &request,
            &HitOptions::default(),
            &options,
            &sessions(),
            Utc::now(),
        );
        assert_eq!(event.name, "signup");
        assert_eq!(event.duration_seconds, 3);
        assert_eq!(event.meta.len(), 2);
        assert_eq!(event.hit.path, "/signup");
    }

    #[test]
    fn test_event_does_not_reset_time_on_page() {
        let headers = headers(&[("user-agent", CHROME_84)]);
        let uri: Uri = "/pricing".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        let builder = HitBuilder::new("salt", None);
        let sessions = sessions();
        let start = Utc::now() - Duration::seconds(20);

        let first = builder.hit(&request, &HitOptions::default(), &sessions, start);
        let event = builder.event(
            &request,
            &HitOptions::default(),
            &EventOptions {
                name: "click".to_string(),
                ..EventOptions::default()
            },
            &sessions,
            start + Duration::seconds(5),
        );
        assert_eq!(event.hit.session, first.session);

        let next = builder.hit(
            &request,
            &HitOptions::default(),
            &sessions,
            start + Duration::seconds(12),
        );
        assert_eq!(next.session, first.session);
        assert_eq!(next.previous_time_on_page_seconds, 12);
    }
}
