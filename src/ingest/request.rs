use axum::http::{HeaderMap, Uri};
use std::net::IpAddr;

/// Borrowed view of the parts of an HTTP request that ingestion reads.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    pub peer: Option<IpAddr>,
}

impl<'a> RequestMeta<'a> {
    pub const fn new(headers: &'a HeaderMap, uri: &'a Uri, peer: Option<IpAddr>) -> Self {
        Self { headers, uri, peer }
    }

    /// Header value as text. Missing and non-ASCII values are `None`.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> &'a str {
        self.header("user-agent").unwrap_or("").trim()
    }

    /// First percent-decoded value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer.
    ///
    /// PRIVACY: used for fingerprinting and the country lookup only.
    pub fn client_ip(&self) -> String {
        self.header("x-forwarded-for")
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.header("x-real-ip").map(str::trim))
            .map(str::to_string)
            .or_else(|| self.peer.map(|ip| ip.to_string()))
            .unwrap_or_default()
    }
}
