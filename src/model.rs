use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating system families recognized by the user-agent parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Windows,
    Mac,
    Linux,
    Ios,
    Android,
    ChromeOs,
    #[default]
    Unknown,
}

impl Os {
    /// Canonical name written to storage. `Unknown` is stored as an empty string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Mac => "Mac",
            Self::Linux => "Linux",
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::ChromeOs => "Chrome OS",
            Self::Unknown => "",
        }
    }

    /// Inverse of [`Os::as_str`]. Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        [
            Self::Windows,
            Self::Mac,
            Self::Linux,
            Self::Ios,
            Self::Android,
            Self::ChromeOs,
        ]
        .into_iter()
        .find(|os| os.as_str() == name)
        .unwrap_or_default()
    }

    /// Operating systems that imply a desktop-class device.
    pub const fn is_desktop(self) -> bool {
        matches!(self, Self::Windows | Self::Mac | Self::Linux | Self::ChromeOs)
    }
}

/// Browser families recognized by the user-agent parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Opera,
    Edge,
    Ie,
    #[default]
    Unknown,
}

impl Browser {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chrome => "Chrome",
            Self::Firefox => "Firefox",
            Self::Safari => "Safari",
            Self::Opera => "Opera",
            Self::Edge => "Edge",
            Self::Ie => "IE",
            Self::Unknown => "",
        }
    }

    /// Inverse of [`Browser::as_str`], ignoring case. Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        [
            Self::Chrome,
            Self::Firefox,
            Self::Safari,
            Self::Opera,
            Self::Edge,
            Self::Ie,
        ]
        .into_iter()
        .find(|browser| browser.as_str().eq_ignore_ascii_case(name))
        .unwrap_or_default()
    }
}

/// Device class of a hit. Stored as two flags (`desktop`, `mobile`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Mobile,
    #[default]
    Unknown,
}

impl Platform {
    pub const fn is_desktop(self) -> bool {
        matches!(self, Self::Desktop)
    }

    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// One de-identified page view.
///
/// PRIVACY: no IP address or raw user agent is kept. The fingerprint is a salted
/// HMAC that rotates daily and cannot be reversed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hit {
    pub client_id: i64,
    pub fingerprint: String,
    pub time: DateTime<Utc>,
    pub session: DateTime<Utc>,
    pub previous_time_on_page_seconds: u32,
    pub path: String,
    pub url: String,
    pub title: String,
    pub language: String,
    pub country_code: String,
    pub referrer: String,
    pub referrer_name: String,
    pub referrer_icon: String,
    pub os: Os,
    pub os_version: String,
    pub browser: Browser,
    pub browser_version: String,
    pub platform: Platform,
    pub screen_width: u32,
    pub screen_height: u32,
    pub screen_class: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
}

/// A named custom event attached to the hit it was sent from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Event {
    pub hit: Hit,
    pub name: String,
    pub duration_seconds: u32,
    /// Ordered `(key, value)` pairs with unique keys.
    pub meta: Vec<(String, String)>,
}

impl Event {
    pub fn meta_keys(&self) -> impl Iterator<Item = &str> {
        self.meta.iter().map(|(k, _)| k.as_str())
    }

    pub fn meta_values(&self) -> impl Iterator<Item = &str> {
        self.meta.iter().map(|(_, v)| v.as_str())
    }
}

/// Cursor of the most recent hit of one visitor, used to stitch the next hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub path: String,
    pub time: DateTime<Utc>,
    pub session_start: DateTime<Utc>,
}

/// Screen class buckets by width in CSS pixels. A width of 0 has no class.
pub fn screen_class(width: u32) -> &'static str {
    match width {
        0 => "",
        2560.. => "XXL",
        1920.. => "XL",
        1280.. => "L",
        1024.. => "M",
        768.. => "S",
        _ => "XS",
    }
}
