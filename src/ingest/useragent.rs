//! String-matching user-agent classifier.
//!
//! Order matters throughout: more specific tokens are checked first because
//! most browsers carry the tokens of the engines they descend from.

use crate::model::{Browser, Os, Platform};

/// Classification of one user-agent string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub os: Os,
    pub os_version: String,
    pub browser: Browser,
    /// Full version as found in the string.
    pub browser_version: String,
    pub platform: Platform,
}

impl UserAgent {
    /// Major version of the browser, if it parses.
    pub fn browser_major(&self) -> Option<u32> {
        self.browser_version.split('.').next()?.parse().ok()
    }

    /// Browser version reduced to `major.minor`.
    pub fn browser_version_short(&self) -> String {
        self.browser_version
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }
}

pub fn parse_user_agent(ua: &str) -> UserAgent {
    let os = detect_os(ua);
    let browser = detect_browser(ua);
    UserAgent {
        os,
        os_version: detect_os_version(ua, os),
        browser,
        browser_version: detect_browser_version(ua, browser),
        platform: detect_platform(ua, os),
    }
}

fn detect_browser(ua: &str) -> Browser {
    if ua.contains("Edg/") || ua.contains("Edge/") || ua.contains("EdgA/") || ua.contains("EdgiOS/") {
        Browser::Edge
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Browser::Opera
    } else if ua.contains("MSIE ") || ua.contains("Trident/") {
        Browser::Ie
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        Browser::Firefox
    } else if ua.contains("CriOS/") || (ua.contains("Chrome/") && !ua.contains("Chromium/")) {
        Browser::Chrome
    } else if ua.contains("Safari/") && ua.contains("Version/") {
        Browser::Safari
    } else {
        Browser::Unknown
    }
}

fn detect_browser_version(ua: &str, browser: Browser) -> String {
    let prefixes: &[&str] = match browser {
        Browser::Edge => &["Edg/", "Edge/", "EdgA/", "EdgiOS/"],
        Browser::Opera => &["OPR/", "Version/", "Opera/"],
        Browser::Ie => &["MSIE ", "rv:"],
        Browser::Firefox => &["Firefox/", "FxiOS/"],
        Browser::Chrome => &["Chrome/", "CriOS/"],
        Browser::Safari => &["Version/"],
        Browser::Unknown => &[],
    };
    prefixes
        .iter()
        .find_map(|prefix| version_after(ua, prefix, false))
        .unwrap_or_default()
}

fn detect_os(ua: &str) -> Os {
    if ua.contains("Windows") {
        Os::Windows
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        // before Mac: iOS user agents also say "like Mac OS X"
        Os::Ios
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        Os::Mac
    } else if ua.contains("Android") {
        Os::Android
    } else if ua.contains("CrOS") {
        Os::ChromeOs
    } else if ua.contains("Linux") {
        Os::Linux
    } else {
        Os::Unknown
    }
}

fn detect_os_version(ua: &str, os: Os) -> String {
    match os {
        Os::Windows => version_after(ua, "Windows NT ", false)
            .map(|nt| windows_release(&nt).to_string())
            .unwrap_or_default(),
        Os::Ios => version_after(ua, "OS ", true).unwrap_or_default(),
        Os::Mac => version_after(ua, "Mac OS X ", true).unwrap_or_default(),
        Os::Android => version_after(ua, "Android ", false).unwrap_or_default(),
        Os::Linux | Os::ChromeOs | Os::Unknown => String::new(),
    }
}

/// Marketing name of a Windows NT kernel version.
fn windows_release(nt: &str) -> &str {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        other => other,
    }
}

fn detect_platform(ua: &str, os: Os) -> Platform {
    if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("iPod") {
        Platform::Mobile
    } else if os.is_desktop() {
        Platform::Desktop
    } else {
        Platform::Unknown
    }
}

/// Dotted version following `prefix`. Underscores count as dots when `underscores` is set.
fn version_after(ua: &str, prefix: &str, underscores: bool) -> Option<String> {
    let start = ua.find(prefix)? + prefix.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || (underscores && *c == '_'))
        .map(|c| if c == '_' { '.' } else { c })
        .collect();
    let version = version.trim_end_matches('.');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
