use serde::Serialize;
use woothee::parser::Parser;

/// Browser labels reported by the device view. Declaration order is the
/// tie-break order when two browsers have the same count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    #[serde(rename = "Internet Explorer")]
    InternetExplorer,
    Other,
}

impl Browser {
    pub const ALL: [Browser; 6] = [
        Browser::Chrome,
        Browser::Firefox,
        Browser::Safari,
        Browser::Edge,
        Browser::InternetExplorer,
        Browser::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
            Browser::Safari => "Safari",
            Browser::Edge => "Edge",
            Browser::InternetExplorer => "Internet Explorer",
            Browser::Other => "Other",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Mobile, DeviceType::Tablet, DeviceType::Desktop];

    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "Mobile",
            DeviceType::Tablet => "Tablet",
            DeviceType::Desktop => "Desktop",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Classify a User-Agent string into one of the fixed browser labels.
///
/// Token checks run first and in a fixed order, because Chromium-based
/// browsers also advertise "Chrome" and "Safari" and Chrome advertises
/// "Safari". Anything the tokens miss goes through woothee; what woothee
/// can't name either is `Other`. Never fails.
pub fn classify_browser(ua: &str) -> Browser {
    if ua.contains("Edg/") || ua.contains("Edge/") || ua.contains("EdgA/") || ua.contains("EdgiOS/")
    {
        Browser::Edge
    } else if ua.contains("MSIE ") || ua.contains("Trident/") {
        Browser::InternetExplorer
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        Browser::Firefox
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        Browser::Chrome
    } else if ua.contains("Safari/") {
        Browser::Safari
    } else {
        browser_from_woothee(ua)
    }
}

fn browser_from_woothee(ua: &str) -> Browser {
    match Parser::new().parse(ua).map(|r| r.name) {
        Some("Chrome") => Browser::Chrome,
        Some("Firefox") => Browser::Firefox,
        Some("Safari") => Browser::Safari,
        Some("Edge") => Browser::Edge,
        Some("Internet Explorer") => Browser::InternetExplorer,
        _ => Browser::Other,
    }
}

/// Classify a User-Agent string into mobile / tablet / desktop.
///
/// Tablet markers win over mobile ones (iPads and Android tablets often
/// carry both). Android without a "Mobile" token is a tablet. Woothee's
/// category catches feature phones that carry no token. Everything else is
/// `Desktop`.
pub fn classify_device(ua: &str) -> DeviceType {
    let lower = ua.to_ascii_lowercase();
    if lower.contains("ipad") || lower.contains("tablet") || lower.contains("kindle") {
        DeviceType::Tablet
    } else if lower.contains("android") && !lower.contains("mobile") {
        DeviceType::Tablet
    } else if lower.contains("mobile") || lower.contains("iphone") || lower.contains("android") {
        DeviceType::Mobile
    } else {
        match Parser::new().parse(ua).map(|r| r.category) {
            Some("smartphone") | Some("mobilephone") => DeviceType::Mobile,
            _ => DeviceType::Desktop,
        }
    }
}
