//! Request metadata capture
//!
//! Sessions and audit records carry the client IP, country, and a coarse
//! device / OS / browser classification. The classifier stays small:
//! buckets for the sessions page, not fingerprinting.

use launchkit_shared::{RequestMeta, UNKNOWN_COUNTRY, UNKNOWN_IP};

/// Sentinel for a device/OS/browser bucket the classifier could not resolve
pub const UNKNOWN_FIELD: &str = "unknown";

/// Build request metadata from raw header values. The web layer picks the
/// headers; this only applies fallbacks and classification.
pub fn capture(ip: Option<&str>, country: Option<&str>, user_agent: Option<&str>) -> RequestMeta {
    let (device, os, browser) = match user_agent {
        Some(ua) => classify_user_agent(ua),
        None => (UNKNOWN_FIELD, UNKNOWN_FIELD, UNKNOWN_FIELD),
    };

    RequestMeta {
        ip: ip.unwrap_or(UNKNOWN_IP).to_string(),
        ip_country: country.unwrap_or(UNKNOWN_COUNTRY).to_string(),
        device: device.to_string(),
        os: os.to_string(),
        browser: browser.to_string(),
    }
}

/// Classify a user-agent string into (device, os, browser) buckets
pub fn classify_user_agent(ua: &str) -> (&'static str, &'static str, &'static str) {
    let os = detect_os(ua);
    let browser = detect_browser(ua);
    let device = detect_device(ua, os);
    (device, os, browser)
}

fn detect_os(ua: &str) -> &'static str {
    // Mobile platforms first: Android UAs contain "Linux" and iOS UAs
    // contain "like Mac OS X"
    if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("Windows NT") {
        "Windows"
    } else if ua.contains("Mac OS X") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        UNKNOWN_FIELD
    }
}

fn detect_browser(ua: &str) -> &'static str {
    // Chromium derivatives embed "Chrome", and everything WebKit embeds
    // "Safari", so the most specific markers are checked first
    if ua.contains("Edg/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Chrome/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else {
        UNKNOWN_FIELD
    }
}

fn detect_device(ua: &str, os: &'static str) -> &'static str {
    if ua.contains("iPad") || ua.contains("Tablet") {
        "tablet"
    } else if ua.contains("Mobi") || ua.contains("iPhone") {
        "mobile"
    } else if ua.contains("Android") {
        // Android without a Mobile marker is a tablet form factor
        "tablet"
    } else if os != UNKNOWN_FIELD {
        "desktop"
    } else {
        UNKNOWN_FIELD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) \
         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";

    #[test]
    fn test_desktop_browsers() {
        assert_eq!(
            classify_user_agent(CHROME_WINDOWS),
            ("desktop", "Windows", "Chrome")
        );
        assert_eq!(
            classify_user_agent(FIREFOX_LINUX),
            ("desktop", "Linux", "Firefox")
        );
        assert_eq!(
            classify_user_agent(EDGE_WINDOWS),
            ("desktop", "Windows", "Edge")
        );
    }

    #[test]
    fn test_mobile_safari() {
        assert_eq!(
            classify_user_agent(SAFARI_IPHONE),
            ("mobile", "iOS", "Safari")
        );
    }

    #[test]
    fn test_unrecognized_agent() {
        assert_eq!(
            classify_user_agent("curl/8.6.0"),
            (UNKNOWN_FIELD, UNKNOWN_FIELD, UNKNOWN_FIELD)
        );
    }

    #[test]
    fn test_capture_applies_fallbacks() {
        let meta = capture(None, None, None);
        assert_eq!(meta.ip, UNKNOWN_IP);
        assert_eq!(meta.ip_country, UNKNOWN_COUNTRY);
        assert_eq!(meta.browser, UNKNOWN_FIELD);

        let meta = capture(Some("203.0.113.9"), Some("NL"), Some(CHROME_WINDOWS));
        assert_eq!(meta.ip, "203.0.113.9");
        assert_eq!(meta.ip_country, "NL");
        assert_eq!(meta.browser, "Chrome");
        assert_eq!(meta.os, "Windows");
        assert_eq!(meta.device, "desktop");
    }
}
