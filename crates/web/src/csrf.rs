//! Billing redirect-back CSRF pair
//!
//! Before handing the browser to the payment processor, the subscribe
//! endpoint issues a random token as both a cookie and a query parameter
//! embedded in the processor's return URLs. On return, any request carrying
//! a processor marker must present a matching pair.

use std::collections::HashMap;
use uuid::Uuid;

/// Cookie lifetime; one minute past the processor's 30-minute checkout window
pub const CSRF_TTL_SECONDS: i64 = 60 * 31;

/// Query parameters only the processor redirect-back flow sets
pub const RETURN_MARKERS: [&str; 3] = ["payment_status", "session_id", "from_portal"];

/// Random uuid-hex token, no dashes
pub fn issue_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn has_return_markers(query: &HashMap<String, String>) -> bool {
    RETURN_MARKERS.iter().any(|marker| query.contains_key(*marker))
}

/// Both halves must be present, non-empty, and equal
pub fn pair_matches(query_token: Option<&str>, cookie_token: Option<&str>) -> bool {
    match (query_token, cookie_token) {
        (Some(q), Some(c)) => !q.is_empty() && q == c,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_token_shape() {
        let token = issue_token();
        assert_eq!(token.len(), 32);
        assert!(!token.contains('-'));
        assert_ne!(token, issue_token());
    }

    #[test]
    fn test_return_marker_detection() {
        let mut query = HashMap::new();
        assert!(!has_return_markers(&query));

        query.insert("plan".to_string(), "pro".to_string());
        assert!(!has_return_markers(&query));

        query.insert("payment_status".to_string(), "success".to_string());
        assert!(has_return_markers(&query));
    }

    #[test]
    fn test_pair_matching() {
        assert!(pair_matches(Some("abc"), Some("abc")));
        assert!(!pair_matches(Some("abc"), Some("xyz")));
        assert!(!pair_matches(None, Some("abc")));
        assert!(!pair_matches(Some("abc"), None));
        assert!(!pair_matches(Some(""), Some("")));
    }
}
