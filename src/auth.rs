//! Bearer-token authentication for the WebSocket handshake. Authentication
//! happens once at connection setup via a token carried in a header,
//! `Authorization` bearer value, or query parameter.

use axum::http::{HeaderMap, Uri};
use url::form_urlencoded;

const TOKEN_HEADER: &str = "x-automaton-token";

/// Accepted bearer tokens. An empty list means authentication is disabled.
#[derive(Clone, Debug, Default)]
pub struct AuthPolicy {
    allowed_tokens: Vec<String>,
}

impl AuthPolicy {
    pub fn new(allowed_tokens: Vec<String>) -> Self {
        Self { allowed_tokens }
    }

    pub fn is_disabled(&self) -> bool {
        self.allowed_tokens.is_empty()
    }

    pub fn allows(&self, token: &str) -> bool {
        self.is_disabled() || self.allowed_tokens.iter().any(|allowed| allowed == token)
    }

    /// Check the handshake request, returning `true` iff the connection may
    /// proceed. The caller is responsible for closing the connection with a
    /// reason code when this returns `false`.
    pub fn authorize(&self, headers: &HeaderMap, uri: &Uri) -> bool {
        if self.is_disabled() {
            return true;
        }
        match extract_token(headers, uri) {
            Some(token) => self.allows(&token),
            None => false,
        }
    }
}

/// Custom header → `Authorization: Bearer` → query param, in that order of
/// precedence.
fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(TOKEN_HEADER) {
        if let Ok(raw) = value.to_str() {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(raw) = value.to_str() {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                let trimmed = token.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    if let Some(query) = uri.query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == "token" || key == "auth_token" {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{AUTHORIZATION, HeaderValue};

    #[test]
    fn empty_policy_disables_auth() {
        let policy = AuthPolicy::new(vec![]);
        assert!(policy.authorize(&HeaderMap::new(), &"/ws".parse().unwrap()));
    }

    #[test]
    fn custom_header_token_is_accepted() {
        let policy = AuthPolicy::new(vec!["secret".into()]);
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("secret"));
        assert!(policy.authorize(&headers, &"/ws".parse().unwrap()));
    }

    #[test]
    fn bearer_header_token_is_accepted() {
        let policy = AuthPolicy::new(vec!["secret".into()]);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        assert!(policy.authorize(&headers, &"/ws".parse().unwrap()));
    }

    #[test]
    fn query_param_token_is_accepted() {
        let policy = AuthPolicy::new(vec!["secret".into()]);
        let uri: Uri = "/ws?token=secret".parse().unwrap();
        assert!(policy.authorize(&HeaderMap::new(), &uri));
    }

    #[test]
    fn wrong_or_missing_token_is_rejected() {
        let policy = AuthPolicy::new(vec!["secret".into()]);
        assert!(!policy.authorize(&HeaderMap::new(), &"/ws".parse().unwrap()));
        let uri: Uri = "/ws?token=wrong".parse().unwrap();
        assert!(!policy.authorize(&HeaderMap::new(), &uri));
    }
}
