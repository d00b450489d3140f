use crate::settings::Settings;
use axum::http::HeaderMap;

pub const SESSION_COOKIE_NAME: &str = "penumbra_session";

#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub session_id: String,
}

impl SessionCookie {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

        // Parse cookie header for our session cookie
        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                return Some(Self {
                    session_id: value.to_string(),
                });
            }
        }
        None
    }

    pub fn to_cookie_header(&self, settings: &Settings) -> String {
        let secure = settings.issuer().starts_with("https://");
        let max_age = settings.auth.session_ttl_secs;

        format!(
            "{}={}; HttpOnly; {}SameSite=Lax; Path=/; Max-Age={}",
            SESSION_COOKIE_NAME,
            self.session_id,
            if secure { "Secure; " } else { "" },
            max_age
        )
    }

    pub fn delete_cookie_header() -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
            SESSION_COOKIE_NAME
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_from_headers_finds_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; penumbra_session=abc123; lang=en"),
        );

        let cookie = SessionCookie::from_headers(&headers).expect("cookie not found");
        assert_eq!(cookie.session_id, "abc123");
    }

    #[test]
    fn test_from_headers_missing_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark"),
        );

        assert!(SessionCookie::from_headers(&headers).is_none());
        assert!(SessionCookie::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_cookie_header_secure_only_for_https() {
        let mut settings = Settings::default();
        let cookie = SessionCookie::new("abc123".to_string());

        let header = cookie.to_cookie_header(&settings);
        assert!(header.starts_with("penumbra_session=abc123;"));
        assert!(!header.contains("Secure"));

        settings.server.public_base_url = Some("https://authz.example.com".to_string());
        let header = cookie.to_cookie_header(&settings);
        assert!(header.contains("Secure; "));
        assert!(header.contains("Max-Age=3600"));
    }
}
