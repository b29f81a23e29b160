//! Token cookies.

use std::time::Duration;

use http::HeaderMap;

use crate::config::CookieConfig;
use crate::token::extract_bearer_token;

/// Access token cookie.
pub const ACCESS_COOKIE: &str = "access_token";
/// Refresh token cookie.
pub const REFRESH_COOKIE: &str = "refresh_token";
/// Session id cookie.
pub const SESSION_COOKIE: &str = "session_id";

/// Read a cookie from the request headers.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Access token from the `access_token` cookie, else a bearer header.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    parse_cookie(headers, ACCESS_COOKIE).or_else(|| {
        let auth = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        extract_bearer_token(auth).map(str::to_string)
    })
}

/// Builds `Set-Cookie` header values with the configured attributes.
#[derive(Debug, Clone)]
pub struct CookieWriter {
    config: CookieConfig,
}

impl CookieWriter {
    /// Create a writer.
    pub fn new(config: CookieConfig) -> Self {
        Self { config }
    }

    /// An httponly cookie living for `max_age`.
    pub fn set(&self, name: &str, value: &str, max_age: Duration) -> String {
        self.render(name, value, max_age.as_secs())
    }

    /// A cookie that tells the client to drop `name`.
    pub fn clear(&self, name: &str) -> String {
        self.render(name, "", 0)
    }

    fn render(&self, name: &str, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={}; Max-Age={}; Path={}; HttpOnly; SameSite={}",
            name,
            value,
            max_age,
            self.config.path,
            self.config.same_site.as_str()
        );
        if self.config.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_cookie() {
        let map = headers(&[("cookie", "a=1; access_token=tok; session_id=")]);
        assert_eq!(parse_cookie(&map, "access_token"), Some("tok".to_string()));
        assert_eq!(parse_cookie(&map, "a"), Some("1".to_string()));
        assert_eq!(parse_cookie(&map, "session_id"), None);
        assert_eq!(parse_cookie(&map, "missing"), None);
    }

    #[test]
    fn test_parse_cookie_across_headers() {
        let map = headers(&[("cookie", "a=1"), ("cookie", "refresh_token=r")]);
        assert_eq!(parse_cookie(&map, "refresh_token"), Some("r".to_string()));
    }

    #[test]
    fn test_access_token_sources() {
        let cookie = headers(&[("cookie", "access_token=c"), ("authorization", "Bearer b")]);
        assert_eq!(access_token(&cookie), Some("c".to_string()));

        let bearer = headers(&[("authorization", "Bearer b")]);
        assert_eq!(access_token(&bearer), Some("b".to_string()));

        assert_eq!(access_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let writer = CookieWriter::new(CookieConfig::default());
        assert_eq!(
            writer.set(ACCESS_COOKIE, "tok", Duration::from_secs(900)),
            "access_token=tok; Max-Age=900; Path=/; HttpOnly; SameSite=Lax"
        );
        assert_eq!(
            writer.clear(SESSION_COOKIE),
            "session_id=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax"
        );

        let secure = CookieWriter::new(CookieConfig {
            secure: true,
            same_site: SameSite::Strict,
            path: "/api".to_string(),
        });
        let cookie = secure.set(REFRESH_COOKIE, "r", Duration::from_secs(604_800));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("Path=/api"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.ends_with("; Secure"));
    }
}
