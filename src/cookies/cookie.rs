//! The `Set-Cookie` record for a session.
//!
//! A [`Cookie`] is built from a session name, the encoded token and the
//! session's [`Options`] snapshot, copying every attribute verbatim. The
//! expiry is only derived when the header is rendered:
//!
//! - `max_age > 0` renders `Expires=<now + max_age>; Max-Age=<max_age>`,
//! - `max_age <= 0` renders an expiry in the past and `Max-Age=0`, so the
//!   browser drops the cookie immediately.
//!
//! ```rust
//! use gosub_sessions::config::Options;
//! use gosub_sessions::cookies::Cookie;
//!
//! let cookie = Cookie::from_options("session", "token", &Options::default());
//! let header = cookie.to_header_string().unwrap();
//! assert!(header.starts_with("session=token; Path=/; Expires="));
//! assert!(header.contains("Max-Age=2592000"));
//! ```

use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use crate::config::{Options, SameSite};
use crate::errors::SessionError;

/// A cookie as emitted for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,

    /// Encoded cookie value. Empty for deletion cookies.
    pub value: String,

    /// Path scoping. Empty omits the attribute.
    pub path: String,

    /// Domain scoping. Empty means host-only.
    pub domain: String,

    /// Lifetime in seconds; `<= 0` expires the cookie immediately.
    pub max_age: i64,

    /// If `true`, cookie is sent only over HTTPS.
    pub secure: bool,

    /// If `true`, cookie is hidden from client-side scripts (`document.cookie`).
    pub http_only: bool,

    /// SameSite policy. [`SameSite::Default`] omits the attribute.
    pub same_site: SameSite,
}

impl Cookie {
    /// Builds a cookie, taking every attribute verbatim from `options`.
    pub fn from_options(name: &str, value: &str, options: &Options) -> Self {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            path: options.path.clone(),
            domain: options.domain.clone(),
            max_age: options.max_age,
            secure: options.secure,
            http_only: options.http_only,
            same_site: options.same_site,
        }
    }

    /// Renders the `Set-Cookie` header value using the current time for `Expires`.
    pub fn to_header_string(&self) -> Result<String, SessionError> {
        self.to_header_string_at(OffsetDateTime::now_utc())
    }

    /// Renders the `Set-Cookie` header value relative to `now`.
    pub fn to_header_string_at(&self, now: OffsetDateTime) -> Result<String, SessionError> {
        if !is_valid_cookie_name(&self.name) {
            return Err(SessionError::InvalidCookieName(self.name.clone()));
        }

        let mut out = format!("{}={}", self.name, self.value);
        if !self.path.is_empty() {
            out.push_str("; Path=");
            out.push_str(&self.path);
        }
        if !self.domain.is_empty() {
            out.push_str("; Domain=");
            out.push_str(self.domain.trim_start_matches('.'));
        }

        let expires = if self.max_age > 0 {
            now.checked_add(Duration::seconds(self.max_age))
        } else {
            Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(1))
        };
        if let Some(expires) = expires {
            out.push_str("; Expires=");
            out.push_str(&http_date(expires)?);
        }
        out.push_str(&format!("; Max-Age={}", self.max_age.max(0)));

        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(policy) = self.same_site.as_attribute() {
            out.push_str("; SameSite=");
            out.push_str(policy);
        }
        Ok(out)
    }

    /// Appends this cookie as a `Set-Cookie` header.
    pub fn append_to(&self, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let rendered = self.to_header_string()?;
        let value = HeaderValue::from_str(&rendered).map_err(|e| SessionError::Header(e.to_string()))?;
        headers.append(SET_COOKIE, value);
        Ok(())
    }
}

/// Formats `at` as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn http_date(at: OffsetDateTime) -> Result<String, SessionError> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .map_err(|e| SessionError::Header(e.to_string()))
}

/// Returns true if `name` is a non-empty RFC 7230 token, as required for cookie names.
pub fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_byte)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    fn options(path: &str, domain: &str, max_age: i64, secure: bool, http_only: bool) -> Options {
        Options { path: path.into(), domain: domain.into(), max_age, secure, http_only, ..Options::default() }
    }

    #[test]
    fn from_options_copies_every_field() {
        let cases = [
            ("", "bar", "/foo/bar", "foo.example.com", 3600, true, true),
            ("foo", "", "/foo/bar", "foo.example.com", 3600, true, true),
            ("foo", "bar", "", "foo.example.com", 3600, true, true),
            ("foo", "bar", "/foo/bar", "", 3600, true, true),
            ("foo", "bar", "/foo/bar", "foo.example.com", 0, true, true),
            ("foo", "bar", "/foo/bar", "foo.example.com", 3600, false, true),
            ("foo", "bar", "/foo/bar", "foo.example.com", 3600, true, false),
        ];
        for (name, value, path, domain, max_age, secure, http_only) in cases {
            let c = Cookie::from_options(name, value, &options(path, domain, max_age, secure, http_only));
            assert_eq!(c.name, name);
            assert_eq!(c.value, value);
            assert_eq!(c.path, path);
            assert_eq!(c.domain, domain);
            assert_eq!(c.max_age, max_age);
            assert_eq!(c.secure, secure);
            assert_eq!(c.http_only, http_only);
        }
    }

    #[test]
    fn from_options_copies_same_site() {
        for policy in [SameSite::Default, SameSite::Lax, SameSite::Strict, SameSite::None] {
            let opts = Options { same_site: policy, ..Options::default() };
            assert_eq!(Cookie::from_options("", "", &opts).same_site, policy);
        }
    }

    #[test]
    fn renders_all_attributes() {
        let opts = Options {
            path: "/app".into(),
            domain: ".example.com".into(),
            max_age: 60,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        };
        let header = Cookie::from_options("sid", "abc", &opts).to_header_string_at(NOW).unwrap();
        assert_eq!(
            header,
            "sid=abc; Path=/app; Domain=example.com; Expires=Fri, 01 Mar 2024 12:01:00 GMT; Max-Age=60; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn non_positive_max_age_expires_immediately() {
        for max_age in [0, -1] {
            let opts = Options { max_age, ..Options::default() };
            let header = Cookie::from_options("sid", "", &opts).to_header_string_at(NOW).unwrap();
            assert_eq!(header, "sid=; Path=/; Expires=Thu, 01 Jan 1970 00:00:01 GMT; Max-Age=0");
        }
    }

    #[test]
    fn invalid_names_are_not_rendered() {
        let c = Cookie::from_options("session:key", "v", &Options::default());
        assert!(matches!(c.to_header_string_at(NOW), Err(SessionError::InvalidCookieName(_))));

        let mut headers = HeaderMap::new();
        assert!(c.append_to(&mut headers).is_err());
        assert!(headers.get(SET_COOKIE).is_none());
    }

    #[test]
    fn append_adds_one_header_per_cookie() {
        let mut headers = HeaderMap::new();
        Cookie::from_options("a", "1", &Options::default()).append_to(&mut headers).unwrap();
        Cookie::from_options("b", "2", &Options::default()).append_to(&mut headers).unwrap();
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn cookie_name_token_rules() {
        assert!(is_valid_cookie_name("session-key"));
        assert!(is_valid_cookie_name("my.sid_1"));
        assert!(!is_valid_cookie_name(""));
        assert!(!is_valid_cookie_name("session:key"));
        assert!(!is_valid_cookie_name("has space"));
        assert!(!is_valid_cookie_name("semi;colon"));
        assert!(!is_valid_cookie_name("caf\u{e9}"));
    }
}
