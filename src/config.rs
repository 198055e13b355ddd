//! Session cookie options.
//!
//! [`Options`] holds the cookie attributes a store applies to every session it
//! issues. Each session receives its *own copy* of the store defaults when it is
//! created, so changing the store afterwards never rewrites sessions that are
//! already in flight.
//!
//! `Options` provides sensible defaults via [`Default`] and a fluent
//! [`Options::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_sessions::config::Options;
//! let opts = Options::default();
//! assert_eq!(opts.path, "/");
//! assert_eq!(opts.max_age, 86400 * 30);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use gosub_sessions::config::{Options, SameSite};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let opts = Options::builder()
//!     .path("/app")
//!     .domain("example.com")
//!     .max_age(3600)
//!     .secure(true)
//!     .http_only(true)
//!     .same_site(SameSite::Lax)
//!     .build()?; // returns Result<Options, OptionsError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `path`: Cookie `Path` attribute (default: `/`).
//! - `domain`: Cookie `Domain` attribute; empty means host-only.
//! - `max_age`: Lifetime in seconds (default: 30 days). `<= 0` deletes the session on save.
//! - `secure`: Send the cookie over HTTPS only.
//! - `http_only`: Hide the cookie from client-side scripts.
//! - `same_site`: `SameSite` policy; [`SameSite::Default`] omits the attribute.
//!
//! # Errors
//!
//! Builder validation can return [`OptionsError`] if a path or domain contains
//! characters that cannot appear in a `Set-Cookie` attribute, or when
//! `SameSite=None` is requested without `Secure`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default cookie path for new stores.
pub const DEFAULT_PATH: &str = "/";
/// Default session lifetime for new stores: 30 days.
pub const DEFAULT_MAX_AGE: i64 = 86400 * 30;
/// Default upper bound for encoded values written by the filesystem store.
pub const DEFAULT_MAX_LENGTH: usize = 4096;
/// Values key used by the flash queue when no custom key is given.
pub const FLASH_KEY: &str = "_flash";

/// `SameSite` cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    /// Leave the attribute out and let the browser decide.
    #[default]
    Default,
    Lax,
    Strict,
    None,
}

impl SameSite {
    /// Attribute value as rendered in `Set-Cookie`, `None` when omitted.
    pub fn as_attribute(&self) -> Option<&'static str> {
        match self {
            SameSite::Default => None,
            SameSite::Lax => Some("Lax"),
            SameSite::Strict => Some("Strict"),
            SameSite::None => Some("None"),
        }
    }
}

/// Cookie attributes for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub path: String,
    pub domain: String,
    /// Seconds until expiry. Zero or negative means "delete on save".
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            domain: String::new(),
            max_age: DEFAULT_MAX_AGE,
            secure: false,
            http_only: false,
            same_site: SameSite::Default,
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// True when saving a session with these options must delete it.
    pub fn is_expired(&self) -> bool {
        self.max_age <= 0
    }
}

/// Builder for [`Options`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    inner: Options,
}

impl OptionsBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut Options)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn path<S: Into<String>>(self, path: S) -> Self { self.map(|o| o.path = path.into()) }
    pub fn domain<S: Into<String>>(self, domain: S) -> Self { self.map(|o| o.domain = domain.into()) }
    pub fn max_age(self, secs: i64) -> Self { self.map(|o| o.max_age = secs) }
    pub fn secure(self, on: bool) -> Self { self.map(|o| o.secure = on) }
    pub fn http_only(self, on: bool) -> Self { self.map(|o| o.http_only = on) }
    pub fn same_site(self, policy: SameSite) -> Self { self.map(|o| o.same_site = policy) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut Options)) -> Self { self.map(f) }

    /// Validate and build the final options.
    pub fn build(self) -> Result<Options, OptionsError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    InvalidPath(String),
    InvalidDomain(String),
    InsecureSameSiteNone,
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::InvalidPath(p) =>
                write!(f, "cookie path {p:?} contains characters not allowed in Set-Cookie"),
            OptionsError::InvalidDomain(d) =>
                write!(f, "cookie domain {d:?} contains characters not allowed in Set-Cookie"),
            OptionsError::InsecureSameSiteNone =>
                write!(f, "SameSite=None requires the secure flag"),
        }
    }
}
impl std::error::Error for OptionsError {}

fn is_attribute_safe(value: &str) -> bool {
    value.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b';')
}

fn validate(o: &Options) -> Result<(), OptionsError> {
    if !is_attribute_safe(&o.path) {
        return Err(OptionsError::InvalidPath(o.path.clone()));
    }
    if !is_attribute_safe(&o.domain) || o.domain.contains(' ') {
        return Err(OptionsError::InvalidDomain(o.domain.clone()));
    }
    if o.same_site == SameSite::None && !o.secure {
        return Err(OptionsError::InsecureSameSiteNone);
    }
    Ok(())
}
