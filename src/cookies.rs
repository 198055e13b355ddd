//! Cookies: the [`Cookie`] record written for a session and the minimal
//! request-side helpers the stores need.
//!
//! Stores never parse `Set-Cookie` or keep a jar. On the way in they read the
//! `Cookie` request header(s) as `(name, value)` pairs in header order; on the
//! way out they render one [`Cookie`] per saved session into a `Set-Cookie`
//! response header.

mod cookie;
mod request;

pub use cookie::is_valid_cookie_name;
pub use cookie::Cookie;

pub use request::cookie_values;
pub use request::request_cookies;
