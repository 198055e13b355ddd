//! Reads cookies from request headers.
//!
//! Only the split of `Cookie` header values into `name=value` pairs is done
//! here. Pairs are yielded in header order, which is the order the multi-cookie
//! matcher walks candidates in.

use http::header::COOKIE;
use http::HeaderMap;

/// Yields every `(name, value)` pair from all `Cookie` headers, in order.
///
/// Headers that are not valid UTF-8 and pairs without `=` are skipped.
/// Surrounding double quotes are stripped from values.
pub fn request_cookies(headers: &HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name, value))
        })
}

/// Yields the values of every cookie called `name`, in header order.
pub fn cookie_values<'a>(headers: &'a HeaderMap, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    request_cookies(headers).filter(move |(n, _)| *n == name).map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(lines: &[&'static str]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for line in lines {
            h.append(COOKIE, HeaderValue::from_static(line));
        }
        h
    }

    #[test]
    fn splits_pairs_in_header_order() {
        let h = headers(&["a=1; b=2", "c=3"]);
        let pairs: Vec<_> = request_cookies(&h).collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("c", "3")]);
    }

    #[test]
    fn same_name_cookies_keep_order() {
        let h = headers(&["sid=first; other=x; sid=second"]);
        let values: Vec<_> = cookie_values(&h, "sid").collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn skips_malformed_pairs_and_strips_quotes() {
        let h = headers(&["novalue; =empty; q=\"quoted\"; ok=1"]);
        let pairs: Vec<_> = request_cookies(&h).collect();
        assert_eq!(pairs, vec![("q", "quoted"), ("ok", "1")]);
    }

    #[test]
    fn no_cookie_header_yields_nothing() {
        assert_eq!(request_cookies(&HeaderMap::new()).count(), 0);
    }
}
