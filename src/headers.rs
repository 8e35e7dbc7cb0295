//! header folding and typed, attribute-addressable header views.

use std::time::{Duration, SystemTime};

use http::{
    header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE, DATE, EXPIRES, LAST_MODIFIED, RETRY_AFTER, SET_COOKIE},
    HeaderValue,
};

use crate::altsvc::AltSvcOffer;

/// comma-join every occurrence of `name` in wire order, per rfc 7230 §3.2.
/// returns `None` when the header is absent or any occurrence is not valid
/// utf-8.
pub fn fold_multi(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let mut out: Option<String> = None;
    for value in headers.get_all(name) {
        let value = value.to_str().ok()?;
        match out {
            Some(ref mut joined) => {
                joined.push_str(", ");
                joined.push_str(value);
            }
            None => out = Some(value.to_owned()),
        }
    }
    out
}

/// typed read-only view over a response header map. each well-known header
/// has a parsing accessor; anything else falls back to the raw string.
#[derive(Debug, Clone, Copy)]
pub struct TypedHeaders<'a> {
    headers: &'a HeaderMap,
}

impl<'a> TypedHeaders<'a> {
    pub(crate) fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }

    /// raw folded value for any header name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = HeaderName::try_from(name).ok()?;
        fold_multi(self.headers, &name)
    }

    /// parsed `Content-Type` with its parameters (charset, boundary, ..).
    pub fn content_type(&self) -> Option<mime::Mime> {
        self.headers
            .get(CONTENT_TYPE)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    /// charset parameter of the content type, lowercased.
    pub fn charset(&self) -> Option<String> {
        self.content_type()?
            .get_param(mime::CHARSET)
            .map(|cs| cs.as_str().to_ascii_lowercase())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    pub fn date(&self) -> Option<SystemTime> {
        self.parse_date(&DATE)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.parse_date(&LAST_MODIFIED)
    }

    pub fn expires(&self) -> Option<SystemTime> {
        self.parse_date(&EXPIRES)
    }

    /// `Retry-After` as either a delay or an absolute date.
    pub fn retry_after(&self) -> Option<RetryAfter> {
        let raw = self.headers.get(RETRY_AFTER)?.to_str().ok()?;
        if let Ok(secs) = raw.trim().parse::<u64>() {
            return Some(RetryAfter::Delay(Duration::from_secs(secs)));
        }
        httpdate::parse_http_date(raw).ok().map(RetryAfter::Date)
    }

    /// every `Set-Cookie` occurrence parsed; malformed ones are skipped.
    pub fn set_cookie(&self) -> Vec<cookie::Cookie<'static>> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| cookie::Cookie::parse(raw).ok())
            .map(|c| c.into_owned())
            .collect()
    }

    /// parsed `Alt-Svc` offers. `None` when the header is absent, an empty
    /// vec for `Alt-Svc: clear`.
    pub fn alt_svc(&self) -> Option<Vec<AltSvcOffer>> {
        let raw = self.headers.get(http::header::ALT_SVC)?.to_str().ok()?;
        Some(crate::altsvc::parse(raw).unwrap_or_default())
    }

    fn parse_date(&self, name: &HeaderName) -> Option<SystemTime> {
        httpdate::parse_http_date(self.headers.get(name)?.to_str().ok()?).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfter {
    Delay(Duration),
    Date(SystemTime),
}

pub(crate) fn content_type_is_json(headers: &HeaderMap) -> bool {
    let Some(mime) = TypedHeaders::new(headers).content_type() else {
        return false;
    };
    mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON)
}

pub(crate) fn header_value_from_u64(len: u64) -> HeaderValue {
    let mut buf = itoa::Buffer::new();
    HeaderValue::from_str(buf.format(len)).unwrap()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fold_preserves_wire_order() {
        let mut headers = HeaderMap::new();
        headers.append("x-thing", HeaderValue::from_static("a"));
        headers.append("X-Thing", HeaderValue::from_static("b"));
        headers.append("x-thing", HeaderValue::from_static("c"));

        let name = HeaderName::from_static("x-thing");
        assert_eq!(fold_multi(&headers, &name).unwrap(), "a, b, c");
    }

    #[test]
    fn typed_content_type_and_charset() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=UTF-8"),
        );

        let typed = TypedHeaders::new(&headers);
        let mime = typed.content_type().unwrap();
        assert_eq!(mime.type_(), mime::TEXT);
        assert_eq!(typed.charset().unwrap(), "utf-8");
    }

    #[test]
    fn typed_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            DATE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert!(TypedHeaders::new(&headers).date().is_some());
    }

    #[test]
    fn typed_set_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; HttpOnly"));

        let cookies = TypedHeaders::new(&headers).set_cookie();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name(), "a");
        assert!(cookies[1].http_only().unwrap_or(false));
    }

    #[test]
    fn json_media_types() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(content_type_is_json(&headers));

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        assert!(content_type_is_json(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!content_type_is_json(&headers));
    }

    #[test]
    fn retry_after_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(
            TypedHeaders::new(&headers).retry_after().unwrap(),
            RetryAfter::Delay(Duration::from_secs(120))
        );

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert!(matches!(
            TypedHeaders::new(&headers).retry_after(),
            Some(RetryAfter::Date(_))
        ));
    }
}
