//! rfc 6265 cookie storage and request dispatch.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime},
};

use cookie::{Cookie, Expiration, SameSite};
use http::{header::SET_COOKIE, HeaderMap, HeaderValue, Uri};
use tracing::warn;

/// one cookie as stored by the jar, with its scoping attributes resolved
/// against the url it arrived on.
#[derive(Debug, Clone)]
pub struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
    expires: Option<SystemTime>,
}

impl StoredCookie {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.expires, Some(deadline) if deadline <= now)
    }
}

type Key = (String, String, String);

/// cookie jar indexed by (domain, path, name). shared by every request of a
/// session; a per-request cookie map merges on top without mutating it.
#[derive(Debug, Default)]
pub struct Jar {
    cookies: Mutex<HashMap<Key, StoredCookie>>,
}

impl Jar {
    pub fn new() -> Self {
        Self::default()
    }

    /// store a parsed cookie, scoping unset attributes against `url` per
    /// rfc 6265 §5.3. cookies whose domain does not cover the request host
    /// are rejected.
    pub fn set(&self, url: &Uri, cookie: &Cookie<'_>) {
        let Some(host) = url.host().map(|h| h.to_ascii_lowercase()) else {
            return;
        };

        let (domain, host_only) = match cookie.domain() {
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                if !domain_match(&host, &domain) {
                    warn!(name = cookie.name(), %domain, %host, "rejecting cookie for foreign domain");
                    return;
                }
                (domain, false)
            }
            None => (host.clone(), true),
        };

        let path = match cookie.path() {
            Some(path) if path.starts_with('/') => path.to_owned(),
            _ => default_path(url.path()),
        };

        // max-age takes precedence over expires per §5.3 step 3.
        let expires = match (cookie.max_age(), cookie.expires()) {
            (Some(max_age), _) => Some(add_signed(SystemTime::now(), max_age)),
            (None, Some(Expiration::DateTime(date))) => {
                let ts = date.unix_timestamp();
                Some(if ts <= 0 {
                    SystemTime::UNIX_EPOCH
                } else {
                    SystemTime::UNIX_EPOCH + Duration::from_secs(ts as u64)
                })
            }
            _ => None,
        };

        let stored = StoredCookie {
            name: cookie.name().to_owned(),
            value: cookie.value().to_owned(),
            domain,
            host_only,
            path,
            secure: cookie.secure().unwrap_or(false),
            http_only: cookie.http_only().unwrap_or(false),
            same_site: cookie.same_site(),
            expires,
        };

        let key = (
            stored.domain.clone(),
            stored.path.clone(),
            stored.name.clone(),
        );
        self.cookies.lock().unwrap().insert(key, stored);
    }

    /// harvest every `Set-Cookie` of a response received from `url`.
    pub fn update_from_response(&self, url: &Uri, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            match Cookie::parse(raw) {
                Ok(cookie) => self.set(url, &cookie),
                Err(e) => warn!(error = %e, "skipping malformed set-cookie header"),
            }
        }
    }

    /// cookies matching a request url per rfc 6265 §5.4, most specific path
    /// first. `initiator_host` is the host context the request originates
    /// from; `SameSite=Strict` cookies are withheld when it differs.
    pub fn cookies_for(&self, url: &Uri, initiator_host: Option<&str>) -> Vec<(String, String)> {
        let Some(host) = url.host().map(|h| h.to_ascii_lowercase()) else {
            return Vec::new();
        };
        let is_https = url.scheme_str() == Some("https");
        let path = if url.path().is_empty() { "/" } else { url.path() };
        let now = SystemTime::now();

        let mut matched: Vec<StoredCookie> = self
            .cookies
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.is_expired(now))
            .filter(|c| {
                if c.host_only {
                    host == c.domain
                } else {
                    domain_match(&host, &c.domain)
                }
            })
            .filter(|c| path_match(path, &c.path))
            .filter(|c| !c.secure || is_https)
            .filter(|c| match c.same_site {
                Some(SameSite::Strict) => {
                    initiator_host.map(|h| h.eq_ignore_ascii_case(&host)).unwrap_or(true)
                }
                _ => true,
            })
            .cloned()
            .collect();

        // longer paths first, per §5.4 step 2.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        matched
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect()
    }

    /// render the `Cookie` header value for a request, merging `extra`
    /// per-request cookies over the jar's matches (the jar stays untouched).
    pub(crate) fn header_for(
        &self,
        url: &Uri,
        initiator_host: Option<&str>,
        extra: &[(String, String)],
    ) -> Option<HeaderValue> {
        let mut pairs = self.cookies_for(url, initiator_host);

        for (name, value) in extra {
            match pairs.iter_mut().find(|(n, _)| n == name) {
                Some(pair) => pair.1 = value.clone(),
                None => pairs.push((name.clone(), value.clone())),
            }
        }

        if pairs.is_empty() {
            return None;
        }

        let rendered = pairs
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ");

        HeaderValue::from_str(&rendered).ok()
    }

    /// snapshot of every live cookie.
    pub fn iter(&self) -> Vec<StoredCookie> {
        let now = SystemTime::now();
        self.cookies
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn clear_expired(&self) {
        let now = SystemTime::now();
        self.cookies.lock().unwrap().retain(|_, c| !c.is_expired(now));
    }

    /// remove every cookie scoped to `domain` (exact match on the stored
    /// domain attribute).
    pub fn clear_domain(&self, domain: &str) {
        let domain = domain.to_ascii_lowercase();
        self.cookies.lock().unwrap().retain(|_, c| c.domain != domain);
    }

    pub fn clear(&self) {
        self.cookies.lock().unwrap().clear();
    }
}

// rfc 6265 §5.1.3. `domain` is expected lowercased without a leading dot.
fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return false;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

// rfc 6265 §5.1.4.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_owned();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(idx) => request_path[..idx].to_owned(),
    }
}

fn add_signed(now: SystemTime, delta: cookie::time::Duration) -> SystemTime {
    if delta.is_negative() {
        SystemTime::UNIX_EPOCH
    } else {
        now + Duration::from_secs(delta.whole_seconds() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn url(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn domain_matching() {
        assert!(domain_match("example.test", "example.test"));
        assert!(domain_match("sub.example.test", "example.test"));
        assert!(!domain_match("badexample.test", "example.test"));
        assert!(!domain_match("127.0.0.1", "0.0.1"));
    }

    #[test]
    fn path_matching() {
        assert!(path_match("/a/b", "/a"));
        assert!(path_match("/a/b", "/a/"));
        assert!(path_match("/a", "/a"));
        assert!(!path_match("/ab", "/a"));
        assert!(!path_match("/", "/a"));
    }

    #[test]
    fn host_cookie_not_sent_to_subdomain() {
        let jar = Jar::new();
        jar.set(&url("http://example.test/"), &Cookie::parse("a=1").unwrap());

        assert_eq!(jar.cookies_for(&url("http://example.test/"), None).len(), 1);
        assert!(jar
            .cookies_for(&url("http://sub.example.test/"), None)
            .is_empty());
    }

    #[test]
    fn domain_cookie_covers_subdomains() {
        let jar = Jar::new();
        jar.set(
            &url("http://example.test/"),
            &Cookie::parse("a=1; Domain=example.test").unwrap(),
        );

        assert_eq!(
            jar.cookies_for(&url("http://sub.example.test/"), None).len(),
            1
        );
    }

    #[test]
    fn foreign_domain_rejected() {
        let jar = Jar::new();
        jar.set(
            &url("http://example.test/"),
            &Cookie::parse("a=1; Domain=other.test").unwrap(),
        );
        assert!(jar.iter().is_empty());
    }

    #[test]
    fn secure_requires_https() {
        let jar = Jar::new();
        jar.set(
            &url("https://example.test/"),
            &Cookie::parse("a=1; Secure").unwrap(),
        );

        assert!(jar.cookies_for(&url("http://example.test/"), None).is_empty());
        assert_eq!(jar.cookies_for(&url("https://example.test/"), None).len(), 1);
    }

    #[test]
    fn expired_cookie_dropped() {
        let jar = Jar::new();
        jar.set(
            &url("http://example.test/"),
            &Cookie::parse("a=1; Max-Age=0").unwrap(),
        );
        assert!(jar.cookies_for(&url("http://example.test/"), None).is_empty());

        jar.clear_expired();
        assert!(jar.iter().is_empty());
    }

    #[test]
    fn request_cookies_merge_without_mutating_jar() {
        let jar = Jar::new();
        jar.set(&url("http://example.test/"), &Cookie::parse("a=1").unwrap());

        let extra = vec![("a".to_owned(), "override".to_owned()), ("b".to_owned(), "2".to_owned())];
        let header = jar
            .header_for(&url("http://example.test/"), None, &extra)
            .unwrap();
        assert_eq!(header.to_str().unwrap(), "a=override; b=2");

        // jar unchanged.
        let pairs = jar.cookies_for(&url("http://example.test/"), None);
        assert_eq!(pairs, vec![("a".to_owned(), "1".to_owned())]);
    }

    #[test]
    fn path_specific_cookie_ordering() {
        let jar = Jar::new();
        jar.set(
            &url("http://example.test/a/b/c"),
            &Cookie::parse("deep=1; Path=/a/b").unwrap(),
        );
        jar.set(
            &url("http://example.test/"),
            &Cookie::parse("shallow=1; Path=/").unwrap(),
        );

        let pairs = jar.cookies_for(&url("http://example.test/a/b/x"), None);
        assert_eq!(pairs[0].0, "deep");
        assert_eq!(pairs[1].0, "shallow");
    }

    #[test]
    fn same_site_strict_cross_host() {
        let jar = Jar::new();
        jar.set(
            &url("http://example.test/"),
            &Cookie::parse("a=1; SameSite=Strict").unwrap(),
        );

        assert_eq!(
            jar.cookies_for(&url("http://example.test/"), Some("example.test"))
                .len(),
            1
        );
        assert!(jar
            .cookies_for(&url("http://example.test/"), Some("other.test"))
            .is_empty());
    }

    #[test]
    fn scoped_clear() {
        let jar = Jar::new();
        jar.set(&url("http://a.test/"), &Cookie::parse("a=1").unwrap());
        jar.set(&url("http://b.test/"), &Cookie::parse("b=1").unwrap());

        jar.clear_domain("a.test");
        let left = jar.iter();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name(), "b");
    }
}
