use core::fmt;

use http::uri::{self, Authority, PathAndQuery, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Error, InvalidUrl};

// rfc 3986 unreserved characters pass through, everything else is escaped.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub(crate) fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (scheme, host, port) triple. pool buckets, the alt-svc cache and the
/// cookie jar dispatch all key off it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Origin {
    pub(crate) scheme: Scheme,
    pub(crate) host: Box<str>,
    pub(crate) port: u16,
}

impl Origin {
    pub(crate) fn from_uri(uri: &Uri) -> Result<Self, Error> {
        let scheme = scheme_of(uri)?;
        let host = uri.host().ok_or(InvalidUrl::MissingHost)?;
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase().into(),
            port,
        })
    }

    pub(crate) fn is_https(&self) -> bool {
        matches!(self.scheme, Scheme::Https)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

pub(crate) fn scheme_of(uri: &Uri) -> Result<Scheme, Error> {
    match uri.scheme_str() {
        Some("http") => Ok(Scheme::Http),
        Some("https") => Ok(Scheme::Https),
        Some(_) => Err(InvalidUrl::UnknownScheme.into()),
        None => Err(InvalidUrl::MissingScheme.into()),
    }
}

/// normalize a request url: scheme restricted to http/https, host lowercased,
/// empty path rewritten to `/`, fragment stripped. normalization is
/// idempotent so `parse(render(parse(u))) == parse(u)` holds.
pub(crate) fn normalize(uri: Uri) -> Result<Uri, Error> {
    scheme_of(&uri)?;

    let mut parts = uri.into_parts();

    let authority = parts.authority.take().ok_or(InvalidUrl::MissingAuthority)?;
    let lowered = authority.as_str().to_ascii_lowercase();
    parts.authority = Some(if lowered == authority.as_str() {
        authority
    } else {
        Authority::try_from(lowered.as_str()).map_err(|_| InvalidUrl::MissingAuthority)?
    });

    // http::Uri drops fragments at parse time already. only the empty path
    // needs rewriting here.
    match parts.path_and_query {
        Some(ref pq) if !pq.as_str().is_empty() => {}
        _ => parts.path_and_query = Some(PathAndQuery::from_static("/")),
    }

    Uri::from_parts(parts).map_err(Into::into)
}

/// ordered query parameters. insertion order is preserved across duplicate
/// keys, and `None` values are elided at encode time.
#[derive(Debug, Default, Clone)]
pub struct Params {
    pairs: Vec<(String, Option<String>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), Some(value.into())));
        self
    }

    /// push a key whose value may be absent. `None` values do not appear in
    /// the encoded query at all.
    pub fn push_opt(&mut self, key: impl Into<String>, value: Option<String>) -> &mut Self {
        self.pairs.push((key.into(), value));
        self
    }

    /// push one key with several values, encoded as repeated fields in the
    /// given order.
    pub fn push_all<I, V>(&mut self, key: impl Into<String>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let key = key.into();
        for value in values {
            self.pairs.push((key.clone(), Some(value.into())));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// append all pairs of another set, after the existing ones.
    pub fn append(&mut self, other: Params) {
        self.pairs.extend(other.pairs);
    }

    pub(crate) fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.pairs {
            let Some(value) = value else { continue };
            if !out.is_empty() {
                out.push('&');
            }
            out.extend(utf8_percent_encode(key, QUERY_ENCODE_SET));
            out.push('=');
            out.extend(utf8_percent_encode(value, QUERY_ENCODE_SET));
        }
        out
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        }
    }
}

/// append encoded params to the url query, keeping any existing query in
/// front of them.
pub(crate) fn merge_query(uri: Uri, params: &Params) -> Result<Uri, Error> {
    let encoded = params.encode();
    if encoded.is_empty() {
        return Ok(uri);
    }

    let mut parts = uri.into_parts();

    let (path, existing) = match parts.path_and_query {
        Some(ref pq) => (pq.path(), pq.query()),
        None => ("/", None),
    };

    let pq = match existing {
        Some(query) => format!("{path}?{query}&{encoded}"),
        None => format!("{path}?{encoded}"),
    };

    parts.path_and_query = Some(pq.parse::<PathAndQuery>().map_err(uri::InvalidUri::from)?);

    Uri::from_parts(parts).map_err(Into::into)
}

/// resolve a `Location` header value against the url of the hop it came from.
pub(crate) fn resolve_location(base: &Uri, location: &str) -> Result<Uri, Error> {
    let target = location
        .parse::<Uri>()
        .map_err(|_| InvalidUrl::MissingPathQuery)?;
    let target = target.into_parts();
    let base = base.clone().into_parts();

    let mut builder = Uri::builder();

    if let Some(scheme) = target.scheme.or(base.scheme) {
        builder = builder.scheme(scheme);
    }
    if let Some(authority) = target.authority.or(base.authority) {
        builder = builder.authority(authority);
    }

    let pq = target
        .path_and_query
        .ok_or(InvalidUrl::MissingPathQuery)?;

    // relative path references keep the base directory.
    let pq = if pq.as_str().starts_with('/') || pq.as_str().starts_with('?') {
        pq
    } else {
        let base_path = base
            .path_and_query
            .as_ref()
            .map(|b| b.path())
            .unwrap_or("/");
        let dir = match base_path.rfind('/') {
            Some(idx) => &base_path[..=idx],
            None => "/",
        };
        format!("{dir}{pq}")
            .parse()
            .map_err(|_| InvalidUrl::MissingPathQuery)?
    };

    builder.path_and_query(pq).build().map_err(Into::into)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_lowercases_host_and_defaults_path() {
        let uri = normalize("http://EXAMPLE.test".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://example.test/");

        // idempotence on an already normalized url.
        let again = normalize(uri.clone()).unwrap();
        assert_eq!(uri, again);
    }

    #[test]
    fn normalize_rejects_unknown_scheme() {
        let res = normalize("ftp://example.test/".parse().unwrap());
        assert!(matches!(
            res,
            Err(Error::InvalidUrl(InvalidUrl::UnknownScheme))
        ));
    }

    #[test]
    fn params_keep_insertion_order() {
        let mut params = Params::new();
        params.push("key2", "value2");
        params.push("key1", "value1");
        assert_eq!(params.encode(), "key2=value2&key1=value1");
    }

    #[test]
    fn params_multi_and_none() {
        let mut params = Params::new();
        params.push("key1", "value1");
        params.push_all("key2", ["value2", "value3"]);
        params.push_opt("gone", None);
        assert_eq!(params.encode(), "key1=value1&key2=value2&key2=value3");
    }

    #[test]
    fn params_escape_reserved() {
        let mut params = Params::new();
        params.push("q", "a b&c");
        assert_eq!(params.encode(), "q=a%20b%26c");
    }

    #[test]
    fn merge_query_appends_after_existing() {
        let uri: Uri = "https://example.test/get?a=1".parse().unwrap();
        let mut params = Params::new();
        params.push("b", "2");
        let merged = merge_query(uri, &params).unwrap();
        assert_eq!(merged.to_string(), "https://example.test/get?a=1&b=2");
    }

    #[test]
    fn location_absolute_and_relative() {
        let base: Uri = "http://a.test/dir/page".parse().unwrap();

        let abs = resolve_location(&base, "http://b.test/next").unwrap();
        assert_eq!(abs.to_string(), "http://b.test/next");

        let root = resolve_location(&base, "/rooted").unwrap();
        assert_eq!(root.to_string(), "http://a.test/rooted");

        let rel = resolve_location(&base, "sibling").unwrap();
        assert_eq!(rel.to_string(), "http://a.test/dir/sibling");
    }

    #[test]
    fn origin_ports() {
        let origin = Origin::from_uri(&"https://example.test/x".parse().unwrap()).unwrap();
        assert_eq!(origin.port, 443);
        let origin = Origin::from_uri(&"http://example.test:8080/".parse().unwrap()).unwrap();
        assert_eq!(origin.port, 8080);
    }
}
