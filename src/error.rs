//! error types produced by session, request and response operations.

use std::{convert::Infallible, error, fmt, io, str};

use crate::http::{uri, StatusCode, Uri};

pub use crate::h1::Error as H1Error;
#[cfg(feature = "http3")]
pub use crate::h3::Error as H3Error;

/// boxed opaque error produced while streaming a request or response body.
pub type BodyError = Box<dyn error::Error + Send + Sync>;

/// unified error type of the crate. every failure path converges here so callers
/// can catch broadly with a single match.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Io(io::Error),
    Body(BodyError),
    InvalidUrl(InvalidUrl),
    InvalidHeader,
    Resolve(ResolveError),
    Tls(TlsError),
    Timeout(TimeoutError),
    TooManyRedirects,
    Status(StatusError),
    Json(JsonError),
    StreamConsumed,
    PrematureGatherAccess,
    Config(&'static str),
    H1(crate::h1::Error),
    H2(::h2::Error),
    #[cfg(feature = "http3")]
    H3(crate::h3::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Body(e) => write!(f, "body error: {e}"),
            Self::InvalidUrl(e) => write!(f, "invalid url: {e:?}"),
            Self::InvalidHeader => f.write_str("invalid header"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::Tls(e) => write!(f, "tls error: {e:?}"),
            Self::Timeout(e) => write!(f, "timeout: {e:?}"),
            Self::TooManyRedirects => f.write_str("too many redirects"),
            Self::Status(e) => write!(f, "{e}"),
            Self::Json(e) => write!(f, "{e}"),
            Self::StreamConsumed => f.write_str("response body was already consumed"),
            Self::PrematureGatherAccess => {
                f.write_str("lazy response accessed before session gather resolved it")
            }
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::H1(e) => write!(f, "http/1 error: {e:?}"),
            Self::H2(e) => write!(f, "http/2 error: {e}"),
            #[cfg(feature = "http3")]
            Self::H3(e) => write!(f, "http/3 error: {e:?}"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<BodyError> for Error {
    fn from(e: BodyError) -> Self {
        Self::Body(e)
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

impl From<crate::h1::Error> for Error {
    fn from(e: crate::h1::Error) -> Self {
        Self::H1(e)
    }
}

impl From<::h2::Error> for Error {
    fn from(e: ::h2::Error) -> Self {
        Self::H2(e)
    }
}

#[cfg(feature = "http3")]
impl From<crate::h3::Error> for Error {
    fn from(e: crate::h3::Error) -> Self {
        Self::H3(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Self::Body(Box::new(e))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(_: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader
    }
}

impl From<http::header::ToStrError> for Error {
    fn from(_: http::header::ToStrError) -> Self {
        Self::InvalidHeader
    }
}

/// reasons an input could not be turned into a usable request url.
#[derive(Debug)]
pub enum InvalidUrl {
    MissingHost,
    MissingScheme,
    MissingAuthority,
    MissingPathQuery,
    UnknownScheme,
    Other(uri::InvalidUri),
}

impl From<uri::InvalidUri> for InvalidUrl {
    fn from(e: uri::InvalidUri) -> Self {
        Self::Other(e)
    }
}

impl From<uri::InvalidUri> for Error {
    fn from(e: uri::InvalidUri) -> Self {
        Self::InvalidUrl(e.into())
    }
}

impl From<uri::InvalidUriParts> for Error {
    fn from(_: uri::InvalidUriParts) -> Self {
        Self::InvalidUrl(InvalidUrl::MissingPathQuery)
    }
}

impl From<InvalidUrl> for Error {
    fn from(e: InvalidUrl) -> Self {
        Self::InvalidUrl(e)
    }
}

/// hostname that failed dns resolution, with every transport of the resolver
/// chain exhausted.
#[derive(Debug)]
pub struct ResolveError {
    hostname: Box<str>,
}

impl ResolveError {
    pub(crate) fn new(hostname: impl Into<Box<str>>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to resolve hostname: {}", self.hostname)
    }
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

#[derive(Debug)]
pub enum TlsError {
    InvalidDnsName,
    Handshake(io::Error),
}

impl From<TlsError> for Error {
    fn from(e: TlsError) -> Self {
        Self::Tls(e)
    }
}

/// distinguishes which phase of an exchange ran out of time. `Read` is the
/// inactivity timeout: no bytes arrived on the stream within the configured
/// window.
#[derive(Debug, PartialEq, Eq)]
pub enum TimeoutError {
    Resolve,
    Connect,
    TlsHandshake,
    Request,
    Read,
}

impl From<TimeoutError> for Error {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e)
    }
}

/// 4xx/5xx outcome surfaced by [`Response::raise_for_status`].
///
/// [`Response::raise_for_status`]: crate::Response::raise_for_status
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub url: Uri,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.status.is_client_error() {
            "client error"
        } else {
            "server error"
        };
        write!(f, "{} {kind} for url: {}", self.status, self.url)
    }
}

impl From<StatusError> for Error {
    fn from(e: StatusError) -> Self {
        Self::Status(e)
    }
}

/// json failures: malformed bytes, or a response whose media type does not
/// indicate json at all.
#[derive(Debug)]
pub enum JsonError {
    Decode(serde_json::Error),
    WrongContentType,
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "json decode error: {e}"),
            Self::WrongContentType => f.write_str("content type does not indicate json"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(JsonError::Decode(e))
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Self {
        Self::Json(e)
    }
}

impl From<str::Utf8Error> for Error {
    fn from(e: str::Utf8Error) -> Self {
        Self::Body(Box::new(e))
    }
}
