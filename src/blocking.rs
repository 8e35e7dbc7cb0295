//! synchronous facade over the async client.
//!
//! the blocking [`Session`] owns a current thread runtime and drives the
//! async core on it; background work (multiplexed exchanges, connection
//! tasks) progresses whenever a blocking call runs the runtime. multiple
//! threads may share one session; the pools serialize per-connection use.

use core::time::Duration;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{uri, Method, Uri};
use serde::de::DeserializeOwned;
use tokio::runtime;

use crate::{cookies::Jar, error::Error};

/// blocking http session. see the crate level [`Session`] for semantics.
///
/// [`Session`]: crate::Session
#[derive(Clone)]
pub struct Session {
    inner: crate::Session,
    rt: Arc<runtime::Runtime>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! method {
    ($method: tt, $method2: tt) => {
        #[doc = concat!("start a blocking ", stringify!($method2), " request.")]
        pub fn $method<U>(&self, url: U) -> RequestBuilder
        where
            Uri: TryFrom<U>,
            <Uri as TryFrom<U>>::Error: Into<uri::InvalidUri>,
        {
            self.request(Method::$method2, url)
        }
    };
}

impl Session {
    pub fn new() -> Self {
        Self::with_builder(crate::SessionBuilder::new())
    }

    /// build a blocking session from a configured [`SessionBuilder`].
    ///
    /// [`SessionBuilder`]: crate::SessionBuilder
    pub fn with_builder(builder: crate::SessionBuilder) -> Self {
        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("failed to build blocking runtime: {e}"));

        // session construction needs a reactor for the quic endpoint.
        let inner = {
            let _guard = rt.enter();
            builder.finish()
        };

        Self {
            inner,
            rt: Arc::new(rt),
        }
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<uri::InvalidUri>,
    {
        RequestBuilder {
            inner: self.inner.request(method, url),
            rt: self.rt.clone(),
        }
    }

    method!(get, GET);
    method!(head, HEAD);
    method!(options, OPTIONS);
    method!(post, POST);
    method!(put, PUT);
    method!(patch, PATCH);
    method!(delete, DELETE);

    pub fn cookies(&self) -> &Jar {
        self.inner.cookies()
    }

    /// resolve every pending lazy response, oldest first.
    pub fn gather(&self) {
        self.rt.block_on(self.inner.gather());
    }

    /// resolve at most `max_fetch` pending lazy responses, whichever finish
    /// first.
    pub fn gather_max(&self, max_fetch: usize) {
        self.rt.block_on(self.inner.gather_max(max_fetch));
    }
}

/// blocking request builder. mirrors [`RequestBuilder`].
///
/// [`RequestBuilder`]: crate::RequestBuilder
pub struct RequestBuilder {
    inner: crate::RequestBuilder,
    rt: Arc<runtime::Runtime>,
}

macro_rules! forward {
    ($(#[$doc:meta])* $name:ident ( $($arg:ident : $ty:ty),* )) => {
        $(#[$doc])*
        pub fn $name(mut self, $($arg: $ty),*) -> Self {
            self.inner = self.inner.$name($($arg),*);
            self
        }
    };
}

impl RequestBuilder {
    forward!(timeout(timeout: Duration));
    forward!(allow_redirects(allow: bool));
    forward!(stream(stream: bool));
    forward!(auth(auth: crate::Auth));
    forward!(files(form: crate::Form));
    forward!(query(params: crate::Params));

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inner = self.inner.params(params);
        self
    }

    pub fn header<V>(mut self, name: http::header::HeaderName, value: V) -> Self
    where
        http::HeaderValue: TryFrom<V>,
    {
        self.inner = self.inner.header(name, value);
        self
    }

    pub fn data<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inner = self.inner.data(pairs);
        self
    }

    pub fn json(mut self, value: &impl serde::Serialize) -> Self {
        self.inner = self.inner.json(value);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner = self.inner.cookie(name, value);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.inner = self.inner.basic_auth(username, password);
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.inner = self.inner.bearer_auth(token);
        self
    }

    /// send the request and block until the response is resolved.
    pub fn send(self) -> Result<Response, Error> {
        let rt = self.rt;
        rt.block_on(self.inner.send()).map(|inner| Response {
            inner,
            rt: rt.clone(),
        })
    }

    /// issue the request and return a lazy handle immediately. resolution
    /// happens on gather or on first attribute access.
    pub fn send_lazy(self) -> ResponsePromise {
        let rt = self.rt.clone();
        // entering the runtime lets the exchange task spawn even though no
        // block_on is running yet.
        let _guard = rt.enter();
        ResponsePromise {
            inner: Some(self.inner.send_lazy()),
            resolved: None,
            rt,
        }
    }
}

/// blocking response. mirrors [`Response`].
///
/// [`Response`]: crate::Response
pub struct Response {
    inner: crate::Response,
    rt: Arc<runtime::Runtime>,
}

impl Response {
    pub fn status(&self) -> http::StatusCode {
        self.inner.status()
    }

    pub fn version(&self) -> http::Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &http::HeaderMap {
        self.inner.headers()
    }

    pub fn oheaders(&self) -> crate::TypedHeaders<'_> {
        self.inner.oheaders()
    }

    pub fn url(&self) -> &Uri {
        self.inner.url()
    }

    pub fn reason(&self) -> Option<&str> {
        self.inner.reason()
    }

    pub fn history(&self) -> &[crate::Response] {
        self.inner.history()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.inner.encoding()
    }

    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.inner.set_encoding(encoding)
    }

    pub fn raise_for_status(self) -> Result<Self, Error> {
        let rt = self.rt.clone();
        self.inner
            .raise_for_status()
            .map(|inner| Self { inner, rt })
    }

    pub fn content(&mut self) -> Result<Bytes, Error> {
        self.rt.block_on(self.inner.content())
    }

    pub fn text(&mut self) -> Result<Option<String>, Error> {
        self.rt.block_on(self.inner.text())
    }

    pub fn json<T>(&mut self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.rt.block_on(self.inner.json())
    }

    /// iterate the body in chunks of at most `chunk_size` bytes.
    pub fn iter_content(&mut self, chunk_size: usize) -> Result<ChunkIter<'_>, Error> {
        let rt = self.rt.clone();
        Ok(ChunkIter {
            stream: self.inner.iter_content(chunk_size)?,
            rt,
        })
    }

    /// iterate the body line by line.
    pub fn iter_lines(&mut self, keepends: bool) -> Result<LinesIter<'_>, Error> {
        let rt = self.rt.clone();
        Ok(LinesIter {
            stream: self.inner.iter_lines(keepends)?,
            rt,
        })
    }

    pub fn close(&mut self) {
        self.inner.close()
    }
}

/// blocking chunk iterator over a response body.
pub struct ChunkIter<'a> {
    stream: crate::BodyIter<'a>,
    rt: Arc<runtime::Runtime>,
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<Bytes, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rt.block_on(self.stream.next())
    }
}

/// blocking line iterator over a response body.
pub struct LinesIter<'a> {
    stream: crate::LineIter<'a>,
    rt: Arc<runtime::Runtime>,
}

impl Iterator for LinesIter<'_> {
    type Item = Result<String, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rt.block_on(self.stream.next())
    }
}

/// blocking lazy response handle. unlike the async promise, attribute
/// access implicitly gathers this handle.
pub struct ResponsePromise {
    inner: Option<crate::ResponsePromise>,
    resolved: Option<Response>,
    rt: Arc<runtime::Runtime>,
}

impl ResponsePromise {
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
            || self
                .inner
                .as_ref()
                .map(crate::ResponsePromise::is_resolved)
                .unwrap_or(false)
    }

    /// the response, gathering this handle first if needed.
    pub fn get(&mut self) -> Result<&mut Response, Error> {
        if self.resolved.is_none() {
            let mut promise = self.inner.take().ok_or(Error::StreamConsumed)?;
            self.rt.block_on(promise.gather())?;
            let inner = promise.into_response()?;
            self.resolved = Some(Response {
                inner,
                rt: self.rt.clone(),
            });
        }

        self.resolved.as_mut().ok_or(Error::PrematureGatherAccess)
    }

    pub fn status(&mut self) -> Result<http::StatusCode, Error> {
        Ok(self.get()?.status())
    }

    pub fn content(&mut self) -> Result<Bytes, Error> {
        self.get()?.content()
    }

    pub fn text(&mut self) -> Result<Option<String>, Error> {
        self.get()?.text()
    }

    /// consume the handle into its response, gathering first if needed.
    pub fn into_response(mut self) -> Result<Response, Error> {
        self.get()?;
        self.resolved.take().ok_or(Error::PrematureGatherAccess)
    }
}
