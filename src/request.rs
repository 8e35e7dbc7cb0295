use core::time::Duration;

use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    uri, Method, Uri, Version,
};

use crate::{
    auth::{basic_auth_str, Auth},
    body::{BodyError, RequestBody},
    client::Session,
    error::Error,
    multipart::Form,
    promise::ResponsePromise,
    response::Response,
    uri::{merge_query, normalize, resolve_location, Params},
};

/// callback invoked for interim (1xx) responses on http/1 exchanges.
#[derive(Clone)]
pub struct OnInformational(Arc<dyn Fn(&http::Response<()>) + Send + Sync>);

impl OnInformational {
    pub(crate) fn call(&self, res: &http::Response<()>) {
        (self.0)(res)
    }
}

/// post-finalize response callback.
pub type ResponseHook = Arc<dyn Fn(&mut Response) + Send + Sync>;

/// per-request knobs the middleware stack reads back out of the request
/// extensions.
#[derive(Clone, Default)]
pub(crate) struct RequestConfig {
    pub(crate) allow_redirects: Option<bool>,
    pub(crate) cookies: Vec<(String, String)>,
}

/// host context a chain of requests originates from; anchors same-site
/// cookie decisions across redirects.
#[derive(Clone)]
pub(crate) struct InitiatorHost(pub(crate) String);

enum Data {
    Pairs(Vec<(String, String)>),
    Bytes(Bytes),
    Text(String),
    Stream(RequestBody),
}

/// builder for one request. composes url, query, headers, body, cookies
/// and auth, then hands the exchange to the session pipeline.
pub struct RequestBuilder {
    session: Session,
    method: Method,
    url: Result<Uri, Error>,
    version: Option<Version>,
    headers: HeaderMap,
    params: Params,
    data: Option<Data>,
    json: Option<Result<Bytes, Error>>,
    files: Option<Form>,
    auth: Option<Auth>,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    allow_redirects: Option<bool>,
    stream: bool,
    hooks: Vec<ResponseHook>,
    on_informational: Option<OnInformational>,
}

impl RequestBuilder {
    pub(crate) fn new<U>(session: Session, method: Method, url: U) -> Self
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<uri::InvalidUri>,
    {
        let url = Uri::try_from(url)
            .map_err(|e| Error::from(e.into()))
            .and_then(|uri| resolve_against_base(&session, uri));

        Self {
            session,
            method,
            url,
            version: None,
            headers: HeaderMap::new(),
            params: Params::new(),
            data: None,
            json: None,
            files: None,
            auth: None,
            cookies: Vec::new(),
            timeout: None,
            allow_redirects: None,
            stream: false,
            hooks: Vec::new(),
            on_informational: None,
        }
    }

    /// append query parameters, preserving insertion order.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self.params.push(key, value);
        }
        self
    }

    /// append pre-built [`Params`], including multi-valued and elided keys.
    pub fn query(mut self, params: Params) -> Self {
        self.params.append(params);
        self
    }

    pub fn header<V>(mut self, name: HeaderName, value: V) -> Self
    where
        HeaderValue: TryFrom<V>,
    {
        if let Ok(value) = HeaderValue::try_from(value) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// form fields, encoded as `application/x-www-form-urlencoded`.
    /// duplicate keys encode as repeated fields.
    pub fn data<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.data = Some(Data::Pairs(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    /// raw bytes body. content type is left to the caller.
    pub fn data_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.data = Some(Data::Bytes(bytes.into()));
        self
    }

    /// utf-8 text body. content type is left to the caller.
    pub fn data_text(mut self, text: impl Into<String>) -> Self {
        self.data = Some(Data::Text(text.into()));
        self
    }

    /// streaming body, sent chunked on http/1 and framed on h2/h3.
    pub fn data_stream<S, E>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BodyError>,
    {
        self.data = Some(Data::Stream(RequestBody::stream(stream)));
        self
    }

    /// json body. ignored when `data` is also supplied.
    pub fn json(mut self, value: &impl serde::Serialize) -> Self {
        self.json = Some(
            serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(Error::from),
        );
        self
    }

    /// multipart body. takes precedence over `data` and `json`.
    pub fn files(mut self, form: Form) -> Self {
        self.files = Some(form);
        self
    }

    /// credentials for this request. wins over netrc and over a manually
    /// written `Authorization` header.
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn basic_auth(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth(Auth::basic(username, password))
    }

    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.auth(Auth::bearer(token))
    }

    /// cookie merged over the jar for this request only.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// inactivity timeout: the request fails when no bytes arrive on the
    /// socket for this long. defaults to 30s for GET/HEAD/OPTIONS and 120s
    /// otherwise.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = Some(allow);
        self
    }

    /// keep the body as a live stream instead of buffering it eagerly.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// pin the http version for this request.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// response hook run after the exchange finalizes.
    pub fn hook(mut self, hook: impl Fn(&mut Response) + Send + Sync + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// observe interim (1xx) responses on http/1 exchanges.
    pub fn on_informational(
        mut self,
        callback: impl Fn(&http::Response<()>) + Send + Sync + 'static,
    ) -> Self {
        self.on_informational = Some(OnInformational(Arc::new(callback)));
        self
    }

    /// send the request and resolve the response fully.
    pub async fn send(self) -> Result<Response, Error> {
        let session = self.session.clone();
        let prepared = self.into_prepared()?;
        dispatch(session, prepared).await
    }

    /// issue the request and return a lazy handle immediately. the exchange
    /// proceeds in the background on the session's multiplexed connections;
    /// resolve it with a gather.
    pub fn send_lazy(self) -> ResponsePromise {
        let session = self.session.clone();
        let scheduler = session.inner.scheduler.clone();
        match self.into_prepared() {
            Ok(prepared) => scheduler.spawn(async move { dispatch(session, prepared).await }),
            Err(e) => ResponsePromise::failed(e),
        }
    }

    // compose the wire request: query merge, body encoding precedence,
    // header layering and auth resolution.
    fn into_prepared(self) -> Result<Prepared, Error> {
        let url = self.url?;
        let url = merge_query(url, &self.params)?;

        let mut req = http::Request::new(RequestBody::None);
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = url;
        *req.version_mut() = self
            .version
            .unwrap_or(self.session.inner.max_http_version);

        // session defaults first, request headers override.
        let mut headers = self.session.inner.default_headers.clone();
        for name in self.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        // body precedence: files beat data, data beats json.
        let body = if let Some(form) = self.files {
            let (content_type, body) = form.into_request_body();
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_str(&content_type)?);
            body
        } else if let Some(data) = self.data {
            match data {
                Data::Pairs(pairs) => {
                    let encoded = serde_urlencoded::to_string(&pairs)
                        .map_err(|e| Error::Body(Box::new(e)))?;
                    headers.entry(CONTENT_TYPE).or_insert(HeaderValue::from_static(
                        "application/x-www-form-urlencoded",
                    ));
                    RequestBody::bytes(encoded)
                }
                Data::Bytes(bytes) => RequestBody::Once(bytes),
                Data::Text(text) => RequestBody::bytes(text),
                Data::Stream(body) => body,
            }
        } else if let Some(json) = self.json {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            RequestBody::Once(json?)
        } else {
            RequestBody::None
        };

        // auth precedence: explicit auth, then netrc, then whatever header
        // the caller wrote by hand.
        if let Some(auth) = self.auth {
            headers.insert(AUTHORIZATION, auth.header_value());
        } else if let Some(netrc) = self.session.inner.netrc.as_ref() {
            if let Some((login, password)) = req.uri().host().and_then(|h| netrc.lookup(h)) {
                let mut value = HeaderValue::from_str(&basic_auth_str(login, Some(password)))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        *req.headers_mut() = headers;
        *req.body_mut() = body;

        req.extensions_mut().insert(RequestConfig {
            allow_redirects: self.allow_redirects,
            cookies: self.cookies,
        });

        if let Some(callback) = self.on_informational {
            req.extensions_mut().insert(callback);
        }

        let read_timeout = self.timeout.unwrap_or_else(|| {
            let quick = self.method == Method::GET
                || self.method == Method::HEAD
                || self.method == Method::OPTIONS;
            if quick {
                self.session.inner.timeout_config.read_timeout_quick
            } else {
                self.session.inner.timeout_config.read_timeout_slow
            }
        });

        Ok(Prepared {
            req,
            read_timeout,
            stream: self.stream,
            hooks: self.hooks,
        })
    }
}

struct Prepared {
    req: http::Request<RequestBody>,
    read_timeout: Duration,
    stream: bool,
    hooks: Vec<ResponseHook>,
}

async fn dispatch(session: Session, prepared: Prepared) -> Result<Response, Error> {
    let Prepared {
        mut req,
        read_timeout,
        stream,
        hooks,
    } = prepared;

    let mut res = session.call_service(&mut req, read_timeout).await?;

    if !stream {
        res.buffer().await?;
    }

    for hook in session.inner.hooks.iter().chain(hooks.iter()) {
        hook(&mut res);
    }

    Ok(res)
}

fn resolve_against_base(session: &Session, url: Uri) -> Result<Uri, Error> {
    match (url.scheme(), session.inner.base_url.as_ref()) {
        (None, Some(base)) => {
            let reference = url.to_string();
            normalize(resolve_location(base, &reference)?)
        }
        _ => normalize(url),
    }
}
