use core::time::Duration;

use std::sync::Arc;

use http::{uri, HeaderValue, Method, Uri, Version};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use crate::{
    altsvc::AltSvcCache,
    builder::SessionBuilder,
    connect::Connect,
    connection::{ConnectionExclusive, ConnectionKey, ConnectionShared},
    cookies::Jar,
    error::{Error, TimeoutError},
    netrc::Netrc,
    pool,
    promise::Scheduler,
    proxy::ProxyConfig,
    request::RequestBuilder,
    resolver::ResolverService,
    response::Response,
    service::{HttpService, Service, ServiceRequest},
    timeout::Timeout,
    tls,
    uri::Origin,
};

/// phase timeouts of connection establishment, plus the default inactivity
/// windows applied to reads when a request does not set its own.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub tls_connect_timeout: Duration,
    /// inactivity window for idempotent-by-default methods (GET, HEAD,
    /// OPTIONS).
    pub read_timeout_quick: Duration,
    /// inactivity window for everything else.
    pub read_timeout_slow: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            tls_connect_timeout: Duration::from_secs(5),
            read_timeout_quick: Duration::from_secs(30),
            read_timeout_slow: Duration::from_secs(120),
        }
    }
}

/// http session: connection pools, cookie jar, resolver, alt-svc cache and
/// the middleware stack every request runs through. cheap to clone; clones
/// share all state.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) exclusive_pool: pool::exclusive::Pool<ConnectionKey, ConnectionExclusive>,
    pub(crate) shared_pool: pool::shared::Pool<ConnectionKey, ConnectionShared>,
    pub(crate) connector: tls::Connector,
    pub(crate) resolver: ResolverService,
    pub(crate) timeout_config: TimeoutConfig,
    pub(crate) max_http_version: Version,
    pub(crate) service: HttpService,
    pub(crate) alt_svc: AltSvcCache,
    pub(crate) jar: Arc<Jar>,
    pub(crate) netrc: Option<Netrc>,
    pub(crate) proxies: ProxyConfig,
    pub(crate) base_url: Option<Uri>,
    pub(crate) default_headers: http::HeaderMap,
    pub(crate) hooks: Vec<crate::request::ResponseHook>,
    pub(crate) multiplexed: bool,
    pub(crate) scheduler: Scheduler,
    #[cfg(feature = "http3")]
    pub(crate) h3_endpoint: Option<crate::h3::EndpointState>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! method {
    ($method: tt, $method2: tt) => {
        #[doc = concat!("start a new ", stringify!($method2), " request.")]
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
    /// construct a session with default settings.
    pub fn new() -> Self {
        Self::builder().finish()
    }

    /// start configuring a session. see [`SessionBuilder`].
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// start a request with an explicit method.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<uri::InvalidUri>,
    {
        RequestBuilder::new(self.clone(), method, url)
    }

    method!(get, GET);
    method!(head, HEAD);
    method!(options, OPTIONS);
    method!(post, POST);
    method!(put, PUT);
    method!(patch, PATCH);
    method!(delete, DELETE);

    /// the session cookie jar.
    pub fn cookies(&self) -> &Jar {
        &self.inner.jar
    }

    /// resolve every pending lazy response of this session, in the order the
    /// requests were issued.
    pub async fn gather(&self) {
        self.inner.scheduler.gather_all().await;
    }

    /// resolve at most `max_fetch` pending lazy responses, whichever finish
    /// first.
    pub async fn gather_max(&self, max_fetch: usize) {
        self.inner.scheduler.gather_max(max_fetch).await;
    }

    /// resolve only the given handles. outcomes stay stored on each handle
    /// and surface on access.
    pub async fn gather_of(&self, promises: &mut [&mut crate::ResponsePromise]) {
        for promise in promises {
            promise.resolve().await;
        }
    }

    pub(crate) fn is_multiplexed(&self) -> bool {
        self.inner.multiplexed
    }

    pub(crate) fn proxies(&self) -> &ProxyConfig {
        &self.inner.proxies
    }

    pub(crate) fn alt_svc_cache(&self) -> &AltSvcCache {
        &self.inner.alt_svc
    }

    pub(crate) fn exclusive_pool(
        &self,
    ) -> &pool::exclusive::Pool<ConnectionKey, ConnectionExclusive> {
        &self.inner.exclusive_pool
    }

    pub(crate) fn shared_pool(&self) -> &pool::shared::Pool<ConnectionKey, ConnectionShared> {
        &self.inner.shared_pool
    }

    #[cfg(feature = "http3")]
    pub(crate) fn h3_enabled(&self) -> bool {
        self.inner.h3_endpoint.is_some()
    }

    pub(crate) async fn call_service(
        &self,
        req: &mut http::Request<crate::body::RequestBody>,
        read_timeout: Duration,
    ) -> Result<Response, Error> {
        self.inner
            .service
            .call(ServiceRequest {
                req,
                session: self,
                read_timeout,
            })
            .await
    }
}

/// dial target plus the `Proxy-Authorization` the tunnel handshake carries.
pub(crate) struct ProxyRoute<'a> {
    pub(crate) proxy: &'a Uri,
    pub(crate) auth: Option<HeaderValue>,
}

impl Session {
    // make an exclusive connection for `origin`, optionally through a
    // proxy. the returned version is what alpn negotiated; plain tcp is
    // always http/1.1 capable only.
    pub(crate) async fn make_exclusive(
        &self,
        origin: &Origin,
        proxy: Option<&ProxyRoute<'_>>,
    ) -> Result<(ConnectionExclusive, Version), Error> {
        let timeouts = &self.inner.timeout_config;
        let mut timer = Box::pin(tokio::time::sleep(timeouts.resolve_timeout));

        let mut connect = match proxy {
            Some(route) => {
                let host = route.proxy.host().ok_or(Error::Config("proxy url has no host"))?;
                let port = route.proxy.port_u16().unwrap_or(match route.proxy.scheme_str() {
                    Some("https") => 443,
                    _ => 80,
                });
                Connect::new(host, port).with_tls_name(&*origin.host)
            }
            None => Connect::new(&*origin.host, origin.port),
        };

        let stream = self.make_tcp(&mut connect, &mut timer).await?;
        let _ = stream.set_nodelay(true);

        if !origin.is_https() {
            return Ok((stream.into(), Version::HTTP_11));
        }

        // https through a proxy needs a tunnel before the tls handshake.
        let stream = match proxy {
            Some(route) => {
                crate::service::reset_timer(&mut timer, timeouts.connect_timeout);
                connect_tunnel(stream, origin, route.auth.as_ref())
                    .timeout(timer.as_mut())
                    .await
                    .map_err(|_| TimeoutError::Connect)??
            }
            None => stream,
        };

        crate::service::reset_timer(&mut timer, timeouts.tls_connect_timeout);

        let (stream, version) = self
            .inner
            .connector
            .connect(connect.tls_name(), stream)
            .timeout(timer.as_mut())
            .await
            .map_err(|_| TimeoutError::TlsHandshake)??;

        Ok((stream.into(), version))
    }

    #[cfg(feature = "http3")]
    pub(crate) async fn make_h3(&self, connect: &mut Connect) -> Result<crate::h3::Connection, Error> {
        let endpoint = self
            .inner
            .h3_endpoint
            .as_ref()
            .ok_or(Error::Config("http/3 is disabled for this session"))?
            .get();

        let timeouts = &self.inner.timeout_config;
        let mut timer = Box::pin(tokio::time::sleep(timeouts.resolve_timeout));

        if !connect.is_resolved() {
            self.inner
                .resolver
                .call(&mut *connect)
                .timeout(timer.as_mut())
                .await
                .map_err(|_| TimeoutError::Resolve)??;
        }

        crate::service::reset_timer(&mut timer, timeouts.connect_timeout);

        let tls_name = connect.tls_name().to_owned();
        let conn = crate::h3::proto::connect(endpoint, connect.addrs(), &tls_name)
            .timeout(timer.as_mut())
            .await
            .map_err(|_| TimeoutError::Connect)??;

        Ok(conn)
    }

    async fn make_tcp(
        &self,
        connect: &mut Connect,
        timer: &mut core::pin::Pin<Box<tokio::time::Sleep>>,
    ) -> Result<TcpStream, Error> {
        if !connect.is_resolved() {
            self.inner
                .resolver
                .call(&mut *connect)
                .timeout(timer.as_mut())
                .await
                .map_err(|_| TimeoutError::Resolve)??;
        }

        crate::service::reset_timer(timer, self.inner.timeout_config.connect_timeout);

        let stream = self
            .make_tcp_inner(connect)
            .timeout(timer.as_mut())
            .await
            .map_err(|_| TimeoutError::Connect)??;

        Ok(stream)
    }

    async fn make_tcp_inner(&self, connect: &Connect) -> Result<TcpStream, Error> {
        let mut iter = connect.addrs();

        let mut addr = iter
            .next()
            .ok_or_else(|| crate::error::ResolveError::new(connect.hostname()))?;

        // try every resolved address, returning the last error when all of
        // them refuse.
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => match iter.next() {
                    Some(a) => {
                        debug!(failed = %addr, "tcp connect failed, trying next address");
                        addr = a;
                    }
                    None => return Err(e.into()),
                },
            }
        }
    }
}

// http/1.1 CONNECT handshake used to reach an https origin through a proxy.
async fn connect_tunnel(
    mut stream: TcpStream,
    origin: &Origin,
    auth: Option<&HeaderValue>,
) -> Result<TcpStream, Error> {
    let mut head = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nhost: {host}:{port}\r\n",
        host = origin.host,
        port = origin.port
    )
    .into_bytes();

    if let Some(auth) = auth {
        head.extend_from_slice(b"proxy-authorization: ");
        head.extend_from_slice(auth.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");

    stream.write_all(&head).await?;
    stream.flush().await?;

    let mut buf = bytes::BytesMut::with_capacity(1024);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut res = httparse::Response::new(&mut headers);
        match res.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let code = res.code.unwrap_or(0);
                if (200..300).contains(&code) {
                    return Ok(stream);
                }
                return Err(Error::Config("proxy refused the tunnel"));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Err(Error::Config("proxy sent a malformed tunnel response")),
        }
    }
}
