use core::time::Duration;

use std::{env, sync::Arc};

use http::{HeaderMap, Uri, Version};
use rustls::pki_types::CertificateDer;
use tracing::warn;

use crate::{
    altsvc::AltSvcCache,
    client::{Session, SessionInner, TimeoutConfig},
    cookies::Jar,
    middleware::{CookieStore, Decompress, FollowRedirect, RedirectPolicy},
    netrc::Netrc,
    pool,
    promise::Scheduler,
    proxy::ProxyConfig,
    request::ResponseHook,
    resolver::{base_resolver, ResolverChain, ResolverDescriptor, ResolverService},
    response::Response,
    service::{base_service, HttpService, Service, ServiceRequest},
    tls,
};

const DEFAULT_POOL_CONNECTIONS: usize = 10;
const DEFAULT_POOL_MAXSIZE: usize = 10;
const KEEP_ALIVE_IDLE: Duration = Duration::from_secs(90);
const KEEP_ALIVE_BORN: Duration = Duration::from_secs(3600);
const KEEP_ALIVE_MAX_REQUESTS: usize = 1024;

/// environment variable supplying the default resolver descriptor.
const DNS_URL_ENV: &str = "NIQUESTS_DNS_URL";

type Middleware = Box<dyn FnOnce(HttpService) -> HttpService + Send>;

/// builder for [`Session`]. configuration happens here; a finished session
/// is immutable apart from its pools, jar and caches.
pub struct SessionBuilder {
    multiplexed: bool,
    resolvers: Vec<ResolverService>,
    pool_connections: usize,
    pool_maxsize: usize,
    timeout_config: TimeoutConfig,
    max_http_version: Version,
    redirect_policy: RedirectPolicy,
    proxies: Option<ProxyConfig>,
    base_url: Option<Uri>,
    default_headers: HeaderMap,
    hooks: Vec<ResponseHook>,
    extra_roots: Vec<CertificateDer<'static>>,
    accept_invalid_certs: bool,
    trust_env: bool,
    decompress: bool,
    middlewares: Vec<Middleware>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            multiplexed: false,
            resolvers: Vec::new(),
            pool_connections: DEFAULT_POOL_CONNECTIONS,
            pool_maxsize: DEFAULT_POOL_MAXSIZE,
            timeout_config: TimeoutConfig::default(),
            max_http_version: default_http_version(),
            redirect_policy: RedirectPolicy::default(),
            proxies: None,
            base_url: None,
            default_headers: HeaderMap::new(),
            hooks: Vec::new(),
            extra_roots: Vec::new(),
            accept_invalid_certs: false,
            trust_env: true,
            decompress: true,
            middlewares: Vec::new(),
        }
    }

    /// hand out lazy response handles instead of resolving exchanges before
    /// returning. see [`Session::gather`].
    pub fn multiplexed(mut self, multiplexed: bool) -> Self {
        self.multiplexed = multiplexed;
        self
    }

    /// add a resolver by descriptor (`dou://`, `dot://`, `doh+google://`,
    /// `doq://`, ..). descriptors stack into an ordered fallback chain.
    pub fn resolver(mut self, descriptor: &str) -> Result<Self, crate::Error> {
        let descriptor = ResolverDescriptor::parse(descriptor)?;
        self.resolvers.push(descriptor.into_service());
        Ok(self)
    }

    /// add a custom resolver implementation to the fallback chain.
    pub fn resolver_service<R>(mut self, resolver: R) -> Self
    where
        R: for<'r> Service<&'r mut crate::Connect, Response = (), Error = crate::Error>
            + Send
            + Sync
            + 'static,
    {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// number of distinct origins the pool retains. least recently used
    /// origins are evicted beyond it.
    pub fn pool_connections(mut self, count: usize) -> Self {
        assert_ne!(count, 0);
        self.pool_connections = count;
        self
    }

    /// connections retained per origin.
    pub fn pool_maxsize(mut self, size: usize) -> Self {
        assert_ne!(size, 0);
        self.pool_maxsize = size;
        self
    }

    /// highest http version the session negotiates. http/3 additionally
    /// requires the `http3` feature.
    pub fn max_http_version(mut self, version: Version) -> Self {
        self.max_http_version = version;
        self
    }

    pub fn timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeout_config = config;
        self
    }

    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// explicit proxy configuration, replacing environment discovery.
    pub fn proxies(mut self, proxies: ProxyConfig) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// base url relative request urls resolve against.
    pub fn base_url(mut self, base: Uri) -> Self {
        self.base_url = Some(base);
        self
    }

    /// headers applied to every request unless the request sets them.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// response hook run after every finalized exchange.
    pub fn hook(mut self, hook: impl Fn(&mut Response) + Send + Sync + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// additional der encoded root certificate trusted next to the bundled
    /// web pki roots.
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    #[cfg(feature = "dangerous")]
    /// skip server certificate verification. test and local network usage
    /// only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// read proxies, netrc and the resolver descriptor from the
    /// environment. on by default.
    pub fn trust_env(mut self, trust: bool) -> Self {
        self.trust_env = trust;
        self
    }

    /// disable transparent response decompression.
    pub fn no_decompress(mut self) -> Self {
        self.decompress = false;
        self
    }

    /// wrap the service stack with a custom middleware, outermost first.
    pub fn middleware<F, S>(mut self, func: F) -> Self
    where
        F: FnOnce(HttpService) -> S + Send + 'static,
        S: for<'r, 'c> Service<ServiceRequest<'r, 'c>, Response = Response, Error = crate::Error>
            + Send
            + Sync
            + 'static,
    {
        self.middlewares
            .push(Box::new(move |service| Box::new(func(service)) as HttpService));
        self
    }

    /// finish the builder and construct the [`Session`].
    pub fn finish(self) -> Session {
        let mut resolvers = self.resolvers;

        // the environment supplies the default transport when nothing was
        // configured explicitly.
        if resolvers.is_empty() {
            if let Some(descriptor) = self
                .trust_env
                .then(|| env::var(DNS_URL_ENV).ok())
                .flatten()
            {
                match ResolverDescriptor::parse(&descriptor) {
                    Ok(descriptor) => resolvers.push(descriptor.into_service()),
                    Err(e) => warn!(%descriptor, error = %e, "ignoring invalid {DNS_URL_ENV}"),
                }
            }
        }

        let resolver: ResolverService = match resolvers.len() {
            0 => base_resolver(),
            1 => resolvers.swap_remove(0),
            _ => Box::new(ResolverChain::new(resolvers)),
        };

        let alpn: &[&[u8]] = match self.max_http_version {
            Version::HTTP_11 => &[b"http/1.1"],
            _ => &[b"h2", b"http/1.1"],
        };

        let connector = tls::Connector::new(alpn, self.extra_roots, self.accept_invalid_certs);

        #[cfg(feature = "http3")]
        let h3_endpoint = (self.max_http_version >= Version::HTTP_2)
            .then(|| crate::h3::EndpointState::new(self.accept_invalid_certs));

        let proxies = self
            .proxies
            .or_else(|| self.trust_env.then(ProxyConfig::from_env))
            .unwrap_or_default();

        let netrc = self.trust_env.then(Netrc::from_env).flatten();

        // default stack: dispatch core, then cookies, then decompression,
        // then redirect following. decompression sits inside the redirect
        // loop so every hop of a chain is decoded on receipt, history
        // responses included.
        let mut service = base_service();
        service = Box::new(CookieStore::new(service));
        if self.decompress {
            service = Box::new(Decompress::new(service));
        }
        service = Box::new(FollowRedirect::with_policy(service, self.redirect_policy));
        for middleware in self.middlewares {
            service = middleware(service);
        }

        Session {
            inner: Arc::new(SessionInner {
                exclusive_pool: pool::exclusive::Pool::new(
                    self.pool_maxsize,
                    self.pool_connections,
                    KEEP_ALIVE_IDLE,
                    KEEP_ALIVE_BORN,
                    KEEP_ALIVE_MAX_REQUESTS,
                ),
                shared_pool: pool::shared::Pool::default(),
                connector,
                resolver,
                timeout_config: self.timeout_config,
                max_http_version: self.max_http_version,
                service,
                alt_svc: AltSvcCache::default(),
                jar: Arc::new(Jar::new()),
                netrc,
                proxies,
                base_url: self.base_url,
                default_headers: self.default_headers,
                hooks: self.hooks,
                multiplexed: self.multiplexed,
                scheduler: Scheduler::default(),
                #[cfg(feature = "http3")]
                h3_endpoint,
            }),
        }
    }
}

// alpn leads negotiation by default; http/3 joins in through alt-svc offers
// or an explicit `max_http_version(Version::HTTP_3)`.
fn default_http_version() -> Version {
    Version::HTTP_2
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn default_session_builds() {
        let session = SessionBuilder::new().finish();
        assert!(!session.is_multiplexed());
    }

    #[tokio::test]
    async fn multiplexed_flag() {
        let session = SessionBuilder::new().multiplexed(true).finish();
        assert!(session.is_multiplexed());
    }

    #[test]
    fn resolver_descriptor_rejected_early() {
        assert!(SessionBuilder::new().resolver("bogus://").is_err());
    }
}
