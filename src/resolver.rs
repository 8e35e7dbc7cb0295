//! pluggable dns resolution.
//!
//! resolvers are [`Service`]s over `&mut Connect`: they fill in the address
//! list and nothing else. transports are declared with url-like descriptors
//! (`dou://`, `dot://`, `doh://`, `doh+<preset>://`, `doq://`) and compose
//! into an ordered fallback chain. only the plain system transport ships in
//! the crate; secure transports are capabilities plugged in through the same
//! trait.

use std::net::ToSocketAddrs;

use tracing::{debug, warn};

use crate::{
    connect::Connect,
    error::{Error, ResolveError},
    service::{Service, ServiceDyn},
};

pub type ResolverService =
    Box<dyn for<'r> ServiceDyn<&'r mut Connect, Response = (), Error = Error> + Send + Sync>;

/// system resolver: `getaddrinfo` on the blocking pool.
pub(crate) fn base_resolver() -> ResolverService {
    struct SystemResolver;

    impl<'r> Service<&'r mut Connect> for SystemResolver {
        type Response = ();
        type Error = Error;

        async fn call(&self, connect: &'r mut Connect) -> Result<Self::Response, Self::Error> {
            let host = connect.hostname().to_owned();
            let port = connect.port();

            let addrs = tokio::task::spawn_blocking(move || (host, port).to_socket_addrs())
                .await
                .map_err(|e| Error::Body(Box::new(e)))??;

            connect.set_addrs(addrs);

            Ok(())
        }
    }

    Box::new(SystemResolver)
}

/// dns transport named by a descriptor scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    /// `dou://` plain dns over udp/tcp through the operating system.
    System,
    /// `dot://` dns over tls.
    DnsOverTls,
    /// `doh://` dns over https.
    DnsOverHttps,
    /// `doq://` dns over quic.
    DnsOverQuic,
}

/// parsed resolver descriptor: transport, optional endpoint, and the
/// security toggles secure transports understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverDescriptor {
    pub kind: ResolverKind,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dnssec: bool,
    pub verify: bool,
}

impl ResolverDescriptor {
    pub fn system() -> Self {
        Self {
            kind: ResolverKind::System,
            host: None,
            port: None,
            dnssec: false,
            verify: true,
        }
    }

    /// parse a descriptor like `doh+cloudflare://` or
    /// `dot://9.9.9.9?dnssec=true&verify=false`.
    pub fn parse(descriptor: &str) -> Result<Self, Error> {
        let (scheme, rest) = descriptor
            .split_once("://")
            .ok_or(Error::Config("resolver descriptor is missing a scheme"))?;

        let (scheme, preset) = match scheme.split_once('+') {
            Some((scheme, preset)) => (scheme, Some(preset)),
            None => (scheme, None),
        };

        let kind = match scheme {
            "dou" => ResolverKind::System,
            "dot" => ResolverKind::DnsOverTls,
            "doh" => ResolverKind::DnsOverHttps,
            "doq" => ResolverKind::DnsOverQuic,
            _ => return Err(Error::Config("unknown resolver descriptor scheme")),
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };

        let (mut host, mut port) = match authority {
            "" => (None, None),
            authority => match authority.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse()
                        .map_err(|_| Error::Config("invalid resolver port"))?;
                    (Some(host.to_owned()), Some(port))
                }
                None => (Some(authority.to_owned()), None),
            },
        };

        if let Some(preset) = preset {
            let (preset_host, preset_port) = preset_endpoint(kind, preset)?;
            host.get_or_insert_with(|| preset_host.to_owned());
            port.get_or_insert(preset_port);
        }

        let mut dnssec = false;
        let mut verify = true;
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "true"));
            match key {
                "dnssec" => dnssec = value == "true" || value == "1",
                "verify" => verify = !(value == "false" || value == "0"),
                _ => {}
            }
        }

        Ok(Self {
            kind,
            host,
            port,
            dnssec,
            verify,
        })
    }

    /// turn the descriptor into a runnable resolver. secure transports are
    /// capabilities; without one plugged in, the descriptor degrades to the
    /// system transport with a warning.
    pub(crate) fn into_service(self) -> ResolverService {
        match self.kind {
            ResolverKind::System => base_resolver(),
            kind => {
                warn!(
                    ?kind,
                    host = self.host.as_deref().unwrap_or(""),
                    "no transport capability for secure resolver, using system resolution"
                );
                base_resolver()
            }
        }
    }
}

fn preset_endpoint(kind: ResolverKind, preset: &str) -> Result<(&'static str, u16), Error> {
    let default_port = match kind {
        ResolverKind::DnsOverHttps => 443,
        ResolverKind::DnsOverTls => 853,
        ResolverKind::DnsOverQuic => 853,
        ResolverKind::System => 53,
    };

    let host = match preset {
        "cloudflare" => "cloudflare-dns.com",
        "google" => "dns.google",
        "quad9" => "dns.quad9.net",
        _ => return Err(Error::Config("unknown resolver preset")),
    };

    Ok((host, default_port))
}

/// ordered fallback over several resolvers: the first transport producing a
/// non-empty answer wins, later ones only run when earlier ones fail.
pub(crate) struct ResolverChain {
    resolvers: Vec<ResolverService>,
}

impl ResolverChain {
    pub(crate) fn new(resolvers: Vec<ResolverService>) -> Self {
        debug_assert!(!resolvers.is_empty());
        Self { resolvers }
    }
}

impl<'r> Service<&'r mut Connect> for ResolverChain {
    type Response = ();
    type Error = Error;

    async fn call(&self, connect: &'r mut Connect) -> Result<Self::Response, Self::Error> {
        for resolver in &self.resolvers {
            match Service::call(resolver, &mut *connect).await {
                Ok(()) if connect.is_resolved() => return Ok(()),
                Ok(()) => debug!(host = connect.hostname(), "resolver returned no addresses"),
                Err(e) => debug!(host = connect.hostname(), error = %e, "resolver transport failed"),
            }
        }

        Err(ResolveError::new(connect.hostname()).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_system() {
        let desc = ResolverDescriptor::parse("dou://").unwrap();
        assert_eq!(desc.kind, ResolverKind::System);
        assert_eq!(desc.host, None);
    }

    #[test]
    fn parse_endpoint_and_flags() {
        let desc = ResolverDescriptor::parse("dot://9.9.9.9:853?dnssec=true&verify=false").unwrap();
        assert_eq!(desc.kind, ResolverKind::DnsOverTls);
        assert_eq!(desc.host.as_deref(), Some("9.9.9.9"));
        assert_eq!(desc.port, Some(853));
        assert!(desc.dnssec);
        assert!(!desc.verify);
    }

    #[test]
    fn parse_preset() {
        let desc = ResolverDescriptor::parse("doh+cloudflare://").unwrap();
        assert_eq!(desc.kind, ResolverKind::DnsOverHttps);
        assert_eq!(desc.host.as_deref(), Some("cloudflare-dns.com"));
        assert_eq!(desc.port, Some(443));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ResolverDescriptor::parse("dns://8.8.8.8").is_err());
        assert!(ResolverDescriptor::parse("no scheme at all").is_err());
        assert!(ResolverDescriptor::parse("doh+unknown://").is_err());
    }

    #[tokio::test]
    async fn chain_falls_through_to_working_resolver() {
        struct Failing;
        impl<'r> Service<&'r mut Connect> for Failing {
            type Response = ();
            type Error = Error;

            async fn call(&self, _: &'r mut Connect) -> Result<(), Error> {
                Err(ResolveError::new("nope").into())
            }
        }

        struct Fixed;
        impl<'r> Service<&'r mut Connect> for Fixed {
            type Response = ();
            type Error = Error;

            async fn call(&self, connect: &'r mut Connect) -> Result<(), Error> {
                connect.set_addrs(["127.0.0.1:80".parse().unwrap()]);
                Ok(())
            }
        }

        let chain = ResolverChain::new(vec![Box::new(Failing), Box::new(Fixed)]);
        let mut connect = Connect::new("example.test", 80);
        Service::call(&chain, &mut connect).await.unwrap();
        assert!(connect.is_resolved());
    }

    #[tokio::test]
    async fn chain_exhaustion_is_resolve_error() {
        struct Failing;
        impl<'r> Service<&'r mut Connect> for Failing {
            type Response = ();
            type Error = Error;

            async fn call(&self, _: &'r mut Connect) -> Result<(), Error> {
                Err(ResolveError::new("nope").into())
            }
        }

        let chain = ResolverChain::new(vec![Box::new(Failing)]);
        let mut connect = Connect::new("example.test", 80);
        assert!(matches!(
            Service::call(&chain, &mut connect).await,
            Err(Error::Resolve(_))
        ));
    }
}
