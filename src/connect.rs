use core::{fmt, net::SocketAddr};

use std::collections::{vec_deque, VecDeque};

/// dial target of one exchange: hostname and port to connect to, the server
/// name for tls, and the resolved address list the resolver fills in.
/// a proxy or an alt-svc alternative swaps the dial host while the tls name
/// stays on the origin.
#[derive(Debug)]
pub struct Connect {
    host: String,
    port: u16,
    tls_name: String,
    addrs: VecDeque<SocketAddr>,
}

impl Connect {
    pub(crate) fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        // an ip literal needs no resolver round trip.
        let addrs = host
            .parse::<core::net::IpAddr>()
            .map(|ip| VecDeque::from([SocketAddr::new(ip, port)]))
            .unwrap_or_default();

        Self {
            tls_name: host.clone(),
            host,
            port,
            addrs,
        }
    }

    pub(crate) fn with_tls_name(mut self, name: impl Into<String>) -> Self {
        self.tls_name = name.into();
        self
    }

    /// hostname to resolve and dial.
    pub fn hostname(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// server name presented during the tls handshake.
    pub fn tls_name(&self) -> &str {
        &self.tls_name
    }

    /// set the list of resolved addresses. order is the dial order.
    pub fn set_addrs<I>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        self.addrs = VecDeque::from_iter(addrs);
    }

    pub fn addrs(&self) -> AddrsIter<'_> {
        AddrsIter {
            inner: self.addrs.iter(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.addrs.is_empty()
    }
}

impl fmt::Display for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct AddrsIter<'a> {
    inner: vec_deque::Iter<'a, SocketAddr>,
}

impl Iterator for AddrsIter<'_> {
    type Item = SocketAddr;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for AddrsIter<'_> {}

impl fmt::Debug for AddrsIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn ip_literal_is_pre_resolved() {
        let connect = Connect::new("127.0.0.1", 8080);
        assert!(connect.is_resolved());
        assert_eq!(
            connect.addrs().next(),
            Some(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 8080))
        );
    }

    #[test]
    fn hostname_needs_resolution() {
        let mut connect = Connect::new("example.test", 443);
        assert!(!connect.is_resolved());

        connect.set_addrs([SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 443)]);
        assert!(connect.is_resolved());
        assert_eq!(connect.addrs().len(), 1);
    }

    #[test]
    fn tls_name_survives_dial_target_swap() {
        let connect = Connect::new("alt.example.test", 8443).with_tls_name("example.test");
        assert_eq!(connect.hostname(), "alt.example.test");
        assert_eq!(connect.tls_name(), "example.test");
    }
}
