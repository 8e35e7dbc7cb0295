use std::{collections::HashMap, sync::Mutex, time::Duration};

use http::header::{HeaderMap, ALT_SVC};
use tokio::time::Instant;
use tracing::debug;

use crate::uri::Origin;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// one alternative service offer parsed from an `Alt-Svc` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltSvcOffer {
    /// protocol identifier, e.g. `h3`.
    pub protocol: Box<str>,
    /// alternate authority. empty host means "same host, different port".
    pub host: Box<str>,
    pub port: u16,
    /// freshness lifetime from the `ma` parameter.
    pub max_age: Duration,
}

/// parse every offer of an `Alt-Svc` header value per rfc 7838 §3.
/// returns `None` for the special `clear` value.
pub(crate) fn parse(value: &str) -> Option<Vec<AltSvcOffer>> {
    if value.trim() == "clear" {
        return None;
    }

    let mut offers = Vec::new();

    for entry in value.split(',') {
        let mut params = entry.split(';');

        let Some(alternative) = params.next() else {
            continue;
        };
        let mut kv = alternative.splitn(2, '=');
        let (Some(protocol), Some(authority)) = (kv.next(), kv.next()) else {
            continue;
        };

        let protocol = protocol.trim();
        let authority = authority.trim().trim_matches('"');

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => continue,
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };

        let mut max_age = DEFAULT_MAX_AGE;
        for param in params {
            let mut kv = param.splitn(2, '=');
            let (Some(key), Some(val)) = (kv.next(), kv.next()) else {
                continue;
            };
            if key.trim() == "ma" {
                if let Ok(secs) = val.trim().trim_matches('"').parse::<u64>() {
                    max_age = Duration::from_secs(secs);
                }
            }
        }

        offers.push(AltSvcOffer {
            protocol: protocol.into(),
            host: host.into(),
            port,
            max_age,
        });
    }

    Some(offers)
}

#[derive(Debug, Clone)]
pub(crate) struct AltSvcEntry {
    pub(crate) host: Box<str>,
    pub(crate) port: u16,
    deadline: Instant,
}

/// session-local cache of h3 upgrade offers, keyed by origin. queried on
/// pool acquire, populated from response headers, expired lazily.
#[derive(Debug, Default)]
pub(crate) struct AltSvcCache {
    entries: Mutex<HashMap<Origin, AltSvcEntry>>,
}

impl AltSvcCache {
    /// remember h3 offers observed on a response from `origin`.
    pub(crate) fn update(&self, origin: &Origin, headers: &HeaderMap) {
        let Some(value) = headers.get(ALT_SVC).and_then(|v| v.to_str().ok()) else {
            return;
        };

        let Some(offers) = parse(value) else {
            self.entries.lock().unwrap().remove(origin);
            return;
        };

        // only h3 offers are actionable. the first one wins, matching the
        // header's preference ordering.
        let Some(offer) = offers.iter().find(|o| o.protocol.starts_with("h3")) else {
            return;
        };

        let host = if offer.host.is_empty() {
            origin.host.clone()
        } else {
            offer.host.clone()
        };

        debug!(origin = %origin, host = %host, port = offer.port, "caching alt-svc h3 offer");

        self.entries.lock().unwrap().insert(
            origin.clone(),
            AltSvcEntry {
                host,
                port: offer.port,
                deadline: Instant::now() + offer.max_age,
            },
        );
    }

    /// fresh h3 alternative for `origin`, if one is known.
    pub(crate) fn get(&self, origin: &Origin) -> Option<AltSvcEntry> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(origin) {
            Some(entry) if entry.deadline > Instant::now() => Some(entry.clone()),
            Some(_) => {
                entries.remove(origin);
                None
            }
            None => None,
        }
    }

    /// drop a cached alternative that failed to connect so the next acquire
    /// does not retry it.
    pub(crate) fn invalidate(&self, origin: &Origin) {
        self.entries.lock().unwrap().remove(origin);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::uri::Origin;

    #[test]
    fn parse_single_offer() {
        let offers = parse(r#"h3=":443"; ma=86400"#).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(&*offers[0].protocol, "h3");
        assert_eq!(&*offers[0].host, "");
        assert_eq!(offers[0].port, 443);
        assert_eq!(offers[0].max_age, Duration::from_secs(86400));
    }

    #[test]
    fn parse_multiple_offers() {
        let offers = parse(r#"h3="alt.example.test:8443"; ma=60, h2=":443""#).unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(&*offers[0].host, "alt.example.test");
        assert_eq!(offers[0].port, 8443);
        assert_eq!(&*offers[1].protocol, "h2");
    }

    #[test]
    fn parse_clear() {
        assert!(parse("clear").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expiry() {
        let cache = AltSvcCache::default();
        let origin = Origin::from_uri(&"https://example.test/".parse().unwrap()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(ALT_SVC, r#"h3=":443"; ma=60"#.parse().unwrap());
        cache.update(&origin, &headers);

        assert!(cache.get(&origin).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&origin).is_none());
    }

    #[test]
    fn clear_drops_entry() {
        let cache = AltSvcCache::default();
        let origin = Origin::from_uri(&"https://example.test/".parse().unwrap()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(ALT_SVC, r#"h3=":443""#.parse().unwrap());
        cache.update(&origin, &headers);
        assert!(cache.get(&origin).is_some());

        let mut headers = HeaderMap::new();
        headers.insert(ALT_SVC, "clear".parse().unwrap());
        cache.update(&origin, &headers);
        assert!(cache.get(&origin).is_none());
    }
}
