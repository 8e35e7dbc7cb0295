mod error;

pub(crate) mod body;
pub(crate) mod proto;

pub use self::error::Error;

use std::sync::{Arc, OnceLock};

use bytes::Bytes;

/// handle on one http/3 connection over quic. clones share the connection
/// and open their own bidirectional request streams.
pub type Connection = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

/// lazily bound quic endpoint shared by every h3 dial of a session. binding
/// needs a live reactor, so it happens on the first h3 attempt rather than
/// at session build.
pub(crate) struct EndpointState {
    endpoint: OnceLock<quinn::Endpoint>,
    accept_invalid_certs: bool,
}

impl EndpointState {
    pub(crate) fn new(accept_invalid_certs: bool) -> Self {
        Self {
            endpoint: OnceLock::new(),
            accept_invalid_certs,
        }
    }

    pub(crate) fn get(&self) -> &quinn::Endpoint {
        self.endpoint
            .get_or_init(|| make_endpoint(self.accept_invalid_certs))
    }
}

fn make_endpoint(accept_invalid_certs: bool) -> quinn::Endpoint {
    let mut crypto = crate::tls::client_config(Vec::new(), accept_invalid_certs);
    crypto.alpn_protocols = vec![b"h3".to_vec()];

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .unwrap_or_else(|e| panic!("tls config rejected for quic: {e:?}"));
    let config = quinn::ClientConfig::new(Arc::new(crypto));

    let mut endpoint = quinn::Endpoint::client(
        "0.0.0.0:0"
            .parse()
            .expect("wildcard socket address is valid"),
    )
    .unwrap_or_else(|e| panic!("failed to bind udp socket for http/3: {e}"));

    endpoint.set_default_client_config(config);

    endpoint
}
