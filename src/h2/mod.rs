pub(crate) mod body;
pub(crate) mod proto;

use bytes::Bytes;

/// handle on one multiplexed http/2 connection. clones share the socket and
/// compete for stream slots; the h2 library enforces the peer's
/// `SETTINGS_MAX_CONCURRENT_STREAMS` through `ready` backpressure.
#[derive(Clone)]
pub struct Connection {
    pub(crate) tx: ::h2::client::SendRequest<Bytes>,
}
