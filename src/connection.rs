use core::{
    pin::Pin,
    task::{Context, Poll},
};

use std::io;

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::{tls::TlsStream, uri::Origin};

/// pool bucket key. one bucket per (scheme, host, port) origin.
pub(crate) type ConnectionKey = Origin;

/// exclusive connection used by http/1 exchanges. a tls connection whose alpn
/// negotiated h2 is promoted into [`ConnectionShared`] instead of landing
/// here.
pub enum ConnectionExclusive {
    Tcp(TcpStream),
    Tls(Box<TlsStream>),
}

/// http/1 connection checked out of the pool, returned on drop.
pub(crate) type H1Connection =
    crate::pool::exclusive::Conn<ConnectionKey, ConnectionExclusive>;

impl From<TcpStream> for ConnectionExclusive {
    fn from(io: TcpStream) -> Self {
        Self::Tcp(io)
    }
}

impl From<TlsStream> for ConnectionExclusive {
    fn from(io: TlsStream) -> Self {
        Self::Tls(Box::new(io))
    }
}

impl AsyncRead for ConnectionExclusive {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(io) => Pin::new(io).poll_read(cx, buf),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionExclusive {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(io) => Pin::new(io).poll_write(cx, buf),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(io) => Pin::new(io).poll_flush(cx),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(io) => Pin::new(io).poll_shutdown(cx),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_shutdown(cx),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(io) => Pin::new(io).poll_write_vectored(cx, bufs),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Self::Tcp(io) => io.is_write_vectored(),
            Self::Tls(io) => io.is_write_vectored(),
        }
    }
}

/// multiplexed connection shared by every in-flight exchange of an origin.
/// cloning hands out another stream slot on the same socket.
#[derive(Clone)]
pub enum ConnectionShared {
    H2(crate::h2::Connection),
    #[cfg(feature = "http3")]
    H3(crate::h3::Connection),
}

impl From<crate::h2::Connection> for ConnectionShared {
    fn from(conn: crate::h2::Connection) -> Self {
        Self::H2(conn)
    }
}

#[cfg(feature = "http3")]
impl From<crate::h3::Connection> for ConnectionShared {
    fn from(conn: crate::h3::Connection) -> Self {
        Self::H3(conn)
    }
}
