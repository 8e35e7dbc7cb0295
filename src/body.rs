use core::{
    fmt, mem,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::stream::Stream;

pub use crate::error::BodyError;

pub(crate) type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// request body in one of the shapes the encoder recognizes. streaming bodies
/// are framed chunked on http/1 and as plain data frames on http/2 and http/3.
pub enum RequestBody {
    None,
    Once(Bytes),
    Stream(BoxStream),
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::None
    }
}

impl RequestBody {
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Once(bytes.into())
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BodyError>,
    {
        Self::Stream(Box::pin(MapErr { stream }))
    }

    pub(crate) fn size(&self) -> BodySize {
        match self {
            Self::None => BodySize::None,
            Self::Once(bytes) => BodySize::Sized(bytes.len() as u64),
            Self::Stream(_) => BodySize::Stream,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("RequestBody::None"),
            Self::Once(bytes) => write!(f, "RequestBody::Once({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("RequestBody::Stream(..)"),
        }
    }
}

impl Stream for RequestBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            Self::None => Poll::Ready(None),
            Self::Once(bytes) if bytes.is_empty() => Poll::Ready(None),
            Self::Once(bytes) => Poll::Ready(Some(Ok(mem::take(bytes)))),
            Self::Stream(stream) => stream.as_mut().poll_next(cx),
        }
    }
}

pin_project_lite::pin_project! {
    struct MapErr<S> {
        #[pin]
        stream: S,
    }
}

impl<S, E> Stream for MapErr<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BodyError>,
{
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .stream
            .poll_next(cx)
            .map(|opt| opt.map(|res| res.map_err(Into::into)))
    }
}

/// framing hint derived from a request body before any byte is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodySize {
    /// no body. content-length and transfer-encoding are both omitted.
    None,
    /// known size. becomes the content-length header value.
    Sized(u64),
    /// unknown size. chunked on http/1, data frames elsewhere.
    Stream,
}

/// streaming response body tied to the connection the exchange ran on.
/// dropping it returns (or destroys) the underlying pooled connection.
pub struct ResponseBody {
    inner: Inner,
}

pub(crate) enum Inner {
    H1(crate::h1::body::ResponseBody),
    H2(crate::h2::body::ResponseBody),
    #[cfg(feature = "http3")]
    H3(crate::h3::body::ResponseBody),
    // canned bytes for driving the pipeline without a socket.
    #[cfg(test)]
    Buffered(Bytes),
    Eof,
}

impl ResponseBody {
    pub(crate) fn h1(body: crate::h1::body::ResponseBody) -> Self {
        Self {
            inner: Inner::H1(body),
        }
    }

    pub(crate) fn h2(body: crate::h2::body::ResponseBody) -> Self {
        Self {
            inner: Inner::H2(body),
        }
    }

    #[cfg(feature = "http3")]
    pub(crate) fn h3(body: crate::h3::body::ResponseBody) -> Self {
        Self {
            inner: Inner::H3(body),
        }
    }

    pub(crate) fn eof() -> Self {
        Self { inner: Inner::Eof }
    }

    #[cfg(test)]
    pub(crate) fn buffered(bytes: Bytes) -> Self {
        Self {
            inner: Inner::Buffered(bytes),
        }
    }

    /// mark the originating connection as not reusable. a body dropped half
    /// read must not put its connection back into the pool.
    pub(crate) fn destroy_on_drop(&mut self) {
        if let Inner::H1(ref mut body) = self.inner {
            body.conn().destroy_on_drop()
        }
    }

    /// trailers captured by the http/2 stream, once drained.
    pub(crate) fn take_h2_trailers(&mut self) -> Option<http::HeaderMap> {
        match self.inner {
            Inner::H2(ref mut body) => body.take_trailers(),
            _ => None,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Inner::H1(_) => f.write_str("ResponseBody::H1(..)"),
            Inner::H2(_) => f.write_str("ResponseBody::H2(..)"),
            #[cfg(feature = "http3")]
            Inner::H3(_) => f.write_str("ResponseBody::H3(..)"),
            #[cfg(test)]
            Inner::Buffered(_) => f.write_str("ResponseBody::Buffered(..)"),
            Inner::Eof => f.write_str("ResponseBody::Eof"),
        }
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().inner {
            Inner::H1(ref mut body) => Pin::new(body).poll_next(cx),
            Inner::H2(ref mut body) => Pin::new(body).poll_next(cx),
            #[cfg(feature = "http3")]
            Inner::H3(ref mut body) => Pin::new(body).poll_next(cx),
            #[cfg(test)]
            Inner::Buffered(ref mut bytes) if bytes.is_empty() => Poll::Ready(None),
            #[cfg(test)]
            Inner::Buffered(ref mut bytes) => Poll::Ready(Some(Ok(mem::take(bytes)))),
            Inner::Eof => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn body_size() {
        assert_eq!(RequestBody::None.size(), BodySize::None);
        assert_eq!(RequestBody::bytes("hello").size(), BodySize::Sized(5));
    }

    #[tokio::test]
    async fn once_yields_single_chunk() {
        use futures_util::StreamExt;

        let mut body = RequestBody::bytes("abc");
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("abc"));
        assert!(body.next().await.is_none());
    }
}
