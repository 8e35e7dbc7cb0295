use std::io;

use bytes::BytesMut;
use futures_util::StreamExt;
use http::{
    header::{HeaderValue, EXPECT, HOST},
    Method, Request, Response, StatusCode,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    body::{BodySize, RequestBody},
    h1::Error,
    request::OnInformational,
};

use super::{codec::TransferCoding, Context};

/// drive one http/1 exchange on `stream`: write the request head and body,
/// then read the response head. the undecoded tail of the read buffer and
/// the body decoder are handed back so the response body can stream lazily.
///
/// the returned bool is true when the connection must not be reused.
pub(crate) async fn send<S>(
    stream: &mut S,
    req: &mut Request<RequestBody>,
) -> Result<(Response<()>, BytesMut, TransferCoding, bool), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();

    if !req.headers().contains_key(HOST) {
        if let Some(host) = req.uri().host() {
            buf.reserve(host.len() + 6);
            buf.extend_from_slice(host.as_bytes());

            if let Some(port) = req.uri().port() {
                match port.as_str() {
                    "80" | "443" => {}
                    port => {
                        buf.extend_from_slice(b":");
                        buf.extend_from_slice(port.as_bytes());
                    }
                }
            }

            let val = HeaderValue::from_maybe_shared(buf.split().freeze())
                .map_err(|_| super::error::Parse::HeaderValue)
                .map_err(super::error::ProtoError::from)?;
            req.headers_mut().insert(HOST, val);
        }
    }

    let body_size = req.body().size();

    let mut is_expect = req.headers().contains_key(EXPECT);
    if is_expect && matches!(body_size, BodySize::None | BodySize::Sized(0)) {
        // no body to wait for, drop the expectation.
        req.headers_mut().remove(EXPECT);
        is_expect = false;
    }

    let mut ctx = Context::new();

    let encoder = ctx.encode_head(&mut buf, req, body_size)?;

    // important: flag head method after encode so the body decoder is
    // suppressed only on the read side.
    if *req.method() == Method::HEAD {
        ctx.set_head_method();
    }

    let on_informational = req.extensions().get::<OnInformational>().cloned();

    stream.write_all(&buf).await?;
    buf.clear();

    if is_expect {
        stream.flush().await?;

        loop {
            if let Some((res, decoder)) = try_read_head(stream, &mut buf, &mut ctx).await? {
                if res.status() == StatusCode::CONTINUE {
                    // green light, send the body below.
                    if let Some(ref cb) = on_informational {
                        cb.call(&res);
                    }
                    break;
                }

                if res.status().is_informational()
                    && res.status() != StatusCode::SWITCHING_PROTOCOLS
                {
                    if let Some(ref cb) = on_informational {
                        cb.call(&res);
                    }
                    continue;
                }

                // final response before the body went out.
                let is_close = ctx.is_connection_closed();
                return Ok((res, buf, decoder, is_close));
            }
        }
    }

    // send the request body. io errors here are deferred: the server may be
    // answering early with an explanation, which the response read surfaces.
    if let Err(e) = send_body(stream, encoder, req.body_mut(), &mut buf).await {
        ctx.set_close();
        buf.clear();

        match e {
            Error::Io(_) => {}
            e => return Err(e),
        }
    }

    loop {
        if let Some((res, decoder)) = try_read_head(stream, &mut buf, &mut ctx).await? {
            if res.status().is_informational() && res.status() != StatusCode::SWITCHING_PROTOCOLS {
                if let Some(ref cb) = on_informational {
                    cb.call(&res);
                }
                continue;
            }

            let is_close = ctx.is_connection_closed();
            return Ok((res, buf, decoder, is_close));
        }
    }
}

async fn send_body<S>(
    stream: &mut S,
    mut encoder: TransferCoding,
    body: &mut RequestBody,
    buf: &mut BytesMut,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !encoder.is_eof() {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Error::Std)?;
            encoder.encode(chunk, buf);
            // no need to batch chunks, write before pulling the next one.
            stream.write_all(buf).await?;
            buf.clear();
        }

        encoder.encode_eof(buf);
        stream.write_all(buf).await?;
        buf.clear();
    }

    stream.flush().await?;

    Ok(())
}

async fn try_read_head<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    ctx: &mut Context,
) -> Result<Option<(Response<()>, TransferCoding)>, Error>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(head) = ctx.decode_head(buf)? {
            return Ok(Some(head));
        }

        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
        }
    }
}

#[cfg(test)]
mod test {
    use std::pin::Pin;
    use std::task::{Context as TaskContext, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    // scripted io: hands out canned response bytes and records writes.
    struct Mock {
        input: BytesMut,
        written: Vec<u8>,
    }

    impl Mock {
        fn new(input: &str) -> Self {
            Self {
                input: BytesMut::from(input),
                written: Vec::new(),
            }
        }
    }

    impl AsyncRead for Mock {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let n = std::cmp::min(this.input.len(), buf.remaining());
            buf.put_slice(&this.input.split_to(n));
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for Mock {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut TaskContext<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.get_mut().written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn request(method: Method, uri: &str, body: RequestBody) -> Request<RequestBody> {
        let mut req = Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = uri.parse().unwrap();
        req
    }

    #[tokio::test]
    async fn get_exchange() {
        let mut io = Mock::new("HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
        let mut req = request(Method::GET, "http://example.test/get", RequestBody::None);

        let (res, mut buf, mut decoder, is_close) = send(&mut io, &mut req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(!is_close);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_ref(), b"hello");

        let written = String::from_utf8(io.written).unwrap();
        assert!(written.starts_with("GET /get HTTP/1.1\r\nhost: example.test\r\n"));
    }

    #[tokio::test]
    async fn non_default_port_in_host_header() {
        let mut io = Mock::new("HTTP/1.1 204 No Content\r\n\r\n");
        let mut req = request(Method::GET, "http://example.test:8080/", RequestBody::None);

        send(&mut io, &mut req).await.unwrap();

        let written = String::from_utf8(io.written).unwrap();
        assert!(written.contains("host: example.test:8080\r\n"));
    }

    #[tokio::test]
    async fn post_body_written() {
        let mut io = Mock::new("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        let mut req = request(
            Method::POST,
            "http://example.test/post",
            RequestBody::bytes("key1=value1&key1=value2"),
        );

        send(&mut io, &mut req).await.unwrap();

        let written = String::from_utf8(io.written).unwrap();
        assert!(written.contains("content-length: 23\r\n"));
        assert!(written.ends_with("\r\n\r\nkey1=value1&key1=value2"));
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let mut io = Mock::new(
            "HTTP/1.1 103 Early Hints\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n",
        );
        let mut req = request(Method::GET, "http://example.test/", RequestBody::None);

        let (res, ..) = send(&mut io, &mut req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn connection_close_reported() {
        let mut io = Mock::new("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        let mut req = request(Method::GET, "http://example.test/", RequestBody::None);

        let (.., is_close) = send(&mut io, &mut req).await.unwrap();
        assert!(is_close);
    }

    #[tokio::test]
    async fn head_body_suppressed() {
        let mut io = Mock::new("HTTP/1.1 200 OK\r\ncontent-length: 42\r\n\r\n");
        let mut req = request(Method::HEAD, "http://example.test/", RequestBody::None);

        let (res, mut buf, mut decoder, _) = send(&mut io, &mut req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_empty());
    }
}
