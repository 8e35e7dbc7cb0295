use bytes::{BufMut, BytesMut};
use http::{Request, Version};

use crate::body::BodySize;

use super::{codec::TransferCoding, error::ProtoError, Context};

impl Context {
    /// encode the request line and headers, returning the transfer coding
    /// the request body must be written with.
    pub(crate) fn encode_head<B>(
        &mut self,
        buf: &mut BytesMut,
        req: &Request<B>,
        body_size: BodySize,
    ) -> Result<TransferCoding, ProtoError> {
        let method = req.method().as_str().as_bytes();

        // absolute form is required when a proxy forwards the request.
        let absolute = req
            .extensions()
            .get::<crate::service::AbsoluteForm>()
            .is_some();
        let absolute_target;
        let target = if absolute {
            absolute_target = req.uri().to_string();
            absolute_target.as_bytes()
        } else {
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
                .as_bytes()
        };

        let version = match req.version() {
            Version::HTTP_10 => b" HTTP/1.0".as_slice(),
            _ => b" HTTP/1.1".as_slice(),
        };

        buf.reserve(method.len() + 1 + target.len() + version.len() + 2);
        buf.put_slice(method);
        buf.put_slice(b" ");
        buf.put_slice(target);
        buf.put_slice(version);

        let mut skip_len = false;
        let mut encoder = TransferCoding::eof();

        for (name, value) in req.headers() {
            if name == http::header::CONTENT_LENGTH {
                let len = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or(super::error::Parse::HeaderValue)?;
                encoder = TransferCoding::length(len);
                skip_len = true;
            } else if name == http::header::TRANSFER_ENCODING {
                encoder = TransferCoding::encode_chunked();
                skip_len = true;
            } else if name == http::header::CONNECTION {
                self.set_ctype_from_header(value);
            }

            buf.reserve(name.as_str().len() + value.len() + 4);
            buf.put_slice(b"\r\n");
            buf.put_slice(name.as_str().as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
        }

        // framing headers the caller did not write themselves.
        if !skip_len {
            match body_size {
                BodySize::None => encoder = TransferCoding::eof(),
                BodySize::Sized(size) => {
                    let mut buffer = itoa::Buffer::new();
                    let buffer = buffer.format(size).as_bytes();
                    buf.reserve(buffer.len() + 18);
                    buf.put_slice(b"\r\ncontent-length: ");
                    buf.put_slice(buffer);
                    encoder = TransferCoding::length(size);
                }
                BodySize::Stream => {
                    buf.put_slice(b"\r\ntransfer-encoding: chunked");
                    encoder = TransferCoding::encode_chunked();
                }
            }
        }

        buf.put_slice(b"\r\n\r\n");

        Ok(encoder)
    }
}

#[cfg(test)]
mod test {
    use http::{header::HeaderValue, Method, Uri};

    use super::*;

    fn request(method: Method, uri: &str) -> Request<()> {
        let mut req = Request::new(());
        *req.method_mut() = method;
        *req.uri_mut() = uri.parse::<Uri>().unwrap();
        req
    }

    #[test]
    fn get_without_body() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::new();
        let req = request(Method::GET, "http://example.test/get?a=1");

        let encoder = ctx.encode_head(&mut buf, &req, BodySize::None).unwrap();

        assert!(encoder.is_eof());
        assert_eq!(&buf[..], b"GET /get?a=1 HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn sized_body_writes_content_length() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::new();
        let req = request(Method::POST, "http://example.test/post");

        let encoder = ctx
            .encode_head(&mut buf, &req, BodySize::Sized(11))
            .unwrap();

        assert_eq!(encoder, TransferCoding::Length(11));
        let head = std::str::from_utf8(&buf).unwrap();
        assert!(head.starts_with("POST /post HTTP/1.1\r\n"));
        assert!(head.contains("\r\ncontent-length: 11\r\n"));
    }

    #[test]
    fn streaming_body_is_chunked() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::new();
        let req = request(Method::POST, "http://example.test/upload");

        let encoder = ctx.encode_head(&mut buf, &req, BodySize::Stream).unwrap();

        assert_eq!(encoder, TransferCoding::EncodeChunked);
        assert!(std::str::from_utf8(&buf)
            .unwrap()
            .contains("\r\ntransfer-encoding: chunked\r\n"));
    }

    #[test]
    fn user_content_length_wins() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::new();
        let mut req = request(Method::POST, "http://example.test/");
        req.headers_mut()
            .insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("3"));

        let encoder = ctx
            .encode_head(&mut buf, &req, BodySize::Sized(3))
            .unwrap();

        assert_eq!(encoder, TransferCoding::Length(3));
        let head = std::str::from_utf8(&buf).unwrap();
        assert_eq!(head.matches("content-length").count(), 1);
    }
}
