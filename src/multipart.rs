//! `multipart/form-data` request bodies.

use bytes::{BufMut, Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use http::HeaderMap;
use rand::{distributions::Alphanumeric, Rng};

use crate::body::{BodyError, BoxStream, RequestBody};

const BOUNDARY_LEN: usize = 16;

/// a multipart form under construction. parts keep their insertion order on
/// the wire.
pub struct Form {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for Form {
    fn default() -> Self {
        Self::new()
    }
}

impl Form {
    pub fn new() -> Self {
        let boundary = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect();

        Self {
            boundary,
            parts: Vec::new(),
        }
    }

    /// honor a caller-chosen boundary instead of the generated one.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// add a simple text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::text(name, value));
        self
    }

    /// add a prepared part.
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// total encoded length when every part is sized. `None` means the body
    /// must be streamed.
    pub(crate) fn compute_length(&self) -> Option<u64> {
        let mut len = 0u64;
        for part in &self.parts {
            // boundary line + headers + trailing crlf.
            len += 2 + self.boundary.len() as u64 + 2;
            len += part.header_block().len() as u64;
            len += part.body_length()?;
            len += 2;
        }
        // closing delimiter.
        len += 2 + self.boundary.len() as u64 + 4;
        Some(len)
    }

    /// encode into a request body. forms made purely of in-memory parts are
    /// materialized so the request can carry a content-length; any streaming
    /// part switches the whole body to streaming.
    pub(crate) fn into_request_body(self) -> (String, RequestBody) {
        let content_type = self.content_type();

        if self
            .parts
            .iter()
            .all(|p| matches!(p.body, PartBody::Bytes(_)))
        {
            let mut buf = BytesMut::new();
            for part in &self.parts {
                buf.put_slice(b"--");
                buf.put_slice(self.boundary.as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(&part.header_block());
                let PartBody::Bytes(ref bytes) = part.body else {
                    unreachable!()
                };
                buf.put_slice(bytes);
                buf.put_slice(b"\r\n");
            }
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"--\r\n");

            return (content_type, RequestBody::Once(buf.freeze()));
        }

        (content_type, self.into_body())
    }

    pub(crate) fn into_body(self) -> RequestBody {
        let boundary = self.boundary;

        let mut segments: Vec<BoxStream> = Vec::with_capacity(self.parts.len() * 2 + 1);

        for part in self.parts {
            let mut head = BytesMut::new();
            head.put_slice(b"--");
            head.put_slice(boundary.as_bytes());
            head.put_slice(b"\r\n");
            head.put_slice(&part.header_block());

            segments.push(once_ok(head.freeze()));
            match part.body {
                PartBody::Bytes(bytes) => segments.push(once_ok(bytes)),
                PartBody::Stream { stream, .. } => segments.push(stream),
            }
            segments.push(once_ok(Bytes::from_static(b"\r\n")));
        }

        let mut tail = BytesMut::new();
        tail.put_slice(b"--");
        tail.put_slice(boundary.as_bytes());
        tail.put_slice(b"--\r\n");
        segments.push(once_ok(tail.freeze()));

        RequestBody::Stream(Box::pin(futures_util::stream::iter(segments).flatten()))
    }
}

fn once_ok(bytes: Bytes) -> BoxStream {
    Box::pin(futures_util::stream::once(async move { Ok(bytes) }))
}

/// one field of a multipart form: content disposition metadata, optional
/// content type, caller-declared extra headers and the field body.
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    headers: HeaderMap,
    body: PartBody,
}

enum PartBody {
    Bytes(Bytes),
    Stream {
        stream: BoxStream,
        length: Option<u64>,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::bytes(name, Bytes::from(value.into()))
    }

    pub fn bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            headers: HeaderMap::new(),
            body: PartBody::Bytes(bytes.into()),
        }
    }

    /// streaming part. supply `length` when known so the whole form can be
    /// sent with a content-length.
    pub fn stream<S, E>(name: impl Into<String>, stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BodyError>,
    {
        let RequestBody::Stream(stream) = RequestBody::stream(stream) else {
            unreachable!()
        };
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            headers: HeaderMap::new(),
            body: PartBody::Stream { stream, length },
        }
    }

    pub fn file_name(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn mime(mut self, mime: mime::Mime) -> Self {
        self.content_type = Some(mime.to_string());
        self
    }

    /// extra header carried inside this part only.
    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn body_length(&self) -> Option<u64> {
        match &self.body {
            PartBody::Bytes(bytes) => Some(bytes.len() as u64),
            PartBody::Stream { length, .. } => *length,
        }
    }

    // content-disposition, optional content-type and user headers, followed
    // by the blank line separating the part head from its body.
    fn header_block(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_slice(b"Content-Disposition: form-data; name=\"");
        buf.put_slice(escape(&self.name).as_bytes());
        buf.put_slice(b"\"");
        if let Some(filename) = &self.filename {
            buf.put_slice(b"; filename=\"");
            buf.put_slice(escape(filename).as_bytes());
            buf.put_slice(b"\"");
        }
        buf.put_slice(b"\r\n");

        if let Some(content_type) = &self.content_type {
            buf.put_slice(b"Content-Type: ");
            buf.put_slice(content_type.as_bytes());
            buf.put_slice(b"\r\n");
        }

        for (name, value) in &self.headers {
            buf.put_slice(name.as_str().as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

// quoted-string escaping for field names and filenames.
fn escape(input: &str) -> String {
    input.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod test {
    use futures_util::StreamExt;

    use super::*;

    async fn collect(body: RequestBody) -> Vec<u8> {
        let RequestBody::Stream(mut stream) = body else {
            panic!("multipart body must stream")
        };
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn encode_fields_and_file() {
        let form = Form::with_boundary("XbOuNdArYX")
            .text("key", "value")
            .part(
                Part::bytes("upload", &b"\x00\x01binary"[..])
                    .file_name("data.bin")
                    .mime(mime::APPLICATION_OCTET_STREAM),
            );

        assert_eq!(
            form.content_type(),
            "multipart/form-data; boundary=XbOuNdArYX"
        );

        let expected_len = form.compute_length().unwrap();
        let encoded = collect(form.into_body()).await;
        assert_eq!(encoded.len() as u64, expected_len);

        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("--XbOuNdArYX\r\n"));
        assert!(text.contains("Content-Disposition: form-data; name=\"key\"\r\n\r\nvalue\r\n"));
        assert!(text.contains(
            "Content-Disposition: form-data; name=\"upload\"; filename=\"data.bin\"\r\n"
        ));
        assert!(text.contains("Content-Type: application/octet-stream\r\n"));
        assert!(text.ends_with("--XbOuNdArYX--\r\n"));
    }

    #[tokio::test]
    async fn unsized_stream_part_disables_length() {
        let chunks = futures_util::stream::iter([Ok::<_, BodyError>(Bytes::from_static(b"abc"))]);
        let form = Form::new().part(Part::stream("file", chunks, None));

        assert!(form.compute_length().is_none());
        let encoded = collect(form.into_body()).await;
        assert!(!encoded.is_empty());
    }

    #[test]
    fn random_boundaries_differ() {
        assert_ne!(Form::new().boundary(), Form::new().boundary());
        assert_eq!(Form::new().boundary().len(), BOUNDARY_LEN);
    }

    #[test]
    fn escaped_names() {
        let part = Part::text("we\"ird", "v");
        let block = part.header_block();
        assert!(std::str::from_utf8(&block)
            .unwrap()
            .contains("name=\"we\\\"ird\""));
    }
}
