use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures_core::stream::Stream;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode, Uri, Version};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant, Sleep};

use crate::{
    body::ResponseBody,
    error::{Error, JsonError, StatusError, TimeoutError},
    headers::{content_type_is_json, TypedHeaders},
    middleware::coding::ContentDecoder,
    timeout::Timeout,
};

/// reason phrase sent alongside the status line on http/1. informational
/// only; absent when it matches the canonical phrase for the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(Box<str>);

impl ReasonPhrase {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReasonPhrase {
    fn from(reason: &str) -> Self {
        Self(reason.into())
    }
}

enum BodyState {
    Streaming(ResponseBody),
    Eager(Bytes),
    Taken,
}

/// response to one exchange. owns either its body bytes or a live stream
/// cursor on the originating connection, never both. closing it or
/// exhausting the stream returns that connection to the pool.
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Uri,
    reason: Option<ReasonPhrase>,
    history: Vec<Response>,
    trailers: Option<HeaderMap>,
    encoding_override: Option<String>,
    read_timeout: Duration,
    decoder: Option<ContentDecoder>,
    body: BodyState,
}

impl Response {
    pub(crate) fn new(
        res: http::Response<ResponseBody>,
        url: Uri,
        version: Version,
        read_timeout: Duration,
    ) -> Self {
        let (mut parts, body) = res.into_parts();

        Self {
            status: parts.status,
            version,
            reason: parts.extensions.remove::<ReasonPhrase>(),
            headers: parts.headers,
            url,
            history: Vec::new(),
            trailers: None,
            encoding_override: None,
            read_timeout,
            decoder: None,
            body: BodyState::Streaming(body),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// http version the exchange was actually carried on.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// typed, attribute addressable view of the headers.
    pub fn oheaders(&self) -> TypedHeaders<'_> {
        TypedHeaders::new(&self.headers)
    }

    /// final url of the exchange, after redirects.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason
            .as_ref()
            .map(ReasonPhrase::as_str)
            .or_else(|| self.status.canonical_reason())
    }

    /// prior responses of the redirect chain, oldest first.
    pub fn history(&self) -> &[Response] {
        &self.history
    }

    /// mutable access to the redirect chain, for reading the hop bodies.
    pub fn history_mut(&mut self) -> &mut [Response] {
        &mut self.history
    }

    /// trailer headers, available once the body has been fully read.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    /// text encoding used by [`text`], when detected or set.
    ///
    /// [`text`]: Response::text
    pub fn encoding(&self) -> Option<&str> {
        self.encoding_override
            .as_deref()
            .or_else(|| self.charset_from_headers())
    }

    /// force the encoding [`text`] decodes with.
    ///
    /// [`text`]: Response::text
    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding_override = Some(encoding.into().to_ascii_lowercase());
    }

    /// return `self` on informational, success and redirect statuses; fail
    /// with a status error for 4xx/5xx.
    pub fn raise_for_status(self) -> Result<Self, Error> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(StatusError {
                status: self.status,
                url: self.url.clone(),
            }
            .into());
        }
        Ok(self)
    }

    /// full body, decompressed, buffered in memory. repeated calls return
    /// the cached bytes.
    pub async fn content(&mut self) -> Result<Bytes, Error> {
        self.buffer().await?;
        match self.body {
            BodyState::Eager(ref bytes) => Ok(bytes.clone()),
            _ => Err(Error::StreamConsumed),
        }
    }

    /// body decoded as text. resolution order: user override, content-type
    /// charset, byte order mark, utf-8 validation. `None` when none of them
    /// produces a confident answer.
    pub async fn text(&mut self) -> Result<Option<String>, Error> {
        let bytes = self.content().await?;

        if bytes.is_empty() {
            return Ok(Some(String::new()));
        }

        let encoding = self
            .encoding_override
            .clone()
            .or_else(|| self.charset_from_headers().map(str::to_owned));

        Ok(decode_text(&bytes, encoding.as_deref()))
    }

    /// body parsed as json. the content type must indicate a json media
    /// type (`application/json` or a `+json` suffix).
    pub async fn json<T>(&mut self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        if !content_type_is_json(&self.headers) {
            return Err(JsonError::WrongContentType.into());
        }

        let bytes = self.content().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// stream the (decompressed) body in chunks of at most `chunk_size`
    /// bytes. the stream is finite and not restartable; exhausting it
    /// releases the underlying connection back to the pool.
    pub fn iter_content(&mut self, chunk_size: usize) -> Result<BodyIter<'_>, Error> {
        let source = match core::mem::replace(&mut self.body, BodyState::Taken) {
            BodyState::Streaming(body) => IterSource::Stream(body),
            BodyState::Eager(bytes) => IterSource::Buffered(bytes),
            BodyState::Taken => return Err(Error::StreamConsumed),
        };

        Ok(BodyIter {
            source,
            decoder: self.decoder.take(),
            chunk_size: chunk_size.max(1),
            pending: BytesMut::new(),
            timer: Box::pin(sleep(self.read_timeout)),
            read_timeout: self.read_timeout,
            done: false,
            _borrow: core::marker::PhantomData,
        })
    }

    /// stream the body line by line. `keepends` keeps the trailing newline
    /// on every yielded line.
    pub fn iter_lines(&mut self, keepends: bool) -> Result<LineIter<'_>, Error> {
        Ok(LineIter {
            inner: self.iter_content(16 * 1024)?,
            buf: BytesMut::new(),
            keepends,
        })
    }

    /// the raw stream cursor, without decompression. consumes the body.
    pub fn raw(&mut self) -> Result<ResponseBody, Error> {
        match core::mem::replace(&mut self.body, BodyState::Taken) {
            BodyState::Streaming(body) => Ok(body),
            BodyState::Eager(_) => Err(Error::StreamConsumed),
            BodyState::Taken => Err(Error::StreamConsumed),
        }
    }

    /// relinquish the stream cursor without reading it. idempotent. the
    /// underlying connection is discarded when the body was not exhausted.
    pub fn close(&mut self) {
        if let BodyState::Streaming(mut body) = core::mem::replace(&mut self.body, BodyState::Taken)
        {
            body.destroy_on_drop();
        }
    }

    pub(crate) fn set_history(&mut self, history: Vec<Response>) {
        self.history = history;
    }

    pub(crate) fn apply_decoder(&mut self) {
        if matches!(self.body, BodyState::Streaming(_)) {
            self.decoder = ContentDecoder::from_headers(&self.headers);
        }
    }

    /// drain the streaming body into memory, decompressing on the way.
    pub(crate) async fn buffer(&mut self) -> Result<(), Error> {
        let BodyState::Streaming(ref mut body) = self.body else {
            return Ok(());
        };

        let mut decoder = self.decoder.take();
        let mut out = BytesMut::new();
        let mut timer = Box::pin(sleep(self.read_timeout));

        loop {
            // inactivity window: the timer restarts whenever bytes arrive.
            timer.as_mut().reset(Instant::now() + self.read_timeout);

            match body.next().timeout(timer.as_mut()).await {
                Ok(Some(Ok(chunk))) => match decoder {
                    Some(ref mut decoder) => {
                        if let Some(decoded) = decoder.code(&chunk).map_err(Error::Io)? {
                            out.extend_from_slice(&decoded);
                        }
                    }
                    None => out.extend_from_slice(&chunk),
                },
                Ok(Some(Err(e))) => {
                    body.destroy_on_drop();
                    self.body = BodyState::Taken;
                    return Err(Error::Body(e));
                }
                Ok(None) => break,
                Err(_) => {
                    body.destroy_on_drop();
                    self.body = BodyState::Taken;
                    return Err(TimeoutError::Read.into());
                }
            }
        }

        if let Some(ref mut decoder) = decoder {
            if let Some(decoded) = decoder.code_eof().map_err(Error::Io)? {
                out.extend_from_slice(&decoded);
            }
        }

        self.trailers = body.take_h2_trailers();

        self.body = BodyState::Eager(out.freeze());
        Ok(())
    }

    fn charset_from_headers(&self) -> Option<&str> {
        // borrow-friendly charset lookup without the typed view.
        let raw = self
            .headers
            .get(http::header::CONTENT_TYPE)?
            .to_str()
            .ok()?;
        let param = raw
            .split(';')
            .skip(1)
            .map(str::trim)
            .find_map(|p| p.strip_prefix("charset="))?;
        Some(param.trim_matches('"'))
    }
}

impl core::fmt::Debug for Response {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.to_string())
            .finish()
    }
}

fn decode_text(bytes: &[u8], declared: Option<&str>) -> Option<String> {
    if let Some(charset) = declared {
        let charset = charset.to_ascii_lowercase();
        return match charset.as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => {
                String::from_utf8(strip_utf8_bom(bytes).to_vec()).ok()
            }
            "iso-8859-1" | "latin-1" | "latin1" => {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
            _ => None,
        };
    }

    // byte order marks decide before any sniffing.
    if let Some(stripped) = bytes.strip_prefix(&[0xef, 0xbb, 0xbf]) {
        return String::from_utf8(stripped.to_vec()).ok();
    }
    if let Some(stripped) = bytes.strip_prefix(&[0xff, 0xfe]) {
        return decode_utf16(stripped, u16::from_le_bytes);
    }
    if let Some(stripped) = bytes.strip_prefix(&[0xfe, 0xff]) {
        return decode_utf16(stripped, u16::from_be_bytes);
    }

    // last resort: accept bytes that already are valid utf-8, refuse to
    // guess beyond that.
    core::str::from_utf8(bytes).map(str::to_owned).ok()
}

fn strip_utf8_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(bytes)
}

fn decode_utf16(bytes: &[u8], combine: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| combine([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

enum IterSource {
    Stream(ResponseBody),
    Buffered(Bytes),
}

/// chunked body stream returned by [`Response::iter_content`].
pub struct BodyIter<'a> {
    source: IterSource,
    decoder: Option<ContentDecoder>,
    chunk_size: usize,
    pending: BytesMut,
    timer: Pin<Box<Sleep>>,
    read_timeout: Duration,
    done: bool,
    _borrow: core::marker::PhantomData<&'a mut Response>,
}

impl Stream for BodyIter<'_> {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.pending.len() >= this.chunk_size || (this.done && !this.pending.is_empty()) {
                let take = this.chunk_size.min(this.pending.len());
                return Poll::Ready(Some(Ok(this.pending.split_to(take).freeze())));
            }
            if this.done {
                return Poll::Ready(None);
            }

            let chunk = match this.source {
                IterSource::Buffered(ref mut bytes) => {
                    if bytes.is_empty() {
                        None
                    } else {
                        Some(Ok(core::mem::take(bytes)))
                    }
                }
                IterSource::Stream(ref mut body) => {
                    match Pin::new(&mut *body).poll_next(cx) {
                        Poll::Ready(item) => {
                            // progress was made, restart the inactivity window.
                            this.timer
                                .as_mut()
                                .reset(Instant::now() + this.read_timeout);
                            item
                        }
                        Poll::Pending => {
                            return match this.timer.as_mut().poll(cx) {
                                Poll::Ready(_) => {
                                    body.destroy_on_drop();
                                    this.done = true;
                                    Poll::Ready(Some(Err(TimeoutError::Read.into())))
                                }
                                Poll::Pending => Poll::Pending,
                            };
                        }
                    }
                }
            };

            match chunk {
                Some(Ok(chunk)) => match this.decoder {
                    Some(ref mut decoder) => match decoder.code(&chunk) {
                        Ok(Some(decoded)) => this.pending.extend_from_slice(&decoded),
                        Ok(None) => {}
                        Err(e) => {
                            this.done = true;
                            return Poll::Ready(Some(Err(Error::Io(e))));
                        }
                    },
                    None => this.pending.extend_from_slice(&chunk),
                },
                Some(Err(e)) => {
                    if let IterSource::Stream(ref mut body) = this.source {
                        body.destroy_on_drop();
                    }
                    this.done = true;
                    return Poll::Ready(Some(Err(Error::Body(e))));
                }
                None => {
                    if let Some(ref mut decoder) = this.decoder {
                        match decoder.code_eof() {
                            Ok(Some(decoded)) => this.pending.extend_from_slice(&decoded),
                            Ok(None) => {}
                            Err(e) => {
                                this.done = true;
                                return Poll::Ready(Some(Err(Error::Io(e))));
                            }
                        }
                    }
                    this.done = true;
                }
            }
        }
    }
}

/// line framed body stream returned by [`Response::iter_lines`].
pub struct LineIter<'a> {
    inner: BodyIter<'a>,
    buf: BytesMut,
    keepends: bool,
}

impl Stream for LineIter<'_> {
    type Item = Result<String, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(pos) = this.buf.iter().position(|&b| b == b'\n') {
                let mut line = this.buf.split_to(pos + 1);
                if !this.keepends {
                    line.truncate(line.len() - 1);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                }
                return Poll::Ready(Some(
                    String::from_utf8(line.to_vec()).map_err(|e| Error::Body(Box::new(e))),
                ));
            }

            match core::task::ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    if this.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    let line = this.buf.split();
                    return Poll::Ready(Some(
                        String::from_utf8(line.to_vec()).map_err(|e| Error::Body(Box::new(e))),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn response(body: ResponseBody) -> Response {
        let res = http::Response::new(body);
        Response::new(
            res,
            "http://example.test/".parse().unwrap(),
            Version::HTTP_11,
            Duration::from_secs(30),
        )
    }

    fn eager(bytes: &'static [u8]) -> Response {
        let mut res = response(ResponseBody::eof());
        res.body = BodyState::Eager(Bytes::from_static(bytes));
        res
    }

    #[tokio::test]
    async fn content_is_cached() {
        let mut res = eager(b"hello");
        assert_eq!(res.content().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(res.content().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn text_decodes_utf8() {
        let mut res = eager("grüße".as_bytes());
        assert_eq!(res.text().await.unwrap().unwrap(), "grüße");
    }

    #[tokio::test]
    async fn text_honors_latin1_charset() {
        let mut res = eager(b"caf\xe9");
        res.headers.insert(
            http::header::CONTENT_TYPE,
            "text/plain; charset=ISO-8859-1".parse().unwrap(),
        );
        assert_eq!(res.text().await.unwrap().unwrap(), "café");
    }

    #[tokio::test]
    async fn text_returns_none_without_confidence() {
        // invalid utf-8, no declared charset, no bom.
        let mut res = eager(b"\xfe\xab\xff\x01");
        assert!(res.text().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn text_empty_body() {
        let mut res = eager(b"");
        assert_eq!(res.text().await.unwrap().unwrap(), "");
    }

    #[test]
    fn bom_decoding() {
        assert_eq!(
            decode_text(b"\xef\xbb\xbfhay", None).unwrap(),
            "hay"
        );
        // utf-16le "hi"
        assert_eq!(
            decode_text(b"\xff\xfeh\x00i\x00", None).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn json_requires_json_content_type() {
        let mut res = eager(b"{\"some\":\"data\"}");
        let err = res.json::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(err, Error::Json(JsonError::WrongContentType)));

        let mut res = eager(b"{\"some\":\"data\"}");
        res.headers.insert(
            http::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        let value = res.json::<serde_json::Value>().await.unwrap();
        assert_eq!(value["some"], "data");
    }

    #[tokio::test]
    async fn malformed_json_is_decode_error() {
        let mut res = eager(b"{nope");
        res.headers.insert(
            http::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        assert!(matches!(
            res.json::<serde_json::Value>().await,
            Err(Error::Json(JsonError::Decode(_)))
        ));
    }

    #[tokio::test]
    async fn iter_content_chunks_and_consumes() {
        let mut res = eager(b"abcdefg");

        {
            let mut iter = res.iter_content(3).unwrap();
            let mut chunks = Vec::new();
            while let Some(chunk) = iter.next().await {
                chunks.push(chunk.unwrap());
            }
            assert_eq!(chunks, vec!["abc", "def", "g"]);
        }

        // second iteration fails.
        assert!(matches!(res.iter_content(3), Err(Error::StreamConsumed)));
    }

    #[tokio::test]
    async fn iter_lines_framing() {
        let mut res = eager(b"one\r\ntwo\nthree");
        let mut iter = res.iter_lines(false).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = iter.next().await {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn iter_lines_keepends() {
        let mut res = eager(b"one\ntwo");
        let mut iter = res.iter_lines(true).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = iter.next().await {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["one\n", "two"]);
    }

    #[test]
    fn raise_for_status() {
        let res = eager(b"");
        assert!(res.raise_for_status().is_ok());

        let mut res = eager(b"");
        res.status = StatusCode::NOT_FOUND;
        let err = res.raise_for_status().unwrap_err();
        assert!(matches!(err, Error::Status(ref s) if s.status == StatusCode::NOT_FOUND));
    }

    #[test]
    fn close_is_idempotent() {
        let mut res = eager(b"");
        res.close();
        res.close();
    }

    #[test]
    fn encoding_override_wins() {
        let mut res = eager(b"");
        res.headers.insert(
            http::header::CONTENT_TYPE,
            "text/plain; charset=utf-8".parse().unwrap(),
        );
        assert_eq!(res.encoding(), Some("utf-8"));

        res.set_encoding("ISO-8859-1");
        assert_eq!(res.encoding(), Some("iso-8859-1"));
    }
}
