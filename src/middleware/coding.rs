//! content-encoding decoders applied to response bodies.

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::{DeflateDecoder, GzDecoder};
use http::header::{HeaderMap, CONTENT_ENCODING};
use tracing::debug;

/// accept-encoding value matching the decoders compiled in.
pub(crate) fn accept_encoding() -> &'static str {
    match (cfg!(feature = "br"), cfg!(feature = "zstd")) {
        (true, true) => "gzip, deflate, br, zstd",
        (true, false) => "gzip, deflate, br",
        (false, true) => "gzip, deflate, zstd",
        (false, false) => "gzip, deflate",
    }
}

pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// streaming decoder for one response body. `code` feeds a compressed chunk
/// in, `code_eof` drains whatever the underlying decoder still buffers.
pub(crate) enum ContentDecoder {
    Identity,
    Gz(GzDecoder<Writer>),
    De(DeflateDecoder<Writer>),
    #[cfg(feature = "br")]
    Br(brotli2::write::BrotliDecoder<Writer>),
    #[cfg(feature = "zstd")]
    Zstd(Box<zstd::stream::write::Decoder<'static, Writer>>),
}

impl ContentDecoder {
    /// pick a decoder for the response headers. `None` means the coding is
    /// unknown (or stacked) and the body should pass through untouched.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)?;

        if encoding.eq_ignore_ascii_case("gzip") {
            return Some(Self::Gz(GzDecoder::new(Writer::new())));
        }
        if encoding.eq_ignore_ascii_case("deflate") {
            return Some(Self::De(DeflateDecoder::new(Writer::new())));
        }
        #[cfg(feature = "br")]
        if encoding.eq_ignore_ascii_case("br") {
            return Some(Self::Br(brotli2::write::BrotliDecoder::new(Writer::new())));
        }
        #[cfg(feature = "zstd")]
        if encoding.eq_ignore_ascii_case("zstd") {
            return match zstd::stream::write::Decoder::new(Writer::new()) {
                Ok(decoder) => Some(Self::Zstd(Box::new(decoder))),
                Err(_) => None,
            };
        }
        if encoding.eq_ignore_ascii_case("identity") {
            return Some(Self::Identity);
        }

        debug!(%encoding, "unknown content encoding, leaving body as is");
        None
    }

    pub(crate) fn code(&mut self, item: &[u8]) -> io::Result<Option<Bytes>> {
        match self {
            Self::Identity => Ok(Some(Bytes::copy_from_slice(item))),
            Self::Gz(decoder) => {
                decoder.write_all(item)?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            Self::De(decoder) => {
                decoder.write_all(item)?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            #[cfg(feature = "br")]
            Self::Br(decoder) => {
                decoder.write_all(item)?;
                decoder.flush()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            #[cfg(feature = "zstd")]
            Self::Zstd(decoder) => {
                decoder.write_all(item)?;
                decoder.flush()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
        }
    }

    pub(crate) fn code_eof(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            Self::Identity => Ok(None),
            Self::Gz(decoder) => {
                decoder.try_finish()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            Self::De(decoder) => {
                decoder.try_finish()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            #[cfg(feature = "br")]
            Self::Br(decoder) => {
                decoder.flush()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
            #[cfg(feature = "zstd")]
            Self::Zstd(decoder) => {
                decoder.flush()?;
                let b = decoder.get_mut().take();
                Ok((!b.is_empty()).then_some(b))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn gzip_round_trip() {
        let compressed = gzip(b"hello hello hello hello");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
        let mut decoder = ContentDecoder::from_headers(&headers).unwrap();

        let mut out = Vec::new();
        if let Some(b) = decoder.code(&compressed).unwrap() {
            out.extend_from_slice(&b);
        }
        if let Some(b) = decoder.code_eof().unwrap() {
            out.extend_from_slice(&b);
        }

        assert_eq!(out, b"hello hello hello hello");
    }

    #[test]
    fn unknown_coding_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, "lzma".parse().unwrap());
        assert!(ContentDecoder::from_headers(&headers).is_none());
    }

    #[test]
    fn absent_header_means_no_decoder() {
        assert!(ContentDecoder::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn accept_encoding_lists_builtin_codings() {
        assert!(accept_encoding().starts_with("gzip, deflate"));
    }
}
