use std::{cmp, io, mem};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use super::error::{Parse, ProtoError};

/// coder for the transfer encodings a message body can travel in.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransferCoding {
    /// body delimited by a content-length value.
    Length(u64),

    /// decoder for `Transfer-Encoding: chunked`.
    DecodeChunked(ChunkedState, u64),

    /// encoder emitting chunked framing.
    EncodeChunked,

    /// response body delimited by connection close. illegal for requests.
    CloseDelimited,

    /// no body at all.
    Eof,

    /// pass-through coding after a successful upgrade. the connection is
    /// handed to the caller as-is.
    Upgrade,
}

impl TransferCoding {
    pub(crate) const fn eof() -> Self {
        Self::Eof
    }

    pub(crate) fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    pub(crate) const fn length(len: u64) -> Self {
        Self::Length(len)
    }

    pub(crate) const fn decode_chunked() -> Self {
        Self::DecodeChunked(ChunkedState::Size, 0)
    }

    pub(crate) const fn encode_chunked() -> Self {
        Self::EncodeChunked
    }

    /// framing headers may appear once. conflicting or repeated framing is a
    /// protocol error.
    pub(crate) fn try_set(&mut self, other: Self) -> Result<(), ProtoError> {
        match (&self, &other) {
            (Self::Upgrade, Self::Upgrade) => Ok(()),
            (Self::Upgrade, _)
            | (Self::DecodeChunked(..), _)
            | (Self::Length(..), _)
            | (Self::EncodeChunked, _) => Err(ProtoError::Parse(Parse::HeaderName)),
            _ => {
                *self = other;
                Ok(())
            }
        }
    }

    /// encode a request body chunk into the write buffer.
    pub(crate) fn encode(&mut self, mut bytes: Bytes, buf: &mut BytesMut) {
        if bytes.is_empty() {
            return;
        }

        match *self {
            Self::Upgrade => buf.extend_from_slice(&bytes),
            Self::EncodeChunked => {
                let size = format!("{:x}", bytes.len());
                buf.reserve(size.len() + bytes.len() + 4);
                buf.put_slice(size.as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(&bytes);
                buf.put_slice(b"\r\n");
            }
            Self::Length(ref mut remaining) => {
                if *remaining > 0 {
                    let len = cmp::min(*remaining, bytes.len() as u64);
                    buf.extend_from_slice(&bytes.split_to(len as usize));
                    *remaining -= len;
                }
            }
            Self::Eof => warn!("TransferCoding::Eof should not encode a request body"),
            _ => unreachable!("decoder variant used for encoding"),
        }
    }

    pub(crate) fn encode_eof(&mut self, buf: &mut BytesMut) {
        match *self {
            Self::Eof | Self::Upgrade | Self::Length(0) => {}
            Self::EncodeChunked => buf.extend_from_slice(b"0\r\n\r\n"),
            Self::Length(n) => unreachable!("request body ended {n} bytes short of content-length"),
            _ => unreachable!("decoder variant used for encoding"),
        }
    }

    /// decode body bytes out of the read buffer.
    ///
    /// `Ok(Some(bytes))` with an empty value signals end of body. `Ok(None)`
    /// means more socket data is needed.
    pub(crate) fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Bytes>> {
        match *self {
            Self::Length(0) => Ok(Some(Bytes::new())),
            Self::Length(ref mut remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let len = src.len() as u64;
                let buf = if *remaining > len {
                    *remaining -= len;
                    src.split().freeze()
                } else {
                    let mut split = 0;
                    mem::swap(remaining, &mut split);
                    src.split_to(split as usize).freeze()
                };
                Ok(Some(buf))
            }
            Self::DecodeChunked(ref mut state, ref mut size) => loop {
                let mut buf = None;
                *state = match state.step(src, size, &mut buf)? {
                    Some(state) => state,
                    None => return Ok(None),
                };

                if matches!(state, ChunkedState::End) {
                    return Ok(Some(Bytes::new()));
                }

                if let Some(buf) = buf {
                    return Ok(Some(buf));
                }
            },
            Self::CloseDelimited | Self::Upgrade => {
                if src.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(src.split().freeze()))
                }
            }
            Self::Eof => Ok(Some(Bytes::new())),
            Self::EncodeChunked => unreachable!("encoder variant used for decoding"),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

macro_rules! byte (
    ($rdr:ident) => ({
        if !$rdr.is_empty() {
            let b = $rdr[0];
            $rdr.advance(1);
            b
        } else {
            return Ok(None);
        }
    })
);

impl ChunkedState {
    fn step(
        &self,
        body: &mut BytesMut,
        size: &mut u64,
        buf: &mut Option<Bytes>,
    ) -> io::Result<Option<ChunkedState>> {
        use self::ChunkedState::*;
        match *self {
            Size => ChunkedState::read_size(body, size),
            SizeLws => ChunkedState::read_size_lws(body),
            Extension => ChunkedState::read_extension(body),
            SizeLf => ChunkedState::read_size_lf(body, size),
            Body => ChunkedState::read_body(body, size, buf),
            BodyCr => ChunkedState::read_body_cr(body),
            BodyLf => ChunkedState::read_body_lf(body),
            Trailer => ChunkedState::read_trailer(body),
            TrailerLf => ChunkedState::read_trailer_lf(body),
            EndCr => ChunkedState::read_end_cr(body),
            EndLf => ChunkedState::read_end_lf(body),
            End => Ok(Some(ChunkedState::End)),
        }
    }

    fn read_size(rdr: &mut BytesMut, size: &mut u64) -> io::Result<Option<ChunkedState>> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(val) => val,
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "invalid chunk size: overflow",
                        ))
                    }
                }
            };
        }

        let radix = 16;
        match byte!(rdr) {
            b @ b'0'..=b'9' => {
                *size = or_overflow!(size.checked_mul(radix));
                *size = or_overflow!(size.checked_add((b - b'0') as u64));
            }
            b @ b'a'..=b'f' => {
                *size = or_overflow!(size.checked_mul(radix));
                *size = or_overflow!(size.checked_add((b + 10 - b'a') as u64));
            }
            b @ b'A'..=b'F' => {
                *size = or_overflow!(size.checked_mul(radix));
                *size = or_overflow!(size.checked_add((b + 10 - b'A') as u64));
            }
            b'\t' | b' ' => return Ok(Some(ChunkedState::SizeLws)),
            b';' => return Ok(Some(ChunkedState::Extension)),
            b'\r' => return Ok(Some(ChunkedState::SizeLf)),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid chunk size line",
                ));
            }
        }

        Ok(Some(ChunkedState::Size))
    }

    fn read_size_lws(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            // lws may follow the chunk size, but no more digits can come.
            b'\t' | b' ' => Ok(Some(ChunkedState::SizeLws)),
            b';' => Ok(Some(ChunkedState::Extension)),
            b'\r' => Ok(Some(ChunkedState::SizeLf)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid chunk size linear white space",
            )),
        }
    }

    fn read_extension(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\r' => Ok(Some(ChunkedState::SizeLf)),
            b'\n' => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "chunk extension contains newline",
            )),
            // no extensions are supported, skip them.
            _ => Ok(Some(ChunkedState::Extension)),
        }
    }

    fn read_size_lf(rdr: &mut BytesMut, size: &mut u64) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\n' if *size > 0 => Ok(Some(ChunkedState::Body)),
            b'\n' => Ok(Some(ChunkedState::EndCr)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid chunk size LF",
            )),
        }
    }

    fn read_body(
        rdr: &mut BytesMut,
        rem: &mut u64,
        buf: &mut Option<Bytes>,
    ) -> io::Result<Option<ChunkedState>> {
        let len = rdr.len() as u64;
        if len == 0 {
            return Ok(None);
        }

        let slice;
        if *rem > len {
            slice = rdr.split().freeze();
            *rem -= len;
        } else {
            slice = rdr.split_to(*rem as usize).freeze();
            *rem = 0;
        }
        *buf = Some(slice);

        if *rem > 0 {
            Ok(Some(ChunkedState::Body))
        } else {
            Ok(Some(ChunkedState::BodyCr))
        }
    }

    fn read_body_cr(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\r' => Ok(Some(ChunkedState::BodyLf)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid chunk body CR",
            )),
        }
    }

    fn read_body_lf(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\n' => Ok(Some(ChunkedState::Size)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid chunk body LF",
            )),
        }
    }

    fn read_trailer(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\r' => Ok(Some(ChunkedState::TrailerLf)),
            _ => Ok(Some(ChunkedState::Trailer)),
        }
    }

    fn read_trailer_lf(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\n' => Ok(Some(ChunkedState::EndCr)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid trailer end LF",
            )),
        }
    }

    fn read_end_cr(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\r' => Ok(Some(ChunkedState::EndLf)),
            _ => Ok(Some(ChunkedState::Trailer)),
        }
    }

    fn read_end_lf(rdr: &mut BytesMut) -> io::Result<Option<ChunkedState>> {
        match byte!(rdr) {
            b'\n' => Ok(Some(ChunkedState::End)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid chunk end LF",
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_chunk_size() {
        fn read(s: &str) -> u64 {
            let mut state = ChunkedState::Size;
            let rdr = &mut BytesMut::from(s);
            let mut size = 0;
            loop {
                let result = state.step(rdr, &mut size, &mut None);
                state = result
                    .unwrap_or_else(|_| panic!("read_size failed for {s:?}"))
                    .unwrap();
                if state == ChunkedState::Body || state == ChunkedState::EndCr {
                    break;
                }
            }
            size
        }

        fn read_err(s: &str, expected: io::ErrorKind) {
            let mut state = ChunkedState::Size;
            let rdr = &mut BytesMut::from(s);
            let mut size = 0;
            loop {
                match state.step(rdr, &mut size, &mut None) {
                    Ok(Some(next)) => state = next,
                    Ok(None) => panic!("expected error for {s:?}, ran out of input"),
                    Err(e) => {
                        assert_eq!(expected, e.kind(), "reading {s:?}");
                        return;
                    }
                }
                if state == ChunkedState::Body || state == ChunkedState::End {
                    panic!("expected error for {s:?}");
                }
            }
        }

        assert_eq!(1, read("1\r\n"));
        assert_eq!(1, read("01\r\n"));
        assert_eq!(0, read("0\r\n"));
        assert_eq!(10, read("A\r\n"));
        assert_eq!(255, read("Ff\r\n"));
        assert_eq!(255, read("Ff   \r\n"));
        assert_eq!(1, read("1;extension\r\n"));
        assert_eq!(3, read("3   ; extension=123\r\n"));

        read_err("F\rF", io::ErrorKind::InvalidInput);
        read_err("X\r\n", io::ErrorKind::InvalidInput);
        read_err("-1\r\n", io::ErrorKind::InvalidInput);
        read_err("1 invalid extension\r\n", io::ErrorKind::InvalidInput);
        read_err("1;reject\nnewlines\r\n", io::ErrorKind::InvalidData);
        read_err("f0000000000000003\r\n", io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_chunked_single_read() {
        let buf = &mut BytesMut::from("10\r\n1234567890abcdef\r\n0\r\n");
        let chunk = TransferCoding::decode_chunked().decode(buf).unwrap().unwrap();
        assert_eq!(chunk.as_ref(), b"1234567890abcdef");
    }

    #[test]
    fn read_chunked_after_eof() {
        let buf = &mut BytesMut::from("10\r\n1234567890abcdef\r\n0\r\n\r\n");
        let mut decoder = TransferCoding::decode_chunked();

        let chunk = decoder.decode(buf).unwrap().unwrap();
        assert_eq!(chunk.len(), 16);

        // eof sentinel, repeatable.
        assert!(decoder.decode(buf).unwrap().unwrap().is_empty());
        assert!(decoder.decode(buf).unwrap().unwrap().is_empty());
    }

    #[test]
    fn read_chunked_trailer_with_missing_lf() {
        let buf = &mut BytesMut::from("10\r\n1234567890abcdef\r\n0\r\nbad\r\r\n");
        let mut decoder = TransferCoding::decode_chunked();
        decoder.decode(buf).unwrap().unwrap();
        let e = decoder.decode(buf).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn length_decode_across_reads() {
        let mut decoder = TransferCoding::length(6);

        let buf = &mut BytesMut::from("foo");
        assert_eq!(decoder.decode(buf).unwrap().unwrap().as_ref(), b"foo");
        assert!(decoder.decode(buf).unwrap().is_none());

        buf.extend_from_slice(b"bar");
        assert_eq!(decoder.decode(buf).unwrap().unwrap().as_ref(), b"bar");
        assert!(decoder.decode(buf).unwrap().unwrap().is_empty());
    }

    #[test]
    fn encode_chunked() {
        let mut encoder = TransferCoding::encode_chunked();
        let dst = &mut BytesMut::new();

        encoder.encode(Bytes::from("foo bar"), dst);
        assert_eq!(&dst[..], b"7\r\nfoo bar\r\n");

        encoder.encode(Bytes::from("baz quux herp"), dst);
        assert_eq!(&dst[..], b"7\r\nfoo bar\r\nd\r\nbaz quux herp\r\n");

        encoder.encode_eof(dst);
        assert_eq!(&dst[..], b"7\r\nfoo bar\r\nd\r\nbaz quux herp\r\n0\r\n\r\n");
    }

    #[test]
    fn encode_length_is_capped() {
        let mut encoder = TransferCoding::length(8);
        let dst = &mut BytesMut::new();

        encoder.encode(Bytes::from("foo bar"), dst);
        assert_eq!(&dst[..], b"foo bar");

        for _ in 0..8 {
            encoder.encode(Bytes::from("baz"), dst);
            assert_eq!(dst.len(), 8);
            assert_eq!(&dst[..], b"foo barb");
        }

        encoder.encode_eof(dst);
        assert_eq!(dst.len(), 8);
    }

    #[test]
    fn conflicting_framing_rejected() {
        let mut coding = TransferCoding::eof();
        coding.try_set(TransferCoding::length(4)).unwrap();
        assert!(coding.try_set(TransferCoding::decode_chunked()).is_err());
    }

    #[test]
    fn close_delimited_passthrough() {
        let mut decoder = TransferCoding::CloseDelimited;
        let buf = &mut BytesMut::from("everything until close");
        assert_eq!(
            decoder.decode(buf).unwrap().unwrap().as_ref(),
            b"everything until close"
        );
        assert!(decoder.decode(buf).unwrap().is_none());
    }
}
