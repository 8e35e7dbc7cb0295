use bytes::BytesMut;
use http::{
    header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, UPGRADE},
    Response, StatusCode, Version,
};
use httparse::{ParserConfig, Status};

use crate::response::ReasonPhrase;

use super::{
    codec::TransferCoding,
    error::{Parse, ProtoError},
    Context, MAX_HEADERS,
};

impl Context {
    /// try to decode one response head out of the read buffer. `Ok(None)`
    /// means the head is still incomplete.
    pub(crate) fn decode_head(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<(Response<()>, TransferCoding)>, ProtoError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers);

        let len = match ParserConfig::default()
            .allow_spaces_after_header_name_in_responses(true)
            .parse_response(&mut parsed, buf.as_ref())?
        {
            Status::Complete(len) => len,
            Status::Partial => return Ok(None),
        };

        let version = if parsed.version.ok_or(Parse::Version)? == 1 {
            Version::HTTP_11
        } else {
            Version::HTTP_10
        };
        self.set_version(version);

        let status = StatusCode::from_u16(parsed.code.ok_or(Parse::StatusCode)?)
            .map_err(|_| Parse::StatusCode)?;

        let mut decoder = TransferCoding::eof();
        let mut header_map = HeaderMap::with_capacity(parsed.headers.len());

        for header in parsed.headers.iter() {
            let name =
                HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| Parse::HeaderName)?;
            let value =
                HeaderValue::from_bytes(header.value).map_err(|_| Parse::HeaderValue)?;

            if name == TRANSFER_ENCODING {
                let chunked = value
                    .to_str()
                    .map_err(|_| Parse::HeaderValue)?
                    .rsplit(',')
                    .next()
                    .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false);

                if !chunked || version != Version::HTTP_11 {
                    return Err(Parse::HeaderName.into());
                }
                decoder.try_set(TransferCoding::decode_chunked())?;
            } else if name == CONTENT_LENGTH {
                let len = value
                    .to_str()
                    .map_err(|_| Parse::HeaderValue)?
                    .parse::<u64>()
                    .map_err(|_| Parse::HeaderValue)?;
                decoder.try_set(TransferCoding::length(len))?;
            } else if name == CONNECTION {
                self.set_ctype_from_header(&value);
            } else if name == UPGRADE && status == StatusCode::SWITCHING_PROTOCOLS {
                decoder.try_set(TransferCoding::Upgrade)?;
            }

            header_map.append(name, value);
        }

        // responses without framing headers are delimited by connection
        // close, unless the status forbids a body outright.
        if decoder.is_eof() && response_allows_body(status) && !self.is_head_method() {
            decoder = TransferCoding::CloseDelimited;
            self.set_close();
        }

        if self.is_head_method() {
            decoder = TransferCoding::eof();
        }

        let reason = parsed.reason.unwrap_or("");
        let reason_phrase = if !reason.is_empty() && Some(reason) != status.canonical_reason() {
            Some(ReasonPhrase::from(reason))
        } else {
            None
        };

        let _ = buf.split_to(len);

        let mut res = Response::new(());
        *res.status_mut() = status;
        *res.version_mut() = version;
        *res.headers_mut() = header_map;
        if let Some(reason_phrase) = reason_phrase {
            res.extensions_mut().insert(reason_phrase);
        }

        Ok(Some((res, decoder)))
    }
}

fn response_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(raw: &str) -> (Response<()>, TransferCoding) {
        let mut ctx = Context::new();
        let mut buf = BytesMut::from(raw);
        ctx.decode_head(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn sized_response() {
        let (res, decoder) = decode("HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nbody");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(decoder, TransferCoding::Length(4));
    }

    #[test]
    fn chunked_response() {
        let (_, decoder) = decode("HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");
        assert!(matches!(decoder, TransferCoding::DecodeChunked(..)));
    }

    #[test]
    fn partial_head() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\ncontent-le");
        assert!(ctx.decode_head(&mut buf).unwrap().is_none());
    }

    #[test]
    fn close_delimited_when_unframed() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\n\r\nrest");
        let (_, decoder) = ctx.decode_head(&mut buf).unwrap().unwrap();
        assert_eq!(decoder, TransferCoding::CloseDelimited);
        assert!(ctx.is_connection_closed());
    }

    #[test]
    fn no_content_has_no_body() {
        let (_, decoder) = decode("HTTP/1.1 204 No Content\r\n\r\n");
        assert_eq!(decoder, TransferCoding::Eof);
    }

    #[test]
    fn head_response_body_skipped() {
        let mut ctx = Context::new();
        ctx.set_head_method();
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n");
        let (_, decoder) = ctx.decode_head(&mut buf).unwrap().unwrap();
        assert_eq!(decoder, TransferCoding::Eof);
    }

    #[test]
    fn connection_close_header() {
        let mut ctx = Context::new();
        let mut buf =
            BytesMut::from("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        ctx.decode_head(&mut buf).unwrap().unwrap();
        assert!(ctx.is_connection_closed());
    }

    #[test]
    fn custom_reason_phrase_kept() {
        let (res, _) = decode("HTTP/1.1 200 Fine And Dandy\r\ncontent-length: 0\r\n\r\n");
        assert_eq!(
            res.extensions().get::<ReasonPhrase>().unwrap().as_str(),
            "Fine And Dandy"
        );
    }

    #[test]
    fn conflicting_framing_rejected() {
        let mut ctx = Context::new();
        let mut buf = BytesMut::from(
            "HTTP/1.1 200 OK\r\ncontent-length: 4\r\ntransfer-encoding: chunked\r\n\r\n",
        );
        assert!(ctx.decode_head(&mut buf).is_err());
    }
}
