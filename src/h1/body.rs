use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures_core::stream::Stream;
use tokio_util::io::poll_read_buf;

use crate::{body::BodyError, connection::H1Connection};

use super::proto::codec::TransferCoding;

/// lazy http/1 response body. reading it drives the pooled connection the
/// exchange ran on; reaching end of body makes that connection reusable
/// again, while dropping the body early destroys it.
pub struct ResponseBody {
    conn: Option<H1Connection>,
    buf: BytesMut,
    decoder: TransferCoding,
    eof: bool,
}

impl ResponseBody {
    pub(crate) fn new(conn: H1Connection, buf: BytesMut, decoder: TransferCoding) -> Self {
        let eof = matches!(decoder, TransferCoding::Eof);
        Self {
            conn: Some(conn),
            buf,
            decoder,
            eof,
        }
    }

    pub(crate) fn conn(&mut self) -> &mut H1Connection {
        self.conn
            .as_mut()
            .expect("connection is only taken in Drop")
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if !self.eof {
                // half read connection, the pool cannot reuse it safely.
                conn.destroy_on_drop();
            }
        }
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.eof {
            return Poll::Ready(None);
        }

        loop {
            match this.decoder.decode(&mut this.buf) {
                Ok(Some(bytes)) if bytes.is_empty() => {
                    this.eof = true;
                    return Poll::Ready(None);
                }
                Ok(Some(bytes)) => return Poll::Ready(Some(Ok(bytes))),
                Ok(None) => {
                    let conn = this.conn.as_mut().expect("connection is only taken in Drop");
                    let n = match ready!(poll_read_buf(Pin::new(&mut **conn), cx, &mut this.buf)) {
                        Ok(n) => n,
                        Err(e) => return Poll::Ready(Some(Err(e.into()))),
                    };

                    if n == 0 {
                        return if matches!(this.decoder, TransferCoding::CloseDelimited) {
                            // close delimits the body, this is regular eof.
                            this.eof = true;
                            Poll::Ready(None)
                        } else {
                            Poll::Ready(Some(Err(io::Error::from(io::ErrorKind::UnexpectedEof)
                                .into())))
                        };
                    }
                }
                Err(e) => return Poll::Ready(Some(Err(e.into()))),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eof_decoder_is_immediately_done() {
        // a body constructed with an eof decoder must not touch the socket;
        // verified indirectly through the coding state.
        assert!(TransferCoding::eof().is_eof());
    }
}
