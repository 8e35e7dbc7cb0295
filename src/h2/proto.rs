use std::cmp;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{
    header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, UPGRADE},
    Method, Request, Response, Version,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{
    body::{BodySize, RequestBody, ResponseBody},
    error::Error,
    headers::header_value_from_u64,
};

use super::Connection;

pub(crate) async fn send(
    conn: &mut Connection,
    req: Request<RequestBody>,
) -> Result<Response<ResponseBody>, Error> {
    let (parts, body) = req.into_parts();
    let mut req = Request::from_parts(parts, ());

    *req.version_mut() = Version::HTTP_2;

    let is_eof = match body.size() {
        BodySize::None => {
            req.headers_mut().remove(CONTENT_LENGTH);
            true
        }
        BodySize::Stream => {
            req.headers_mut().remove(CONTENT_LENGTH);
            false
        }
        BodySize::Sized(len) => {
            req.headers_mut()
                .insert(CONTENT_LENGTH, header_value_from_u64(len));
            len == 0
        }
    };

    // http/1 connection-scoped headers must not travel on h2. host moves
    // into the :authority pseudo header and some servers reject it as a
    // regular header outright.
    req.headers_mut().remove(CONNECTION);
    req.headers_mut().remove(TRANSFER_ENCODING);
    req.headers_mut().remove(UPGRADE);
    req.headers_mut().remove(HOST);

    let is_head_method = *req.method() == Method::HEAD;

    // wait for a stream slot within the peer's concurrency window.
    let mut tx = conn.tx.clone().ready().await?;

    let (fut, mut stream) = tx.send_request(req, is_eof)?;

    if !is_eof {
        let mut body = Box::pin(body);

        while let Some(res) = body.next().await {
            let mut chunk = res.map_err(Error::Body)?;

            while !chunk.is_empty() {
                let len = chunk.len();

                stream.reserve_capacity(len);

                let cap = futures_util::future::poll_fn(|cx| stream.poll_capacity(cx))
                    .await
                    .ok_or_else(|| {
                        debug!("http/2 stream dropped while waiting for send capacity");
                        Error::H2(::h2::Reason::CANCEL.into())
                    })??;

                // split the chunk to what the flow control window admits.
                let bytes = chunk.split_to(cmp::min(cap, len));
                stream.send_data(bytes, false)?;
            }
        }

        stream.send_data(Bytes::new(), true)?;
    }

    let res = fut.await?;

    let res = if is_head_method {
        res.map(|_| ResponseBody::eof())
    } else {
        res.map(|body| ResponseBody::h2(super::body::ResponseBody::new(body)))
    };

    Ok(res)
}

pub(crate) async fn handshake<S>(io: S) -> Result<Connection, Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, conn) = ::h2::client::Builder::new()
        .enable_push(false)
        .handshake(io)
        .await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "http/2 connection task ended");
        }
    });

    Ok(Connection { tx })
}
