use core::net::SocketAddr;

use bytes::{Buf, Bytes};
use futures_util::{future::poll_fn, StreamExt};
use http::{
    header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, UPGRADE},
    Method, Request, Response, Version,
};
use quinn::Endpoint;
use tracing::debug;

use crate::{
    body::{BodySize, RequestBody, ResponseBody},
    headers::header_value_from_u64,
};

use super::{Connection, Error};

pub(crate) async fn send(
    conn: &mut Connection,
    req: Request<RequestBody>,
) -> Result<Response<ResponseBody>, crate::error::Error> {
    let (parts, body) = req.into_parts();
    let mut req = Request::from_parts(parts, ());

    *req.version_mut() = Version::HTTP_3;

    let is_eof = match body.size() {
        BodySize::None | BodySize::Stream => {
            req.headers_mut().remove(CONTENT_LENGTH);
            matches!(body.size(), BodySize::None)
        }
        BodySize::Sized(len) => {
            req.headers_mut()
                .insert(CONTENT_LENGTH, header_value_from_u64(len));
            len == 0
        }
    };

    // connection scoped headers do not exist on h3; authority rides in the
    // pseudo headers.
    req.headers_mut().remove(CONNECTION);
    req.headers_mut().remove(TRANSFER_ENCODING);
    req.headers_mut().remove(UPGRADE);
    req.headers_mut().remove(HOST);

    let is_head_method = *req.method() == Method::HEAD;

    let mut stream = conn.send_request(req).await.map_err(Error::from)?;

    if !is_eof {
        let mut body = Box::pin(body);
        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(crate::error::Error::Body)?;
            stream.send_data(bytes).await.map_err(Error::from)?;
        }
    }

    stream.finish().await.map_err(Error::from)?;

    let res = stream.recv_response().await.map_err(Error::from)?;

    let res = if is_head_method {
        res.map(|_| ResponseBody::eof())
    } else {
        let body = async_stream::stream! {
            loop {
                match stream.recv_data().await {
                    Ok(Some(mut buf)) => {
                        let len = buf.remaining();
                        yield Ok(buf.copy_to_bytes(len));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Box::new(e) as crate::body::BodyError);
                        break;
                    }
                }
            }
        };
        res.map(|_| ResponseBody::h3(super::body::ResponseBody(Box::pin(body))))
    };

    Ok(res)
}

/// open a quic connection and run the h3 handshake. every resolved address
/// is tried in order before the dial is reported failed.
pub(crate) async fn connect<I>(
    endpoint: &Endpoint,
    addrs: I,
    server_name: &str,
) -> Result<Connection, Error>
where
    I: IntoIterator<Item = SocketAddr>,
{
    let mut last_err = None;

    for addr in addrs {
        match connect_one(endpoint, addr, server_name).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!(%addr, "quic connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or(Error::Connect(quinn::ConnectError::EndpointStopping)))
}

async fn connect_one(
    endpoint: &Endpoint,
    addr: SocketAddr,
    server_name: &str,
) -> Result<Connection, Error> {
    let conn = endpoint.connect(addr, server_name)?.await?;

    let (mut driver, tx) = h3::client::new(h3_quinn::Connection::new(conn)).await?;

    tokio::spawn(async move {
        if let Err(e) = poll_fn(|cx| driver.poll_close(cx)).await {
            debug!(error = ?e, "http/3 connection task ended");
        }
    });

    Ok(tx)
}
