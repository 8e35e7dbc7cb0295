use core::{future::Future, pin::Pin, time::Duration};

use http::{header::PROXY_AUTHORIZATION, Request, Version};
use tokio::time::Instant;

use crate::{
    body::RequestBody,
    client::{ProxyRoute, Session},
    connection::ConnectionShared,
    error::{Error, TimeoutError},
    pool::{exclusive, shared},
    proxy::proxy_authorization,
    response::Response,
    timeout::Timeout,
    uri::{Origin, Scheme},
};

type BoxFuture<'f, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'f>>;

/// trait for composable http services. middleware, the resolver and the
/// dispatch core all speak it.
pub trait Service<Req> {
    type Response;
    type Error;

    fn call(&self, req: Req) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}

/// object safe mirror of [`Service`].
pub trait ServiceDyn<Req> {
    type Response;
    type Error;

    fn call<'s>(&'s self, req: Req) -> BoxFuture<'s, Self::Response, Self::Error>
    where
        Req: 's;
}

impl<S, Req> ServiceDyn<Req> for S
where
    S: Service<Req>,
{
    type Response = S::Response;
    type Error = S::Error;

    #[inline]
    fn call<'s>(&'s self, req: Req) -> BoxFuture<'s, Self::Response, Self::Error>
    where
        Req: 's,
    {
        Box::pin(Service::call(self, req))
    }
}

impl<I, Req> Service<Req> for Box<I>
where
    Req: Send,
    I: ServiceDyn<Req> + ?Sized + Send + Sync,
{
    type Response = I::Response;
    type Error = I::Error;

    #[inline]
    async fn call(&self, req: Req) -> Result<Self::Response, Self::Error> {
        ServiceDyn::call(&**self, req).await
    }
}

/// request as seen by middleware: the wire request plus the session it runs
/// on and the inactivity window for reads.
pub struct ServiceRequest<'r, 'c> {
    pub req: &'r mut Request<RequestBody>,
    pub session: &'c Session,
    pub read_timeout: Duration,
}

/// type alias for the object safe service stack a session dispatches into.
pub type HttpService = Box<
    dyn for<'r, 'c> ServiceDyn<ServiceRequest<'r, 'c>, Response = Response, Error = Error>
        + Send
        + Sync,
>;

/// marker: encode the request target in absolute form (cleartext request
/// forwarded through a proxy).
#[derive(Clone, Copy)]
pub(crate) struct AbsoluteForm;

pub(crate) fn base_service() -> HttpService {
    struct Dispatch;

    impl<'r, 'c> Service<ServiceRequest<'r, 'c>> for Dispatch {
        type Response = Response;
        type Error = Error;

        async fn call(&self, req: ServiceRequest<'r, 'c>) -> Result<Self::Response, Self::Error> {
            let ServiceRequest {
                req,
                session,
                read_timeout,
            } = req;

            let url = req.uri().clone();
            let origin = Origin::from_uri(&url)?;

            let proxy_uri = session
                .proxies()
                .select(origin.scheme, &origin.host)
                .cloned();

            let route = match proxy_uri {
                Some(ref proxy) => {
                    // credentials embedded in the proxy url override a hand
                    // written header.
                    let auth = proxy_authorization(proxy)
                        .or_else(|| req.headers().get(PROXY_AUTHORIZATION).cloned());

                    if matches!(origin.scheme, Scheme::Http) {
                        if let Some(ref auth) = auth {
                            req.headers_mut().insert(PROXY_AUTHORIZATION, auth.clone());
                        }
                        req.extensions_mut().insert(AbsoluteForm);
                    } else {
                        // for https the credential belongs to the CONNECT
                        // handshake, never to the origin server.
                        req.headers_mut().remove(PROXY_AUTHORIZATION);
                    }

                    Some(ProxyRoute { proxy, auth })
                }
                None => None,
            };

            // cleartext forwarded requests are pooled per proxy, everything
            // else per target origin.
            let exclusive_key = match route {
                Some(ref route) if matches!(origin.scheme, Scheme::Http) => {
                    Origin::from_uri(route.proxy)?
                }
                _ => origin.clone(),
            };

            // version negotiation state. alpn and alt-svc may move it in
            // both directions while connections are made.
            let mut version = req.version();

            // cleartext http has no alpn to negotiate h2 on.
            if matches!(origin.scheme, Scheme::Http) {
                version = Version::HTTP_11;
            }

            #[cfg(not(feature = "http3"))]
            if version == Version::HTTP_3 {
                version = Version::HTTP_2;
            }

            // alt-svc upgrade offer, only meaningful for direct https.
            #[cfg(feature = "http3")]
            let mut alt_svc = if route.is_none()
                && origin.is_https()
                && version != Version::HTTP_11
                && session.h3_enabled()
            {
                session.alt_svc_cache().get(&origin)
            } else {
                None
            };

            #[cfg(feature = "http3")]
            if alt_svc.is_some() && session.h3_enabled() {
                version = Version::HTTP_3;
            }

            #[cfg(feature = "http3")]
            if version == Version::HTTP_3 && (!session.h3_enabled() || route.is_some()) {
                version = Version::HTTP_2;
            }

            loop {
                match version {
                    #[cfg(feature = "http3")]
                    Version::HTTP_3 => match session.shared_pool().acquire(origin.clone()).await {
                        shared::AcquireOutput::Conn(mut conn) => {
                            let ConnectionShared::H3(ref mut h3) = conn.conn else {
                                // the pooled connection is h2; use it as such.
                                drop(conn);
                                version = Version::HTTP_2;
                                continue;
                            };

                            *req.version_mut() = Version::HTTP_3;
                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            return match crate::h3::proto::send(h3, take_request(req))
                                .timeout(timer.as_mut())
                                .await
                            {
                                Ok(Ok(res)) => {
                                    session.alt_svc_cache().update(&origin, res.headers());
                                    Ok(Response::new(res, url, Version::HTTP_3, read_timeout))
                                }
                                Ok(Err(e)) => {
                                    conn.destroy_on_drop();
                                    Err(e)
                                }
                                Err(_) => {
                                    conn.destroy_on_drop();
                                    Err(TimeoutError::Request.into())
                                }
                            };
                        }
                        shared::AcquireOutput::Spawner(spawner) => {
                            let target = alt_svc.take();
                            let (host, port) = match target {
                                Some(ref alt) => (&*alt.host, alt.port),
                                None => (&*origin.host, origin.port),
                            };

                            let mut connect =
                                crate::connect::Connect::new(host, port).with_tls_name(&*origin.host);

                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            match session
                                .make_h3(&mut connect)
                                .timeout(timer.as_mut())
                                .await
                                .map_err(|_| Error::from(TimeoutError::Connect))
                                .and_then(|res| res)
                            {
                                Ok(conn) => spawner.spawned(conn.into()),
                                Err(e) => {
                                    // quic failed before any response byte:
                                    // retry over tcp per the fallback policy.
                                    tracing::debug!(origin = %origin, error = %e, "h3 connect failed, downgrading");
                                    session.alt_svc_cache().invalidate(&origin);
                                    version = Version::HTTP_2;
                                }
                            }
                        }
                    },
                    Version::HTTP_2 => match session.shared_pool().acquire(origin.clone()).await {
                        shared::AcquireOutput::Conn(mut conn) => {
                            #[cfg(feature = "http3")]
                            let ConnectionShared::H2(ref mut h2) = conn.conn else {
                                // pooled h3 connection; switch to it.
                                drop(conn);
                                version = Version::HTTP_3;
                                continue;
                            };
                            #[cfg(not(feature = "http3"))]
                            let ConnectionShared::H2(ref mut h2) = conn.conn;

                            *req.version_mut() = Version::HTTP_2;
                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            return match crate::h2::proto::send(h2, take_request(req))
                                .timeout(timer.as_mut())
                                .await
                            {
                                Ok(Ok(res)) => {
                                    if origin.is_https() {
                                        session.alt_svc_cache().update(&origin, res.headers());
                                    }
                                    Ok(Response::new(res, url, Version::HTTP_2, read_timeout))
                                }
                                Ok(Err(e)) => {
                                    conn.destroy_on_drop();
                                    Err(e)
                                }
                                Err(_) => {
                                    conn.destroy_on_drop();
                                    Err(TimeoutError::Request.into())
                                }
                            };
                        }
                        shared::AcquireOutput::Spawner(spawner) => {
                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            let (conn, alpn_version) = session
                                .make_exclusive(&origin, route.as_ref())
                                .timeout(timer.as_mut())
                                .await
                                .map_err(|_| TimeoutError::Connect)??;

                            if alpn_version == Version::HTTP_2 {
                                let conn = crate::h2::proto::handshake(conn).await?;
                                spawner.spawned(conn.into());
                            } else {
                                // alpn picked http/1.1; park the socket in the
                                // exclusive pool and downgrade the request.
                                drop(spawner);
                                session.exclusive_pool().try_add(exclusive_key.clone(), conn);
                                version = alpn_version;
                            }
                        }
                    },
                    _ => match session.exclusive_pool().acquire(exclusive_key.clone()).await {
                        exclusive::AcquireOutput::Conn(mut conn) => {
                            *req.version_mut() = Version::HTTP_11;

                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            let res = crate::h1::proto::send(&mut *conn, req)
                                .timeout(timer.as_mut())
                                .await;

                            return match res {
                                Ok(Ok((res, buf, decoder, is_close))) => {
                                    if is_close {
                                        conn.destroy_on_drop();
                                    } else {
                                        let (timeout, max) = parse_keep_alive(res.headers());
                                        conn.keep_alive_hint(timeout, max);
                                    }

                                    if origin.is_https() {
                                        session.alt_svc_cache().update(&origin, res.headers());
                                    }

                                    let body =
                                        crate::h1::body::ResponseBody::new(conn, buf, decoder);
                                    let res = res.map(|_| crate::body::ResponseBody::h1(body));
                                    Ok(Response::new(res, url, Version::HTTP_11, read_timeout))
                                }
                                Ok(Err(e)) => {
                                    conn.destroy_on_drop();
                                    Err(e.into())
                                }
                                Err(_) => {
                                    conn.destroy_on_drop();
                                    Err(TimeoutError::Request.into())
                                }
                            };
                        }
                        exclusive::AcquireOutput::Spawner(spawner) => {
                            let mut timer = Box::pin(tokio::time::sleep(read_timeout));
                            let (conn, alpn_version) = session
                                .make_exclusive(&origin, route.as_ref())
                                .timeout(timer.as_mut())
                                .await
                                .map_err(|_| TimeoutError::Connect)??;

                            if alpn_version == Version::HTTP_2 {
                                // the server insists on h2; promote the fresh
                                // connection into the shared pool instead.
                                drop(spawner);
                                let conn = crate::h2::proto::handshake(conn).await?;
                                if let shared::AcquireOutput::Spawner(s) =
                                    session.shared_pool().acquire(origin.clone()).await
                                {
                                    s.spawned(conn.into());
                                }
                                version = Version::HTTP_2;
                            } else {
                                spawner.spawned(conn);
                            }
                        }
                    },
                }
            }
        }
    }

    Box::new(Dispatch)
}

// shared-connection drivers consume their request. the head is cloned so the
// caller (the redirect middleware in particular) keeps a usable request; the
// body moves out and is restored per hop by whoever replays it.
fn take_request(req: &mut Request<RequestBody>) -> Request<RequestBody> {
    let mut out = Request::new(core::mem::take(req.body_mut()));
    *out.method_mut() = req.method().clone();
    *out.uri_mut() = req.uri().clone();
    *out.version_mut() = req.version();
    *out.headers_mut() = req.headers().clone();
    out
}

/// `Keep-Alive: timeout=N, max=M` response header hints.
pub(crate) fn parse_keep_alive(headers: &http::HeaderMap) -> (Option<Duration>, Option<usize>) {
    let header = match headers.get("keep-alive").map(|h| h.to_str()) {
        Some(Ok(header)) => header,
        _ => return (None, None),
    };

    let mut timeout = None;
    let mut max = None;

    for (key, value) in header.split(',').map(|item| {
        let mut kv = item.splitn(2, '=');
        (
            kv.next().map(str::trim).unwrap_or_default(),
            kv.next().map(str::trim).unwrap_or_default(),
        )
    }) {
        if key.eq_ignore_ascii_case("timeout") {
            timeout = value.parse::<u64>().ok().map(Duration::from_secs);
        } else if key.eq_ignore_ascii_case("max") {
            max = value.parse().ok();
        }
    }

    (timeout, max)
}

/// reset a phase timer relative to now.
pub(crate) fn reset_timer(timer: &mut Pin<Box<tokio::time::Sleep>>, after: Duration) {
    timer.as_mut().reset(Instant::now() + after);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keep_alive_hints() {
        let mut headers = http::HeaderMap::new();
        headers.insert("keep-alive", "timeout=100, max=10".parse().unwrap());

        let (timeout, max) = parse_keep_alive(&headers);
        assert_eq!(timeout, Some(Duration::from_secs(100)));
        assert_eq!(max, Some(10));
    }

    #[test]
    fn keep_alive_absent() {
        let headers = http::HeaderMap::new();
        assert_eq!(parse_keep_alive(&headers), (None, None));
    }
}
