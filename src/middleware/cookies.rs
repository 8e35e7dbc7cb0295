use http::header::COOKIE;

use crate::{
    error::Error,
    request::{InitiatorHost, RequestConfig},
    response::Response,
    service::{Service, ServiceRequest},
};

/// middleware attaching jar cookies to every outgoing hop and harvesting
/// `Set-Cookie` from every response, redirect hops included.
pub struct CookieStore<S> {
    service: S,
}

// marker: the cookie header currently on the request came from the jar.
#[derive(Clone, Copy)]
struct CookieManaged;

impl<S> CookieStore<S> {
    pub const fn new(service: S) -> Self {
        Self { service }
    }
}

impl<'r, 'c, S> Service<ServiceRequest<'r, 'c>> for CookieStore<S>
where
    S: for<'r2, 'c2> Service<ServiceRequest<'r2, 'c2>, Response = Response, Error = Error>
        + Send
        + Sync,
{
    type Response = Response;
    type Error = Error;

    async fn call(&self, req: ServiceRequest<'r, 'c>) -> Result<Self::Response, Self::Error> {
        let ServiceRequest {
            req,
            session,
            read_timeout,
        } = req;

        let url = req.uri().clone();

        let extra = req
            .extensions()
            .get::<RequestConfig>()
            .map(|c| c.cookies.clone())
            .unwrap_or_default();

        let initiator = req
            .extensions()
            .get::<InitiatorHost>()
            .map(|h| h.0.clone());

        // a cookie header written by the caller is left alone; one computed
        // here is recomputed (or dropped) on every redirect hop.
        let managed = req.extensions().get::<CookieManaged>().is_some()
            || !req.headers().contains_key(COOKIE);

        if managed {
            match session.cookies().header_for(&url, initiator.as_deref(), &extra) {
                Some(header) => {
                    req.headers_mut().insert(COOKIE, header);
                    req.extensions_mut().insert(CookieManaged);
                }
                None => {
                    req.headers_mut().remove(COOKIE);
                }
            }
        }

        let res = self
            .service
            .call(ServiceRequest {
                req,
                session,
                read_timeout,
            })
            .await?;

        session.cookies().update_from_response(&url, res.headers());

        Ok(res)
    }
}
