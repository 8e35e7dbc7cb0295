use http::header::{HeaderValue, ACCEPT_ENCODING};

use crate::{
    error::Error,
    response::Response,
    service::{Service, ServiceRequest},
};

use super::coding::accept_encoding;

/// middleware advertising the compiled-in codings and transparently
/// decompressing response bodies.
pub struct Decompress<S> {
    service: S,
}

impl<S> Decompress<S> {
    pub const fn new(service: S) -> Self {
        Self { service }
    }
}

impl<'r, 'c, S> Service<ServiceRequest<'r, 'c>> for Decompress<S>
where
    S: for<'r2, 'c2> Service<ServiceRequest<'r2, 'c2>, Response = Response, Error = Error>
        + Send
        + Sync,
{
    type Response = Response;
    type Error = Error;

    async fn call(&self, req: ServiceRequest<'r, 'c>) -> Result<Self::Response, Self::Error> {
        req.req
            .headers_mut()
            .entry(ACCEPT_ENCODING)
            .or_insert_with(|| HeaderValue::from_static(accept_encoding()));

        let mut res = self.service.call(req).await?;
        res.apply_decoder();
        Ok(res)
    }
}
