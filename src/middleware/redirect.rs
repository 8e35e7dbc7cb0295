use bytes::Bytes;
use http::{
    header::{
        AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION,
        PROXY_AUTHORIZATION, TRANSFER_ENCODING,
    },
    Method, StatusCode,
};
use tracing::debug;

use crate::{
    body::RequestBody,
    error::Error,
    request::{InitiatorHost, RequestConfig},
    response::Response,
    service::{Service, ServiceRequest},
    uri::resolve_location,
};

/// how redirect responses are followed.
#[derive(Debug, Clone, Copy)]
pub struct RedirectPolicy {
    /// longest chain before [`Error::TooManyRedirects`].
    pub max_redirects: usize,
    /// keep the original method on 301/302 for non-GET/HEAD requests.
    /// clients disagree here; preserving is the documented default.
    pub preserve_method: bool,
    /// follow redirects for HEAD requests. off by default.
    pub follow_for_head: bool,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            max_redirects: 30,
            preserve_method: true,
            follow_for_head: false,
        }
    }
}

/// middleware following redirect chains with credential scrubbing and
/// history recording.
pub struct FollowRedirect<S> {
    service: S,
    policy: RedirectPolicy,
}

impl<S> FollowRedirect<S> {
    pub const fn new(service: S) -> Self {
        Self {
            service,
            policy: RedirectPolicy {
                max_redirects: 30,
                preserve_method: true,
                follow_for_head: false,
            },
        }
    }

    pub const fn with_policy(service: S, policy: RedirectPolicy) -> Self {
        Self { service, policy }
    }
}

impl<'r, 'c, S> Service<ServiceRequest<'r, 'c>> for FollowRedirect<S>
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

        let follow = req
            .extensions()
            .get::<RequestConfig>()
            .and_then(|c| c.allow_redirects)
            .unwrap_or_else(|| *req.method() != Method::HEAD || self.policy.follow_for_head);

        // the first hop's host anchors same-site cookie decisions for the
        // whole chain.
        if let Some(host) = req.uri().host().map(|h| h.to_owned()) {
            req.extensions_mut().insert(InitiatorHost(host));
        }

        // a buffered body can be replayed on 307/308; a streaming one can
        // not and is sent at most once.
        let replay = match req.body() {
            RequestBody::None => Some(Bytes::new()),
            RequestBody::Once(bytes) => Some(bytes.clone()),
            RequestBody::Stream(_) => None,
        };

        let mut history: Vec<Response> = Vec::new();

        loop {
            let mut res = self
                .service
                .call(ServiceRequest {
                    req: &mut *req,
                    session,
                    read_timeout,
                })
                .await?;

            if !follow {
                res.set_history(history);
                return Ok(res);
            }

            let rewrite_to_get = match res.status() {
                StatusCode::SEE_OTHER => *req.method() != Method::HEAD,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
                    !self.policy.preserve_method
                        && *req.method() != Method::GET
                        && *req.method() != Method::HEAD
                }
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => false,
                _ => {
                    res.set_history(history);
                    return Ok(res);
                }
            };

            let Some(location) = res.headers().get(LOCATION).cloned() else {
                res.set_history(history);
                return Ok(res);
            };

            if history.len() >= self.policy.max_redirects {
                return Err(Error::TooManyRedirects);
            }

            let location = location.to_str().map_err(|_| Error::InvalidHeader)?;
            let next = resolve_location(res.url(), location)?;

            debug!(status = %res.status(), %next, "following redirect");

            if rewrite_to_get {
                *req.method_mut() = Method::GET;
            }

            if rewrite_to_get || *req.method() == Method::GET {
                // the body does not survive a method rewrite.
                *req.body_mut() = RequestBody::None;
                for header in [
                    CONTENT_LENGTH,
                    CONTENT_TYPE,
                    CONTENT_ENCODING,
                    TRANSFER_ENCODING,
                ] {
                    req.headers_mut().remove(header);
                }
            } else {
                // replay the original body on the next hop.
                *req.body_mut() = match replay {
                    Some(ref bytes) if bytes.is_empty() => RequestBody::None,
                    Some(ref bytes) => RequestBody::Once(bytes.clone()),
                    None => return Err(Error::StreamConsumed),
                };
            }

            // credentials never follow the request off host.
            let host_changed = !next
                .host()
                .map(|h| {
                    req.uri()
                        .host()
                        .map(|prev| prev.eq_ignore_ascii_case(h))
                        .unwrap_or(false)
                })
                .unwrap_or(false);

            if host_changed {
                req.headers_mut().remove(AUTHORIZATION);
                req.headers_mut().remove(PROXY_AUTHORIZATION);
                req.headers_mut().remove(COOKIE);
            }

            // drain the redirect response so its connection can be reused,
            // then keep it as history.
            res.buffer().await?;
            history.push(res);

            *req.uri_mut() = next;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use http::{HeaderMap, Request, Uri, Version};

    use crate::body::ResponseBody;

    use super::*;

    // scripted inner service: routes by path, records the requests it saw.
    struct MockService {
        seen: Mutex<Vec<Request<()>>>,
        hits: AtomicUsize,
    }

    impl MockService {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                hits: AtomicUsize::new(0),
            }
        }

        fn respond(&self, req: &Request<crate::body::RequestBody>) -> Response {
            self.hits.fetch_add(1, Ordering::SeqCst);

            let mut copy = Request::new(());
            *copy.method_mut() = req.method().clone();
            *copy.uri_mut() = req.uri().clone();
            *copy.headers_mut() = req.headers().clone();
            self.seen.lock().unwrap().push(copy);

            let mut headers = HeaderMap::new();
            let (status, body) = match req.uri().path() {
                "/301-other-host" => {
                    headers.insert(LOCATION, "http://b.test/landed".parse().unwrap());
                    (StatusCode::MOVED_PERMANENTLY, ResponseBody::eof())
                }
                "/301-compressed" => {
                    headers.insert(LOCATION, "/landed".parse().unwrap());
                    headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
                    (
                        StatusCode::MOVED_PERMANENTLY,
                        ResponseBody::buffered(gzip(b"moved this way").into()),
                    )
                }
                "/303" => {
                    headers.insert(LOCATION, "/landed".parse().unwrap());
                    (StatusCode::SEE_OTHER, ResponseBody::eof())
                }
                "/loop" => {
                    headers.insert(LOCATION, "/loop".parse().unwrap());
                    (StatusCode::FOUND, ResponseBody::eof())
                }
                _ => (StatusCode::OK, ResponseBody::eof()),
            };

            let mut res = http::Response::new(body);
            *res.status_mut() = status;
            *res.headers_mut() = headers;
            Response::new(
                res,
                req.uri().clone(),
                Version::HTTP_11,
                core::time::Duration::from_secs(30),
            )
        }
    }

    impl<'r, 'c> Service<ServiceRequest<'r, 'c>> for MockService {
        type Response = Response;
        type Error = Error;

        async fn call(&self, req: ServiceRequest<'r, 'c>) -> Result<Response, Error> {
            Ok(self.respond(req.req))
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn run(
        redirect: &FollowRedirect<MockService>,
        method: Method,
        url: &str,
        body: RequestBody,
    ) -> Result<Response, Error> {
        let session = crate::Session::new();
        let mut req = Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = url.parse::<Uri>().unwrap();
        req.headers_mut()
            .insert(AUTHORIZATION, "Basic X".parse().unwrap());

        redirect
            .call(ServiceRequest {
                req: &mut req,
                session: &session,
                read_timeout: core::time::Duration::from_secs(30),
            })
            .await
    }

    #[tokio::test]
    async fn off_host_redirect_scrubs_authorization() {
        let redirect = FollowRedirect::new(MockService::new());

        let res = run(
            &redirect,
            Method::GET,
            "http://a.test/301-other-host",
            RequestBody::None,
        )
        .await
        .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.url().to_string(), "http://b.test/landed");
        assert_eq!(res.history().len(), 1);
        assert_eq!(
            res.history()[0].status(),
            StatusCode::MOVED_PERMANENTLY
        );

        let seen = redirect.service.seen.lock().unwrap();
        assert!(seen[0].headers().contains_key(AUTHORIZATION));
        assert!(!seen[1].headers().contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn see_other_rewrites_method_and_drops_body() {
        let redirect = FollowRedirect::new(MockService::new());

        let res = run(
            &redirect,
            Method::POST,
            "http://a.test/303",
            RequestBody::bytes("payload"),
        )
        .await
        .unwrap();

        assert_eq!(res.status(), StatusCode::OK);

        let seen = redirect.service.seen.lock().unwrap();
        assert_eq!(seen[1].method(), Method::GET);
        assert!(!seen[1].headers().contains_key(CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn preserve_method_on_found_by_default() {
        let redirect = FollowRedirect::new(MockService::new());

        let session = crate::Session::new();
        let mut req = Request::new(RequestBody::bytes("payload"));
        *req.method_mut() = Method::POST;
        *req.uri_mut() = "http://a.test/301-other-host".parse::<Uri>().unwrap();

        let res = redirect
            .call(ServiceRequest {
                req: &mut req,
                session: &session,
                read_timeout: core::time::Duration::from_secs(30),
            })
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let seen = redirect.service.seen.lock().unwrap();
        assert_eq!(seen[1].method(), Method::POST);
    }

    #[tokio::test]
    async fn redirect_loop_is_cut_off() {
        let redirect = FollowRedirect::with_policy(
            MockService::new(),
            RedirectPolicy {
                max_redirects: 5,
                ..RedirectPolicy::default()
            },
        );

        let err = run(&redirect, Method::GET, "http://a.test/loop", RequestBody::None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TooManyRedirects));
        assert_eq!(redirect.service.hits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn compressed_redirect_hop_decodes_in_history() {
        use crate::middleware::Decompress;

        // decompression sits inside the redirect loop, so a compressed hop
        // must come out of history already decoded.
        let redirect = FollowRedirect::new(Decompress::new(MockService::new()));

        let session = crate::Session::new();
        let mut req = Request::new(RequestBody::None);
        *req.uri_mut() = "http://a.test/301-compressed".parse::<Uri>().unwrap();

        let mut res = redirect
            .call(ServiceRequest {
                req: &mut req,
                session: &session,
                read_timeout: core::time::Duration::from_secs(30),
            })
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.url().to_string(), "http://a.test/landed");
        assert_eq!(res.history().len(), 1);

        let hop = &mut res.history_mut()[0];
        assert_eq!(hop.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            hop.content().await.unwrap().as_ref(),
            b"moved this way"
        );
        assert_eq!(hop.text().await.unwrap().unwrap(), "moved this way");
    }

    #[tokio::test]
    async fn head_not_followed_by_default() {
        let redirect = FollowRedirect::new(MockService::new());

        let res = run(&redirect, Method::HEAD, "http://a.test/303", RequestBody::None)
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect.service.hits.load(Ordering::SeqCst), 1);
    }
}
