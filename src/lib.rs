//! an ergonomic http client speaking http/1.1, http/2 and http/3.
//!
//! # Quick Start
//! ```no_run
//! use niquests::{Error, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let session = Session::new();
//!     // send a get request and wait for the response.
//!     let mut res = session.get("https://example.org/").send().await?;
//!     // decode the body as text.
//!     if let Some(text) = res.text().await? {
//!         println!("{text}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Multiplexing
//! a session built with [`SessionBuilder::multiplexed`] hands out lazy
//! response handles: requests are issued immediately and resolved later,
//! many at a time, over shared http/2 or http/3 connections.
//! ```no_run
//! # async fn _main() -> Result<(), niquests::Error> {
//! let session = niquests::Session::builder().multiplexed(true).finish();
//!
//! let mut first = session.get("https://example.org/a").send_lazy();
//! let mut second = session.get("https://example.org/b").send_lazy();
//!
//! // both exchanges are in flight; the barrier resolves them together.
//! session.gather().await;
//!
//! println!("{}", first.try_get()?.status());
//! println!("{}", second.try_get()?.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Customization
//! - pluggable dns resolvers, declared by descriptor (`dou://`, `dot://`,
//!   `doh+cloudflare://`, `doq://`) and chained with fallback
//! - extendable middleware for pre/post processing, see
//!   [`SessionBuilder::middleware`]

#![forbid(unsafe_code)]

mod altsvc;
mod auth;
mod body;
mod builder;
mod client;
mod connect;
mod connection;
mod cookies;
mod headers;
mod multipart;
mod netrc;
mod pool;
mod promise;
mod proxy;
mod request;
mod resolver;
mod response;
mod service;
mod timeout;
mod tls;
mod uri;

mod h1;
mod h2;

#[cfg(feature = "http3")]
mod h3;

pub mod blocking;
pub mod error;
pub mod middleware;

pub use self::auth::Auth;
pub use self::body::{RequestBody, ResponseBody};
pub use self::builder::SessionBuilder;
pub use self::client::{Session, TimeoutConfig};
pub use self::connect::Connect;
pub use self::cookies::Jar;
pub use self::error::Error;
pub use self::headers::{fold_multi, RetryAfter, TypedHeaders};
pub use self::multipart::{Form, Part};
pub use self::promise::ResponsePromise;
pub use self::proxy::ProxyConfig;
pub use self::request::RequestBuilder;
pub use self::resolver::{ResolverDescriptor, ResolverKind};
pub use self::response::{BodyIter, LineIter, ReasonPhrase, Response};
pub use self::service::{HttpService, Service, ServiceRequest};
pub use self::uri::Params;

// re-export http crate.
pub use http;

// re-export bytes crate.
pub use bytes;

macro_rules! ephemeral {
    ($method: tt) => {
        #[doc = concat!("start a ", stringify!($method), " request on a short lived session.")]
        pub fn $method<U>(url: U) -> RequestBuilder
        where
            http::Uri: TryFrom<U>,
            <http::Uri as TryFrom<U>>::Error: Into<http::uri::InvalidUri>,
        {
            Session::new().$method(url)
        }
    };
}

ephemeral!(get);
ephemeral!(head);
ephemeral!(options);
ephemeral!(post);
ephemeral!(put);
ephemeral!(patch);
ephemeral!(delete);
