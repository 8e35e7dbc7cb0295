//! middleware extending the request pipeline of a session.

pub(crate) mod coding;

mod cookies;
mod decompress;
mod redirect;

pub use cookies::CookieStore;
pub use decompress::Decompress;
pub use redirect::{FollowRedirect, RedirectPolicy};
