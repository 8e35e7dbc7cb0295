mod error;

pub(crate) mod body;
pub(crate) mod proto;

pub use self::error::Error;
