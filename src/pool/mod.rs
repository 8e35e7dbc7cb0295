pub(crate) mod exclusive;
pub(crate) mod shared;
