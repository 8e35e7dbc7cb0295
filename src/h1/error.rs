use std::{error, io};

pub use super::proto::error::{Parse, ProtoError};

#[derive(Debug)]
pub enum Error {
    Std(Box<dyn error::Error + Send + Sync>),
    Io(io::Error),
    Proto(ProtoError),
}

impl From<Box<dyn error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn error::Error + Send + Sync>) -> Self {
        Self::Std(e)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}
