#[derive(Debug)]
pub enum Error {
    H3(h3::Error),
    Connect(quinn::ConnectError),
    Connection(quinn::ConnectionError),
}

impl From<h3::Error> for Error {
    fn from(e: h3::Error) -> Self {
        Self::H3(e)
    }
}

impl From<quinn::ConnectError> for Error {
    fn from(e: quinn::ConnectError) -> Self {
        Self::Connect(e)
    }
}

impl From<quinn::ConnectionError> for Error {
    fn from(e: quinn::ConnectionError) -> Self {
        Self::Connection(e)
    }
}
