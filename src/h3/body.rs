use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::stream::Stream;

use crate::body::{BodyError, BoxStream};

/// streaming http/3 response body, fed by the request stream's data frames.
pub struct ResponseBody(pub(crate) BoxStream);

impl Stream for ResponseBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().0.as_mut().poll_next(cx)
    }
}
