use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures_core::stream::Stream;
use http::HeaderMap;

use crate::body::BodyError;

/// streaming http/2 response body. data frames surface in wire order and
/// flow control credit is released as chunks are handed out; trailers, if
/// the server sent any, become available once the data is exhausted.
pub struct ResponseBody {
    rx: ::h2::RecvStream,
    data_done: bool,
    trailers: Option<HeaderMap>,
}

impl ResponseBody {
    pub(crate) fn new(rx: ::h2::RecvStream) -> Self {
        Self {
            rx,
            data_done: false,
            trailers: None,
        }
    }

    pub(crate) fn take_trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if !this.data_done {
            match ready!(this.rx.poll_data(cx)) {
                Some(Ok(bytes)) => {
                    let _ = this.rx.flow_control().release_capacity(bytes.len());
                    return Poll::Ready(Some(Ok(bytes)));
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(Box::new(e)))),
                None => this.data_done = true,
            }
        }

        match ready!(this.rx.poll_trailers(cx)) {
            Ok(trailers) => {
                this.trailers = trailers;
                Poll::Ready(None)
            }
            Err(e) => Poll::Ready(Some(Err(Box::new(e)))),
        }
    }
}
