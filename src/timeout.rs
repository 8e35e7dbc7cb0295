use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::time::Sleep;

/// attach a shared sleep timer to a future. the timer is borrowed so a single
/// allocation can be reused (and reset) across the phases of one exchange.
pub(crate) trait Timeout: Sized {
    fn timeout(self, timer: Pin<&mut Sleep>) -> TimeoutFuture<'_, Self>;
}

impl<F> Timeout for F
where
    F: Future,
{
    fn timeout(self, timer: Pin<&mut Sleep>) -> TimeoutFuture<'_, Self> {
        TimeoutFuture { fut: self, timer }
    }
}

pin_project! {
    pub(crate) struct TimeoutFuture<'a, F> {
        #[pin]
        fut: F,
        timer: Pin<&'a mut Sleep>,
    }
}

/// marker for an elapsed timer. callers map it onto the timeout kind of the
/// phase they were in.
pub(crate) struct Elapsed;

impl<F> Future for TimeoutFuture<'_, F>
where
    F: Future,
{
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(res) = this.fut.poll(cx) {
            return Poll::Ready(Ok(res));
        }

        this.timer.as_mut().poll(cx).map(|_| Err(Elapsed))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::{sleep, Instant};

    use super::*;

    #[tokio::test]
    async fn timer_wins() {
        let mut timer = Box::pin(sleep(Duration::from_millis(1)));
        let res = sleep(Duration::from_secs(30)).timeout(timer.as_mut()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn future_wins_and_timer_reusable() {
        let mut timer = Box::pin(sleep(Duration::from_secs(30)));

        let res = sleep(Duration::from_millis(1)).timeout(timer.as_mut()).await;
        assert!(res.is_ok());

        timer.as_mut().reset(Instant::now() + Duration::from_millis(1));
        let res = sleep(Duration::from_secs(30)).timeout(timer.as_mut()).await;
        assert!(res.is_err());
    }
}
