//! lazy response handles for multiplexed sessions.
//!
//! issuing a request on a multiplexed session returns a [`ResponsePromise`]
//! immediately; the exchange itself runs as a background task sharing the
//! session's h2/h3 connections. promises resolve exactly once: through
//! [`Session::gather`], a targeted [`ResponsePromise::gather`], or the
//! blocking facade's implicit resolution.
//!
//! [`Session::gather`]: crate::Session::gather

use core::future::Future;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{error::Error, response::Response};

type Slot = Arc<Mutex<SlotState>>;

enum SlotState {
    Pending,
    Ready(Box<Result<Response, Error>>),
    Taken,
}

/// fifo registry of in-flight lazy exchanges, owned by the session.
#[derive(Clone, Default)]
pub(crate) struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    pending: Mutex<VecDeque<PendingEntry>>,
    next_seq: AtomicU64,
}

struct PendingEntry {
    seq: u64,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// run the exchange as a task and hand back its promise. arrival order
    /// is the order promises resolve in on a full gather.
    pub(crate) fn spawn<F>(&self, fut: F) -> ResponsePromise
    where
        F: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot: Slot = Arc::new(Mutex::new(SlotState::Pending));

        let task_slot = slot.clone();
        let handle = tokio::spawn(async move {
            let res = fut.await;
            *task_slot.lock().unwrap() = SlotState::Ready(Box::new(res));
        });

        self.inner
            .pending
            .lock()
            .unwrap()
            .push_back(PendingEntry { seq, handle });

        ResponsePromise {
            state: PromiseState::Pending {
                seq,
                slot,
                scheduler: self.clone(),
            },
        }
    }

    /// await every registered exchange, oldest first.
    pub(crate) async fn gather_all(&self) {
        loop {
            let entry = self.inner.pending.lock().unwrap().pop_front();
            match entry {
                Some(entry) => await_entry(entry).await,
                None => return,
            }
        }
    }

    /// await at most `max_fetch` exchanges, in the order they complete.
    pub(crate) async fn gather_max(&self, max_fetch: usize) {
        for _ in 0..max_fetch {
            let mut entries: Vec<PendingEntry> = {
                let mut pending = self.inner.pending.lock().unwrap();
                pending.drain(..).collect()
            };

            if entries.is_empty() {
                return;
            }

            // first completed wins; the rest go back into the registry.
            let idx = futures_util::future::poll_fn(|cx| {
                for (idx, entry) in entries.iter_mut().enumerate() {
                    if core::pin::Pin::new(&mut entry.handle).poll(cx).is_ready() {
                        return core::task::Poll::Ready(idx);
                    }
                }
                core::task::Poll::Pending
            })
            .await;

            let done = entries.swap_remove(idx);
            debug!(seq = done.seq, "lazy response resolved");

            let mut pending = self.inner.pending.lock().unwrap();
            for entry in entries {
                pending.push_back(entry);
            }
        }
    }

    /// await one specific exchange. no-op when it is not (or no longer)
    /// registered.
    pub(crate) async fn gather_one(&self, seq: u64) {
        let entry = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending
                .iter()
                .position(|e| e.seq == seq)
                .and_then(|idx| pending.remove(idx))
        };

        if let Some(entry) = entry {
            await_entry(entry).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

async fn await_entry(entry: PendingEntry) {
    if let Err(e) = entry.handle.await {
        debug!(seq = entry.seq, error = %e, "lazy exchange task failed");
    }
}

enum PromiseState {
    Pending {
        seq: u64,
        slot: Slot,
        scheduler: Scheduler,
    },
    Resolved(Box<Response>),
    Failed(Option<Error>),
}

/// response surrogate handed out before the exchange completes.
///
/// a promise resolves exactly once. until then, accessing the response
/// fails with [`Error::PrematureGatherAccess`]; resolve it with
/// [`gather`](Self::gather), a session wide gather, or the blocking facade.
pub struct ResponsePromise {
    state: PromiseState,
}

impl ResponsePromise {
    pub(crate) fn failed(e: Error) -> Self {
        Self {
            state: PromiseState::Failed(Some(e)),
        }
    }

    pub fn is_resolved(&self) -> bool {
        match &self.state {
            PromiseState::Pending { slot, .. } => {
                matches!(*slot.lock().unwrap(), SlotState::Ready(_))
            }
            PromiseState::Resolved(_) | PromiseState::Failed(_) => true,
        }
    }

    /// drive this promise (and only this one) to completion without
    /// touching the result. idempotent.
    pub async fn resolve(&mut self) {
        if let PromiseState::Pending { seq, scheduler, .. } = &self.state {
            let (seq, scheduler) = (*seq, scheduler.clone());
            scheduler.gather_one(seq).await;
        }
    }

    /// drive this promise (and only this one) to completion.
    pub async fn gather(&mut self) -> Result<&mut Response, Error> {
        self.resolve().await;
        self.try_get()
    }

    /// the resolved response. fails with [`Error::PrematureGatherAccess`]
    /// when the exchange has not been gathered yet.
    pub fn try_get(&mut self) -> Result<&mut Response, Error> {
        self.promote()?;
        match self.state {
            PromiseState::Resolved(ref mut res) => Ok(res),
            _ => Err(Error::PrematureGatherAccess),
        }
    }

    /// consume the promise into its response. same resolution rules as
    /// [`try_get`](Self::try_get).
    pub fn into_response(mut self) -> Result<Response, Error> {
        self.promote()?;
        match self.state {
            PromiseState::Resolved(res) => Ok(*res),
            PromiseState::Failed(ref mut e) => Err(e.take().unwrap_or(Error::StreamConsumed)),
            PromiseState::Pending { .. } => Err(Error::PrematureGatherAccess),
        }
    }

    // move a ready slot result into the promise itself.
    fn promote(&mut self) -> Result<(), Error> {
        if let PromiseState::Pending { slot, .. } = &self.state {
            let mut slot = slot.lock().unwrap();
            match core::mem::replace(&mut *slot, SlotState::Taken) {
                SlotState::Pending => {
                    *slot = SlotState::Pending;
                }
                SlotState::Taken => {
                    drop(slot);
                    self.state = PromiseState::Failed(Some(Error::StreamConsumed));
                }
                SlotState::Ready(res) => {
                    drop(slot);
                    self.state = match *res {
                        Ok(res) => PromiseState::Resolved(Box::new(res)),
                        Err(e) => PromiseState::Failed(Some(e)),
                    };
                }
            }
        }

        if let PromiseState::Failed(ref mut e) = self.state {
            // the error surfaces once; afterwards the handle counts as spent.
            return Err(e.take().unwrap_or(Error::StreamConsumed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::body::ResponseBody;

    fn ok_response(marker: u16) -> Result<Response, Error> {
        let mut res = http::Response::new(ResponseBody::eof());
        *res.status_mut() = http::StatusCode::from_u16(200 + marker).unwrap();
        Ok(Response::new(
            res,
            "http://example.test/".parse().unwrap(),
            http::Version::HTTP_11,
            core::time::Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn premature_access_fails() {
        let scheduler = Scheduler::default();
        let mut promise = scheduler.spawn(async {
            tokio::time::sleep(core::time::Duration::from_secs(60)).await;
            ok_response(0)
        });

        assert!(matches!(
            promise.try_get(),
            Err(Error::PrematureGatherAccess)
        ));
    }

    #[tokio::test]
    async fn gather_all_resolves_everything() {
        let scheduler = Scheduler::default();

        let mut promises: Vec<_> = (0..3u16)
            .map(|i| scheduler.spawn(async move { ok_response(i) }))
            .collect();

        scheduler.gather_all().await;
        assert_eq!(scheduler.pending_count(), 0);

        for promise in &mut promises {
            assert!(promise.try_get().is_ok());
        }
    }

    #[tokio::test]
    async fn gather_max_leaves_the_rest_pending() {
        let scheduler = Scheduler::default();

        let _fast = scheduler.spawn(async { ok_response(0) });
        let _slow = scheduler.spawn(async {
            tokio::time::sleep(core::time::Duration::from_secs(60)).await;
            ok_response(1)
        });

        scheduler.gather_max(1).await;
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[tokio::test]
    async fn targeted_gather() {
        let scheduler = Scheduler::default();

        let mut promise = scheduler.spawn(async { ok_response(0) });
        let _other = scheduler.spawn(async {
            tokio::time::sleep(core::time::Duration::from_secs(60)).await;
            ok_response(1)
        });

        let res = promise.gather().await.unwrap();
        assert_eq!(res.status(), http::StatusCode::OK);

        // gather is idempotent.
        assert!(promise.gather().await.is_ok());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[tokio::test]
    async fn error_surfaces_once() {
        let scheduler = Scheduler::default();
        let mut promise = scheduler.spawn(async { Err(Error::TooManyRedirects) });

        scheduler.gather_all().await;
        assert!(matches!(promise.try_get(), Err(Error::TooManyRedirects)));
    }
}
