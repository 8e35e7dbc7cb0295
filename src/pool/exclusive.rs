//! bounded per-origin pool for exclusively held (http/1) connections.
//!
//! each origin bucket is capped by a semaphore (`pool_maxsize` permits) and
//! the number of distinct origin buckets is capped by lru eviction
//! (`pool_connections`). reuse within a bucket is most-recently-returned
//! first.

use core::{
    hash::Hash,
    ops::{Deref, DerefMut},
    time::Duration,
};

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Shared<K, C> {
    entries: HashMap<K, (Arc<Semaphore>, VecDeque<PooledConn<C>>)>,
    // origin recency, least recently used in front.
    recency: VecDeque<K>,
}

pub struct Pool<K, C> {
    shared: Arc<Mutex<Shared<K, C>>>,
    // connections retained per origin bucket.
    cap: usize,
    // distinct origin buckets retained.
    max_entries: usize,
    keep_alive_idle: Duration,
    keep_alive_born: Duration,
    max_requests: usize,
}

impl<K, C> Clone for Pool<K, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            cap: self.cap,
            max_entries: self.max_entries,
            keep_alive_idle: self.keep_alive_idle,
            keep_alive_born: self.keep_alive_born,
            max_requests: self.max_requests,
        }
    }
}

impl<K, C> Pool<K, C>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new(
        cap: usize,
        max_entries: usize,
        keep_alive_idle: Duration,
        keep_alive_born: Duration,
        max_requests: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            })),
            cap,
            max_entries,
            keep_alive_idle,
            keep_alive_born,
            max_requests,
        }
    }

    // acquire a connection from the pool. when a new connection must be made
    // a spawner is returned carrying the reserved capacity permit.
    pub(crate) async fn acquire(&self, key: impl Into<K>) -> AcquireOutput<'_, K, C> {
        let key = key.into();

        loop {
            let permits = {
                let mut shared = self.shared.lock().unwrap();
                match shared.entries.get(&key) {
                    Some((permits, _)) => {
                        let permits = permits.clone();
                        touch(&mut shared.recency, &key);
                        permits
                    }
                    None => {
                        let permit = self.entry_new(&key, &mut shared);
                        return AcquireOutput::Spawner(Spawner {
                            pool: self,
                            key,
                            _permit: permit,
                            is_new_entry: true,
                            fulfilled: false,
                        });
                    }
                }
            };

            if let Ok(permit) = permits.acquire_owned().await {
                let mut shared = self.shared.lock().unwrap();
                let queue = match shared.entries.get_mut(&key) {
                    Some((_, queue)) => queue,
                    // the entry was evicted while the permit was being
                    // reserved. try again from the beginning.
                    None => continue,
                };

                // most recently returned connection first.
                while let Some(conn) = queue.pop_back() {
                    if !conn.state.is_expired() {
                        return AcquireOutput::Conn(Conn {
                            pool: self.clone(),
                            key,
                            conn: Some(conn),
                            permit,
                            destroy_on_drop: false,
                        });
                    }
                }

                // every pooled connection in the bucket expired. keep the
                // permit and hand out a spawner.
                return AcquireOutput::Spawner(Spawner {
                    pool: self,
                    key,
                    _permit: permit,
                    is_new_entry: false,
                    fulfilled: false,
                });
            }

            // the entry disappeared while waiting on the semaphore.
        }
    }

    /// put a connection into the pool without going through acquire. used
    /// when an alpn downgrade hands an h1 connection back before the h1
    /// exchange re-acquires it.
    pub(crate) fn try_add(&self, key: impl Into<K>, conn: C) {
        let key = key.into();
        let mut shared = self.shared.lock().unwrap();
        match shared.entries.get_mut(&key) {
            Some((permits, queue)) => {
                // capacity probe only. when the bucket is saturated the
                // connection is thrown away.
                if permits.try_acquire().is_ok() {
                    queue.push_back(PooledConn {
                        conn,
                        state: ConnState::new(
                            self.keep_alive_idle,
                            self.keep_alive_born,
                            self.max_requests,
                        ),
                    });
                }
            }
            None => {
                let permits = Arc::new(Semaphore::new(self.cap));
                let mut queue = VecDeque::with_capacity(self.cap);
                queue.push_back(PooledConn {
                    conn,
                    state: ConnState::new(
                        self.keep_alive_idle,
                        self.keep_alive_born,
                        self.max_requests,
                    ),
                });
                self.evict_for(&key, &mut shared);
                shared.entries.insert(key.clone(), (permits, queue));
                shared.recency.push_back(key);
            }
        }
    }

    // create a new bucket and reserve one permit from it immediately.
    fn entry_new(&self, key: &K, shared: &mut Shared<K, C>) -> OwnedSemaphorePermit {
        let permits = Arc::new(Semaphore::new(self.cap));
        let permit = permits
            .clone()
            .try_acquire_owned()
            .expect("in place permit reservation must not fail");
        self.evict_for(key, shared);
        shared
            .entries
            .insert(key.clone(), (permits, VecDeque::with_capacity(self.cap)));
        shared.recency.push_back(key.clone());
        permit
    }

    // drop least recently used buckets until a new bucket for `key` fits.
    fn evict_for(&self, key: &K, shared: &mut Shared<K, C>) {
        while shared.entries.len() >= self.max_entries {
            let Some(evict) = shared.recency.iter().find(|k| *k != key).cloned() else {
                break;
            };
            shared.entries.remove(&evict);
            shared.recency.retain(|k| *k != evict);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self, key: &K) -> usize {
        self.shared
            .lock()
            .unwrap()
            .entries
            .get(key)
            .map(|(_, queue)| queue.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.shared.lock().unwrap().entries.len()
    }
}

fn touch<K: Eq>(recency: &mut VecDeque<K>, key: &K) {
    if let Some(pos) = recency.iter().position(|k| k == key) {
        if let Some(k) = recency.remove(pos) {
            recency.push_back(k);
        }
    }
}

pub(crate) enum AcquireOutput<'a, K, C>
where
    K: Eq + Hash + Clone,
{
    Conn(Conn<K, C>),
    Spawner(Spawner<'a, K, C>),
}

/// checked out pooled connection. dropping it returns the connection to its
/// bucket unless it expired or was flagged for destruction.
pub struct Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    pool: Pool<K, C>,
    key: K,
    conn: Option<PooledConn<C>>,
    permit: OwnedSemaphorePermit,
    destroy_on_drop: bool,
}

impl<K, C> Deref for Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("connection is only taken in Drop")
    }
}

impl<K, C> DerefMut for Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("connection is only taken in Drop")
    }
}

impl<K, C> Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn destroy_on_drop(&mut self) {
        self.destroy_on_drop = true;
    }

    pub(crate) fn is_destroy_on_drop(&self) -> bool {
        self.destroy_on_drop
    }

    /// apply `Keep-Alive` response header hints to the pooled state.
    pub(crate) fn keep_alive_hint(&mut self, timeout: Option<Duration>, max_requests: Option<usize>) {
        if let Some(conn) = self.conn.as_mut() {
            if let Some(timeout) = timeout {
                conn.state.keep_alive_idle = timeout;
            }
            if let Some(max_requests) = max_requests {
                conn.state.max_requests = max_requests;
            }
        }
    }
}

impl<K, C> Drop for Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if conn.state.is_expired() || self.destroy_on_drop {
                return;
            }

            let mut shared = self.pool.shared.lock().unwrap();

            if let Some((_, queue)) = shared.entries.get_mut(&self.key) {
                conn.state.update_for_reentry();
                queue.push_back(conn);
            }

            let _ = self.permit;
        }
    }
}

pub struct PooledConn<C> {
    conn: C,
    state: ConnState,
}

impl<C> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

#[derive(Clone, Copy)]
struct ConnState {
    born: Instant,
    idle_since: Instant,
    requests: usize,
    keep_alive_idle: Duration,
    keep_alive_born: Duration,
    max_requests: usize,
}

impl ConnState {
    fn new(keep_alive_idle: Duration, keep_alive_born: Duration, max_requests: usize) -> Self {
        let now = Instant::now();

        Self {
            born: now,
            idle_since: now,
            requests: 0,
            keep_alive_idle,
            keep_alive_born,
            max_requests,
        }
    }

    fn update_for_reentry(&mut self) {
        self.idle_since = Instant::now();
        self.requests += 1;
    }

    fn is_expired(&self) -> bool {
        self.born.elapsed() > self.keep_alive_born
            || self.idle_since.elapsed() > self.keep_alive_idle
            || self.requests >= self.max_requests
    }
}

/// placeholder for a connection being dialed. holds one bucket permit so
/// concurrent acquires cannot overshoot the per-origin cap.
pub(crate) struct Spawner<'a, K, C>
where
    K: Eq + Hash + Clone,
{
    pool: &'a Pool<K, C>,
    key: K,
    _permit: OwnedSemaphorePermit,
    is_new_entry: bool,
    fulfilled: bool,
}

impl<K, C> Spawner<'_, K, C>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn spawned(mut self, conn: C) {
        self.fulfilled = true;

        let mut shared = self.pool.shared.lock().unwrap();
        if let Some((_, queue)) = shared.entries.get_mut(&self.key) {
            queue.push_back(PooledConn {
                conn,
                state: ConnState::new(
                    self.pool.keep_alive_idle,
                    self.pool.keep_alive_born,
                    self.pool.max_requests,
                ),
            });
        }
    }
}

impl<K, C> Drop for Spawner<'_, K, C>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.is_new_entry && !self.fulfilled {
            let mut shared = self.pool.shared.lock().unwrap();
            shared.entries.remove(&self.key);
            let key = &self.key;
            shared.recency.retain(|k| k != key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const IDLE: Duration = Duration::from_secs(90);
    const BORN: Duration = Duration::from_secs(3600);

    fn pool(cap: usize, max_entries: usize) -> Pool<u32, u32> {
        Pool::new(cap, max_entries, IDLE, BORN, 1024)
    }

    #[tokio::test]
    async fn spawner_then_reuse() {
        let pool = pool(2, 8);

        match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner.spawned(7),
            AcquireOutput::Conn(_) => panic!("empty pool must hand out a spawner"),
        }

        match pool.acquire(1u32).await {
            AcquireOutput::Conn(conn) => assert_eq!(*conn, 7),
            AcquireOutput::Spawner(_) => panic!("pooled connection must be reused"),
        };
    }

    #[tokio::test]
    async fn destroy_on_drop_removes() {
        let pool = pool(2, 8);
        match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner.spawned(7),
            _ => unreachable!(),
        }

        match pool.acquire(1u32).await {
            AcquireOutput::Conn(mut conn) => conn.destroy_on_drop(),
            _ => unreachable!(),
        }

        assert_eq!(pool.idle_count(&1), 0);
    }

    #[tokio::test]
    async fn abandoned_spawner_clears_new_entry() {
        let pool = pool(2, 8);
        match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => drop(spawner),
            _ => unreachable!(),
        }
        assert_eq!(pool.entry_count(), 0);
    }

    #[tokio::test]
    async fn lru_origin_eviction() {
        let pool = pool(2, 2);

        for key in [1u32, 2, 3] {
            match pool.acquire(key).await {
                AcquireOutput::Spawner(spawner) => spawner.spawned(key),
                _ => unreachable!(),
            }
        }

        // bucket 1 was least recently used and must be gone.
        assert_eq!(pool.entry_count(), 2);
        assert_eq!(pool.idle_count(&1), 0);
        assert_eq!(pool.idle_count(&2), 1);
        assert_eq!(pool.idle_count(&3), 1);
    }

    #[tokio::test]
    async fn mru_reuse_within_bucket() {
        let pool = pool(4, 8);
        match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner.spawned(10),
            _ => unreachable!(),
        }
        pool.try_add(1u32, 11);

        // 11 was returned last, so it is the first candidate out.
        match pool.acquire(1u32).await {
            AcquireOutput::Conn(conn) => assert_eq!(*conn, 11),
            _ => unreachable!(),
        };
    }
}
