//! pool of multiplexed (http/2, http/3) connections: one per origin, shared
//! by cloning. a `Spawning` gate makes concurrent acquires of the same origin
//! wait for the single dial instead of racing their own.

use core::hash::Hash;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

pub struct Pool<K, C> {
    conns: Arc<Mutex<HashMap<K, PooledConnection<C>>>>,
}

impl<K, C> Clone for Pool<K, C> {
    fn clone(&self) -> Self {
        Self {
            conns: self.conns.clone(),
        }
    }
}

impl<K, C> Default for Pool<K, C> {
    fn default() -> Self {
        Self {
            conns: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, C> Pool<K, C>
where
    K: Eq + Hash + Clone,
    C: Clone,
{
    pub(crate) async fn acquire(&self, key: impl Into<K>) -> AcquireOutput<'_, K, C> {
        let key = key.into();
        loop {
            let notify = {
                let mut conns = self.conns.lock().unwrap();
                match conns.get(&key) {
                    Some(PooledConnection::Conn(c)) => {
                        return AcquireOutput::Conn(Conn {
                            pool: self.clone(),
                            key,
                            conn: c.clone(),
                            destroy_on_drop: false,
                        });
                    }
                    Some(PooledConnection::Spawning(notify)) => notify.clone(),
                    None => {
                        let notify = Arc::new(Notify::new());
                        conns.insert(key.clone(), PooledConnection::Spawning(notify.clone()));
                        return AcquireOutput::Spawner(Spawner {
                            pool: self,
                            key,
                            notify,
                            fulfilled: false,
                        });
                    }
                }
            };
            notify.notified().await;
        }
    }

    /// forget the connection of an origin, e.g. on goaway.
    pub(crate) fn remove(&self, key: &K) {
        let mut conns = self.conns.lock().unwrap();
        if matches!(conns.get(key), Some(PooledConnection::Conn(_))) {
            conns.remove(key);
        }
    }
}

enum PooledConnection<C> {
    Conn(C),
    Spawning(Arc<Notify>),
}

pub(crate) enum AcquireOutput<'a, K, C>
where
    K: Eq + Hash + Clone,
{
    Conn(Conn<K, C>),
    Spawner(Spawner<'a, K, C>),
}

pub(crate) struct Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    pool: Pool<K, C>,
    key: K,
    pub(crate) conn: C,
    destroy_on_drop: bool,
}

impl<K, C> Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn destroy_on_drop(&mut self) {
        self.destroy_on_drop = true;
    }
}

impl<K, C> Drop for Conn<K, C>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.destroy_on_drop {
            let mut conns = self.pool.conns.lock().unwrap();
            if matches!(conns.get(&self.key), Some(PooledConnection::Conn(_))) {
                conns.remove(&self.key);
            }
        }
    }
}

pub(crate) struct Spawner<'a, K, C>
where
    K: Eq + Hash + Clone,
{
    pool: &'a Pool<K, C>,
    key: K,
    notify: Arc<Notify>,
    fulfilled: bool,
}

impl<K, C> Spawner<'_, K, C>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn spawned(mut self, conn: C) {
        self.fulfilled = true;
        if let Some(PooledConnection::Spawning(notify)) = self
            .pool
            .conns
            .lock()
            .unwrap()
            .insert(self.key.clone(), PooledConnection::Conn(conn))
        {
            notify.notify_waiters();
        }
    }
}

impl<K, C> Drop for Spawner<'_, K, C>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if !self.fulfilled {
            self.pool.conns.lock().unwrap().remove(&self.key);
        }

        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn waiters_wake_after_spawn() {
        let pool: Pool<u32, u32> = Pool::default();

        let spawner = match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner,
            _ => panic!("empty pool must hand out a spawner"),
        };

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                match pool.acquire(1u32).await {
                    AcquireOutput::Conn(conn) => conn.conn,
                    AcquireOutput::Spawner(_) => panic!("second acquire must wait for the dial"),
                }
            })
        };

        // give the waiter time to park on the notify gate.
        tokio::task::yield_now().await;

        spawner.spawned(42);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn failed_spawn_unblocks_waiters() {
        let pool: Pool<u32, u32> = Pool::default();

        let spawner = match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner,
            _ => unreachable!(),
        };

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                matches!(pool.acquire(1u32).await, AcquireOutput::Spawner(_))
            })
        };

        tokio::task::yield_now().await;
        drop(spawner);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn destroy_on_drop_removes() {
        let pool: Pool<u32, u32> = Pool::default();
        match pool.acquire(1u32).await {
            AcquireOutput::Spawner(spawner) => spawner.spawned(5),
            _ => unreachable!(),
        }

        match pool.acquire(1u32).await {
            AcquireOutput::Conn(mut conn) => conn.destroy_on_drop(),
            _ => unreachable!(),
        }

        assert!(matches!(
            pool.acquire(1u32).await,
            AcquireOutput::Spawner(_)
        ));
    }
}
