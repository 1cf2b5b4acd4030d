//! Generic bounded object pool
//!
//! Holds a fixed set of reusable objects. `acquire` waits up to a timeout for
//! an object to be returned when all are checked out; the returned guard puts
//! the object back on drop. After `close`, idle objects are dropped, waiters
//! fail, and objects still checked out are dropped when their guard is.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("timed out after {waited_ms}ms waiting for a pooled object")]
    Timeout { waited_ms: u64 },

    #[error("pool is closed")]
    Closed,
}

struct Shared<T> {
    idle: Mutex<Vec<T>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    capacity: usize,
}

impl<T> Shared<T> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A bounded pool of `T`
pub struct ObjectPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Create a pool pre-filled with `objects`; its capacity is their count
    pub fn new(objects: Vec<T>) -> Self {
        let capacity = objects.len();
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(objects),
                semaphore: Arc::new(Semaphore::new(capacity)),
                closed: AtomicBool::new(false),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Objects currently available without waiting
    pub fn available(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Check out an object, waiting at most `timeout`
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledObject<T>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.shared.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        };

        // Permits and idle objects are kept in lockstep, so an object is
        // present whenever a permit was granted on an open pool.
        let object = self.shared.idle().pop().ok_or(PoolError::Closed)?;

        Ok(PooledObject {
            object: Some(object),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Close the pool, dropping idle objects and failing pending waiters
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.semaphore.close();
        let drained: Vec<T> = std::mem::take(&mut *self.shared.idle());
        tracing::debug!(released = drained.len(), "Object pool closed");
    }
}

/// An object checked out of an [`ObjectPool`]
pub struct PooledObject<T> {
    object: Option<T>,
    shared: Arc<Shared<T>>,
    // Dropped after the object is returned, so a waiter woken by the permit
    // always finds an idle object.
    _permit: OwnedSemaphorePermit,
}

impl<T> std::fmt::Debug for PooledObject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledObject").finish_non_exhaustive()
    }
}

impl<T> Deref for PooledObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in Drop
        self.object.as_ref().expect("pooled object present until drop")
    }
}

impl<T> DerefMut for PooledObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("pooled object present until drop")
    }
}

impl<T> Drop for PooledObject<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            if !self.shared.closed.load(Ordering::Acquire) {
                self.shared.idle().push(object);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_return() {
        let pool = ObjectPool::new(vec![1, 2]);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(pool.available(), 1);
        drop(a);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = ObjectPool::new(vec!["only"]);
        let _held = pool.acquire(Duration::from_millis(10)).await.unwrap();

        let err = pool.acquire(Duration::from_millis(20)).await.err();
        assert_eq!(err, Some(PoolError::Timeout { waited_ms: 20 }));
    }

    #[tokio::test]
    async fn test_waiter_proceeds_when_object_returned() {
        let pool = ObjectPool::new(vec![7u32]);
        let held = pool.acquire(Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire(Duration::from_secs(1)).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_waiter_stays_pending_until_return() {
        use tokio_test::{assert_pending, assert_ready, task};

        let pool = ObjectPool::new(vec!['x']);
        let held = pool.acquire(Duration::from_millis(10)).await.unwrap();

        let mut waiter = task::spawn(pool.acquire(Duration::from_secs(5)));
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let object = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(*object, 'x');
    }

    #[tokio::test]
    async fn test_close_fails_acquire_and_waiters() {
        let pool = ObjectPool::new(vec![1]);
        let held = pool.acquire(Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await.err() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close();
        assert_eq!(waiter.await.unwrap(), Some(PoolError::Closed));
        assert!(matches!(
            pool.acquire(Duration::from_millis(10)).await,
            Err(PoolError::Closed)
        ));

        drop(held);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_objects_are_mutable_through_guard() {
        let pool = ObjectPool::new(vec![Vec::<u8>::new()]);
        {
            let mut buf = pool.acquire(Duration::from_millis(10)).await.unwrap();
            buf.push(42);
        }
        let buf = pool.acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(buf.as_slice(), &[42]);
    }
}
