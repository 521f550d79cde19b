use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting admission gate for harvest tasks.
///
/// Backed by a tokio [`Semaphore`], which queues waiters in FIFO order, so a
/// waiting task is admitted as soon as every task ahead of it has been.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits until fewer than `capacity` slots are held, then takes one.
    pub async fn acquire(&self) -> SlotGuard {
        // The semaphore is private and never closed, the only error case.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed");
        SlotGuard { _permit: permit }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn slots_are_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert_eq!(limiter.in_use(), 2);

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        drop(b);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn third_waiter_blocks_until_a_slot_frees() {
        let limiter = ConcurrencyLimiter::new(2);
        let first = limiter.acquire().await;
        let _second = limiter.acquire().await;

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "third task must wait for a free slot");

        drop(first);
        waiter.await.unwrap();
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test]
    async fn admission_is_first_come_first_served() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _slot = limiter.acquire().await;
                order.lock().unwrap().push(id);
            }));
            // let each waiter enqueue before the next one is spawned
            tokio::task::yield_now().await;
        }

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
