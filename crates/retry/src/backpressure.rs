use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error, PartialEq)]
pub enum BackpressureError {
    #[error("swap queue is full ({0} pending)")]
    QueueFull(u32),
    #[error("backpressure handler is shut down")]
    Closed,
}

/// Bounds how many swaps execute at once and how many may wait for a slot.
///
/// `pending` counts both waiting and running work; `running` only the work
/// that holds a permit.
pub struct BackpressureHandler {
    max_pending: u32,
    max_concurrent: u32,
    pending: AtomicU32,
    running: AtomicU32,
    semaphore: Arc<Semaphore>,
}

impl BackpressureHandler {
    pub fn new(max_pending: u32, max_concurrent: u32) -> Self {
        Self {
            max_pending,
            max_concurrent,
            pending: AtomicU32::new(0),
            running: AtomicU32::new(0),
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Run `f` once a concurrency slot is free.
    ///
    /// Rejected immediately when `max_pending` submissions are already queued
    /// or running.
    pub async fn submit<F, T>(&self, f: F) -> Result<T, BackpressureError>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        let queued = self.pending.fetch_add(1, Ordering::SeqCst);
        if queued >= self.max_pending {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BackpressureError::QueueFull(queued));
        }

        let permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(BackpressureError::Closed);
            }
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        let result = f.await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);

        drop(permit);
        Ok(result)
    }

    pub fn is_accepting(&self) -> bool {
        self.pending.load(Ordering::Relaxed) < self.max_pending
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    pub fn current_concurrent(&self) -> u32 {
        self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_submit_returns_result() {
        let handler = BackpressureHandler::new(10, 2);
        assert_eq!(handler.submit(async { 42 }).await, Ok(42));
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let handler = Arc::new(BackpressureHandler::new(10, 2));
        let mut handles = vec![];

        for i in 0..5 {
            let h = handler.clone();
            handles.push(tokio::spawn(async move {
                h.submit(async move {
                    sleep(Duration::from_millis(100)).await;
                    i
                })
                .await
            }));
        }

        sleep(Duration::from_millis(50)).await;
        assert!(handler.current_concurrent() <= 2);
        // queued work counts as pending
        assert_eq!(handler.pending(), 5);

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(handler.current_concurrent(), 0);
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejects() {
        let handler = Arc::new(BackpressureHandler::new(2, 1));
        let mut handles = vec![];

        for _ in 0..2 {
            let h = handler.clone();
            handles.push(tokio::spawn(async move {
                h.submit(async {
                    sleep(Duration::from_millis(300)).await;
                })
                .await
            }));
        }

        sleep(Duration::from_millis(50)).await;
        assert!(!handler.is_accepting());

        let result = handler.submit(async {}).await;
        assert!(matches!(result, Err(BackpressureError::QueueFull(2))));

        for handle in handles {
            handle.await.ok();
        }
        assert!(handler.is_accepting());
    }

    #[tokio::test]
    async fn test_all_submissions_complete() {
        let handler = Arc::new(BackpressureHandler::new(10, 1));
        let completed = Arc::new(Mutex::new(Vec::new()));

        let mut handles = vec![];
        for i in 0..3 {
            let h = handler.clone();
            let c = completed.clone();
            handles.push(tokio::spawn(async move {
                h.submit(async move {
                    sleep(Duration::from_millis(20)).await;
                    c.lock().await.push(i);
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.ok();
        }
        assert_eq!(completed.lock().await.len(), 3);
    }
}
