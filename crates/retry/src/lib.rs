//! Retry and flow control for swap execution
//!
//! - `FixedBackoff`: fixed-interval polling schedule with a hard attempt ceiling
//! - `retry_with_budget`: bounded retries that raise the resource budget on
//!   out-of-resources failures
//! - `BackpressureHandler`: bounds concurrently executing swaps

pub mod backoff;
pub mod backpressure;
pub mod budget;

pub use backoff::FixedBackoff;
pub use backpressure::{BackpressureError, BackpressureHandler};
pub use budget::{retry_with_budget, ResourceBudget, RetryError, RetryPolicy, Retryable};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::fmt;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct Busy;

    impl fmt::Display for Busy {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("busy")
        }
    }

    impl Retryable for Busy {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_retries_inside_backpressure() {
        let backpressure = Arc::new(BackpressureHandler::new(20, 4));
        let policy = RetryPolicy::new(3, ResourceBudget(10)).with_delay(Duration::from_millis(1));
        let mut handles = vec![];

        for i in 0..8u32 {
            let bp = backpressure.clone();
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                bp.submit(async move {
                    retry_with_budget(&policy, "job", |_, attempt| {
                        async move {
                            // odd jobs need one retry
                            if i % 2 == 1 && attempt == 1 {
                                Err(Busy)
                            } else {
                                Ok(i)
                            }
                        }
                    })
                    .await
                })
                .await
            }));
        }

        let mut done = 0;
        for handle in handles {
            if let Ok(Ok(Ok(_))) = handle.await {
                done += 1;
            }
        }
        assert_eq!(done, 8);
        assert_eq!(backpressure.current_concurrent(), 0);
    }

    #[tokio::test]
    async fn test_polling_schedule_drives_wait_loop() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(1), 4);
        let mut polls = 0;

        loop {
            polls += 1;
            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => break,
            }
        }

        assert_eq!(polls, 4);
    }
}
