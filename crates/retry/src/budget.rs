use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Resource allowance attached to a mutating ledger call (a gas limit on
/// EVM-style ledgers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceBudget(pub u64);

impl ResourceBudget {
    /// Budget raised by `pct` percent, rounded up and never below `self + 1`
    pub fn escalate(self, pct: u32) -> Self {
        let bumped = self.0.saturating_mul(100 + pct as u64).div_ceil(100);
        Self(bumped.max(self.0.saturating_add(1)))
    }

    pub fn units(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a failed call should be treated by [`retry_with_budget`]
pub trait Retryable {
    /// Transient failure; the same call may succeed if repeated
    fn is_retryable(&self) -> bool;

    /// The call ran out of resources; repeat it with a larger budget
    fn needs_more_resources(&self) -> bool {
        false
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E: fmt::Display> {
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },

    #[error("{operation} rejected on attempt {attempt}: {error}")]
    Rejected {
        operation: String,
        attempt: u32,
        error: E,
    },
}

impl<E: fmt::Display> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Rejected { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Bounded attempts with a growing resource budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_budget: ResourceBudget,
    /// Percentage added to the budget after an out-of-resources failure
    pub budget_bump_pct: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_budget: ResourceBudget) -> Self {
        Self {
            max_attempts,
            initial_budget,
            budget_bump_pct: 25,
            delay: Duration::from_millis(500),
        }
    }

    pub fn with_budget_bump_pct(mut self, pct: u32) -> Self {
        self.budget_bump_pct = pct;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, ResourceBudget(300_000))
    }
}

/// Run `call` until it succeeds, fails permanently, or `policy.max_attempts`
/// is reached.
///
/// `call` receives the budget for this attempt and the 1-based attempt
/// number. Out-of-resources failures raise the budget for the next attempt;
/// other retryable failures repeat with the same budget.
pub async fn retry_with_budget<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(ResourceBudget, u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut budget = policy.initial_budget;
    let mut attempt = 1;

    loop {
        let error = match call(budget, attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(RetryError::Rejected {
                operation: operation.to_string(),
                attempt,
                error,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: error,
            });
        }

        if error.needs_more_resources() {
            budget = budget.escalate(policy.budget_bump_pct);
        }

        warn!(
            operation,
            attempt,
            max_attempts,
            next_budget = budget.0,
            error = %error,
            "Ledger call failed, retrying"
        );

        attempt += 1;
        tokio::time::sleep(policy.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Flaky,
        OutOfGas,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }

        fn needs_more_resources(&self) -> bool {
            matches!(self, TestError::OutOfGas)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, ResourceBudget(100))
            .with_budget_bump_pct(50)
            .with_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_budget_escalation() {
        assert_eq!(ResourceBudget(100).escalate(25), ResourceBudget(125));
        assert_eq!(ResourceBudget(3).escalate(10), ResourceBudget(4));
        assert_eq!(ResourceBudget(5).escalate(0), ResourceBudget(6));
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result: Result<u32, RetryError<TestError>> =
            retry_with_budget(&fast_policy(3), "create", |_, _| async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_out_of_resources_escalates_budget() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let result = retry_with_budget(&fast_policy(3), "create", move |budget, attempt| {
            seen_clone.lock().unwrap().push(budget);
            async move {
                if attempt < 3 {
                    Err(TestError::OutOfGas)
                } else {
                    Ok(budget)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(ResourceBudget(225)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ResourceBudget(100), ResourceBudget(150), ResourceBudget(225)]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_budget() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let result = retry_with_budget(&fast_policy(3), "withdraw", move |budget, attempt| {
            seen_clone.lock().unwrap().push(budget);
            async move {
                if attempt == 1 {
                    Err(TestError::Flaky)
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(*seen.lock().unwrap(), vec![ResourceBudget(100), ResourceBudget(100)]);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();

        let result: Result<(), _> = retry_with_budget(&fast_policy(3), "create", move |_, _| {
            *calls_clone.lock().unwrap() += 1;
            async { Err(TestError::Flaky) }
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(err.into_inner(), TestError::Flaky);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();

        let result: Result<(), _> = retry_with_budget(&fast_policy(5), "withdraw", move |_, _| {
            *calls_clone.lock().unwrap() += 1;
            async { Err(TestError::Fatal) }
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(matches!(
            result,
            Err(RetryError::Rejected { attempt: 1, error: TestError::Fatal, .. })
        ));
    }
}
