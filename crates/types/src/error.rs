use thiserror::Error;

use crate::{ImmutablesError, OrderError, TimelockError};

/// Rejections raised before a swap is accepted.
///
/// None of these ever reach the registry or a ledger.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid order: {0}")]
    InvalidOrder(OrderError),

    #[error("invalid timelock ordering: {0}")]
    InvalidTimelockOrdering(TimelockError),

    #[error(transparent)]
    InvalidImmutables(#[from] ImmutablesError),

    #[error("invalid fill: {0}")]
    InvalidFill(String),
}

impl From<OrderError> for ValidationError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Timelocks(inner) => ValidationError::InvalidTimelockOrdering(inner),
            other => ValidationError::InvalidOrder(other),
        }
    }
}

impl From<TimelockError> for ValidationError {
    fn from(err: TimelockError) -> Self {
        ValidationError::InvalidTimelockOrdering(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timelock_errors_surface_as_ordering() {
        let err: ValidationError =
            OrderError::Timelocks(TimelockError::InvalidOrdering("x".into())).into();
        assert!(matches!(err, ValidationError::InvalidTimelockOrdering(_)));

        let err: ValidationError = OrderError::SameAsset.into();
        assert!(matches!(err, ValidationError::InvalidOrder(OrderError::SameAsset)));
    }
}
