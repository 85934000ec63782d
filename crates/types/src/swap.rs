use std::fmt;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::{FillProof, Immutables, Secret, Side};

/// Identifies one fill of one order.
///
/// Single-fill orders always use fill index 0, so the order hash alone
/// identifies the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwapKey {
    pub order_hash: H256,
    pub fill_index: u32,
}

impl SwapKey {
    pub fn new(order_hash: H256, fill_index: u32) -> Self {
        Self {
            order_hash,
            fill_index,
        }
    }
}

impl fmt::Display for SwapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}/{}", self.order_hash, self.fill_index)
    }
}

/// Why a swap ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DestinationFundingFailed,
    AuthorizationTimeout,
    SourceFundingFailed,
    FundsNotLocked,
    SourceWithdrawalRejected,
    DestinationWithdrawalRejected,
    LedgerCommunicationError,
    WithdrawalWindowTimeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DestinationFundingFailed => "destination_funding_failed",
            FailureKind::AuthorizationTimeout => "authorization_timeout",
            FailureKind::SourceFundingFailed => "source_funding_failed",
            FailureKind::FundsNotLocked => "funds_not_locked",
            FailureKind::SourceWithdrawalRejected => "source_withdrawal_rejected",
            FailureKind::DestinationWithdrawalRejected => "destination_withdrawal_rejected",
            FailureKind::LedgerCommunicationError => "ledger_communication_error",
            FailureKind::WithdrawalWindowTimeout => "withdrawal_window_timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "destination_funding_failed" => FailureKind::DestinationFundingFailed,
            "authorization_timeout" => FailureKind::AuthorizationTimeout,
            "source_funding_failed" => FailureKind::SourceFundingFailed,
            "funds_not_locked" => FailureKind::FundsNotLocked,
            "source_withdrawal_rejected" => FailureKind::SourceWithdrawalRejected,
            "destination_withdrawal_rejected" => FailureKind::DestinationWithdrawalRejected,
            "ledger_communication_error" => FailureKind::LedgerCommunicationError,
            "withdrawal_window_timeout" => FailureKind::WithdrawalWindowTimeout,
            _ => return None,
        })
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one swap.
///
/// Each status names the last milestone reached; the work between two
/// statuses is what moves the swap forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Created,
    FundingDestination,
    AwaitingSourceAuthorization,
    FundingSource,
    FundsVerified,
    RevealingOnSource,
    RevealingOnDestination,
    Completed,
    Failed(FailureKind),
    Cancelled,
}

impl SwapStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Failed(_) | SwapStatus::Cancelled
        )
    }

    /// Caller cancellation is ignored from `FundsVerified` onwards
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            SwapStatus::Created
                | SwapStatus::FundingDestination
                | SwapStatus::AwaitingSourceAuthorization
                | SwapStatus::FundingSource
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Created => "created",
            SwapStatus::FundingDestination => "funding_destination",
            SwapStatus::AwaitingSourceAuthorization => "awaiting_source_authorization",
            SwapStatus::FundingSource => "funding_source",
            SwapStatus::FundsVerified => "funds_verified",
            SwapStatus::RevealingOnSource => "revealing_on_source",
            SwapStatus::RevealingOnDestination => "revealing_on_destination",
            SwapStatus::Completed => "completed",
            SwapStatus::Failed(_) => "failed",
            SwapStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapStatus::Failed(kind) => write!(f, "failed({})", kind),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Details recorded alongside `SwapStatus::Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The secret was submitted before the failure and is now public
    pub secret_revealed: bool,
    /// Side whose escrow still needs a manual withdrawal, if any
    pub pending_side: Option<Side>,
}

/// An escrow the ledger reported as created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub address: Address,
    /// Ledger timestamp stamped at creation
    pub deployed_at: u32,
    pub tx_hash: Option<H256>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SWAP STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Persisted state of one swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapState {
    pub key: SwapKey,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,

    pub secret: Secret,
    /// Hashlock value both escrows lock against
    pub hashlock_leaf: H256,
    /// Present for multi-fill orders
    pub proof: Option<FillProof>,
    pub fill_amount: U256,

    /// Immutables as planned; the deployedAt of each is corrected from the
    /// matching escrow record when calls are built
    pub src_immutables: Immutables,
    pub dst_immutables: Immutables,
    /// End recipient when the destination escrow pays an intermediary
    pub forward_to: Option<Address>,

    pub src_escrow: Option<EscrowRecord>,
    pub dst_escrow: Option<EscrowRecord>,
    /// Ledger time recorded just before the first creation attempt on each
    /// side. Set but without an escrow record means the escrow may exist.
    #[serde(default)]
    pub src_submitted_at: Option<u64>,
    #[serde(default)]
    pub dst_submitted_at: Option<u64>,

    pub status: SwapStatus,
    pub failure: Option<SwapFailure>,
    pub secret_revealed: bool,

    /// Bumped on every write
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
}

impl SwapState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: SwapKey,
        chains: (u64, u64),
        secret: Secret,
        hashlock_leaf: H256,
        proof: Option<FillProof>,
        fill_amount: U256,
        src_immutables: Immutables,
        dst_immutables: Immutables,
        now: u64,
    ) -> Self {
        Self {
            key,
            src_chain_id: chains.0,
            dst_chain_id: chains.1,
            secret,
            hashlock_leaf,
            proof,
            fill_amount,
            src_immutables,
            dst_immutables,
            forward_to: None,
            src_escrow: None,
            dst_escrow: None,
            src_submitted_at: None,
            dst_submitted_at: None,
            status: SwapStatus::Created,
            failure: None,
            secret_revealed: false,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn order_hash(&self) -> H256 {
        self.key.order_hash
    }

    pub fn chain_id(&self, side: Side) -> u64 {
        match side {
            Side::Source => self.src_chain_id,
            Side::Destination => self.dst_chain_id,
        }
    }

    pub fn escrow(&self, side: Side) -> Option<&EscrowRecord> {
        match side {
            Side::Source => self.src_escrow.as_ref(),
            Side::Destination => self.dst_escrow.as_ref(),
        }
    }

    pub fn submitted_at(&self, side: Side) -> Option<u64> {
        match side {
            Side::Source => self.src_submitted_at,
            Side::Destination => self.dst_submitted_at,
        }
    }

    pub fn set_submitted_at(&mut self, side: Side, at: u64) {
        match side {
            Side::Source => self.src_submitted_at = Some(at),
            Side::Destination => self.dst_submitted_at = Some(at),
        }
    }

    pub fn planned_immutables(&self, side: Side) -> &Immutables {
        match side {
            Side::Source => &self.src_immutables,
            Side::Destination => &self.dst_immutables,
        }
    }

    /// Immutables matching the deployed escrow, if it exists
    pub fn deployed_immutables(&self, side: Side) -> Option<Immutables> {
        self.escrow(side)
            .map(|record| self.planned_immutables(side).rebase(record.deployed_at))
    }

    pub fn report(&self) -> SwapStatusReport {
        SwapStatusReport {
            key: self.key,
            status: self.status,
            failure: self.failure.clone(),
            src_escrow: self.src_escrow.map(|r| r.address),
            dst_escrow: self.dst_escrow.map(|r| r.address),
            secret_revealed: self.secret_revealed,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// What status queries return; never includes the secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapStatusReport {
    pub key: SwapKey,
    pub status: SwapStatus,
    pub failure: Option<SwapFailure>,
    pub src_escrow: Option<Address>,
    pub dst_escrow: Option<Address>,
    pub secret_revealed: bool,
    pub version: u64,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(SwapStatus::Completed.is_terminal());
        assert!(SwapStatus::Cancelled.is_terminal());
        assert!(SwapStatus::Failed(FailureKind::FundsNotLocked).is_terminal());
        assert!(!SwapStatus::FundsVerified.is_terminal());
    }

    #[test]
    fn test_cancellable_until_funds_verified() {
        assert!(SwapStatus::FundingSource.is_cancellable());
        assert!(!SwapStatus::FundsVerified.is_cancellable());
        assert!(!SwapStatus::RevealingOnSource.is_cancellable());
        assert!(!SwapStatus::Completed.is_cancellable());
    }

    #[test]
    fn test_failure_kind_round_trips_through_str() {
        for kind in [
            FailureKind::DestinationFundingFailed,
            FailureKind::AuthorizationTimeout,
            FailureKind::SourceFundingFailed,
            FailureKind::FundsNotLocked,
            FailureKind::SourceWithdrawalRejected,
            FailureKind::DestinationWithdrawalRejected,
            FailureKind::LedgerCommunicationError,
            FailureKind::WithdrawalWindowTimeout,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("nope"), None);
    }

    #[test]
    fn test_key_display() {
        let key = SwapKey::new(H256::repeat_byte(0xab), 3);
        let rendered = key.to_string();
        assert!(rendered.starts_with("0xabab"));
        assert!(rendered.ends_with("/3"));
    }
}
