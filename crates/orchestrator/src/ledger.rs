use async_trait::async_trait;
use fusion_htlc_retry::{ResourceBudget, Retryable};
use fusion_htlc_types::{Address, EscrowRecord, FillProof, Immutables, Secret, Side, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Calls a swap makes against one ledger; used as metric labels and for
/// fault injection in [`crate::MockLedger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    BlockTimestamp,
    CreateSourceEscrow,
    CreateDestinationEscrow,
    Withdraw,
    Cancel,
    ReadBalance,
    ReadAllowance,
    ComputeEscrowAddress,
    Transfer,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::BlockTimestamp => "block_timestamp",
            LedgerOp::CreateSourceEscrow => "create_source_escrow",
            LedgerOp::CreateDestinationEscrow => "create_destination_escrow",
            LedgerOp::Withdraw => "withdraw",
            LedgerOp::Cancel => "cancel",
            LedgerOp::ReadBalance => "read_balance",
            LedgerOp::ReadAllowance => "read_allowance",
            LedgerOp::ComputeEscrowAddress => "compute_escrow_address",
            LedgerOp::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the ledger reports after creating an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowReceipt {
    pub address: Address,
    /// Block timestamp the escrow stamped into its timelocks
    pub deployed_at: u32,
    pub tx_hash: H256,
}

impl From<EscrowReceipt> for EscrowRecord {
    fn from(receipt: EscrowReceipt) -> Self {
        EscrowRecord {
            address: receipt.address,
            deployed_at: receipt.deployed_at,
            tx_hash: Some(receipt.tx_hash),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Node unreachable, timed out, dropped transaction
    #[error("transport error: {0}")]
    Transport(String),

    #[error("out of resources with budget {budget}")]
    OutOfResources { budget: u64 },

    /// The ledger refused the call; repeating it will not help
    #[error("rejected: {0}")]
    Rejected(String),

    /// An escrow with these immutables is already deployed at this address
    #[error("escrow {0:#x} already exists")]
    AlreadyExists(Address),
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        !matches!(self, LedgerError::Rejected(_) | LedgerError::AlreadyExists(_))
    }

    fn needs_more_resources(&self) -> bool {
        matches!(self, LedgerError::OutOfResources { .. })
    }
}

/// Client for one ledger's escrow factory and token contracts.
///
/// Every method is a suspension point. Implementations may serialise calls
/// internally (one signer, one nonce sequence).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Latest block time in unix seconds; each ledger keeps its own clock
    async fn block_timestamp(&self) -> Result<u64, LedgerError>;

    async fn create_source_escrow(
        &self,
        immutables: &Immutables,
        deposit: U256,
        budget: ResourceBudget,
    ) -> Result<EscrowReceipt, LedgerError>;

    /// `src_cancellation_deadline` bounds the destination escrow's own
    /// cancellation deadline
    async fn create_destination_escrow(
        &self,
        immutables: &Immutables,
        src_cancellation_deadline: u64,
        deposit: U256,
        budget: ResourceBudget,
    ) -> Result<EscrowReceipt, LedgerError>;

    async fn withdraw(
        &self,
        escrow: Address,
        secret: &Secret,
        immutables: &Immutables,
        proof: Option<&FillProof>,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError>;

    async fn cancel(
        &self,
        escrow: Address,
        immutables: &Immutables,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError>;

    /// Balance of `asset` held by `address`; the zero asset is the native coin
    async fn read_balance(&self, address: Address, asset: Address) -> Result<U256, LedgerError>;

    async fn read_allowance(
        &self,
        owner: Address,
        spender: Address,
        asset: Address,
    ) -> Result<U256, LedgerError>;

    /// Address the factory derives for `immutables`, deployedAt included
    async fn compute_escrow_address(
        &self,
        side: Side,
        immutables: &Immutables,
    ) -> Result<Address, LedgerError>;

    /// Move funds held by the signer; used to forward destination proceeds
    /// received by an intermediary
    async fn transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError>;
}
