//! Swap orchestration: drives one fill of an order through escrow creation
//! on both ledgers, funding checks and the two secret-revealing withdrawals.
//!
//! - `LedgerClient`: per-ledger escrow, balance and clock calls
//! - `SwapOrchestrator`: the per-swap state machine, persisted through a
//!   `SwapRegistry` after every milestone
//! - `SwapRunner`: one task per swap with bounded concurrency and
//!   cancellation
//! - `MockLedger`: in-memory ledger for tests

pub mod config;
pub mod error;
pub mod ledger;
pub mod mock;
pub mod orchestrator;
pub mod runner;

#[cfg(test)]
mod tests;

// Re-export main types
pub use config::{escrow_factories, open_registry, OrchestratorConfig};
pub use error::OrchestratorError;
pub use ledger::{EscrowReceipt, LedgerClient, LedgerError, LedgerOp};
pub use mock::{MockCall, MockEscrow, MockEscrowStatus, MockLedger};
pub use orchestrator::{FillRequest, LedgerBinding, SwapOrchestrator, SwapOrchestratorBuilder};
pub use runner::{SwapHandle, SwapRunner};
