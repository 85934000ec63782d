pub mod commitment;
pub mod error;
pub mod immutables;
pub mod order;
pub mod swap;
pub mod timelock;

pub use commitment::*;
pub use error::*;
pub use immutables::*;
pub use order::*;
pub use swap::*;
pub use timelock::*;

/// Primitive ledger types re-exported so downstream crates share one version
pub use ethers::types::{Address, H256, U256};

pub const PROTOCOL_VERSION: &str = "1.0";
