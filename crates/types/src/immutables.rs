use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Order, OrderError, Stage, Timelocks};

/// EIP-1167 minimal proxy creation code, split around the implementation address
const PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// Errors for malformed escrow parameters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImmutablesError {
    #[error("invalid immutables: {0} must not be zero")]
    ZeroField(&'static str),

    #[error("invalid immutables: amount must be positive")]
    ZeroAmount,

    #[error("invalid immutables: {0}")]
    Amount(#[from] OrderError),
}

/// Which ledger of the swap an escrow lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Destination => "destination",
        }
    }

    /// Stage after which the escrow may be cancelled by its owner
    pub fn cancellation_stage(&self) -> Stage {
        match self {
            Side::Source => Stage::SrcCancellation,
            Side::Destination => Stage::DstCancellation,
        }
    }

    /// Stage after which the taker may withdraw with the secret
    pub fn withdrawal_stage(&self) -> Stage {
        match self {
            Side::Source => Stage::SrcWithdrawal,
            Side::Destination => Stage::DstWithdrawal,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters an escrow is created with; their hash salts the escrow address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immutables {
    pub order_hash: H256,
    /// Hash of the secret (single fill) or the index-bound leaf (multi-fill)
    pub hashlock: H256,
    pub maker: Address,
    pub taker: Address,
    /// Zero address means the ledger's native asset
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub timelocks: Timelocks,
}

impl Immutables {
    pub fn validate(&self) -> Result<(), ImmutablesError> {
        if self.order_hash.is_zero() {
            return Err(ImmutablesError::ZeroField("order_hash"));
        }
        if self.hashlock.is_zero() {
            return Err(ImmutablesError::ZeroField("hashlock"));
        }
        if self.maker.is_zero() {
            return Err(ImmutablesError::ZeroField("maker"));
        }
        if self.taker.is_zero() {
            return Err(ImmutablesError::ZeroField("taker"));
        }
        if self.amount.is_zero() {
            return Err(ImmutablesError::ZeroAmount);
        }
        Ok(())
    }

    /// ABI encoding as eight 32-byte words
    pub fn encode(&self) -> Vec<u8> {
        encode(&[
            Token::FixedBytes(self.order_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.hashlock.as_bytes().to_vec()),
            Token::Address(self.maker),
            Token::Address(self.taker),
            Token::Address(self.token),
            Token::Uint(self.amount),
            Token::Uint(self.safety_deposit),
            Token::Uint(self.timelocks.as_u256()),
        ])
    }

    pub fn hash(&self) -> H256 {
        H256::from(keccak256(self.encode()))
    }

    /// Copy with a corrected deployment timestamp; `self` is left untouched
    pub fn rebase(&self, deployed_at: u32) -> Self {
        Self {
            timelocks: self.timelocks.rebase(deployed_at),
            ..self.clone()
        }
    }

    pub fn is_native(&self) -> bool {
        self.token.is_zero()
    }

    /// Minimum balance of `token` the escrow must hold once funded
    pub fn required_balance(&self) -> U256 {
        if self.is_native() {
            self.amount + self.safety_deposit
        } else {
            self.amount
        }
    }

    pub fn deadline(&self, stage: Stage) -> u64 {
        self.timelocks.deadline(stage)
    }
}

/// Derive the immutables for one side of a fill.
///
/// The source side locks the maker's asset for `fill_amount`; the destination
/// side locks the taker asset for the resolver's counter-amount, priced at
/// the planned deployment time.
pub fn to_side_immutables(
    order: &Order,
    side: Side,
    counterpart: Address,
    fill_amount: U256,
    hashlock_leaf: H256,
    timelocks: Timelocks,
) -> Result<Immutables, ImmutablesError> {
    let immutables = match side {
        Side::Source => Immutables {
            order_hash: order.source_hash(),
            hashlock: hashlock_leaf,
            maker: order.maker,
            taker: counterpart,
            token: order.maker_asset,
            amount: fill_amount,
            safety_deposit: order.src_safety_deposit,
            timelocks,
        },
        Side::Destination => Immutables {
            order_hash: order.source_hash(),
            hashlock: hashlock_leaf,
            maker: order.receiver,
            taker: counterpart,
            token: order.taker_asset,
            amount: order.destination_amount(fill_amount, timelocks.deployed_at() as u64)?,
            safety_deposit: order.dst_safety_deposit,
            timelocks,
        },
    };
    immutables.validate()?;
    Ok(immutables)
}

// ═══════════════════════════════════════════════════════════════════════════
// ADDRESS RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════

/// Factory and implementation contracts deployed on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowFactory {
    pub address: Address,
    pub src_implementation: Address,
    pub dst_implementation: Address,
}

impl EscrowFactory {
    pub fn implementation(&self, side: Side) -> Address {
        match side {
            Side::Source => self.src_implementation,
            Side::Destination => self.dst_implementation,
        }
    }

    pub fn escrow_address(&self, side: Side, immutables: &Immutables) -> Result<Address, ImmutablesError> {
        resolve_address(self.address, self.implementation(side), immutables)
    }
}

/// keccak256 of the minimal-proxy creation code for `implementation`
pub fn proxy_bytecode_hash(implementation: Address) -> H256 {
    let mut code = Vec::with_capacity(PROXY_PREFIX.len() + 20 + PROXY_SUFFIX.len());
    code.extend_from_slice(&PROXY_PREFIX);
    code.extend_from_slice(implementation.as_bytes());
    code.extend_from_slice(&PROXY_SUFFIX);
    H256::from(keccak256(code))
}

/// Deterministic escrow address: CREATE2 from the factory, salted with the
/// immutables hash. Pure; the ledger is only used to confirm it.
pub fn resolve_address(
    factory: Address,
    implementation: Address,
    immutables: &Immutables,
) -> Result<Address, ImmutablesError> {
    immutables.validate()?;
    Ok(get_create2_address_from_hash(
        factory,
        immutables.hash().as_bytes(),
        proxy_bytecode_hash(implementation).as_bytes(),
    ))
}
