use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Hashlock, TimelockError, TimelockOffsets};

/// Denominator of the auction rate bump (1e-7 units)
pub const RATE_BUMP_DENOMINATOR: u64 = 10_000_000;

/// How an order may be filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Exactly one fill for the whole making amount
    Single,
    /// Exactly one fill for any amount up to the making amount
    PartialAllowed,
    /// Several fills, each revealing its own secret from a Merkle commitment
    MultipleFillsAllowed,
}

impl FillPolicy {
    fn code(self) -> u64 {
        match self {
            FillPolicy::Single => 0,
            FillPolicy::PartialAllowed => 1,
            FillPolicy::MultipleFillsAllowed => 2,
        }
    }
}

/// Linear Dutch-auction parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuctionDetails {
    pub start_time: u64,
    pub duration: u64,
    /// Premium on the destination amount at `start_time`, in 1e-7 units
    pub initial_rate_bump: u32,
}

impl AuctionDetails {
    /// Bump in effect at `now`, decaying linearly to zero over `duration`
    pub fn rate_bump_at(&self, now: u64) -> u64 {
        let bump = self.initial_rate_bump as u64;
        let end = self.start_time.saturating_add(self.duration);
        if self.duration == 0 || now >= end {
            0
        } else if now <= self.start_time {
            bump
        } else {
            bump * (end - now) / self.duration
        }
    }
}

/// A resolver admitted to fill the order from `allowed_from` onwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub resolver: Address,
    pub allowed_from: u64,
}

/// Order construction and fill validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("{0} must be positive")]
    ZeroAmount(&'static str),

    #[error("maker must not be the zero address")]
    ZeroMaker,

    #[error("maker asset and taker asset must differ")]
    SameAsset,

    #[error("source and destination chain ids must differ (both {0})")]
    SameChain(u64),

    #[error("inconsistent fill policy: {0}")]
    InconsistentFillPolicy(String),

    #[error(transparent)]
    Timelocks(#[from] TimelockError),

    #[error("fill amount must be positive")]
    ZeroFill,

    #[error("fill of {fill} exceeds remaining {remaining}")]
    FillExceedsRemaining { fill: U256, remaining: U256 },

    #[error("fill policy {0:?} does not permit this fill")]
    FillNotPermitted(FillPolicy),

    #[error("resolver {0:?} is not whitelisted")]
    ResolverNotWhitelisted(Address),

    #[error("secret index {index} out of range for {parts} parts")]
    SecretIndexOutOfRange { index: u32, parts: u32 },

    #[error("amount arithmetic overflows 256 bits for fill of {0}")]
    AmountOverflow(U256),
}

// ═══════════════════════════════════════════════════════════════════════════
// ORDER
// ═══════════════════════════════════════════════════════════════════════════

/// A maker's swap intent. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Uniqueness salt
    pub salt: U256,

    /// Owner of the source funds
    pub maker: Address,

    /// Recipient of the destination funds
    pub receiver: Address,

    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,

    pub fill_policy: FillPolicy,
    pub hashlock: Hashlock,

    pub src_chain_id: u64,
    pub dst_chain_id: u64,

    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,

    pub timelocks: TimelockOffsets,

    pub auction: AuctionDetails,

    /// Empty admits any resolver
    pub whitelist: Vec<WhitelistEntry>,
}

impl Order {
    pub fn builder() -> OrderBuilder {
        OrderBuilder::default()
    }

    /// Binding hash over every field plus the anchoring chain id
    pub fn hash(&self, chain_id: u64) -> H256 {
        order_hash(self, chain_id)
    }

    /// Hash anchored on the source chain, the one escrows are keyed by
    pub fn source_hash(&self) -> H256 {
        order_hash(self, self.src_chain_id)
    }

    pub fn validate(&self) -> Result<(), OrderError> {
        if self.maker.is_zero() {
            return Err(OrderError::ZeroMaker);
        }
        if self.making_amount.is_zero() {
            return Err(OrderError::ZeroAmount("making_amount"));
        }
        if self.taking_amount.is_zero() {
            return Err(OrderError::ZeroAmount("taking_amount"));
        }
        if self.maker_asset == self.taker_asset {
            return Err(OrderError::SameAsset);
        }
        if self.src_chain_id == self.dst_chain_id {
            return Err(OrderError::SameChain(self.src_chain_id));
        }

        match (self.fill_policy, &self.hashlock) {
            (FillPolicy::MultipleFillsAllowed, Hashlock::MultiFill { parts, .. }) if *parts >= 2 => {}
            (FillPolicy::MultipleFillsAllowed, _) => {
                return Err(OrderError::InconsistentFillPolicy(
                    "multiple fills require a multi-fill hashlock with at least 2 parts".to_string(),
                ))
            }
            (_, Hashlock::MultiFill { .. }) => {
                return Err(OrderError::InconsistentFillPolicy(
                    "multi-fill hashlock requires the MultipleFillsAllowed policy".to_string(),
                ))
            }
            _ => {}
        }

        self.timelocks.validate()?;
        Ok(())
    }

    pub fn is_resolver_allowed(&self, resolver: Address, now: u64) -> bool {
        self.whitelist.is_empty()
            || self
                .whitelist
                .iter()
                .any(|entry| entry.resolver == resolver && now >= entry.allowed_from)
    }

    /// Check a fill of `fill_amount` after `filled_before` has already been filled
    pub fn validate_fill(&self, filled_before: U256, fill_amount: U256) -> Result<(), OrderError> {
        if fill_amount.is_zero() {
            return Err(OrderError::ZeroFill);
        }
        let remaining = self.making_amount.saturating_sub(filled_before);
        if fill_amount > remaining {
            return Err(OrderError::FillExceedsRemaining {
                fill: fill_amount,
                remaining,
            });
        }

        match self.fill_policy {
            FillPolicy::Single if !filled_before.is_zero() || fill_amount != self.making_amount => {
                Err(OrderError::FillNotPermitted(self.fill_policy))
            }
            FillPolicy::PartialAllowed if !filled_before.is_zero() => {
                Err(OrderError::FillNotPermitted(self.fill_policy))
            }
            _ => Ok(()),
        }
    }

    /// Leaf index a fill must reveal under a multi-fill commitment.
    ///
    /// With `N` secrets the making amount is split into `N - 1` equal parts;
    /// a fill ending inside part `k` uses secret `k`, and the fill that
    /// completes the order uses the extra last secret.
    pub fn multi_fill_index(&self, filled_before: U256, fill_amount: U256) -> Result<u32, OrderError> {
        let parts = self.hashlock.parts();
        if parts < 2 {
            return Ok(0);
        }
        self.validate_fill(filled_before, fill_amount)?;

        let filled_after = filled_before + fill_amount;
        let segments = U256::from(parts - 1);
        if filled_after == self.making_amount {
            return Ok(parts - 1);
        }
        let index = (filled_after - U256::one())
            .checked_mul(segments)
            .ok_or(OrderError::AmountOverflow(fill_amount))?
            / self.making_amount;
        Ok(index.low_u32())
    }

    /// Destination amount owed for `fill_amount` of the making asset at `now`,
    /// including the auction premium and rounded up in the maker's favour
    pub fn destination_amount(&self, fill_amount: U256, now: u64) -> Result<U256, OrderError> {
        let overflow = || OrderError::AmountOverflow(fill_amount);
        let scaled = self.taking_amount.checked_mul(fill_amount).ok_or_else(overflow)?;
        let base = ceil_div(scaled, self.making_amount).ok_or_else(overflow)?;
        let bump = U256::from(self.auction.rate_bump_at(now));
        let denominator = U256::from(RATE_BUMP_DENOMINATOR);
        let premium = base
            .checked_mul(bump)
            .and_then(|raw| ceil_div(raw, denominator))
            .ok_or_else(overflow)?;
        base.checked_add(premium).ok_or_else(overflow)
    }
}

/// `None` on overflow of the rounding addend
fn ceil_div(numerator: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return Some(U256::zero());
    }
    let rounded = numerator.checked_add(denominator - U256::one())?;
    Some(rounded / denominator)
}

/// Binding hash over every order field plus `chain_id`
pub fn order_hash(order: &Order, chain_id: u64) -> H256 {
    let whitelist = order
        .whitelist
        .iter()
        .map(|entry| {
            Token::Tuple(vec![
                Token::Address(entry.resolver),
                Token::Uint(U256::from(entry.allowed_from)),
            ])
        })
        .collect();

    let offsets = crate::Timelocks::from_offsets_unchecked(&order.timelocks);

    let tokens = [
        Token::Uint(order.salt),
        Token::Address(order.maker),
        Token::Address(order.receiver),
        Token::Address(order.maker_asset),
        Token::Address(order.taker_asset),
        Token::Uint(order.making_amount),
        Token::Uint(order.taking_amount),
        Token::Uint(U256::from(order.fill_policy.code())),
        Token::FixedBytes(order.hashlock.value().as_bytes().to_vec()),
        Token::Uint(U256::from(order.hashlock.parts())),
        Token::Uint(U256::from(order.src_chain_id)),
        Token::Uint(U256::from(order.dst_chain_id)),
        Token::Uint(order.src_safety_deposit),
        Token::Uint(order.dst_safety_deposit),
        Token::Uint(offsets.as_u256()),
        Token::Uint(U256::from(order.auction.start_time)),
        Token::Uint(U256::from(order.auction.duration)),
        Token::Uint(U256::from(order.auction.initial_rate_bump)),
        Token::Array(whitelist),
        Token::Uint(U256::from(chain_id)),
    ];

    H256::from(keccak256(encode(&tokens)))
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`Order`]; `build` runs full validation
#[derive(Default)]
pub struct OrderBuilder {
    salt: Option<U256>,
    maker: Option<Address>,
    receiver: Option<Address>,
    maker_asset: Option<Address>,
    taker_asset: Option<Address>,
    making_amount: Option<U256>,
    taking_amount: Option<U256>,
    fill_policy: Option<FillPolicy>,
    hashlock: Option<Hashlock>,
    src_chain_id: Option<u64>,
    dst_chain_id: Option<u64>,
    src_safety_deposit: U256,
    dst_safety_deposit: U256,
    timelocks: Option<TimelockOffsets>,
    auction: AuctionDetails,
    whitelist: Vec<WhitelistEntry>,
}

impl OrderBuilder {
    pub fn salt(mut self, salt: U256) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn maker(mut self, maker: Address) -> Self {
        self.maker = Some(maker);
        self
    }

    /// Defaults to the maker
    pub fn receiver(mut self, receiver: Address) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn maker_asset(mut self, asset: Address) -> Self {
        self.maker_asset = Some(asset);
        self
    }

    pub fn taker_asset(mut self, asset: Address) -> Self {
        self.taker_asset = Some(asset);
        self
    }

    pub fn making_amount(mut self, amount: impl Into<U256>) -> Self {
        self.making_amount = Some(amount.into());
        self
    }

    pub fn taking_amount(mut self, amount: impl Into<U256>) -> Self {
        self.taking_amount = Some(amount.into());
        self
    }

    pub fn fill_policy(mut self, policy: FillPolicy) -> Self {
        self.fill_policy = Some(policy);
        self
    }

    pub fn hashlock(mut self, hashlock: Hashlock) -> Self {
        self.hashlock = Some(hashlock);
        self
    }

    pub fn chains(mut self, src_chain_id: u64, dst_chain_id: u64) -> Self {
        self.src_chain_id = Some(src_chain_id);
        self.dst_chain_id = Some(dst_chain_id);
        self
    }

    pub fn safety_deposits(mut self, src: impl Into<U256>, dst: impl Into<U256>) -> Self {
        self.src_safety_deposit = src.into();
        self.dst_safety_deposit = dst.into();
        self
    }

    pub fn timelocks(mut self, offsets: TimelockOffsets) -> Self {
        self.timelocks = Some(offsets);
        self
    }

    pub fn auction(mut self, auction: AuctionDetails) -> Self {
        self.auction = auction;
        self
    }

    pub fn whitelist_resolver(mut self, resolver: Address, allowed_from: u64) -> Self {
        self.whitelist.push(WhitelistEntry {
            resolver,
            allowed_from,
        });
        self
    }

    pub fn build(self) -> Result<Order, OrderError> {
        let maker = self.maker.ok_or(OrderError::MissingField("maker"))?;
        let hashlock = self.hashlock.ok_or(OrderError::MissingField("hashlock"))?;
        let fill_policy = self.fill_policy.unwrap_or(if hashlock.is_multi_fill() {
            FillPolicy::MultipleFillsAllowed
        } else {
            FillPolicy::Single
        });

        let order = Order {
            salt: self.salt.unwrap_or_default(),
            maker,
            receiver: self.receiver.unwrap_or(maker),
            maker_asset: self
                .maker_asset
                .ok_or(OrderError::MissingField("maker_asset"))?,
            taker_asset: self
                .taker_asset
                .ok_or(OrderError::MissingField("taker_asset"))?,
            making_amount: self
                .making_amount
                .ok_or(OrderError::MissingField("making_amount"))?,
            taking_amount: self
                .taking_amount
                .ok_or(OrderError::MissingField("taking_amount"))?,
            fill_policy,
            hashlock,
            src_chain_id: self
                .src_chain_id
                .ok_or(OrderError::MissingField("src_chain_id"))?,
            dst_chain_id: self
                .dst_chain_id
                .ok_or(OrderError::MissingField("dst_chain_id"))?,
            src_safety_deposit: self.src_safety_deposit,
            dst_safety_deposit: self.dst_safety_deposit,
            timelocks: self.timelocks.unwrap_or_default(),
            auction: self.auction,
            whitelist: self.whitelist,
        };

        order.validate()?;
        Ok(order)
    }
}
