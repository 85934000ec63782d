use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STAGE_BITS: usize = 32;
const DEPLOYED_AT_SHIFT: usize = 224;

/// Timelock validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimelockError {
    #[error("invalid timelock ordering: {0}")]
    InvalidOrdering(String),

    #[error("timestamp {0} does not fit the 32-bit deployedAt field")]
    TimestampOverflow(u64),
}

/// One of the seven deadlines packed into [`Timelocks`].
///
/// The discriminant is the stage's slot in the packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SrcWithdrawal = 0,
    SrcPublicWithdrawal = 1,
    SrcCancellation = 2,
    SrcPublicCancellation = 3,
    DstWithdrawal = 4,
    DstPublicWithdrawal = 5,
    DstCancellation = 6,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::SrcWithdrawal,
        Stage::SrcPublicWithdrawal,
        Stage::SrcCancellation,
        Stage::SrcPublicCancellation,
        Stage::DstWithdrawal,
        Stage::DstPublicWithdrawal,
        Stage::DstCancellation,
    ];

    fn shift(self) -> usize {
        self as usize * STAGE_BITS
    }
}

/// Relative deadlines, in seconds after the escrow's deployedAt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockOffsets {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl TimelockOffsets {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::SrcWithdrawal => self.src_withdrawal,
            Stage::SrcPublicWithdrawal => self.src_public_withdrawal,
            Stage::SrcCancellation => self.src_cancellation,
            Stage::SrcPublicCancellation => self.src_public_cancellation,
            Stage::DstWithdrawal => self.dst_withdrawal,
            Stage::DstPublicWithdrawal => self.dst_public_withdrawal,
            Stage::DstCancellation => self.dst_cancellation,
        }
    }

    /// Check per-side ordering and that the destination escrow cannot
    /// outlive the source cancellation window
    pub fn validate(&self) -> Result<(), TimelockError> {
        let src = [
            ("src_withdrawal", self.src_withdrawal),
            ("src_public_withdrawal", self.src_public_withdrawal),
            ("src_cancellation", self.src_cancellation),
            ("src_public_cancellation", self.src_public_cancellation),
        ];
        let dst = [
            ("dst_withdrawal", self.dst_withdrawal),
            ("dst_public_withdrawal", self.dst_public_withdrawal),
            ("dst_cancellation", self.dst_cancellation),
        ];

        for side in [&src[..], &dst[..]] {
            for pair in side.windows(2) {
                let (earlier, a) = pair[0];
                let (later, b) = pair[1];
                if a > b {
                    return Err(TimelockError::InvalidOrdering(format!(
                        "{} ({}) must not exceed {} ({})",
                        earlier, a, later, b
                    )));
                }
            }
        }

        if self.dst_cancellation > self.src_cancellation {
            return Err(TimelockError::InvalidOrdering(format!(
                "dst_cancellation ({}) must not exceed src_cancellation ({})",
                self.dst_cancellation, self.src_cancellation
            )));
        }

        Ok(())
    }
}

impl Default for TimelockOffsets {
    fn default() -> Self {
        Self {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 121,
            src_public_cancellation: 122,
            dst_withdrawal: 10,
            dst_public_withdrawal: 100,
            dst_cancellation: 101,
        }
    }
}

/// Seven relative deadlines and the deployment timestamp, packed into one
/// 256-bit word exactly as the escrow contracts store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timelocks(U256);

impl Timelocks {
    /// Pack validated offsets with `deployed_at`
    pub fn encode(offsets: &TimelockOffsets, deployed_at: u32) -> Result<Self, TimelockError> {
        offsets.validate()?;
        Ok(Self(Self::pack(offsets, deployed_at)))
    }

    /// Pack without ordering checks and with a zero deployedAt.
    /// Used for hashing order terms.
    pub fn from_offsets_unchecked(offsets: &TimelockOffsets) -> Self {
        Self(Self::pack(offsets, 0))
    }

    fn pack(offsets: &TimelockOffsets, deployed_at: u32) -> U256 {
        let mut packed = U256::from(deployed_at) << DEPLOYED_AT_SHIFT;
        for stage in Stage::ALL {
            packed = packed | (U256::from(offsets.get(stage)) << stage.shift());
        }
        packed
    }

    /// Same offsets, different deployment timestamp
    pub fn rebase(&self, deployed_at: u32) -> Self {
        let low_mask = (U256::one() << DEPLOYED_AT_SHIFT) - U256::one();
        Self((self.0 & low_mask) | (U256::from(deployed_at) << DEPLOYED_AT_SHIFT))
    }

    pub fn deployed_at(&self) -> u32 {
        (self.0 >> DEPLOYED_AT_SHIFT).low_u32()
    }

    pub fn offset(&self, stage: Stage) -> u32 {
        (self.0 >> stage.shift()).low_u32()
    }

    pub fn offsets(&self) -> TimelockOffsets {
        TimelockOffsets {
            src_withdrawal: self.offset(Stage::SrcWithdrawal),
            src_public_withdrawal: self.offset(Stage::SrcPublicWithdrawal),
            src_cancellation: self.offset(Stage::SrcCancellation),
            src_public_cancellation: self.offset(Stage::SrcPublicCancellation),
            dst_withdrawal: self.offset(Stage::DstWithdrawal),
            dst_public_withdrawal: self.offset(Stage::DstPublicWithdrawal),
            dst_cancellation: self.offset(Stage::DstCancellation),
        }
    }

    /// Absolute unix time at which `stage` opens
    pub fn deadline(&self, stage: Stage) -> u64 {
        self.deployed_at() as u64 + self.offset(stage) as u64
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn from_u256(value: U256) -> Self {
        Self(value)
    }
}

/// Narrow a ledger timestamp to the 32-bit deployedAt field
pub fn deployed_at_from_unix(timestamp: u64) -> Result<u32, TimelockError> {
    u32::try_from(timestamp).map_err(|_| TimelockError::TimestampOverflow(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets() -> TimelockOffsets {
        TimelockOffsets {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 300,
            src_public_cancellation: 400,
            dst_withdrawal: 5,
            dst_public_withdrawal: 100,
            dst_cancellation: 250,
        }
    }

    #[test]
    fn test_encode_decode_offsets() {
        let timelocks = Timelocks::encode(&offsets(), 1_700_000_000).unwrap();
        assert_eq!(timelocks.offsets(), offsets());
        assert_eq!(timelocks.deployed_at(), 1_700_000_000);
    }

    #[test]
    fn test_packed_layout() {
        let timelocks = Timelocks::encode(&offsets(), 1).unwrap();
        let word = timelocks.as_u256();
        assert_eq!((word >> 64).low_u32(), 300);
        assert_eq!((word >> 192).low_u32(), 250);
        assert_eq!((word >> 224).low_u32(), 1);
    }

    #[test]
    fn test_rebase_preserves_offsets() {
        let timelocks = Timelocks::encode(&offsets(), 1_000).unwrap();
        let rebased = timelocks.rebase(2_000);

        assert_eq!(rebased.offsets(), timelocks.offsets());
        assert_eq!(rebased.deployed_at(), 2_000);
        assert_eq!(rebased.deadline(Stage::SrcWithdrawal), 2_010);
        assert_eq!(rebased.rebase(1_000), timelocks);
    }

    #[test]
    fn test_deadline_is_deployed_at_plus_offset() {
        let timelocks = Timelocks::encode(&offsets(), 5_000).unwrap();
        for stage in Stage::ALL {
            assert_eq!(
                timelocks.deadline(stage),
                5_000 + offsets().get(stage) as u64
            );
        }
    }

    #[test]
    fn test_source_ordering_violation() {
        let mut bad = offsets();
        bad.src_public_withdrawal = 301;
        let err = Timelocks::encode(&bad, 0).unwrap_err();
        assert!(matches!(err, TimelockError::InvalidOrdering(msg) if msg.contains("src_public_withdrawal")));
    }

    #[test]
    fn test_destination_ordering_violation() {
        let mut bad = offsets();
        bad.dst_withdrawal = 101;
        assert!(Timelocks::encode(&bad, 0).is_err());
    }

    #[test]
    fn test_destination_must_cancel_before_source() {
        let mut bad = offsets();
        bad.dst_cancellation = 301;
        bad.src_public_cancellation = 400;
        assert!(matches!(
            bad.validate(),
            Err(TimelockError::InvalidOrdering(msg)) if msg.contains("dst_cancellation")
        ));
    }

    #[test]
    fn test_equal_offsets_are_allowed() {
        let flat = TimelockOffsets {
            src_withdrawal: 60,
            src_public_withdrawal: 60,
            src_cancellation: 60,
            src_public_cancellation: 60,
            dst_withdrawal: 60,
            dst_public_withdrawal: 60,
            dst_cancellation: 60,
        };
        assert!(Timelocks::encode(&flat, 0).is_ok());
        assert!(TimelockOffsets::default().validate().is_ok());
    }

    #[test]
    fn test_deployed_at_overflow() {
        assert_eq!(deployed_at_from_unix(42), Ok(42));
        assert!(deployed_at_from_unix(u64::from(u32::MAX) + 1).is_err());
    }
}
