use std::fmt;

use ethers::types::H256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of secrets generated for a multi-fill order unless configured otherwise
pub const DEFAULT_MULTI_FILL_PARTS: u32 = 11;

/// Errors raised while generating or assembling order secrets
#[derive(Debug, Error, PartialEq)]
pub enum CommitmentError {
    #[error("entropy source unavailable: {0}")]
    Entropy(String),

    #[error("multi-fill requires at least 2 secrets, got {0}")]
    TooFewSecrets(usize),

    #[error("no secrets supplied")]
    Empty,

    #[error("multi-fill supports at most {max} secrets, got {0}", max = u32::MAX)]
    TooManySecrets(usize),
}

// ═══════════════════════════════════════════════════════════════════════════
// SECRETS
// ═══════════════════════════════════════════════════════════════════════════

/// 32 random bytes known only to the swap initiator until reveal.
///
/// Once submitted to either ledger the value is public and must never be
/// reused for another order or fill. `Debug` is redacted so secrets do not
/// end up in structured logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret(H256);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(H256::from(bytes))
    }

    pub fn as_h256(&self) -> H256 {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Keccak-256 of the raw secret bytes
    pub fn hash(&self) -> H256 {
        hash_secret(self)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Draw a fresh secret from the operating system CSPRNG
pub fn generate_secret() -> Result<Secret, CommitmentError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| CommitmentError::Entropy(e.to_string()))?;
    Ok(Secret::from_bytes(bytes))
}

/// Hash a secret the way the escrow contracts do (keccak-256)
pub fn hash_secret(secret: &Secret) -> H256 {
    H256::from(keccak256(secret.as_bytes()))
}

/// Leaf committed for fill `index` of a multi-fill order.
///
/// The leaf binds the index, so a secret revealed for one fill cannot be
/// replayed against a different position in the tree.
pub fn fill_leaf(index: u64, secret_hash: H256) -> H256 {
    let mut buf = [0u8; 40];
    buf[..8].copy_from_slice(&index.to_be_bytes());
    buf[8..].copy_from_slice(secret_hash.as_bytes());
    H256::from(keccak256(buf))
}

// ═══════════════════════════════════════════════════════════════════════════
// MERKLE TREE
// ═══════════════════════════════════════════════════════════════════════════

/// Merkle tree over multi-fill leaves.
///
/// Interior nodes hash the sorted pair of their children, so proofs carry no
/// direction bits. An unpaired node at the end of a level is promoted as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleTree {
    levels: Vec<Vec<H256>>,
}

impl MerkleTree {
    pub fn root(&self) -> H256 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn leaf(&self, index: usize) -> Option<H256> {
        self.levels.first().and_then(|leaves| leaves.get(index)).copied()
    }
}

fn hash_pair(a: H256, b: H256) -> H256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_bytes());
    buf[32..].copy_from_slice(hi.as_bytes());
    H256::from(keccak256(buf))
}

/// Build a tree over `leaves` and return its root alongside it.
///
/// # Panics
/// Panics when `leaves` is empty; callers size the tree at order creation.
pub fn build_merkle(leaves: &[H256]) -> (H256, MerkleTree) {
    assert!(!leaves.is_empty(), "cannot build a merkle tree without leaves");

    let mut levels = vec![leaves.to_vec()];
    while let Some(level) = levels.last().filter(|level| level.len() > 1) {
        let next: Vec<H256> = level
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => hash_pair(*a, *b),
                [a] => *a,
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect();
        levels.push(next);
    }

    let tree = MerkleTree { levels };
    (tree.root(), tree)
}

/// Sibling path from leaf `index` up to the root.
///
/// # Panics
/// Panics when `index` is outside the tree. Choosing a leaf that does not
/// exist is a bug in the caller, not a runtime condition.
pub fn prove(tree: &MerkleTree, index: usize) -> Vec<H256> {
    assert!(
        index < tree.leaf_count(),
        "leaf index {} out of range for tree with {} leaves",
        index,
        tree.leaf_count()
    );

    let mut proof = Vec::with_capacity(tree.levels.len().saturating_sub(1));
    let mut idx = index;
    for level in &tree.levels[..tree.levels.len() - 1] {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            proof.push(level[sibling]);
        }
        idx /= 2;
    }
    proof
}

/// Check that `proof` links `leaf` to `root`
pub fn verify_proof(root: H256, leaf: H256, proof: &[H256]) -> bool {
    proof.iter().fold(leaf, |acc, sibling| hash_pair(acc, *sibling)) == root
}

// ═══════════════════════════════════════════════════════════════════════════
// HASHLOCK
// ═══════════════════════════════════════════════════════════════════════════

/// The commitment escrows are locked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hashlock {
    /// Hash of exactly one secret
    Single(H256),
    /// Merkle root over `parts` index-bound leaves
    MultiFill { root: H256, parts: u32 },
}

impl Hashlock {
    /// The 32-byte value written into the order and the escrow immutables
    pub fn value(&self) -> H256 {
        match self {
            Hashlock::Single(hash) => *hash,
            Hashlock::MultiFill { root, .. } => *root,
        }
    }

    pub fn is_multi_fill(&self) -> bool {
        matches!(self, Hashlock::MultiFill { .. })
    }

    /// Number of secrets behind the commitment
    pub fn parts(&self) -> u32 {
        match self {
            Hashlock::Single(_) => 1,
            Hashlock::MultiFill { parts, .. } => *parts,
        }
    }
}

/// Proof material that accompanies a multi-fill withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillProof {
    pub index: u32,
    pub proof: Vec<H256>,
}

/// Check a secret (and proof, for multi-fill) against an order hashlock
pub fn verify_fill(hashlock: &Hashlock, secret: &Secret, proof: Option<&FillProof>) -> bool {
    match (hashlock, proof) {
        (Hashlock::Single(hash), None) => hash_secret(secret) == *hash,
        (Hashlock::MultiFill { root, parts }, Some(fill)) => {
            fill.index < *parts
                && verify_proof(
                    *root,
                    fill_leaf(fill.index as u64, hash_secret(secret)),
                    &fill.proof,
                )
        }
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORDER SECRETS
// ═══════════════════════════════════════════════════════════════════════════

/// Everything the initiator needs to reveal one fill
#[derive(Debug, Clone, PartialEq)]
pub struct FillMaterial {
    pub index: u32,
    pub secret: Secret,
    /// Present only for multi-fill orders
    pub proof: Option<FillProof>,
}

/// Secrets generated for one order together with the derived commitment
#[derive(Debug, Clone)]
pub struct OrderSecrets {
    secrets: Vec<Secret>,
    tree: Option<MerkleTree>,
    hashlock: Hashlock,
}

/// Number of Merkle leaves as carried in the hashlock
fn part_count(secrets: usize) -> Result<u32, CommitmentError> {
    u32::try_from(secrets).map_err(|_| CommitmentError::TooManySecrets(secrets))
}

impl OrderSecrets {
    /// One secret, single-fill hashlock
    pub fn single() -> Result<Self, CommitmentError> {
        Self::from_secrets(vec![generate_secret()?])
    }

    /// `parts` fresh secrets. `parts == 1` degenerates to single-fill.
    pub fn multi_fill(parts: u32) -> Result<Self, CommitmentError> {
        let secrets = (0..parts)
            .map(|_| generate_secret())
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_secrets(secrets)
    }

    /// Assemble from caller-provided secrets (index order is significant)
    pub fn from_secrets(secrets: Vec<Secret>) -> Result<Self, CommitmentError> {
        match secrets.len() {
            0 => Err(CommitmentError::Empty),
            1 => {
                let hashlock = Hashlock::Single(hash_secret(&secrets[0]));
                Ok(Self {
                    secrets,
                    tree: None,
                    hashlock,
                })
            }
            n => {
                let parts = part_count(n)?;
                let leaves: Vec<H256> = secrets
                    .iter()
                    .enumerate()
                    .map(|(i, s)| fill_leaf(i as u64, hash_secret(s)))
                    .collect();
                let (root, tree) = build_merkle(&leaves);
                Ok(Self {
                    secrets,
                    tree: Some(tree),
                    hashlock: Hashlock::MultiFill { root, parts },
                })
            }
        }
    }

    pub fn hashlock(&self) -> Hashlock {
        self.hashlock
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Hash-of-secret for every index, in index order
    pub fn secret_hashes(&self) -> Vec<H256> {
        self.secrets.iter().map(hash_secret).collect()
    }

    /// Fill material for `index`, or `None` if no such secret exists
    pub fn fill(&self, index: u32) -> Option<FillMaterial> {
        let secret = self.secrets.get(index as usize)?.clone();
        let proof = self.tree.as_ref().map(|tree| FillProof {
            index,
            proof: prove(tree, index as usize),
        });
        Some(FillMaterial {
            index,
            secret,
            proof,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(n: u8) -> Vec<Secret> {
        (0..n).map(|i| Secret::from_bytes([i + 1; 32])).collect()
    }

    fn leaves(n: u8) -> Vec<H256> {
        secrets(n)
            .iter()
            .enumerate()
            .map(|(i, s)| fill_leaf(i as u64, s.hash()))
            .collect()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let secret = Secret::from_bytes([7u8; 32]);
        assert_eq!(hash_secret(&secret), hash_secret(&secret.clone()));
        assert_ne!(
            hash_secret(&secret),
            hash_secret(&Secret::from_bytes([8u8; 32]))
        );
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate_secret().unwrap();
        let b = generate_secret().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::from_bytes([0xab; 32]);
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("abab"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_prove_and_verify_every_index() {
        for n in 1..=12u8 {
            let leaves = leaves(n);
            let (root, tree) = build_merkle(&leaves);
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = prove(&tree, i);
                assert!(verify_proof(root, *leaf, &proof), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_single_leaf_tree_root_is_leaf() {
        let leaves = leaves(1);
        let (root, tree) = build_merkle(&leaves);
        assert_eq!(root, leaves[0]);
        assert!(prove(&tree, 0).is_empty());
    }

    #[test]
    fn test_bit_flipped_proof_fails() {
        let leaves = leaves(11);
        let (root, tree) = build_merkle(&leaves);
        let proof = prove(&tree, 5);

        for element in 0..proof.len() {
            for bit in [0usize, 77, 255] {
                let mut tampered = proof.clone();
                tampered[element].0[bit / 8] ^= 1 << (bit % 8);
                assert!(!verify_proof(root, leaves[5], &tampered));
            }
        }
    }

    #[test]
    fn test_proof_for_wrong_index_fails() {
        let leaves = leaves(11);
        let (root, tree) = build_merkle(&leaves);
        let proof = prove(&tree, 5);
        assert!(!verify_proof(root, leaves[6], &proof));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_prove_out_of_range_panics() {
        let (_, tree) = build_merkle(&leaves(4));
        prove(&tree, 4);
    }

    #[test]
    fn test_order_secrets_single_degenerates() {
        let bundle = OrderSecrets::from_secrets(secrets(1)).unwrap();
        assert!(!bundle.hashlock().is_multi_fill());
        let fill = bundle.fill(0).unwrap();
        assert!(fill.proof.is_none());
        assert!(verify_fill(&bundle.hashlock(), &fill.secret, None));
    }

    #[test]
    fn test_order_secrets_multi_fill() {
        let bundle = OrderSecrets::multi_fill(DEFAULT_MULTI_FILL_PARTS).unwrap();
        assert_eq!(bundle.hashlock().parts(), 11);
        for index in 0..11 {
            let fill = bundle.fill(index).unwrap();
            assert!(verify_fill(&bundle.hashlock(), &fill.secret, fill.proof.as_ref()));
        }
        assert!(bundle.fill(11).is_none());
    }

    #[test]
    fn test_verify_fill_rejects_secret_from_other_index() {
        let bundle = OrderSecrets::from_secrets(secrets(11)).unwrap();
        let five = bundle.fill(5).unwrap();
        let six = bundle.fill(6).unwrap();
        assert!(!verify_fill(&bundle.hashlock(), &six.secret, five.proof.as_ref()));
        assert!(!verify_fill(&bundle.hashlock(), &five.secret, None));
    }

    #[test]
    fn test_empty_secrets_rejected() {
        assert_eq!(
            OrderSecrets::from_secrets(vec![]).unwrap_err(),
            CommitmentError::Empty
        );
    }

    #[test]
    fn test_part_count_bounds() {
        assert_eq!(part_count(2).unwrap(), 2);
        assert_eq!(part_count(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_part_count_overflow_is_too_many() {
        let count = u32::MAX as usize + 1;
        assert_eq!(
            part_count(count).unwrap_err(),
            CommitmentError::TooManySecrets(count)
        );
        assert_eq!(
            part_count(usize::MAX).unwrap_err(),
            CommitmentError::TooManySecrets(usize::MAX)
        );
    }
}
