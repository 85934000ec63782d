use async_trait::async_trait;
use fusion_htlc_types::{SwapKey, SwapState, SwapStatus, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::RegistryError;

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// One recorded status change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from_status: SwapStatus,
    pub to_status: SwapStatus,
    pub timestamp: u64,
    pub details: Option<String>,
    pub tx_hash: Option<H256>,
}

impl StateTransition {
    pub fn new(from_status: SwapStatus, to_status: SwapStatus, timestamp: u64) -> Self {
        Self {
            from_status,
            to_status,
            timestamp,
            details: None,
            tx_hash: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<H256>) -> Self {
        self.tx_hash = tx_hash;
        self
    }
}

/// Every fill ever accepted for one order, including those whose swap
/// record has since been acknowledged or purged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpentFills {
    pub filled_amount: U256,
    /// Fill indices whose secret has been handed to a swap, ascending
    pub indices: Vec<u32>,
}

impl SpentFills {
    pub fn contains(&self, fill_index: u32) -> bool {
        self.indices.binary_search(&fill_index).is_ok()
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (u32, U256)>) -> Self {
        let mut spent = Self::default();
        for (index, amount) in entries {
            spent.filled_amount = spent.filled_amount.saturating_add(amount);
            spent.indices.push(index);
        }
        spent.indices.sort_unstable();
        spent
    }
}

/// Wall-clock unix seconds
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Terminal record whose retention window has passed
pub(crate) fn is_expired_at(state: &SwapState, now: u64, retention_secs: u64) -> bool {
    state.status.is_terminal()
        && state
            .completed_at
            .unwrap_or(state.updated_at)
            .saturating_add(retention_secs)
            <= now
}

// ═══════════════════════════════════════════════════════════════════════════
// REGISTRY TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Swap state storage shared by every running swap.
///
/// Each swap has a single writer (its orchestrator task); other callers only
/// read. `put` is last-writer-wins, `compare_and_swap` rejects stale writes.
/// Both store the record with its version bumped and return what was stored.
#[async_trait]
pub trait SwapRegistry: Send + Sync {
    /// Store a new swap and mark its fill spent. Fails with `DuplicateId` if
    /// the key exists or was ever spent, even after acknowledge or purge.
    async fn insert(&self, state: &SwapState) -> Result<(), RegistryError>;

    async fn get(&self, key: &SwapKey) -> Result<Option<SwapState>, RegistryError>;

    /// Overwrite an existing swap unconditionally
    async fn put(&self, state: &SwapState) -> Result<SwapState, RegistryError>;

    /// Overwrite only if the stored version equals `expected_version`
    async fn compare_and_swap(
        &self,
        state: &SwapState,
        expected_version: u64,
    ) -> Result<SwapState, RegistryError>;

    /// Every fill recorded for an order, ordered by fill index
    async fn list_by_order(&self, order_hash: H256) -> Result<Vec<SwapState>, RegistryError>;

    /// Spent fills of an order. Never shrinks: acknowledge and purge only
    /// drop swap records.
    async fn spent_fills(&self, order_hash: H256) -> Result<SpentFills, RegistryError>;

    /// Non-terminal swaps, oldest first; these are resumed after a restart
    async fn list_active(&self) -> Result<Vec<SwapState>, RegistryError>;

    async fn record_transition(
        &self,
        key: &SwapKey,
        transition: StateTransition,
    ) -> Result<(), RegistryError>;

    async fn get_history(&self, key: &SwapKey) -> Result<Vec<StateTransition>, RegistryError>;

    /// Drop a terminal swap once its outcome has been consumed
    async fn acknowledge(&self, key: &SwapKey) -> Result<(), RegistryError>;

    /// Drop terminal swaps older than the retention window; returns how many
    async fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, RegistryError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    states: Arc<RwLock<HashMap<SwapKey, SwapState>>>,
    transitions: Arc<RwLock<HashMap<SwapKey, Vec<StateTransition>>>>,
    spent: Arc<RwLock<HashMap<H256, BTreeMap<u32, U256>>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().unwrap().is_empty()
    }

    fn store_next(
        &self,
        state: &SwapState,
        expected_version: Option<u64>,
    ) -> Result<SwapState, RegistryError> {
        let mut states = self.states.write().unwrap();
        let current = states
            .get(&state.key)
            .ok_or(RegistryError::NotFound(state.key))?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(RegistryError::VersionConflict {
                    key: state.key,
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut next = state.clone();
        next.version = current.version + 1;
        states.insert(next.key, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl SwapRegistry for InMemoryRegistry {
    async fn insert(&self, state: &SwapState) -> Result<(), RegistryError> {
        let mut states = self.states.write().unwrap();
        let mut spent = self.spent.write().unwrap();
        let fills = spent.entry(state.key.order_hash).or_default();
        if states.contains_key(&state.key) || fills.contains_key(&state.key.fill_index) {
            return Err(RegistryError::DuplicateId(state.key));
        }
        fills.insert(state.key.fill_index, state.fill_amount);
        states.insert(state.key, state.clone());
        Ok(())
    }

    async fn get(&self, key: &SwapKey) -> Result<Option<SwapState>, RegistryError> {
        Ok(self.states.read().unwrap().get(key).cloned())
    }

    async fn put(&self, state: &SwapState) -> Result<SwapState, RegistryError> {
        self.store_next(state, None)
    }

    async fn compare_and_swap(
        &self,
        state: &SwapState,
        expected_version: u64,
    ) -> Result<SwapState, RegistryError> {
        self.store_next(state, Some(expected_version))
    }

    async fn list_by_order(&self, order_hash: H256) -> Result<Vec<SwapState>, RegistryError> {
        let states = self.states.read().unwrap();
        let mut results: Vec<_> = states
            .values()
            .filter(|s| s.key.order_hash == order_hash)
            .cloned()
            .collect();

        results.sort_by_key(|s| s.key.fill_index);
        Ok(results)
    }

    async fn spent_fills(&self, order_hash: H256) -> Result<SpentFills, RegistryError> {
        let spent = self.spent.read().unwrap();
        Ok(spent
            .get(&order_hash)
            .map(|fills| SpentFills::from_entries(fills.iter().map(|(i, a)| (*i, *a))))
            .unwrap_or_default())
    }

    async fn list_active(&self) -> Result<Vec<SwapState>, RegistryError> {
        let states = self.states.read().unwrap();
        let mut results: Vec<_> = states
            .values()
            .filter(|s| !s.status.is_terminal())
            .cloned()
            .collect();

        results.sort_by_key(|s| (s.created_at, s.key));
        Ok(results)
    }

    async fn record_transition(
        &self,
        key: &SwapKey,
        transition: StateTransition,
    ) -> Result<(), RegistryError> {
        if !self.states.read().unwrap().contains_key(key) {
            return Err(RegistryError::NotFound(*key));
        }

        self.transitions
            .write()
            .unwrap()
            .entry(*key)
            .or_default()
            .push(transition);

        Ok(())
    }

    async fn get_history(&self, key: &SwapKey) -> Result<Vec<StateTransition>, RegistryError> {
        Ok(self
            .transitions
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn acknowledge(&self, key: &SwapKey) -> Result<(), RegistryError> {
        let mut states = self.states.write().unwrap();
        match states.get(key) {
            None => return Err(RegistryError::NotFound(*key)),
            Some(state) if !state.status.is_terminal() => {
                return Err(RegistryError::NotTerminal(*key))
            }
            Some(_) => {}
        }
        states.remove(key);
        self.transitions.write().unwrap().remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, RegistryError> {
        let mut states = self.states.write().unwrap();
        let expired: Vec<SwapKey> = states
            .values()
            .filter(|s| is_expired_at(s, now, retention_secs))
            .map(|s| s.key)
            .collect();

        let mut transitions = self.transitions.write().unwrap();
        for key in &expired {
            states.remove(key);
            transitions.remove(key);
        }
        Ok(expired.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
