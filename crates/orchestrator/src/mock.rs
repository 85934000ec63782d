use async_trait::async_trait;
use fusion_htlc_retry::ResourceBudget;
use fusion_htlc_types::{
    deployed_at_from_unix, fill_leaf, hash_secret, verify_proof, Address, EscrowFactory, FillProof,
    Immutables, Secret, Side, H256, U256,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::ledger::{EscrowReceipt, LedgerClient, LedgerError, LedgerOp};

/// Lifecycle of an escrow held by [`MockLedger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEscrowStatus {
    Active,
    Withdrawn,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockEscrow {
    pub side: Side,
    pub immutables: Immutables,
    pub status: MockEscrowStatus,
}

/// One call as the mock saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCall {
    pub op: LedgerOp,
    pub budget: Option<ResourceBudget>,
}

#[derive(Default)]
struct MockState {
    now: u64,
    /// Seconds the clock moves forward on every `block_timestamp` read
    block_time: u64,
    /// (token, holder) -> balance
    balances: HashMap<(Address, Address), U256>,
    /// (token, owner, spender) -> allowance
    allowances: HashMap<(Address, Address, Address), U256>,
    escrows: HashMap<Address, MockEscrow>,
    order_roots: HashMap<H256, H256>,
    faults: HashMap<LedgerOp, VecDeque<LedgerError>>,
    /// Calls that take effect but answer with a transport error
    lost_responses: HashMap<LedgerOp, usize>,
    required_budget: HashMap<LedgerOp, u64>,
    underfund_next: Option<Side>,
    calls: Vec<MockCall>,
    revealed: Vec<Secret>,
    tx_counter: u64,
}

/// In-memory ledger with escrow semantics, its own clock and fault injection.
///
/// Escrow addresses are derived exactly like the real factory derives them,
/// withdrawals check the secret against the escrow hashlock (and the Merkle
/// path when the order root was registered) and both withdrawal and
/// cancellation enforce the timelock windows.
#[derive(Clone)]
pub struct MockLedger {
    chain_id: u64,
    factory: EscrowFactory,
    signer: Address,
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    /// `signer` pays destination deposits and receives safety deposits back
    pub fn new(chain_id: u64, factory: EscrowFactory, signer: Address) -> Self {
        Self {
            chain_id,
            factory,
            signer,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn factory(&self) -> EscrowFactory {
        self.factory
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CLOCK
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_time(&self, now: u64) {
        self.state.lock().unwrap().now = now;
    }

    pub fn advance(&self, secs: u64) {
        self.state.lock().unwrap().now += secs;
    }

    pub fn now(&self) -> u64 {
        self.state.lock().unwrap().now
    }

    /// Move the clock forward by `secs` on every `block_timestamp` read
    pub fn set_block_time(&self, secs: u64) {
        self.state.lock().unwrap().block_time = secs;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BALANCES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn mint(&self, token: Address, holder: Address, amount: impl Into<U256>) {
        let mut state = self.state.lock().unwrap();
        let entry = state.balances.entry((token, holder)).or_default();
        *entry += amount.into();
    }

    pub fn approve(&self, token: Address, owner: Address, spender: Address, amount: impl Into<U256>) {
        self.state
            .lock()
            .unwrap()
            .allowances
            .insert((token, owner, spender), amount.into());
    }

    pub fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FAULT INJECTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: LedgerOp, error: LedgerError) {
        self.fail_times(op, error, 1);
    }

    pub fn fail_times(&self, op: LedgerOp, error: LedgerError, times: usize) {
        let mut state = self.state.lock().unwrap();
        let queue = state.faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// The next call of `op` takes effect on the ledger but its response
    /// never reaches the caller
    pub fn lose_next_response(&self, op: LedgerOp) {
        *self.state.lock().unwrap().lost_responses.entry(op).or_default() += 1;
    }

    /// Calls of `op` with a smaller budget run out of resources
    pub fn require_budget(&self, op: LedgerOp, units: u64) {
        self.state.lock().unwrap().required_budget.insert(op, units);
    }

    /// The next escrow created on `side` receives its safety deposit only
    pub fn underfund_next(&self, side: Side) {
        self.state.lock().unwrap().underfund_next = Some(side);
    }

    /// Check multi-fill withdrawals against `root` for this order
    pub fn register_order_root(&self, order_hash: H256, root: H256) {
        self.state.lock().unwrap().order_roots.insert(order_hash, root);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════

    pub fn escrow(&self, address: Address) -> Option<MockEscrow> {
        self.state.lock().unwrap().escrows.get(&address).cloned()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, op: LedgerOp) -> Vec<MockCall> {
        self.calls().into_iter().filter(|call| call.op == op).collect()
    }

    /// Secrets submitted in successful withdrawals, in order
    pub fn revealed_secrets(&self) -> Vec<Secret> {
        self.state.lock().unwrap().revealed.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERNALS
    // ═══════════════════════════════════════════════════════════════════════

    fn begin(
        state: &mut MockState,
        op: LedgerOp,
        budget: Option<ResourceBudget>,
    ) -> Result<(), LedgerError> {
        state.calls.push(MockCall { op, budget });

        if let Some(error) = state.faults.get_mut(&op).and_then(|queue| queue.pop_front()) {
            return Err(error);
        }

        if let (Some(budget), Some(required)) = (budget, state.required_budget.get(&op)) {
            if budget.units() < *required {
                return Err(LedgerError::OutOfResources {
                    budget: budget.units(),
                });
            }
        }
        Ok(())
    }

    /// Hand back a successful result unless its response is due to be lost
    fn respond<T>(state: &mut MockState, op: LedgerOp, value: T) -> Result<T, LedgerError> {
        match state.lost_responses.get_mut(&op) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                Err(LedgerError::Transport(format!("{} response lost", op)))
            }
            _ => Ok(value),
        }
    }

    fn next_tx(state: &mut MockState) -> H256 {
        state.tx_counter += 1;
        H256::from_low_u64_be(state.tx_counter)
    }

    fn move_funds(
        state: &mut MockState,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = state.balances.get(&(token, from)).copied().unwrap_or_default();
        if available < amount {
            return Err(LedgerError::Rejected(format!(
                "insufficient balance of {:#x} held by {:#x}: {} < {}",
                token, from, available, amount
            )));
        }
        state.balances.insert((token, from), available - amount);
        *state.balances.entry((token, to)).or_default() += amount;
        Ok(())
    }

    fn create_escrow(
        &self,
        side: Side,
        immutables: &Immutables,
        deposit: U256,
        src_cancellation_deadline: Option<u64>,
    ) -> Result<EscrowReceipt, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let deployed_at =
            deployed_at_from_unix(state.now).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let deployed = immutables.rebase(deployed_at);
        let address = self
            .factory
            .escrow_address(side, &deployed)
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;

        if state.escrows.contains_key(&address) {
            return Err(LedgerError::AlreadyExists(address));
        }

        if let Some(src_deadline) = src_cancellation_deadline {
            let dst_deadline = deployed.deadline(side.cancellation_stage());
            if dst_deadline > src_deadline {
                return Err(LedgerError::Rejected(format!(
                    "destination cancellation {} after source cancellation {}",
                    dst_deadline, src_deadline
                )));
            }
        }

        let underfunded = state.underfund_next == Some(side);
        if underfunded {
            state.underfund_next = None;
        }

        // source funds come from the maker through the factory allowance,
        // destination funds from the signer
        let payer = match side {
            Side::Source => deployed.maker,
            Side::Destination => self.signer,
        };
        if !underfunded {
            if side == Side::Source && !deployed.is_native() {
                let key = (deployed.token, deployed.maker, self.factory.address);
                let allowance = state.allowances.get(&key).copied().unwrap_or_default();
                if allowance < deployed.amount {
                    return Err(LedgerError::Rejected(format!(
                        "allowance {} below {}",
                        allowance, deployed.amount
                    )));
                }
                state.allowances.insert(key, allowance - deployed.amount);
            }
            Self::move_funds(&mut state, deployed.token, payer, address, deployed.amount)?;
        }
        *state.balances.entry((Address::zero(), address)).or_default() += deposit;

        state.escrows.insert(
            address,
            MockEscrow {
                side,
                immutables: deployed,
                status: MockEscrowStatus::Active,
            },
        );

        Ok(EscrowReceipt {
            address,
            deployed_at,
            tx_hash: Self::next_tx(&mut state),
        })
    }

    /// Pay out everything the escrow holds: `amount` to `recipient`, the
    /// safety deposit to the caller
    fn settle(
        &self,
        state: &mut MockState,
        escrow: Address,
        immutables: &Immutables,
        recipient: Address,
    ) -> Result<(), LedgerError> {
        if immutables.is_native() {
            let held = state
                .balances
                .get(&(Address::zero(), escrow))
                .copied()
                .unwrap_or_default();
            let amount = immutables.amount.min(held);
            Self::move_funds(state, Address::zero(), escrow, recipient, amount)?;
            Self::move_funds(state, Address::zero(), escrow, self.signer, held - amount)?;
        } else {
            let held = state
                .balances
                .get(&(immutables.token, escrow))
                .copied()
                .unwrap_or_default();
            Self::move_funds(state, immutables.token, escrow, recipient, held)?;
            let deposit = state
                .balances
                .get(&(Address::zero(), escrow))
                .copied()
                .unwrap_or_default();
            Self::move_funds(state, Address::zero(), escrow, self.signer, deposit)?;
        }
        Ok(())
    }

    fn active_escrow(
        state: &MockState,
        escrow: Address,
        immutables: &Immutables,
    ) -> Result<MockEscrow, LedgerError> {
        let record = state
            .escrows
            .get(&escrow)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("no escrow at {:#x}", escrow)))?;
        if record.status != MockEscrowStatus::Active {
            return Err(LedgerError::Rejected(format!(
                "escrow {:#x} is {:?}",
                escrow, record.status
            )));
        }
        if record.immutables != *immutables {
            return Err(LedgerError::Rejected("immutables mismatch".to_string()));
        }
        Ok(record)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_timestamp(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::BlockTimestamp, None)?;
        state.now += state.block_time;
        Ok(state.now)
    }

    async fn create_source_escrow(
        &self,
        immutables: &Immutables,
        deposit: U256,
        budget: ResourceBudget,
    ) -> Result<EscrowReceipt, LedgerError> {
        {
            let mut state = self.state.lock().unwrap();
            Self::begin(&mut state, LedgerOp::CreateSourceEscrow, Some(budget))?;
        }
        let receipt = self.create_escrow(Side::Source, immutables, deposit, None)?;
        let mut state = self.state.lock().unwrap();
        Self::respond(&mut state, LedgerOp::CreateSourceEscrow, receipt)
    }

    async fn create_destination_escrow(
        &self,
        immutables: &Immutables,
        src_cancellation_deadline: u64,
        deposit: U256,
        budget: ResourceBudget,
    ) -> Result<EscrowReceipt, LedgerError> {
        {
            let mut state = self.state.lock().unwrap();
            Self::begin(&mut state, LedgerOp::CreateDestinationEscrow, Some(budget))?;
        }
        let receipt = self.create_escrow(
            Side::Destination,
            immutables,
            deposit,
            Some(src_cancellation_deadline),
        )?;
        let mut state = self.state.lock().unwrap();
        Self::respond(&mut state, LedgerOp::CreateDestinationEscrow, receipt)
    }

    async fn withdraw(
        &self,
        escrow: Address,
        secret: &Secret,
        immutables: &Immutables,
        proof: Option<&FillProof>,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::Withdraw, Some(budget))?;

        let record = Self::active_escrow(&state, escrow, immutables)?;
        let side = record.side;

        let secret_hash = hash_secret(secret);
        let leaf = match proof {
            Some(fill) => fill_leaf(fill.index as u64, secret_hash),
            None => secret_hash,
        };
        if leaf != immutables.hashlock {
            return Err(LedgerError::Rejected("secret does not match hashlock".to_string()));
        }
        if let (Some(root), Some(fill)) = (state.order_roots.get(&immutables.order_hash), proof) {
            if !verify_proof(*root, leaf, &fill.proof) {
                return Err(LedgerError::Rejected("invalid merkle proof".to_string()));
            }
        }

        let opens = immutables.deadline(side.withdrawal_stage());
        let closes = immutables.deadline(side.cancellation_stage());
        if state.now < opens || state.now >= closes {
            return Err(LedgerError::Rejected(format!(
                "withdrawal window is [{}, {}), now {}",
                opens, closes, state.now
            )));
        }

        let recipient = match side {
            Side::Source => immutables.taker,
            Side::Destination => immutables.maker,
        };
        self.settle(&mut state, escrow, immutables, recipient)?;

        if let Some(entry) = state.escrows.get_mut(&escrow) {
            entry.status = MockEscrowStatus::Withdrawn;
        }
        state.revealed.push(secret.clone());
        let tx_hash = Self::next_tx(&mut state);
        Self::respond(&mut state, LedgerOp::Withdraw, tx_hash)
    }

    async fn cancel(
        &self,
        escrow: Address,
        immutables: &Immutables,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::Cancel, Some(budget))?;

        let record = Self::active_escrow(&state, escrow, immutables)?;
        let opens = immutables.deadline(record.side.cancellation_stage());
        if state.now < opens {
            return Err(LedgerError::Rejected(format!(
                "cancellation opens at {}, now {}",
                opens, state.now
            )));
        }

        let refund_to = match record.side {
            Side::Source => immutables.maker,
            Side::Destination => immutables.taker,
        };
        self.settle(&mut state, escrow, immutables, refund_to)?;

        if let Some(entry) = state.escrows.get_mut(&escrow) {
            entry.status = MockEscrowStatus::Cancelled;
        }
        let tx_hash = Self::next_tx(&mut state);
        Self::respond(&mut state, LedgerOp::Cancel, tx_hash)
    }

    async fn read_balance(&self, address: Address, asset: Address) -> Result<U256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::ReadBalance, None)?;
        Ok(state.balances.get(&(asset, address)).copied().unwrap_or_default())
    }

    async fn read_allowance(
        &self,
        owner: Address,
        spender: Address,
        asset: Address,
    ) -> Result<U256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::ReadAllowance, None)?;
        Ok(state
            .allowances
            .get(&(asset, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn compute_escrow_address(
        &self,
        side: Side,
        immutables: &Immutables,
    ) -> Result<Address, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::ComputeEscrowAddress, None)?;
        self.factory
            .escrow_address(side, immutables)
            .map_err(|e| LedgerError::Rejected(e.to_string()))
    }

    async fn transfer(
        &self,
        token: Address,
        to: Address,
        amount: U256,
        budget: ResourceBudget,
    ) -> Result<H256, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::begin(&mut state, LedgerOp::Transfer, Some(budget))?;
        Self::move_funds(&mut state, token, self.signer, to, amount)?;
        let tx_hash = Self::next_tx(&mut state);
        Self::respond(&mut state, LedgerOp::Transfer, tx_hash)
    }
}
