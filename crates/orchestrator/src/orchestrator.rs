use fusion_htlc_metrics::{MetricsCollector, SwapSpan};
use fusion_htlc_registry::{unix_now, RegistryError, StateTransition, SwapRegistry};
use fusion_htlc_retry::{retry_with_budget, FixedBackoff, ResourceBudget, RetryError, RetryPolicy};
use fusion_htlc_types::{
    deployed_at_from_unix, fill_leaf, hash_secret, to_side_immutables, verify_fill, Address,
    EscrowFactory, EscrowRecord, FailureKind, Hashlock, Immutables, Order, OrderError,
    OrderSecrets, Side, Stage, SwapFailure, SwapKey, SwapState, SwapStatus, SwapStatusReport,
    Timelocks, ValidationError, H256, U256,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::ledger::{EscrowReceipt, LedgerClient, LedgerError, LedgerOp};

/// A ledger client together with the escrow factory deployed on that ledger
#[derive(Clone)]
pub struct LedgerBinding {
    pub client: Arc<dyn LedgerClient>,
    pub factory: EscrowFactory,
}

/// What the resolver wants to take from an order
#[derive(Debug, Clone, PartialEq)]
pub struct FillRequest {
    pub fill_amount: U256,
    /// Receives the destination funds and forwards them to the order receiver
    pub intermediary: Option<Address>,
}

impl FillRequest {
    pub fn new(fill_amount: impl Into<U256>) -> Self {
        Self {
            fill_amount: fill_amount.into(),
            intermediary: None,
        }
    }

    /// Fill the whole making amount
    pub fn full(order: &Order) -> Self {
        Self::new(order.making_amount)
    }

    pub fn via_intermediary(mut self, intermediary: Address) -> Self {
        self.intermediary = Some(intermediary);
        self
    }
}

enum WaitOutcome {
    Reached,
    TimedOut { last_seen: u64 },
    ClockUnavailable(LedgerError),
}

/// Which escrow a creation call places, with what only that side needs
#[derive(Debug, Clone, Copy)]
enum Placement {
    Source,
    Destination { src_cancellation_deadline: u64 },
}

impl Placement {
    fn side(&self) -> Side {
        match self {
            Placement::Source => Side::Source,
            Placement::Destination { .. } => Side::Destination,
        }
    }

    fn op(&self) -> LedgerOp {
        match self {
            Placement::Source => LedgerOp::CreateSourceEscrow,
            Placement::Destination { .. } => LedgerOp::CreateDestinationEscrow,
        }
    }

    fn failure(&self) -> FailureKind {
        match self {
            Placement::Source => FailureKind::SourceFundingFailed,
            Placement::Destination { .. } => FailureKind::DestinationFundingFailed,
        }
    }

    async fn submit(
        self,
        client: &Arc<dyn LedgerClient>,
        immutables: &Immutables,
        budget: ResourceBudget,
    ) -> Result<EscrowReceipt, LedgerError> {
        let deposit = immutables.safety_deposit;
        match self {
            Placement::Source => client.create_source_escrow(immutables, deposit, budget).await,
            Placement::Destination {
                src_cancellation_deadline,
            } => {
                client
                    .create_destination_escrow(immutables, src_cancellation_deadline, deposit, budget)
                    .await
            }
        }
    }
}

enum Placed {
    Created(EscrowReceipt),
    /// Left on the ledger by an attempt whose response never arrived
    Adopted(EscrowRecord),
}

/// One side's escrow creation, cloned into every attempt
#[derive(Clone)]
struct PlacementPlan {
    client: Arc<dyn LedgerClient>,
    placement: Placement,
    /// Immutables as prepared
    base: Immutables,
    /// `base` stamped with `submitted_at`
    planned: Immutables,
    submitted_at: u64,
    window: u64,
}

impl PlacementPlan {
    /// A re-submission looks for the escrow of an earlier attempt first; an
    /// `AlreadyExists` answer is matched back to this plan
    async fn attempt(&self, resubmit: bool, budget: ResourceBudget) -> Result<Placed, LedgerError> {
        if resubmit {
            if let Some(record) = self.locate(None).await? {
                return Ok(Placed::Adopted(record));
            }
        }

        match self.placement.submit(&self.client, &self.planned, budget).await {
            Ok(receipt) => Ok(Placed::Created(receipt)),
            Err(LedgerError::AlreadyExists(address)) => self
                .locate(Some(address))
                .await?
                .map(Placed::Adopted)
                .ok_or_else(|| {
                    LedgerError::Rejected(format!(
                        "escrow {:#x} exists but does not match this swap",
                        address
                    ))
                }),
            Err(e) => Err(e),
        }
    }

    async fn locate(&self, known: Option<Address>) -> Result<Option<EscrowRecord>, LedgerError> {
        locate_escrow(
            &self.client,
            self.placement.side(),
            &self.base,
            self.submitted_at,
            self.window,
            known,
        )
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`SwapOrchestrator`]
pub struct SwapOrchestratorBuilder {
    registry: Option<Arc<dyn SwapRegistry>>,
    ledgers: HashMap<u64, LedgerBinding>,
    resolver: Option<Address>,
    config: OrchestratorConfig,
    metrics: MetricsCollector,
}

impl SwapOrchestratorBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            registry: None,
            ledgers: HashMap::new(),
            resolver: None,
            config: OrchestratorConfig::default(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Set the swap registry
    pub fn with_registry(mut self, registry: Arc<dyn SwapRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a ledger; keyed by the client's chain id
    pub fn with_ledger(mut self, client: Arc<dyn LedgerClient>, factory: EscrowFactory) -> Self {
        self.ledgers
            .insert(client.chain_id(), LedgerBinding { client, factory });
        self
    }

    /// Set the resolver address, the taker on both escrows
    pub fn with_resolver(mut self, resolver: Address) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the orchestrator, validating that all required fields are set
    pub fn build(self) -> Result<SwapOrchestrator, OrchestratorError> {
        let registry = self.registry.ok_or_else(|| OrchestratorError::MissingField {
            field: "registry".to_string(),
        })?;
        let resolver = self.resolver.ok_or_else(|| OrchestratorError::MissingField {
            field: "resolver".to_string(),
        })?;
        if self.ledgers.is_empty() {
            return Err(OrchestratorError::MissingField {
                field: "ledgers".to_string(),
            });
        }

        Ok(SwapOrchestrator {
            registry,
            ledgers: self.ledgers,
            resolver,
            config: self.config,
            metrics: self.metrics,
        })
    }
}

impl Default for SwapOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Drives swaps through their escrow lifecycle.
///
/// Each swap is a sequential task. Progress is persisted to the registry
/// after every milestone so a swap can be resumed from whatever status it
/// was left in.
pub struct SwapOrchestrator {
    registry: Arc<dyn SwapRegistry>,
    ledgers: HashMap<u64, LedgerBinding>,
    resolver: Address,
    config: OrchestratorConfig,
    metrics: MetricsCollector,
}

impl SwapOrchestrator {
    pub fn builder() -> SwapOrchestratorBuilder {
        SwapOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<dyn SwapRegistry> {
        self.registry.clone()
    }

    pub fn resolver(&self) -> Address {
        self.resolver
    }

    fn ledger(&self, chain_id: u64) -> Result<&LedgerBinding, OrchestratorError> {
        self.ledgers
            .get(&chain_id)
            .ok_or(OrchestratorError::UnknownChain(chain_id))
    }

    async fn load(&self, key: &SwapKey) -> Result<SwapState, OrchestratorError> {
        self.registry
            .get(key)
            .await?
            .ok_or(OrchestratorError::SwapNotFound(*key))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PREPARATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate a fill and record it as `Created`.
    ///
    /// Picks the secret the fill must reveal, plans both sides' immutables
    /// against each ledger's current clock and checks that both escrow
    /// addresses resolve. Nothing is written when validation fails.
    pub async fn prepare(
        &self,
        order: &Order,
        secrets: &OrderSecrets,
        request: FillRequest,
    ) -> Result<SwapKey, OrchestratorError> {
        order.validate()?;
        if secrets.hashlock() != order.hashlock {
            return Err(ValidationError::InvalidFill(
                "secrets do not match the order hashlock".to_string(),
            )
            .into());
        }

        let src = self.ledger(order.src_chain_id)?;
        let dst = self.ledger(order.dst_chain_id)?;

        let src_now = src.client.block_timestamp().await?;
        if !order.is_resolver_allowed(self.resolver, src_now) {
            return Err(OrderError::ResolverNotWhitelisted(self.resolver).into());
        }

        // every fill ever accepted counts, whatever its outcome and even once
        // its record is gone: its secret may already be public
        let order_hash = order.source_hash();
        let spent = self.registry.spent_fills(order_hash).await?;
        let filled_before = spent.filled_amount;
        order.validate_fill(filled_before, request.fill_amount)?;

        let index = order.multi_fill_index(filled_before, request.fill_amount)?;
        let key = SwapKey::new(order_hash, index);
        if spent.contains(index) {
            return Err(OrchestratorError::DuplicateFill(key));
        }

        let material = secrets
            .fill(index)
            .ok_or(OrderError::SecretIndexOutOfRange {
                index,
                parts: order.hashlock.parts(),
            })?;
        if !verify_fill(&order.hashlock, &material.secret, material.proof.as_ref()) {
            return Err(ValidationError::InvalidFill(format!(
                "secret {} does not open the order hashlock",
                index
            ))
            .into());
        }
        let leaf = match order.hashlock {
            Hashlock::Single(hash) => hash,
            Hashlock::MultiFill { .. } => fill_leaf(index as u64, hash_secret(&material.secret)),
        };

        let dst_now = dst.client.block_timestamp().await?;
        let src_timelocks = Timelocks::encode(&order.timelocks, deployed_at_from_unix(src_now)?)?;
        let dst_timelocks = Timelocks::encode(&order.timelocks, deployed_at_from_unix(dst_now)?)?;

        let src_immutables = to_side_immutables(
            order,
            Side::Source,
            self.resolver,
            request.fill_amount,
            leaf,
            src_timelocks,
        )?;
        let mut dst_immutables = to_side_immutables(
            order,
            Side::Destination,
            self.resolver,
            request.fill_amount,
            leaf,
            dst_timelocks,
        )?;

        let mut forward_to = None;
        if let Some(intermediary) = request.intermediary.filter(|i| *i != order.receiver) {
            dst_immutables.maker = intermediary;
            forward_to = Some(order.receiver);
        }

        src.factory.escrow_address(Side::Source, &src_immutables)?;
        dst.factory
            .escrow_address(Side::Destination, &dst_immutables)?;

        let mut state = SwapState::new(
            key,
            (order.src_chain_id, order.dst_chain_id),
            material.secret,
            leaf,
            material.proof,
            request.fill_amount,
            src_immutables,
            dst_immutables,
            unix_now(),
        );
        state.forward_to = forward_to;

        match self.registry.insert(&state).await {
            Err(RegistryError::DuplicateId(key)) => return Err(OrchestratorError::DuplicateFill(key)),
            other => other?,
        }

        info!(
            order_hash = %format_args!("{:#x}", order_hash),
            fill_index = index,
            fill_amount = %request.fill_amount,
            src_chain = order.src_chain_id,
            dst_chain = order.dst_chain_id,
            "Swap prepared"
        );
        Ok(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Drive a prepared swap to a terminal status.
    ///
    /// Setting `cancel` to `true` stops the swap at the next suspension point
    /// while it is still before `FundsVerified`; later it is ignored.
    pub async fn execute(
        &self,
        key: SwapKey,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SwapStatusReport, OrchestratorError> {
        let state = self.load(&key).await?;
        if state.status.is_terminal() {
            return Ok(state.report());
        }

        let span = SwapSpan::new(key);
        let started = Instant::now();
        self.metrics.record_swap_started();

        let state = self.drive(state, &mut cancel).instrument(span.span()).await?;

        self.metrics.record_duration(started.elapsed());
        Ok(state.report())
    }

    /// Continue a persisted swap, typically after a restart
    pub async fn resume(&self, key: SwapKey) -> Result<SwapStatusReport, OrchestratorError> {
        let (_never, cancel) = watch::channel(false);
        self.execute(key, cancel).await
    }

    pub async fn status(&self, key: &SwapKey) -> Result<SwapStatusReport, OrchestratorError> {
        Ok(self.load(key).await?.report())
    }

    /// Every fill of an order, ordered by fill index
    pub async fn order_status(
        &self,
        order_hash: H256,
    ) -> Result<Vec<SwapStatusReport>, OrchestratorError> {
        Ok(self
            .registry
            .list_by_order(order_hash)
            .await?
            .iter()
            .map(SwapState::report)
            .collect())
    }

    pub async fn history(&self, key: &SwapKey) -> Result<Vec<StateTransition>, OrchestratorError> {
        Ok(self.registry.get_history(key).await?)
    }

    /// Drop a terminal swap whose outcome has been consumed
    pub async fn acknowledge(&self, key: &SwapKey) -> Result<(), OrchestratorError> {
        Ok(self.registry.acknowledge(key).await?)
    }

    pub async fn purge_expired(&self) -> Result<usize, OrchestratorError> {
        let purged = self
            .registry
            .purge_expired(unix_now(), self.config.retention_secs)
            .await?;
        if purged > 0 {
            info!(purged, "Purged expired swaps");
        }
        Ok(purged)
    }

    async fn drive(
        &self,
        mut state: SwapState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<SwapState, OrchestratorError> {
        info!(status = %state.status, "Executing swap");

        while !state.status.is_terminal() {
            let cancel_requested = *cancel.borrow();
            if cancel_requested {
                if state.status.is_cancellable() {
                    self.transition(&mut state, SwapStatus::Cancelled, "cancelled by caller", None)
                        .await?;
                    break;
                }
                debug!(status = %state.status, "Cancellation ignored past FundsVerified");
            }

            if self.cancel_if_expired(&mut state).await? {
                break;
            }

            match state.status {
                SwapStatus::Created => self.fund_destination(&mut state).await?,
                SwapStatus::FundingDestination => {
                    self.await_authorization(&mut state, cancel).await?
                }
                SwapStatus::AwaitingSourceAuthorization => self.fund_source(&mut state).await?,
                SwapStatus::FundingSource => self.verify_funds(&mut state).await?,
                SwapStatus::FundsVerified => self.reveal_on_source(&mut state).await?,
                SwapStatus::RevealingOnSource => self.reveal_on_destination(&mut state).await?,
                SwapStatus::RevealingOnDestination => self.complete(&mut state).await?,
                SwapStatus::Completed | SwapStatus::Failed(_) | SwapStatus::Cancelled => break,
            }
        }

        Ok(state)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STEPS
    // ═══════════════════════════════════════════════════════════════════════

    /// `Created -> FundingDestination`
    async fn fund_destination(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        let src = self.ledger(state.src_chain_id)?.client.clone();

        let src_now = match self.read_clock(&src).await {
            Ok(now) => now,
            Err(e) => {
                return self
                    .fail(state, FailureKind::LedgerCommunicationError, e.to_string(), None)
                    .await
            }
        };
        let src_cancellation_deadline =
            src_now + state.src_immutables.timelocks.offset(Stage::SrcCancellation) as u64;

        let placement = Placement::Destination {
            src_cancellation_deadline,
        };
        let Some(record) = self.place_escrow(state, placement).await? else {
            return Ok(());
        };

        info!(
            escrow = %format_args!("{:#x}", record.address),
            deployed_at = record.deployed_at,
            src_cancellation_deadline,
            "Destination escrow created"
        );
        state.dst_escrow = Some(record);
        self.transition(
            state,
            SwapStatus::FundingDestination,
            "destination escrow funded",
            record.tx_hash,
        )
        .await
    }

    /// `FundingDestination -> AwaitingSourceAuthorization`
    async fn await_authorization(
        &self,
        state: &mut SwapState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), OrchestratorError> {
        let src = self.ledger(state.src_chain_id)?.clone();
        let owner = state.src_immutables.maker;
        let asset = state.src_immutables.token;
        let required = state.fill_amount;
        let mut backoff =
            FixedBackoff::new(self.config.poll_interval, self.config.authorization_max_polls);

        loop {
            match src
                .client
                .read_allowance(owner, src.factory.address, asset)
                .await
            {
                Ok(allowance) if allowance >= required => {
                    return self
                        .transition(
                            state,
                            SwapStatus::AwaitingSourceAuthorization,
                            format!("maker allowance {} covers the fill", allowance),
                            None,
                        )
                        .await;
                }
                Ok(allowance) => {
                    debug!(allowance = %allowance, required = %required, "Waiting for source authorization")
                }
                Err(e) => warn!(error = %e, "Allowance read failed"),
            }

            let Some(delay) = backoff.next_delay() else {
                return self
                    .fail(
                        state,
                        FailureKind::AuthorizationTimeout,
                        format!(
                            "maker allowance below {} after {} polls",
                            required,
                            backoff.max_attempts()
                        ),
                        None,
                    )
                    .await;
            };
            if sleep_or_cancel(delay, cancel).await {
                return Ok(());
            }
        }
    }

    /// `AwaitingSourceAuthorization -> FundingSource`
    async fn fund_source(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        let Some(record) = self.place_escrow(state, Placement::Source).await? else {
            return Ok(());
        };

        info!(
            escrow = %format_args!("{:#x}", record.address),
            deployed_at = record.deployed_at,
            "Source escrow created"
        );
        state.src_escrow = Some(record);
        self.transition(
            state,
            SwapStatus::FundingSource,
            "source escrow funded",
            record.tx_hash,
        )
        .await
    }

    /// Create one side's escrow, or take over the one an earlier attempt left
    /// behind.
    ///
    /// The ledger time of the first submission is persisted before anything
    /// is sent. A retry after a transport error, or a resume that finds the
    /// marker without an escrow record, first searches the ledger for the
    /// escrow and only submits again when none is found. Returns `None` once
    /// the swap has been failed.
    async fn place_escrow(
        &self,
        state: &mut SwapState,
        placement: Placement,
    ) -> Result<Option<EscrowRecord>, OrchestratorError> {
        let side = placement.side();
        let binding = self.ledger(state.chain_id(side))?.clone();
        let client = binding.client.clone();
        let window = self.config.escrow_lookup_window_secs;
        let base = state.planned_immutables(side).clone();

        if let Some(from) = state.submitted_at(side) {
            let found = self
                .call_with_retry(
                    &self.config.funding_retry,
                    LedgerOp::ComputeEscrowAddress,
                    |_| {
                        let client = client.clone();
                        let base = base.clone();
                        async move { locate_escrow(&client, side, &base, from, window, None).await }
                    },
                )
                .await;
            match found {
                Ok(Some(record)) => {
                    info!(
                        side = %side,
                        submitted_at = from,
                        "Escrow from an interrupted submission found"
                    );
                    return self.accept_escrow(state, placement, &binding.factory, record).await;
                }
                Ok(None) => {
                    debug!(side = %side, submitted_at = from, "No escrow from the earlier submission")
                }
                Err(e) => {
                    self.fail(state, FailureKind::LedgerCommunicationError, e.to_string(), None)
                        .await?;
                    return Ok(None);
                }
            }
        }

        let now = match self.read_clock(&client).await {
            Ok(now) => now,
            Err(e) => {
                self.fail(state, FailureKind::LedgerCommunicationError, e.to_string(), None)
                    .await?;
                return Ok(None);
            }
        };
        let planned = match deployed_at_from_unix(now) {
            Ok(deployed_at) => base.rebase(deployed_at),
            Err(e) => {
                self.fail(state, placement.failure(), e.to_string(), None).await?;
                return Ok(None);
            }
        };

        state.set_submitted_at(side, now);
        self.persist(state).await?;

        let plan = PlacementPlan {
            client,
            placement,
            base,
            planned,
            submitted_at: now,
            window,
        };
        let mut attempt = 0u32;
        let result = self
            .call_with_retry(&self.config.funding_retry, placement.op(), |budget| {
                attempt += 1;
                let resubmit = attempt > 1;
                let plan = plan.clone();
                async move { plan.attempt(resubmit, budget).await }
            })
            .await;

        let record = match result {
            Ok(Placed::Created(receipt)) => EscrowRecord::from(receipt),
            Ok(Placed::Adopted(record)) => {
                info!(
                    side = %side,
                    escrow = %format_args!("{:#x}", record.address),
                    "Escrow from a lost response adopted"
                );
                record
            }
            Err(e) => {
                self.fail(state, placement.failure(), e.to_string(), None).await?;
                return Ok(None);
            }
        };
        self.accept_escrow(state, placement, &binding.factory, record).await
    }

    async fn accept_escrow(
        &self,
        state: &mut SwapState,
        placement: Placement,
        factory: &EscrowFactory,
        record: EscrowRecord,
    ) -> Result<Option<EscrowRecord>, OrchestratorError> {
        match confirm_escrow(state, placement.side(), factory, record) {
            Ok(record) => Ok(Some(record)),
            Err(message) => {
                self.fail(state, placement.failure(), message, None).await?;
                Ok(None)
            }
        }
    }

    /// `FundingSource -> FundsVerified`; the last gate before the secret
    /// leaves custody
    async fn verify_funds(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        let mut shortfalls = Vec::new();

        for side in [Side::Source, Side::Destination] {
            let (Some(record), Some(immutables)) =
                (state.escrow(side).copied(), state.deployed_immutables(side))
            else {
                shortfalls.push(format!("{} escrow was never recorded", side));
                continue;
            };
            let client = self.ledger(state.chain_id(side))?.client.clone();

            let locked = match self
                .read_balance(&client, record.address, immutables.token)
                .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    return self
                        .fail(state, FailureKind::LedgerCommunicationError, e.to_string(), None)
                        .await
                }
            };
            if locked < immutables.required_balance() {
                shortfalls.push(format!(
                    "{} escrow holds {} of {}",
                    side,
                    locked,
                    immutables.required_balance()
                ));
            }

            if !immutables.is_native() && !immutables.safety_deposit.is_zero() {
                let deposit = match self
                    .read_balance(&client, record.address, Address::zero())
                    .await
                {
                    Ok(balance) => balance,
                    Err(e) => {
                        return self
                            .fail(state, FailureKind::LedgerCommunicationError, e.to_string(), None)
                            .await
                    }
                };
                if deposit < immutables.safety_deposit {
                    shortfalls.push(format!(
                        "{} escrow safety deposit {} of {}",
                        side, deposit, immutables.safety_deposit
                    ));
                }
            }
        }

        if !shortfalls.is_empty() {
            return self
                .fail(state, FailureKind::FundsNotLocked, shortfalls.join("; "), None)
                .await;
        }

        self.transition(state, SwapStatus::FundsVerified, "both escrows funded", None)
            .await
    }

    /// `FundsVerified -> RevealingOnSource`; the secret is public from here on
    async fn reveal_on_source(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        self.reveal(
            state,
            Side::Source,
            FailureKind::SourceWithdrawalRejected,
            SwapStatus::RevealingOnSource,
        )
        .await
    }

    /// `RevealingOnSource -> RevealingOnDestination`
    async fn reveal_on_destination(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        self.reveal(
            state,
            Side::Destination,
            FailureKind::DestinationWithdrawalRejected,
            SwapStatus::RevealingOnDestination,
        )
        .await
    }

    async fn reveal(
        &self,
        state: &mut SwapState,
        side: Side,
        rejection: FailureKind,
        next: SwapStatus,
    ) -> Result<(), OrchestratorError> {
        let (Some(record), Some(immutables)) =
            (state.escrow(side).copied(), state.deployed_immutables(side))
        else {
            let message = format!("{} escrow was never recorded", side);
            return self.fail(state, rejection, message, None).await;
        };
        let client = self.ledger(state.chain_id(side))?.client.clone();

        let opens = immutables.deadline(side.withdrawal_stage());
        match self.wait_until(&client, opens).await {
            WaitOutcome::Reached => {}
            WaitOutcome::TimedOut { last_seen } => {
                let message = format!(
                    "{} withdrawal opens at {}, ledger clock still at {}",
                    side, opens, last_seen
                );
                let pending = state.secret_revealed.then_some(side);
                return self
                    .fail(state, FailureKind::WithdrawalWindowTimeout, message, pending)
                    .await;
            }
            WaitOutcome::ClockUnavailable(e) => {
                let pending = state.secret_revealed.then_some(side);
                return self
                    .fail(state, FailureKind::LedgerCommunicationError, e.to_string(), pending)
                    .await;
            }
        }

        if !state.secret_revealed {
            state.secret_revealed = true;
            self.persist(state).await?;
        }

        let policy = match side {
            Side::Source => &self.config.source_withdrawal_retry,
            Side::Destination => &self.config.destination_withdrawal_retry,
        };
        let secret = state.secret.clone();
        let proof = state.proof.clone();
        let result = self
            .call_with_retry(policy, LedgerOp::Withdraw, |budget| {
                let client = client.clone();
                let secret = secret.clone();
                let immutables = immutables.clone();
                let proof = proof.clone();
                async move {
                    client
                        .withdraw(record.address, &secret, &immutables, proof.as_ref(), budget)
                        .await
                }
            })
            .await;

        match result {
            Ok(tx_hash) => {
                info!(
                    side = %side,
                    escrow = %format_args!("{:#x}", record.address),
                    tx_hash = %format_args!("{:#x}", tx_hash),
                    "Secret revealed"
                );
                self.transition(
                    state,
                    next,
                    format!("withdrew {} escrow", side),
                    Some(tx_hash),
                )
                .await
            }
            Err(e) => self.fail(state, rejection, e.to_string(), Some(side)).await,
        }
    }

    /// `RevealingOnDestination -> Completed`
    async fn complete(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        let side = Side::Destination;
        let (Some(record), Some(immutables)) =
            (state.escrow(side).copied(), state.deployed_immutables(side))
        else {
            return self
                .fail(
                    state,
                    FailureKind::DestinationWithdrawalRejected,
                    "destination escrow was never recorded",
                    None,
                )
                .await;
        };
        let client = self.ledger(state.dst_chain_id)?.client.clone();

        let remaining = match self
            .read_balance(&client, record.address, immutables.token)
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                return self
                    .fail(
                        state,
                        FailureKind::LedgerCommunicationError,
                        e.to_string(),
                        Some(side),
                    )
                    .await
            }
        };
        if !remaining.is_zero() {
            return self
                .fail(
                    state,
                    FailureKind::DestinationWithdrawalRejected,
                    format!("destination escrow still holds {}", remaining),
                    Some(side),
                )
                .await;
        }

        let mut tx_hash = None;
        if let Some(recipient) = state.forward_to {
            let token = immutables.token;
            let amount = immutables.amount;
            let result = self
                .call_with_retry(
                    &self.config.destination_withdrawal_retry,
                    LedgerOp::Transfer,
                    |budget| {
                        let client = client.clone();
                        async move { client.transfer(token, recipient, amount, budget).await }
                    },
                )
                .await;
            match result {
                Ok(hash) => {
                    info!(
                        recipient = %format_args!("{:#x}", recipient),
                        amount = %amount,
                        "Forwarded destination funds"
                    );
                    tx_hash = Some(hash);
                }
                Err(e) => {
                    return self
                        .fail(
                            state,
                            FailureKind::LedgerCommunicationError,
                            format!("forwarding to {:#x}: {}", recipient, e),
                            Some(side),
                        )
                        .await
                }
            }
        }

        self.transition(state, SwapStatus::Completed, "destination escrow drained", tx_hash)
            .await
    }

    /// Cancel every escrow whose cancellation deadline has passed and end the
    /// swap as `Cancelled`. Only applies while the secret is still private.
    async fn cancel_if_expired(&self, state: &mut SwapState) -> Result<bool, OrchestratorError> {
        if state.secret_revealed {
            return Ok(false);
        }

        let mut expired = Vec::new();
        for side in [Side::Destination, Side::Source] {
            let (Some(record), Some(immutables)) =
                (state.escrow(side).copied(), state.deployed_immutables(side))
            else {
                continue;
            };
            let client = self.ledger(state.chain_id(side))?.client.clone();
            match client.block_timestamp().await {
                Ok(now) if now >= immutables.deadline(side.cancellation_stage()) => {
                    expired.push((side, record.address, immutables, client));
                }
                Ok(_) => {}
                Err(e) => warn!(side = %side, error = %e, "Clock read failed during expiry check"),
            }
        }

        if expired.is_empty() {
            return Ok(false);
        }

        let mut cancelled = Vec::new();
        for (side, escrow, immutables, client) in expired {
            let result = self
                .call_with_retry(&self.config.funding_retry, LedgerOp::Cancel, |budget| {
                    let client = client.clone();
                    let immutables = immutables.clone();
                    async move { client.cancel(escrow, &immutables, budget).await }
                })
                .await;

            match result {
                Ok(tx_hash) => {
                    info!(
                        side = %side,
                        escrow = %format_args!("{:#x}", escrow),
                        tx_hash = %format_args!("{:#x}", tx_hash),
                        "Expired escrow cancelled"
                    );
                    cancelled.push(side.as_str());
                }
                Err(e) => {
                    return self
                        .fail(
                            state,
                            FailureKind::LedgerCommunicationError,
                            format!("cancelling expired {} escrow: {}", side, e),
                            None,
                        )
                        .await
                        .map(|_| true);
                }
            }
        }

        self.transition(
            state,
            SwapStatus::Cancelled,
            format!("cancellation deadline passed, cancelled {}", cancelled.join(" and ")),
            None,
        )
        .await?;
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    async fn transition(
        &self,
        state: &mut SwapState,
        to: SwapStatus,
        details: impl Into<String>,
        tx_hash: Option<H256>,
    ) -> Result<(), OrchestratorError> {
        let from = state.status;
        let now = unix_now();
        let details = details.into();

        let mut next = state.clone();
        next.status = to;
        next.updated_at = now;
        if to.is_terminal() {
            next.completed_at = Some(now);
        }

        let stored = self.registry.compare_and_swap(&next, state.version).await?;
        self.registry
            .record_transition(
                &state.key,
                StateTransition::new(from, to, now)
                    .with_details(details.clone())
                    .with_tx_hash(tx_hash),
            )
            .await?;
        self.metrics.record_transition(from, to);

        info!(from = %from, to = %to, details = %details, "Swap status changed");
        *state = stored;
        Ok(())
    }

    /// Write non-status progress (escrow records, reveal flag)
    async fn persist(&self, state: &mut SwapState) -> Result<(), OrchestratorError> {
        let mut next = state.clone();
        next.updated_at = unix_now();
        *state = self.registry.compare_and_swap(&next, state.version).await?;
        Ok(())
    }

    async fn fail(
        &self,
        state: &mut SwapState,
        kind: FailureKind,
        message: impl Into<String>,
        pending_side: Option<Side>,
    ) -> Result<(), OrchestratorError> {
        let message = message.into();
        if state.secret_revealed {
            warn!(
                kind = %kind,
                pending_side = ?pending_side,
                error = %message,
                "Swap failed after the secret was revealed"
            );
        } else {
            error!(kind = %kind, error = %message, "Swap failed");
        }

        state.failure = Some(SwapFailure {
            kind,
            message: message.clone(),
            secret_revealed: state.secret_revealed,
            pending_side,
        });
        self.transition(state, SwapStatus::Failed(kind), message, None)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LEDGER HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    async fn call_with_retry<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        op: LedgerOp,
        mut call: F,
    ) -> Result<T, RetryError<LedgerError>>
    where
        F: FnMut(ResourceBudget) -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let metrics = &self.metrics;
        let result = retry_with_budget(policy, op.as_str(), |budget, attempt| {
            if attempt > 1 {
                metrics.record_retry(op.as_str());
            }
            call(budget)
        })
        .await;

        if result.is_err() {
            self.metrics.record_ledger_failure(op.as_str());
        }
        result
    }

    async fn read_clock(
        &self,
        client: &Arc<dyn LedgerClient>,
    ) -> Result<u64, RetryError<LedgerError>> {
        self.call_with_retry(&self.config.funding_retry, LedgerOp::BlockTimestamp, |_| {
            let client = client.clone();
            async move { client.block_timestamp().await }
        })
        .await
    }

    async fn read_balance(
        &self,
        client: &Arc<dyn LedgerClient>,
        address: Address,
        asset: Address,
    ) -> Result<U256, RetryError<LedgerError>> {
        self.call_with_retry(&self.config.funding_retry, LedgerOp::ReadBalance, |_| {
            let client = client.clone();
            async move { client.read_balance(address, asset).await }
        })
        .await
    }

    /// Poll the ledger clock until it reaches `deadline`
    async fn wait_until(&self, client: &Arc<dyn LedgerClient>, deadline: u64) -> WaitOutcome {
        let mut backoff = FixedBackoff::new(
            self.config.timelock_poll_interval,
            self.config.withdrawal_wait_max_polls,
        );

        loop {
            let read = client.block_timestamp().await;
            match &read {
                Ok(now) if *now >= deadline => return WaitOutcome::Reached,
                Ok(now) => debug!(now = *now, deadline, "Waiting for timelock"),
                Err(e) => warn!(error = %e, "Clock read failed while waiting for timelock"),
            }

            let Some(delay) = backoff.next_delay() else {
                // judged on the final read only
                return match read {
                    Ok(last_seen) => WaitOutcome::TimedOut { last_seen },
                    Err(e) => WaitOutcome::ClockUnavailable(e),
                };
            };
            tokio::time::sleep(delay).await;
        }
    }
}

/// Check the ledger-reported escrow against the address computed from the
/// immutables rebased onto the reported deployedAt
fn confirm_escrow(
    state: &SwapState,
    side: Side,
    factory: &EscrowFactory,
    record: EscrowRecord,
) -> Result<EscrowRecord, String> {
    let deployed = state.planned_immutables(side).rebase(record.deployed_at);
    let expected = factory
        .escrow_address(side, &deployed)
        .map_err(|e| e.to_string())?;
    if expected != record.address {
        return Err(format!(
            "{} escrow reported at {:#x}, expected {:#x}",
            side, record.address, expected
        ));
    }
    Ok(record)
}

/// Search the ledger for an escrow placed from `planned` at any ledger second
/// in `[from, now]`, looking at most `window` seconds past `from`.
///
/// With `known` the candidate at that address is returned; otherwise a
/// candidate counts only once it holds its full required balance.
async fn locate_escrow(
    client: &Arc<dyn LedgerClient>,
    side: Side,
    planned: &Immutables,
    from: u64,
    window: u64,
    known: Option<Address>,
) -> Result<Option<EscrowRecord>, LedgerError> {
    let now = client.block_timestamp().await?;
    let until = now.min(from.saturating_add(window));

    for at in from..=until {
        let Ok(deployed_at) = deployed_at_from_unix(at) else {
            break;
        };
        let candidate = planned.rebase(deployed_at);
        let address = client.compute_escrow_address(side, &candidate).await?;
        let found = match known {
            Some(known) => address == known,
            None => {
                client.read_balance(address, candidate.token).await?
                    >= candidate.required_balance()
            }
        };
        if found {
            return Ok(Some(EscrowRecord {
                address,
                deployed_at,
                tx_hash: None,
            }));
        }
    }
    Ok(None)
}

/// Sleep for `delay` unless cancellation is requested first; returns whether
/// it was
async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = cancel.changed() => match changed {
            Ok(()) => *cancel.borrow(),
            // sender gone: no cancellation can arrive any more
            Err(_) => {
                tokio::time::sleep(delay).await;
                false
            }
        },
    }
}
