//! The channel state machine.
//!
//! Every state change runs the same pipeline: stage the mutation on a copy of the cell store,
//! hash the staged snapshot, generate a proof binding the old and new roots, verify it, and only
//! then swap the staged copy in. A failure at any step drops the copy, so the committed store,
//! balances and nonce are exactly what they were before the call.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use state_boc::{decode_framed, encode_framed, state_root, StateRoot, StateSnapshot, WireEncoding};
use state_dag::{Cell, CellId, CellKind, CellStore, CustomOpHandler, OpCode, RejectCustom};
use tracing::{debug, info, warn};
use transition_proof::{HashOracle, Proof, ProofOracle, Witness};

use crate::codec;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::htlc::{Htlc, HtlcId, HtlcParams, HtlcRecord, HtlcRegistry};
use crate::sink::SettlementSink;
use crate::state::{ChannelState, Ledger, ParticipantId, LEDGER_CELL, PARTICIPANTS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: usize,
    pub to: usize,
    pub amount: u64,
}

/// Cell ops plus an optional balance movement, committed as one transition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelTransaction {
    pub transfer: Option<Transfer>,
    pub ops: Vec<OpCode>,
}

/// Record of one committed transition, enough for the counterparty to check it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub nonce: u64,
    pub old_root: StateRoot,
    pub new_root: StateRoot,
    pub proof: Proof,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Transfer(Transfer),
    Transaction(ChannelTransaction),
    OpenHtlc(HtlcParams),
    ClaimHtlc {
        id: HtlcId,
        preimage: Vec<u8>,
        now: u64,
    },
    RefundHtlc {
        id: HtlcId,
        now: u64,
    },
    Settle,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::Transfer(_) => "transfer",
            Intent::Transaction(_) => "transaction",
            Intent::OpenHtlc(_) => "open_htlc",
            Intent::ClaimHtlc { .. } => "claim_htlc",
            Intent::RefundHtlc { .. } => "refund_htlc",
            Intent::Settle => "settle",
        }
    }
}

/// A transition applied to private copies of the channel state, waiting for its proof.
#[derive(Clone, Debug)]
pub struct StagedTransition {
    intent: &'static str,
    store: CellStore,
    ledger: Ledger,
    htlcs: HtlcRegistry,
    old_root: StateRoot,
    new_root: StateRoot,
    witness: Witness,
    opened_htlc: Option<HtlcId>,
    resolved_htlc: Option<HtlcId>,
}

impl StagedTransition {
    pub fn nonce(&self) -> u64 {
        self.ledger.nonce
    }

    pub fn old_root(&self) -> &StateRoot {
        &self.old_root
    }

    pub fn new_root(&self) -> &StateRoot {
        &self.new_root
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    pub fn opened_htlc(&self) -> Option<HtlcId> {
        self.opened_htlc
    }
}

#[derive(Serialize)]
struct TransitionRecord<'a> {
    intent: &'static str,
    nonce: u64,
    old_root: &'a StateRoot,
    new_root: &'a StateRoot,
    ledger: &'a Ledger,
}

pub type SharedHandler = Arc<dyn CustomOpHandler + Send + Sync>;

pub struct ChannelStateMachine {
    config: ChannelConfig,
    oracle: Arc<dyn ProofOracle>,
    handler: SharedHandler,
    store: CellStore,
    ledger: Ledger,
    htlcs: HtlcRegistry,
    root: StateRoot,
    updates: Vec<ChannelUpdate>,
}

impl ChannelStateMachine {
    /// Opens a channel proven by the built-in [`HashOracle`] at the configured security level.
    pub fn open(
        config: ChannelConfig,
        participants: [ParticipantId; PARTICIPANTS],
        deposits: [u64; PARTICIPANTS],
    ) -> ChannelResult<Self> {
        config.validate()?;
        let oracle = HashOracle::new(config.security_bits)?;
        Self::open_with_oracle(config, participants, deposits, Arc::new(oracle))
    }

    /// `participants[i]` owns `deposits[i]`; every later call names parties by that index.
    pub fn open_with_oracle(
        config: ChannelConfig,
        participants: [ParticipantId; PARTICIPANTS],
        deposits: [u64; PARTICIPANTS],
        oracle: Arc<dyn ProofOracle>,
    ) -> ChannelResult<Self> {
        config.validate()?;
        if participants[0] == participants[1] {
            return Err(ChannelError::InvalidArgument("channel participants must differ"));
        }
        if deposits.iter().all(|deposit| *deposit == 0) {
            return Err(ChannelError::InvalidArgument("total deposit must be non-zero"));
        }
        let ledger = Ledger::new(config.network, participants, deposits);
        let store = ledger.genesis_store(config.store_limits())?;
        let root = state_root(&store);
        info!(
            network = config.network.as_str(),
            party_a = %participants[0],
            party_b = %participants[1],
            balances = ?deposits,
            root = %hex::encode(root),
            "opened channel"
        );
        Ok(Self {
            config,
            oracle,
            handler: Arc::new(RejectCustom),
            store,
            ledger,
            htlcs: HtlcRegistry::default(),
            root,
            updates: Vec::new(),
        })
    }

    /// Routes [`OpCode::Custom`] ops in transactions to `handler`.
    pub fn with_custom_handler(mut self, handler: SharedHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn oracle(&self) -> Arc<dyn ProofOracle> {
        Arc::clone(&self.oracle)
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_ledger(&self.ledger, self.root)
    }

    pub fn balances(&self) -> [u64; PARTICIPANTS] {
        self.ledger.balances
    }

    pub fn participants(&self) -> [ParticipantId; PARTICIPANTS] {
        self.ledger.participants
    }

    pub fn nonce(&self) -> u64 {
        self.ledger.nonce
    }

    pub fn root(&self) -> &StateRoot {
        &self.root
    }

    pub fn is_settled(&self) -> bool {
        self.ledger.settled
    }

    pub fn store(&self) -> &CellStore {
        &self.store
    }

    pub fn htlc(&self, id: HtlcId) -> Option<&Htlc> {
        self.htlcs.get(id).map(|entry| &entry.htlc)
    }

    pub fn htlcs(&self) -> &HtlcRegistry {
        &self.htlcs
    }

    /// Every committed update, oldest first.
    pub fn updates(&self) -> &[ChannelUpdate] {
        &self.updates
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::from_store(&self.store).sealed()
    }

    /// Framed snapshot of the committed state, as sent alongside a [`ChannelUpdate`].
    pub fn export_snapshot(&self, encoding: WireEncoding) -> ChannelResult<Vec<u8>> {
        Ok(encode_framed(&self.snapshot(), encoding)?)
    }

    /// Checks a proof against this channel's oracle without touching any state.
    pub fn verify_update(&self, update: &ChannelUpdate) -> bool {
        self.oracle
            .verify_proof(&update.proof, &update.old_root, &update.new_root)
    }

    pub fn transfer(&mut self, from: usize, to: usize, amount: u64) -> ChannelResult<ChannelUpdate> {
        self.execute(Intent::Transfer(Transfer { from, to, amount }))
            .map(|(update, _)| update)
    }

    pub fn process_transaction(&mut self, transaction: ChannelTransaction) -> ChannelResult<ChannelUpdate> {
        self.execute(Intent::Transaction(transaction))
            .map(|(update, _)| update)
    }

    pub fn open_htlc(&mut self, params: HtlcParams) -> ChannelResult<(HtlcId, ChannelUpdate)> {
        let (update, opened) = self.execute(Intent::OpenHtlc(params))?;
        let id = opened.ok_or(ChannelError::InvalidOperation("htlc was not recorded"))?;
        Ok((id, update))
    }

    pub fn claim_htlc(&mut self, id: HtlcId, preimage: &[u8], now: u64) -> ChannelResult<ChannelUpdate> {
        self.execute(Intent::ClaimHtlc {
            id,
            preimage: preimage.to_vec(),
            now,
        })
        .map(|(update, _)| update)
    }

    pub fn refund_htlc(&mut self, id: HtlcId, now: u64) -> ChannelResult<ChannelUpdate> {
        self.execute(Intent::RefundHtlc { id, now })
            .map(|(update, _)| update)
    }

    /// Final transition. Afterwards every state-changing call fails with `InvalidOperation`.
    pub fn settle(&mut self) -> ChannelResult<ChannelUpdate> {
        let update = self.execute(Intent::Settle).map(|(update, _)| update)?;
        info!(
            nonce = update.nonce,
            root = %hex::encode(update.new_root),
            balances = ?self.ledger.balances,
            "channel settled"
        );
        Ok(update)
    }

    /// Settles and hands the framed final snapshot to `sink`.
    ///
    /// Settlement commits before the sink runs. A sink failure comes back as
    /// [`ChannelError::SettlementUndelivered`] carrying the committed update; delivery can then
    /// be retried with [`Self::submit_settlement`].
    pub fn settle_into(
        &mut self,
        sink: &mut dyn SettlementSink,
        encoding: WireEncoding,
    ) -> ChannelResult<ChannelUpdate> {
        let update = self.settle()?;
        match self.submit_settlement(sink, encoding) {
            Ok(()) => Ok(update),
            Err(err) => {
                warn!(nonce = update.nonce, %err, "settlement snapshot not delivered");
                Err(ChannelError::SettlementUndelivered {
                    update: Box::new(update),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Sends the final snapshot of a settled channel to `sink`.
    pub fn submit_settlement(
        &self,
        sink: &mut dyn SettlementSink,
        encoding: WireEncoding,
    ) -> ChannelResult<()> {
        if !self.ledger.settled {
            return Err(ChannelError::InvalidOperation("channel is not settled"));
        }
        let framed = self.export_snapshot(encoding)?;
        sink.submit(&self.root, &framed)
    }

    /// Runs the whole pipeline for `intent` under the caller's exclusive borrow.
    pub fn execute(&mut self, intent: Intent) -> ChannelResult<(ChannelUpdate, Option<HtlcId>)> {
        let proven = self.stage(&intent).and_then(|staged| {
            let proof = prove(self.oracle.as_ref(), &staged)?;
            Ok((staged, proof))
        });
        match proven {
            Ok((staged, proof)) => {
                let opened = staged.opened_htlc;
                let update = self.commit(staged, proof)?;
                Ok((update, opened))
            }
            Err(err) => {
                warn!(intent = intent.name(), nonce = self.ledger.nonce, %err, "transition rolled back");
                Err(err)
            }
        }
    }

    /// Applies `intent` to copies of the store, ledger and HTLC table and hashes the result.
    /// Nothing on `self` changes.
    pub fn stage(&self, intent: &Intent) -> ChannelResult<StagedTransition> {
        if self.ledger.settled {
            return Err(ChannelError::InvalidOperation("channel is settled"));
        }
        let mut store = self.store.clone();
        let mut ledger = self.ledger.clone();
        let mut htlcs = self.htlcs.clone();
        let mut opened_htlc = None;
        let mut resolved_htlc = None;

        match intent {
            Intent::Transfer(transfer) => apply_transfer(&mut ledger, transfer)?,
            Intent::Transaction(transaction) => {
                self.apply_user_ops(&mut store, &htlcs, &transaction.ops)?;
                if let Some(transfer) = &transaction.transfer {
                    apply_transfer(&mut ledger, transfer)?;
                }
            }
            Intent::OpenHtlc(params) => {
                check_participant(params.sender)?;
                check_participant(params.recipient)?;
                if params.sender == params.recipient {
                    return Err(ChannelError::InvalidArgument("htlc sender and recipient must differ"));
                }
                let htlc = Htlc::new(params)?;
                ledger.debit(params.sender, htlc.amount())?;
                ledger.locked = ledger
                    .locked
                    .checked_add(htlc.amount())
                    .ok_or(ChannelError::BalanceOverflow)?;
                let id = htlcs.next_id();
                let payload = codec::encode(&HtlcRecord {
                    id,
                    htlc: htlc.clone(),
                })?;
                let cell = store.add_cell(payload, CellKind::Ordinary)?;
                store.add_reference(LEDGER_CELL, cell)?;
                htlcs.insert(id, htlc, cell);
                opened_htlc = Some(id);
            }
            Intent::ClaimHtlc { id, preimage, now } => {
                let policy = self.config.claim_policy;
                resolve_htlc(&mut store, &mut ledger, &mut htlcs, *id, |htlc| {
                    htlc.claim_at(preimage, *now, policy)?;
                    Ok(htlc.recipient())
                })?;
                resolved_htlc = Some(*id);
            }
            Intent::RefundHtlc { id, now } => {
                resolve_htlc(&mut store, &mut ledger, &mut htlcs, *id, |htlc| {
                    htlc.refund(*now)?;
                    Ok(htlc.sender())
                })?;
                resolved_htlc = Some(*id);
            }
            Intent::Settle => {
                if htlcs.pending().next().is_some() {
                    return Err(ChannelError::InvalidOperation(
                        "pending htlcs must be resolved before settlement",
                    ));
                }
                ledger.settled = true;
            }
        }

        ledger.bump_nonce()?;
        store.set_data(LEDGER_CELL, ledger.encode()?)?;
        let new_root = state_root(&store);
        let witness = Witness::new(codec::encode(&TransitionRecord {
            intent: intent.name(),
            nonce: ledger.nonce,
            old_root: &self.root,
            new_root: &new_root,
            ledger: &ledger,
        })?);
        debug!(
            intent = intent.name(),
            nonce = ledger.nonce,
            new_root = %hex::encode(new_root),
            "staged transition"
        );
        Ok(StagedTransition {
            intent: intent.name(),
            store,
            ledger,
            htlcs,
            old_root: self.root,
            new_root,
            witness,
            opened_htlc,
            resolved_htlc,
        })
    }

    /// Swaps a proven transition in. Fails if another transition committed since it was staged.
    pub fn commit(&mut self, staged: StagedTransition, proof: Proof) -> ChannelResult<ChannelUpdate> {
        let expected = self.ledger.nonce.checked_add(1).ok_or(ChannelError::NonceOverflow)?;
        if staged.old_root != self.root || staged.ledger.nonce != expected {
            return Err(ChannelError::InvalidOperation("staged transition is stale"));
        }
        let update = ChannelUpdate {
            nonce: staged.ledger.nonce,
            old_root: staged.old_root,
            new_root: staged.new_root,
            proof,
        };
        self.store = staged.store;
        self.ledger = staged.ledger;
        self.htlcs = staged.htlcs;
        self.root = staged.new_root;
        self.updates.push(update.clone());
        info!(
            intent = staged.intent,
            nonce = update.nonce,
            root = %hex::encode(update.new_root),
            "committed channel update"
        );
        let resolved = staged
            .resolved_htlc
            .and_then(|id| self.htlcs.get(id).map(|entry| (id, entry)));
        if let Some((id, entry)) = resolved {
            info!(
                htlc = id,
                state = ?entry.htlc.state(),
                amount = entry.htlc.amount(),
                nonce = update.nonce,
                "htlc resolved"
            );
        }
        Ok(update)
    }

    /// Checks that `next` can follow `prior`: same network and parties, prior not settled, nonce
    /// advanced by exactly one, and balances plus locked value unchanged.
    pub fn verify_transition(prior: &ChannelState, next: &ChannelState) -> ChannelResult<()> {
        if prior.settled {
            return Err(ChannelError::InvalidOperation("channel is settled"));
        }
        if prior.network != next.network {
            return Err(ChannelError::InvalidOperation("network changed"));
        }
        if prior.participants != next.participants {
            return Err(ChannelError::InvalidOperation("participants changed"));
        }
        let expected = prior.nonce.checked_add(1).ok_or(ChannelError::NonceOverflow)?;
        if next.nonce != expected {
            return Err(ChannelError::InvalidNonce {
                expected,
                actual: next.nonce,
            });
        }
        let before = prior.total_value();
        let after = next.total_value();
        if before != after {
            return Err(ChannelError::ValueNotConserved { before, after });
        }
        Ok(())
    }

    /// Adopts a transition the counterparty committed. `snapshot` is the framed post-state.
    pub fn receive_update(&mut self, update: &ChannelUpdate, snapshot: &[u8]) -> ChannelResult<()> {
        let result = self.check_remote(update, snapshot);
        match result {
            Ok((store, ledger, htlcs)) => {
                self.store = store;
                self.ledger = ledger;
                self.htlcs = htlcs;
                self.root = update.new_root;
                self.updates.push(update.clone());
                info!(
                    nonce = update.nonce,
                    root = %hex::encode(update.new_root),
                    "accepted remote channel update"
                );
                Ok(())
            }
            Err(err) => {
                warn!(nonce = update.nonce, %err, "rejected remote channel update");
                Err(err)
            }
        }
    }

    fn check_remote(
        &self,
        update: &ChannelUpdate,
        snapshot: &[u8],
    ) -> ChannelResult<(CellStore, Ledger, HtlcRegistry)> {
        if self.ledger.settled {
            return Err(ChannelError::InvalidOperation("channel is settled"));
        }
        let expected = self.ledger.nonce.checked_add(1).ok_or(ChannelError::NonceOverflow)?;
        if update.nonce != expected {
            return Err(ChannelError::InvalidNonce {
                expected,
                actual: update.nonce,
            });
        }
        if update.old_root != self.root {
            return Err(root_mismatch(&self.root, &update.old_root));
        }

        let snapshot = decode_framed(snapshot)?;
        let computed = snapshot.compute_hash();
        if computed != update.new_root {
            return Err(root_mismatch(&update.new_root, &computed));
        }
        let store = snapshot.to_store(self.config.store_limits())?;
        if !store.is_root(LEDGER_CELL) {
            return Err(ChannelError::InvalidOperation("ledger cell is not a root"));
        }
        let ledger = Ledger::read_from(&store)?;
        if ledger.nonce != update.nonce {
            return Err(ChannelError::InvalidNonce {
                expected: update.nonce,
                actual: ledger.nonce,
            });
        }
        let htlcs = registry_from_store(&store)?;
        if u128::from(ledger.locked) != htlcs.locked() {
            return Err(ChannelError::InvalidOperation(
                "ledger locked value disagrees with htlc cells",
            ));
        }

        let next = ChannelState::from_ledger(&ledger, update.new_root);
        Self::verify_transition(&self.state(), &next)?;
        if !self.verify_update(update) {
            return Err(ChannelError::Verification);
        }
        Ok((store, ledger, htlcs))
    }

    fn apply_user_ops(
        &self,
        store: &mut CellStore,
        htlcs: &HtlcRegistry,
        ops: &[OpCode],
    ) -> ChannelResult<()> {
        let protected: BTreeSet<CellId> = std::iter::once(LEDGER_CELL).chain(htlcs.cells()).collect();
        if ops
            .iter()
            .filter_map(OpCode::mutated_cell)
            .any(|id| protected.contains(&id))
        {
            return Err(ChannelError::InvalidOperation(
                "ops may not modify channel-owned cells",
            ));
        }
        let before: Vec<Cell> = protected
            .iter()
            .filter_map(|id| store.get(*id).cloned())
            .collect();
        store.apply_all(ops, self.handler.as_ref())?;
        if before.iter().any(|cell| store.get(cell.id()) != Some(cell)) {
            return Err(ChannelError::InvalidOperation(
                "custom op modified a channel-owned cell",
            ));
        }
        Ok(())
    }
}

/// Generates a proof for `staged` and checks it with the same oracle.
pub fn prove(oracle: &dyn ProofOracle, staged: &StagedTransition) -> ChannelResult<Proof> {
    debug!(intent = staged.intent, nonce = staged.nonce(), "generating transition proof");
    let proof = oracle.generate_proof(&staged.old_root, &staged.new_root, &staged.witness)?;
    if !oracle.verify_proof(&proof, &staged.old_root, &staged.new_root) {
        return Err(ChannelError::Verification);
    }
    debug!(intent = staged.intent, nonce = staged.nonce(), "transition proof verified");
    Ok(proof)
}

fn check_participant(index: usize) -> ChannelResult<()> {
    if index >= PARTICIPANTS {
        return Err(ChannelError::InvalidArgument("participant index out of range"));
    }
    Ok(())
}

fn apply_transfer(ledger: &mut Ledger, transfer: &Transfer) -> ChannelResult<()> {
    check_participant(transfer.from)?;
    check_participant(transfer.to)?;
    if transfer.from == transfer.to {
        return Err(ChannelError::InvalidArgument("cannot transfer to the same participant"));
    }
    if transfer.amount == 0 {
        return Err(ChannelError::InvalidArgument("transfer amount must be non-zero"));
    }
    ledger.debit(transfer.from, transfer.amount)?;
    ledger.credit(transfer.to, transfer.amount)
}

/// Runs `resolve` on a pending HTLC, releases its amount to the participant it returns, and
/// rewrites the HTLC cell.
fn resolve_htlc<F>(
    store: &mut CellStore,
    ledger: &mut Ledger,
    htlcs: &mut HtlcRegistry,
    id: HtlcId,
    resolve: F,
) -> ChannelResult<()>
where
    F: FnOnce(&mut Htlc) -> ChannelResult<usize>,
{
    let entry = htlcs.get_mut(id).ok_or(ChannelError::HtlcNotFound(id))?;
    let payee = resolve(&mut entry.htlc)?;
    let amount = entry.htlc.amount();
    ledger.locked = ledger
        .locked
        .checked_sub(amount)
        .ok_or(ChannelError::InvalidOperation("locked value underflow"))?;
    ledger.credit(payee, amount)?;
    let payload = codec::encode(&HtlcRecord {
        id,
        htlc: entry.htlc.clone(),
    })?;
    store.set_data(entry.cell, payload)?;
    debug!(htlc = id, state = ?entry.htlc.state(), payee, amount, "staged htlc resolution");
    Ok(())
}

/// The ledger cell only ever references HTLC cells.
fn registry_from_store(store: &CellStore) -> ChannelResult<HtlcRegistry> {
    let ledger = store
        .get(LEDGER_CELL)
        .ok_or(ChannelError::InvalidOperation("store has no ledger cell"))?;
    let mut registry = HtlcRegistry::default();
    for cell_id in ledger.references() {
        let cell = store.get(*cell_id).ok_or(state_dag::CellError::NotFound(*cell_id))?;
        let record: HtlcRecord = codec::decode(cell.payload())?;
        if registry.get(record.id).is_some() {
            return Err(ChannelError::InvalidOperation("duplicate htlc id"));
        }
        registry.insert(record.id, record.htlc, *cell_id);
    }
    Ok(registry)
}

fn root_mismatch(expected: &StateRoot, actual: &StateRoot) -> ChannelError {
    ChannelError::RootMismatch {
        expected: hex::encode(expected),
        actual: hex::encode(actual),
    }
}
