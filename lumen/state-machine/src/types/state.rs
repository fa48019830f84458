use std::collections::HashMap;

use derive_more::Display;
use lumen_primitives::{
	constants::{
		FORK_CONFIRM_NUMBER,
		MINIMUM_REVEAL_TIMEOUT,
	},
	hashing::{
		hash_lock_leaf,
		hash_secret,
	},
	types::{
		Address,
		BlockExpiration,
		BlockNumber,
		CanonicalIdentifier,
		ChainID,
		ChannelIdentifier,
		FeeAmount,
		Locksroot,
		Nonce,
		RevealTimeout,
		Secret,
		SecretHash,
		SecretRegistryAddress,
		SettleTimeout,
		Signature,
		TokenAddress,
		TokenAmount,
		TokenNetworkAddress,
		H256,
	},
};
use serde::{
	Deserialize,
	Serialize,
};

use crate::{
	errors::ChannelError,
	machine::mtree::{
		LockTree,
		MerkleProof,
	},
	types::Random,
};

/// Channel lifecycle states. Transfers are only admissible in `Opened`.
#[derive(Copy, Clone, Display, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
	#[display(fmt = "opened")]
	Opened,
	#[display(fmt = "prepare_for_withdraw")]
	PrepareForWithdraw,
	#[display(fmt = "withdraw")]
	Withdraw,
	#[display(fmt = "partner_withdrawing")]
	PartnerWithdrawing,
	#[display(fmt = "prepare_for_cooperative_settle")]
	PrepareForCooperativeSettle,
	#[display(fmt = "cooperative_settle")]
	CooperativeSettle,
	#[display(fmt = "partner_cooperative_settling")]
	PartnerCooperativeSettling,
	#[display(fmt = "closing")]
	Closing,
	#[display(fmt = "closed")]
	Closed,
	#[display(fmt = "settled")]
	Settled,
}

impl ChannelStatus {
	/// New transfers may only be created or registered while the channel is
	/// fully open.
	pub fn can_transfer(&self) -> bool {
		*self == ChannelStatus::Opened
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, ChannelStatus::Closing | ChannelStatus::Closed | ChannelStatus::Settled)
	}
}

/// The signed authorization of the current off-chain state of one
/// participant. An empty proof carries nonce zero, the null sentinel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BalanceProofState {
	pub nonce: Nonce,
	pub transferred_amount: TokenAmount,
	pub locksroot: Locksroot,
	pub canonical_identifier: CanonicalIdentifier,
	pub message_hash: Option<H256>,
	pub signature: Option<Signature>,
	pub sender: Option<Address>,
}

impl BalanceProofState {
	pub fn empty(canonical_identifier: CanonicalIdentifier) -> Self {
		Self {
			nonce: 0,
			transferred_amount: TokenAmount::zero(),
			locksroot: Locksroot::zero(),
			canonical_identifier,
			message_hash: None,
			signature: None,
			sender: None,
		}
	}
}

/// A hash-time lock, pending until its secret is claimed or it expires.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct HashTimeLockState {
	pub amount: TokenAmount,
	pub expiration: BlockExpiration,
	pub secrethash: SecretHash,
}

impl HashTimeLockState {
	pub fn new(
		amount: TokenAmount,
		expiration: BlockExpiration,
		secrethash: SecretHash,
	) -> Self {
		Self { amount, expiration, secrethash }
	}

	/// Leaf hash of this lock in the lock tree.
	pub fn leaf(&self) -> H256 {
		hash_lock_leaf(self.expiration, self.amount, self.secrethash)
	}
}

/// A lock whose secret is unknown to this endpoint, together with its
/// position in the lock tree.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct PendingLock {
	pub lock: HashTimeLockState,
	pub merkle_position: usize,
}

/// A lock whose secret was learned but is not yet reflected in a new
/// balance proof.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct UnlockPartialProof {
	pub lock: HashTimeLockState,
	pub secret: Secret,
	pub registered_on_chain: bool,
}

/// Everything needed to unlock a claimable lock on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct UnlockProof {
	pub lock: HashTimeLockState,
	pub secret: Secret,
	pub merkle_proof: MerkleProof,
}

/// The view a channel keeps for one of its two participants.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ChannelEndState {
	pub address: Address,
	pub contract_balance: TokenAmount,
	pub balance_proof: Option<BalanceProofState>,
	pub contract_transferred_amount: TokenAmount,
	pub contract_locksroot: Locksroot,
	pub contract_nonce: Nonce,
	pub pending_locks: HashMap<SecretHash, PendingLock>,
	pub unclaimed_locks: HashMap<SecretHash, UnlockPartialProof>,
	pub lock_tree: LockTree,
}

impl ChannelEndState {
	pub fn new(address: Address) -> Self {
		Self {
			address,
			contract_balance: TokenAmount::zero(),
			balance_proof: None,
			contract_transferred_amount: TokenAmount::zero(),
			contract_locksroot: Locksroot::zero(),
			contract_nonce: 0,
			pending_locks: HashMap::new(),
			unclaimed_locks: HashMap::new(),
			lock_tree: LockTree::default(),
		}
	}

	pub fn nonce(&self) -> Nonce {
		self.balance_proof.as_ref().map(|bp| bp.nonce).unwrap_or(0)
	}

	/// Nonce a new balance proof of this participant must carry. Zero is the
	/// null sentinel, so the sequence starts at one. Only the punished
	/// barrier wraps, and a wrapped nonce never passes validation.
	pub fn next_nonce(&self) -> Nonce {
		self.nonce().wrapping_add(1)
	}

	pub fn transferred_amount(&self) -> TokenAmount {
		self.balance_proof
			.as_ref()
			.map(|bp| bp.transferred_amount)
			.unwrap_or_else(TokenAmount::zero)
	}

	pub fn locksroot(&self) -> Locksroot {
		self.lock_tree.root()
	}

	/// Total token amount held back by pending and unclaimed locks.
	pub fn amount_locked(&self) -> TokenAmount {
		let pending: TokenAmount = self
			.pending_locks
			.values()
			.fold(TokenAmount::zero(), |acc, pending| acc + pending.lock.amount);
		let unclaimed: TokenAmount = self
			.unclaimed_locks
			.values()
			.fold(TokenAmount::zero(), |acc, unlock| acc + unlock.lock.amount);
		pending + unclaimed
	}

	/// Net balance towards `other`: deposits minus what we sent plus what
	/// the other side sent us.
	pub fn balance_to(&self, other: &ChannelEndState) -> TokenAmount {
		self.contract_balance - self.transferred_amount() + other.transferred_amount()
	}

	/// What can still be transferred to `other` without touching locked
	/// amounts.
	pub fn distributable_to(&self, other: &ChannelEndState) -> TokenAmount {
		self.balance_to(other) - self.amount_locked()
	}

	pub fn count_pending_locks(&self) -> usize {
		self.pending_locks.len() + self.unclaimed_locks.len()
	}

	/// True when a lock with this hash is registered, pending or unclaimed.
	pub fn is_known(&self, secrethash: SecretHash) -> bool {
		self.pending_locks.contains_key(&secrethash) ||
			self.unclaimed_locks.contains_key(&secrethash)
	}

	pub fn is_secret_known(&self, secrethash: SecretHash) -> bool {
		self.unclaimed_locks.contains_key(&secrethash)
	}

	pub fn get_lock(&self, secrethash: SecretHash) -> Option<&HashTimeLockState> {
		self.pending_locks
			.get(&secrethash)
			.map(|pending| &pending.lock)
			.or_else(|| self.unclaimed_locks.get(&secrethash).map(|unlock| &unlock.lock))
	}

	pub fn get_secret(&self, secrethash: SecretHash) -> Option<Secret> {
		self.unclaimed_locks.get(&secrethash).map(|unlock| unlock.secret)
	}

	/// Move the lock matching `secret` from pending to unclaimed. The lock
	/// amount is only claimed once a new balance proof arrives.
	pub fn register_secret(&mut self, secret: Secret) -> Result<(), ChannelError> {
		let secrethash = hash_secret(secret.as_bytes());
		let pending = self
			.pending_locks
			.remove(&secrethash)
			.ok_or(ChannelError::LockSecretHashNotFound)?;
		self.unclaimed_locks.insert(
			secrethash,
			UnlockPartialProof { lock: pending.lock, secret, registered_on_chain: false },
		);
		Ok(())
	}

	/// Same as `register_secret` for a secret revealed on-chain. Locks that
	/// expired before the registration block stay pending, the registration
	/// came too late to claim them.
	pub fn register_revealed_on_chain(
		&mut self,
		secrethash: SecretHash,
		secret: Secret,
		block_number: BlockNumber,
	) -> Result<(), ChannelError> {
		{
			let pending = self
				.pending_locks
				.get(&secrethash)
				.ok_or(ChannelError::LockSecretHashNotFound)?;
			if pending.lock.expiration < block_number {
				return Ok(())
			}
		}
		let pending = self.pending_locks.remove(&secrethash).expect("Checked above");
		self.unclaimed_locks.insert(
			secrethash,
			UnlockPartialProof { lock: pending.lock, secret, registered_on_chain: true },
		);
		Ok(())
	}

	/// Compute the lock tree without the given pending lock.
	///
	/// Fails if the lock is unknown, if its secret is already known (such a
	/// lock must be unlocked, never removed) or, with `must_be_expired`, if
	/// not enough blocks have passed since its expiration.
	pub fn try_remove_hash_lock(
		&self,
		secrethash: SecretHash,
		block_number: BlockNumber,
		must_be_expired: bool,
	) -> Result<(HashTimeLockState, LockTree, Locksroot), ChannelError> {
		if self.unclaimed_locks.contains_key(&secrethash) {
			return Err(ChannelError::LockMismatch)
		}
		let pending = self
			.pending_locks
			.get(&secrethash)
			.ok_or(ChannelError::LockSecretHashNotFound)?;
		if must_be_expired && block_number <= pending.lock.expiration + FORK_CONFIRM_NUMBER {
			return Err(ChannelError::LockNotExpired)
		}
		let (tree, _) = self.lock_tree.remove(secrethash).ok_or(ChannelError::LockMismatch)?;
		let root = tree.root();
		Ok((pending.lock.clone(), tree, root))
	}

	/// Unlock proofs for every lock whose secret this endpoint knows. Used
	/// to claim locks on-chain after a close.
	pub fn can_unlock_on_chain(&self) -> Vec<UnlockProof> {
		self.unclaimed_locks
			.values()
			.filter_map(|unlock| {
				self.lock_tree.proof(unlock.lock.secrethash).map(|merkle_proof| UnlockProof {
					lock: unlock.lock.clone(),
					secret: unlock.secret,
					merkle_proof,
				})
			})
			.collect()
	}

	/// Install a new lock tree and refresh the recorded merkle positions.
	pub(crate) fn set_lock_tree(&mut self, tree: LockTree) {
		self.lock_tree = tree;
		for pending in self.pending_locks.values_mut() {
			if let Some(position) = self.lock_tree.position_of(pending.lock.secrethash) {
				pending.merkle_position = position;
			}
		}
	}
}

/// The participants' agreement exchanged by the withdraw and cooperative
/// settle sub-protocols. Both signatures are collected before going
/// on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SettlementAgreement {
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub withdraw_amount: Option<TokenAmount>,
	pub participant1_signature: Option<Signature>,
	pub participant2_signature: Option<Signature>,
}

/// The living representation of a channel on the ledger, holding all
/// transfers between its two participants.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ChannelState {
	pub canonical_identifier: CanonicalIdentifier,
	pub token_address: TokenAddress,
	pub token_network_address: TokenNetworkAddress,
	pub reveal_timeout: RevealTimeout,
	pub settle_timeout: SettleTimeout,
	pub our_state: ChannelEndState,
	pub partner_state: ChannelEndState,
	pub status: ChannelStatus,
	pub closed_block: BlockNumber,
	pub settled_block: BlockNumber,
	pub pending_agreement: Option<SettlementAgreement>,
}

impl ChannelState {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		canonical_identifier: CanonicalIdentifier,
		token_address: TokenAddress,
		token_network_address: TokenNetworkAddress,
		our_address: Address,
		partner_address: Address,
		reveal_timeout: RevealTimeout,
		settle_timeout: SettleTimeout,
	) -> Result<ChannelState, ChannelError> {
		if settle_timeout <= reveal_timeout {
			return Err(ChannelError::InvalidSettleTimeout)
		}
		if reveal_timeout < MINIMUM_REVEAL_TIMEOUT.into() {
			return Err(ChannelError::InvalidRevealTimeout)
		}
		Ok(ChannelState {
			canonical_identifier,
			token_address,
			token_network_address,
			reveal_timeout,
			settle_timeout,
			our_state: ChannelEndState::new(our_address),
			partner_state: ChannelEndState::new(partner_address),
			status: ChannelStatus::Opened,
			closed_block: BlockNumber::zero(),
			settled_block: BlockNumber::zero(),
			pending_agreement: None,
		})
	}

	pub fn status(&self) -> ChannelStatus {
		self.status
	}

	pub fn can_transfer(&self) -> bool {
		self.status.can_transfer()
	}

	pub fn is_closed(&self) -> bool {
		self.status.is_closed()
	}

	/// Last block at which a lock can safely be claimed. Once the channel is
	/// closed the settlement window is already running.
	pub fn get_settle_expiration(&self, block_number: BlockNumber) -> BlockExpiration {
		if !self.closed_block.is_zero() {
			self.closed_block + self.settle_timeout
		} else {
			block_number + self.settle_timeout
		}
	}

	pub fn distributable(&self) -> TokenAmount {
		self.our_state.distributable_to(&self.partner_state)
	}

	pub fn our_balance(&self) -> TokenAmount {
		self.our_state.balance_to(&self.partner_state)
	}

	pub fn partner_balance(&self) -> TokenAmount {
		self.partner_state.balance_to(&self.our_state)
	}

	/// True while any lock is registered on either side, pending or
	/// unclaimed.
	pub fn has_any_lock(&self) -> bool {
		self.our_state.count_pending_locks() > 0 || self.partner_state.count_pending_locks() > 0
	}

	pub fn participant_state(&self, address: Address) -> Option<&ChannelEndState> {
		if self.our_state.address == address {
			Some(&self.our_state)
		} else if self.partner_state.address == address {
			Some(&self.partner_state)
		} else {
			None
		}
	}
}

/// One candidate hop for a payment, derived from a live channel at route
/// computation time.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct RouteState {
	pub hop_node: Address,
	pub channel_identifier: ChannelIdentifier,
	pub settle_timeout: SettleTimeout,
	pub reveal_timeout: RevealTimeout,
	pub fee: FeeAmount,
	pub available_balance: TokenAmount,
	pub closed_block: BlockNumber,
}

/// Ordered route candidates, best first. Skipped candidates move to the
/// ignored list so a failure reason can be reported.
#[derive(Default, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct RoutesState {
	pub available_routes: Vec<RouteState>,
	pub ignored_routes: Vec<RouteState>,
	pub canceled_routes: Vec<RouteState>,
}

impl RoutesState {
	pub fn new(available_routes: Vec<RouteState>) -> Self {
		Self { available_routes, ignored_routes: vec![], canceled_routes: vec![] }
	}
}

/// A mediated transfer as locked into one channel. `amount` carries the
/// remaining mediation fees, `target_amount` is what the target receives.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct LockedTransferState {
	pub channel_identifier: CanonicalIdentifier,
	pub token: TokenAddress,
	pub initiator: Address,
	pub target: Address,
	pub amount: TokenAmount,
	pub target_amount: TokenAmount,
	pub fee: FeeAmount,
	pub expiration: BlockExpiration,
	pub secrethash: SecretHash,
	pub secret: Option<Secret>,
}

/// What the initiator wants to pay, before any route is chosen.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct TransferDescription {
	pub token_address: TokenAddress,
	pub amount: TokenAmount,
	pub fee: FeeAmount,
	pub initiator: Address,
	pub target: Address,
	pub secret: Secret,
	pub secrethash: SecretHash,
	pub expiration: Option<BlockExpiration>,
}

/// Progress of the payment from the initiator's point of view.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum TransferState {
	Pending,
	SecretRevealed,
	Canceled,
	Expired,
}

/// Per-payment state at the initiator.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct InitiatorState {
	pub our_address: Address,
	pub transfer_description: TransferDescription,
	pub routes: RoutesState,
	pub route: Option<RouteState>,
	pub transfer: Option<LockedTransferState>,
	pub block_number: BlockNumber,
	pub transfer_state: TransferState,
	pub received_secret_request: bool,
	pub cancel_by_exception_secret_request: bool,
}

/// Secret and balance-proof progress of the payee side of a mediation pair.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum PayeeState {
	Pending,
	SecretRevealed,
	BalanceProof,
	Expired,
}

/// Secret and balance-proof progress of the payer side of a mediation pair.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum PayerState {
	Pending,
	SecretRevealed,
	WaitingRegisterSecret,
	BalanceProof,
	Expired,
}

/// One hop mediated by this node: the transfer received from the payer and
/// the transfer forwarded to the payee, with the progress of each side.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct MediationPairState {
	pub payer_route: RouteState,
	pub payee_route: RouteState,
	pub payer_transfer: LockedTransferState,
	pub payee_transfer: LockedTransferState,
	pub payer_state: PayerState,
	pub payee_state: PayeeState,
}

impl MediationPairState {
	pub fn new(
		payer_route: RouteState,
		payee_route: RouteState,
		payer_transfer: LockedTransferState,
		payee_transfer: LockedTransferState,
	) -> Self {
		Self {
			payer_route,
			payee_route,
			payer_transfer,
			payee_transfer,
			payer_state: PayerState::Pending,
			payee_state: PayeeState::Pending,
		}
	}
}

/// Per-payment state at a mediator.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct MediatorState {
	pub our_address: Address,
	pub routes: RoutesState,
	pub block_number: BlockNumber,
	pub secrethash: SecretHash,
	pub secret: Option<Secret>,
	pub token: TokenAddress,
	pub transfers_pair: Vec<MediationPairState>,
}

/// A payment state manager, keyed by `keccak(lock_secret_hash || token)`.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum TransferTask {
	Initiator(InitiatorState),
	Mediator(MediatorState),
}

/// The single mutable root of the node: every channel and every payment
/// task, owned exclusively by the dispatcher.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChainState {
	pub chain_id: ChainID,
	pub block_number: BlockNumber,
	pub our_address: Address,
	pub token_network_address: TokenNetworkAddress,
	pub secret_registry_address: SecretRegistryAddress,
	pub tokens: HashMap<TokenAddress, BlockNumber>,
	pub channels: HashMap<ChannelIdentifier, ChannelState>,
	pub payment_mapping: HashMap<H256, TransferTask>,
	pub pseudo_random_number_generator: Random,
}

impl ChainState {
	pub fn new(
		chain_id: ChainID,
		block_number: BlockNumber,
		our_address: Address,
		token_network_address: TokenNetworkAddress,
		secret_registry_address: SecretRegistryAddress,
	) -> ChainState {
		ChainState {
			chain_id,
			block_number,
			our_address,
			token_network_address,
			secret_registry_address,
			tokens: HashMap::new(),
			channels: HashMap::new(),
			payment_mapping: HashMap::new(),
			pseudo_random_number_generator: Random::new(),
		}
	}
}
