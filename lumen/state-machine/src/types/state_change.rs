#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	Address,
	BlockNumber,
	CanonicalIdentifier,
	ChannelIdentifier,
	Locksroot,
	Nonce,
	Secret,
	SecretHash,
	SettleTimeout,
	Signature,
	TokenAddress,
	TokenAmount,
	TransactionHash,
};
use serde::{
	Deserialize,
	Serialize,
};

use crate::types::{
	HashTimeLockState,
	LockedTransferState,
	RouteState,
	TransactionResult,
	TransferDescription,
};

/// Head shared by every signed envelope message. The nonce and the declared
/// balance-proof values are validated before any type-specific check.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
	pub nonce: Nonce,
	pub canonical_identifier: CanonicalIdentifier,
	pub transferred_amount: TokenAmount,
	pub locksroot: Locksroot,
	pub sender: Address,
	pub signature: Signature,
}

/// Converts a state-change struct into its enum variant.
macro_rules! into_state_change {
	($($name:ident),* $(,)?) => {
		$(
			impl From<$name> for StateChange {
				fn from(inner: $name) -> StateChange {
					StateChange::$name(inner)
				}
			}
		)*
	};
}

/// An enum containing all possible state change variants.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum StateChange {
	Block(Block),
	HistoryComplete(HistoryComplete),
	ActionInitInitiator(ActionInitInitiator),
	ActionInitMediator(ActionInitMediator),
	ActionCancelRoute(ActionCancelRoute),
	ActionCancelTransfer(ActionCancelTransfer),
	ActionTransferDirect(ActionTransferDirect),
	ActionChannelClose(ActionChannelClose),
	ActionChannelWithdraw(ActionChannelWithdraw),
	ActionChannelCooperativeSettle(ActionChannelCooperativeSettle),
	ActionCancelWithdraw(ActionCancelWithdraw),
	ReceiveDirectTransfer(ReceiveDirectTransfer),
	ReceiveUnlock(ReceiveUnlock),
	ReceiveRemoveExpiredLock(ReceiveRemoveExpiredLock),
	ReceiveAnnounceDisposed(ReceiveAnnounceDisposed),
	ReceiveAnnounceDisposedResponse(ReceiveAnnounceDisposedResponse),
	ReceiveSecretRequest(ReceiveSecretRequest),
	ReceiveSecretReveal(ReceiveSecretReveal),
	ReceiveWithdrawRequest(ReceiveWithdrawRequest),
	ReceiveWithdrawResponse(ReceiveWithdrawResponse),
	ReceiveSettleRequest(ReceiveSettleRequest),
	ReceiveSettleResponse(ReceiveSettleResponse),
	ContractReceiveTokenNetworkCreated(ContractReceiveTokenNetworkCreated),
	ContractReceiveChannelOpened(ContractReceiveChannelOpened),
	ContractReceiveChannelDeposit(ContractReceiveChannelDeposit),
	ContractReceiveChannelWithdraw(ContractReceiveChannelWithdraw),
	ContractReceiveChannelClosed(ContractReceiveChannelClosed),
	ContractReceiveBalanceProofUpdated(ContractReceiveBalanceProofUpdated),
	ContractReceiveChannelPunished(ContractReceiveChannelPunished),
	ContractReceiveChannelUnlocked(ContractReceiveChannelUnlocked),
	ContractReceiveChannelSettled(ContractReceiveChannelSettled),
	ContractReceiveChannelCooperativeSettled(ContractReceiveChannelCooperativeSettled),
	ContractReceiveSecretReveal(ContractReceiveSecretReveal),
	ContractCallTxResult(ContractCallTxResult),
}

impl StateChange {
	/// Returns a string of the inner state change's type name.
	pub fn type_name(&self) -> &'static str {
		match self {
			StateChange::Block(_) => "Block",
			StateChange::HistoryComplete(_) => "HistoryComplete",
			StateChange::ActionInitInitiator(_) => "ActionInitInitiator",
			StateChange::ActionInitMediator(_) => "ActionInitMediator",
			StateChange::ActionCancelRoute(_) => "ActionCancelRoute",
			StateChange::ActionCancelTransfer(_) => "ActionCancelTransfer",
			StateChange::ActionTransferDirect(_) => "ActionTransferDirect",
			StateChange::ActionChannelClose(_) => "ActionChannelClose",
			StateChange::ActionChannelWithdraw(_) => "ActionChannelWithdraw",
			StateChange::ActionChannelCooperativeSettle(_) => "ActionChannelCooperativeSettle",
			StateChange::ActionCancelWithdraw(_) => "ActionCancelWithdraw",
			StateChange::ReceiveDirectTransfer(_) => "ReceiveDirectTransfer",
			StateChange::ReceiveUnlock(_) => "ReceiveUnlock",
			StateChange::ReceiveRemoveExpiredLock(_) => "ReceiveRemoveExpiredLock",
			StateChange::ReceiveAnnounceDisposed(_) => "ReceiveAnnounceDisposed",
			StateChange::ReceiveAnnounceDisposedResponse(_) => "ReceiveAnnounceDisposedResponse",
			StateChange::ReceiveSecretRequest(_) => "ReceiveSecretRequest",
			StateChange::ReceiveSecretReveal(_) => "ReceiveSecretReveal",
			StateChange::ReceiveWithdrawRequest(_) => "ReceiveWithdrawRequest",
			StateChange::ReceiveWithdrawResponse(_) => "ReceiveWithdrawResponse",
			StateChange::ReceiveSettleRequest(_) => "ReceiveSettleRequest",
			StateChange::ReceiveSettleResponse(_) => "ReceiveSettleResponse",
			StateChange::ContractReceiveTokenNetworkCreated(_) =>
				"ContractReceiveTokenNetworkCreated",
			StateChange::ContractReceiveChannelOpened(_) => "ContractReceiveChannelOpened",
			StateChange::ContractReceiveChannelDeposit(_) => "ContractReceiveChannelDeposit",
			StateChange::ContractReceiveChannelWithdraw(_) => "ContractReceiveChannelWithdraw",
			StateChange::ContractReceiveChannelClosed(_) => "ContractReceiveChannelClosed",
			StateChange::ContractReceiveBalanceProofUpdated(_) =>
				"ContractReceiveBalanceProofUpdated",
			StateChange::ContractReceiveChannelPunished(_) => "ContractReceiveChannelPunished",
			StateChange::ContractReceiveChannelUnlocked(_) => "ContractReceiveChannelUnlocked",
			StateChange::ContractReceiveChannelSettled(_) => "ContractReceiveChannelSettled",
			StateChange::ContractReceiveChannelCooperativeSettled(_) =>
				"ContractReceiveChannelCooperativeSettled",
			StateChange::ContractReceiveSecretReveal(_) => "ContractReceiveSecretReveal",
			StateChange::ContractCallTxResult(_) => "ContractCallTxResult",
		}
	}
}

/// Transition used when a new block is mined.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
	pub block_number: BlockNumber,
}

/// One-shot notification that the initial event sync has completed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HistoryComplete {
	pub block_number: BlockNumber,
}

/// Initial state of a new payment at its initiator.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionInitInitiator {
	pub transfer: TransferDescription,
	pub routes: Vec<RouteState>,
}

/// Initial state for a new mediator. Carries the received payer transfer
/// together with its envelope so the channel registration can be replayed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionInitMediator {
	pub from_route: RouteState,
	pub from_transfer: LockedTransferState,
	pub routes: Vec<RouteState>,
	pub envelope: Envelope,
}

/// The user asks to drop the current route and retry over the next one.
/// Honored only before the secret was revealed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionCancelRoute {
	pub secrethash: SecretHash,
	pub token_address: TokenAddress,
}

/// The user asks to cancel the payment outright. Honored only before the
/// secret was revealed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionCancelTransfer {
	pub secrethash: SecretHash,
	pub token_address: TokenAddress,
}

/// The user sends a direct, unlocked transfer to the channel partner.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionTransferDirect {
	pub channel_identifier: ChannelIdentifier,
	pub amount: TokenAmount,
}

/// The user is closing an existing channel.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionChannelClose {
	pub channel_identifier: ChannelIdentifier,
}

/// The user starts the cooperative withdraw sub-protocol.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionChannelWithdraw {
	pub channel_identifier: ChannelIdentifier,
	pub withdraw_amount: TokenAmount,
}

/// The user starts the cooperative settle sub-protocol.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionChannelCooperativeSettle {
	pub channel_identifier: ChannelIdentifier,
}

/// The user reverts a not-yet-agreed withdraw or cooperative settle.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionCancelWithdraw {
	pub channel_identifier: ChannelIdentifier,
}

/// A DirectTransfer envelope was received.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveDirectTransfer {
	pub envelope: Envelope,
}

/// An Unlock envelope was received, revealing a secret and claiming the
/// corresponding lock.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveUnlock {
	pub envelope: Envelope,
	pub secret: Secret,
	pub secrethash: SecretHash,
}

/// A RemoveExpiredHashlock envelope was received.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveRemoveExpiredLock {
	pub envelope: Envelope,
	pub secrethash: SecretHash,
}

/// The partner gives up a lock we sent, usually because it found no route
/// onwards. Not an envelope message; the lock lives on our side.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveAnnounceDisposed {
	pub canonical_identifier: CanonicalIdentifier,
	pub sender: Address,
	pub lock: HashTimeLockState,
	pub error_code: u32,
	pub error_msg: String,
}

/// The authoritative disposal of a lock at the announcing party's request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveAnnounceDisposedResponse {
	pub envelope: Envelope,
	pub secrethash: SecretHash,
}

/// The payment target requests the secret from the initiator.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveSecretRequest {
	pub sender: Address,
	pub secrethash: SecretHash,
	pub amount: TokenAmount,
}

/// A SecretReveal message was received.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveSecretReveal {
	pub sender: Address,
	pub secret: Secret,
	pub secrethash: SecretHash,
}

/// The partner proposes a cooperative withdraw with new balances.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveWithdrawRequest {
	pub sender: Address,
	pub canonical_identifier: CanonicalIdentifier,
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub withdraw_amount: TokenAmount,
	pub participant1_signature: Signature,
}

/// The partner agreed to our withdraw request; carries both signatures.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveWithdrawResponse {
	pub sender: Address,
	pub canonical_identifier: CanonicalIdentifier,
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub withdraw_amount: TokenAmount,
	pub participant1_signature: Signature,
	pub participant2_signature: Signature,
}

/// The partner proposes settling the channel off the on-chain close path.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveSettleRequest {
	pub sender: Address,
	pub canonical_identifier: CanonicalIdentifier,
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub participant1_signature: Signature,
}

/// The partner agreed to our cooperative settle request.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveSettleResponse {
	pub sender: Address,
	pub canonical_identifier: CanonicalIdentifier,
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub participant1_signature: Signature,
	pub participant2_signature: Signature,
}

/// A new token was registered with the token network contract.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveTokenNetworkCreated {
	pub token_address: TokenAddress,
	pub block_number: BlockNumber,
}

/// A new channel was opened and this node is a participant.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelOpened {
	pub canonical_identifier: CanonicalIdentifier,
	pub participant1: Address,
	pub participant2: Address,
	pub token_address: TokenAddress,
	pub settle_timeout: SettleTimeout,
	pub block_number: BlockNumber,
}

/// A participant's total deposit changed on-chain.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelDeposit {
	pub channel_identifier: ChannelIdentifier,
	pub participant: Address,
	pub total_deposit: TokenAmount,
	pub block_number: BlockNumber,
}

/// A cooperative withdraw went through on-chain, reopening the channel
/// with fresh balances.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelWithdraw {
	pub channel_identifier: ChannelIdentifier,
	pub new_open_block_number: BlockNumber,
	pub participant1: Address,
	pub participant2: Address,
	pub participant1_balance: TokenAmount,
	pub participant2_balance: TokenAmount,
	pub block_number: BlockNumber,
}

/// A channel this node participates in was closed on-chain.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelClosed {
	pub channel_identifier: ChannelIdentifier,
	pub closing_participant: Address,
	pub transferred_amount: TokenAmount,
	pub locksroot: Locksroot,
	pub block_number: BlockNumber,
}

/// The non-closing participant submitted a newer balance proof on-chain.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveBalanceProofUpdated {
	pub channel_identifier: ChannelIdentifier,
	pub participant: Address,
	pub transferred_amount: TokenAmount,
	pub locksroot: Locksroot,
	pub block_number: BlockNumber,
}

/// A participant submitted an outdated balance proof and was punished.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelPunished {
	pub channel_identifier: ChannelIdentifier,
	pub beneficiary: Address,
	pub block_number: BlockNumber,
}

/// A lock was claimed on-chain via the unlock contract call.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelUnlocked {
	pub channel_identifier: ChannelIdentifier,
	pub payer_participant: Address,
	pub transferred_amount: TokenAmount,
	pub lockhash: SecretHash,
	pub block_number: BlockNumber,
}

/// A channel was settled on-chain; the channel record can be discarded.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelSettled {
	pub channel_identifier: ChannelIdentifier,
	pub block_number: BlockNumber,
}

/// Both parties settled cooperatively on-chain.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveChannelCooperativeSettled {
	pub channel_identifier: ChannelIdentifier,
	pub block_number: BlockNumber,
}

/// A new secret was registered with the secret registry contract.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractReceiveSecretReveal {
	pub secret: Secret,
	pub secrethash: SecretHash,
	pub block_number: BlockNumber,
}

/// Terminal report of a tracked on-chain transaction, fed back by the TX
/// watcher.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ContractCallTxResult {
	pub description: String,
	pub transaction_hash: Option<TransactionHash>,
	pub result: TransactionResult,
	pub error: Option<String>,
	pub block_number: BlockNumber,
}

into_state_change!(
	Block,
	HistoryComplete,
	ActionInitInitiator,
	ActionInitMediator,
	ActionCancelRoute,
	ActionCancelTransfer,
	ActionTransferDirect,
	ActionChannelClose,
	ActionChannelWithdraw,
	ActionChannelCooperativeSettle,
	ActionCancelWithdraw,
	ReceiveDirectTransfer,
	ReceiveUnlock,
	ReceiveRemoveExpiredLock,
	ReceiveAnnounceDisposed,
	ReceiveAnnounceDisposedResponse,
	ReceiveSecretRequest,
	ReceiveSecretReveal,
	ReceiveWithdrawRequest,
	ReceiveWithdrawResponse,
	ReceiveSettleRequest,
	ReceiveSettleResponse,
	ContractReceiveTokenNetworkCreated,
	ContractReceiveChannelOpened,
	ContractReceiveChannelDeposit,
	ContractReceiveChannelWithdraw,
	ContractReceiveChannelClosed,
	ContractReceiveBalanceProofUpdated,
	ContractReceiveChannelPunished,
	ContractReceiveChannelUnlocked,
	ContractReceiveChannelSettled,
	ContractReceiveChannelCooperativeSettled,
	ContractReceiveSecretReveal,
	ContractCallTxResult,
);
