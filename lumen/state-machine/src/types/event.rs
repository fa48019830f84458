#![warn(clippy::missing_docs_in_private_items)]

use derive_more::Deref;
use lumen_primitives::types::{
	Address,
	CanonicalIdentifier,
	MessageIdentifier,
	Secret,
	SecretHash,
	TokenAmount,
	H256,
};
use serde::{
	Deserialize,
	Serialize,
};

use super::{
	BalanceProofState,
	HashTimeLockState,
	LockedTransferState,
	SettlementAgreement,
	UnlockProof,
};

/// Converts an event struct into its enum variant.
macro_rules! into_event {
	($($name:ident),* $(,)?) => {
		$(
			impl From<$name> for Event {
				fn from(inner: $name) -> Event {
					Event::$name(inner)
				}
			}
		)*
	};
}

/// An enum containing all possible event variants.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
	SendDirectTransfer(SendDirectTransfer),
	SendMediatedTransfer(SendMediatedTransfer),
	SendBalanceProof(SendBalanceProof),
	SendRemoveExpiredLock(SendRemoveExpiredLock),
	SendAnnounceDisposed(SendAnnounceDisposed),
	SendAnnounceDisposedResponse(SendAnnounceDisposedResponse),
	SendSecretReveal(SendSecretReveal),
	SendWithdrawRequest(SendWithdrawRequest),
	SendWithdrawResponse(SendWithdrawResponse),
	SendSettleRequest(SendSettleRequest),
	SendSettleResponse(SendSettleResponse),
	ContractSendChannelClose(ContractSendChannelClose),
	ContractSendChannelUpdateTransfer(ContractSendChannelUpdateTransfer),
	ContractSendChannelUnlock(ContractSendChannelUnlock),
	ContractSendRegisterSecret(ContractSendRegisterSecret),
	ContractSendChannelWithdraw(ContractSendChannelWithdraw),
	ContractSendChannelCooperativeSettle(ContractSendChannelCooperativeSettle),
	ContractSendChannelSettle(ContractSendChannelSettle),
	TransferSentSuccess(TransferSentSuccess),
	TransferSentFailed(TransferSentFailed),
	UnlockSuccess(UnlockSuccess),
	UnlockFailed(UnlockFailed),
	WithdrawSuccess(WithdrawSuccess),
	WithdrawFailed(WithdrawFailed),
	InvalidReceivedMessage(InvalidReceivedMessage),
	RemoveStateManager(RemoveStateManager),
}

impl Event {
	/// Returns a string of the inner event's type name.
	pub fn type_name(&self) -> &'static str {
		match self {
			Event::SendDirectTransfer(_) => "SendDirectTransfer",
			Event::SendMediatedTransfer(_) => "SendMediatedTransfer",
			Event::SendBalanceProof(_) => "SendBalanceProof",
			Event::SendRemoveExpiredLock(_) => "SendRemoveExpiredLock",
			Event::SendAnnounceDisposed(_) => "SendAnnounceDisposed",
			Event::SendAnnounceDisposedResponse(_) => "SendAnnounceDisposedResponse",
			Event::SendSecretReveal(_) => "SendSecretReveal",
			Event::SendWithdrawRequest(_) => "SendWithdrawRequest",
			Event::SendWithdrawResponse(_) => "SendWithdrawResponse",
			Event::SendSettleRequest(_) => "SendSettleRequest",
			Event::SendSettleResponse(_) => "SendSettleResponse",
			Event::ContractSendChannelClose(_) => "ContractSendChannelClose",
			Event::ContractSendChannelUpdateTransfer(_) => "ContractSendChannelUpdateTransfer",
			Event::ContractSendChannelUnlock(_) => "ContractSendChannelUnlock",
			Event::ContractSendRegisterSecret(_) => "ContractSendRegisterSecret",
			Event::ContractSendChannelWithdraw(_) => "ContractSendChannelWithdraw",
			Event::ContractSendChannelCooperativeSettle(_) =>
				"ContractSendChannelCooperativeSettle",
			Event::ContractSendChannelSettle(_) => "ContractSendChannelSettle",
			Event::TransferSentSuccess(_) => "TransferSentSuccess",
			Event::TransferSentFailed(_) => "TransferSentFailed",
			Event::UnlockSuccess(_) => "UnlockSuccess",
			Event::UnlockFailed(_) => "UnlockFailed",
			Event::WithdrawSuccess(_) => "WithdrawSuccess",
			Event::WithdrawFailed(_) => "WithdrawFailed",
			Event::InvalidReceivedMessage(_) => "InvalidReceivedMessage",
			Event::RemoveStateManager(_) => "RemoveStateManager",
		}
	}
}

/// The subset of events that result in a ledger transaction, consumed by
/// the TX watcher.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum ContractSendEvent {
	ContractSendChannelClose(ContractSendChannelClose),
	ContractSendChannelUpdateTransfer(ContractSendChannelUpdateTransfer),
	ContractSendChannelUnlock(ContractSendChannelUnlock),
	ContractSendRegisterSecret(ContractSendRegisterSecret),
	ContractSendChannelWithdraw(ContractSendChannelWithdraw),
	ContractSendChannelCooperativeSettle(ContractSendChannelCooperativeSettle),
	ContractSendChannelSettle(ContractSendChannelSettle),
}

impl TryFrom<Event> for ContractSendEvent {
	type Error = ();

	fn try_from(event: Event) -> Result<Self, Self::Error> {
		Ok(match event {
			Event::ContractSendChannelClose(inner) =>
				ContractSendEvent::ContractSendChannelClose(inner),
			Event::ContractSendChannelUpdateTransfer(inner) =>
				ContractSendEvent::ContractSendChannelUpdateTransfer(inner),
			Event::ContractSendChannelUnlock(inner) =>
				ContractSendEvent::ContractSendChannelUnlock(inner),
			Event::ContractSendRegisterSecret(inner) =>
				ContractSendEvent::ContractSendRegisterSecret(inner),
			Event::ContractSendChannelWithdraw(inner) =>
				ContractSendEvent::ContractSendChannelWithdraw(inner),
			Event::ContractSendChannelCooperativeSettle(inner) =>
				ContractSendEvent::ContractSendChannelCooperativeSettle(inner),
			Event::ContractSendChannelSettle(inner) =>
				ContractSendEvent::ContractSendChannelSettle(inner),
			_ => return Err(()),
		})
	}
}

/// Common attributes of every outgoing network message.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendMessageEventInner {
	pub recipient: Address,
	pub canonical_identifier: CanonicalIdentifier,
	pub message_identifier: MessageIdentifier,
}

/// A direct transfer moving `amount` to the partner without any lock.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendDirectTransfer {
	#[deref]
	pub inner: SendMessageEventInner,
	pub balance_proof: BalanceProofState,
	pub amount: TokenAmount,
}

/// A mediated transfer that must be sent to `recipient`.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendMediatedTransfer {
	#[deref]
	pub inner: SendMessageEventInner,
	pub transfer: LockedTransferState,
	pub balance_proof: BalanceProofState,
}

/// The Unlock envelope: a new balance proof claiming a lock whose secret is
/// known, allowing the partner to finalize the pending transfer.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendBalanceProof {
	#[deref]
	pub inner: SendMessageEventInner,
	pub balance_proof: BalanceProofState,
	pub secret: Secret,
	pub secrethash: SecretHash,
}

/// Tells the partner an expired lock was pruned from our lock tree.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendRemoveExpiredLock {
	#[deref]
	pub inner: SendMessageEventInner,
	pub balance_proof: BalanceProofState,
	pub secrethash: SecretHash,
}

/// Gives up a lock received from the partner, asking for its disposal.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendAnnounceDisposed {
	#[deref]
	pub inner: SendMessageEventInner,
	pub lock: HashTimeLockState,
	pub error_code: u32,
	pub error_msg: String,
}

/// Confirms a disposal announced by the partner with a new balance proof.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendAnnounceDisposedResponse {
	#[deref]
	pub inner: SendMessageEventInner,
	pub balance_proof: BalanceProofState,
	pub secrethash: SecretHash,
}

/// Reveals the secret to another node, off-chain.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendSecretReveal {
	#[deref]
	pub inner: SendMessageEventInner,
	pub secret: Secret,
	pub secrethash: SecretHash,
}

/// Asks the partner to agree to a withdraw with new balances.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendWithdrawRequest {
	#[deref]
	pub inner: SendMessageEventInner,
	pub agreement: SettlementAgreement,
}

/// Returns the withdraw agreement carrying both signatures.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendWithdrawResponse {
	#[deref]
	pub inner: SendMessageEventInner,
	pub agreement: SettlementAgreement,
}

/// Asks the partner to agree to a cooperative settle.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendSettleRequest {
	#[deref]
	pub inner: SendMessageEventInner,
	pub agreement: SettlementAgreement,
}

/// Returns the cooperative settle agreement carrying both signatures.
#[derive(Deref, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SendSettleResponse {
	#[deref]
	pub inner: SendMessageEventInner,
	pub agreement: SettlementAgreement,
}

/// Close the channel on-chain using the partner's latest balance proof.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelClose {
	pub canonical_identifier: CanonicalIdentifier,
	pub balance_proof: Option<BalanceProofState>,
}

/// Submit our cached partner balance proof after the partner closed.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelUpdateTransfer {
	pub canonical_identifier: CanonicalIdentifier,
	pub balance_proof: BalanceProofState,
}

/// Claim a known-secret lock on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelUnlock {
	pub canonical_identifier: CanonicalIdentifier,
	pub payer_participant: Address,
	pub unlock_proof: UnlockProof,
	pub transferred_amount: TokenAmount,
}

/// Register a secret with the secret registry contract.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendRegisterSecret {
	pub secret: Secret,
}

/// Submit the doubly-signed withdraw agreement on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelWithdraw {
	pub canonical_identifier: CanonicalIdentifier,
	pub agreement: SettlementAgreement,
}

/// Submit the doubly-signed cooperative settle agreement on-chain.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelCooperativeSettle {
	pub canonical_identifier: CanonicalIdentifier,
	pub agreement: SettlementAgreement,
}

/// Settle a closed channel once the settlement window has passed.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct ContractSendChannelSettle {
	pub canonical_identifier: CanonicalIdentifier,
}

/// The payment initiated by this node completed.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct TransferSentSuccess {
	pub secrethash: SecretHash,
	pub target: Address,
	pub amount: TokenAmount,
}

/// The payment initiated by this node failed.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct TransferSentFailed {
	pub secrethash: SecretHash,
	pub target: Address,
	pub reason: String,
}

/// A lock we sent was claimed by the payee.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct UnlockSuccess {
	pub secrethash: SecretHash,
}

/// A lock we sent expired before it could be claimed.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct UnlockFailed {
	pub secrethash: SecretHash,
	pub reason: String,
}

/// A lock we received was converted into a balance proof by the payer.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct WithdrawSuccess {
	pub secrethash: SecretHash,
}

/// A lock we received expired before the payer paid it.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct WithdrawFailed {
	pub secrethash: SecretHash,
	pub reason: String,
}

/// A received message was rejected; nothing was mutated.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct InvalidReceivedMessage {
	pub sender: Address,
	pub reason: String,
}

/// The payment reached a terminal state, its state manager can be dropped.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct RemoveStateManager {
	pub key: H256,
}

into_event!(
	SendDirectTransfer,
	SendMediatedTransfer,
	SendBalanceProof,
	SendRemoveExpiredLock,
	SendAnnounceDisposed,
	SendAnnounceDisposedResponse,
	SendSecretReveal,
	SendWithdrawRequest,
	SendWithdrawResponse,
	SendSettleRequest,
	SendSettleResponse,
	ContractSendChannelClose,
	ContractSendChannelUpdateTransfer,
	ContractSendChannelUnlock,
	ContractSendRegisterSecret,
	ContractSendChannelWithdraw,
	ContractSendChannelCooperativeSettle,
	ContractSendChannelSettle,
	TransferSentSuccess,
	TransferSentFailed,
	UnlockSuccess,
	UnlockFailed,
	WithdrawSuccess,
	WithdrawFailed,
	InvalidReceivedMessage,
	RemoveStateManager,
);
