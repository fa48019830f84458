use crate::{
	traits::ToBytes,
	types::{
		Address,
		Bytes,
		CanonicalIdentifier,
		Locksroot,
		Nonce,
		TokenAmount,
	},
};

/// Message command identifiers, part of the authenticating serialization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CmdId {
	DirectTransfer = 5,
	MediatedTransfer = 7,
	Unlock = 9,
	RemoveExpiredLock = 13,
	AnnounceDisposed = 14,
	AnnounceDisposedResponse = 15,
	WithdrawRequest = 16,
	WithdrawResponse = 17,
	SettleRequest = 18,
	SettleResponse = 19,
}

/// Serialize the envelope head. The signature authenticates exactly these
/// bytes followed by the message-specific tail.
pub fn pack_envelope(
	cmd_id: CmdId,
	nonce: Nonce,
	canonical_identifier: &CanonicalIdentifier,
	transferred_amount: TokenAmount,
	locksroot: Locksroot,
	tail: &[u8],
) -> Bytes {
	let mut data = vec![cmd_id as u8];
	data.extend_from_slice(&nonce.to_bytes());
	data.extend_from_slice(canonical_identifier.channel_identifier.as_bytes());
	data.extend_from_slice(&canonical_identifier.open_block_number.to_bytes());
	data.extend_from_slice(&transferred_amount.to_bytes());
	data.extend_from_slice(locksroot.as_bytes());
	data.extend_from_slice(tail);
	Bytes(data)
}

/// Serialize a withdraw agreement. Both participants sign the same bytes so
/// the contract can verify either signature.
pub fn pack_withdraw(
	canonical_identifier: &CanonicalIdentifier,
	participant1: Address,
	participant2: Address,
	participant1_balance: TokenAmount,
	participant2_balance: TokenAmount,
	withdraw_amount: TokenAmount,
) -> Bytes {
	let mut data = canonical_identifier.channel_identifier.as_bytes().to_vec();
	data.extend_from_slice(&canonical_identifier.open_block_number.to_bytes());
	data.extend_from_slice(participant1.as_bytes());
	data.extend_from_slice(participant2.as_bytes());
	data.extend_from_slice(&participant1_balance.to_bytes());
	data.extend_from_slice(&participant2_balance.to_bytes());
	data.extend_from_slice(&withdraw_amount.to_bytes());
	Bytes(data)
}

/// Serialize a cooperative settle agreement.
pub fn pack_cooperative_settle(
	canonical_identifier: &CanonicalIdentifier,
	participant1: Address,
	participant2: Address,
	participant1_balance: TokenAmount,
	participant2_balance: TokenAmount,
) -> Bytes {
	let mut data = canonical_identifier.channel_identifier.as_bytes().to_vec();
	data.extend_from_slice(&canonical_identifier.open_block_number.to_bytes());
	data.extend_from_slice(participant1.as_bytes());
	data.extend_from_slice(participant2.as_bytes());
	data.extend_from_slice(&participant1_balance.to_bytes());
	data.extend_from_slice(&participant2_balance.to_bytes());
	Bytes(data)
}
