use lumen_primitives::{
	constants::{
		FORK_CONFIRM_NUMBER,
		PUNISHED_NONCE,
	},
	types::{
		CanonicalIdentifier,
		Locksroot,
		TokenAmount,
		U64,
	},
};

use super::factories::{
	make_channel,
	make_partner_envelope,
	make_secret,
	register_pending_lock,
	Keyring,
	TOKEN,
	TOKEN_NETWORK,
};
use crate::{
	errors::ChannelError,
	machine::channel,
	types::{
		BalanceProofState,
		ChannelState,
		ChannelStatus,
		ContractReceiveChannelClosed,
		ContractReceiveChannelWithdraw,
		Event,
		HashTimeLockState,
		LockedTransferState,
		ReceiveDirectTransfer,
		ReceiveRemoveExpiredLock,
		ReceiveUnlock,
		ReceiveWithdrawRequest,
		ReceiveWithdrawResponse,
	},
};

#[test]
fn test_channel_rejects_bad_timeouts() {
	let result = ChannelState::new(
		CanonicalIdentifier::new(Default::default(), U64::from(1)),
		TOKEN,
		TOKEN_NETWORK,
		Keyring::Alice.address(),
		Keyring::Bob.address(),
		U64::from(50),
		U64::from(50),
	);
	assert!(matches!(result, Err(ChannelError::InvalidSettleTimeout)));

	let result = ChannelState::new(
		CanonicalIdentifier::new(Default::default(), U64::from(1)),
		TOKEN,
		TOKEN_NETWORK,
		Keyring::Alice.address(),
		Keyring::Bob.address(),
		U64::from(2),
		U64::from(50),
	);
	assert!(matches!(result, Err(ChannelError::InvalidRevealTimeout)));
}

#[test]
fn test_send_direct_transfer() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);

	let transfer = channel::send_direct_transfer(
		&mut channel_state,
		TokenAmount::from(30),
		1,
	)
	.expect("Transfer should be valid");

	assert_eq!(transfer.balance_proof.nonce, 1);
	assert_eq!(transfer.balance_proof.transferred_amount, TokenAmount::from(30));
	assert_eq!(transfer.balance_proof.locksroot, Locksroot::zero());
	assert_eq!(channel_state.our_state.transferred_amount(), TokenAmount::from(30));
	assert_eq!(channel_state.partner_balance(), TokenAmount::from(130));
	assert!(channel_state.our_state.lock_tree.is_empty());
}

#[test]
fn test_send_direct_transfer_insufficient_balance() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	let result =
		channel::send_direct_transfer(&mut channel_state, TokenAmount::from(101), 1);
	assert!(matches!(result, Err(ChannelError::InsufficientBalance { .. })));
	assert!(channel_state.our_state.balance_proof.is_none());
}

#[test]
fn test_receive_direct_transfer() {
	// Bob's view of the channel; Alice is the partner sending 30.
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let envelope =
		make_partner_envelope(&channel_state, TokenAmount::from(30), Locksroot::zero());

	let amount = channel::handle_receive_direct_transfer(
		&mut channel_state,
		&ReceiveDirectTransfer { envelope: envelope.clone() },
	)
	.expect("Transfer should be accepted");

	assert_eq!(amount, TokenAmount::from(30));
	assert_eq!(channel_state.partner_state.nonce(), 1);
	assert_eq!(channel_state.our_balance(), TokenAmount::from(130));

	// Replaying the exact same envelope must hit the nonce gate.
	let result = channel::handle_receive_direct_transfer(
		&mut channel_state,
		&ReceiveDirectTransfer { envelope },
	);
	assert!(matches!(result, Err(ChannelError::InvalidNonce { expected: 2, got: 1 })));
}

#[test]
fn test_receive_mediated_transfer_updates_lock_tree() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (_, secrethash) = make_secret(9);
	let amount = TokenAmount::from(50);
	let expiration = U64::from(200);

	let lock = HashTimeLockState::new(amount, expiration, secrethash);
	let locksroot = channel_state
		.partner_state
		.lock_tree
		.compute_root_with(secrethash, lock.leaf())
		.expect("Not a duplicate");
	let envelope = make_partner_envelope(&channel_state, TokenAmount::zero(), locksroot);

	let transfer = LockedTransferState {
		channel_identifier: channel_state.canonical_identifier.clone(),
		token: TOKEN,
		initiator: Keyring::Alice.address(),
		target: Keyring::Charlie.address(),
		amount,
		target_amount: amount,
		fee: TokenAmount::zero(),
		expiration,
		secrethash,
		secret: None,
	};
	channel::handle_receive_mediated_transfer(
		&mut channel_state,
		&transfer,
		&envelope,
		U64::from(10),
	)
	.expect("Transfer should be accepted");

	assert_eq!(channel_state.partner_state.locksroot(), locksroot);
	assert!(channel_state.partner_state.pending_locks.contains_key(&secrethash));
	assert_eq!(channel_state.partner_state.transferred_amount(), TokenAmount::zero());
	assert_eq!(channel_state.partner_state.amount_locked(), amount);
}

#[test]
fn test_receive_mediated_transfer_rejects_wrong_locksroot() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (_, secrethash) = make_secret(9);
	let envelope =
		make_partner_envelope(&channel_state, TokenAmount::zero(), Locksroot::repeat_byte(1));

	let transfer = LockedTransferState {
		channel_identifier: channel_state.canonical_identifier.clone(),
		token: TOKEN,
		initiator: Keyring::Alice.address(),
		target: Keyring::Charlie.address(),
		amount: TokenAmount::from(50),
		target_amount: TokenAmount::from(50),
		fee: TokenAmount::zero(),
		expiration: U64::from(200),
		secrethash,
		secret: None,
	};
	let result = channel::handle_receive_mediated_transfer(
		&mut channel_state,
		&transfer,
		&envelope,
		U64::from(10),
	);
	assert!(matches!(result, Err(ChannelError::InvalidLocksRoot)));
	assert!(channel_state.partner_state.pending_locks.is_empty());
}

#[test]
fn test_receive_mediated_transfer_rejects_late_expiration() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (_, secrethash) = make_secret(9);
	// Past the settlement window of `block + settle_timeout`.
	let expiration = U64::from(10 + 600 + 1);

	let lock = HashTimeLockState::new(TokenAmount::from(50), expiration, secrethash);
	let locksroot = channel_state
		.partner_state
		.lock_tree
		.compute_root_with(secrethash, lock.leaf())
		.expect("Not a duplicate");
	let envelope = make_partner_envelope(&channel_state, TokenAmount::zero(), locksroot);

	let transfer = LockedTransferState {
		channel_identifier: channel_state.canonical_identifier.clone(),
		token: TOKEN,
		initiator: Keyring::Alice.address(),
		target: Keyring::Charlie.address(),
		amount: TokenAmount::from(50),
		target_amount: TokenAmount::from(50),
		fee: TokenAmount::zero(),
		expiration,
		secrethash,
		secret: None,
	};
	let result = channel::handle_receive_mediated_transfer(
		&mut channel_state,
		&transfer,
		&envelope,
		U64::from(10),
	);
	assert!(matches!(result, Err(ChannelError::LockExpirationTooLarge)));
}

#[test]
fn test_receive_unlock_claims_lock() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (secret, secrethash) = make_secret(9);
	register_pending_lock(&mut channel_state, true, 50, U64::from(200), secrethash);

	let locksroot = channel_state
		.partner_state
		.lock_tree
		.compute_root_without(secrethash)
		.expect("Lock exists");
	let envelope = make_partner_envelope(&channel_state, TokenAmount::from(50), locksroot);

	channel::handle_receive_unlock(
		&mut channel_state,
		&ReceiveUnlock { envelope, secret, secrethash },
	)
	.expect("Unlock should be accepted");

	assert_eq!(channel_state.partner_state.transferred_amount(), TokenAmount::from(50));
	assert!(channel_state.partner_state.pending_locks.is_empty());
	assert!(channel_state.partner_state.lock_tree.is_empty());
	assert_eq!(channel_state.our_balance(), TokenAmount::from(150));
}

#[test]
fn test_receive_unlock_rejects_wrong_transferred_amount() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (secret, secrethash) = make_secret(9);
	register_pending_lock(&mut channel_state, true, 50, U64::from(200), secrethash);

	let locksroot = channel_state
		.partner_state
		.lock_tree
		.compute_root_without(secrethash)
		.expect("Lock exists");
	let envelope = make_partner_envelope(&channel_state, TokenAmount::from(49), locksroot);

	let result = channel::handle_receive_unlock(
		&mut channel_state,
		&ReceiveUnlock { envelope, secret, secrethash },
	);
	assert!(matches!(result, Err(ChannelError::TransferAmountMismatch)));
	assert!(channel_state.partner_state.pending_locks.contains_key(&secrethash));
}

#[test]
fn test_receive_remove_expired_lock_requires_expiration() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let (_, secrethash) = make_secret(9);
	let expiration = U64::from(100);
	register_pending_lock(&mut channel_state, true, 50, expiration, secrethash);

	let locksroot = channel_state
		.partner_state
		.lock_tree
		.compute_root_without(secrethash)
		.expect("Lock exists");

	// Too early: the expiration still needs its confirmation blocks.
	let envelope = make_partner_envelope(&channel_state, TokenAmount::zero(), locksroot);
	let result = channel::handle_receive_remove_expired_lock(
		&mut channel_state,
		&ReceiveRemoveExpiredLock { envelope: envelope.clone(), secrethash },
		expiration + FORK_CONFIRM_NUMBER,
	);
	assert!(matches!(result, Err(ChannelError::LockNotExpired)));

	channel::handle_receive_remove_expired_lock(
		&mut channel_state,
		&ReceiveRemoveExpiredLock { envelope, secrethash },
		expiration + FORK_CONFIRM_NUMBER + 1,
	)
	.expect("Lock is expired now");
	assert!(channel_state.partner_state.pending_locks.is_empty());
	assert_eq!(channel_state.partner_state.transferred_amount(), TokenAmount::zero());
}

#[test]
fn test_no_envelope_accepted_after_close() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	channel_state.status = ChannelStatus::Closed;

	let envelope =
		make_partner_envelope(&channel_state, TokenAmount::from(30), Locksroot::zero());
	let result = channel::handle_receive_direct_transfer(
		&mut channel_state,
		&ReceiveDirectTransfer { envelope },
	);
	assert!(matches!(result, Err(ChannelError::UpdateBalanceProofAfterClosed)));
}

#[test]
fn test_handle_closed_by_partner_submits_update() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	// Some partner balance proof exists to be submitted.
	let envelope =
		make_partner_envelope(&channel_state, TokenAmount::from(10), Locksroot::zero());
	channel::handle_receive_direct_transfer(
		&mut channel_state,
		&ReceiveDirectTransfer { envelope },
	)
	.expect("Transfer should be accepted");

	let channel_identifier = channel_state.canonical_identifier.channel_identifier;
	let events = channel::handle_channel_closed(
		&mut channel_state,
		&ContractReceiveChannelClosed {
			channel_identifier,
			closing_participant: Keyring::Bob.address(),
			transferred_amount: TokenAmount::zero(),
			locksroot: Locksroot::zero(),
			block_number: U64::from(50),
		},
	);

	assert_eq!(channel_state.status(), ChannelStatus::Closed);
	assert_eq!(channel_state.closed_block, U64::from(50));
	assert!(events
		.iter()
		.any(|event| matches!(event, Event::ContractSendChannelUpdateTransfer(_))));
}

#[test]
fn test_handle_closed_by_us_unlocks_known_secrets() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	let (secret, secrethash) = make_secret(9);
	register_pending_lock(&mut channel_state, true, 50, U64::from(200), secrethash);
	channel::register_secret(&mut channel_state, secret).expect("Lock exists");

	let channel_identifier = channel_state.canonical_identifier.channel_identifier;
	let events = channel::handle_channel_closed(
		&mut channel_state,
		&ContractReceiveChannelClosed {
			channel_identifier,
			closing_participant: Keyring::Alice.address(),
			transferred_amount: TokenAmount::zero(),
			locksroot: Locksroot::zero(),
			block_number: U64::from(50),
		},
	);

	let unlocks: Vec<_> = events
		.iter()
		.filter_map(|event| match event {
			Event::ContractSendChannelUnlock(inner) => Some(inner),
			_ => None,
		})
		.collect();
	assert_eq!(unlocks.len(), 1);
	assert_eq!(unlocks[0].unlock_proof.lock.secrethash, secrethash);
	assert_eq!(unlocks[0].payer_participant, Keyring::Bob.address());
}

#[test]
fn test_handle_punished_bars_cheater() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 60, 40);
	channel::handle_channel_punished(&mut channel_state, Keyring::Alice.address());

	assert_eq!(channel_state.our_state.contract_balance, TokenAmount::from(100));
	assert_eq!(channel_state.partner_state.contract_balance, TokenAmount::zero());
	assert_eq!(channel_state.partner_state.contract_nonce, PUNISHED_NONCE);

	// No further off-chain proof can pass the nonce gate.
	channel_state.partner_state.balance_proof = Some(
		BalanceProofState {
			nonce: PUNISHED_NONCE,
			transferred_amount: TokenAmount::zero(),
			locksroot: Locksroot::zero(),
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_hash: None,
			signature: None,
			sender: Some(Keyring::Bob.address()),
		},
	);
	let envelope =
		make_partner_envelope(&channel_state, TokenAmount::from(1), Locksroot::zero());
	let result = channel::handle_receive_direct_transfer(
		&mut channel_state,
		&ReceiveDirectTransfer { envelope },
	);
	assert!(result.is_err());
}

#[test]
fn test_withdraw_request_rejected_with_locks() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	let (_, secrethash) = make_secret(9);
	register_pending_lock(&mut channel_state, false, 50, U64::from(200), secrethash);

	let result =
		channel::action_channel_withdraw(&mut channel_state, TokenAmount::from(20), 1);
	assert!(matches!(result, Err(ChannelError::WithdrawButHasLocks)));
	assert_eq!(channel_state.status(), ChannelStatus::Opened);
}

#[test]
fn test_withdraw_round_trip_reopens_channel() {
	// Requester side: prepare, then receive the partner's agreement.
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	let request =
		channel::action_channel_withdraw(&mut channel_state, TokenAmount::from(20), 1)
			.expect("Withdraw should start");
	assert_eq!(channel_state.status(), ChannelStatus::PrepareForWithdraw);
	assert_eq!(request.agreement.participant1_balance, TokenAmount::from(80));
	assert_eq!(request.agreement.withdraw_amount, Some(TokenAmount::from(20)));

	channel::handle_block(&mut channel_state);
	assert_eq!(channel_state.status(), ChannelStatus::Withdraw);

	let canonical_identifier = channel_state.canonical_identifier.clone();
	let event = channel::handle_receive_withdraw_response(
		&mut channel_state,
		&ReceiveWithdrawResponse {
			sender: Keyring::Bob.address(),
			canonical_identifier,
			participant1: Keyring::Alice.address(),
			participant2: Keyring::Bob.address(),
			participant1_balance: TokenAmount::from(80),
			participant2_balance: TokenAmount::from(100),
			withdraw_amount: TokenAmount::from(20),
			participant1_signature: vec![1; 65].into(),
			participant2_signature: vec![2; 65].into(),
		},
	)
	.expect("Response should be accepted");
	assert!(matches!(event, Event::ContractSendChannelWithdraw(_)));

	// The on-chain event reopens the channel with fresh state.
	let channel_identifier = channel_state.canonical_identifier.channel_identifier;
	channel::handle_channel_withdrawed(
		&mut channel_state,
		&ContractReceiveChannelWithdraw {
			channel_identifier,
			new_open_block_number: U64::from(90),
			participant1: Keyring::Alice.address(),
			participant2: Keyring::Bob.address(),
			participant1_balance: TokenAmount::from(80),
			participant2_balance: TokenAmount::from(100),
			block_number: U64::from(90),
		},
	);

	assert_eq!(channel_state.status(), ChannelStatus::Opened);
	assert_eq!(channel_state.canonical_identifier.open_block_number, U64::from(90));
	assert_eq!(channel_state.our_state.contract_balance, TokenAmount::from(80));
	assert_eq!(channel_state.partner_state.contract_balance, TokenAmount::from(100));
	assert!(channel_state.our_state.balance_proof.is_none());
	assert!(channel_state.partner_state.balance_proof.is_none());
	assert!(channel_state.our_state.lock_tree.is_empty());
	assert_eq!(channel_state.closed_block, U64::zero());
}

#[test]
fn test_receive_withdraw_request_moves_to_partner_withdrawing() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let canonical_identifier = channel_state.canonical_identifier.clone();
	let response = channel::handle_receive_withdraw_request(
		&mut channel_state,
		&ReceiveWithdrawRequest {
			sender: Keyring::Alice.address(),
			canonical_identifier,
			participant1: Keyring::Alice.address(),
			participant2: Keyring::Bob.address(),
			participant1_balance: TokenAmount::from(80),
			participant2_balance: TokenAmount::from(100),
			withdraw_amount: TokenAmount::from(20),
			participant1_signature: vec![1; 65].into(),
		},
		7,
	)
	.expect("Request should be accepted");

	assert_eq!(channel_state.status(), ChannelStatus::PartnerWithdrawing);
	assert_eq!(response.agreement.participant1_balance, TokenAmount::from(80));
}

#[test]
fn test_receive_withdraw_request_rejects_wrong_balance() {
	let mut channel_state = make_channel(Keyring::Bob, Keyring::Alice, 100, 100);
	let canonical_identifier = channel_state.canonical_identifier.clone();
	let result = channel::handle_receive_withdraw_request(
		&mut channel_state,
		&ReceiveWithdrawRequest {
			sender: Keyring::Alice.address(),
			canonical_identifier,
			participant1: Keyring::Alice.address(),
			participant2: Keyring::Bob.address(),
			participant1_balance: TokenAmount::from(90),
			participant2_balance: TokenAmount::from(100),
			withdraw_amount: TokenAmount::from(20),
			participant1_signature: vec![1; 65].into(),
		},
		7,
	);
	assert!(matches!(result, Err(ChannelError::BalanceNotMatch)));
	assert_eq!(channel_state.status(), ChannelStatus::Opened);
}

#[test]
fn test_cancel_prepare_returns_to_opened() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	channel::action_channel_cooperative_settle(&mut channel_state, 1)
		.expect("Settle should start");
	assert_eq!(channel_state.status(), ChannelStatus::PrepareForCooperativeSettle);

	channel::action_cancel_prepare(&mut channel_state).expect("Cancel is allowed");
	assert_eq!(channel_state.status(), ChannelStatus::Opened);
	assert!(channel_state.pending_agreement.is_none());
}

#[test]
fn test_serialization_round_trip() {
	let mut channel_state = make_channel(Keyring::Alice, Keyring::Bob, 100, 100);
	let (_, secrethash) = make_secret(9);
	register_pending_lock(&mut channel_state, false, 50, U64::from(200), secrethash);
	channel::send_direct_transfer(&mut channel_state, TokenAmount::from(10), 1)
		.expect("Transfer should be valid");

	let serialized = serde_json::to_string(&channel_state).expect("Should serialize");
	let restored: ChannelState =
		serde_json::from_str(&serialized).expect("Should deserialize");

	assert_eq!(restored, channel_state);
	assert_eq!(restored.our_state.locksroot(), channel_state.our_state.locksroot());
}
