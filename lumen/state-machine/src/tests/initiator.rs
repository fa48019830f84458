use lumen_primitives::{
	constants::{
		DEFAULT_REVEAL_TIMEOUT,
		FORK_CONFIRM_NUMBER,
	},
	hashing::payment_task_key,
	types::{
		CanonicalIdentifier,
		TokenAmount,
		U64,
	},
};

use super::factories::{
	channel_id,
	make_channel,
	make_chain_state,
	make_route,
	make_secret,
	Keyring,
	TOKEN,
};
use crate::{
	machine::chain,
	types::{
		ActionCancelTransfer,
		ActionInitInitiator,
		Block,
		ChainState,
		Event,
		HashTimeLockState,
		ReceiveAnnounceDisposed,
		ReceiveSecretRequest,
		ReceiveSecretReveal,
		TransferDescription,
	},
	views,
};

fn init_payment(routes_hops: Vec<Keyring>) -> (ChainState, Vec<Event>, TransferDescription) {
	let channels: Vec<_> = routes_hops
		.iter()
		.map(|hop| make_channel(Keyring::Alice, *hop, 100, 0))
		.collect();
	let routes = channels
		.iter()
		.zip(routes_hops.iter())
		.map(|(channel_state, hop)| make_route(*hop, channel_state))
		.collect();
	let chain_state = make_chain_state(Keyring::Alice, channels);

	let (secret, secrethash) = make_secret(7);
	let transfer = TransferDescription {
		token_address: TOKEN,
		amount: TokenAmount::from(50),
		fee: TokenAmount::zero(),
		initiator: Keyring::Alice.address(),
		target: Keyring::Charlie.address(),
		secret,
		secrethash,
		expiration: None,
	};

	let transition = chain::state_transition(
		chain_state,
		ActionInitInitiator { transfer: transfer.clone(), routes }.into(),
	)
	.expect("Init should succeed");
	(transition.new_state, transition.events, transfer)
}

#[test]
fn test_init_sends_mediated_transfer() {
	let (chain_state, events, transfer) = init_payment(vec![Keyring::Bob]);

	assert_eq!(events.len(), 1);
	let mediated = match &events[0] {
		Event::SendMediatedTransfer(inner) => inner,
		other => panic!("Expected SendMediatedTransfer, got {}", other.type_name()),
	};
	assert_eq!(mediated.inner.recipient, Keyring::Bob.address());
	assert_eq!(mediated.transfer.amount, TokenAmount::from(50));
	assert_eq!(mediated.transfer.target, Keyring::Charlie.address());
	// block + settle_timeout - reveal_timeout
	assert_eq!(
		mediated.transfer.expiration,
		U64::from(10 + 600 - DEFAULT_REVEAL_TIMEOUT)
	);
	assert_eq!(mediated.balance_proof.nonce, 1);

	let key = payment_task_key(transfer.secrethash, TOKEN);
	assert!(chain_state.payment_mapping.contains_key(&key));

	let channel_state = views::get_channel_by_token_and_partner(
		&chain_state,
		TOKEN,
		Keyring::Bob.address(),
	)
	.expect("Channel exists");
	assert!(channel_state.our_state.pending_locks.contains_key(&transfer.secrethash));
}

#[test]
fn test_init_without_usable_route_fails() {
	let chain_state = make_chain_state(Keyring::Alice, vec![]);
	let (secret, secrethash) = make_secret(7);
	let transition = chain::state_transition(
		chain_state,
		ActionInitInitiator {
			transfer: TransferDescription {
				token_address: TOKEN,
				amount: TokenAmount::from(50),
				fee: TokenAmount::zero(),
				initiator: Keyring::Alice.address(),
				target: Keyring::Charlie.address(),
				secret,
				secrethash,
				expiration: None,
			},
			routes: vec![],
		}
		.into(),
	)
	.expect("Init should not error");

	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::TransferSentFailed(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::RemoveStateManager(_))));
	assert!(transition.new_state.payment_mapping.is_empty());
}

#[test]
fn test_valid_secret_request_reveals_secret() {
	let (chain_state, _, transfer) = init_payment(vec![Keyring::Bob]);

	let transition = chain::state_transition(
		chain_state,
		ReceiveSecretRequest {
			sender: Keyring::Charlie.address(),
			secrethash: transfer.secrethash,
			amount: TokenAmount::from(50),
		}
		.into(),
	)
	.expect("Should transition");

	let reveal = match &transition.events[0] {
		Event::SendSecretReveal(inner) => inner,
		other => panic!("Expected SendSecretReveal, got {}", other.type_name()),
	};
	assert_eq!(reveal.inner.recipient, Keyring::Charlie.address());
	assert_eq!(reveal.secret, transfer.secret);
}

#[test]
fn test_mismatched_secret_request_is_rejected() {
	let (chain_state, _, transfer) = init_payment(vec![Keyring::Bob]);

	let transition = chain::state_transition(
		chain_state,
		ReceiveSecretRequest {
			sender: Keyring::Charlie.address(),
			secrethash: transfer.secrethash,
			amount: TokenAmount::from(49),
		}
		.into(),
	)
	.expect("Should transition");

	assert!(transition
		.events
		.iter()
		.all(|event| !matches!(event, Event::SendSecretReveal(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::InvalidReceivedMessage(_))));

	// A later valid request is ignored too, only the first one counts.
	let transition = chain::state_transition(
		transition.new_state,
		ReceiveSecretRequest {
			sender: Keyring::Charlie.address(),
			secrethash: transfer.secrethash,
			amount: TokenAmount::from(50),
		}
		.into(),
	)
	.expect("Should transition");
	assert!(transition.events.is_empty());
}

#[test]
fn test_secret_reveal_from_hop_completes_payment() {
	let (chain_state, _, transfer) = init_payment(vec![Keyring::Bob]);

	let transition = chain::state_transition(
		chain_state,
		ReceiveSecretReveal {
			sender: Keyring::Bob.address(),
			secret: transfer.secret,
			secrethash: transfer.secrethash,
		}
		.into(),
	)
	.expect("Should transition");

	let balance_proof = transition
		.events
		.iter()
		.find_map(|event| match event {
			Event::SendBalanceProof(inner) => Some(inner),
			_ => None,
		})
		.expect("A balance proof must be sent");
	assert_eq!(balance_proof.inner.recipient, Keyring::Bob.address());
	assert_eq!(
		balance_proof.balance_proof.transferred_amount,
		TokenAmount::from(50)
	);
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::TransferSentSuccess(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::UnlockSuccess(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::RemoveStateManager(_))));
	assert!(transition.new_state.payment_mapping.is_empty());

	let channel_state = views::get_channel_by_token_and_partner(
		&transition.new_state,
		TOKEN,
		Keyring::Bob.address(),
	)
	.expect("Channel exists");
	assert!(channel_state.our_state.lock_tree.is_empty());
	assert_eq!(channel_state.our_state.transferred_amount(), TokenAmount::from(50));
}

#[test]
fn test_reveal_from_wrong_sender_is_ignored() {
	let (chain_state, _, transfer) = init_payment(vec![Keyring::Bob]);

	let transition = chain::state_transition(
		chain_state,
		ReceiveSecretReveal {
			sender: Keyring::Eve.address(),
			secret: transfer.secret,
			secrethash: transfer.secrethash,
		}
		.into(),
	)
	.expect("Should transition");

	assert!(transition.events.is_empty());
	assert!(!transition.new_state.payment_mapping.is_empty());
}

#[test]
fn test_lock_expiry_fails_payment_exactly_once() {
	let (chain_state, events, _) = init_payment(vec![Keyring::Bob]);
	let expiration = match &events[0] {
		Event::SendMediatedTransfer(inner) => inner.transfer.expiration,
		other => panic!("Expected SendMediatedTransfer, got {}", other.type_name()),
	};

	let expiry_block = expiration + FORK_CONFIRM_NUMBER + 1;
	let transition =
		chain::state_transition(chain_state, Block { block_number: expiry_block }.into())
			.expect("Should transition");

	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::SendRemoveExpiredLock(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::UnlockFailed(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::TransferSentFailed(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::RemoveStateManager(_))));
	assert!(transition.new_state.payment_mapping.is_empty());

	// The next block produces nothing, the manager is gone.
	let transition = chain::state_transition(
		transition.new_state,
		Block { block_number: expiry_block + 1 }.into(),
	)
	.expect("Should transition");
	assert!(transition.events.is_empty());
}

#[test]
fn test_cancel_transfer_keeps_state_alive() {
	let (chain_state, _, transfer) = init_payment(vec![Keyring::Bob]);

	let transition = chain::state_transition(
		chain_state,
		ActionCancelTransfer { secrethash: transfer.secrethash, token_address: TOKEN }.into(),
	)
	.expect("Cancel before reveal must succeed");

	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::TransferSentFailed(_))));
	// The manager survives so the expired lock can be removed later.
	assert!(!transition.new_state.payment_mapping.is_empty());

	// After cancellation the secret is never revealed.
	let transition = chain::state_transition(
		transition.new_state,
		ReceiveSecretRequest {
			sender: Keyring::Charlie.address(),
			secrethash: transfer.secrethash,
			amount: TokenAmount::from(50),
		}
		.into(),
	)
	.expect("Should transition");
	assert!(transition
		.events
		.iter()
		.all(|event| !matches!(event, Event::SendSecretReveal(_))));
}

#[test]
fn test_refusal_retries_over_next_route() {
	let (chain_state, events, transfer) = init_payment(vec![Keyring::Bob, Keyring::Eve]);
	let expiration = match &events[0] {
		Event::SendMediatedTransfer(inner) => inner.transfer.expiration,
		other => panic!("Expected SendMediatedTransfer, got {}", other.type_name()),
	};
	let bob_channel_identifier = channel_id(
		views::get_channel_by_token_and_partner(&chain_state, TOKEN, Keyring::Bob.address())
			.expect("Channel exists"),
	);

	let transition = chain::state_transition(
		chain_state,
		ReceiveAnnounceDisposed {
			canonical_identifier: CanonicalIdentifier::new(bob_channel_identifier, U64::from(1)),
			sender: Keyring::Bob.address(),
			lock: HashTimeLockState::new(TokenAmount::from(50), expiration, transfer.secrethash),
			error_code: 1,
			error_msg: "no route".to_owned(),
		}
		.into(),
	)
	.expect("Should transition");

	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::SendAnnounceDisposedResponse(_))));
	let retried = transition
		.events
		.iter()
		.find_map(|event| match event {
			Event::SendMediatedTransfer(inner) => Some(inner),
			_ => None,
		})
		.expect("The payment must be retried");
	assert_eq!(retried.inner.recipient, Keyring::Eve.address());

	// The refused lock left the old channel's tree.
	let bob_channel = views::get_channel(&transition.new_state, bob_channel_identifier)
		.expect("Channel exists");
	assert!(bob_channel.our_state.lock_tree.is_empty());
}
