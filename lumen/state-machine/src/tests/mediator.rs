use lumen_primitives::{
	hashing::payment_task_key,
	types::{
		CanonicalIdentifier,
		ChannelIdentifier,
		Secret,
		SecretHash,
		TokenAmount,
		U64,
	},
};

use super::factories::{
	channel_id,
	make_channel,
	make_channel_with_timeouts,
	make_chain_state,
	make_partner_envelope,
	make_route,
	make_secret,
	register_pending_lock,
	Keyring,
	TOKEN,
};
use crate::{
	machine::chain,
	types::{
		ActionInitMediator,
		Block,
		ChainState,
		ChannelState,
		Event,
		HashTimeLockState,
		LockedTransferState,
		PayerState,
		ReceiveAnnounceDisposed,
		ReceiveSecretReveal,
		ReceiveUnlock,
		RouteState,
		TransferTask,
	},
	views,
};

/// Mediation setup from Bob's point of view: Alice pays through us towards
/// Dave, the next hops are the given keyrings.
struct MediationSetup {
	chain_state: ChainState,
	secret: Secret,
	secrethash: SecretHash,
	payer_channel_identifier: ChannelIdentifier,
	payer_expiration: U64,
}

fn setup_mediation(payee_hops: Vec<Keyring>, fee: u64) -> (MediationSetup, Vec<Event>) {
	let payer_channel = make_channel(Keyring::Bob, Keyring::Alice, 0, 100);
	let payer_route = make_route(Keyring::Alice, &payer_channel);
	let payer_channel_identifier = channel_id(&payer_channel);

	let mut channels = vec![payer_channel];
	let mut routes: Vec<RouteState> = vec![];
	for hop in &payee_hops {
		let payee_channel = make_channel(Keyring::Bob, *hop, 100, 0);
		let mut route = make_route(*hop, &payee_channel);
		route.fee = TokenAmount::from(fee);
		routes.push(route);
		channels.push(payee_channel);
	}

	let (secret, secrethash) = make_secret(3);
	let payer_expiration = U64::from(310);
	let amount = TokenAmount::from(50 + fee);

	let mut chain_state = make_chain_state(Keyring::Bob, channels);

	// Build the envelope Alice would send along with the locked transfer.
	let payer_channel = chain_state
		.channels
		.get_mut(&payer_channel_identifier)
		.expect("Channel exists");
	let lock = HashTimeLockState::new(amount, payer_expiration, secrethash);
	let locksroot = payer_channel
		.partner_state
		.lock_tree
		.compute_root_with(secrethash, lock.leaf())
		.expect("Not a duplicate");
	let envelope = make_partner_envelope(payer_channel, TokenAmount::zero(), locksroot);
	let canonical_identifier = payer_channel.canonical_identifier.clone();

	let from_transfer = LockedTransferState {
		channel_identifier: canonical_identifier,
		token: TOKEN,
		initiator: Keyring::Alice.address(),
		target: Keyring::Dave.address(),
		amount,
		target_amount: TokenAmount::from(50),
		fee: TokenAmount::from(fee),
		expiration: payer_expiration,
		secrethash,
		secret: None,
	};

	let transition = chain::state_transition(
		chain_state,
		ActionInitMediator { from_route: payer_route, from_transfer, routes, envelope }.into(),
	)
	.expect("Init should succeed");

	(
		MediationSetup {
			chain_state: transition.new_state,
			secret,
			secrethash,
			payer_channel_identifier,
			payer_expiration,
		},
		transition.events,
	)
}

fn payee_channel<'a>(chain_state: &'a ChainState, hop: Keyring) -> &'a ChannelState {
	views::get_channel_by_token_and_partner(chain_state, TOKEN, hop.address())
		.expect("Channel exists")
}

#[test]
fn test_init_forwards_transfer_with_fee_deducted() {
	let (setup, events) = setup_mediation(vec![Keyring::Charlie], 1);

	assert_eq!(events.len(), 1);
	let mediated = match &events[0] {
		Event::SendMediatedTransfer(inner) => inner,
		other => panic!("Expected SendMediatedTransfer, got {}", other.type_name()),
	};
	assert_eq!(mediated.inner.recipient, Keyring::Charlie.address());
	assert_eq!(mediated.transfer.amount, TokenAmount::from(50));
	assert_eq!(mediated.transfer.fee, TokenAmount::zero());
	assert!(mediated.transfer.expiration <= setup.payer_expiration);

	let key = payment_task_key(setup.secrethash, TOKEN);
	match setup.chain_state.payment_mapping.get(&key) {
		Some(TransferTask::Mediator(mediator_state)) => {
			assert_eq!(mediator_state.transfers_pair.len(), 1);
			let pair = &mediator_state.transfers_pair[0];
			assert!(pair.payer_transfer.expiration >= pair.payee_transfer.expiration);
		},
		other => panic!("Expected a mediator task, got {:?}", other),
	}

	// The received lock is registered in the payer channel.
	let payer_channel = views::get_channel(&setup.chain_state, setup.payer_channel_identifier)
		.expect("Channel exists");
	assert!(payer_channel.partner_state.pending_locks.contains_key(&setup.secrethash));
	// The forwarded lock is registered in the payee channel.
	assert!(payee_channel(&setup.chain_state, Keyring::Charlie)
		.our_state
		.pending_locks
		.contains_key(&setup.secrethash));
}

#[test]
fn test_init_without_route_refunds_payer() {
	let (setup, events) = setup_mediation(vec![], 0);

	let disposed = events
		.iter()
		.find_map(|event| match event {
			Event::SendAnnounceDisposed(inner) => Some(inner),
			_ => None,
		})
		.expect("The transfer must be refused");
	assert_eq!(disposed.inner.recipient, Keyring::Alice.address());
	assert_eq!(disposed.lock.secrethash, setup.secrethash);
	assert!(setup.chain_state.payment_mapping.is_empty());
}

#[test]
fn test_init_refuses_flooding_payer() {
	let mut payer_channel =
		make_channel_with_timeouts(Keyring::Bob, Keyring::Alice, 0, 100, 3, 600);
	// More outstanding locks than the reveal timeout allows.
	for seed in 100..104 {
		let (_, secrethash) = make_secret(seed);
		register_pending_lock(&mut payer_channel, true, 1, U64::from(500), secrethash);
	}
	let payer_route = make_route(Keyring::Alice, &payer_channel);
	let payee_channel = make_channel(Keyring::Bob, Keyring::Charlie, 100, 0);
	let payee_route = make_route(Keyring::Charlie, &payee_channel);
	let payer_channel_identifier = channel_id(&payer_channel);

	let (_, secrethash) = make_secret(3);
	let lock = HashTimeLockState::new(TokenAmount::from(50), U64::from(310), secrethash);
	let locksroot = payer_channel
		.partner_state
		.lock_tree
		.compute_root_with(secrethash, lock.leaf())
		.expect("Not a duplicate");
	let envelope = make_partner_envelope(&payer_channel, TokenAmount::zero(), locksroot);
	let canonical_identifier = payer_channel.canonical_identifier.clone();

	let chain_state = make_chain_state(Keyring::Bob, vec![payer_channel, payee_channel]);
	let transition = chain::state_transition(
		chain_state,
		ActionInitMediator {
			from_route: payer_route,
			from_transfer: LockedTransferState {
				channel_identifier: canonical_identifier,
				token: TOKEN,
				initiator: Keyring::Alice.address(),
				target: Keyring::Dave.address(),
				amount: TokenAmount::from(50),
				target_amount: TokenAmount::from(50),
				fee: TokenAmount::zero(),
				expiration: U64::from(310),
				secrethash,
				secret: None,
			},
			routes: vec![payee_route],
			envelope,
		}
		.into(),
	)
	.expect("Should transition");

	let disposed = transition
		.events
		.iter()
		.find_map(|event| match event {
			Event::SendAnnounceDisposed(inner) => Some(inner),
			_ => None,
		})
		.expect("The transfer must be refused");
	assert_eq!(disposed.lock.secrethash, secrethash);
	assert!(transition.new_state.payment_mapping.is_empty());
	// The flooding lock itself was still registered.
	let payer_channel = views::get_channel(&transition.new_state, payer_channel_identifier)
		.expect("Channel exists");
	assert_eq!(payer_channel.partner_state.pending_locks.len(), 5);
}

#[test]
fn test_secret_reveal_propagates_backwards_and_pays_payee() {
	let (setup, _) = setup_mediation(vec![Keyring::Charlie], 1);

	let transition = chain::state_transition(
		setup.chain_state,
		ReceiveSecretReveal {
			sender: Keyring::Charlie.address(),
			secret: setup.secret,
			secrethash: setup.secrethash,
		}
		.into(),
	)
	.expect("Should transition");

	// The secret travels backwards to the payer hop.
	let reveal = transition
		.events
		.iter()
		.find_map(|event| match event {
			Event::SendSecretReveal(inner) => Some(inner),
			_ => None,
		})
		.expect("The secret must be revealed to the payer");
	assert_eq!(reveal.inner.recipient, Keyring::Alice.address());

	// The payee is paid right away, the payer lock is far from expiring.
	let balance_proof = transition
		.events
		.iter()
		.find_map(|event| match event {
			Event::SendBalanceProof(inner) => Some(inner),
			_ => None,
		})
		.expect("The payee must be paid");
	assert_eq!(balance_proof.inner.recipient, Keyring::Charlie.address());
	assert_eq!(balance_proof.balance_proof.transferred_amount, TokenAmount::from(50));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::UnlockSuccess(_))));

	let key = payment_task_key(setup.secrethash, TOKEN);
	match transition.new_state.payment_mapping.get(&key) {
		Some(TransferTask::Mediator(mediator_state)) => {
			assert_eq!(mediator_state.secret, Some(setup.secret));
		},
		other => panic!("Expected a mediator task, got {:?}", other),
	}
}

#[test]
fn test_unlock_from_payer_finalizes_mediation() {
	let (setup, _) = setup_mediation(vec![Keyring::Charlie], 1);

	// Payee reveals and is paid first.
	let transition = chain::state_transition(
		setup.chain_state,
		ReceiveSecretReveal {
			sender: Keyring::Charlie.address(),
			secret: setup.secret,
			secrethash: setup.secrethash,
		}
		.into(),
	)
	.expect("Should transition");

	// Now the payer pays our lock with a new balance proof.
	let mut chain_state = transition.new_state;
	let payer_channel = chain_state
		.channels
		.get_mut(&setup.payer_channel_identifier)
		.expect("Channel exists");
	let locksroot = payer_channel
		.partner_state
		.lock_tree
		.compute_root_without(setup.secrethash)
		.expect("Lock exists");
	let envelope =
		make_partner_envelope(payer_channel, TokenAmount::from(51), locksroot);

	let transition = chain::state_transition(
		chain_state,
		ReceiveUnlock { envelope, secret: setup.secret, secrethash: setup.secrethash }.into(),
	)
	.expect("Should transition");

	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::WithdrawSuccess(_))));
	assert!(transition
		.events
		.iter()
		.any(|event| matches!(event, Event::RemoveStateManager(_))));
	assert!(transition.new_state.payment_mapping.is_empty());

	let payer_channel = views::get_channel(&transition.new_state, setup.payer_channel_identifier)
		.expect("Channel exists");
	assert_eq!(
		payer_channel.partner_state.transferred_amount(),
		TokenAmount::from(51)
	);
	assert!(payer_channel.partner_state.lock_tree.is_empty());
}

#[test]
fn test_refusal_from_payee_retries_over_next_route() {
	let (setup, events) = setup_mediation(vec![Keyring::Charlie, Keyring::Eve], 0);
	let forwarded = match &events[0] {
		Event::SendMediatedTransfer(inner) => inner.transfer.clone(),
		other => panic!("Expected SendMediatedTransfer, got {}", other.type_name()),
	};

	let charlie_channel_identifier =
		channel_id(payee_channel(&setup.chain_state, Keyring::Charlie));
	let transition = chain::state_transition(
		setup.chain_state,
		ReceiveAnnounceDisposed {
			canonical_identifier: CanonicalIdentifier::new(
				charlie_channel_identifier,
				U64::from(1),
			),
			sender: Keyring::Charlie.address(),
			lock: HashTimeLockState::new(
				forwarded.amount,
				forwarded.expiration,
				setup.secrethash,
			),
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
		.expect("The mediation must be retried");
	assert_eq!(retried.inner.recipient, Keyring::Eve.address());

	let key = payment_task_key(setup.secrethash, TOKEN);
	match transition.new_state.payment_mapping.get(&key) {
		Some(TransferTask::Mediator(mediator_state)) => {
			assert_eq!(mediator_state.transfers_pair.len(), 1);
			assert_eq!(
				mediator_state.transfers_pair[0].payee_route.hop_node,
				Keyring::Eve.address()
			);
		},
		other => panic!("Expected a mediator task, got {:?}", other),
	}
}

#[test]
fn test_danger_zone_registers_secret_once() {
	let (setup, _) = setup_mediation(vec![Keyring::Charlie], 1);

	// Payee knows the secret and was paid.
	let transition = chain::state_transition(
		setup.chain_state,
		ReceiveSecretReveal {
			sender: Keyring::Charlie.address(),
			secret: setup.secret,
			secrethash: setup.secrethash,
		}
		.into(),
	)
	.expect("Should transition");

	// Advance into the payer lock's danger zone: fewer than reveal_timeout
	// blocks remain before its expiration.
	let danger_block = setup.payer_expiration - U64::from(29);
	let transition = chain::state_transition(
		transition.new_state,
		Block { block_number: danger_block }.into(),
	)
	.expect("Should transition");

	let registrations = transition
		.events
		.iter()
		.filter(|event| matches!(event, Event::ContractSendRegisterSecret(_)))
		.count();
	assert_eq!(registrations, 1);

	let key = payment_task_key(setup.secrethash, TOKEN);
	match transition.new_state.payment_mapping.get(&key) {
		Some(TransferTask::Mediator(mediator_state)) => {
			assert_eq!(
				mediator_state.transfers_pair[0].payer_state,
				PayerState::WaitingRegisterSecret
			);
		},
		other => panic!("Expected a mediator task, got {:?}", other),
	}

	// Re-evaluation on the next block must not send a second transaction.
	let transition = chain::state_transition(
		transition.new_state,
		Block { block_number: danger_block + 1 }.into(),
	)
	.expect("Should transition");
	assert!(transition
		.events
		.iter()
		.all(|event| !matches!(event, Event::ContractSendRegisterSecret(_))));
}
