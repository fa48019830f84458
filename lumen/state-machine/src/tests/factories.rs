use ethsign::SecretKey;
use lumen_primitives::{
	hashing::{
		channel_identifier_from_participants,
		hash_secret,
	},
	types::{
		Address,
		BlockExpiration,
		CanonicalIdentifier,
		ChannelIdentifier,
		Locksroot,
		Secret,
		SecretHash,
		TokenAmount,
		U256,
		U64,
	},
};

use crate::types::{
	ChainState,
	ChannelState,
	Envelope,
	HashTimeLockState,
	PendingLock,
	RouteState,
};

/// Deterministic test identities.
#[derive(Copy, Clone, Debug)]
pub enum Keyring {
	Alice,
	Bob,
	Charlie,
	Dave,
	Eve,
}

impl Keyring {
	fn seed(&self) -> u8 {
		match self {
			Keyring::Alice => 1,
			Keyring::Bob => 2,
			Keyring::Charlie => 3,
			Keyring::Dave => 4,
			Keyring::Eve => 5,
		}
	}

	pub fn secret_key(&self) -> SecretKey {
		SecretKey::from_raw(&[self.seed(); 32]).expect("Valid test key")
	}

	pub fn address(&self) -> Address {
		Address::from_slice(&self.secret_key().public().address()[..])
	}
}

pub const TOKEN: Address = Address::repeat_byte(0xAA);
pub const TOKEN_NETWORK: Address = Address::repeat_byte(0xBB);
pub const SECRET_REGISTRY: Address = Address::repeat_byte(0xCC);

pub fn make_secret(seed: u8) -> (Secret, SecretHash) {
	let secret = Secret::repeat_byte(seed);
	let secrethash = hash_secret(secret.as_bytes());
	(secret, secrethash)
}

/// A channel between `our` and `partner`, open since block one.
pub fn make_channel(
	our: Keyring,
	partner: Keyring,
	our_deposit: u64,
	partner_deposit: u64,
) -> ChannelState {
	make_channel_with_timeouts(our, partner, our_deposit, partner_deposit, 30, 600)
}

pub fn make_channel_with_timeouts(
	our: Keyring,
	partner: Keyring,
	our_deposit: u64,
	partner_deposit: u64,
	reveal_timeout: u64,
	settle_timeout: u64,
) -> ChannelState {
	let channel_identifier = channel_identifier_from_participants(
		our.address(),
		partner.address(),
		TOKEN,
		TOKEN_NETWORK,
	);
	let mut channel_state = ChannelState::new(
		CanonicalIdentifier::new(channel_identifier, U64::from(1)),
		TOKEN,
		TOKEN_NETWORK,
		our.address(),
		partner.address(),
		U64::from(reveal_timeout),
		U64::from(settle_timeout),
	)
	.expect("Channel parameters should be valid");
	channel_state.our_state.contract_balance = TokenAmount::from(our_deposit);
	channel_state.partner_state.contract_balance = TokenAmount::from(partner_deposit);
	channel_state
}

/// A chain state owning the given channels, positioned at block ten.
pub fn make_chain_state(our: Keyring, channels: Vec<ChannelState>) -> ChainState {
	let mut chain_state = ChainState::new(
		U256::from(4321),
		U64::from(10),
		our.address(),
		TOKEN_NETWORK,
		SECRET_REGISTRY,
	);
	for channel_state in channels {
		chain_state
			.channels
			.insert(channel_state.canonical_identifier.channel_identifier, channel_state);
	}
	chain_state
}

/// An envelope from the channel's partner carrying its next nonce.
pub fn make_partner_envelope(
	channel_state: &ChannelState,
	transferred_amount: TokenAmount,
	locksroot: Locksroot,
) -> Envelope {
	Envelope {
		nonce: channel_state.partner_state.next_nonce(),
		canonical_identifier: channel_state.canonical_identifier.clone(),
		transferred_amount,
		locksroot,
		sender: channel_state.partner_state.address,
		signature: vec![0; 65].into(),
	}
}

/// A route over the channel towards `hop`.
pub fn make_route(hop: Keyring, channel_state: &ChannelState) -> RouteState {
	RouteState {
		hop_node: hop.address(),
		channel_identifier: channel_state.canonical_identifier.channel_identifier,
		settle_timeout: channel_state.settle_timeout,
		reveal_timeout: channel_state.reveal_timeout,
		fee: TokenAmount::zero(),
		available_balance: channel_state.distributable(),
		closed_block: U64::zero(),
	}
}

/// Force a pending lock into one side of a channel, bypassing message
/// validation. Useful to set up lock-heavy scenarios quickly.
pub fn register_pending_lock(
	channel_state: &mut ChannelState,
	partner_side: bool,
	amount: u64,
	expiration: BlockExpiration,
	secrethash: SecretHash,
) {
	let end_state = if partner_side {
		&mut channel_state.partner_state
	} else {
		&mut channel_state.our_state
	};
	let lock = HashTimeLockState::new(TokenAmount::from(amount), expiration, secrethash);
	let tree = end_state
		.lock_tree
		.add(secrethash, lock.leaf())
		.expect("Lock should not exist yet");
	let merkle_position = tree.len() - 1;
	end_state.set_lock_tree(tree);
	end_state.pending_locks.insert(secrethash, PendingLock { lock, merkle_position });
}

/// Channel identifier shorthand.
pub fn channel_id(channel_state: &ChannelState) -> ChannelIdentifier {
	channel_state.canonical_identifier.channel_identifier
}
