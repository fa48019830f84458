mod event;
mod state;
mod state_change;

use rand_chacha::{
	rand_core::{
		RngCore,
		SeedableRng,
	},
	ChaChaRng,
};
use serde::{
	Deserialize,
	Serialize,
};

pub use self::{
	event::*,
	state::*,
	state_change::*,
};

/// Deterministic generator for message identifiers. Seeded so replaying a
/// snapshot reproduces the exact same identifiers.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Random(ChaChaRng);

impl Random {
	pub fn new() -> Self {
		Self(ChaChaRng::seed_from_u64(0))
	}

	pub fn next(&mut self) -> u64 {
		self.0.next_u64()
	}
}

impl Default for Random {
	fn default() -> Self {
		Self::new()
	}
}

/// Terminal outcome of a tracked on-chain transaction.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransactionResult {
	Success,
	Failure,
}
