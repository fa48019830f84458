#![warn(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use lumen_primitives::constants::STATE_CHANGE_QUEUE_DEPTH;
use lumen_state_machine::{
	errors::StateTransitionError,
	types::{
		Event,
		StateChange,
	},
};
use parking_lot::RwLock;
use tokio::sync::{
	broadcast,
	mpsc,
};
use tracing::{
	debug,
	error,
};

pub use self::{
	manager::StateManager,
	tx_watcher::TxWatcher,
};

/// The single-writer state manager.
pub mod manager;
/// The on-chain transaction watcher.
pub mod tx_watcher;

/// Serializes all state transitions and fans resulting events out to
/// subscribers. Collaborators submit state changes through the bounded
/// channel returned by `channel()`; events are observed via `subscribe()`.
pub struct Transitioner {
	state_manager: Arc<RwLock<StateManager>>,
	event_tx: broadcast::Sender<Event>,
}

impl Transitioner {
	pub fn new(state_manager: Arc<RwLock<StateManager>>) -> Self {
		let (event_tx, _) = broadcast::channel(256);
		Self { state_manager, event_tx }
	}

	/// The bounded state-change queue feeding this dispatcher.
	pub fn channel() -> (mpsc::Sender<StateChange>, mpsc::Receiver<StateChange>) {
		mpsc::channel(STATE_CHANGE_QUEUE_DEPTH)
	}

	/// Observe the events produced by every transition.
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.event_tx.subscribe()
	}

	/// Apply state changes in order, publishing the resulting events.
	pub fn transition(
		&self,
		state_changes: Vec<StateChange>,
	) -> Result<Vec<Event>, StateTransitionError> {
		let mut all_events = vec![];
		for state_change in state_changes {
			let events = self.state_manager.write().transition(state_change)?;
			for event in &events {
				// A send only fails when no subscriber exists, which is
				// fine during startup.
				let _ = self.event_tx.send(event.clone());
			}
			all_events.extend(events);
		}
		Ok(all_events)
	}

	/// Drain the state-change queue until every sender is gone. The current
	/// state change is always finished before returning.
	pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<StateChange>) {
		while let Some(state_change) = receiver.recv().await {
			debug!(state_change = state_change.type_name(), "dispatching");
			if let Err(e) = self.transition(vec![state_change]) {
				error!(reason = %e, "state transition failed");
			}
		}
		debug!("dispatcher stopped");
	}
}
