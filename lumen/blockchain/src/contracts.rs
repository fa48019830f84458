#![warn(clippy::missing_docs_in_private_items)]

use std::collections::HashMap;

use lumen_primitives::types::H256;

use crate::errors::ContractDefError;

/// Event names the core recognizes on the token network contract.
pub const EVENT_TOKEN_NETWORK_CREATED: &str = "TokenNetworkCreated";
pub const EVENT_CHANNEL_OPENED_AND_DEPOSIT: &str = "ChannelOpenedAndDeposit";
pub const EVENT_CHANNEL_NEW_DEPOSIT: &str = "ChannelNewDeposit";
pub const EVENT_CHANNEL_WITHDRAW: &str = "ChannelWithdraw";
pub const EVENT_CHANNEL_CLOSED: &str = "ChannelClosed";
pub const EVENT_CHANNEL_PUNISHED: &str = "ChannelPunished";
pub const EVENT_CHANNEL_UNLOCKED: &str = "ChannelUnlocked";
pub const EVENT_BALANCE_PROOF_UPDATED: &str = "BalanceProofUpdated";
pub const EVENT_CHANNEL_SETTLED: &str = "ChannelSettled";
pub const EVENT_CHANNEL_COOPERATIVE_SETTLED: &str = "ChannelCooperativeSettled";
/// Event name recognized on the secret registry contract.
pub const EVENT_SECRET_REVEALED: &str = "SecretRevealed";

/// Event definitions of the token network contract.
const TOKEN_NETWORK_ABI: &str = r#"[
	{"type":"event","name":"TokenNetworkCreated","inputs":[
		{"name":"token_address","type":"address","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelOpenedAndDeposit","inputs":[
		{"name":"token","type":"address","indexed":false},
		{"name":"participant","type":"address","indexed":false},
		{"name":"partner","type":"address","indexed":false},
		{"name":"settle_timeout","type":"uint64","indexed":false},
		{"name":"participant_deposit","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelNewDeposit","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"participant","type":"address","indexed":false},
		{"name":"total_deposit","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelWithdraw","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"participant1","type":"address","indexed":false},
		{"name":"participant2","type":"address","indexed":false},
		{"name":"participant1_balance","type":"uint256","indexed":false},
		{"name":"participant2_balance","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelClosed","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"closing_participant","type":"address","indexed":false},
		{"name":"locksroot","type":"bytes32","indexed":false},
		{"name":"transferred_amount","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelPunished","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"beneficiary","type":"address","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelUnlocked","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"payer_participant","type":"address","indexed":false},
		{"name":"lockhash","type":"bytes32","indexed":false},
		{"name":"transferred_amount","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"BalanceProofUpdated","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"participant","type":"address","indexed":false},
		{"name":"locksroot","type":"bytes32","indexed":false},
		{"name":"transferred_amount","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelSettled","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"participant1_amount","type":"uint256","indexed":false},
		{"name":"participant2_amount","type":"uint256","indexed":false}],"anonymous":false},
	{"type":"event","name":"ChannelCooperativeSettled","inputs":[
		{"name":"channel_identifier","type":"bytes32","indexed":false},
		{"name":"participant1_amount","type":"uint256","indexed":false},
		{"name":"participant2_amount","type":"uint256","indexed":false}],"anonymous":false}
]"#;

/// Event definitions of the secret registry contract.
const SECRET_REGISTRY_ABI: &str = r#"[
	{"type":"event","name":"SecretRevealed","inputs":[
		{"name":"secret","type":"bytes32","indexed":false}],"anonymous":false}
]"#;

/// The contract ABIs, loaded once at startup and shared immutably with the
/// event ingest loop.
pub struct ContractRegistry {
	token_network: ethabi::Contract,
	secret_registry: ethabi::Contract,
	topic_to_event: HashMap<H256, String>,
}

impl ContractRegistry {
	pub fn load() -> Result<Self, ContractDefError> {
		let token_network = ethabi::Contract::load(TOKEN_NETWORK_ABI.as_bytes())?;
		let secret_registry = ethabi::Contract::load(SECRET_REGISTRY_ABI.as_bytes())?;

		let mut topic_to_event = HashMap::new();
		for event in token_network.events().chain(secret_registry.events()) {
			topic_to_event.insert(event.signature(), event.name.clone());
		}

		Ok(Self { token_network, secret_registry, topic_to_event })
	}

	/// Name of the event behind a log's first topic, if known.
	pub fn event_name(&self, topic: &H256) -> Option<&str> {
		self.topic_to_event.get(topic).map(String::as_str)
	}

	/// Event definition by name, searching both contracts.
	pub fn event(&self, name: &str) -> Result<&ethabi::Event, ContractDefError> {
		self.token_network
			.event(name)
			.or_else(|_| self.secret_registry.event(name))
			.map_err(|_| ContractDefError::EventNotFound(name.to_owned()))
	}

	/// All event signature topics, used to build log filters.
	pub fn all_topics(&self) -> Vec<H256> {
		self.topic_to_event.keys().copied().collect()
	}
}
